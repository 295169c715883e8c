//! Artifact identifiers.

use std::fmt;

use crate::{Error, Result};

/// Opaque artifact identifier: 128 random bits as 32 lowercase hex chars.
///
/// IDs double as filename prefixes and as the only credential needed to fetch
/// an artifact, so they come from the thread-local CSPRNG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Length of the textual form.
    pub const LEN: usize = 32;

    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Parse an ID received from a client.
    ///
    /// Anything that is not exactly 32 lowercase hex characters is reported as
    /// not found rather than invalid, so probing reveals nothing.
    pub fn parse(raw: &str) -> Result<Self> {
        let well_formed = raw.len() == Self::LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::not_found(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_is_well_formed() {
        let id = ArtifactId::generate();
        assert_eq!(id.as_str().len(), ArtifactId::LEN);
        assert_eq!(ArtifactId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_generate_does_not_repeat() {
        let ids: HashSet<ArtifactId> = (0..1000).map(|_| ArtifactId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "",
            "abc",
            "../../etc/passwd",
            "0123456789ABCDEF0123456789ABCDEF",
            "0123456789abcdef0123456789abcdeg",
            "0123456789abcdef0123456789abcdef0",
        ] {
            let err = ArtifactId::parse(raw).unwrap_err();
            assert!(err.is_not_found(), "{raw} should be rejected");
        }
    }
}
