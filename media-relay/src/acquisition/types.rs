//! Request, result and outcome types for acquisition.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::store::ArtifactId;
use crate::{Error, Result};

/// Supported audio bitrates in kbps.
pub const AUDIO_BITRATES: [u16; 5] = [64, 128, 192, 256, 320];

/// Supported video heights in pixels.
pub const VIDEO_HEIGHTS: [u16; 6] = [144, 240, 360, 480, 720, 1080];

/// Class of artifact being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Audio,
    Video,
}

impl MediaFormat {
    /// Parse the `{mediaType}` path segment.
    pub fn from_media_type(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Some(Self::Audio),
            "video" | "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Audio),
            "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    /// File extension of artifacts in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video => "mp4",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Audio => "audio/mpeg",
            Self::Video => "video/mp4",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn default_quality(&self) -> Quality {
        match self {
            Self::Audio => Quality::AudioKbps(128),
            Self::Video => Quality::VideoHeight(720),
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested quality. The valid set depends on the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    AudioKbps(u16),
    VideoHeight(u16),
}

impl Quality {
    /// Parse a client-supplied quality for `format`.
    ///
    /// Audio accepts `128` or `128kbps`, video accepts `720` or `720p`.
    pub fn parse(format: MediaFormat, raw: &str) -> Result<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        let invalid = || {
            let allowed: Vec<String> = match format {
                MediaFormat::Audio => AUDIO_BITRATES.iter().map(|b| b.to_string()).collect(),
                MediaFormat::Video => VIDEO_HEIGHTS.iter().map(|h| format!("{h}p")).collect(),
            };
            Error::validation(format!(
                "Invalid {format} quality '{raw}'. Allowed: {}",
                allowed.join(", ")
            ))
        };

        match format {
            MediaFormat::Audio => {
                let digits = lower.strip_suffix("kbps").unwrap_or(&lower);
                let kbps: u16 = digits.parse().map_err(|_| invalid())?;
                if AUDIO_BITRATES.contains(&kbps) {
                    Ok(Self::AudioKbps(kbps))
                } else {
                    Err(invalid())
                }
            }
            MediaFormat::Video => {
                let digits = lower.strip_suffix('p').unwrap_or(&lower);
                let height: u16 = digits.parse().map_err(|_| invalid())?;
                if VIDEO_HEIGHTS.contains(&height) {
                    Ok(Self::VideoHeight(height))
                } else {
                    Err(invalid())
                }
            }
        }
    }

    /// The bare number (kbps or height).
    pub fn value(&self) -> u16 {
        match self {
            Self::AudioKbps(v) | Self::VideoHeight(v) => *v,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AudioKbps(kbps) => write!(f, "{kbps}kbps"),
            Self::VideoHeight(height) => write!(f, "{height}p"),
        }
    }
}

/// One inbound acquisition request. Built per HTTP request and not mutated.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub source_url: Url,
    pub quality: Quality,
    pub format: MediaFormat,
    /// Prefer slower, more persistent strategies and relax their timeouts.
    pub aggressive: bool,
}

impl AcquisitionRequest {
    pub fn new(source_url: Url, format: MediaFormat, quality: Quality) -> Self {
        Self {
            source_url,
            quality,
            format,
            aggressive: false,
        }
    }

    pub fn with_aggressive(mut self, aggressive: bool) -> Self {
        self.aggressive = aggressive;
        self
    }

    /// Key under which identical concurrent requests are coalesced.
    ///
    /// The URL is normalized: fragment dropped, query pairs sorted. Host case
    /// and default ports are already normalized by the URL parser.
    pub fn flight_key(&self) -> String {
        let mut url = self.source_url.clone();
        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }

        format!("{}|{}|{}", self.format, self.quality, url)
    }
}

/// Descriptive metadata reported by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail: String,
    pub duration_secs: u64,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            title: "Unknown".to_string(),
            thumbnail: String::new(),
            duration_secs: 0,
        }
    }
}

/// A successful acquisition, registered with the artifact store.
#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    pub artifact_id: ArtifactId,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub strategy_used: String,
    pub succeeded: bool,
    /// The artifact was synthesized, not acquired from the source.
    pub placeholder: bool,
    pub format: MediaFormat,
    pub quality: Quality,
    pub info: MediaInfo,
}

/// Diagnostic record of one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyOutcome {
    pub strategy_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrategyOutcome {
    pub fn failed(strategy: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            strategy_name: strategy.into(),
            error: Some(error.into()),
        }
    }
}
