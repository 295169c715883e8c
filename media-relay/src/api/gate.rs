//! Request admission: credentials and input shape.

use url::Url;

use super::error::ApiError;
use super::models::DownloadQuery;
use crate::acquisition::{AcquisitionRequest, MediaFormat, Quality};
use crate::utils::http_client::is_internal_host;

/// Checks credentials and turns query parameters into an
/// [`AcquisitionRequest`].
#[derive(Debug, Clone)]
pub struct RequestGate {
    api_key: Option<String>,
    allow_private_sources: bool,
}

impl RequestGate {
    /// `api_key = None` admits every caller.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            allow_private_sources: false,
        }
    }

    /// Accept sources on loopback, private and link-local hosts.
    pub fn allow_private_sources(mut self, allow: bool) -> Self {
        self.allow_private_sources = allow;
        self
    }

    pub fn requires_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn admit(&self, media_type: &str, query: &DownloadQuery) -> Result<AcquisitionRequest, ApiError> {
        self.check_key(query.apikey.as_deref())?;

        let format = MediaFormat::from_media_type(media_type).ok_or_else(|| {
            ApiError::bad_request(format!(
                "Unsupported media type '{media_type}'. Use 'audio' or 'video'"
            ))
        })?;

        let raw_url = query
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::bad_request("Missing 'url' parameter"))?;
        let source_url = Url::parse(raw_url)
            .map_err(|_| ApiError::bad_request(format!("Invalid URL '{raw_url}'")))?;
        if !matches!(source_url.scheme(), "http" | "https") || source_url.host_str().is_none() {
            return Err(ApiError::bad_request("Only http and https URLs are supported"));
        }
        if !self.allow_private_sources && is_internal_host(&source_url) {
            return Err(ApiError::bad_request("Source host is not allowed"));
        }

        let quality = match query.quality.as_deref().map(str::trim) {
            None | Some("") => format.default_quality(),
            Some(raw) => Quality::parse(format, raw)?,
        };

        let aggressive = [&query.aggressive, &query.stream, &query.download]
            .into_iter()
            .flatten()
            .any(|v| is_truthy(v));

        Ok(AcquisitionRequest::new(source_url, format, quality).with_aggressive(aggressive))
    }

    fn check_key(&self, provided: Option<&str>) -> Result<(), ApiError> {
        let Some(expected) = &self.api_key else {
            return Ok(());
        };
        match provided.filter(|k| !k.is_empty()) {
            None => Err(ApiError::unauthorized("Missing 'apikey' parameter")),
            Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => Ok(()),
            Some(_) => Err(ApiError::forbidden("Invalid API key")),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
