//! Fetching the source URL itself when it already serves the target format.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::http_sink::download_to_file;
use crate::acquisition::{
    AcquisitionRequest, AcquisitionStrategy, MediaFormat, MediaInfo, StrategyContext,
    StrategyOutput,
};
use crate::{Error, Result};

pub const DIRECT_HTTP_NAME: &str = "direct-http";

/// Streams the source URL into staging when it points straight at media.
pub struct DirectHttpStrategy {
    client: reqwest::Client,
    max_bytes: u64,
}

impl DirectHttpStrategy {
    pub fn new(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    fn accepts(format: MediaFormat, content_type: Option<&str>, url_path: &str) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let matches_mime = match format {
            MediaFormat::Audio => mime == "audio/mpeg" || mime == "audio/mp3",
            MediaFormat::Video => mime == "video/mp4",
        };
        if matches_mime {
            return true;
        }

        mime == "application/octet-stream"
            && url_path
                .to_ascii_lowercase()
                .ends_with(&format!(".{}", format.extension()))
    }
}

/// Last non-empty path segment without its extension.
fn title_from_url(url: &url::Url) -> Option<String> {
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = percent_decode(segment);
    let stem = match decoded.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => decoded,
    };
    (!stem.is_empty()).then_some(stem)
}

fn percent_decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

#[async_trait]
impl AcquisitionStrategy for DirectHttpStrategy {
    fn name(&self) -> &str {
        DIRECT_HTTP_NAME
    }

    async fn attempt(
        &self,
        ctx: &StrategyContext,
        request: &AcquisitionRequest,
    ) -> Result<StrategyOutput> {
        let response = self
            .client
            .get(request.source_url.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::strategy(DIRECT_HTTP_NAME, format!("upstream returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !Self::accepts(request.format, content_type.as_deref(), request.source_url.path()) {
            return Err(Error::strategy(
                DIRECT_HTTP_NAME,
                format!(
                    "source is not {} media (content-type: {})",
                    request.format,
                    content_type.as_deref().unwrap_or("none")
                ),
            ));
        }

        let path = ctx.target.path.clone();
        let written = download_to_file(
            DIRECT_HTTP_NAME,
            response,
            &path,
            &ctx.cancel,
            self.max_bytes,
        )
        .await?;
        debug!(artifact_id = %ctx.target.id, bytes = written, "Fetched media directly from source");

        let mut info = MediaInfo::default();
        if let Some(title) = title_from_url(&request.source_url) {
            info.title = title;
        }
        Ok(StrategyOutput::new(path).with_info(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_matching_mime() {
        assert!(DirectHttpStrategy::accepts(
            MediaFormat::Audio,
            Some("audio/mpeg"),
            "/a"
        ));
        assert!(DirectHttpStrategy::accepts(
            MediaFormat::Video,
            Some("video/mp4; charset=binary"),
            "/a"
        ));
        assert!(!DirectHttpStrategy::accepts(
            MediaFormat::Audio,
            Some("video/mp4"),
            "/a"
        ));
        assert!(!DirectHttpStrategy::accepts(
            MediaFormat::Audio,
            Some("text/html"),
            "/watch"
        ));
        assert!(!DirectHttpStrategy::accepts(MediaFormat::Audio, None, "/a.mp3"));
    }

    #[test]
    fn test_accepts_octet_stream_with_extension() {
        assert!(DirectHttpStrategy::accepts(
            MediaFormat::Audio,
            Some("application/octet-stream"),
            "/files/Song.MP3"
        ));
        assert!(!DirectHttpStrategy::accepts(
            MediaFormat::Video,
            Some("application/octet-stream"),
            "/files/song.mp3"
        ));
    }

    #[test]
    fn test_title_from_url() {
        let url = url::Url::parse("https://cdn.example.com/media/My%20Track.mp3").unwrap();
        assert_eq!(title_from_url(&url).as_deref(), Some("My Track"));

        let url = url::Url::parse("https://cdn.example.com/audio/Rock+Roll.mp3").unwrap();
        assert_eq!(title_from_url(&url).as_deref(), Some("Rock+Roll"));

        let url = url::Url::parse("https://cdn.example.com/a=b&c.mp3").unwrap();
        assert_eq!(title_from_url(&url).as_deref(), Some("a=b&c"));

        let url = url::Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(title_from_url(&url), None);
    }
}
