//! Remote converter service: POST the source, download the returned link.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::http_sink::download_to_file;
use crate::acquisition::{
    AcquisitionRequest, AcquisitionStrategy, MediaInfo, StrategyContext, StrategyOutput,
};
use crate::{Error, Result};

pub const CONVERTER_API_NAME: &str = "converter-api";

#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    url: &'a str,
    format: &'static str,
    quality: String,
}

/// Converter responses vary in how they name the link, so every known alias
/// is accepted.
#[derive(Debug, Default, Deserialize)]
struct ConvertResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default, rename = "downloadUrl")]
    download_url_camel: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl ConvertResponse {
    fn link(&self) -> Option<&str> {
        [
            &self.download_url,
            &self.download_url_camel,
            &self.link,
            &self.url,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
    }

    fn info(&self) -> MediaInfo {
        let mut info = MediaInfo::default();
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            info.title = title.to_string();
        }
        if let Some(thumbnail) = &self.thumbnail {
            info.thumbnail = thumbnail.clone();
        }
        if let Some(duration) = self.duration.filter(|d| d.is_finite() && *d > 0.0) {
            info.duration_secs = duration.round() as u64;
        }
        info
    }
}

/// Delegates conversion to an HTTP converter service.
pub struct ConverterApiStrategy {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    max_bytes: u64,
}

impl ConverterApiStrategy {
    pub fn new(client: reqwest::Client, endpoint: &str, max_bytes: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid converter endpoint '{endpoint}': {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key: None,
            max_bytes,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn resolve_link(&self, link: &str) -> Result<Url> {
        self.endpoint
            .join(link)
            .map_err(|e| Error::strategy(CONVERTER_API_NAME, format!("invalid link '{link}': {e}")))
    }
}

#[async_trait]
impl AcquisitionStrategy for ConverterApiStrategy {
    fn name(&self) -> &str {
        CONVERTER_API_NAME
    }

    async fn attempt(
        &self,
        ctx: &StrategyContext,
        request: &AcquisitionRequest,
    ) -> Result<StrategyOutput> {
        let body = ConvertRequest {
            url: request.source_url.as_str(),
            format: request.format.extension(),
            quality: request.quality.value().to_string(),
        };

        // Bounds the conversion call only; the download below streams under
        // the orchestrator's budget.
        let mut post = self
            .client
            .post(self.endpoint.clone())
            .timeout(ctx.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            post = post.bearer_auth(key);
        }

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(Error::strategy(CONVERTER_API_NAME, "cancelled"));
            }
            response = post.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::strategy(
                CONVERTER_API_NAME,
                format!("converter returned {status}"),
            ));
        }

        let parsed: ConvertResponse = response.json().await?;
        if parsed.success == Some(false) {
            let reason = parsed.error.as_deref().unwrap_or("conversion failed");
            return Err(Error::strategy(CONVERTER_API_NAME, reason));
        }
        let Some(link) = parsed.link() else {
            return Err(Error::strategy(
                CONVERTER_API_NAME,
                "response carried no download link",
            ));
        };
        let link = self.resolve_link(link)?;
        debug!(artifact_id = %ctx.target.id, link = %link, "Converter returned download link");

        let download = self.client.get(link).send().await?;
        let status = download.status();
        if !status.is_success() {
            return Err(Error::strategy(
                CONVERTER_API_NAME,
                format!("download link returned {status}"),
            ));
        }

        let path = ctx.target.path.clone();
        download_to_file(
            CONVERTER_API_NAME,
            download,
            &path,
            &ctx.cancel,
            self.max_bytes,
        )
        .await?;

        Ok(StrategyOutput::new(path).with_info(parsed.info()))
    }
}
