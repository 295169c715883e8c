//! API request and response models.

use serde::{Deserialize, Serialize};

use crate::acquisition::AcquisitionResult;

/// Query parameters of `GET /api/download/{media_type}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadQuery {
    pub apikey: Option<String>,
    pub url: Option<String>,
    pub quality: Option<String>,
    pub aggressive: Option<String>,
    /// Legacy spelling of `aggressive`.
    pub stream: Option<String>,
    /// Legacy spelling of `aggressive`.
    pub download: Option<String>,
}

/// Successful acquisition response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub status: u16,
    pub success: bool,
    pub result: DownloadResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub title: String,
    pub thumbnail: String,
    pub duration: u64,
    pub quality: String,
    pub format: String,
    pub download_url: String,
    pub file_size: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DownloadResponse {
    pub fn from_result(result: &AcquisitionResult, download_url: String) -> Self {
        let note = result.placeholder.then(|| {
            "Placeholder content: the media could not be acquired from the source".to_string()
        });
        Self {
            status: 200,
            success: true,
            result: DownloadResult {
                title: result.info.title.clone(),
                thumbnail: result.info.thumbnail.clone(),
                duration: result.info.duration_secs,
                quality: result.quality.to_string(),
                format: result.format.extension().to_string(),
                download_url,
                file_size: result.size_bytes,
                method: result.strategy_used.clone(),
                note,
            },
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
}
