//! Acquisition route.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use tracing::info;

use crate::api::error::ApiResult;
use crate::api::models::{DownloadQuery, DownloadResponse};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{media_type}", get(acquire))
}

/// `GET /api/download/{media_type}`
///
/// Responds only once the artifact is registered, so the advertised
/// `download_url` is always fetchable. A client disconnect drops the
/// acquisition and with it any running strategy.
async fn acquire(
    State(state): State<AppState>,
    Path(media_type): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Json<DownloadResponse>> {
    let request = state.gate.admit(&media_type, &query)?;
    let result = state.orchestrator.acquire(&request).await?;

    let download_url = state.download_url(result.artifact_id.as_str());
    info!(
        artifact_id = %result.artifact_id,
        strategy = %result.strategy_used,
        format = %result.format,
        placeholder = result.placeholder,
        "Artifact ready"
    );
    Ok(Json(DownloadResponse::from_result(&result, download_url)))
}
