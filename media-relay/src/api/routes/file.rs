//! Artifact delivery route.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, Method},
    response::Response,
    routing::get,
};

use crate::api::error::ApiResult;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/file/{artifact_id}", get(serve_file))
}

/// `GET /api/download/file/{artifact_id}`
///
/// `HEAD` requests are answered with the same headers and do not schedule
/// deletion.
async fn serve_file(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let delete_after = method != Method::HEAD;
    Ok(state
        .delivery
        .serve(&artifact_id, &headers, delete_after)
        .await?)
}
