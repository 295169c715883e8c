//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
}

/// Store directory plus one entry per strategy. Degraded when any
/// component is unavailable, unhealthy when the store is.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let mut components = Vec::new();

    let store_dir = state.store.dir();
    let store_ok = tokio::fs::metadata(store_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    components.push(ComponentHealth {
        name: "artifact_store".to_string(),
        status: if store_ok { "healthy" } else { "unhealthy" }.to_string(),
        message: Some(store_dir.display().to_string()),
    });

    let mut all_available = true;
    for strategy in state.orchestrator.strategies() {
        let available = strategy.is_available().await;
        all_available &= available;
        components.push(ComponentHealth {
            name: format!("strategy:{}", strategy.name()),
            status: if available { "healthy" } else { "unavailable" }.to_string(),
            message: None,
        });
    }

    let (status_code, status) = match (store_ok, all_available) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (true, false) => (StatusCode::OK, "degraded"),
        (true, true) => (StatusCode::OK, "healthy"),
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            components,
        }),
    )
}

/// Liveness check - is the service alive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 3600,
            components: vec![ComponentHealth {
                name: "artifact_store".to_string(),
                status: "healthy".to_string(),
                message: None,
            }],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("artifact_store"));
    }
}
