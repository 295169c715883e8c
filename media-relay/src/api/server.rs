//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::http::header;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::acquisition::Orchestrator;
use crate::api::gate::RequestGate;
use crate::api::routes;
use crate::config::{AppConfig, ServerConfig};
use crate::delivery::DeliveryHandler;
use crate::error::{Error, Result};
use crate::store::ArtifactStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub gate: Arc<RequestGate>,
    pub orchestrator: Arc<Orchestrator>,
    pub delivery: Arc<DeliveryHandler>,
    pub store: Arc<ArtifactStore>,
    /// Prefix for advertised download URLs; relative URLs when unset.
    pub public_base_url: Option<String>,
}

impl AppState {
    pub fn new(config: &AppConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let store = orchestrator.store().clone();
        Self {
            start_time: Instant::now(),
            gate: Arc::new(
                RequestGate::new(config.api_key.clone())
                    .allow_private_sources(config.acquisition.allow_private_sources),
            ),
            delivery: Arc::new(DeliveryHandler::new(
                store.clone(),
                config.store.delivery_grace,
            )),
            orchestrator,
            store,
            public_base_url: config.public_base_url.clone(),
        }
    }

    /// Where clients fetch the artifact with `id`.
    pub fn download_url(&self, id: &str) -> String {
        let path = format!("/api/download/file/{id}");
        match &self.public_base_url {
            Some(base) => format!("{base}{path}"),
            None => path,
        }
    }
}

fn is_health_probe(req: &Request) -> bool {
    req.uri().path().starts_with("/health")
}

/// API server.
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        build_router(self.state.clone(), self.config.enable_cors)
    }

    /// Start the server.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {e}")))?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

/// Routes plus CORS and request tracing.
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let mut router = routes::create_router(state);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([
                header::CONTENT_RANGE,
                header::CONTENT_LENGTH,
                header::ACCEPT_RANGES,
            ]);
        router = router.layer(cors);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                if is_health_probe(req) {
                    Span::none()
                } else {
                    let mut make_span =
                        tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                    use tower_http::trace::MakeSpan;
                    make_span.make_span(req)
                }
            })
            .on_request(|req: &Request, span: &Span| {
                if span.is_disabled() || is_health_probe(req) {
                    return;
                }
                let mut on_request =
                    tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                use tower_http::trace::OnRequest;
                on_request.on_request(req, span);
            })
            .on_response(
                |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let on_response =
                        tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnResponse;
                    on_response.on_response(res, latency, span);
                },
            )
            .on_failure(
                |class: tower_http::classify::ServerErrorsFailureClass,
                 latency: Duration,
                 span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let mut on_failure =
                        tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                    use tower_http::trace::OnFailure;
                    on_failure.on_failure(class, latency, span);
                },
            ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_state(public_base_url: Option<&str>) -> (TempDir, AppState) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(temp.path()).await.unwrap());
        let orchestrator = Arc::new(Orchestrator::builder(store).build());
        let config = AppConfig {
            public_base_url: public_base_url.map(String::from),
            ..AppConfig::default()
        };
        (temp, AppState::new(&config, orchestrator))
    }

    #[tokio::test]
    async fn test_download_url() {
        let (_temp, state) = test_state(None).await;
        assert_eq!(state.download_url("abc"), "/api/download/file/abc");

        let (_temp, state) = test_state(Some("https://media.example.com")).await;
        assert_eq!(
            state.download_url("abc"),
            "https://media.example.com/api/download/file/abc"
        );
    }

    #[tokio::test]
    async fn test_server_creation() {
        let (_temp, state) = test_state(None).await;
        let server = ApiServer::new(ServerConfig::default(), state, CancellationToken::new());
        let token = server.cancel_token();
        assert!(!token.is_cancelled());
        server.shutdown();
        assert!(token.is_cancelled());
    }
}
