//! End-to-end tests of the HTTP surface against in-process upstreams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

use media_relay::acquisition::strategy::{DirectHttpStrategy, PlaceholderStrategy};
use media_relay::acquisition::{
    AcquisitionRequest, AcquisitionStrategy, Orchestrator, OrchestratorBuilder, StrategyContext,
    StrategyOutput, StrategySlot,
};
use media_relay::api::{AppState, build_router};
use media_relay::config::{AppConfig, FailureMode};
use media_relay::store::ArtifactStore;
use media_relay::{Error, Result};

const API_KEY: &str = "test-key";

struct AlwaysFails(&'static str);

#[async_trait]
impl AcquisitionStrategy for AlwaysFails {
    fn name(&self) -> &str {
        self.0
    }

    async fn attempt(
        &self,
        _ctx: &StrategyContext,
        _request: &AcquisitionRequest,
    ) -> Result<StrategyOutput> {
        Err(Error::strategy(self.0, "upstream blocked"))
    }
}

/// Serves 4096 bytes of fake MP3 at `/song.mp3` and an HTML page at `/page`.
async fn spawn_upstream() -> String {
    async fn song() -> impl IntoResponse {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        ([(header::CONTENT_TYPE, "audio/mpeg")], data)
    }
    async fn page() -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "text/html")], "<html></html>")
    }

    let app = Router::new()
        .route("/song.mp3", get(song))
        .route("/page", get(page));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct TestApp {
    _temp: TempDir,
    router: Router,
    store: Arc<ArtifactStore>,
}

async fn app_with(configure: impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder) -> TestApp {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::open(temp.path()).await.unwrap());
    let orchestrator = Arc::new(configure(Orchestrator::builder(store.clone())).build());

    let mut config = AppConfig {
        api_key: Some(API_KEY.to_string()),
        ..AppConfig::default()
    };
    config.store.delivery_grace = Duration::from_secs(60);
    // Upstreams in these tests listen on loopback.
    config.acquisition.allow_private_sources = true;

    let state = AppState::new(&config, orchestrator);
    TestApp {
        _temp: temp,
        router: build_router(state, true),
        store,
    }
}

async fn direct_http_app() -> TestApp {
    app_with(|b| {
        b.strategy(StrategySlot::new(
            Arc::new(DirectHttpStrategy::new(reqwest::Client::new(), 1 << 20)),
            Duration::from_secs(10),
        ))
    })
    .await
}

fn failing_app(mode: FailureMode) -> impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder {
    move |b| {
        b.mode(mode)
            .strategy(StrategySlot::new(
                Arc::new(AlwaysFails("first")),
                Duration::from_secs(1),
            ))
            .strategy(StrategySlot::new(
                Arc::new(AlwaysFails("second")),
                Duration::from_secs(1),
            ))
            .last_resort(Arc::new(PlaceholderStrategy::new()))
    }
}

async fn get_request(router: &Router, uri: &str, range: Option<&str>) -> axum::response::Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(range) = range {
        builder = builder.header(header::RANGE, range);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn download_uri(media_type: &str, source: &str, quality: &str) -> String {
    format!(
        "/api/download/{media_type}?apikey={API_KEY}&url={}&quality={quality}",
        encode(source)
    )
}

#[tokio::test]
async fn test_audio_acquisition_then_delivery() {
    let upstream = spawn_upstream().await;
    let app = direct_http_app().await;

    let response = get_request(
        &app.router,
        &download_uri("audio", &format!("{upstream}/song.mp3"), "128"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["result"]["method"], "direct-http");
    assert_eq!(json["result"]["quality"], "128kbps");
    assert_eq!(json["result"]["title"], "song");
    assert!(json["result"].get("note").is_none());

    let file_size = json["result"]["file_size"].as_u64().unwrap();
    assert_eq!(file_size, 4096);
    let download_url = json["result"]["download_url"].as_str().unwrap();
    assert!(download_url.starts_with("/api/download/file/"));

    let response = get_request(&app.router, download_url, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len() as u64, file_size);
}

#[tokio::test]
async fn test_range_requests_over_http() {
    let upstream = spawn_upstream().await;
    let app = direct_http_app().await;

    let json = json_body(
        get_request(
            &app.router,
            &download_uri("mp3", &format!("{upstream}/song.mp3"), "320"),
            None,
        )
        .await,
    )
    .await;
    let download_url = json["result"]["download_url"].as_str().unwrap().to_string();

    let response = get_request(&app.router, &download_url, Some("bytes=0-99")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/4096");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), 100);
    assert_eq!(body[99], 99);

    let response = get_request(&app.router, &download_url, Some("bytes=3996-")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), 100);

    let response = get_request(&app.router, &download_url, Some("bytes=oops")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), 4096);
}

#[tokio::test]
async fn test_non_media_source_fails_in_strict_mode() {
    let upstream = spawn_upstream().await;
    let app = direct_http_app().await;

    let response = get_request(
        &app.router,
        &download_uri("audio", &format!("{upstream}/page"), "128"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_strict_total_failure_is_reported() {
    let app = app_with(failing_app(FailureMode::Strict)).await;

    let response = get_request(
        &app.router,
        &download_uri("video", "https://media.example.com/watch?v=1", "720"),
        None,
    )
    .await;
    assert!(response.status().is_server_error());
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    let error = json["error"].as_str().unwrap();
    assert!(error.contains("first") && error.contains("second"));
}

#[tokio::test]
async fn test_lenient_total_failure_serves_placeholder() {
    let app = app_with(failing_app(FailureMode::Lenient)).await;

    let response = get_request(
        &app.router,
        &download_uri("video", "https://media.example.com/watch?v=1", "720p"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["result"]["method"], "placeholder");
    assert!(json["result"]["note"].as_str().unwrap().contains("Placeholder"));

    let download_url = json["result"]["download_url"].as_str().unwrap();
    let response = get_request(&app.router, download_url, None).await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[4..8], b"ftyp");
}

#[tokio::test]
async fn test_request_validation() {
    let app = app_with(failing_app(FailureMode::Strict)).await;
    let source = encode("https://media.example.com/watch?v=1");

    let cases = [
        (format!("/api/download/audio?url={source}"), StatusCode::UNAUTHORIZED),
        (
            format!("/api/download/audio?apikey=wrong&url={source}"),
            StatusCode::FORBIDDEN,
        ),
        (
            format!("/api/download/audio?apikey={API_KEY}"),
            StatusCode::BAD_REQUEST,
        ),
        (
            format!("/api/download/audio?apikey={API_KEY}&url=notaurl"),
            StatusCode::BAD_REQUEST,
        ),
        (
            format!("/api/download/audio?apikey={API_KEY}&url={source}&quality=1080p"),
            StatusCode::BAD_REQUEST,
        ),
    ];

    for (uri, expected) in cases {
        let response = get_request(&app.router, &uri, None).await;
        assert_eq!(response.status(), expected, "{uri}");
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn test_unknown_artifact_is_not_found() {
    let app = app_with(failing_app(FailureMode::Strict)).await;

    for id in ["0123456789abcdef0123456789abcdef", "not-an-id"] {
        let response = get_request(&app.router, &format!("/api/download/file/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
    }
}

#[tokio::test]
async fn test_health_lists_components() {
    let app = app_with(failing_app(FailureMode::Strict)).await;

    let response = get_request(&app.router, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    let names: Vec<&str> = json["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["artifact_store", "strategy:first", "strategy:second"]);

    let response = get_request(&app.router, "/health/live", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(app.store.dir().exists());
}
