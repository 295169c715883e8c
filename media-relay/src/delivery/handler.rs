//! Serving stored artifacts to HTTP clients.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use tower_http::services::ServeFile;
use tracing::info;

use super::cleanup::DeleteAfterDelivery;
use super::range::ByteRange;
use crate::store::{ArtifactEntry, ArtifactId, ArtifactStore};
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Serves artifacts with single byte-range support and schedules their
/// deletion once delivered.
pub struct DeliveryHandler {
    store: Arc<ArtifactStore>,
    grace: Duration,
}

impl DeliveryHandler {
    pub fn new(store: Arc<ArtifactStore>, grace: Duration) -> Self {
        Self { store, grace }
    }

    /// Build the response for `raw_id`.
    ///
    /// Only a single satisfiable range reaches the file service; anything it
    /// would reject as malformed is dropped so the whole file is sent instead.
    /// With `delete_after` set, the artifact is deleted a grace period after
    /// the body has been fully sent or dropped.
    pub async fn serve(
        &self,
        raw_id: &str,
        headers: &HeaderMap,
        delete_after: bool,
    ) -> Result<Response> {
        let id = ArtifactId::parse(raw_id)?;
        let entry = self.store.resolve(&id).await?;
        let size = entry.size_bytes;

        let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
        let mut request = Request::builder().method(Method::GET);
        match ByteRange::parse(range_header, size) {
            ByteRange::Full => {}
            ByteRange::Partial { start, end } => {
                request = request.header(header::RANGE, format!("bytes={start}-{end}"));
            }
            ByteRange::Unsatisfiable => {
                return axum::http::Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CACHE_CONTROL, "no-store")
                    .body(Body::empty())
                    .map_err(|e| Error::Other(format!("failed to build response: {e}")));
            }
        }
        let request = request
            .body(Body::empty())
            .map_err(|e| Error::Other(format!("failed to build file request: {e}")))?;

        let response = ServeFile::new(&entry.path)
            .try_call(request)
            .await
            .map_err(|e| io_error("serving artifact", &entry.path, e))?;

        let (mut parts, body) = response.into_parts();
        if parts.status == StatusCode::NOT_FOUND {
            // Swept between resolve and open.
            return Err(Error::not_found(id.as_str()));
        }
        if !parts.status.is_success() {
            return Err(Error::Other(format!(
                "file service answered {} for artifact {id}",
                parts.status
            )));
        }

        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type(&entry)),
        );
        parts
            .headers
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        parts
            .headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        parts
            .headers
            .insert(header::CONTENT_DISPOSITION, content_disposition(&entry));

        info!(
            artifact_id = %id,
            status = parts.status.as_u16(),
            size,
            delete_after,
            "Serving artifact"
        );

        let body = Body::new(body);
        let body = if delete_after {
            let guard = DeleteAfterDelivery::new(self.store.clone(), id, self.grace);
            Body::from_stream(body.into_data_stream().map(move |chunk| {
                // The guard lives exactly as long as the body.
                let _guard = &guard;
                chunk
            }))
        } else {
            body
        };

        Ok(Response::from_parts(parts, body))
    }
}

fn content_type(entry: &ArtifactEntry) -> &'static str {
    entry
        .format
        .map(|format| format.content_type())
        .unwrap_or("application/octet-stream")
}

fn content_disposition(entry: &ArtifactEntry) -> HeaderValue {
    let value = format!("attachment; filename=\"{}\"", entry.file_name());
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::MediaFormat;
    use axum::body::to_bytes;
    use tempfile::TempDir;

    async fn setup(data: &[u8]) -> (TempDir, Arc<ArtifactStore>, ArtifactId) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(temp.path()).await.unwrap());
        let id = ArtifactId::generate();
        let target = store.staging_target(&id, MediaFormat::Audio);
        tokio::fs::write(&target.path, data).await.unwrap();
        store.put(&id, &target.path).await.unwrap();
        (temp, store, id)
    }

    fn range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn body_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_full_response() {
        let data = body_of(1000);
        let (_temp, store, id) = setup(&data).await;
        let handler = DeliveryHandler::new(store, Duration::from_secs(60));

        let response = handler.serve(id.as_str(), &HeaderMap::new(), false).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{id}.mp3\"").as_str()
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &data[..]);
    }

    #[tokio::test]
    async fn test_partial_response() {
        let data = body_of(1000);
        let (_temp, store, id) = setup(&data).await;
        let handler = DeliveryHandler::new(store, Duration::from_secs(60));

        let response = handler.serve(id.as_str(), &range("bytes=0-99"), false).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/1000");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &data[..100]);

        let response = handler.serve(id.as_str(), &range("bytes=900-"), false).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 900-999/1000");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &data[900..]);
    }

    #[tokio::test]
    async fn test_malformed_range_serves_full_file() {
        let (_temp, store, id) = setup(&body_of(1000)).await;
        let handler = DeliveryHandler::new(store, Duration::from_secs(60));

        let response = handler.serve(id.as_str(), &range("bytes=abc"), false).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 1000);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let (_temp, store, id) = setup(&body_of(10)).await;
        let handler = DeliveryHandler::new(store, Duration::from_secs(60));

        let response = handler.serve(id.as_str(), &range("bytes=50-"), false).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_not_found() {
        let (_temp, store, _id) = setup(b"x").await;
        let handler = DeliveryHandler::new(store, Duration::from_secs(60));

        let unknown = ArtifactId::generate();
        let err = handler.serve(unknown.as_str(), &HeaderMap::new(), false).await.unwrap_err();
        assert!(err.is_not_found());

        let err = handler.serve("../etc/passwd", &HeaderMap::new(), false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_artifact_deleted_after_delivery() {
        let (_temp, store, id) = setup(&body_of(10)).await;
        let handler = DeliveryHandler::new(store.clone(), Duration::from_millis(50));

        let response = handler.serve(id.as_str(), &HeaderMap::new(), true).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 10);
        assert!(store.resolve(&id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.resolve(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_abandoned_body_still_schedules_deletion() {
        let (_temp, store, id) = setup(&body_of(256 * 1024)).await;
        let handler = DeliveryHandler::new(store.clone(), Duration::from_millis(50));

        let response = handler.serve(id.as_str(), &HeaderMap::new(), true).await.unwrap();
        let mut stream = response.into_body().into_data_stream();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        // Client goes away part-way through the body.
        drop(stream);
        assert!(store.resolve(&id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.resolve(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_kept_when_not_deleting() {
        let (_temp, store, id) = setup(&body_of(10)).await;
        let handler = DeliveryHandler::new(store.clone(), Duration::from_millis(10));

        let response = handler.serve(id.as_str(), &HeaderMap::new(), false).await.unwrap();
        let _ = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.resolve(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_multiple_ranges_serve_full_file() {
        let (_temp, store, id) = setup(&body_of(100)).await;
        let handler = DeliveryHandler::new(store, Duration::from_secs(60));

        let response = handler
            .serve(id.as_str(), &range("bytes=0-9,20-29"), false)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 100);
    }
}
