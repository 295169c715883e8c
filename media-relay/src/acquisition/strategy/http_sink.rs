//! Streaming an HTTP response body to disk.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::utils::fs::{io_error, remove_file_if_exists};
use crate::{Error, Result};

/// Write `response`'s body to `path`, returning the number of bytes written.
///
/// Aborts when `cancel` fires or the body grows beyond `max_bytes`. On any
/// failure the partial file is removed.
pub async fn download_to_file(
    strategy: &str,
    response: reqwest::Response,
    path: &Path,
    cancel: &CancellationToken,
    max_bytes: u64,
) -> Result<u64> {
    if let Some(length) = response.content_length()
        && length > max_bytes
    {
        return Err(Error::strategy(
            strategy,
            format!("artifact is {length} bytes, limit is {max_bytes}"),
        ));
    }

    let result = write_body(strategy, response, path, cancel, max_bytes).await;
    if result.is_err() {
        let _ = remove_file_if_exists(path).await;
    }
    result
}

async fn write_body(
    strategy: &str,
    response: reqwest::Response,
    path: &Path,
    cancel: &CancellationToken,
    max_bytes: u64,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| io_error("creating", path, e))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::strategy(strategy, "cancelled"));
            }
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk?;

        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(Error::strategy(
                strategy,
                format!("artifact exceeds the {max_bytes} byte limit"),
            ));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| io_error("writing", path, e))?;
    }

    file.flush().await.map_err(|e| io_error("flushing", path, e))?;
    Ok(written)
}
