//! Concrete acquisition strategies.

mod converter_api;
mod direct_http;
mod http_sink;
mod placeholder;
mod ytdlp;

pub use converter_api::{CONVERTER_API_NAME, ConverterApiStrategy};
pub use direct_http::{DIRECT_HTTP_NAME, DirectHttpStrategy};
pub use http_sink::download_to_file;
pub use placeholder::{PLACEHOLDER_NAME, PlaceholderStrategy};
pub use ytdlp::{YTDLP_NAME, YtDlpStrategy};

use std::path::Path;

use tracing::warn;

use crate::store::StagingTarget;
use crate::utils::fs::remove_file_if_exists;

/// Remove every staged file whose name starts with the target's id, except
/// `keep`.
///
/// Tools like yt-dlp leave intermediate files (`.part`, `.webm`, ...) next to
/// the target path.
pub(crate) async fn cleanup_staged(target: &StagingTarget, keep: Option<&Path>) {
    let Ok(mut entries) = tokio::fs::read_dir(&target.dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(target.id.as_str()) {
            continue;
        }
        let path = entry.path();
        if keep.is_some_and(|k| k == path) {
            continue;
        }
        if let Err(e) = remove_file_if_exists(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}
