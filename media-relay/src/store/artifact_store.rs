//! Filesystem-backed artifact store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::id::ArtifactId;
use crate::acquisition::MediaFormat;
use crate::utils::fs::{ensure_dir_all_with_op, io_error, remove_file_if_exists};
use crate::{Error, Result};

/// Name of the subdirectory strategies write into before commit.
pub const STAGING_DIR_NAME: &str = ".staging";

/// A live artifact as seen on disk.
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub id: ArtifactId,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// File modification time.
    pub created_at: DateTime<Utc>,
    /// Derived from the file extension, `None` for unknown extensions.
    pub format: Option<MediaFormat>,
}

impl ArtifactEntry {
    /// File name as it should be presented to clients.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Where a strategy must write its output for a given artifact.
#[derive(Debug, Clone)]
pub struct StagingTarget {
    pub id: ArtifactId,
    pub format: MediaFormat,
    /// The staging directory.
    pub dir: PathBuf,
    /// `<staging>/<id>.<ext>`.
    pub path: PathBuf,
}

/// Directory-backed map from [`ArtifactId`] to file.
///
/// Every operation goes to the filesystem; the store holds no mutable state
/// and is safe to share between tasks and processes.
pub struct ArtifactStore {
    dir: PathBuf,
    staging_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ArtifactStore {
    /// Open a store rooted at `dir`, creating it and its staging area.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let staging_dir = dir.join(STAGING_DIR_NAME);
        ensure_dir_all_with_op("creating artifact directory", &staging_dir).await?;
        info!(dir = %dir.display(), "Artifact store opened");

        Ok(Self {
            dir,
            staging_dir,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used for age computations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Staging location for an artifact of `format`.
    pub fn staging_target(&self, id: &ArtifactId, format: MediaFormat) -> StagingTarget {
        StagingTarget {
            id: id.clone(),
            format,
            dir: self.staging_dir.clone(),
            path: self
                .staging_dir
                .join(format!("{}.{}", id, format.extension())),
        }
    }

    /// Register the file at `path` under `id`.
    ///
    /// A file outside the store directory (normally one in the staging area)
    /// is renamed into place as `<dir>/<id>.<ext>`, so readers never observe a
    /// partially written artifact.
    pub async fn put(&self, id: &ArtifactId, path: &Path) -> Result<ArtifactEntry> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(Error::not_found(id.as_str())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(id.as_str()));
            }
            Err(e) => return Err(io_error("inspecting artifact", path, e)),
        }

        let final_path = match path.extension() {
            Some(ext) => self
                .dir
                .join(format!("{}.{}", id, ext.to_string_lossy())),
            None => self.dir.join(id.as_str()),
        };

        if final_path != path {
            match self.resolve(id).await {
                Ok(existing) => {
                    return Err(Error::Other(format!(
                        "artifact {} is already registered at {}",
                        id,
                        existing.path.display()
                    )));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            self.move_into_place(id, path, &final_path).await?;
        }

        let entry = self.resolve(id).await?;
        debug!(artifact_id = %id, path = %entry.path.display(), size = entry.size_bytes, "Artifact registered");
        Ok(entry)
    }

    async fn move_into_place(&self, id: &ArtifactId, from: &Path, to: &Path) -> Result<()> {
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(id.as_str()))
            }
            Err(rename_err) => {
                // Different filesystem: copy next to the destination, then rename.
                debug!(artifact_id = %id, error = %rename_err, "Rename failed, copying instead");
                let tmp = self.staging_dir.join(format!("{id}.import"));
                tokio::fs::copy(from, &tmp)
                    .await
                    .map_err(|e| io_error("copying artifact", from, e))?;
                if let Err(e) = tokio::fs::rename(&tmp, to).await {
                    let _ = remove_file_if_exists(&tmp).await;
                    return Err(io_error("moving artifact into place", to, e));
                }
                remove_file_if_exists(from).await?;
                Ok(())
            }
        }
    }

    /// Find the single file whose name starts with `id`.
    pub async fn resolve(&self, id: &ArtifactId) -> Result<ArtifactEntry> {
        let mut matches = self.matching_files(&self.dir, id).await?;
        match matches.len() {
            0 => Err(Error::not_found(id.as_str())),
            1 => {
                let path = matches.remove(0);
                let meta = tokio::fs::metadata(&path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::not_found(id.as_str())
                    } else {
                        io_error("inspecting artifact", &path, e)
                    }
                })?;
                let created_at = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let format = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(MediaFormat::from_extension);
                Ok(ArtifactEntry {
                    id: id.clone(),
                    path,
                    size_bytes: meta.len(),
                    created_at,
                    format,
                })
            }
            count => {
                warn!(artifact_id = %id, count, "Multiple files share an artifact prefix");
                Err(Error::Ambiguous {
                    id: id.to_string(),
                    count,
                })
            }
        }
    }

    /// Remove every file belonging to `id`, staged or live.
    ///
    /// Missing files are not an error. Returns the number of files removed.
    pub async fn delete(&self, id: &ArtifactId) -> Result<usize> {
        let mut removed = 0;
        for dir in [&self.dir, &self.staging_dir] {
            for path in self.matching_files(dir, id).await? {
                if remove_file_if_exists(&path).await? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(artifact_id = %id, removed, "Artifact deleted");
        }
        Ok(removed)
    }

    /// Remove staged files for `id` only.
    pub async fn discard_staged(&self, id: &ArtifactId) -> Result<usize> {
        let mut removed = 0;
        for path in self.matching_files(&self.staging_dir, id).await? {
            if remove_file_if_exists(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every file older than `max_age`, live or staged.
    ///
    /// Failures on individual files are logged and skipped. Returns the number
    /// of files removed.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for dir in [&self.dir, &self.staging_dir] {
            removed += self.sweep_dir(dir, now, max_age).await?;
        }
        Ok(removed)
    }

    async fn sweep_dir(&self, dir: &Path, now: SystemTime, max_age: Duration) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir != self.dir => {
                return Ok(0);
            }
            Err(e) => return Err(io_error("listing artifacts", dir, e)),
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }

            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat artifact during sweep");
                    continue;
                }
            };
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Artifact has no modification time");
                    continue;
                }
            };

            // Clock skew can put mtime in the future; such files count as new.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match remove_file_if_exists(&path).await {
                Ok(true) => {
                    removed += 1;
                    debug!(path = %path.display(), age_secs = age.as_secs(), "Evicted expired artifact");
                }
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict artifact"),
            }
        }
        Ok(removed)
    }

    async fn matching_files(&self, dir: &Path, id: &ArtifactId) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir != self.dir => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error("listing artifacts", dir, e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing artifacts", dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(id.as_str()) {
                continue;
            }
            // Entries may vanish between listing and stat under concurrent deletes.
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => matches.push(entry.path()),
                _ => {}
            }
        }
        Ok(matches)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use tempfile::TempDir;

    async fn open_store(temp: &TempDir) -> ArtifactStore {
        ArtifactStore::open(temp.path().join("artifacts")).await.unwrap()
    }

    async fn stage(store: &ArtifactStore, id: &ArtifactId, body: &[u8]) -> PathBuf {
        let target = store.staging_target(id, MediaFormat::Audio);
        tokio::fs::write(&target.path, body).await.unwrap();
        target.path
    }

    #[tokio::test]
    async fn test_put_then_resolve_returns_same_path() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        let staged = stage(&store, &id, b"hello").await;

        let entry = store.put(&id, &staged).await.unwrap();
        assert_eq!(entry.path, store.dir().join(format!("{id}.mp3")));
        assert_eq!(entry.size_bytes, 5);
        assert_eq!(entry.format, Some(MediaFormat::Audio));
        assert!(!staged.exists());

        let resolved = store.resolve(&id).await.unwrap();
        assert_eq!(resolved.path, entry.path);
        let again = store.resolve(&id).await.unwrap();
        assert_eq!(again.path, entry.path);
    }

    #[tokio::test]
    async fn test_put_missing_path_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        let err = store
            .put(&id, &temp.path().join("nope.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_put_file_already_in_place() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        let path = store.dir().join(format!("{id}.mp4"));
        tokio::fs::write(&path, b"video").await.unwrap();

        let entry = store.put(&id, &path).await.unwrap();
        assert_eq!(entry.path, path);
        assert_eq!(entry.format, Some(MediaFormat::Video));
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let err = store.resolve(&ArtifactId::generate()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_ignores_staged_files() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        stage(&store, &id, b"partial").await;

        assert!(store.resolve(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_detects_ambiguity() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        tokio::fs::write(store.dir().join(format!("{id}.mp3")), b"a")
            .await
            .unwrap();
        tokio::fs::write(store.dir().join(format!("{id}.mp4")), b"b")
            .await
            .unwrap();

        let err = store.resolve(&id).await.unwrap_err();
        assert!(matches!(err, Error::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_put_refuses_second_file_for_same_id() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        let first = stage(&store, &id, b"one").await;
        store.put(&id, &first).await.unwrap();

        let second = stage(&store, &id, b"two").await;
        assert!(store.put(&id, &second).await.is_err());
        assert_eq!(store.resolve(&id).await.unwrap().size_bytes, 3);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let id = ArtifactId::generate();
        let staged = stage(&store, &id, b"bytes").await;
        store.put(&id, &staged).await.unwrap();

        assert_eq!(store.delete(&id).await.unwrap(), 1);
        assert_eq!(store.delete(&id).await.unwrap(), 0);
        assert!(store.resolve(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sweep_respects_max_age() {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(SystemTime::now()));
        let store = open_store(&temp).await.with_clock(clock.clone());
        let id = ArtifactId::generate();
        let staged = stage(&store, &id, b"bytes").await;
        let entry = store.put(&id, &staged).await.unwrap();
        let mtime = tokio::fs::metadata(&entry.path)
            .await
            .unwrap()
            .modified()
            .unwrap();
        let max_age = Duration::from_secs(3600);

        clock.set(mtime + max_age - Duration::from_secs(1));
        assert_eq!(store.sweep(max_age).await.unwrap(), 0);
        assert!(store.resolve(&id).await.is_ok());

        clock.set(mtime + max_age);
        assert_eq!(store.sweep(max_age).await.unwrap(), 0);

        clock.set(mtime + max_age + Duration::from_secs(1));
        assert_eq!(store.sweep(max_age).await.unwrap(), 1);
        assert!(store.resolve(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sweep_evicts_stale_staging_files() {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(SystemTime::now()));
        let store = open_store(&temp).await.with_clock(clock.clone());
        let id = ArtifactId::generate();
        let staged = stage(&store, &id, b"partial").await;

        clock.advance(Duration::from_secs(7200));
        assert_eq!(store.sweep(Duration::from_secs(3600)).await.unwrap(), 1);
        assert!(!staged.exists());
        assert!(store.staging_dir().is_dir());
    }

    #[tokio::test]
    async fn test_sweep_keeps_files_with_future_mtime() {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
        let store = open_store(&temp).await.with_clock(clock);
        let id = ArtifactId::generate();
        let staged = stage(&store, &id, b"bytes").await;
        store.put(&id, &staged).await.unwrap();

        assert_eq!(store.sweep(Duration::from_secs(1)).await.unwrap(), 0);
    }
}
