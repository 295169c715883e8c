//! Deferred deletion of delivered artifacts.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::store::{ArtifactId, ArtifactStore};

/// Deletes an artifact a grace period after being dropped.
///
/// A response body owns one of these, so the countdown starts when the body
/// is finished or abandoned by the client, whichever comes first.
pub struct DeleteAfterDelivery {
    store: Arc<ArtifactStore>,
    id: ArtifactId,
    grace: Duration,
}

impl DeleteAfterDelivery {
    pub fn new(store: Arc<ArtifactStore>, id: ArtifactId, grace: Duration) -> Self {
        Self { store, id, grace }
    }
}

impl Drop for DeleteAfterDelivery {
    fn drop(&mut self) {
        let Ok(handle) = Handle::try_current() else {
            warn!(artifact_id = %self.id, "No runtime to schedule artifact deletion; leaving it to the sweeper");
            return;
        };

        let store = self.store.clone();
        let id = self.id.clone();
        let grace = self.grace;
        debug!(artifact_id = %id, grace_secs = grace.as_secs(), "Delivery ended, deletion scheduled");

        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            match store.delete(&id).await {
                Ok(0) => {}
                Ok(removed) => debug!(artifact_id = %id, removed, "Deleted delivered artifact"),
                Err(e) => warn!(artifact_id = %id, error = %e, "Failed to delete delivered artifact"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::MediaFormat;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_deletes_after_grace() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(temp.path()).await.unwrap());
        let id = ArtifactId::generate();
        let target = store.staging_target(&id, MediaFormat::Audio);
        tokio::fs::write(&target.path, b"data").await.unwrap();
        store.put(&id, &target.path).await.unwrap();

        drop(DeleteAfterDelivery::new(
            store.clone(),
            id.clone(),
            Duration::from_millis(50),
        ));
        assert!(store.resolve(&id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.resolve(&id).await.unwrap_err().is_not_found());
    }
}
