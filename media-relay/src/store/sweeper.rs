//! Periodic eviction of expired artifacts.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ArtifactStore;

/// Background task that sweeps the store on a fixed interval.
pub struct ArtifactSweeper;

impl ArtifactSweeper {
    /// Start sweeping `store` every `interval`, evicting entries older than
    /// `max_age`. The first sweep runs immediately. The task exits when
    /// `cancel` fires.
    pub fn spawn(
        store: Arc<ArtifactStore>,
        interval: Duration,
        max_age: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = interval.as_secs(),
                max_age_secs = max_age.as_secs(),
                "Artifact sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Artifact sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match store.sweep(max_age).await {
                            Ok(0) => debug!("Sweep found nothing to evict"),
                            Ok(count) => info!(count, "Evicted expired artifacts"),
                            Err(e) => warn!(error = %e, "Artifact sweep failed"),
                        }
                    }
                }
            }
        })
    }
}
