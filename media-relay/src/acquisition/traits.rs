//! Acquisition strategy trait and the context passed to each attempt.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{AcquisitionRequest, MediaFormat, MediaInfo};
use crate::Result;
use crate::store::StagingTarget;

/// Everything a strategy needs for one attempt.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Fires when the attempt times out or the caller goes away.
    pub cancel: CancellationToken,
    /// Where the output file must be written.
    pub target: StagingTarget,
    /// Time budget for this attempt.
    pub timeout: Duration,
}

/// What a successful attempt produced.
#[derive(Debug, Clone)]
pub struct StrategyOutput {
    /// The written file, normally `target.path`.
    pub path: PathBuf,
    pub info: Option<MediaInfo>,
}

impl StrategyOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            info: None,
        }
    }

    pub fn with_info(mut self, info: MediaInfo) -> Self {
        self.info = Some(info);
        self
    }
}

/// One mechanism for turning a source URL into a local file.
///
/// An attempt either writes exactly one file (at the context's target) and
/// returns it, or returns an error and leaves nothing behind. Attempts must
/// stop promptly once `ctx.cancel` fires.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Stable name used in logs, outcomes and the `method` response field.
    fn name(&self) -> &str;

    /// Whether this strategy can produce `format` at all.
    fn supports(&self, _format: MediaFormat) -> bool {
        true
    }

    /// Whether the strategy's dependencies (binaries, endpoints) are present.
    async fn is_available(&self) -> bool {
        true
    }

    /// Try to acquire the requested artifact.
    async fn attempt(
        &self,
        ctx: &StrategyContext,
        request: &AcquisitionRequest,
    ) -> Result<StrategyOutput>;
}
