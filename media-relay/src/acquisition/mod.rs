//! Turning a source URL into a stored artifact.

mod orchestrator;
mod single_flight;
pub mod strategy;
mod traits;
mod types;

pub use orchestrator::{Orchestrator, OrchestratorBuilder, StrategySlot};
pub use single_flight::SingleFlight;
pub use traits::{AcquisitionStrategy, StrategyContext, StrategyOutput};
pub use types::{
    AUDIO_BITRATES, AcquisitionRequest, AcquisitionResult, MediaFormat, MediaInfo, Quality,
    StrategyOutcome, VIDEO_HEIGHTS,
};
