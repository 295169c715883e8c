//! Ephemeral, directory-backed artifact store.
//!
//! The directory itself is the index: an artifact is a file whose name starts
//! with its [`ArtifactId`], and its age is the file's modification time. No
//! in-memory registry is kept, so a restart loses nothing but in-flight work
//! and the sweeper picks up where it left off.

mod artifact_store;
mod clock;
mod id;
mod sweeper;

pub use artifact_store::{ArtifactEntry, ArtifactStore, STAGING_DIR_NAME, StagingTarget};
pub use clock::{Clock, ManualClock, SystemClock};
pub use id::ArtifactId;
pub use sweeper::ArtifactSweeper;
