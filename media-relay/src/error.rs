//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::acquisition::StrategyOutcome;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    /// One acquisition mechanism failed. Recoverable by trying the next one.
    #[error("Strategy {strategy} failed: {message}")]
    Strategy { strategy: String, message: String },

    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("All {} acquisition strategies failed", outcomes.len())]
    TotalAcquisitionFailure { outcomes: Vec<StrategyOutcome> },

    #[error("Artifact not found: {id}")]
    NotFound { id: String },

    #[error("Artifact {id} is ambiguous: {count} files share its prefix")]
    Ambiguous { id: String, count: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn strategy(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Strategy {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) | Self::IoPath { source: e, .. } => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
