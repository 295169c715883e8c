//! media-relay library crate.
//!
//! Acquires media artifacts from a source URL through an ordered list of
//! strategies, keeps them in a filesystem-backed store with a TTL, and serves
//! them back over HTTP with byte-range support.

pub mod acquisition;
pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
