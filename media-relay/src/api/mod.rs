//! HTTP surface.

pub mod error;
pub mod gate;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use gate::RequestGate;
pub use server::{ApiServer, AppState, build_router};
