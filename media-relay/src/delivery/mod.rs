//! Range-aware artifact delivery.

mod cleanup;
mod handler;
mod range;

pub use cleanup::DeleteAfterDelivery;
pub use handler::DeliveryHandler;
pub use range::ByteRange;
