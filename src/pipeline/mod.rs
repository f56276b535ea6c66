//! Inbound email ingestion pipeline.

pub mod processor;
pub mod types;

pub use processor::handle_inbound;
pub use types::{Delivery, InboundEmail};
