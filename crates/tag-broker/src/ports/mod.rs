//! Ports Layer
//!
//! Defines the interfaces (traits) for:
//! - Driving Ports (inbound) - API for the consumer-facing layer
//! - Driven Ports (outbound) - provider adapters and update dispatchers

pub mod inbound;
pub mod outbound;

pub use inbound::TagBrokerApi;
pub use outbound::{ProviderAdapter, TagUpdate, UpdateCallback, UpdateDispatcher};
