//! Service Layer
//!
//! The subscription registry: one provider subscription per tag, shared by
//! every consumer interested in it.

pub mod registry;

pub use registry::SubscriptionRegistry;
