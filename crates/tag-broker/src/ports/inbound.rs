//! Inbound Ports (Driving Ports)
//!
//! The API the consumer-facing layer calls into.

use async_trait::async_trait;

use crate::domain::{ConsumerId, Tag, TagValue};
use crate::error::{BrokerError, WriteOutcome};

/// Primary broker API (Driving Port)
#[async_trait]
pub trait TagBrokerApi: Send + Sync {
    /// Register `consumer`'s interest in `tag`.
    ///
    /// The first consumer of a tag opens the provider subscription; later
    /// consumers join it and immediately receive the cached value, if any.
    /// Re-subscribing is a no-op success.
    async fn subscribe(&self, consumer: ConsumerId, tag: Tag) -> Result<(), BrokerError>;

    /// Remove `consumer`'s interest in `tag`; closes the provider
    /// subscription when the last consumer leaves. Unknown pairs are a no-op.
    async fn unsubscribe(&self, consumer: &ConsumerId, tag: &Tag) -> Result<(), BrokerError>;

    /// Remove `consumer` from every tag. Used when a consumer disconnects.
    async fn unsubscribe_all(&self, consumer: &ConsumerId) -> Result<(), BrokerError>;

    /// Forward a write to the tag's provider subscription, if one is active.
    async fn write(&self, tag: &Tag, value: TagValue) -> Result<WriteOutcome, BrokerError>;

    /// Close every provider subscription and clear all state. Idempotent.
    async fn shutdown(&self) -> Result<(), BrokerError>;
}
