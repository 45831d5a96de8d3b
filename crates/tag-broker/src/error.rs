//! Error types for the tag broker

use thiserror::Error;

use crate::domain::{ConsumerId, Tag, ValueError};

/// Errors reported by broker operations.
///
/// Every variant is local to one tag; none of them affect other
/// subscriptions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("failed to open provider subscription for {tag} (consumer {consumer}): {reason}")]
    ProviderOpen {
        tag: Tag,
        consumer: ConsumerId,
        reason: String,
    },

    #[error("failed to close provider subscription for {tag}: {reason}")]
    ProviderClose { tag: Tag, reason: String },

    #[error("provider write to {tag} failed: {reason}")]
    ProviderWrite { tag: Tag, reason: String },

    #[error("broker is shut down")]
    ShutDown,
}

/// Non-fatal conditions reported alongside a successful call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerWarning {
    #[error("write to {tag} dropped: tag has no active subscription")]
    WriteToUnsubscribedTag { tag: Tag },
}

/// Result of [`crate::ports::TagBrokerApi::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Handed to the provider.
    Forwarded,
    /// Not sent anywhere.
    Dropped(BrokerWarning),
}

impl WriteOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, WriteOutcome::Forwarded)
    }
}

/// Errors raised by provider adapters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown provider handle")]
    UnknownHandle,

    #[error("value error: {0}")]
    Value(#[from] ValueError),
}

/// Errors decoding consumer messages.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown consumer {0}")]
    UnknownConsumer(ConsumerId),
}
