//! The broker's record binding a tag to its consumers and provider handle.
//!
//! ## Invariants
//!
//! - A `Subscription` exists only while its consumer set is non-empty; the
//!   registry destroys it (and closes the handle) on the transition to empty.
//! - `epoch` identifies one provider subscription. Reopening a tag after a
//!   teardown yields a new epoch, so callbacks from the old one can be told
//!   apart.

use std::collections::HashSet;
use std::sync::Arc;

use super::ConsumerId;

/// Generation number of a provider subscription.
pub type Epoch = u64;

/// A live provider subscription and the consumers interested in it.
#[derive(Debug)]
pub struct Subscription<H> {
    epoch: Epoch,
    consumers: HashSet<ConsumerId>,
    handle: Arc<H>,
}

impl<H> Subscription<H> {
    /// Promote an open provider handle into a subscription.
    pub fn new(epoch: Epoch, consumers: HashSet<ConsumerId>, handle: H) -> Self {
        Self {
            epoch,
            consumers,
            handle: Arc::new(handle),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns `true` if the consumer was not already present.
    pub fn add_consumer(&mut self, consumer: ConsumerId) -> bool {
        self.consumers.insert(consumer)
    }

    /// Returns `true` if the consumer was present.
    pub fn remove_consumer(&mut self, consumer: &ConsumerId) -> bool {
        self.consumers.remove(consumer)
    }

    pub fn has_consumer(&self, consumer: &ConsumerId) -> bool {
        self.consumers.contains(consumer)
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &ConsumerId> {
        self.consumers.iter()
    }

    /// Shared handle for provider calls made outside the registry lock.
    pub fn handle(&self) -> Arc<H> {
        Arc::clone(&self.handle)
    }

    pub fn into_handle(self) -> Arc<H> {
        self.handle
    }
}
