//! Per-consumer fan-out of tag updates.
//!
//! The registry knows which tags are wanted; this dispatcher knows which
//! consumer wants what. Each consumer gets a bounded queue. When a queue is
//! full the update is dropped for that consumer only: a later update for the
//! same tag supersedes it anyway.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use super::messages::ServerMessage;
use crate::domain::{ConsumerId, Tag, TagSample};
use crate::ports::UpdateDispatcher;

#[derive(Default)]
struct FanoutState {
    queues: HashMap<ConsumerId, mpsc::Sender<ServerMessage>>,
    interest: HashMap<Tag, HashSet<ConsumerId>>,
}

/// [`UpdateDispatcher`] that routes each update to interested consumers.
pub struct FanoutDispatcher {
    state: Mutex<FanoutState>,
    queue_capacity: usize,
}

impl FanoutDispatcher {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(FanoutState::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Open a queue for `consumer`, replacing any previous one.
    pub fn register(&self, consumer: ConsumerId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.state.lock().queues.insert(consumer, tx);
        rx
    }

    /// Drop `consumer`'s queue and every interest it held.
    pub fn deregister(&self, consumer: &ConsumerId) {
        let mut state = self.state.lock();
        state.queues.remove(consumer);
        state.interest.retain(|_, consumers| {
            consumers.remove(consumer);
            !consumers.is_empty()
        });
    }

    pub fn is_registered(&self, consumer: &ConsumerId) -> bool {
        self.state.lock().queues.contains_key(consumer)
    }

    /// Record that `consumer` wants `tag`. Returns `false`, recording
    /// nothing, if the consumer has no queue (never registered or already
    /// deregistered).
    pub fn add_interest(&self, consumer: &ConsumerId, tag: &Tag) -> bool {
        let mut state = self.state.lock();
        if !state.queues.contains_key(consumer) {
            return false;
        }
        state
            .interest
            .entry(tag.clone())
            .or_default()
            .insert(consumer.clone());
        true
    }

    /// Number of tags anyone is interested in.
    pub fn interest_count(&self) -> usize {
        self.state.lock().interest.len()
    }

    pub fn remove_interest(&self, consumer: &ConsumerId, tag: &Tag) {
        let mut state = self.state.lock();
        if let Some(consumers) = state.interest.get_mut(tag) {
            consumers.remove(consumer);
            if consumers.is_empty() {
                state.interest.remove(tag);
            }
        }
    }

    /// Consumers interested in `tag`, sorted.
    pub fn interested_in(&self, tag: &Tag) -> Vec<ConsumerId> {
        let mut consumers: Vec<ConsumerId> = self
            .state
            .lock()
            .interest
            .get(tag)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        consumers.sort();
        consumers
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().queues.len()
    }
}

impl UpdateDispatcher for FanoutDispatcher {
    fn deliver(&self, tag: &Tag, sample: &TagSample) {
        let state = self.state.lock();
        let Some(consumers) = state.interest.get(tag) else {
            trace!(tag = %tag, "No interested consumers");
            return;
        };

        for consumer in consumers {
            let Some(queue) = state.queues.get(consumer) else {
                continue;
            };
            let message = ServerMessage::update(tag.clone(), sample.clone());
            match queue.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(tag = %tag, consumer = %consumer, "Consumer queue full; update dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(consumer = %consumer, "Consumer queue closed");
                }
            }
        }
    }
}
