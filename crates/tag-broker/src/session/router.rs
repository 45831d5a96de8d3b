//! Routes decoded consumer messages to the broker.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::fanout::FanoutDispatcher;
use super::messages::{ClientMessage, ServerMessage};
use crate::domain::{ConsumerId, Tag, TagValue};
use crate::error::{BrokerError, SessionError, WriteOutcome};
use crate::ports::TagBrokerApi;

/// A connected consumer: its identity and its update queue.
#[derive(Debug)]
pub struct ConsumerSession {
    pub id: ConsumerId,
    pub updates: mpsc::Receiver<ServerMessage>,
}

/// Glue between a transport and the broker.
///
/// The fan-out dispatcher must be the (or one of the) dispatchers the
/// broker was built with, otherwise consumers never see updates.
pub struct SessionRouter<B> {
    broker: Arc<B>,
    fanout: Arc<FanoutDispatcher>,
}

impl<B: TagBrokerApi> SessionRouter<B> {
    pub fn new(broker: Arc<B>, fanout: Arc<FanoutDispatcher>) -> Self {
        Self { broker, fanout }
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn fanout(&self) -> &Arc<FanoutDispatcher> {
        &self.fanout
    }

    /// Connect a consumer with a fresh random id.
    pub fn connect(&self) -> ConsumerSession {
        self.connect_as(ConsumerId::generate())
    }

    pub fn connect_as(&self, id: ConsumerId) -> ConsumerSession {
        let updates = self.fanout.register(id.clone());
        info!(consumer = %id, "Consumer connected");
        ConsumerSession { id, updates }
    }

    /// Apply one message; returns the replies for the sender.
    ///
    /// Interest is recorded with the fan-out before the broker is asked to
    /// subscribe, so a replayed cached value reaches the new consumer. A
    /// subscribe that completes after the consumer disconnected is rolled
    /// back and reported as [`SessionError::UnknownConsumer`].
    pub async fn handle(
        &self,
        id: &ConsumerId,
        message: ClientMessage,
    ) -> Result<Vec<ServerMessage>, SessionError> {
        if !self.fanout.is_registered(id) {
            return Err(SessionError::UnknownConsumer(id.clone()));
        }

        let mut replies = Vec::new();
        match message {
            ClientMessage::Subscribe { tags } => {
                for tag in tags {
                    if !self.fanout.add_interest(id, &tag) {
                        return Err(SessionError::UnknownConsumer(id.clone()));
                    }
                    if let Err(e) = self.broker.subscribe(id.clone(), tag.clone()).await {
                        self.fanout.remove_interest(id, &tag);
                        replies.push(ServerMessage::error(&e));
                        continue;
                    }
                    if !self.fanout.is_registered(id) {
                        debug!(consumer = %id, tag = %tag, "Consumer left during subscribe; rolling back");
                        // Errors here were logged by the broker; the consumer is gone.
                        let _ = self.broker.unsubscribe(id, &tag).await;
                        return Err(SessionError::UnknownConsumer(id.clone()));
                    }
                }
            }
            ClientMessage::Unsubscribe { tags } => {
                for tag in tags {
                    self.fanout.remove_interest(id, &tag);
                    if let Err(e) = self.broker.unsubscribe(id, &tag).await {
                        replies.push(ServerMessage::error(&e));
                    }
                }
            }
            ClientMessage::Write { tag, value } => {
                replies.extend(self.write(&tag, value).await);
            }
        }
        Ok(replies)
    }

    async fn write(&self, tag: &Tag, value: TagValue) -> Option<ServerMessage> {
        match self.broker.write(tag, value).await {
            Ok(WriteOutcome::Forwarded) => None,
            Ok(WriteOutcome::Dropped(warning)) => Some(ServerMessage::warning(&warning)),
            Err(e) => Some(ServerMessage::error(&e)),
        }
    }

    /// Decode and apply a JSON message. Decoding problems become error replies.
    pub async fn handle_text(&self, id: &ConsumerId, text: &str) -> Vec<ServerMessage> {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(consumer = %id, error = %e, "Rejected consumer message");
                return vec![ServerMessage::rejected(&e)];
            }
        };
        match self.handle(id, message).await {
            Ok(replies) => replies,
            Err(e) => vec![ServerMessage::rejected(&e)],
        }
    }

    /// Drop the consumer's queue and release all of its tags.
    pub async fn disconnect(&self, id: &ConsumerId) -> Result<(), BrokerError> {
        self.fanout.deregister(id);
        info!(consumer = %id, "Consumer disconnected");
        self.broker.unsubscribe_all(id).await
    }
}
