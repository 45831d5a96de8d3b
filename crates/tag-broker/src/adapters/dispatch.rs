//! Update Dispatchers
//!
//! Sinks for `(tag, sample)` pairs leaving the registry.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::domain::{Tag, TagSample, TagValue};
use crate::ports::{TagUpdate, UpdateDispatcher};

/// Publishes every update on a `tokio::sync::broadcast` channel.
///
/// Slow receivers lag and lose the oldest updates; the dispatcher itself
/// never blocks.
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<TagUpdate>,
    capacity: usize,
}

impl BroadcastDispatcher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TagUpdate> {
        self.sender.subscribe()
    }

    /// Updates as a stream; lagged gaps are skipped.
    pub fn stream(&self) -> impl Stream<Item = TagUpdate> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(update) => Some(update),
            Err(BroadcastStreamRecvError::Lagged(count)) => {
                debug!(lagged = count, "Update stream lagged, some updates dropped");
                None
            }
        })
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl UpdateDispatcher for BroadcastDispatcher {
    fn deliver(&self, tag: &Tag, sample: &TagSample) {
        // An error only means nobody is listening right now.
        if self
            .sender
            .send(TagUpdate::new(tag.clone(), sample.clone()))
            .is_err()
        {
            trace!(tag = %tag, "No broadcast receivers");
        }
    }
}

/// Records every delivery in order.
#[derive(Default)]
pub struct MemoryDispatcher {
    delivered: Mutex<Vec<TagUpdate>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<TagUpdate> {
        self.delivered.lock().clone()
    }

    /// Values delivered for `tag`, in order.
    pub fn values_for(&self, tag: &Tag) -> Vec<TagValue> {
        self.delivered
            .lock()
            .iter()
            .filter(|u| &u.tag == tag)
            .map(|u| u.value.clone())
            .collect()
    }

    /// Full samples delivered for `tag`, metadata included.
    pub fn samples_for(&self, tag: &Tag) -> Vec<TagSample> {
        self.delivered
            .lock()
            .iter()
            .filter(|u| &u.tag == tag)
            .map(TagUpdate::sample)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<TagUpdate> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

impl UpdateDispatcher for MemoryDispatcher {
    fn deliver(&self, tag: &Tag, sample: &TagSample) {
        self.delivered
            .lock()
            .push(TagUpdate::new(tag.clone(), sample.clone()));
    }
}

/// Delivers to several dispatchers, in registration order.
#[derive(Default)]
pub struct DispatcherSet {
    sinks: Vec<Arc<dyn UpdateDispatcher>>,
}

impl DispatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn UpdateDispatcher>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn UpdateDispatcher>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl UpdateDispatcher for DispatcherSet {
    fn deliver(&self, tag: &Tag, sample: &TagSample) {
        for sink in &self.sinks {
            sink.deliver(tag, sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_broadcast_reaches_every_receiver() {
        let dispatcher = BroadcastDispatcher::new(16);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.deliver(&Tag::new("T"), &TagValue::Int(3).into());

        let expected = TagUpdate::new(Tag::new("T"), TagValue::Int(3));
        assert_eq!(a.recv().await.unwrap(), expected);
        assert_eq!(b.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_broadcast_without_receivers_is_silent() {
        let dispatcher = BroadcastDispatcher::new(4);
        dispatcher.deliver(&Tag::new("T"), &TagValue::Int(1).into());
        assert_eq!(dispatcher.capacity(), 4);
    }

    #[tokio::test]
    async fn test_stream_yields_updates_and_skips_lag() {
        let dispatcher = BroadcastDispatcher::new(2);
        let mut stream = Box::pin(dispatcher.stream());

        for i in 0..5 {
            dispatcher.deliver(&Tag::new("T"), &TagValue::Int(i).into());
        }

        let first = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(first.value, TagValue::Int(3));
    }

    #[test]
    fn test_memory_dispatcher_records_in_order() {
        let dispatcher = MemoryDispatcher::new();
        dispatcher.deliver(&Tag::new("A"), &TagValue::Int(1).into());
        dispatcher.deliver(&Tag::new("B"), &TagValue::Int(2).into());
        dispatcher.deliver(&Tag::new("A"), &TagValue::Int(3).into());

        assert_eq!(
            dispatcher.values_for(&Tag::new("A")),
            vec![TagValue::Int(1), TagValue::Int(3)]
        );
        assert_eq!(dispatcher.take().len(), 3);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_dispatcher_set_fans_out() {
        let first = Arc::new(MemoryDispatcher::new());
        let second = Arc::new(MemoryDispatcher::new());
        let set = DispatcherSet::new().with(first.clone()).with(second.clone());

        set.deliver(&Tag::new("T"), &TagValue::from("on").into());

        assert_eq!(set.len(), 2);
        assert_eq!(first.len(), 1);
        assert_eq!(second.deliveries(), first.deliveries());
    }
}
