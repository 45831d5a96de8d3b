//! Subscription Registry
//!
//! Multiplexes many consumers onto one provider subscription per tag.
//!
//! ## Per-tag lifecycle
//!
//! ```text
//!            first subscribe                open ok, consumers left
//!   (absent) ───────────────► Opening ──────────────────────────► Active
//!      ▲                        │  │                                │
//!      │   open failed /        │  │ open ok, nobody left           │ last consumer
//!      │   cancelled / shutdown │  │ (handle closed at once)        │ leaves
//!      └────────────────────────┴──┴────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! One `parking_lot::Mutex` guards the tag map and the sample cache. Provider
//! calls (`open`, `close`, `write`) never run under it:
//!
//! - The first subscriber of a tag inserts an `Opening` claim, drops the lock,
//!   calls `open`, then re-takes the lock to promote or discard the claim.
//!   Everyone else who arrives meanwhile joins the claim and waits on its
//!   `watch` channel, so exactly one `open` is issued per tag.
//! - The 1 -> 0 consumer transition removes the entry under the lock; only
//!   the caller that removed it issues `close`.
//! - Provider callbacks and replays hand samples to the dispatcher while the
//!   lock is held, so per-tag delivery order matches provider order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::domain::{
    BrokerConfig, ConsumerId, Epoch, Subscription, Tag, TagSample, TagValue, ValueCache,
};
use crate::error::{BrokerError, BrokerWarning, ProviderError, WriteOutcome};
use crate::metrics::BrokerMetrics;
use crate::ports::{ProviderAdapter, TagBrokerApi, UpdateCallback, UpdateDispatcher};

/// Result of an in-flight provider open, as seen by waiting subscribers.
#[derive(Debug, Clone)]
enum OpenOutcome {
    Pending,
    Opened,
    Failed(String),
    ShutDown,
}

/// Claim on a tag whose provider `open` is in flight.
struct PendingOpen {
    epoch: Epoch,
    consumers: HashSet<ConsumerId>,
    outcome: watch::Sender<OpenOutcome>,
}

enum TagEntry<H> {
    Opening(PendingOpen),
    Active(Subscription<H>),
}

impl<H> TagEntry<H> {
    fn epoch(&self) -> Epoch {
        match self {
            TagEntry::Opening(pending) => pending.epoch,
            TagEntry::Active(sub) => sub.epoch(),
        }
    }

    fn has_consumer(&self, consumer: &ConsumerId) -> bool {
        match self {
            TagEntry::Opening(pending) => pending.consumers.contains(consumer),
            TagEntry::Active(sub) => sub.has_consumer(consumer),
        }
    }
}

struct RegistryState<H> {
    entries: HashMap<Tag, TagEntry<H>>,
    cache: ValueCache,
    next_epoch: Epoch,
    shut_down: bool,
}

impl<H> RegistryState<H> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            cache: ValueCache::new(),
            next_epoch: 1,
            shut_down: false,
        }
    }
}

/// State shared with provider callbacks.
struct Shared<H> {
    state: Mutex<RegistryState<H>>,
    dispatcher: Arc<dyn UpdateDispatcher>,
    metrics: BrokerMetrics,
}

impl<H> Shared<H> {
    /// Entry point for provider callbacks.
    fn on_provider_update(&self, tag: &Tag, epoch: Epoch, sample: TagSample) {
        let mut state = self.state.lock();
        let live = state.entries.get(tag).is_some_and(|e| e.epoch() == epoch);
        if !live {
            self.metrics.record_late_update();
            trace!(tag = %tag, epoch, "Ignoring update from closed subscription");
            return;
        }

        trace!(tag = %tag, epoch, value = %sample.value, "Provider update");
        self.dispatcher.deliver(tag, &sample);
        state.cache.record(tag, sample);
        self.metrics.record_update();
    }

    /// Re-send the cached sample of `tag`, if any. Runs on every subscribe
    /// to an existing tag, repeated ones included, so the caller always sees
    /// current state without waiting for the next provider update.
    fn replay(&self, cache: &ValueCache, tag: &Tag) {
        if let Some(sample) = cache.latest(tag) {
            self.dispatcher.deliver(tag, sample);
            self.metrics.record_replay();
        }
    }

    /// Drop a claim whose opener went away before resolving it.
    fn abandon_claim(&self, tag: &Tag, epoch: Epoch) {
        let mut state = self.state.lock();
        let ours = matches!(
            state.entries.get(tag),
            Some(TagEntry::Opening(pending)) if pending.epoch == epoch
        );
        if !ours {
            return;
        }
        if let Some(TagEntry::Opening(pending)) = state.entries.remove(tag) {
            state.cache.evict(tag);
            pending
                .outcome
                .send_replace(OpenOutcome::Failed("open abandoned".to_string()));
            warn!(tag = %tag, epoch, "Subscribe cancelled while opening; claim released");
        }
    }
}

/// Releases an `Opening` claim if the opening future is dropped mid-flight.
struct ClaimGuard<'a, H> {
    shared: &'a Shared<H>,
    tag: &'a Tag,
    epoch: Epoch,
    armed: bool,
}

impl<H> ClaimGuard<'_, H> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<H> Drop for ClaimGuard<'_, H> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandon_claim(self.tag, self.epoch);
        }
    }
}

enum Claim {
    Joined,
    Wait(watch::Receiver<OpenOutcome>),
    Open(Epoch),
}

/// How an `open` attempt was settled under the lock.
enum Settled<H> {
    Active,
    Unwanted(H),
    Orphaned(H),
    Failed(ProviderError),
    FailedAfterShutdown,
}

/// Subscription registry implementation.
///
/// Implements the [`TagBrokerApi`] port over any [`ProviderAdapter`].
///
/// ## Thread Safety
///
/// Cheap to share behind `Arc`; every method takes `&self`. Provider
/// callbacks hold only a weak reference, so dropping the registry stops
/// delivery even if the provider keeps calling.
pub struct SubscriptionRegistry<P: ProviderAdapter> {
    provider: Arc<P>,
    shared: Arc<Shared<P::Handle>>,
    config: BrokerConfig,
}

impl<P: ProviderAdapter> SubscriptionRegistry<P> {
    /// Create a registry with the default configuration.
    pub fn new(provider: Arc<P>, dispatcher: Arc<dyn UpdateDispatcher>) -> Self {
        Self::with_config(provider, dispatcher, BrokerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(
        provider: Arc<P>,
        dispatcher: Arc<dyn UpdateDispatcher>,
        config: BrokerConfig,
    ) -> Self {
        info!(
            provider = provider.name(),
            default_protocol = %config.default_protocol,
            "Subscription registry created"
        );
        Self {
            provider,
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::new()),
                dispatcher,
                metrics: BrokerMetrics::new(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.shared.metrics
    }

    /// Number of tags with a live provider subscription.
    pub fn active_tags(&self) -> usize {
        self.shared
            .state
            .lock()
            .entries
            .values()
            .filter(|e| matches!(e, TagEntry::Active(_)))
            .count()
    }

    /// Number of tags whose provider open is still in flight.
    pub fn pending_tags(&self) -> usize {
        self.shared
            .state
            .lock()
            .entries
            .values()
            .filter(|e| matches!(e, TagEntry::Opening(_)))
            .count()
    }

    pub fn is_active(&self, tag: &Tag) -> bool {
        matches!(self.shared.state.lock().entries.get(tag), Some(TagEntry::Active(_)))
    }

    /// Consumers interested in `tag`, sorted.
    pub fn consumers_of(&self, tag: &Tag) -> Vec<ConsumerId> {
        let state = self.shared.state.lock();
        let mut consumers: Vec<ConsumerId> = match state.entries.get(tag) {
            Some(TagEntry::Active(sub)) => sub.consumers().cloned().collect(),
            Some(TagEntry::Opening(pending)) => pending.consumers.iter().cloned().collect(),
            None => Vec::new(),
        };
        consumers.sort();
        consumers
    }

    /// Tags `consumer` is interested in, sorted.
    pub fn tags_of(&self, consumer: &ConsumerId) -> Vec<Tag> {
        let state = self.shared.state.lock();
        let mut tags: Vec<Tag> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.has_consumer(consumer))
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    pub fn cached_value(&self, tag: &Tag) -> Option<TagValue> {
        self.shared.state.lock().cache.latest(tag).map(|s| s.value.clone())
    }

    /// Cached value of `tag` with its metadata.
    pub fn cached_sample(&self, tag: &Tag) -> Option<TagSample> {
        self.shared.state.lock().cache.latest(tag).cloned()
    }

    /// Number of cached samples held.
    pub fn cached_tags(&self) -> usize {
        self.shared.state.lock().cache.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }

    fn update_callback(&self, tag: &Tag, epoch: Epoch) -> UpdateCallback {
        let shared: Weak<Shared<P::Handle>> = Arc::downgrade(&self.shared);
        let tag = tag.clone();
        UpdateCallback::new(move |sample| {
            if let Some(shared) = shared.upgrade() {
                shared.on_provider_update(&tag, epoch, sample);
            }
        })
    }

    async fn await_open(
        &self,
        mut outcome: watch::Receiver<OpenOutcome>,
        consumer: ConsumerId,
        tag: Tag,
    ) -> Result<(), BrokerError> {
        let settled = outcome
            .wait_for(|o| !matches!(o, OpenOutcome::Pending))
            .await
            .map(|o| o.clone())
            .unwrap_or_else(|_| OpenOutcome::Failed("open abandoned".to_string()));

        match settled {
            OpenOutcome::Pending | OpenOutcome::Opened => Ok(()),
            OpenOutcome::Failed(reason) => Err(BrokerError::ProviderOpen {
                tag,
                consumer,
                reason,
            }),
            OpenOutcome::ShutDown => Err(BrokerError::ShutDown),
        }
    }

    async fn open_tag(
        &self,
        consumer: ConsumerId,
        tag: Tag,
        epoch: Epoch,
    ) -> Result<(), BrokerError> {
        debug!(tag = %tag, consumer = %consumer, epoch, "Opening provider subscription");

        let claim = ClaimGuard {
            shared: &self.shared,
            tag: &tag,
            epoch,
            armed: true,
        };
        let callback = self.update_callback(&tag, epoch);
        let result = match tokio::time::timeout(
            self.config.open_timeout,
            self.provider.open(&tag, callback),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.config.open_timeout)),
        };
        claim.disarm();

        let settled = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let pending = match state.entries.remove(&tag) {
                Some(TagEntry::Opening(pending)) if pending.epoch == epoch => Some(pending),
                Some(other) => {
                    state.entries.insert(tag.clone(), other);
                    None
                }
                None => None,
            };

            match (pending, result) {
                (None, Ok(handle)) => Settled::Orphaned(handle),
                (None, Err(_)) => Settled::FailedAfterShutdown,
                (Some(pending), Ok(handle)) if pending.consumers.is_empty() => {
                    state.cache.evict(&tag);
                    pending.outcome.send_replace(OpenOutcome::Opened);
                    Settled::Unwanted(handle)
                }
                (Some(pending), Ok(handle)) => {
                    let PendingOpen {
                        epoch,
                        consumers,
                        outcome,
                    } = pending;
                    state.entries.insert(
                        tag.clone(),
                        TagEntry::Active(Subscription::new(epoch, consumers, handle)),
                    );
                    outcome.send_replace(OpenOutcome::Opened);
                    Settled::Active
                }
                (Some(pending), Err(e)) => {
                    state.cache.evict(&tag);
                    pending.outcome.send_replace(OpenOutcome::Failed(e.to_string()));
                    Settled::Failed(e)
                }
            }
        };

        match settled {
            Settled::Active => {
                self.shared.metrics.record_open();
                debug!(tag = %tag, epoch, "Provider subscription active");
                Ok(())
            }
            Settled::Unwanted(handle) => {
                self.shared.metrics.record_open();
                debug!(tag = %tag, epoch, "All consumers left during open; closing");
                // Failure is already logged and counted; the subscriber's request
                // itself was honoured.
                let _ = self.close_handle(&tag, &handle).await;
                Ok(())
            }
            Settled::Orphaned(handle) => {
                self.shared.metrics.record_open();
                debug!(tag = %tag, epoch, "Open finished after shutdown; closing");
                let _ = self.close_handle(&tag, &handle).await;
                Err(BrokerError::ShutDown)
            }
            Settled::Failed(e) => {
                self.shared.metrics.record_open_failure();
                warn!(tag = %tag, consumer = %consumer, error = %e, "Provider open failed");
                Err(BrokerError::ProviderOpen {
                    tag,
                    consumer,
                    reason: e.to_string(),
                })
            }
            Settled::FailedAfterShutdown => {
                self.shared.metrics.record_open_failure();
                Err(BrokerError::ShutDown)
            }
        }
    }

    async fn close_handle(&self, tag: &Tag, handle: &P::Handle) -> Result<(), BrokerError> {
        let result = match tokio::time::timeout(
            self.config.close_timeout,
            self.provider.close(handle),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.config.close_timeout)),
        };
        self.shared.metrics.record_close(result.is_ok());

        match result {
            Ok(()) => {
                debug!(tag = %tag, "Provider subscription closed");
                Ok(())
            }
            Err(e) => {
                warn!(tag = %tag, error = %e, "Provider close failed; bookkeeping removed anyway");
                Err(BrokerError::ProviderClose {
                    tag: tag.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn close_all(&self, teardowns: Vec<(Tag, Arc<P::Handle>)>) -> Result<(), BrokerError> {
        let mut first_error = None;
        for (tag, handle) in teardowns {
            if let Err(e) = self.close_handle(&tag, &handle).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<P: ProviderAdapter> TagBrokerApi for SubscriptionRegistry<P> {
    async fn subscribe(&self, consumer: ConsumerId, tag: Tag) -> Result<(), BrokerError> {
        let claim = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.shut_down {
                return Err(BrokerError::ShutDown);
            }

            match state.entries.get_mut(&tag) {
                Some(TagEntry::Active(sub)) => {
                    if sub.add_consumer(consumer.clone()) {
                        debug!(tag = %tag, consumer = %consumer, "Consumer joined active tag");
                    }
                    self.shared.replay(&state.cache, &tag);
                    Claim::Joined
                }
                Some(TagEntry::Opening(pending)) => {
                    pending.consumers.insert(consumer.clone());
                    self.shared.replay(&state.cache, &tag);
                    Claim::Wait(pending.outcome.subscribe())
                }
                None => {
                    let epoch = state.next_epoch;
                    state.next_epoch += 1;
                    let (outcome, _) = watch::channel(OpenOutcome::Pending);
                    state.entries.insert(
                        tag.clone(),
                        TagEntry::Opening(PendingOpen {
                            epoch,
                            consumers: HashSet::from([consumer.clone()]),
                            outcome,
                        }),
                    );
                    Claim::Open(epoch)
                }
            }
        };

        match claim {
            Claim::Joined => Ok(()),
            Claim::Wait(outcome) => self.await_open(outcome, consumer, tag).await,
            Claim::Open(epoch) => self.open_tag(consumer, tag, epoch).await,
        }
    }

    async fn unsubscribe(&self, consumer: &ConsumerId, tag: &Tag) -> Result<(), BrokerError> {
        let teardown = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let emptied = match state.entries.get_mut(tag) {
                Some(TagEntry::Active(sub)) => sub.remove_consumer(consumer) && sub.is_empty(),
                Some(TagEntry::Opening(pending)) => {
                    pending.consumers.remove(consumer);
                    false
                }
                None => false,
            };

            if emptied {
                state.cache.evict(tag);
                match state.entries.remove(tag) {
                    Some(TagEntry::Active(sub)) => Some(sub.into_handle()),
                    _ => None,
                }
            } else {
                None
            }
        };

        match teardown {
            Some(handle) => {
                debug!(tag = %tag, consumer = %consumer, "Last consumer left; closing");
                self.close_handle(tag, &handle).await
            }
            None => Ok(()),
        }
    }

    async fn unsubscribe_all(&self, consumer: &ConsumerId) -> Result<(), BrokerError> {
        let teardowns: Vec<(Tag, Arc<P::Handle>)> = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;

            let mut emptied = Vec::new();
            for (tag, entry) in state.entries.iter_mut() {
                match entry {
                    TagEntry::Active(sub) => {
                        if sub.remove_consumer(consumer) && sub.is_empty() {
                            emptied.push(tag.clone());
                        }
                    }
                    TagEntry::Opening(pending) => {
                        pending.consumers.remove(consumer);
                    }
                }
            }

            emptied
                .into_iter()
                .filter_map(|tag| {
                    state.cache.evict(&tag);
                    match state.entries.remove(&tag) {
                        Some(TagEntry::Active(sub)) => Some((tag, sub.into_handle())),
                        _ => None,
                    }
                })
                .collect()
        };

        debug!(consumer = %consumer, closing = teardowns.len(), "Consumer removed from all tags");
        self.close_all(teardowns).await
    }

    async fn write(&self, tag: &Tag, value: TagValue) -> Result<WriteOutcome, BrokerError> {
        let handle = match self.shared.state.lock().entries.get(tag) {
            Some(TagEntry::Active(sub)) => Some(sub.handle()),
            _ => None,
        };

        let Some(handle) = handle else {
            self.shared.metrics.record_write(false);
            warn!(tag = %tag, "Write dropped: tag has no active subscription");
            return Ok(WriteOutcome::Dropped(BrokerWarning::WriteToUnsubscribedTag {
                tag: tag.clone(),
            }));
        };

        match self.provider.write(&handle, value).await {
            Ok(()) => {
                self.shared.metrics.record_write(true);
                trace!(tag = %tag, "Write forwarded");
                Ok(WriteOutcome::Forwarded)
            }
            Err(e) => {
                warn!(tag = %tag, error = %e, "Provider write failed");
                Err(BrokerError::ProviderWrite {
                    tag: tag.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        let teardowns: Vec<(Tag, Arc<P::Handle>)> = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.shut_down {
                return Ok(());
            }
            state.shut_down = true;
            state.cache.clear();

            let mut teardowns = Vec::new();
            for (tag, entry) in state.entries.drain() {
                match entry {
                    TagEntry::Active(sub) => teardowns.push((tag, sub.into_handle())),
                    TagEntry::Opening(pending) => {
                        pending.outcome.send_replace(OpenOutcome::ShutDown);
                    }
                }
            }
            teardowns
        };

        info!(closing = teardowns.len(), "Shutting down subscription registry");
        self.close_all(teardowns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryDispatcher, SimulatedProvider};
    use std::time::Duration;

    fn setup() -> (
        SubscriptionRegistry<SimulatedProvider>,
        Arc<SimulatedProvider>,
        Arc<MemoryDispatcher>,
    ) {
        let provider = Arc::new(SimulatedProvider::new("sim"));
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let registry = SubscriptionRegistry::new(provider.clone(), dispatcher.clone());
        (registry, provider, dispatcher)
    }

    fn c(id: &str) -> ConsumerId {
        ConsumerId::new(id)
    }

    fn t(name: &str) -> Tag {
        Tag::new(name)
    }

    #[tokio::test]
    async fn test_first_subscribe_opens_once() {
        let (registry, provider, _) = setup();

        registry.subscribe(c("c1"), t("T")).await.unwrap();
        registry.subscribe(c("c1"), t("T")).await.unwrap();

        assert_eq!(provider.opens_for(&t("T")), 1);
        assert_eq!(registry.consumers_of(&t("T")), vec![c("c1")]);
        assert!(registry.is_active(&t("T")));
    }

    #[tokio::test]
    async fn test_open_failure_leaves_no_state() {
        let (registry, provider, _) = setup();
        provider.fail_opens_for(t("BAD"));

        let err = registry.subscribe(c("c1"), t("BAD")).await.unwrap_err();
        assert!(matches!(err, BrokerError::ProviderOpen { ref tag, .. } if tag == &t("BAD")));
        assert_eq!(registry.active_tags(), 0);
        assert_eq!(registry.pending_tags(), 0);
        assert!(registry.tags_of(&c("c1")).is_empty());
        assert_eq!(registry.metrics().snapshot().open_failures, 1);

        // Unrelated tags are unaffected
        registry.subscribe(c("c1"), t("GOOD")).await.unwrap();
        assert!(registry.is_active(&t("GOOD")));
    }

    #[tokio::test]
    async fn test_initial_value_on_open_is_cached_and_dispatched() {
        let (registry, provider, dispatcher) = setup();
        provider.set_value(t("T"), TagValue::Int(7));

        registry.subscribe(c("c1"), t("T")).await.unwrap();

        assert_eq!(registry.cached_value(&t("T")), Some(TagValue::Int(7)));
        assert_eq!(dispatcher.values_for(&t("T")), vec![TagValue::Int(7)]);
    }

    #[tokio::test]
    async fn test_late_callback_is_ignored() {
        let (registry, provider, dispatcher) = setup();

        registry.subscribe(c("c1"), t("T")).await.unwrap();
        let stale = provider.callbacks_for(&t("T"));
        registry.unsubscribe(&c("c1"), &t("T")).await.unwrap();

        for callback in stale {
            callback.on_update(TagValue::Int(99));
        }

        assert!(dispatcher.is_empty());
        assert_eq!(registry.cached_tags(), 0);
        assert_eq!(registry.metrics().snapshot().late_updates, 1);
    }

    #[tokio::test]
    async fn test_old_epoch_callback_ignored_after_reopen() {
        let (registry, provider, dispatcher) = setup();

        registry.subscribe(c("c1"), t("T")).await.unwrap();
        let stale = provider.callbacks_for(&t("T"));
        registry.unsubscribe(&c("c1"), &t("T")).await.unwrap();
        registry.subscribe(c("c2"), t("T")).await.unwrap();

        for callback in stale {
            callback.on_update(TagValue::Int(1));
        }
        assert!(dispatcher.is_empty());

        provider.publish(&t("T"), TagValue::Int(2));
        assert_eq!(dispatcher.values_for(&t("T")), vec![TagValue::Int(2)]);
        assert_eq!(provider.opens_for(&t("T")), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_open_closes_fresh_handle() {
        let provider =
            Arc::new(SimulatedProvider::new("sim").with_open_delay(Duration::from_millis(50)));
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let registry = Arc::new(SubscriptionRegistry::new(provider.clone(), dispatcher));

        let opener = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.subscribe(c("c1"), t("T")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.pending_tags(), 1);

        registry.unsubscribe_all(&c("c1")).await.unwrap();
        opener.await.unwrap().unwrap();

        assert_eq!(registry.active_tags(), 0);
        assert_eq!(registry.pending_tags(), 0);
        assert_eq!(provider.total_opens(), 1);
        assert_eq!(provider.total_closes(), 1);
        assert_eq!(provider.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscribe_releases_claim() {
        let provider =
            Arc::new(SimulatedProvider::new("sim").with_open_delay(Duration::from_millis(200)));
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let registry = SubscriptionRegistry::new(provider.clone(), dispatcher);

        let attempt =
            tokio::time::timeout(Duration::from_millis(20), registry.subscribe(c("c1"), t("T"))).await;
        assert!(attempt.is_err());

        assert_eq!(registry.pending_tags(), 0);
        assert!(registry.tags_of(&c("c1")).is_empty());

        // The tag can be claimed again afterwards
        registry.subscribe(c("c2"), t("T")).await.unwrap();
        assert!(registry.is_active(&t("T")));
    }

    #[tokio::test]
    async fn test_open_timeout_reports_error() {
        let provider =
            Arc::new(SimulatedProvider::new("sim").with_open_delay(Duration::from_millis(200)));
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let config = BrokerConfig::default().with_open_timeout(Duration::from_millis(20));
        let registry = SubscriptionRegistry::with_config(provider, dispatcher, config);

        let err = registry.subscribe(c("c1"), t("T")).await.unwrap_err();
        match err {
            BrokerError::ProviderOpen { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.pending_tags(), 0);
    }

    #[tokio::test]
    async fn test_close_failure_still_removes_entry() {
        let (registry, provider, _) = setup();
        registry.subscribe(c("c1"), t("T")).await.unwrap();
        provider.fail_closes(true);

        let err = registry.unsubscribe(&c("c1"), &t("T")).await.unwrap_err();
        assert!(matches!(err, BrokerError::ProviderClose { .. }));
        assert_eq!(registry.active_tags(), 0);
        assert_eq!(registry.metrics().snapshot().close_failures, 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (registry, provider, _) = setup();
        provider.set_value(t("T"), TagValue::Int(0));
        registry.subscribe(c("c1"), t("T")).await.unwrap();

        let err = registry.write(&t("T"), TagValue::from("not a number")).await.unwrap_err();
        assert!(matches!(err, BrokerError::ProviderWrite { .. }));
        assert!(provider.writes().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let (registry, provider, _) = setup();
        registry.subscribe(c("c1"), t("A")).await.unwrap();
        registry.subscribe(c("c2"), t("B")).await.unwrap();

        registry.shutdown().await.unwrap();
        registry.shutdown().await.unwrap();

        assert_eq!(provider.total_closes(), 2);
        assert_eq!(provider.open_channels(), 0);
        assert_eq!(registry.active_tags(), 0);
        assert_eq!(registry.cached_tags(), 0);
        assert!(registry.is_shut_down());
        assert_eq!(
            registry.subscribe(c("c1"), t("A")).await,
            Err(BrokerError::ShutDown)
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_open_closes_late_handle() {
        let provider =
            Arc::new(SimulatedProvider::new("sim").with_open_delay(Duration::from_millis(50)));
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let registry = Arc::new(SubscriptionRegistry::new(provider.clone(), dispatcher));

        let opener = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.subscribe(c("c1"), t("T")).await })
        };
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.subscribe(c("c2"), t("T")).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.shutdown().await.unwrap();

        assert_eq!(opener.await.unwrap(), Err(BrokerError::ShutDown));
        assert_eq!(waiter.await.unwrap(), Err(BrokerError::ShutDown));
        assert_eq!(provider.open_channels(), 0);
        assert_eq!(provider.total_closes(), 1);
    }
}
