//! Outbound Ports (Driven Ports)
//!
//! Dependencies the broker needs from the outside world:
//! - a provider that opens, closes and writes tag subscriptions
//! - a dispatcher that carries fresh values toward consumers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::domain::{SampleMeta, Tag, TagSample, TagValue};
use crate::error::ProviderError;

/// Callback handed to [`ProviderAdapter::open`].
///
/// Providers invoke [`UpdateCallback::on_update`] from whatever thread or
/// task delivers their data, for as long as they like. Calls after the
/// subscription was closed are harmless.
#[derive(Clone)]
pub struct UpdateCallback {
    inner: Arc<dyn Fn(TagSample) + Send + Sync>,
}

impl UpdateCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TagSample) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// A callback that discards every value.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Hand a fresh sample to the broker. A bare [`TagValue`] is accepted
    /// as a sample without metadata.
    pub fn on_update(&self, sample: impl Into<TagSample>) {
        (self.inner)(sample.into())
    }
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCallback").finish_non_exhaustive()
    }
}

/// Connection to an external data source (Driven Port).
///
/// Handles are owned by the broker once `open` returns; the broker passes
/// them back by reference for `write` and `close` and never exposes them.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Provider-specific subscription handle.
    type Handle: Send + Sync + 'static;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Open a subscription for `tag`. Updates may start flowing through
    /// `on_update` before this returns.
    async fn open(&self, tag: &Tag, on_update: UpdateCallback)
        -> Result<Self::Handle, ProviderError>;

    /// Tear a subscription down.
    async fn close(&self, handle: &Self::Handle) -> Result<(), ProviderError>;

    /// Write a value through an open subscription.
    async fn write(&self, handle: &Self::Handle, value: TagValue) -> Result<(), ProviderError>;
}

/// A tagged sample on its way to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub tag: Tag,
    pub value: TagValue,
    #[serde(flatten)]
    pub meta: SampleMeta,
}

impl TagUpdate {
    pub fn new(tag: Tag, sample: impl Into<TagSample>) -> Self {
        let TagSample { value, meta } = sample.into();
        Self { tag, value, meta }
    }

    pub fn sample(&self) -> TagSample {
        TagSample::new(self.value.clone()).with_meta(self.meta.clone())
    }
}

/// Sink for fresh values (Driven Port).
///
/// Called with the registry lock held, which keeps per-tag delivery order
/// identical to provider order. Implementations must return quickly and
/// must not call back into the broker.
pub trait UpdateDispatcher: Send + Sync {
    fn deliver(&self, tag: &Tag, sample: &TagSample);
}

impl<D: UpdateDispatcher + ?Sized> UpdateDispatcher for Arc<D> {
    fn deliver(&self, tag: &Tag, sample: &TagSample) {
        (**self).deliver(tag, sample)
    }
}
