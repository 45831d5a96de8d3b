//! Protocol Router
//!
//! One [`ProviderAdapter`] in front of a Channel Access and a PV Access
//! adapter. Each tag goes to the adapter named by its `ca://` / `pva://`
//! prefix, or to the default protocol when it has none. The prefix is
//! stripped before the tag reaches the protocol adapter.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use crate::domain::{Protocol, Tag, TagAddress, TagValue};
use crate::error::ProviderError;
use crate::ports::{ProviderAdapter, UpdateCallback};

/// Handle issued by [`ProtocolRouter`]; remembers which adapter owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedHandle<C, V> {
    Ca(C),
    Pva(V),
}

impl<C, V> RoutedHandle<C, V> {
    pub fn protocol(&self) -> Protocol {
        match self {
            RoutedHandle::Ca(_) => Protocol::Ca,
            RoutedHandle::Pva(_) => Protocol::Pva,
        }
    }
}

/// Routes tags between two protocol adapters.
pub struct ProtocolRouter<C, V> {
    ca: Arc<C>,
    pva: Arc<V>,
    default_protocol: Protocol,
}

impl<C: ProviderAdapter, V: ProviderAdapter> ProtocolRouter<C, V> {
    pub fn new(ca: Arc<C>, pva: Arc<V>, default_protocol: Protocol) -> Self {
        Self {
            ca,
            pva,
            default_protocol,
        }
    }

    pub fn default_protocol(&self) -> Protocol {
        self.default_protocol
    }

    /// Where `tag` would be routed.
    pub fn resolve(&self, tag: &Tag) -> TagAddress {
        TagAddress::parse(tag, self.default_protocol)
    }
}

#[async_trait]
impl<C: ProviderAdapter, V: ProviderAdapter> ProviderAdapter for ProtocolRouter<C, V> {
    type Handle = RoutedHandle<C::Handle, V::Handle>;

    fn name(&self) -> &str {
        "protocol-router"
    }

    async fn open(&self, tag: &Tag, on_update: UpdateCallback) -> Result<Self::Handle, ProviderError> {
        let address = self.resolve(tag);
        let channel = Tag::new(address.channel);
        trace!(tag = %tag, protocol = %address.protocol, channel = %channel, "Routing open");

        match address.protocol {
            Protocol::Ca => self.ca.open(&channel, on_update).await.map(RoutedHandle::Ca),
            Protocol::Pva => self.pva.open(&channel, on_update).await.map(RoutedHandle::Pva),
        }
    }

    async fn close(&self, handle: &Self::Handle) -> Result<(), ProviderError> {
        match handle {
            RoutedHandle::Ca(h) => self.ca.close(h).await,
            RoutedHandle::Pva(h) => self.pva.close(h).await,
        }
    }

    async fn write(&self, handle: &Self::Handle, value: TagValue) -> Result<(), ProviderError> {
        match handle {
            RoutedHandle::Ca(h) => self.ca.write(h, value).await,
            RoutedHandle::Pva(h) => self.pva.write(h, value).await,
        }
    }
}
