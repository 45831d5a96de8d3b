//! # Tag Broker
//!
//! Subscription multiplexing for shared real-time tag providers.
//!
//! Many consumers watch named, continuously updating values ("tags"). Opening
//! a tag costs a live provider subscription, so the broker keeps exactly one
//! per tag, shares it between every interested consumer, caches the latest
//! value, and closes it when the last consumer leaves.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure types, no I/O
//!   - `Tag`, `ConsumerId`, `TagAddress`: identities and protocol addressing
//!   - `TagValue`: values with type coercion for writes
//!   - `TagSample`: a value plus alarm, timestamp and limit metadata
//!   - `ValueCache`: most recent sample per tag
//!   - `Subscription`: consumer set plus provider handle
//!   - `BrokerConfig`: configuration with validation
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `TagBrokerApi`: Driving port (subscribe, unsubscribe, write, shutdown)
//!   - `ProviderAdapter`: Driven port (open, close, write)
//!   - `UpdateDispatcher`: Driven port (deliver `(tag, sample)`)
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `SubscriptionRegistry`: Implements `TagBrokerApi`
//!
//! - **Adapters Layer** (`adapters/`): Concrete providers and sinks
//!   - `SimulatedProvider`: in-memory soft control system
//!   - `ProtocolRouter`: routes `ca://` / `pva://` tags to two adapters
//!   - `BroadcastDispatcher`, `MemoryDispatcher`, `DispatcherSet`
//!
//! - **Session Layer** (`session/`): Consumer-facing glue
//!   - `ClientMessage` / `ServerMessage`: JSON wire messages
//!   - `FanoutDispatcher`: per-consumer bounded queues
//!   - `SessionRouter`: connect, handle, disconnect
//!
//! ## Invariants
//!
//! - A provider subscription exists for a tag iff its consumer set is non-empty
//! - At most one provider `open` per tag, however many first subscribers race
//! - At most one provider `close` per teardown
//! - A tag's cached sample lives only as long as its subscription
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tag_broker::{
//!     ConsumerId, MemoryDispatcher, SimulatedProvider, SubscriptionRegistry, Tag, TagBrokerApi, TagValue,
//! };
//!
//! let provider = Arc::new(SimulatedProvider::new("sim"));
//! let dispatcher = Arc::new(MemoryDispatcher::new());
//! let broker = SubscriptionRegistry::new(provider.clone(), dispatcher.clone());
//!
//! broker.subscribe(ConsumerId::new("c1"), Tag::new("SR:CURRENT")).await?;
//! provider.publish(&Tag::new("SR:CURRENT"), TagValue::Int(3));
//! assert_eq!(dispatcher.len(), 1);
//! ```

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;
pub mod session;

// Re-exports
pub use adapters::{
    BroadcastDispatcher, ChannelLimits, DispatcherSet, MemoryDispatcher, ProtocolRouter,
    RoutedHandle, SimHandle, SimulatedProvider,
};
pub use domain::{
    Alarm, AlarmSeverity, BrokerConfig, ConfigError, ConsumerId, ControlLimits, DisplayInfo,
    Epoch, Protocol, SampleMeta, Subscription, Tag, TagAddress, TagSample, TagValue, TimeStamp,
    UnknownProtocol, ValueAlarm, ValueCache, ValueError,
};
pub use error::{BrokerError, BrokerWarning, ProviderError, SessionError, WriteOutcome};
pub use metrics::{BrokerMetrics, MetricsSnapshot};
pub use ports::{ProviderAdapter, TagBrokerApi, TagUpdate, UpdateCallback, UpdateDispatcher};
pub use service::SubscriptionRegistry;
pub use session::{ClientMessage, ConsumerSession, FanoutDispatcher, ServerMessage, SessionRouter};
