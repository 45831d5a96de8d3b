//! Domain Layer
//!
//! Pure types and state for the broker. No I/O, no provider calls.

pub mod cache;
pub mod config;
pub mod sample;
pub mod subscription;
pub mod tag;
pub mod value;

pub use cache::ValueCache;
pub use config::{BrokerConfig, ConfigError};
pub use sample::{
    Alarm, AlarmSeverity, ControlLimits, DisplayInfo, SampleMeta, TagSample, TimeStamp, ValueAlarm,
};
pub use subscription::{Epoch, Subscription};
pub use tag::{ConsumerId, Protocol, Tag, TagAddress, UnknownProtocol};
pub use value::{TagValue, ValueError};
