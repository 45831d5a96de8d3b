//! Broker configuration and validation.
//!
//! # Example
//!
//! ```ignore
//! use tag_broker::domain::BrokerConfig;
//!
//! let config = BrokerConfig::from_env()
//!     .with_open_timeout(Duration::from_secs(2));
//! config.validate()?;
//! ```

use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use super::Protocol;

/// Default per-consumer outbound queue length.
pub const DEFAULT_CONSUMER_QUEUE: usize = 256;

/// Default capacity of the broadcast dispatcher.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Default bound on a provider `open` call.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a provider `close` call.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Core broker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Protocol for tags without a `proto://` prefix
    pub default_protocol: Protocol,
    /// Outbound queue length per consumer session
    pub consumer_queue_capacity: usize,
    /// Capacity of the broadcast dispatcher
    pub broadcast_capacity: usize,
    /// Bound on a single provider open
    pub open_timeout: Duration,
    /// Bound on a single provider close
    pub close_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_protocol: Protocol::Pva,
            consumer_queue_capacity: DEFAULT_CONSUMER_QUEUE,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl BrokerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EPICS_DEFAULT_PROTOCOL`: `ca` selects Channel Access, anything else PV Access (default: pva)
    /// - `TAGMUX_CONSUMER_QUEUE`: per-consumer queue length (default: 256)
    /// - `TAGMUX_BROADCAST_CAPACITY`: broadcast dispatcher capacity (default: 1024)
    /// - `TAGMUX_OPEN_TIMEOUT_MS`: provider open bound (default: 5000)
    /// - `TAGMUX_CLOSE_TIMEOUT_MS`: provider close bound (default: 2000)
    ///
    /// A variable that does not parse is logged and replaced by its
    /// default; the other variables still apply. A result that fails
    /// [`BrokerConfig::validate`] is logged and replaced by the defaults.
    /// Use [`BrokerConfig::try_from_env`] to reject bad input instead.
    pub fn from_env() -> Self {
        Self::lenient(|var| env::var(var).ok())
    }

    /// Strict variant of [`BrokerConfig::from_env`].
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::strict(|var| env::var(var).ok())
    }

    fn lenient(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (config, errors) = Self::read_vars(lookup);
        for e in &errors {
            warn!(error = %e, "Ignoring broker setting; using its default");
        }
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(error = %e, "Broker configuration unusable; using defaults");
                Self::default()
            }
        }
    }

    fn strict(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let (config, errors) = Self::read_vars(lookup);
        if let Some(e) = errors.into_iter().next() {
            return Err(e);
        }
        config.validate()?;
        Ok(config)
    }

    /// Read every variable, keeping the default for any that fail to parse.
    fn read_vars(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let defaults = Self::default();
        let mut errors = Vec::new();
        let mut number = |var: &'static str, default: u64| -> u64 {
            match lookup(var) {
                None => default,
                Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                    errors.push(ConfigError::InvalidEnv { var, value: raw });
                    default
                }),
            }
        };

        let consumer_queue_capacity =
            number("TAGMUX_CONSUMER_QUEUE", defaults.consumer_queue_capacity as u64) as usize;
        let broadcast_capacity =
            number("TAGMUX_BROADCAST_CAPACITY", defaults.broadcast_capacity as u64) as usize;
        let open_timeout = Duration::from_millis(number(
            "TAGMUX_OPEN_TIMEOUT_MS",
            defaults.open_timeout.as_millis() as u64,
        ));
        let close_timeout = Duration::from_millis(number(
            "TAGMUX_CLOSE_TIMEOUT_MS",
            defaults.close_timeout.as_millis() as u64,
        ));
        let default_protocol = lookup("EPICS_DEFAULT_PROTOCOL")
            .map(|v| Protocol::from_prefix(v.trim()))
            .unwrap_or(defaults.default_protocol);

        let config = Self {
            default_protocol,
            consumer_queue_capacity,
            broadcast_capacity,
            open_timeout,
            close_timeout,
        };
        (config, errors)
    }

    /// Reject values that would make the broker unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_queue_capacity == 0 {
            return Err(ConfigError::Zero {
                name: "consumer_queue_capacity",
            });
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Zero {
                name: "broadcast_capacity",
            });
        }
        if self.open_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "open_timeout",
            });
        }
        if self.close_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "close_timeout",
            });
        }
        Ok(())
    }

    pub fn with_default_protocol(mut self, protocol: Protocol) -> Self {
        self.default_protocol = protocol;
        self
    }

    pub fn with_consumer_queue_capacity(mut self, capacity: usize) -> Self {
        self.consumer_queue_capacity = capacity;
        self
    }

    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}
