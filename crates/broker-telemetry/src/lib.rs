//! # Broker Telemetry
//!
//! Structured logging for the tag broker, built on `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TAGMUX_SERVICE_NAME` | `tagmux` | Service name in the startup record |
//! | `TAGMUX_LOG_LEVEL` / `RUST_LOG` | `info` | `EnvFilter` directive |
//! | `TAGMUX_JSON_LOGS` | `false` | JSON formatted records |
//! | `TAGMUX_CONSOLE_OUTPUT` | `true` | Write records to stderr |

mod config;
mod logging;

pub use config::{TelemetryConfig, DEFAULT_SERVICE_NAME};
pub use logging::{env_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {reason}")]
    Filter { directive: String, reason: String },

    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}
