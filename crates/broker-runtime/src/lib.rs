//! # Broker Runtime Library
//!
//! Assembles the tag broker into a runnable service. The `tagmux` binary in
//! `main.rs` is a thin wrapper around [`BrokerRuntime`].
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (env)
//! 2. Initialize logging
//! 3. Build providers, dispatchers, registry and session router
//! 4. Seed the simulated providers
//! 5. Start the drift ticker and the update log
//! 6. Serve the console session until EOF or Ctrl-C
//! 7. Shut the broker down, closing every provider subscription

pub mod config;
pub mod runtime;

pub use config::{parse_seed_tags, RuntimeConfig, DEFAULT_TICK_INTERVAL};
pub use runtime::{BrokerRuntime, RuntimeBroker};
