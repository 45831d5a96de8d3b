//! # Tagmux
//!
//! Tag broker over two simulated control-system providers.
//!
//! Speaks JSON lines on stdin/stdout:
//!
//! ```text
//! {"type":"subscribe","tags":["ca://SR:CURRENT","pva://RF:FREQ"]}
//! {"type":"write","tag":"ca://FE:SHUTTER","value":"Open"}
//! {"type":"unsubscribe","tags":["pva://RF:FREQ"]}
//! ```
//!
//! Logs go to stderr. See `RuntimeConfig::from_env` for settings.

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{error, info};

use broker_runtime::{BrokerRuntime, RuntimeConfig};
use broker_telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.telemetry).context("Failed to initialize logging")?;

    info!(
        service = %config.telemetry.service_name,
        default_protocol = %config.broker.default_protocol,
        "Starting tag broker"
    );

    let runtime = BrokerRuntime::new(config);
    runtime.start();

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = runtime.run_console(stdin, stdout) => {
            match result {
                Ok(()) => info!("Console closed"),
                Err(e) => error!("Console session failed: {:#}", e),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C received");
        }
    }

    // Graceful shutdown
    runtime.shutdown().await;

    Ok(())
}
