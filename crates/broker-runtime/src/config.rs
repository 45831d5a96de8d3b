//! Runtime configuration.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

use broker_telemetry::TelemetryConfig;
use tag_broker::{BrokerConfig, Tag, TagValue};

/// Default interval between simulated value changes.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Complete configuration for the runtime binary.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Broker core settings
    pub broker: BrokerConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
    /// Channels the simulated providers start with
    pub seed_tags: Vec<(Tag, TagValue)>,
    /// How often seeded numeric channels drift
    pub tick_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            telemetry: TelemetryConfig::default(),
            seed_tags: default_seed_tags(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Everything read by [`BrokerConfig::try_from_env`] and
    /// [`TelemetryConfig::from_env`], plus:
    ///
    /// - `TAGMUX_SEED_TAGS`: comma separated `tag=value` pairs; values are
    ///   JSON where they parse as JSON and text otherwise
    /// - `TAGMUX_TICK_MS`: drift interval in milliseconds, `0` disables it
    pub fn from_env() -> Result<Self> {
        let broker = BrokerConfig::try_from_env().context("Invalid broker configuration")?;

        let seed_tags = match env::var("TAGMUX_SEED_TAGS") {
            Ok(raw) => parse_seed_tags(&raw).context("Invalid TAGMUX_SEED_TAGS")?,
            Err(_) => default_seed_tags(),
        };

        let tick_interval = match env::var("TAGMUX_TICK_MS") {
            Ok(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .with_context(|| format!("Invalid TAGMUX_TICK_MS '{raw}'"))?,
            ),
            Err(_) => DEFAULT_TICK_INTERVAL,
        };

        Ok(Self {
            broker,
            telemetry: TelemetryConfig::from_env(),
            seed_tags,
            tick_interval,
        })
    }
}

/// A small beamline to play with.
fn default_seed_tags() -> Vec<(Tag, TagValue)> {
    vec![
        (Tag::new("ca://SR:CURRENT"), TagValue::Double(400.0)),
        (Tag::new("pva://RF:FREQ"), TagValue::Double(499.654)),
        (Tag::new("ca://BL:COUNTER"), TagValue::Int(0)),
        (
            Tag::new("ca://FE:SHUTTER"),
            TagValue::Enum {
                index: 0,
                choices: vec!["Closed".to_string(), "Open".to_string()],
            },
        ),
        (Tag::new("pva://BL:SAMPLE"), TagValue::from("none")),
    ]
}

/// Parse `tag=value[,tag=value...]`.
pub fn parse_seed_tags(raw: &str) -> Result<Vec<(Tag, TagValue)>> {
    let mut seeds = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((tag, value)) = entry.split_once('=') else {
            bail!("seed '{entry}' is not of the form tag=value");
        };
        let tag = tag.trim();
        if tag.is_empty() {
            bail!("seed '{entry}' has an empty tag");
        }
        let value = value.trim();
        let value = serde_json::from_str::<TagValue>(value)
            .unwrap_or_else(|_| TagValue::Text(value.to_string()));
        seeds.push((Tag::new(tag), value));
    }
    Ok(seeds)
}
