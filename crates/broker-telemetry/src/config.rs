//! Telemetry configuration from environment variables.

use std::env;

/// Default service name in log records.
pub const DEFAULT_SERVICE_NAME: &str = "tagmux";

/// Configuration for structured logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup record
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive such as `tag_broker=debug,info`
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Whether to write logs at all (to stderr)
    pub console_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            console_output: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TAGMUX_SERVICE_NAME`: Service name (default: tagmux)
    /// - `TAGMUX_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `TAGMUX_JSON_LOGS`: Enable JSON logs (default: false)
    /// - `TAGMUX_CONSOLE_OUTPUT`: Enable log output (default: true)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("TAGMUX_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),

            log_level: env::var("TAGMUX_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("TAGMUX_JSON_LOGS")
                .map(|v| flag(&v, false))
                .unwrap_or(false),

            console_output: env::var("TAGMUX_CONSOLE_OUTPUT")
                .map(|v| flag(&v, true))
                .unwrap_or(true),
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Parse a boolean flag; anything unrecognised keeps `default`.
fn flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tagmux");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_flag_parsing() {
        assert!(flag("TRUE", false));
        assert!(flag(" 1 ", false));
        assert!(!flag("off", true));
        assert!(flag("maybe", true));
        assert!(!flag("maybe", false));
    }

    #[test]
    fn test_builders() {
        let config = TelemetryConfig::default()
            .with_log_level("tag_broker=trace")
            .with_json_logs(true);
        assert_eq!(config.log_level, "tag_broker=trace");
        assert!(config.json_logs);
    }
}
