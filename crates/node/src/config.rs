//! Process configuration loaded from environment variables.

use std::time::Duration;

use domain::PropagationLimits;
use messaging::{RelayConfig, RelayConfigError, RetryPolicy};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT` — bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL; in-memory backend when unset
/// - `RELAY_BATCH_SIZE`, `RELAY_POLL_INTERVAL_MS`, `RELAY_PUBLISH_TIMEOUT_MS`,
///   `RELAY_STALE_AFTER_SECS`, `RELAY_MAX_RETRIES`, `RELAY_BASE_DELAY_MS`,
///   `RELAY_MAX_DELAY_MS`
/// - `CONSUMER_COMMAND_TIMEOUT_MS` (default: 10000)
/// - `CASCADE_MAX_FANOUT`, `CASCADE_MAX_DEPTH`
///
/// Unparseable values fall back to the default. Combinations that cannot
/// work together are reported by [`NodeConfig::validate`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub relay: RelayConfig,
    pub consumer_command_timeout: Duration,
    pub limits: PropagationLimits,
}

impl NodeConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| parsed(key).map_or(default, Duration::from_millis);

        let relay = RelayConfig {
            batch_size: parsed("RELAY_BATCH_SIZE")
                .map_or(defaults.relay.batch_size, |v| v.max(1) as usize),
            poll_interval: millis("RELAY_POLL_INTERVAL_MS", defaults.relay.poll_interval),
            publish_timeout: millis("RELAY_PUBLISH_TIMEOUT_MS", defaults.relay.publish_timeout),
            stale_after: parsed("RELAY_STALE_AFTER_SECS")
                .map_or(defaults.relay.stale_after, Duration::from_secs),
            retry: RetryPolicy {
                max_retries: parsed("RELAY_MAX_RETRIES")
                    .and_then(|v| u32::try_from(v).ok())
                    .map_or(defaults.relay.retry.max_retries, |v| v.max(1)),
                base_delay: millis("RELAY_BASE_DELAY_MS", defaults.relay.retry.base_delay),
                max_delay: millis("RELAY_MAX_DELAY_MS", defaults.relay.retry.max_delay),
            },
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            relay,
            consumer_command_timeout: millis(
                "CONSUMER_COMMAND_TIMEOUT_MS",
                defaults.consumer_command_timeout,
            ),
            limits: PropagationLimits {
                max_fanout: parsed("CASCADE_MAX_FANOUT")
                    .map_or(defaults.limits.max_fanout, |v| v as usize),
                max_cascade_depth: parsed("CASCADE_MAX_DEPTH")
                    .map_or(defaults.limits.max_cascade_depth, |v| v as usize),
            },
        }
    }

    /// Rejects relay timings under which a second relay could take over
    /// claims this one is still publishing.
    pub fn validate(&self) -> Result<(), RelayConfigError> {
        self.relay.validate()
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            relay: RelayConfig::default(),
            consumer_command_timeout: Duration::from_secs(10),
            limits: PropagationLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> NodeConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.relay.batch_size, 100);
        assert_eq!(config.relay.retry.max_retries, 5);
        assert_eq!(config.limits.max_fanout, 500);
        assert_eq!(config.consumer_command_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/engine"),
            ("RELAY_BATCH_SIZE", "25"),
            ("RELAY_POLL_INTERVAL_MS", "250"),
            ("RELAY_MAX_RETRIES", "8"),
            ("RELAY_BASE_DELAY_MS", "100"),
            ("CASCADE_MAX_FANOUT", "50"),
            ("CASCADE_MAX_DEPTH", "2"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/engine"));
        assert_eq!(config.relay.batch_size, 25);
        assert_eq!(config.relay.poll_interval, Duration::from_millis(250));
        assert_eq!(config.relay.retry.max_retries, 8);
        assert_eq!(config.relay.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.limits.max_fanout, 50);
        assert_eq!(config.limits.max_cascade_depth, 2);
    }

    #[test]
    fn test_validate_rejects_short_stale_after() {
        assert!(from_pairs(&[]).validate().is_ok());

        let config = from_pairs(&[
            ("RELAY_PUBLISH_TIMEOUT_MS", "30000"),
            ("RELAY_STALE_AFTER_SECS", "60"),
        ]);
        assert!(matches!(
            config.validate(),
            Err(RelayConfigError::StaleAfterTooShort { .. })
        ));

        let config = from_pairs(&[
            ("RELAY_PUBLISH_TIMEOUT_MS", "2000"),
            ("RELAY_STALE_AFTER_SECS", "5"),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[("PORT", "http"), ("RELAY_BATCH_SIZE", "0"), ("DATABASE_URL", "")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.relay.batch_size, 1);
        assert!(config.database_url.is_none());
    }
}
