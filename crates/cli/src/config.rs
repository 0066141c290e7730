//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::RunnerConfig;
use saga::runner::DEFAULT_REMOTE_TIMEOUT;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `pretty` or `json` (default: `pretty`)
/// - `REMOTE_TIMEOUT_MS` — deadline per remote call (default: `10000`)
/// - `FAIL_STEP` — step id whose remote action answers with an error
/// - `SLOW_STEP` — step id whose remote action outlives the deadline
/// - `PRINT_METRICS` — print the Prometheus exposition on exit (default: `false`)
/// - `USER_EMAIL`, `USER_NAME`, `CITY_ID` — the registration to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub remote_timeout: Duration,
    pub fail_step: Option<String>,
    pub slow_step: Option<String>,
    pub print_metrics: bool,
    pub user_email: String,
    pub user_name: String,
    pub city_id: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match non_empty("LOG_FORMAT").as_deref() {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            remote_timeout: non_empty("REMOTE_TIMEOUT_MS")
                .and_then(|ms| ms.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.remote_timeout),
            fail_step: non_empty("FAIL_STEP"),
            slow_step: non_empty("SLOW_STEP"),
            print_metrics: non_empty("PRINT_METRICS")
                .map(|flag| matches!(flag.trim(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(defaults.print_metrics),
            user_email: non_empty("USER_EMAIL").unwrap_or(defaults.user_email),
            user_name: non_empty("USER_NAME").unwrap_or(defaults.user_name),
            city_id: non_empty("CITY_ID").unwrap_or(defaults.city_id),
        }
    }

    /// Returns the saga runner settings.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            remote_timeout: self.remote_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            fail_step: None,
            slow_step: None,
            print_metrics: false,
            user_email: "ada@example.com".to_string(),
            user_name: "Ada Lovelace".to_string(),
            city_id: "city-1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.remote_timeout, Duration::from_secs(10));
        assert!(config.fail_step.is_none());
        assert!(!config.print_metrics);
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        assert_eq!(config_from(&[]), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("RUST_LOG", "saga=debug"),
            ("LOG_FORMAT", "JSON"),
            ("REMOTE_TIMEOUT_MS", "250"),
            ("FAIL_STEP", "ASSIGN_CITY"),
            ("PRINT_METRICS", "true"),
            ("CITY_ID", "city-9"),
        ]);

        assert_eq!(config.log_level, "saga=debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.remote_timeout, Duration::from_millis(250));
        assert_eq!(config.fail_step.as_deref(), Some("ASSIGN_CITY"));
        assert!(config.print_metrics);
        assert_eq!(config.city_id, "city-9");
        assert_eq!(config.runner_config().remote_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("REMOTE_TIMEOUT_MS", "soon"),
            ("LOG_FORMAT", "xml"),
            ("FAIL_STEP", "  "),
        ]);

        assert_eq!(config.remote_timeout, DEFAULT_REMOTE_TIMEOUT);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.fail_step.is_none());
    }
}
