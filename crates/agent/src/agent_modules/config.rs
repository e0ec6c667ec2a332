use crate::agent_modules::credentials::DEFAULT_REFRESH_BUFFER_SECONDS;
use crate::agent_modules::delivery::{DEFAULT_BACKLOG_CAPACITY, RetryPolicy};
use crate::agent_modules::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};
use tracing::{error, info, warn};

const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Upper bound for `base_delay_seconds` and `max_jitter_seconds`.
const MAX_RETRY_DELAY_SECONDS: f64 = 86_400.0;

#[derive(Serialize, Deserialize, Clone)]
pub struct EnvoyConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Skips serial discovery against `/info` when set.
    pub serial: Option<String>,
    pub token_cache_path: Option<PathBuf>,
    #[serde(default = "default_token_buffer_seconds")]
    pub token_refresh_buffer_seconds: i64,
}

// Hand-written so passwords never reach the log.
impl std::fmt::Debug for EnvoyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvoyConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("serial", &self.serial)
            .field("token_cache_path", &self.token_cache_path)
            .field("token_refresh_buffer_seconds", &self.token_refresh_buffer_seconds)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl std::fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: f64,
    #[serde(default = "default_max_jitter_seconds")]
    pub max_jitter_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay_seconds(),
            max_jitter_seconds: default_max_jitter_seconds(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    pub envoy: EnvoyConfig,
    pub influxdb: InfluxConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_poll_interval_seconds() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_backlog_capacity() -> usize {
    DEFAULT_BACKLOG_CAPACITY
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_token_buffer_seconds() -> i64 {
    DEFAULT_REFRESH_BUFFER_SECONDS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_seconds() -> f64 {
    1.0
}

fn default_max_jitter_seconds() -> f64 {
    1.0
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: delay_from_seconds(self.retry.base_delay_seconds),
            max_jitter: delay_from_seconds(self.retry.max_jitter_seconds),
        }
    }

    /// Replaces zero intervals with defaults and rejects values that cannot work.
    fn normalize(mut self) -> Result<Self, ConfigError> {
        if self.poll_interval_seconds == 0 {
            warn!(
                fallback = DEFAULT_POLL_INTERVAL_SECONDS,
                "poll_interval_seconds is 0, falling back to default."
            );
            self.poll_interval_seconds = DEFAULT_POLL_INTERVAL_SECONDS;
        }
        if self.retry.max_attempts == 0 {
            warn!(
                fallback = DEFAULT_MAX_ATTEMPTS,
                "retry.max_attempts is 0, falling back to default."
            );
            self.retry.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        for (name, value) in [
            ("retry.base_delay_seconds", self.retry.base_delay_seconds),
            ("retry.max_jitter_seconds", self.retry.max_jitter_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
            if value > MAX_RETRY_DELAY_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not exceed {MAX_RETRY_DELAY_SECONDS} seconds, got {value}"
                )));
            }
        }
        if self.envoy.host.trim().is_empty() {
            return Err(ConfigError::Invalid("envoy.host must not be empty".to_string()));
        }
        Ok(self)
    }
}

// The fields are public, so values that skipped `normalize` are clamped here.
fn delay_from_seconds(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.clamp(0.0, MAX_RETRY_DELAY_SECONDS)).unwrap_or_default()
}

pub fn parse_config(config_str: &str, path_for_errors: &str) -> Result<AgentConfig, ConfigError> {
    let config: AgentConfig = toml::from_str(config_str).map_err(|e| ConfigError::Parse {
        path: path_for_errors.to_string(),
        source: e,
    })?;
    config.normalize()
}

pub fn load_config(config_path_str: &str) -> Result<AgentConfig, ConfigError> {
    let config_path = Path::new(config_path_str);
    let absolute_path_display = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    info!(path = ?absolute_path_display, "Attempting to load config.");

    let config_str = fs::read_to_string(config_path).map_err(|e| {
        error!(path = %config_path_str, error = %e, "Failed to read config file.");
        ConfigError::Read {
            path: config_path_str.to_string(),
            source: e,
        }
    })?;

    let config = parse_config(&config_str, config_path_str).map_err(|e| {
        error!(path = %config_path_str, error = %e, "Failed to load config file.");
        e
    })?;

    info!(config = ?config, "Loaded config successfully.");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [envoy]
        host = "envoy.local"
        username = "owner@example.com"
        password = "hunter2"

        [influxdb]
        url = "http://localhost:8086"
        token = "influx-token"
        org = "home"
        bucket = "solar"
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(MINIMAL, "config.toml").unwrap();

        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.backlog_capacity, 10_000);
        assert_eq!(config.backlog_capacity, DEFAULT_BACKLOG_CAPACITY);
        assert_eq!(config.envoy.token_refresh_buffer_seconds, 600);
        assert_eq!(
            config.envoy.token_refresh_buffer_seconds,
            DEFAULT_REFRESH_BUFFER_SECONDS
        );
        assert_eq!(config.envoy.serial, None);
        assert_eq!(config.retry.max_attempts, 3);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_values_fall_back() {
        let raw = format!("poll_interval_seconds = 0\n{MINIMAL}\n[retry]\nmax_attempts = 0\n");
        let config = parse_config(&raw, "config.toml").unwrap();

        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_negative_delay_rejected() {
        let raw = format!("{MINIMAL}\n[retry]\nbase_delay_seconds = -1.0\n");
        let result = parse_config(&raw, "config.toml");

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_delay_rejected() {
        for key in ["base_delay_seconds", "max_jitter_seconds"] {
            let raw = format!("{MINIMAL}\n[retry]\n{key} = 1e20\n");
            let result = parse_config(&raw, "config.toml");

            assert!(matches!(result, Err(ConfigError::Invalid(_))), "{key}");
        }
    }

    #[test]
    fn test_retry_policy_clamps_unchecked_values() {
        let mut config = parse_config(MINIMAL, "config.toml").unwrap();
        config.retry.base_delay_seconds = 1e20;
        config.retry.max_jitter_seconds = f64::NAN;

        let policy = config.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(86_400));
        assert_eq!(policy.max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let result = parse_config("poll_interval_seconds = 10\n", "config.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = parse_config(MINIMAL, "config.toml").unwrap();
        let rendered = format!("{config:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("influx-token"));
        assert!(rendered.contains("envoy.local"));
    }
}
