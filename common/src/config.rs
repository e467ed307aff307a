// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub redis: RedisConfig,
    pub checker: CheckerSettings,
    #[serde(default)]
    pub remote: RemoteSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Upper bound for connecting and the startup `PING`
    #[serde(default = "default_redis_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_redis_connect_timeout() -> u64 {
    5
}

/// Checker tuning as it appears in files and environment
///
/// Zero parallelism means "one per logical CPU", a zero batch size means 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerSettings {
    #[serde(default)]
    pub max_parallel_checks: usize,
    #[serde(default)]
    pub max_parallel_remote_checks: usize,
    #[serde(default)]
    pub metric_event_pop_batch_size: i64,
    #[serde(default)]
    pub metric_event_pop_delay_ms: u64,
    pub check_interval_seconds: u64,
    pub lazy_triggers_check_interval_seconds: u64,
    pub nodata_check_interval_seconds: u64,
    pub stop_checking_interval_seconds: u64,
    #[serde(default = "default_cache_cleanup_interval")]
    pub cache_cleanup_interval_seconds: u64,
}

fn default_cache_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_remote_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
}

fn default_remote_check_interval() -> u64 {
    60
}

fn default_remote_timeout() -> u64 {
    60
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            check_interval_seconds: default_remote_check_interval(),
            timeout_seconds: default_remote_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    ///
    /// Parallelism and batch-size bounds are checked again by `CheckerConfig::resolve`
    /// at start, after CPU-count defaults are applied.
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.redis.connect_timeout_seconds == 0 {
            return Err("Redis connect_timeout_seconds must be greater than 0".to_string());
        }

        if self.checker.check_interval_seconds == 0 {
            return Err("Checker check_interval_seconds must be greater than 0".to_string());
        }
        if self.checker.nodata_check_interval_seconds == 0 {
            return Err("Checker nodata_check_interval_seconds must be greater than 0".to_string());
        }
        if self.checker.cache_cleanup_interval_seconds == 0 {
            return Err("Checker cache_cleanup_interval_seconds must be greater than 0".to_string());
        }
        if self.checker.metric_event_pop_batch_size < 0 {
            return Err("Checker metric_event_pop_batch_size cannot be negative".to_string());
        }

        if self.remote.enabled {
            if self.remote.url.is_empty() {
                return Err("Remote URL cannot be empty when remote is enabled".to_string());
            }
            if self.remote.check_interval_seconds == 0 {
                return Err("Remote check_interval_seconds must be greater than 0".to_string());
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                connect_timeout_seconds: default_redis_connect_timeout(),
            },
            checker: CheckerSettings {
                max_parallel_checks: 0,
                max_parallel_remote_checks: 0,
                metric_event_pop_batch_size: 100,
                metric_event_pop_delay_ms: 0,
                check_interval_seconds: 10,
                lazy_triggers_check_interval_seconds: 600,
                nodata_check_interval_seconds: 60,
                stop_checking_interval_seconds: 30,
                cache_cleanup_interval_seconds: default_cache_cleanup_interval(),
            },
            remote: RemoteSettings::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_redis_url() {
        let mut settings = Settings::default();
        settings.redis.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_negative_batch_size() {
        let mut settings = Settings::default();
        settings.checker.metric_event_pop_batch_size = -1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_enabled_remote_without_url() {
        let mut settings = Settings::default();
        settings.remote.enabled = true;
        settings.remote.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[redis]
url = "redis://cache:6379"

[checker]
max_parallel_checks = 16
metric_event_pop_batch_size = 50
check_interval_seconds = 5
lazy_triggers_check_interval_seconds = 300
nodata_check_interval_seconds = 60
stop_checking_interval_seconds = 30

[observability]
log_level = "debug"
metrics_port = 9191
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.redis.url, "redis://cache:6379");
        assert_eq!(settings.redis.connect_timeout_seconds, 5);
        assert_eq!(settings.checker.max_parallel_checks, 16);
        assert_eq!(settings.checker.max_parallel_remote_checks, 0);
        assert_eq!(settings.checker.metric_event_pop_batch_size, 50);
        assert_eq!(settings.checker.cache_cleanup_interval_seconds, 3600);
        assert!(!settings.remote.enabled);
        assert!(settings.validate().is_ok());
    }
}
