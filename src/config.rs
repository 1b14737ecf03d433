//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Service configuration, read from `PIPELINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Port for the REST / WebSocket server.
    pub http_port: u16,
    /// Whether the periodic repair sweep runs.
    pub repair_enabled: bool,
    /// Interval between repair sweeps.
    pub repair_interval: Duration,
    /// Maximum creators repaired concurrently during a sweep.
    pub repair_concurrency: usize,
    /// How long a mutation waits for the per-creator lock.
    pub lock_timeout: Duration,
    /// Seed the default catalog when the catalog is empty.
    pub seed_catalog: bool,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/creator-pipeline.db"),
            http_port: 8080,
            repair_enabled: true,
            repair_interval: Duration::from_secs(3600), // 1 hour
            repair_concurrency: 4,
            lock_timeout: Duration::from_millis(2000),
            seed_catalog: true,
            log_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Build from the environment, falling back to defaults for unset or
    /// unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_path = std::env::var("PIPELINE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let http_port: u16 = std::env::var("PIPELINE_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port);

        let repair_enabled = std::env::var("PIPELINE_REPAIR_ENABLED")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.repair_enabled);

        let repair_interval = std::env::var("PIPELINE_REPAIR_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.repair_interval);

        let repair_concurrency: usize = std::env::var("PIPELINE_REPAIR_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.repair_concurrency);

        let lock_timeout = std::env::var("PIPELINE_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        let seed_catalog = std::env::var("PIPELINE_SEED_CATALOG")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.seed_catalog);

        let log_dir = std::env::var("PIPELINE_LOG_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            db_path,
            http_port,
            repair_enabled,
            repair_interval,
            repair_concurrency,
            lock_timeout,
            seed_catalog,
            log_dir,
        }
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == 0 {
            return Err(invalid("PIPELINE_HTTP_PORT", "port must be non-zero"));
        }
        if self.repair_interval.is_zero() {
            return Err(invalid(
                "PIPELINE_REPAIR_INTERVAL_SECS",
                "interval must be at least one second",
            ));
        }
        if self.repair_concurrency == 0 {
            return Err(invalid(
                "PIPELINE_REPAIR_CONCURRENCY",
                "concurrency must be at least 1",
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(invalid("PIPELINE_LOCK_TIMEOUT_MS", "timeout must be non-zero"));
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_port, 8080);
        assert!(config.repair_enabled);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = PipelineConfig {
            repair_concurrency: 0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PIPELINE_REPAIR_CONCURRENCY"));
    }

    #[test]
    fn zero_interval_rejected() {
        let config = PipelineConfig {
            repair_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }
}
