//! Application configuration loaded from environment variables.

use std::time::Duration;

use jobs::JobError;
use thiserror::Error;

/// A configuration value the services cannot run with.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A duration too large for timestamp arithmetic.
    #[error("{name} out of range: {seconds}s")]
    DurationOutOfRange { name: &'static str, seconds: u64 },
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `RESERVATION_TTL_SECS`: default hold lifetime (default: `900`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period (default: `60`)
/// - `WORKER_POLL_INTERVAL_MS`: idle worker poll period (default: `1000`)
/// - `JOB_VISIBILITY_TIMEOUT_SECS`: active job timeout (default: `300`)
/// - `JOB_MAX_ATTEMPTS`: delivery attempts per job (default: `3`)
/// - `JOB_BACKOFF_INITIAL_MS`: delay after the first failure (default: `1000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub worker_poll_interval: Duration,
    pub job_visibility_timeout: Duration,
    pub job_max_attempts: u32,
    pub job_backoff_initial: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Unparseable numeric values fall back to their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            reservation_ttl: env_parse("RESERVATION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_ttl),
            sweep_interval: env_parse("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            worker_poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.worker_poll_interval),
            job_visibility_timeout: env_parse("JOB_VISIBILITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_visibility_timeout),
            job_max_attempts: env_parse("JOB_MAX_ATTEMPTS")
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.job_max_attempts),
            job_backoff_initial: env_parse("JOB_BACKOFF_INITIAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.job_backoff_initial),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            reservation_ttl: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
            worker_poll_interval: Duration::from_millis(1000),
            job_visibility_timeout: Duration::from_secs(300),
            job_max_attempts: 3,
            job_backoff_initial: Duration::from_millis(1000),
        }
    }
}
