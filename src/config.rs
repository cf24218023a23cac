//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{DaemonError, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub producers: ProducerConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server and session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: String,

    /// Maximum concurrent stream sessions.
    pub max_sessions: usize,

    /// Timeout for individual frame writes (seconds).
    pub write_timeout_secs: u64,

    /// Idle time before a keepalive comment is sent (seconds, 0 disables).
    pub keepalive_interval_secs: u64,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            max_sessions: 10_000,
            write_timeout_secs: 30,
            keepalive_interval_secs: 15,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0)
            .then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Pacing and defaults for the built-in producers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Heartbeat period (milliseconds).
    pub heartbeat_interval_ms: u64,

    /// Beats before the heartbeat completes (0 = unlimited).
    pub heartbeat_limit: u64,

    /// Heartbeat message text.
    pub heartbeat_message: String,

    /// Delay between simulated LLM tokens (milliseconds).
    pub token_interval_ms: u64,

    /// Default step count for progress streams.
    pub progress_steps: u32,

    /// Delay between progress updates (milliseconds).
    pub progress_interval_ms: u64,

    /// Delay between echo chunks (milliseconds).
    pub echo_delay_ms: u64,

    /// Default words per echo chunk.
    pub echo_chunk_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2000,
            heartbeat_limit: 0,
            heartbeat_message: "Server heartbeat".to_string(),
            token_interval_ms: 100,
            progress_steps: 20,
            progress_interval_ms: 500,
            echo_delay_ms: 200,
            echo_chunk_size: 1,
        }
    }
}

impl ProducerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn token_interval(&self) -> Duration {
        Duration::from_millis(self.token_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn echo_delay(&self) -> Duration {
        Duration::from_millis(self.echo_delay_ms)
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DaemonError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let max_sessions = self.server.max_sessions;
        if max_sessions == 0 || max_sessions > Semaphore::MAX_PERMITS {
            return Err(DaemonError::Config(format!(
                "max_sessions must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                max_sessions
            )));
        }
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_into<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
            if let Some(parsed) = value.and_then(|v| v.parse().ok()) {
                *target = parsed;
            }
        }

        // Server overrides; PORT is the platform convention, SSE_LISTEN_ADDR wins
        if let Some(port) = lookup("PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.listen_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(v) = lookup("SSE_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        parse_into(lookup("SSE_MAX_SESSIONS"), &mut self.server.max_sessions);
        parse_into(lookup("SSE_WRITE_TIMEOUT"), &mut self.server.write_timeout_secs);
        parse_into(
            lookup("SSE_KEEPALIVE_INTERVAL"),
            &mut self.server.keepalive_interval_secs,
        );
        parse_into(
            lookup("SSE_SHUTDOWN_TIMEOUT"),
            &mut self.server.shutdown_timeout_secs,
        );

        // Producer overrides
        parse_into(
            lookup("SSE_HEARTBEAT_INTERVAL_MS"),
            &mut self.producers.heartbeat_interval_ms,
        );
        parse_into(
            lookup("SSE_TOKEN_INTERVAL_MS"),
            &mut self.producers.token_interval_ms,
        );
        parse_into(lookup("SSE_PROGRESS_STEPS"), &mut self.producers.progress_steps);

        // Metrics overrides
        if let Some(v) = lookup("SSE_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("SSE_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging overrides
        if let Some(v) = lookup("SSE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("SSE_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
