// src/config.rs

//! Loads and validates the process configuration.

use crate::core::database::DatabaseConnectionConfig;
use crate::core::strategy::RetryPolicy;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Settings for pooled Redis clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RedisClientsConfig {
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(default = "default_max_retries_per_request")]
    pub max_retries_per_request: u32,
    /// Clients unused for longer than this are disconnected by the idle sweep.
    #[serde(default = "default_max_idle_threshold", with = "humantime_serde")]
    pub max_idle_threshold: Duration,
    #[serde(default = "default_idle_sync_interval", with = "humantime_serde")]
    pub idle_sync_interval: Duration,
    /// Upper bound for creating a client when no cached one is usable.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for RedisClientsConfig {
    fn default() -> Self {
        Self {
            retry_times: default_retry_times(),
            retry_delay: default_retry_delay(),
            max_retries_per_request: default_max_retries_per_request(),
            max_idle_threshold: default_max_idle_threshold(),
            idle_sync_interval: default_idle_sync_interval(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl RedisClientsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_times, self.retry_delay)
    }
}

fn default_retry_times() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_max_retries_per_request() -> u32 {
    1
}
fn default_max_idle_threshold() -> Duration {
    Duration::from_secs(60 * 60)
}
fn default_idle_sync_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Settings for the monitor / profiler pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Quiet period after the last event before a batch is flushed.
    #[serde(default = "default_debounce_window", with = "humantime_serde")]
    pub debounce_window: Duration,
    /// A batch is flushed at most this long after its first event.
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,
    /// Events buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Where profiler log files are written.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_window: default_debounce_window(),
            max_wait: default_max_wait(),
            channel_capacity: default_channel_capacity(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_debounce_window() -> Duration {
    Duration::from_millis(10)
}
fn default_max_wait() -> Duration {
    Duration::from_millis(50)
}
fn default_channel_capacity() -> usize {
    10_000
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("profiler-logs")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub redis_clients: RedisClientsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub databases: Vec<DatabaseConnectionConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            redis_clients: RedisClientsConfig::default(),
            monitor: MonitorConfig::default(),
            databases: Vec::new(),
        }
    }
}

impl Config {
    /// Reads, parses and validates a TOML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let clients = &self.redis_clients;
        if clients.idle_sync_interval.is_zero() {
            return Err(anyhow!("redis_clients.idle_sync_interval cannot be 0"));
        }
        if clients.max_idle_threshold.is_zero() {
            return Err(anyhow!("redis_clients.max_idle_threshold cannot be 0"));
        }
        if clients.connect_timeout.is_zero() {
            return Err(anyhow!("redis_clients.connect_timeout cannot be 0"));
        }
        if clients.retry_times > 0 && clients.retry_delay.is_zero() {
            warn!("redis_clients.retry_delay is 0; reconnects will not back off");
        }

        let monitor = &self.monitor;
        if monitor.debounce_window.is_zero() {
            return Err(anyhow!("monitor.debounce_window cannot be 0"));
        }
        if monitor.max_wait < monitor.debounce_window {
            return Err(anyhow!(
                "monitor.max_wait ({:?}) must not be shorter than monitor.debounce_window ({:?})",
                monitor.max_wait,
                monitor.debounce_window
            ));
        }
        if monitor.channel_capacity == 0 {
            return Err(anyhow!("monitor.channel_capacity cannot be 0"));
        }

        let mut seen = HashSet::new();
        for database in &self.databases {
            if database.id.trim().is_empty() {
                return Err(anyhow!("database id cannot be empty"));
            }
            if !seen.insert(database.id.as_str()) {
                return Err(anyhow!("duplicate database id '{}'", database.id));
            }
            if database.port == 0 {
                return Err(anyhow!("database '{}' has port 0", database.id));
            }
        }
        Ok(())
    }
}
