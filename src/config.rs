use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the postpulse engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Directory containing wal.log and state.json. Created if absent.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Size-based flush trigger; also the maximum events drained per
    /// batch. Default: 1000.
    #[serde(default = "default_flush_event_count")]
    pub flush_event_count: usize,

    /// Time-based flush trigger; also the worker's maximum idle wait.
    /// Default: 30s.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// How often to report ingest counters. Default: 60s.
    #[serde(default = "default_ingest_report_interval", with = "humantime_serde")]
    pub ingest_report_interval: Duration,

    /// Inbound event receiver configuration.
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

/// Inbound event receiver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Enable the TCP receiver. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address for newline-delimited JSON events.
    /// Default: "127.0.0.1:5555".
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./postpulse-data")
}

fn default_flush_event_count() -> usize {
    1000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_ingest_report_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "127.0.0.1:5555".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            flush_event_count: default_flush_event_count(),
            flush_interval: default_flush_interval(),
            ingest_report_interval: default_ingest_report_interval(),
            receiver: ReceiverConfig::default(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_listen_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.flush_event_count == 0 {
            bail!("flush_event_count must be positive");
        }

        if self.flush_interval.is_zero() {
            bail!("flush_interval must be non-zero");
        }

        if self.receiver.enabled && self.receiver.listen_addr.is_empty() {
            bail!("receiver.listen_addr is required when the receiver is enabled");
        }

        Ok(())
    }
}
