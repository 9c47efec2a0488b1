//! Typed configuration.
//!
//! [`Config`] carries process-level settings from environment variables.
//! [`WorkloadConfig`] carries the workload's tuning knobs, loaded from an
//! optional TOML file and overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Directory the workload keeps its queue in.
    pub workload_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let workload_dir = std::env::var("ORPHANQ_DIR").unwrap_or_else(|_| "workload_dir".to_string());
        if workload_dir.trim().is_empty() {
            return Err(Error::Config("ORPHANQ_DIR must not be empty".to_string()));
        }
        Ok(Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            workload_dir: PathBuf::from(workload_dir),
        })
    }
}

/// Workload tuning. Every field is independent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Number of times to open and close the queue.
    pub restarts: usize,
    /// Number of consumer iterations per restart.
    pub reads: usize,
    /// Number of concurrent producers per restart.
    pub writes: usize,
    /// Probability of leaving a peeked item in the queue.
    pub probability: f64,
    /// Consumer back-off when the queue is observed empty.
    pub empty_backoff_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            restarts: 5,
            reads: 20,
            writes: 5,
            probability: 0.25,
            empty_backoff_ms: 1,
        }
    }
}

impl WorkloadConfig {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject settings the workload cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(Error::Config(format!(
                "probability must be within [0, 1], got {}",
                self.probability
            )));
        }
        Ok(())
    }

    pub fn empty_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_backoff_ms)
    }
}
