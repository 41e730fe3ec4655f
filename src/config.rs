//! Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the submission/status API listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

fn default_port() -> u16 {
    8081
}

fn default_db_path() -> PathBuf {
    PathBuf::from("taskqd.db")
}

/// Coordinator timing and capacity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Worker identity this coordinator claims leases under.
    /// A fresh UUID per process if not set.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Period of the scan loop.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// How long a lease lives without renewal.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Missed-lease budget before a task is permanently failed.
    #[serde(default = "default_max_misses")]
    pub max_misses: i32,

    /// Maximum tasks claimed per scan tick.
    #[serde(default = "default_claim_batch")]
    pub claim_batch: i64,

    /// Grace period for in-flight dispatches at shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Upper bound on concurrently executing dispatches.
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            scan_interval_ms: default_scan_interval_ms(),
            lease_ttl_ms: default_lease_ttl_ms(),
            max_misses: default_max_misses(),
            claim_batch: default_claim_batch(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
        }
    }
}

impl CoordinatorConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// How often a dispatch renews its lease. Must be shorter than the
    /// TTL so a healthy worker never loses its lease to the sweeper.
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis((self.lease_ttl_ms / 3).max(1))
    }
}

fn default_worker_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn default_scan_interval_ms() -> u64 {
    10_000
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_max_misses() -> i32 {
    3
}

fn default_claim_batch() -> i64 {
    32
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_max_concurrent_dispatches() -> usize {
    16
}

/// Retry policy for opening the task store at startup.
///
/// Injectable so tests can run it with near-zero delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Jitter range in milliseconds (0 disables jitter).
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: 0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given (1-based) retry attempt.
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        crate::db::jittered(Duration::from_millis(self.base_delay_ms), self.jitter_ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5_000
}
