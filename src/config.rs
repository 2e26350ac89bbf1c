use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (durability comes from snapshots only)
    #[default]
    Memory,

    /// SQLite database
    Sqlite {
        /// `sqlite://` URL or plain path to the database file
        dsn: String,
    },
}

/// Snapshot manager configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct SnapshotConfig {
    /// Time between two snapshots (seconds in the config file)
    #[serde(default = "default_interval", with = "duration_secs")]
    pub interval: Duration,

    /// Snapshot file location
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,

    /// Load the snapshot file into the store on startup
    #[serde(default = "default_restore")]
    pub restore: bool,

    /// Consecutive write failures tolerated before giving up
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    /// Upper bound for the final save on shutdown (seconds in the config file)
    #[serde(default = "default_shutdown_timeout", with = "duration_secs")]
    pub shutdown_timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            path: default_snapshot_path(),
            restore: default_restore(),
            max_errors: default_max_errors(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/tmp/metrics-db.json")
}

fn default_restore() -> bool {
    true
}

fn default_max_errors() -> usize {
    1000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to in-memory)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Reject settings the runtime cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.snapshot.interval.is_zero() {
            anyhow::bail!("snapshot interval must be greater than zero");
        }

        if let StorageConfig::Sqlite { dsn } = &self.storage {
            if dsn.trim().is_empty() {
                anyhow::bail!("sqlite backend requires a non-empty dsn");
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
