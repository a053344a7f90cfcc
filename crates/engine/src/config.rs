//! Database configuration via `velocity.toml`
//!
//! On first open a commented default `velocity.toml` is written into the data
//! directory. To change settings, edit the file and restart.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;
use velocity_core::{ConsistencyLevel, Error, Result};
use velocity_storage::StorageConfig;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "velocity.toml";

/// Consistency router settings (`[router]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Level used by the `LocalDatabase` surface of the router
    pub default_consistency: ConsistencyLevel,
    /// Replicas that must answer a quorum read or write
    pub quorum_size: usize,
    /// Replicas holding each document
    pub replication_factor: usize,
    /// Delay budget for eventual replication, in milliseconds
    pub eventual_sync_delay_ms: u64,
    /// How long a strong write waits for its log entry to apply
    pub apply_timeout_ms: u64,
    /// Identity stamped on every replicated operation
    pub node_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_consistency: ConsistencyLevel::Local,
            quorum_size: 3,
            replication_factor: 3,
            eventual_sync_delay_ms: 100,
            apply_timeout_ms: 5000,
            node_id: Uuid::new_v4().to_string(),
        }
    }
}

impl RouterConfig {
    /// Eventual replication delay budget
    pub fn eventual_sync_delay(&self) -> Duration {
        Duration::from_millis(self.eventual_sync_delay_ms)
    }

    /// Strong write apply timeout
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }

    /// Reject settings no quorum protocol can satisfy
    ///
    /// # Errors
    ///
    /// `Config` if a size is zero or the quorum exceeds the replica count.
    pub fn validate(&self) -> Result<()> {
        if self.quorum_size == 0 {
            return Err(Error::Config("quorum_size must be at least 1".to_string()));
        }
        if self.replication_factor == 0 {
            return Err(Error::Config(
                "replication_factor must be at least 1".to_string(),
            ));
        }
        if self.quorum_size > self.replication_factor {
            return Err(Error::Config(format!(
                "quorum_size ({}) exceeds replication_factor ({})",
                self.quorum_size, self.replication_factor
            )));
        }
        if self.node_id.is_empty() {
            return Err(Error::Config("node_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Database configuration loaded from `velocity.toml`.
///
/// # Example
///
/// ```toml
/// [storage]
/// cache_capacity = 10000
/// sync_writes = true
///
/// [router]
/// default_consistency = "local"
/// quorum_size = 3
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Storage engine settings
    pub storage: StorageConfig,
    /// Consistency router settings
    pub router: RouterConfig,
}

impl VelocityConfig {
    /// In-memory configuration with default settings
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::in_memory(),
            ..Self::default()
        }
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.router.validate()
    }

    /// Returns the default config file content with comments.
    ///
    /// `node_id` is left out so each database generates its own on load.
    pub fn default_toml() -> &'static str {
        r#"# VelocityDB configuration

[storage]
# Documents kept in the read cache (0 disables the cache)
cache_capacity = 10000
# Page cache of the durable store, in MiB
cache_size_mb = 64
# fsync every commit
sync_writes = true
# Record TTL in seconds, applied on every insert and update
# ttl_secs = 3600
# Background reclamation of expired records
reclaim_interval_ms = 300000
reclaim_batch_size = 256
# Compaction blocks every other call, so it only runs at close
compact_on_close = true

[router]
# "local", "eventual", "quorum" or "strong"
default_consistency = "local"
quorum_size = 3
replication_factor = 3
eventual_sync_delay_ms = 100
apply_timeout_ms = 5000
# node_id = "node-1"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: VelocityConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
