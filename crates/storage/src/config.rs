//! Storage engine configuration
//!
//! Loaded as the `[storage]` section of `velocity.toml`; every key is
//! optional and falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// File name of the durable store inside `data_dir`
pub const DATA_FILE_NAME: &str = "velocity.redb";

/// Storage engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the durable store. Ignored when `in_memory`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Keep everything in memory (nothing survives the process)
    pub in_memory: bool,
    /// Maximum number of cached documents; 0 disables the read cache
    pub cache_capacity: usize,
    /// Page cache of the durable engine, in MiB
    pub cache_size_mb: usize,
    /// fsync every commit
    pub sync_writes: bool,
    /// Record TTL applied on every insert and update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Interval between background reclamation passes
    pub reclaim_interval_ms: u64,
    /// Expired records removed per write transaction
    pub reclaim_batch_size: usize,
    /// Compact the durable store when the engine closes
    pub compact_on_close: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            in_memory: false,
            cache_capacity: 10_000,
            cache_size_mb: 64,
            sync_writes: true,
            ttl_secs: None,
            reclaim_interval_ms: 5 * 60 * 1000,
            reclaim_batch_size: 256,
            compact_on_close: true,
        }
    }
}

impl StorageConfig {
    /// In-memory configuration
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    /// On-disk configuration rooted at `dir`
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Record TTL, if configured
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Interval between reclamation passes
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    /// Path of the durable store, if on disk
    pub fn data_file(&self) -> Option<PathBuf> {
        if self.in_memory {
            return None;
        }
        self.data_dir.as_ref().map(|dir| dir.join(DATA_FILE_NAME))
    }
}
