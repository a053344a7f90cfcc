//! Database struct and open/close logic
//!
//! This module provides the main Database struct that wires together:
//! - Configuration loading from `velocity.toml`
//! - The storage engine (durable or in-memory)
//! - The CAS engine over the storage engine
//! - The consistency router over the storage engine and any collaborators
//!
//! ## Three Ways to Open a Database
//!
//! ```ignore
//! use velocity_engine::Database;
//!
//! // 1. Simple open; writes a default velocity.toml on first use
//! let db = Database::open("/data/velocity")?;
//!
//! // 2. Builder for collaborators and sync policy
//! let db = Database::builder()
//!     .path("/data/velocity")
//!     .raft(raft)
//!     .buffered()
//!     .open()?;
//!
//! // 3. Ephemeral (no files, testing)
//! let db = Database::ephemeral()?;
//! ```

mod builder;

pub use builder::DatabaseBuilder;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use velocity_concurrency::CasEngine;
use velocity_core::{LocalDatabase, Result};
use velocity_storage::StorageEngine;

use crate::collaborators::{EventualDatabase, QuorumDatabase, RaftDatabase};
use crate::config::{VelocityConfig, CONFIG_FILE_NAME};
use crate::router::DatabaseRouter;

/// Collaborators handed to the router at open
#[derive(Default)]
pub(crate) struct Collaborators {
    pub(crate) raft: Option<Arc<dyn RaftDatabase>>,
    pub(crate) quorum: Option<Arc<dyn QuorumDatabase>>,
    pub(crate) eventual: Option<Arc<dyn EventualDatabase>>,
}

/// An open VelocityDB instance
pub struct Database {
    data_dir: Option<PathBuf>,
    config: VelocityConfig,
    storage: Arc<StorageEngine>,
    cas: CasEngine,
    router: DatabaseRouter,
}

impl Database {
    /// Open (or create) the database in `path`
    ///
    /// Creates the directory, writes a default `velocity.toml` if none
    /// exists, then loads it.
    ///
    /// # Errors
    ///
    /// `Io` if the directory cannot be created, `Config` if the file is
    /// unreadable or invalid, `Storage` if the durable store fails to open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        let config = Self::load_config(&data_dir)?;
        Self::assemble(Some(data_dir), config, Collaborators::default())
    }

    /// Open the database in `path` with an explicit configuration.
    ///
    /// The supplied config is written to `velocity.toml` so that later
    /// `Database::open()` calls pick up the same settings.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: VelocityConfig) -> Result<Arc<Self>> {
        Self::open_at(path.as_ref(), config, Collaborators::default())
    }

    /// Open an in-memory database with default settings
    pub fn ephemeral() -> Result<Arc<Self>> {
        Self::assemble(None, VelocityConfig::in_memory(), Collaborators::default())
    }

    /// Start a builder
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Create `dir` and load its `velocity.toml`, writing the default first
    pub(crate) fn load_config(dir: &Path) -> Result<VelocityConfig> {
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        VelocityConfig::write_default_if_missing(&config_path)?;
        VelocityConfig::from_file(&config_path)
    }

    pub(crate) fn open_at(
        path: &Path,
        config: VelocityConfig,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        std::fs::create_dir_all(path)?;

        // The file stays portable: data_dir is implied by its location
        let mut persisted = config.clone();
        persisted.storage.data_dir = None;
        persisted.storage.in_memory = false;
        persisted.write_to_file(&path.join(CONFIG_FILE_NAME))?;

        Self::assemble(Some(path.to_path_buf()), config, collaborators)
    }

    pub(crate) fn assemble(
        data_dir: Option<PathBuf>,
        mut config: VelocityConfig,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        match &data_dir {
            Some(dir) => {
                config.storage.data_dir = Some(dir.clone());
                config.storage.in_memory = false;
            }
            None => config.storage.in_memory = true,
        }

        let storage = StorageEngine::open(config.storage.clone())?;
        let local: Arc<dyn LocalDatabase> = storage.clone();

        let mut router = DatabaseRouter::builder(Arc::clone(&local)).config(config.router.clone());
        if let Some(raft) = collaborators.raft {
            router = router.raft(raft);
        }
        if let Some(quorum) = collaborators.quorum {
            router = router.quorum(quorum);
        }
        if let Some(eventual) = collaborators.eventual {
            router = router.eventual(eventual);
        }
        let router = match router.build() {
            Ok(router) => router,
            Err(e) => {
                storage.close()?;
                return Err(e);
            }
        };

        info!(
            target: "velocity::db",
            data_dir = ?data_dir,
            node_id = %config.router.node_id,
            default_consistency = %config.router.default_consistency,
            "Database opened"
        );

        Ok(Arc::new(Self {
            data_dir,
            config,
            storage,
            cas: CasEngine::new(local),
            router,
        }))
    }

    /// Data directory (`None` when ephemeral)
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Whether nothing is written to disk
    pub fn is_ephemeral(&self) -> bool {
        self.data_dir.is_none()
    }

    /// Effective configuration
    pub fn config(&self) -> &VelocityConfig {
        &self.config
    }

    /// The storage engine (Local level)
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// The CAS engine over the storage engine
    pub fn cas(&self) -> &CasEngine {
        &self.cas
    }

    /// The consistency router
    pub fn router(&self) -> &DatabaseRouter {
        &self.router
    }

    /// Close the storage engine and every collaborator
    ///
    /// Idempotent for the storage engine; collaborator close semantics are
    /// their own.
    pub fn close(&self) -> Result<()> {
        let result = self.router.close();
        info!(target: "velocity::db", ok = result.is_ok(), "Database closed");
        result
    }
}
