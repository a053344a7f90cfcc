//! Database builder for fluent configuration
//!
//! Provides a builder pattern for attaching replication collaborators and
//! choosing a sync policy before opening.

use std::path::PathBuf;
use std::sync::Arc;
use velocity_core::{Error, Result};

use super::{Collaborators, Database};
use crate::collaborators::{EventualDatabase, QuorumDatabase, RaftDatabase};
use crate::config::VelocityConfig;

/// Builder for Database configuration
///
/// The builder requires either a path or an explicit `.ephemeral()`.
///
/// ```ignore
/// use velocity_engine::Database;
///
/// let db = Database::builder()
///     .path("/data/velocity")
///     .quorum(quorum)
///     .eventual(replicator)
///     .strict()
///     .open()?;
/// ```
///
/// Without `.config()`, settings come from `velocity.toml` in the data
/// directory. An explicit config is written back to that file.
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    ephemeral: bool,
    config: Option<VelocityConfig>,
    /// Overrides `storage.sync_writes`
    sync_writes: Option<bool>,
    collaborators: Collaborators,
}

impl DatabaseBuilder {
    /// Create new builder with defaults
    pub fn new() -> Self {
        Self {
            path: None,
            ephemeral: false,
            config: None,
            sync_writes: None,
            collaborators: Collaborators::default(),
        }
    }

    /// Set database path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Keep everything in memory; any path is ignored
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Use `config` instead of the file in the data directory
    pub fn config(mut self, config: VelocityConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// fsync every commit (default). Zero data loss on crash.
    pub fn strict(mut self) -> Self {
        self.sync_writes = Some(true);
        self
    }

    /// Commit without fsync
    ///
    /// Writes are visible as soon as they commit, but a crash of any kind
    /// (process or power) rolls the store back to the last fsynced commit.
    /// Closing the database cleanly makes every commit durable.
    pub fn buffered(mut self) -> Self {
        self.sync_writes = Some(false);
        self
    }

    /// Consensus collaborator serving the Strong level
    pub fn raft(mut self, raft: Arc<dyn RaftDatabase>) -> Self {
        self.collaborators.raft = Some(raft);
        self
    }

    /// Quorum collaborator serving the Quorum level
    pub fn quorum(mut self, quorum: Arc<dyn QuorumDatabase>) -> Self {
        self.collaborators.quorum = Some(quorum);
        self
    }

    /// Replication collaborator serving the Eventual level
    pub fn eventual(mut self, eventual: Arc<dyn EventualDatabase>) -> Self {
        self.collaborators.eventual = Some(eventual);
        self
    }

    /// Open the database
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Neither a path nor `.ephemeral()` was configured
    /// - The configuration is invalid
    /// - Directory creation or the durable store fails to open
    pub fn open(self) -> Result<Arc<Database>> {
        if self.ephemeral {
            let mut config = self.config.unwrap_or_else(VelocityConfig::in_memory);
            if let Some(sync) = self.sync_writes {
                config.storage.sync_writes = sync;
            }
            config.validate()?;
            return Database::assemble(None, config, self.collaborators);
        }

        let path = self.path.ok_or_else(|| {
            Error::Config(
                "DatabaseBuilder::open() requires a path. Use .ephemeral() for testing."
                    .to_string(),
            )
        })?;

        match self.config {
            Some(mut config) => {
                if let Some(sync) = self.sync_writes {
                    config.storage.sync_writes = sync;
                }
                Database::open_at(&path, config, self.collaborators)
            }
            None => {
                let mut config = Database::load_config(&path)?;
                if let Some(sync) = self.sync_writes {
                    config.storage.sync_writes = sync;
                }
                Database::assemble(Some(path), config, self.collaborators)
            }
        }
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
