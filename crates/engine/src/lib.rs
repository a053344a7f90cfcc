//! Database engine for VelocityDB
//!
//! This crate orchestrates the lower layers:
//! - Database: main struct with open/close, wiring storage, CAS and routing
//! - Consistency routing across local, eventual, quorum and strong backends
//! - Replication collaborator traits implemented outside this crate
//! - `velocity.toml` configuration
//!
//! The engine is the only component that knows about collaborators; the
//! storage and CAS layers see a single [`LocalDatabase`].
//!
//! [`LocalDatabase`]: velocity_core::LocalDatabase

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collaborators;
pub mod config;
pub mod database;
pub mod router;

pub use collaborators::{
    EventualDatabase, Operation, OperationType, QuorumDatabase, RaftDatabase, ReplicationStatus,
};
pub use config::{RouterConfig, VelocityConfig, CONFIG_FILE_NAME};
pub use database::{Database, DatabaseBuilder};
pub use router::{DatabaseRouter, DatabaseRouterBuilder};
