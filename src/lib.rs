//! VelocityDB - embedded document database with per-call consistency routing
//!
//! VelocityDB stores schema-checked documents in named collections and offers
//! compare-and-swap at document or field granularity. Every write and read
//! can pick a consistency level; levels backed by replication are served by
//! collaborators supplied at open time.
//!
//! # Quick Start
//!
//! ```ignore
//! use velocitydb::{CasOperation, ConsistencyLevel, Database, Document, Fields};
//!
//! let db = Database::open("/data/velocity")?;
//!
//! db.router().insert_at(
//!     "users",
//!     Document::new("u1", Fields::new()).with_field("age", 30),
//!     ConsistencyLevel::Local,
//! )?;
//!
//! let result = db
//!     .cas()
//!     .compare_and_swap(&CasOperation::field("users", "u1", "age", 31).expecting(30))?;
//! assert!(result.success);
//! ```
//!
//! # Architecture
//!
//! - [`velocity_core`]: values, documents, schemas, errors and the
//!   [`LocalDatabase`] contract
//! - [`velocity_storage`]: the durable storage engine
//! - [`velocity_concurrency`]: the CAS engine
//! - [`velocity_engine`]: the consistency router and the [`Database`] facade

pub use velocity_concurrency::{
    BatchCasError, CasEngine, CasFailure, CasOperation, CasResult, KeyLocks,
};
pub use velocity_core::{
    ConsistencyLevel, Document, Error, Field, FieldType, Fields, LocalDatabase, Number, Result,
    Schema, ValidationError, Value,
};
pub use velocity_engine::{
    Database, DatabaseBuilder, DatabaseRouter, DatabaseRouterBuilder, EventualDatabase,
    Operation, OperationType, QuorumDatabase, RaftDatabase, ReplicationStatus, RouterConfig,
    VelocityConfig, CONFIG_FILE_NAME,
};
pub use velocity_storage::{
    CacheStats, CollectionMetadata, StorageConfig, StorageEngine, DATA_FILE_NAME,
};
