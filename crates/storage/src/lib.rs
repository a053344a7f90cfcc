//! Storage layer for VelocityDB
//!
//! This crate implements the durable document store:
//! - StorageEngine: redb-backed collections and documents
//! - DocumentCache: bounded cache-aside read cache
//! - Reclaimer: background deletion of expired records
//! - StorageConfig: the `[storage]` configuration section
//!
//! # Example
//!
//! ```
//! use velocity_core::{Document, Fields};
//! use velocity_storage::StorageEngine;
//!
//! let engine = StorageEngine::in_memory()?;
//! let doc = engine.insert("users", Document::new("u1", Fields::new()).with_field("age", 30))?;
//! assert_eq!(doc.version, 1);
//! engine.close()?;
//! # Ok::<(), velocity_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod reclaimer;

pub use cache::{CacheStats, DocumentCache};
pub use config::{StorageConfig, DATA_FILE_NAME};
pub use engine::{CollectionMetadata, StorageEngine};
pub use reclaimer::Reclaimer;
