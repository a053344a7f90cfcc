//! Error types for velocitydb
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::consistency::ConsistencyLevel;
use crate::schema::ValidationError;
use crate::value::Value;

/// Result type alias for velocitydb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for velocitydb
#[derive(Debug, Error)]
pub enum Error {
    /// Document absent (or expired)
    #[error("document '{id}' not found in collection '{collection}'")]
    DocumentNotFound {
        /// Collection name
        collection: String,
        /// Document id
        id: String,
    },

    /// Collection absent
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// Duplicate document id
    #[error("document '{id}' already exists in collection '{collection}'")]
    DocumentExists {
        /// Collection name
        collection: String,
        /// Document id
        id: String,
    },

    /// Duplicate collection name
    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    /// Schema mismatch
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Expected value does not match current value
    #[error("CAS conflict: current version {version}, current value {}", DisplayOpt(.current))]
    CasConflict {
        /// Value actually stored
        current: Option<Value>,
        /// Version actually stored
        version: u64,
    },

    /// Value of the wrong shape for the requested write
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Requested level has no configured collaborator
    #[error("consistency level {level} is not supported: {reason}")]
    UnsupportedConsistency {
        /// Requested level
        level: ConsistencyLevel,
        /// What is missing
        reason: String,
    },

    /// Aggregated failures while shutting down several backing stores
    #[error("close errors: {}", join_errors(.0))]
    Close(Vec<Error>),

    /// Durable engine failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Replication collaborator failure
    #[error("Replication error: {0}")]
    Replication(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Engine used after close
    #[error("storage engine is closed")]
    Closed,
}

impl Error {
    /// Document-not-found error
    pub fn document_not_found(collection: &str, id: &str) -> Self {
        Error::DocumentNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Duplicate-document error
    pub fn document_exists(collection: &str, id: &str) -> Self {
        Error::DocumentExists {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Wrap a durable-engine error
    pub fn storage<E: fmt::Display>(err: E) -> Self {
        Error::Storage(err.to_string())
    }

    /// Wrap an encode/decode error
    pub fn serialization<E: fmt::Display>(err: E) -> Self {
        Error::Serialization(err.to_string())
    }

    /// Missing-collaborator error
    pub fn unsupported(level: ConsistencyLevel, reason: impl Into<String>) -> Self {
        Error::UnsupportedConsistency {
            level,
            reason: reason.into(),
        }
    }

    /// Document or collection absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DocumentNotFound { .. } | Error::CollectionNotFound(_)
        )
    }

    /// Duplicate document or collection
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::DocumentExists { .. } | Error::CollectionExists(_)
        )
    }
}

struct DisplayOpt<'a>(&'a Option<Value>);

impl fmt::Display for DisplayOpt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "<absent>"),
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
