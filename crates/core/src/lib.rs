//! Core types and traits for velocitydb
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: tagged value enum for dynamically-typed fields
//! - Document / Fields: the atomic storage unit
//! - Schema / Field / FieldType: the schema engine
//! - ConsistencyLevel: per-call consistency selector
//! - Error: error type hierarchy
//! - LocalDatabase: the uniform CRUD contract

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consistency;
pub mod document;
pub mod error;
pub mod schema;
pub mod traits;
pub mod value;

pub use consistency::ConsistencyLevel;
pub use document::{Document, Fields};
pub use error::{Error, Result};
pub use schema::{Field, FieldType, Schema, ValidationError};
pub use traits::LocalDatabase;
pub use value::{Number, Value};
