//! Concurrency layer for VelocityDB
//!
//! This crate implements optimistic concurrency control via compare-and-swap:
//! - CasOperation / CasResult: request and outcome of one CAS
//! - CasEngine: document- or field-level CAS over any `LocalDatabase`
//! - BatchCAS: ordered multi-operation CAS, stopping at the first failure
//! - KeyLocks: striped per-document locks serializing CAS callers
//!
//! A failed comparison is data, not an error: it comes back as a
//! `CasResult` with `success == false` and the stored value attached.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod locks;
pub mod operation;

pub use engine::{BatchCasError, CasEngine};
pub use locks::{KeyLocks, DEFAULT_STRIPES};
pub use operation::{CasFailure, CasOperation, CasResult};
