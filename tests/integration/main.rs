//! Integration Tests
//!
//! Cross-layer tests through the `Database` facade:
//! - Scenario: schema-checked insert followed by field-level CAS
//! - Properties: round trip, version monotonicity, drop completeness, schemas
//! - Lifecycle: reopen, configuration file, TTL, close

#[path = "../common/mod.rs"]
mod common;

mod lifecycle;
mod properties;
mod scenario;
