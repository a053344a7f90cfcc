//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

pub use velocitydb::{
    ConsistencyLevel, Database, Document, Error, Field, FieldType, Fields, Schema, Value,
    VelocityConfig,
};
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (`RUST_LOG`-free).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// TestDb
// ============================================================================

/// On-disk database in a temporary directory.
pub struct TestDb {
    pub db: Arc<Database>,
    pub dir: TempDir,
}

impl TestDb {
    /// Database with the default `velocity.toml`, reclaimer disabled.
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    /// Database opened with an explicit configuration.
    pub fn with_config(config: VelocityConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = Database::open_with_config(dir.path(), config)
            .expect("Failed to create test database");
        TestDb { db, dir }
    }

    pub fn db_path(&self) -> &Path {
        self.dir.path()
    }

    /// Close and reopen from the same directory (simulates restart).
    pub fn reopen(&mut self) {
        self.db.close().expect("close before reopen");
        self.db = Database::open(self.dir.path()).expect("Failed to reopen database");
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory database.
pub fn ephemeral_db() -> Arc<Database> {
    init_tracing();
    Database::builder()
        .ephemeral()
        .config(VelocityConfig {
            storage: velocitydb::StorageConfig {
                reclaim_interval_ms: 0,
                ..velocitydb::StorageConfig::in_memory()
            },
            ..VelocityConfig::in_memory()
        })
        .open()
        .expect("Failed to create test database")
}

/// Default config with the background reclaimer off.
pub fn quiet_config() -> VelocityConfig {
    let mut config = VelocityConfig::default();
    config.storage.reclaim_interval_ms = 0;
    config
}

// ============================================================================
// Fixtures
// ============================================================================

/// `users` schema: `name: String` and `age: Int` required.
pub fn users_schema() -> Schema {
    Schema::new("users")
        .with_field(Field::new("name", FieldType::String).required())
        .with_field(Field::new("age", FieldType::Int).required())
        .with_field(Field::new("email", FieldType::String).indexed().unique())
        .with_field(Field::new("active", FieldType::Bool).with_default(true))
}

pub fn user(id: &str, name: &str, age: i64) -> Document {
    Document::new(id, Fields::new())
        .with_field("name", name)
        .with_field("age", age)
}

/// Validate against the collection's schema, then insert locally.
pub fn insert_checked(db: &Database, collection: &str, doc: Document) -> velocitydb::Result<Document> {
    let schema = match db.storage().collection(collection) {
        Ok(metadata) => metadata.schema,
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let mut doc = doc;
    if let Some(schema) = &schema {
        doc.fields = schema.apply_defaults(&doc.fields);
        schema.validate(&doc.fields)?;
    }
    db.router().insert_at(collection, doc, ConsistencyLevel::Local)
}
