//! Document: the atomic storage unit
//!
//! A document is an identifier plus an ordered field map, with a version
//! counter that starts at 1 on insert and grows by exactly 1 on every update.
//!
//! The persisted form is `{id, fields, version, created, modified}`; an
//! optional `expires_at` is written only when the record carries a TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::Value;

/// Ordered field map of a document
pub type Fields = BTreeMap<String, Value>;

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, unique within a collection. Empty means "assign one".
    pub id: String,
    /// Field values
    pub fields: Fields,
    /// Monotonic version, 1 after insert
    pub version: u64,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Expiry time, if the record has a TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Create an unsaved document
    ///
    /// Version and timestamps are placeholders until the storage engine
    /// assigns them on insert.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            fields,
            version: 0,
            created: now,
            modified: now,
            expires_at: None,
        }
    }

    /// Create an unsaved document with no identifier
    pub fn anonymous(fields: Fields) -> Self {
        Self::new(String::new(), fields)
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style expiry setter
    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Look up a field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether the record's TTL has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// The whole field map as an Object value
    pub fn fields_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Merge `fields` into this document
    ///
    /// Fields not mentioned are preserved. Does not touch version or
    /// timestamps.
    pub fn merge_fields(&mut self, fields: Fields) {
        self.fields.extend(fields);
    }
}
