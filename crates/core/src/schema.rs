//! Schema engine
//!
//! A [`Schema`] declares, per collection, an ordered list of [`Field`]
//! definitions. Schemas are additive: fields a schema does not mention are
//! always allowed, so documents can grow ahead of the schema.
//!
//! Validation rules:
//! - A `required` field must be present and non-null.
//! - Numeric fields accept any numeric representation. An `Int` field also
//!   accepts a float with no fractional part, since decoders often hand back
//!   integers as f64.
//! - A `Time` field accepts a native timestamp or an RFC 3339 string.
//!
//! The engine is invoked by callers before a write; the storage engine never
//! calls it.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::document::Fields;
use crate::value::Value;

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Integer
    Int,
    /// Any number
    Float,
    /// Boolean
    Bool,
    /// Timestamp or RFC 3339 string
    Time,
    /// Array
    Array,
    /// Nested object
    Object,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Time => "time",
            FieldType::Array => "array",
            FieldType::Object => "object",
        };
        f.write_str(name)
    }
}

/// Schema validation failure; every variant names the offending field
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Required field absent
    #[error("required field '{field}' is missing")]
    MissingField {
        /// Field name
        field: String,
    },

    /// Required field present but null
    #[error("field '{field}': required field cannot be null")]
    NullField {
        /// Field name
        field: String,
    },

    /// Value of the wrong kind
    #[error("field '{field}': expected {expected}, got {found}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Declared type
        expected: FieldType,
        /// Type name of the supplied value
        found: &'static str,
    },

    /// Float with a fractional part supplied for an Int field
    #[error("field '{field}': expected integer, got float with fractional part ({value})")]
    FractionalInt {
        /// Field name
        field: String,
        /// Supplied value
        value: f64,
    },

    /// Time string that does not parse as RFC 3339
    #[error("field '{field}': expected RFC 3339 time, got '{value}': {reason}")]
    InvalidTime {
        /// Field name
        field: String,
        /// Supplied string
        value: String,
        /// Parser message
        reason: String,
    },
}

impl ValidationError {
    /// Name of the field that failed validation
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::NullField { field }
            | ValidationError::TypeMismatch { field, .. }
            | ValidationError::FractionalInt { field, .. }
            | ValidationError::InvalidTime { field, .. } => field,
        }
    }
}

/// One declared field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Must be present and non-null
    #[serde(default)]
    pub required: bool,
    /// Consumed by an index manager
    #[serde(default)]
    pub indexed: bool,
    /// Consumed by an index manager
    #[serde(default)]
    pub unique: bool,
    /// Filled in by [`Schema::apply_defaults`] when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Field {
    /// Optional, unindexed field with no default
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            indexed: false,
            unique: false,
            default: None,
        }
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as indexed
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Mark as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn check(&self, value: &Value) -> Result<(), ValidationError> {
        if value.is_null() {
            if self.required {
                return Err(ValidationError::NullField {
                    field: self.name.clone(),
                });
            }
            return Ok(());
        }

        let ok = match (self.field_type, value) {
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            (FieldType::Float, Value::Int(_) | Value::Float(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Int, Value::Float(f)) => {
                if f.is_finite() && f.fract() == 0.0 {
                    true
                } else {
                    return Err(ValidationError::FractionalInt {
                        field: self.name.clone(),
                        value: *f,
                    });
                }
            }
            (FieldType::Time, Value::Time(_)) => true,
            (FieldType::Time, Value::String(s)) => {
                if let Err(e) = DateTime::parse_from_rfc3339(s) {
                    return Err(ValidationError::InvalidTime {
                        field: self.name.clone(),
                        value: s.clone(),
                        reason: e.to_string(),
                    });
                }
                true
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(ValidationError::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type,
                found: value.type_name(),
            })
        }
    }
}

/// Per-collection document schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name
    pub name: String,
    /// Declared fields, in declaration order
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Explicit index names
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl Schema {
    /// Empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Append a field definition
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Append an explicit index name
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.indexes.push(index.into());
        self
    }

    /// Look up a declared field
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a document's fields against this schema
    ///
    /// Required-field presence is checked first, in declaration order; then
    /// every declared field present in the document is type-checked.
    /// Undeclared fields are ignored.
    pub fn validate(&self, doc: &Fields) -> Result<(), ValidationError> {
        for field in self.fields.iter().filter(|f| f.required) {
            if !doc.contains_key(&field.name) {
                return Err(ValidationError::MissingField {
                    field: field.name.clone(),
                });
            }
        }

        for (name, value) in doc {
            if let Some(field) = self.field(name) {
                field.check(value)?;
            }
        }

        Ok(())
    }

    /// Copy of `doc` with declared defaults filled in for absent fields
    ///
    /// Present values, including explicit nulls, are never overwritten. A
    /// declared default of null counts as no default.
    pub fn apply_defaults(&self, doc: &Fields) -> Fields {
        let mut result = doc.clone();
        for field in &self.fields {
            if let Some(default) = field.default.as_ref().filter(|d| !d.is_null()) {
                result
                    .entry(field.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        result
    }

    /// Names of indexed fields, in declaration order
    pub fn indexed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.indexed)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Names of unique fields, in declaration order
    pub fn unique_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| f.name.as_str())
            .collect()
    }
}
