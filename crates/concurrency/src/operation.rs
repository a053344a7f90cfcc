//! CAS request and outcome types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use velocity_core::{Error, Result, Value};

/// One compare-and-swap request
///
/// With `field` unset the whole field map is compared (as an Object) and
/// `value` must be an Object that is merged in on success. With `field` set
/// only that field is compared and replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasOperation {
    /// Target collection
    pub collection: String,
    /// Target document
    pub id: String,
    /// Value the target must currently hold; `None` means "must not exist"
    #[serde(default)]
    pub expected: Option<Value>,
    /// Value to write on match
    pub value: Value,
    /// Restrict the comparison and write to one field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Expiry applied when this operation creates the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl CasOperation {
    /// Whole-document CAS writing `value` (an Object)
    pub fn document(
        collection: impl Into<String>,
        id: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            expected: None,
            value: value.into(),
            field: None,
            ttl: None,
        }
    }

    /// Single-field CAS writing `value` into `field`
    pub fn field(
        collection: impl Into<String>,
        id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::document(collection, id, value)
        }
    }

    /// Require the target to currently equal `expected`
    ///
    /// `Value::Null` is the same as not calling this at all.
    pub fn expecting(mut self, expected: impl Into<Value>) -> Self {
        let expected = expected.into();
        self.expected = (!expected.is_null()).then_some(expected);
        self
    }

    /// Expire a document created by this operation after `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Expected value with an explicit Null folded into "absent"
    pub(crate) fn expected_value(&self) -> Option<&Value> {
        self.expected.as_ref().filter(|v| !v.is_null())
    }
}

/// Why a CAS did not apply
#[derive(Debug, Clone, PartialEq)]
pub enum CasFailure {
    /// Current value differs from the expected one
    Conflict,
    /// Target document absent while a value was expected, or removed
    /// between the comparison and the write
    NotFound {
        /// Collection searched
        collection: String,
        /// Missing document
        id: String,
    },
    /// `value` cannot be written (document CAS needs an Object)
    InvalidValue(String),
}

impl CasFailure {
    pub(crate) fn not_found(op: &CasOperation) -> Self {
        CasFailure::NotFound {
            collection: op.collection.clone(),
            id: op.id.clone(),
        }
    }
}

impl fmt::Display for CasFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasFailure::Conflict => write!(f, "expected value does not match current value"),
            CasFailure::NotFound { collection, id } => {
                write!(f, "document '{}' not found in collection '{}'", id, collection)
            }
            CasFailure::InvalidValue(reason) => write!(f, "invalid value: {}", reason),
        }
    }
}

/// Outcome of one CAS
///
/// `current_value` and `version` describe what is stored after the call,
/// whether or not the swap applied, so a caller can retry with a fresh
/// expected value.
#[derive(Debug, Clone, PartialEq)]
pub struct CasResult {
    /// Whether the swap applied
    pub success: bool,
    /// Stored value of the target (field value or whole field map)
    pub current_value: Option<Value>,
    /// Stored document version, 0 if absent
    pub version: u64,
    /// Failure reason when `success` is false
    pub error: Option<CasFailure>,
}

impl CasResult {
    pub(crate) fn applied(current_value: Option<Value>, version: u64) -> Self {
        Self {
            success: true,
            current_value,
            version,
            error: None,
        }
    }

    pub(crate) fn failed(failure: CasFailure, current_value: Option<Value>, version: u64) -> Self {
        Self {
            success: false,
            current_value,
            version,
            error: Some(failure),
        }
    }

    /// Whether the failure was a value mismatch
    pub fn is_conflict(&self) -> bool {
        matches!(self.error, Some(CasFailure::Conflict))
    }

    /// Failure reason as text ("" on success)
    pub fn reason(&self) -> String {
        self.error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Convert into a `Result` for `?`-style callers
    ///
    /// A mismatch becomes `Error::CasConflict` carrying the stored value and
    /// version, a missing target `Error::DocumentNotFound`.
    pub fn into_result(self) -> Result<CasResult> {
        match self.error {
            None => Ok(self),
            Some(CasFailure::Conflict) => Err(Error::CasConflict {
                current: self.current_value,
                version: self.version,
            }),
            Some(CasFailure::NotFound { collection, id }) => {
                Err(Error::DocumentNotFound { collection, id })
            }
            Some(CasFailure::InvalidValue(reason)) => Err(Error::InvalidValue(reason)),
        }
    }
}
