//! Compare-and-swap over the CRUD contract
//!
//! ## Protocol
//!
//! ```text
//! 1. lock the document's stripe
//! 2. get the document (cache first)
//! 3. absent + nothing expected      -> insert, success
//!    absent + a value expected      -> NotFound
//! 4. compare expected vs current with numeric normalization
//! 5. mismatch                       -> Conflict + stored value/version
//! 6. match                          -> Update (field merge), success
//! ```
//!
//! The stripe lock makes steps 2..6 atomic with respect to other CAS callers
//! on this engine. Plain Updates issued around the engine are not excluded.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::debug;
use velocity_core::{Document, Error, Fields, LocalDatabase, Result, Value};

use crate::locks::{KeyLocks, DEFAULT_STRIPES};
use crate::operation::{CasFailure, CasOperation, CasResult};

/// Error from [`CasEngine::batch_cas`]
///
/// Operations before `index` were applied and stay applied.
#[derive(Debug, ThisError)]
pub enum BatchCasError {
    /// Operation `index` did not apply
    #[error("batch CAS failed at operation {index}: {}", .failed.reason())]
    Failed {
        /// Position of the failing operation
        index: usize,
        /// Results of the operations that applied
        completed: Vec<CasResult>,
        /// Result of the failing operation
        failed: CasResult,
    },
    /// Operation `index` hit an engine error
    #[error("batch CAS aborted at operation {index}: {source}")]
    Aborted {
        /// Position of the failing operation
        index: usize,
        /// Results of the operations that applied
        completed: Vec<CasResult>,
        /// Engine error
        source: Error,
    },
}

impl BatchCasError {
    /// Position of the operation that stopped the batch
    pub fn index(&self) -> usize {
        match self {
            BatchCasError::Failed { index, .. } | BatchCasError::Aborted { index, .. } => *index,
        }
    }

    /// Results of the operations that applied before the failure
    pub fn completed(&self) -> &[CasResult] {
        match self {
            BatchCasError::Failed { completed, .. } | BatchCasError::Aborted { completed, .. } => {
                completed
            }
        }
    }
}

impl From<BatchCasError> for Error {
    fn from(err: BatchCasError) -> Self {
        match err {
            BatchCasError::Failed { failed, .. } => match failed.into_result() {
                Err(e) => e,
                Ok(_) => Error::Storage("batch CAS failed".to_string()),
            },
            BatchCasError::Aborted { source, .. } => source,
        }
    }
}

/// CAS engine over any [`LocalDatabase`]
pub struct CasEngine<S: LocalDatabase + ?Sized = dyn LocalDatabase> {
    storage: Arc<S>,
    locks: KeyLocks,
}

impl<S: LocalDatabase + ?Sized> CasEngine<S> {
    /// Wrap `storage` with the default lock striping
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_stripes(storage, DEFAULT_STRIPES)
    }

    /// Wrap `storage` with `stripes` document locks
    pub fn with_stripes(storage: Arc<S>, stripes: usize) -> Self {
        Self {
            storage,
            locks: KeyLocks::new(stripes),
        }
    }

    /// The wrapped store
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Run one CAS
    ///
    /// A failed comparison is reported in the result, never as `Err`.
    ///
    /// # Errors
    ///
    /// Engine failures (`Closed`, `Storage`, `Io`, `Serialization`) while
    /// reading or writing the document.
    pub fn compare_and_swap(&self, op: &CasOperation) -> Result<CasResult> {
        let _stripe = self.locks.lock(&op.collection, &op.id);

        let current = match self.storage.get(&op.collection, &op.id) {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => {
                if op.expected_value().is_some() {
                    debug!(
                        target: "velocity::cas",
                        collection = %op.collection,
                        id = %op.id,
                        "CAS target not found"
                    );
                    return Ok(CasResult::failed(CasFailure::not_found(op), None, 0));
                }
                return self.create(op);
            }
            Err(e) => return Err(e),
        };

        let stored = target_value(op, &current);
        if !expectation_holds(op.expected_value(), stored.as_ref()) {
            debug!(
                target: "velocity::cas",
                collection = %op.collection,
                id = %op.id,
                version = current.version,
                "CAS conflict"
            );
            return Ok(CasResult::failed(
                CasFailure::Conflict,
                stored,
                current.version,
            ));
        }

        let fields = match new_fields(op) {
            Ok(fields) => fields,
            Err(failure) => return Ok(CasResult::failed(failure, stored, current.version)),
        };

        match self.storage.update(&op.collection, &op.id, fields) {
            Ok(updated) => {
                debug!(
                    target: "velocity::cas",
                    collection = %op.collection,
                    id = %op.id,
                    version = updated.version,
                    "CAS applied"
                );
                Ok(CasResult::applied(
                    target_value(op, &updated),
                    updated.version,
                ))
            }
            Err(e) => Ok(CasResult::failed(
                write_failure(op, e)?,
                stored,
                current.version,
            )),
        }
    }

    /// Run operations in order, stopping at the first that does not apply
    ///
    /// Applied operations are not rolled back.
    pub fn batch_cas(
        &self,
        ops: &[CasOperation],
    ) -> std::result::Result<Vec<CasResult>, BatchCasError> {
        let mut completed = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            match self.compare_and_swap(op) {
                Ok(result) if result.success => completed.push(result),
                Ok(failed) => {
                    return Err(BatchCasError::Failed {
                        index,
                        completed,
                        failed,
                    })
                }
                Err(source) => {
                    return Err(BatchCasError::Aborted {
                        index,
                        completed,
                        source,
                    })
                }
            }
        }
        Ok(completed)
    }

    fn create(&self, op: &CasOperation) -> Result<CasResult> {
        let fields = match new_fields(op) {
            Ok(fields) => fields,
            Err(failure) => return Ok(CasResult::failed(failure, None, 0)),
        };

        let mut doc = Document::new(op.id.clone(), fields);
        if let Some(ttl) = op.ttl {
            let now = Utc::now();
            doc.expires_at = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl));
        }

        match self.storage.insert(&op.collection, doc) {
            Ok(created) => {
                debug!(
                    target: "velocity::cas",
                    collection = %op.collection,
                    id = %created.id,
                    "CAS created document"
                );
                Ok(CasResult::applied(
                    target_value(op, &created),
                    created.version,
                ))
            }
            // A plain insert got there first
            Err(e) if e.is_already_exists() => {
                match self.storage.get(&op.collection, &op.id) {
                    Ok(doc) => Ok(CasResult::failed(
                        CasFailure::Conflict,
                        target_value(op, &doc),
                        doc.version,
                    )),
                    Err(_) => Ok(CasResult::failed(CasFailure::Conflict, None, 0)),
                }
            }
            Err(e) => Ok(CasResult::failed(write_failure(op, e)?, None, 0)),
        }
    }
}

/// Value the operation compares against: one field, or the whole map
fn target_value(op: &CasOperation, doc: &Document) -> Option<Value> {
    match &op.field {
        Some(field) => doc.field(field).filter(|v| !v.is_null()).cloned(),
        None => Some(doc.fields_value()),
    }
}

fn expectation_holds(expected: Option<&Value>, stored: Option<&Value>) -> bool {
    match (expected, stored) {
        (None, None) => true,
        (Some(expected), Some(stored)) => expected.loosely_eq(stored),
        _ => false,
    }
}

fn new_fields(op: &CasOperation) -> std::result::Result<Fields, CasFailure> {
    match (&op.field, &op.value) {
        (Some(field), value) => {
            let mut fields = Fields::new();
            fields.insert(field.clone(), value.clone());
            Ok(fields)
        }
        (None, Value::Object(fields)) => Ok(fields.clone()),
        (None, other) => Err(CasFailure::InvalidValue(format!(
            "document CAS needs an object, got {}",
            other.type_name()
        ))),
    }
}

/// A target removed under the comparison is reported in the result;
/// every other write error propagates unchanged
fn write_failure(op: &CasOperation, err: Error) -> Result<CasFailure> {
    if err.is_not_found() {
        Ok(CasFailure::not_found(op))
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Minimal in-process store for exercising the protocol
    #[derive(Default)]
    struct MapStore {
        docs: Mutex<BTreeMap<(String, String), Document>>,
    }

    impl LocalDatabase for MapStore {
        fn create_collection(&self, _: &str, _: Option<&velocity_core::Schema>) -> Result<()> {
            Ok(())
        }
        fn drop_collection(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn insert(&self, collection: &str, mut doc: Document) -> Result<Document> {
            let mut docs = self.docs.lock();
            let key = (collection.to_string(), doc.id.clone());
            if docs.contains_key(&key) {
                return Err(Error::document_exists(collection, &doc.id));
            }
            doc.version = 1;
            docs.insert(key, doc.clone());
            Ok(doc)
        }
        fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document> {
            let mut docs = self.docs.lock();
            let doc = docs
                .get_mut(&(collection.to_string(), id.to_string()))
                .ok_or_else(|| Error::document_not_found(collection, id))?;
            doc.merge_fields(fields);
            doc.version += 1;
            Ok(doc.clone())
        }
        fn delete(&self, collection: &str, id: &str) -> Result<()> {
            self.docs
                .lock()
                .remove(&(collection.to_string(), id.to_string()))
                .map(|_| ())
                .ok_or_else(|| Error::document_not_found(collection, id))
        }
        fn get(&self, collection: &str, id: &str) -> Result<Document> {
            self.docs
                .lock()
                .get(&(collection.to_string(), id.to_string()))
                .cloned()
                .ok_or_else(|| Error::document_not_found(collection, id))
        }
        fn query(&self, _: &str, _: &Fields, _: usize, _: usize) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }
        fn count(&self, _: &str) -> Result<usize> {
            Ok(self.docs.lock().len())
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn engine() -> CasEngine<MapStore> {
        CasEngine::new(Arc::new(MapStore::default()))
    }

    #[test]
    fn test_field_cas_creates_on_absence() {
        let cas = engine();
        let result = cas
            .compare_and_swap(&CasOperation::field("c", "d", "n", 1))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.version, 1);
        assert_eq!(result.current_value, Some(Value::Int(1)));
    }

    #[test]
    fn test_expected_on_missing_document_is_not_found() {
        let cas = engine();
        let result = cas
            .compare_and_swap(&CasOperation::field("c", "d", "n", 2).expecting(1))
            .unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error,
            Some(CasFailure::NotFound {
                collection: "c".into(),
                id: "d".into(),
            })
        );
        assert_eq!(result.version, 0);
    }

    #[test]
    fn test_document_cas_requires_object() {
        let cas = engine();
        let result = cas
            .compare_and_swap(&CasOperation::document("c", "d", 5))
            .unwrap();
        assert!(matches!(result.error, Some(CasFailure::InvalidValue(_))));
        assert!(cas.storage().get("c", "d").is_err());
    }

    #[test]
    fn test_document_cas_compares_whole_map_and_merges() {
        let cas = engine();
        let mut initial = Fields::new();
        initial.insert("a".into(), Value::Int(1));
        cas.compare_and_swap(&CasOperation::document("c", "d", Value::Object(initial.clone())))
            .unwrap();

        let mut next = Fields::new();
        next.insert("b".into(), Value::Int(2));
        let result = cas
            .compare_and_swap(
                &CasOperation::document("c", "d", Value::Object(next))
                    .expecting(Value::Object(initial)),
            )
            .unwrap();
        assert!(result.success);
        assert_eq!(result.version, 2);
        let stored = result.current_value.unwrap();
        let map = stored.as_object().unwrap();
        assert_eq!(map.get("a"), Some(&Value::Int(1)));
        assert_eq!(map.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_existing_document_without_expectation_conflicts() {
        let cas = engine();
        cas.compare_and_swap(&CasOperation::field("c", "d", "n", 1))
            .unwrap();
        let again = cas
            .compare_and_swap(&CasOperation::field("c", "d", "n", 1))
            .unwrap();
        assert!(again.is_conflict());
        assert_eq!(again.current_value, Some(Value::Int(1)));
    }

    #[test]
    fn test_absent_field_on_existing_document() {
        let cas = engine();
        cas.compare_and_swap(&CasOperation::field("c", "d", "n", 1))
            .unwrap();
        let result = cas
            .compare_and_swap(&CasOperation::field("c", "d", "other", "x"))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.version, 2);
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let cas = engine();
        let ops = vec![
            CasOperation::field("c", "a", "n", 1),
            CasOperation::field("c", "b", "n", 1),
            CasOperation::field("c", "a", "n", 2).expecting(99),
            CasOperation::field("c", "z", "n", 1),
        ];
        let err = cas.batch_cas(&ops).unwrap_err();
        assert_eq!(err.index(), 2);
        assert_eq!(err.completed().len(), 2);
        // No rollback, and nothing after the failure ran
        assert!(cas.storage().get("c", "b").is_ok());
        assert!(cas.storage().get("c", "z").is_err());

        match Error::from(err) {
            Error::CasConflict { current, version } => {
                assert_eq!(current, Some(Value::Int(1)));
                assert_eq!(version, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_batch_all_applied() {
        let cas = engine();
        let ops = vec![
            CasOperation::field("c", "a", "n", 1),
            CasOperation::field("c", "a", "n", 2).expecting(1.0),
        ];
        let results = cas.batch_cas(&ops).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].version, 2);
    }
}
