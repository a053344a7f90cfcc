//! End-to-end user scenario: validated insert, CAS, stale CAS

use crate::common::*;
use velocitydb::{BatchCasError, CasFailure, CasOperation};

#[test]
fn test_insert_then_cas_then_stale_cas() {
    let test_db = TestDb::new();
    let db = &test_db.db;
    db.router()
        .create_collection_at("users", Some(&users_schema()), ConsistencyLevel::Local)
        .unwrap();

    let inserted = insert_checked(db, "users", user("u1", "a", 30)).unwrap();
    assert_eq!(inserted.version, 1);
    assert_eq!(inserted.field("active"), Some(&Value::Bool(true)));

    let op = CasOperation::field("users", "u1", "age", 31).expecting(30);
    let first = db.cas().compare_and_swap(&op).unwrap();
    assert!(first.success);
    assert_eq!(first.version, 2);
    assert_eq!(first.current_value, Some(Value::Int(31)));

    let again = db.cas().compare_and_swap(&op).unwrap();
    assert!(!again.success);
    assert_eq!(again.error, Some(CasFailure::Conflict));
    assert_eq!(again.current_value, Some(Value::Int(31)));
    assert!(matches!(
        again.into_result(),
        Err(Error::CasConflict { version: 2, current: Some(Value::Int(31)) })
    ));

    let stored = db.storage().get("users", "u1").unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.field("name"), Some(&Value::from("a")));
}

#[test]
fn test_decoded_json_payload_passes_int_schema() {
    let db = ephemeral_db();
    db.router()
        .create_collection_at("users", Some(&users_schema()), ConsistencyLevel::Local)
        .unwrap();

    // A decoder that yields floats for integral numbers must still validate
    let payload: Fields = match Value::from(serde_json::json!({"name": "b", "age": 41.0})) {
        Value::Object(fields) => fields,
        other => panic!("expected object, got {:?}", other),
    };
    insert_checked(&db, "users", Document::new("u2", payload)).unwrap();

    let result = db
        .cas()
        .compare_and_swap(&CasOperation::field("users", "u2", "age", 42).expecting(41))
        .unwrap();
    assert!(result.success);
}

#[test]
fn test_batch_stops_at_first_conflict_without_rollback() {
    let db = ephemeral_db();
    insert_checked(&db, "accounts", Document::new("a", Fields::new()).with_field("balance", 100))
        .unwrap();
    insert_checked(&db, "accounts", Document::new("b", Fields::new()).with_field("balance", 50))
        .unwrap();

    let batch = vec![
        CasOperation::field("accounts", "a", "balance", 70).expecting(100),
        CasOperation::field("accounts", "b", "balance", 80).expecting(999),
        CasOperation::field("accounts", "a", "balance", 0).expecting(70),
    ];

    match db.cas().batch_cas(&batch) {
        Err(BatchCasError::Failed {
            index,
            completed,
            failed,
        }) => {
            assert_eq!(index, 1);
            assert_eq!(completed.len(), 1);
            assert!(failed.is_conflict());
            assert_eq!(failed.current_value, Some(Value::Int(50)));
        }
        other => panic!("expected a failed batch, got {:?}", other),
    }

    // The committed prefix stays applied; the tail never ran
    let a = db.storage().get("accounts", "a").unwrap();
    assert_eq!(a.field("balance"), Some(&Value::Int(70)));
    assert_eq!(a.version, 2);
}
