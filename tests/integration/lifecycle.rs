//! Open, reopen and close through the facade

use crate::common::*;
use std::time::Duration;
use velocitydb::{CasOperation, CONFIG_FILE_NAME, DATA_FILE_NAME};

#[test]
fn test_documents_and_schemas_survive_reopen() {
    let mut test_db = TestDb::new();
    test_db
        .db
        .router()
        .create_collection_at("users", Some(&users_schema()), ConsistencyLevel::Local)
        .unwrap();
    insert_checked(&test_db.db, "users", user("u1", "a", 30)).unwrap();
    test_db
        .db
        .cas()
        .compare_and_swap(&CasOperation::field("users", "u1", "age", 31).expecting(30))
        .unwrap();

    test_db.reopen();

    let doc = test_db.db.storage().get("users", "u1").unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.field("age"), Some(&Value::Int(31)));
    let metadata = test_db.db.storage().collection("users").unwrap();
    assert_eq!(metadata.schema, Some(users_schema()));
}

#[test]
fn test_open_lays_out_data_directory() {
    let test_db = TestDb::new();
    assert!(test_db.db_path().join(CONFIG_FILE_NAME).exists());
    assert!(test_db.db_path().join(DATA_FILE_NAME).exists());

    let on_disk = VelocityConfig::from_file(&test_db.db_path().join(CONFIG_FILE_NAME)).unwrap();
    assert_eq!(on_disk.router.node_id, test_db.db.config().router.node_id);
}

#[test]
fn test_configured_ttl_expires_records() {
    let mut config = quiet_config();
    config.storage.ttl_secs = Some(1);
    let test_db = TestDb::with_config(config);
    let db = &test_db.db;

    db.router()
        .insert_at("sessions", user("s1", "a", 1), ConsistencyLevel::Local)
        .unwrap();
    assert!(db.storage().get("sessions", "s1").unwrap().expires_at.is_some());

    std::thread::sleep(Duration::from_millis(1200));
    assert!(db.storage().get("sessions", "s1").unwrap_err().is_not_found());
    assert_eq!(db.storage().count("sessions").unwrap(), 0);
    assert_eq!(db.storage().reclaim_expired(16).unwrap(), 1);
}

#[test]
fn test_close_is_final() {
    let test_db = TestDb::new();
    let db = &test_db.db;
    db.router()
        .insert_at("c", user("u1", "a", 1), ConsistencyLevel::Local)
        .unwrap();
    db.close().unwrap();

    assert!(matches!(
        db.router().get_at("c", "u1", ConsistencyLevel::Local),
        Err(Error::Closed)
    ));
    assert!(matches!(
        db.cas()
            .compare_and_swap(&CasOperation::field("c", "u1", "age", 2).expecting(1)),
        Err(Error::Closed)
    ));
    // Second close is a no-op for the storage engine
    db.close().unwrap();
}

#[test]
fn test_unsupported_levels_fail_loudly() {
    let db = ephemeral_db();
    let err = db
        .router()
        .insert_at("c", user("u1", "a", 1), ConsistencyLevel::Quorum)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedConsistency {
            level: ConsistencyLevel::Quorum,
            ..
        }
    ));
    assert!(db.storage().get("c", "u1").unwrap_err().is_not_found());
}
