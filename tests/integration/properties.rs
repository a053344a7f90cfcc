//! Cross-layer properties of the local level

use crate::common::*;
use velocitydb::ValidationError;

#[test]
fn test_round_trip_on_disk() {
    let test_db = TestDb::new();
    let db = &test_db.db;

    let doc = Document::new("d1", Fields::new())
        .with_field("title", "hello")
        .with_field("score", 9.5)
        .with_field("tags", vec![Value::from("a"), Value::from("b")])
        .with_field("when", chrono::Utc::now());
    let inserted = db.router().insert_at("notes", doc, ConsistencyLevel::Local).unwrap();
    assert_eq!(inserted.version, 1);

    let fetched = db.router().get_at("notes", "d1", ConsistencyLevel::Local).unwrap();
    assert_eq!(fetched, inserted);
}

#[test]
fn test_versions_grow_by_one() {
    let db = ephemeral_db();
    db.router()
        .insert_at("c", user("u1", "a", 0), ConsistencyLevel::Local)
        .unwrap();

    let mut last = 1;
    for age in 1..=20 {
        let mut fields = Fields::new();
        fields.insert("age".to_string(), Value::Int(age));
        let updated = db
            .router()
            .update_at("c", "u1", fields, ConsistencyLevel::Local)
            .unwrap();
        assert_eq!(updated.version, last + 1);
        last = updated.version;
    }
    assert_eq!(db.storage().get("c", "u1").unwrap().version, 21);
}

#[test]
fn test_drop_removes_every_document() {
    let test_db = TestDb::new();
    let db = &test_db.db;
    db.router()
        .create_collection_at("users", Some(&users_schema()), ConsistencyLevel::Local)
        .unwrap();
    for i in 0..50 {
        insert_checked(db, "users", user(&format!("u{}", i), "x", i)).unwrap();
    }
    // Same ids in a neighbouring collection must survive
    db.router()
        .insert_at("users2", user("u1", "keep", 1), ConsistencyLevel::Local)
        .unwrap();

    db.router()
        .drop_collection_at("users", ConsistencyLevel::Local)
        .unwrap();

    assert_eq!(db.router().count_at("users", ConsistencyLevel::Local).unwrap(), 0);
    for i in 0..50 {
        let err = db
            .router()
            .get_at("users", &format!("u{}", i), ConsistencyLevel::Local)
            .unwrap_err();
        assert!(err.is_not_found());
    }
    assert!(db.storage().collection("users").unwrap_err().is_not_found());
    assert_eq!(db.storage().get("users2", "u1").unwrap().version, 1);
}

#[test]
fn test_undeclared_fields_are_accepted() {
    let db = ephemeral_db();
    db.router()
        .create_collection_at("users", Some(&users_schema()), ConsistencyLevel::Local)
        .unwrap();
    let doc = user("u1", "a", 30).with_field("nickname", "ace");
    let stored = insert_checked(&db, "users", doc).unwrap();
    assert_eq!(stored.field("nickname"), Some(&Value::from("ace")));
}

#[test]
fn test_invalid_documents_never_reach_storage() {
    let db = ephemeral_db();
    db.router()
        .create_collection_at("users", Some(&users_schema()), ConsistencyLevel::Local)
        .unwrap();

    let missing = Document::new("u1", Fields::new()).with_field("name", "a");
    match insert_checked(&db, "users", missing) {
        Err(Error::Validation(ValidationError::MissingField { field })) => assert_eq!(field, "age"),
        other => panic!("expected missing field, got {:?}", other),
    }

    let wrong_type = Document::new("u2", Fields::new())
        .with_field("name", "b")
        .with_field("age", "thirty");
    let err = insert_checked(&db, "users", wrong_type).unwrap_err();
    match &err {
        Error::Validation(validation) => assert_eq!(validation.field(), "age"),
        other => panic!("expected type mismatch, got {:?}", other),
    }
    assert!(err.to_string().contains("age"));

    assert_eq!(db.storage().count("users").unwrap(), 0);
}

#[test]
fn test_query_filters_across_number_encodings() {
    let db = ephemeral_db();
    for (id, age) in [("a", Value::Int(30)), ("b", Value::Float(30.0)), ("c", Value::Int(31))] {
        db.router()
            .insert_at(
                "people",
                Document::new(id, Fields::new()).with_field("age", age),
                ConsistencyLevel::Local,
            )
            .unwrap();
    }

    let mut filter = Fields::new();
    filter.insert("age".to_string(), Value::Int(30));
    let found = db
        .router()
        .query_at("people", &filter, 0, 0, ConsistencyLevel::Local)
        .unwrap();
    let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let page = db
        .router()
        .query_at("people", &Fields::new(), 1, 1, ConsistencyLevel::Local)
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "b");
}
