//! Commit-time behavior: uniqueness, collations, nesting and cleanup.

use vinedb_core::{
    Collation, Config, CoreError, EmbeddedRecord, ExtractionMode, IndexKey, IndexRange, IndexType,
    KeyBound, PropertyType, SessionState, Value,
};
use vinedb_testkit::prelude::*;

fn name_of(db: &TestDatabase, key: &str) -> Vec<vinedb_core::RecordId> {
    let mut txn = db.begin().unwrap();
    txn.query_identities("Person.name", &IndexKey::single(key))
        .unwrap()
}

#[test]
fn swapping_unique_values_commits() {
    let db = scenarios::people_database();
    let ids = scenarios::insert_values(&db, "Person", "name", ["ann", "bob"]);

    db.transaction(|txn| {
        txn.load(ids[0])?.set_property("name", "bob");
        txn.load(ids[1])?.set_property("name", "ann");
        Ok(())
    })
    .unwrap();

    assert_eq!(name_of(&db, "ann"), vec![ids[1]]);
    assert_eq!(name_of(&db, "bob"), vec![ids[0]]);
}

#[test]
fn transient_duplicates_are_allowed() {
    let db = scenarios::people_database();
    let ids = scenarios::insert_values(&db, "Person", "name", ["a", "b", "c"]);

    db.transaction(|txn| {
        for &rid in &ids {
            txn.load(rid)?.set_property("name", "same");
        }
        txn.flush()?;
        for (rid, name) in ids.iter().zip(["p", "q", "r"]) {
            txn.load(*rid)?.set_property("name", name);
        }
        Ok(())
    })
    .unwrap();

    assert!(name_of(&db, "same").is_empty());
    assert_eq!(name_of(&db, "q"), vec![ids[1]]);
}

#[test]
fn duplicate_at_commit_is_rejected() {
    let db = scenarios::people_database();
    let ids = scenarios::insert_values(&db, "Person", "name", ["a", "b"]);
    let before = committed_entries(&db, "Person.name");

    let err = db
        .transaction(|txn| {
            txn.load(ids[1])?.set_property("name", "a");
            Ok(())
        })
        .unwrap_err();
    match err {
        CoreError::UniquenessViolation {
            existing,
            offending,
            ..
        } => {
            assert_eq!(existing, ids[0]);
            assert_eq!(offending, ids[1]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(committed_entries(&db, "Person.name"), before);
}

#[test]
fn second_concurrent_unique_insert_fails() {
    let db = scenarios::people_database();
    let mut first = db.begin().unwrap();
    let mut second = db.begin().unwrap();
    first.new_record("Person").unwrap().set_property("name", "dup");
    second.new_record("Person").unwrap().set_property("name", "dup");

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(err, CoreError::UniquenessViolation { .. }));
    assert!(!err.is_retryable());
    assert_eq!(name_of(&db, "dup").len(), 1);
    assert_eq!(db.stats().uniqueness_violations, 1);
    assert_eq!(db.stats().live_records, 1);
}

#[test]
fn case_insensitive_collation() {
    let db = TestDatabase::memory().class("Person").index(
        schema::property_index(
            "Person.name",
            "Person",
            "name",
            PropertyType::String,
            IndexType::NotUnique,
        ),
    );
    scenarios::insert_values(&db, "Person", "name", ["Ann", "ANN", "bob"]);
    assert!(name_of(&db, "ann").is_empty());

    let mut reader = db.begin().unwrap();
    db.set_collation("Person.name", "name", Collation::CaseInsensitive)
        .unwrap();

    assert_eq!(name_of(&db, "aNn").len(), 2);
    assert_eq!(committed_entries(&db, "Person.name").len(), 3);
    // Snapshots taken before the rebuild read through the rebuilt index.
    let found = reader
        .query_identities("Person.name", &IndexKey::single("ANN"))
        .unwrap();
    assert_eq!(found.len(), 2);

    assert!(matches!(
        db.set_collation("Person.name", "age", Collation::Default),
        Err(CoreError::PropertyNotIndexed { .. })
    ));
}

#[test]
fn case_insensitive_between_accepts_bounds_in_any_case() {
    let db = TestDatabase::memory().class("Person");
    db.create_index(
        schema::property_index(
            "Person.name",
            "Person",
            "name",
            PropertyType::String,
            IndexType::NotUnique,
        ),
    )
    .unwrap();
    db.set_collation("Person.name", "name", Collation::CaseInsensitive)
        .unwrap();
    scenarios::insert_values(&db, "Person", "name", ["a", "b", "c", "d"]);

    let mut txn = db.begin().unwrap();
    let range = IndexRange::between(
        KeyBound::inclusive(IndexKey::single("C")),
        KeyBound::inclusive(IndexKey::single("b")),
    );
    let keys: Vec<IndexKey> = txn
        .range("Person.name", &range, true)
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec![IndexKey::single("b"), IndexKey::single("c")]);
}

#[test]
fn staged_changes_do_not_survive_a_rebuild() {
    let db = scenarios::people_database();
    let mut txn = db.begin().unwrap();
    txn.new_record("Person").unwrap().set_property("name", "eve");
    txn.flush().unwrap();

    db.set_collation("Person.name", "name", Collation::CaseInsensitive)
        .unwrap();
    assert!(matches!(txn.commit(), Err(CoreError::Rollback { .. })));
    assert_eq!(db.stats().live_records, 0);
}

#[test]
fn dropped_index_is_skipped_at_commit() {
    let db = scenarios::people_database();
    let mut txn = db.begin().unwrap();
    txn.new_record("Person").unwrap().set_property("name", "eve");
    txn.flush().unwrap();

    db.drop_index("Person.name").unwrap();
    txn.commit().unwrap();
    assert_eq!(db.stats().live_records, 1);
    assert_eq!(db.indexes().len(), 1);
}

#[test]
fn index_created_mid_transaction_rejects_commit() {
    let db = TestDatabase::memory().class("Person");
    let mut txn = db.begin().unwrap();
    txn.new_record("Person").unwrap().set_property("name", "x");
    txn.flush().unwrap();

    db.create_index(schema::property_index(
        "Person.name",
        "Person",
        "name",
        PropertyType::String,
        IndexType::NotUnique,
    ))
    .unwrap();
    assert!(matches!(txn.commit(), Err(CoreError::Rollback { .. })));
    assert_eq!(db.stats().live_records, 0);
    assert!(committed_entries(&db, "Person.name").is_empty());

    let ids = scenarios::insert_values(&db, "Person", "name", ["x"]);
    assert_eq!(name_of(&db, "x"), ids);
}

#[test]
fn recreated_index_rejects_keys_staged_for_its_predecessor() {
    let db = scenarios::people_database();
    let mut txn = db.begin().unwrap();
    txn.new_record("Person").unwrap().set_property("name", "x");
    txn.flush().unwrap();

    db.drop_index("Person.name").unwrap();
    db.create_index(schema::property_index(
        "Person.name",
        "Person",
        "title",
        PropertyType::String,
        IndexType::NotUnique,
    ))
    .unwrap();
    assert!(matches!(txn.commit(), Err(CoreError::Rollback { .. })));
    assert!(committed_entries(&db, "Person.name").is_empty());
    assert_eq!(db.stats().live_records, 0);
}

#[test]
fn reverted_change_writes_no_version() {
    let db = scenarios::people_database();
    let ids = scenarios::insert_values(&db, "Person", "name", ["ann"]);

    let mut txn = db.begin().unwrap();
    {
        let record = txn.load(ids[0]).unwrap();
        record.set_property("name", "bea");
        record.set_property("name", "ann");
    }
    db.transaction(|other| {
        other.load(ids[0])?.set_property("age", 30);
        Ok(())
    })
    .unwrap();
    txn.commit().unwrap();

    let mut reader = db.begin().unwrap();
    let record = reader.load(ids[0]).unwrap();
    assert_eq!(record.version(), 2);
    assert_eq!(record.property("age"), Some(&Value::from(30)));
    assert_eq!(name_of(&db, "ann"), ids);
}

#[test]
fn hash_index_supports_lookups_only() {
    let db = TestDatabase::memory().class("Item").index(schema::property_index(
        "Item.sku",
        "Item",
        "sku",
        PropertyType::String,
        IndexType::UniqueHash,
    ));
    let ids = scenarios::insert_values(&db, "Item", "sku", ["b", "a", "c"]);

    let mut txn = db.begin().unwrap();
    assert_eq!(
        txn.query_identities("Item.sku", &IndexKey::single("a")).unwrap(),
        vec![ids[1]]
    );
    assert!(matches!(
        txn.range("Item.sku", &IndexRange::all(), true),
        Err(CoreError::UnsupportedQuery { .. })
    ));
    let keys: Vec<_> = committed_entries(&db, "Item.sku")
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        keys,
        vec![IndexKey::single("a"), IndexKey::single("b"), IndexKey::single("c")]
    );
}

#[test]
fn map_keys_index_tracks_key_changes() {
    let db = TestDatabase::memory().class("Doc").index(schema::collection_index(
        "Doc.attrs",
        "Doc",
        "attrs",
        PropertyType::String,
        ExtractionMode::MapKeys,
        IndexType::NotUnique,
    ));
    let rid = db
        .transaction(|txn| {
            let record = txn.new_record("Doc")?;
            let mut attrs = record.map_mut("attrs")?;
            attrs.insert("color", "red");
            attrs.insert("size", 3);
            drop(attrs);
            Ok(record.id())
        })
        .unwrap();

    db.transaction(|txn| {
        let record = txn.load(rid)?;
        let mut attrs = record.map_mut("attrs")?;
        attrs.insert("color", "blue");
        attrs.remove("size");
        attrs.insert("shape", "round");
        Ok(())
    })
    .unwrap();

    let keys: Vec<_> = committed_entries(&db, "Doc.attrs")
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        keys,
        vec![IndexKey::single("color"), IndexKey::single("shape")]
    );
}

#[test]
fn dotted_path_reaches_embedded_property() {
    let db = TestDatabase::memory().class("Person").index(schema::property_index(
        "Person.city",
        "Person",
        "address.city",
        PropertyType::String,
        IndexType::NotUnique,
    ));
    let rid = db
        .transaction(|txn| {
            let record = txn.new_record("Person")?;
            record.set_property("address", EmbeddedRecord::new().with("city", "Rome"));
            Ok(record.id())
        })
        .unwrap();

    let mut txn = db.begin().unwrap();
    assert_eq!(
        txn.query_identities("Person.city", &IndexKey::single("Rome"))
            .unwrap(),
        vec![rid]
    );
}

#[test]
fn key_conversion_failure_rolls_back() {
    let db = scenarios::people_database();
    let err = db
        .transaction(|txn| {
            txn.new_record("Person")?.set_property("age", "tt");
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::KeyConversion { .. }));
    assert_eq!(db.stats().live_records, 0);

    let rid = scenarios::insert_values(&db, "Person", "age", ["12"])[0];
    let mut txn = db.begin().unwrap();
    assert_eq!(
        txn.query_identities("Person.age", &IndexKey::single(12)).unwrap(),
        vec![rid]
    );
}

#[test]
fn nested_rollback_discards_everything() {
    let db = scenarios::people_database();
    let mut session = db.session();
    session.begin().unwrap();
    session
        .transaction()
        .unwrap()
        .new_record("Person")
        .unwrap()
        .set_property("name", "outer");
    session.begin().unwrap();
    session
        .transaction()
        .unwrap()
        .new_record("Person")
        .unwrap()
        .set_property("name", "inner");

    session.rollback().unwrap();
    assert_eq!(session.state(), SessionState::Invalidated { remaining: 1 });
    assert!(matches!(session.commit(), Err(CoreError::Rollback { .. })));
    assert_eq!(session.state(), SessionState::Idle);

    assert!(name_of(&db, "outer").is_empty());
    assert!(name_of(&db, "inner").is_empty());
    assert_eq!(db.committed_seq().as_u64(), 0);
}

#[test]
fn cleanup_keeps_what_open_snapshots_read() {
    let db = TestDatabase::with_config(Config::default().cleanup_interval(0))
        .class("Person")
        .index(schema::property_index(
            "Person.age",
            "Person",
            "age",
            PropertyType::Integer,
            IndexType::NotUnique,
        ));
    let rid = scenarios::insert_values(&db, "Person", "age", [0i64])[0];

    let mut old = db.begin().unwrap();
    for age in 1..=5i64 {
        db.transaction(|txn| {
            txn.load(rid)?.set_property("age", age);
            Ok(())
        })
        .unwrap();
    }

    let first = db.cleanup().unwrap();
    assert_eq!(
        old.load(rid).unwrap().property("age"),
        Some(&Value::Integer(0))
    );
    assert_eq!(
        old.query_identities("Person.age", &IndexKey::single(0)).unwrap(),
        vec![rid]
    );
    old.rollback();

    let second = db.cleanup().unwrap();
    assert!(second.versions_dropped > 0);
    assert!(second.index_entries_dropped > 0);
    assert!(second.horizon > first.horizon || first.versions_dropped > 0);
    assert_eq!(db.stats().cleanups, 2);
    assert_eq!(committed_entries(&db, "Person.age").len(), 1);
}
