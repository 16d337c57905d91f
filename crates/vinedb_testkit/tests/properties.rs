//! Cross-module properties of index maintenance and transactions.

use proptest::prelude::*;
use std::collections::BTreeSet;
use vinedb_core::{
    CollectionId, ConditionOp, CoreError, IndexKey, IndexRange, IndexType, KeyBound, KeyCondition,
    PropertyType, RecordId, TrackedList, Value,
};
use vinedb_testkit::prelude::*;

fn tagged_with(tags: &[&str]) -> (TestDatabase, RecordId) {
    let db = scenarios::tagged_database();
    let rid = db
        .transaction(|txn| {
            let record = txn.new_record("Doc")?;
            record.set_property(
                "tags",
                TrackedList::from_values(tags.iter().map(|t| Value::from(*t))),
            );
            Ok(record.id())
        })
        .unwrap();
    (db, rid)
}

#[test]
fn add_then_remove_nets_to_nothing() {
    init_test_logging();
    let (db, rid) = tagged_with(&["x"]);

    let mut txn = db.begin().unwrap();
    let record = txn.load(rid).unwrap();
    {
        let mut tags = record.list_mut("tags").unwrap();
        tags.push("y");
        assert!(tags.remove_value(&Value::from("y")));
    }
    assert!(record
        .change_timeline("tags")
        .is_some_and(|t| t.net_effect().is_empty()));

    let op = txn.atomic_operation().unwrap();
    assert_eq!(op.staged_count(), 0);
    assert!(op.staged("Doc.tags").is_empty());
}

#[test]
fn staged_keys_are_private_to_their_transaction() {
    let db = scenarios::tagged_database();
    let mut writer = db.begin().unwrap();
    let mut reader = db.begin().unwrap();

    let rid = {
        let record = writer.new_record("Doc").unwrap();
        record.list_mut("tags").unwrap().push("rust");
        record.id()
    };

    let key = IndexKey::single("rust");
    assert_eq!(writer.query_identities("Doc.tags", &key).unwrap(), vec![rid]);
    let index = db.db.index("Doc.tags").unwrap();
    let op = writer.atomic_operation().unwrap();
    let entries = index.stream_entries(op, &[key.clone()], true).unwrap();
    assert_eq!(entries, vec![(key.clone(), rid)]);

    assert!(reader.query_identities("Doc.tags", &key).unwrap().is_empty());

    writer.commit().unwrap();
    // The reader keeps its snapshot.
    assert!(reader.query_identities("Doc.tags", &key).unwrap().is_empty());
    let mut fresh = db.begin().unwrap();
    assert_eq!(fresh.query_identities("Doc.tags", &key).unwrap(), vec![rid]);
}

#[test]
fn successful_commit_bumps_version_by_one() {
    let db = scenarios::people_database();
    let rid = scenarios::insert_values(&db, "Person", "name", ["ann"])[0];

    for expected in 1..=3u64 {
        let mut txn = db.begin().unwrap();
        let record = txn.load(rid).unwrap();
        assert_eq!(record.version(), expected);
        record.set_property("age", expected as i64);
        txn.commit().unwrap();
    }

    let mut txn = db.begin().unwrap();
    assert_eq!(txn.load(rid).unwrap().version(), 4);
}

#[test]
fn conflicting_commit_keeps_version() {
    let db = scenarios::people_database();
    let rid = scenarios::insert_values(&db, "Person", "name", ["ann"])[0];
    let before = committed_entries(&db, "Person.age");

    let mut first = db.begin().unwrap();
    let mut second = db.begin().unwrap();
    first.load(rid).unwrap().set_property("age", 30);
    second.load(rid).unwrap().set_property("age", 40);
    first.commit().unwrap();

    let after_first = committed_entries(&db, "Person.age");
    let err = second.commit().unwrap_err();
    assert!(matches!(err, CoreError::Conflict { expected: 1, actual: 2, .. }));
    assert!(err.is_retryable());

    assert_ne!(before, after_first);
    assert_eq!(committed_entries(&db, "Person.age"), after_first);
    let mut txn = db.begin().unwrap();
    let record = txn.load(rid).unwrap();
    assert_eq!(record.version(), 2);
    assert_eq!(record.property("age"), Some(&Value::Integer(30)));
    assert_eq!(db.stats().conflicts, 1);
}

#[test]
fn range_bounds_in_either_order() {
    let db = TestDatabase::memory().class("Row").index(schema::property_index(
        "Row.a",
        "Row",
        "a",
        PropertyType::Integer,
        IndexType::NotUnique,
    ));
    scenarios::insert_values(&db, "Row", "a", 0..10i64);

    let lo = KeyBound::inclusive(IndexKey::single(1));
    let hi = KeyBound::inclusive(IndexKey::single(3));
    let mut txn = db.begin().unwrap();
    let forward = txn
        .range("Row.a", &IndexRange::between(lo.clone(), hi.clone()), true)
        .unwrap();
    let backward = txn
        .range("Row.a", &IndexRange::between(hi, lo), true)
        .unwrap();
    let values: Vec<_> = forward.iter().map(|(k, _)| k.fields()[0].clone()).collect();
    assert_eq!(values, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    assert_eq!(forward, backward);
}

#[test]
fn composite_key_keeps_null_field() {
    let db = TestDatabase::memory().class("Doc").index(schema::composite_index(
        "Doc.f1_f2_f3",
        "Doc",
        &[
            ("f1", PropertyType::Integer),
            ("f2", PropertyType::Integer),
            ("f3", PropertyType::Integer),
        ],
        IndexType::NotUnique,
    ));
    db.transaction(|txn| {
        for i in 0..20i64 {
            let record = txn.new_record("Doc")?;
            record.set_property("f1", i % 5);
            record.set_property("f2", i % 5 + 1);
            if i % 2 == 1 {
                record.set_property("f3", i);
            }
        }
        Ok(())
    })
    .unwrap();

    let mut txn = db.begin().unwrap();
    let null_key = IndexKey::new(vec![Value::Integer(1), Value::Integer(2), Value::Null]);
    let nulls = txn.query_identities("Doc.f1_f2_f3", &null_key).unwrap();
    assert_eq!(nulls.len(), 2);
    let all = txn
        .query_identities_by_prefix("Doc.f1_f2_f3", &IndexKey::composite([1i64, 2]))
        .unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(txn.index_size("Doc.f1_f2_f3").unwrap(), 20);
}

#[test]
fn link_bag_indexes_both_halves_of_paired_entries() {
    let db = scenarios::graph_database();
    let target = |p| RecordId::new(CollectionId::new(42), p);
    let (a, b, c) = (target(1), target(2), target(3));

    let rid = db
        .transaction(|txn| {
            let record = txn.new_record("Vertex")?;
            let mut edges = record.link_bag_mut("edges")?;
            edges.add(a);
            edges.add_pair(b, c);
            drop(edges);
            Ok(record.id())
        })
        .unwrap();

    let keys: BTreeSet<_> = committed_entries(&db, "Vertex.edges")
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys.len(), 3);

    db.transaction(|txn| {
        let removed = txn.load(rid)?.link_bag_mut("edges")?.remove(b);
        assert!(removed.is_some_and(|e| e.is_paired()));
        Ok(())
    })
    .unwrap();

    let entries = committed_entries(&db, "Vertex.edges");
    assert_eq!(entries, vec![(IndexKey::single(a), rid)]);
}

#[test]
fn deleted_record_leaves_every_index() {
    let db = scenarios::people_database();
    let ids = scenarios::insert_values(&db, "Person", "name", ["ann", "bob"]);
    db.transaction(|txn| txn.delete(ids[0])).unwrap();

    let names: Vec<_> = committed_entries(&db, "Person.name")
        .into_iter()
        .map(|(_, rid)| rid)
        .collect();
    assert_eq!(names, vec![ids[1]]);
    assert_eq!(committed_entries(&db, "Person.age").len(), 1);

    let mut txn = db.begin().unwrap();
    assert!(matches!(txn.load(ids[0]), Err(CoreError::RecordNotFound { .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn rollback_restores_committed_keys(script in edit_script_strategy(24)) {
        let (db, rid) = tagged_with(&["a", "b", "c"]);
        let before = committed_entries(&db, "Doc.tags");

        let mut txn = db.begin().unwrap();
        {
            let record = txn.load(rid).unwrap();
            let mut tags = record.list_mut("tags").unwrap();
            for edit in &script {
                apply_list_edit(&mut tags, edit);
            }
        }
        txn.flush().unwrap();
        txn.rollback();

        prop_assert_eq!(committed_entries(&db, "Doc.tags"), before);
    }

    #[test]
    fn committed_keys_follow_list_contents(script in edit_script_strategy(24)) {
        let (db, rid) = tagged_with(&["a", "b"]);
        db.transaction(|txn| {
            let record = txn.load(rid)?;
            let mut tags = record.list_mut("tags")?;
            for edit in &script {
                apply_list_edit(&mut tags, edit);
            }
            Ok(())
        })
        .unwrap();

        let mut txn = db.begin().unwrap();
        let expected: BTreeSet<_> = txn
            .load(rid)
            .unwrap()
            .list("tags")
            .unwrap()
            .map(|l| l.iter().map(|v| IndexKey::single(v.clone())).collect())
            .unwrap_or_default();
        let actual: BTreeSet<_> = committed_entries(&db, "Doc.tags")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn range_conditions_commute((lo, hi) in bounds_strategy(10)) {
        let db = TestDatabase::memory().class("Row").index(schema::property_index(
            "Row.a",
            "Row",
            "a",
            PropertyType::Integer,
            IndexType::NotUnique,
        ));
        scenarios::insert_values(&db, "Row", "a", 0..10i64);

        let ge = KeyCondition::new(ConditionOp::Ge, IndexKey::single(lo));
        let le = KeyCondition::new(ConditionOp::Le, IndexKey::single(hi));
        let mut txn = db.begin().unwrap();
        let forward = txn
            .range("Row.a", &IndexRange::from_conditions(&[ge.clone(), le.clone()]), true)
            .unwrap();
        let backward = txn
            .range("Row.a", &IndexRange::from_conditions(&[le, ge]), true)
            .unwrap();
        let values: Vec<i64> = forward
            .iter()
            .filter_map(|(k, _)| k.fields()[0].as_integer())
            .collect();
        prop_assert_eq!(values, (lo..=hi).collect::<Vec<_>>());
        prop_assert_eq!(forward, backward);
    }
}
