//! Benchmark utilities.

use rand::Rng;
use vinedb_core::{Database, RecordId, TrackedList, Value};

/// Generate `count` random short tags drawn from `distinct` values.
pub fn random_tags(count: usize, distinct: usize) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| Value::from(format!("tag{}", rng.gen_range(0..distinct.max(1)))))
        .collect()
}

/// Insert one record of `class` whose `property` holds a list of `len` tags.
pub fn insert_list_record(
    db: &Database,
    class: &str,
    property: &str,
    len: usize,
) -> vinedb_core::CoreResult<RecordId> {
    let tags = random_tags(len, len);
    db.transaction(|txn| {
        let record = txn.new_record(class)?;
        record.set_property(property, TrackedList::from_values(tags));
        Ok(record.id())
    })
}
