//! Stress tests for VineDB.
//!
//! These harnesses drive many transactions, sequentially or from several
//! threads, and then check that the indexes agree with the records.

use crate::fixtures::schema;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vinedb_core::{
    CoreError, CoreResult, Database, ExtractionMode, IndexKey, IndexType, PropertyType, RecordId,
    Value,
};

/// Class used by the stress harnesses.
pub const STRESS_CLASS: &str = "Item";

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Failures caused by version conflicts.
    pub conflicts: usize,
    /// Failures caused by unique indexes.
    pub uniqueness_violations: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failures: &Failures, duration: Duration) -> Self {
        let failed = failures.total();
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            conflicts: failures.conflicts.load(Ordering::Relaxed),
            uniqueness_violations: failures.uniqueness.load(Ordering::Relaxed),
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!(
            "Failed: {} (conflicts: {}, uniqueness: {})",
            self.failed_ops, self.conflicts, self.uniqueness_violations
        );
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Failure counters shared between worker threads.
#[derive(Debug, Default)]
pub struct Failures {
    conflicts: AtomicUsize,
    uniqueness: AtomicUsize,
    other: AtomicUsize,
}

impl Failures {
    /// Classifies and counts a failed operation.
    pub fn record(&self, err: &CoreError) {
        let counter = match err {
            CoreError::Conflict { .. } => &self.conflicts,
            CoreError::UniquenessViolation { .. } => &self.uniqueness,
            _ => {
                tracing::debug!(error = %err, "unexpected stress failure");
                &self.other
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// All failures.
    pub fn total(&self) -> usize {
        self.conflicts.load(Ordering::Relaxed)
            + self.uniqueness.load(Ordering::Relaxed)
            + self.other.load(Ordering::Relaxed)
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone, Serialize)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct records.
    pub record_count: usize,
    /// Number of distinct tags pushed into `tags` lists.
    pub tag_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            record_count: 100,
            tag_count: 8,
        }
    }
}

/// Creates the `Item` class with a unique `code` index, a non-unique
/// `counter` index and an index over the elements of `tags`.
pub fn prepare_stress_schema(db: &Database) -> CoreResult<()> {
    db.create_class(STRESS_CLASS)?;
    db.create_index(schema::property_index(
        "Item.code",
        STRESS_CLASS,
        "code",
        PropertyType::String,
        IndexType::Unique,
    ))?;
    db.create_index(schema::property_index(
        "Item.counter",
        STRESS_CLASS,
        "counter",
        PropertyType::Integer,
        IndexType::NotUnique,
    ))?;
    db.create_index(schema::collection_index(
        "Item.tags",
        STRESS_CLASS,
        "tags",
        PropertyType::String,
        ExtractionMode::Elements,
        IndexType::NotUnique,
    ))?;
    Ok(())
}

/// Inserts `count` items (at least one) with codes `item-0..` in one
/// transaction.
pub fn populate(db: &Database, count: usize) -> CoreResult<Vec<RecordId>> {
    db.transaction(|txn| {
        let mut ids = Vec::with_capacity(count.max(1));
        for i in 0..count.max(1) {
            let record = txn.new_record(STRESS_CLASS)?;
            record.set_property("code", format!("item-{i}"));
            record.set_property("counter", 0i64);
            ids.push(record.id());
        }
        Ok(ids)
    })
}

fn tag(config: &StressConfig, n: usize) -> String {
    format!("t{}", n % config.tag_count.max(1))
}

/// One update: bump the counter and rotate the tag list.
fn bump(db: &Database, rid: RecordId, tag: &str) -> CoreResult<()> {
    db.transaction(|txn| {
        let record = txn.load(rid)?;
        let counter = record
            .property("counter")
            .and_then(Value::as_integer)
            .unwrap_or_default();
        record.set_property("counter", counter + 1);
        let mut tags = record.list_mut("tags")?;
        tags.push(tag);
        if tags.len() > 3 {
            tags.remove_at(0)?;
        }
        Ok(())
    })
}

/// Run a sequential update stress test over records made by [`populate`].
pub fn stress_sequential_updates(
    db: &Database,
    ids: &[RecordId],
    config: &StressConfig,
) -> StressTestResult {
    let failures = Failures::default();
    let mut successful = 0usize;
    let start = Instant::now();

    for i in 0..config.operations {
        match bump(db, ids[i % ids.len()], &tag(config, i)) {
            Ok(()) => successful += 1,
            Err(err) => failures.record(&err),
        }
    }

    StressTestResult::new(successful, &failures, start.elapsed())
}

/// Run a concurrent update stress test. Threads bump overlapping records,
/// so conflicts are expected; nothing is retried.
pub fn stress_concurrent_updates(
    db: Arc<Database>,
    ids: Arc<Vec<RecordId>>,
    config: &StressConfig,
) -> StressTestResult {
    let failures = Arc::new(Failures::default());
    let successful = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let ids = Arc::clone(&ids);
            let failures = Arc::clone(&failures);
            let successful = Arc::clone(&successful);
            let config = config.clone();

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let n = t * ops_per_thread + i;
                    match bump(&db, ids[n % ids.len()], &tag(&config, n)) {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => failures.record(&err),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        &failures,
        start.elapsed(),
    )
}

/// Run a concurrent unique insert stress test. Every thread tries to
/// insert the same codes, so exactly one insert per code can succeed.
pub fn stress_unique_inserts(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let failures = Arc::new(Failures::default());
    let successful = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let codes = config.record_count;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = Arc::clone(&db);
            let failures = Arc::clone(&failures);
            let successful = Arc::clone(&successful);

            thread::spawn(move || {
                for i in 0..codes {
                    let result = db.transaction(|txn| {
                        txn.new_record(STRESS_CLASS)?
                            .set_property("code", format!("unique-{i}"));
                        Ok(())
                    });
                    match result {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => failures.record(&err),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        &failures,
        start.elapsed(),
    )
}

/// Run a transaction abort stress test. Every other transaction fails
/// after staging its changes.
pub fn stress_transaction_aborts(
    db: &Database,
    ids: &[RecordId],
    config: &StressConfig,
) -> StressTestResult {
    let failures = Failures::default();
    let mut successful = 0usize;
    let start = Instant::now();

    for i in 0..config.operations {
        let should_fail = i % 2 == 0;
        let result = db.transaction(|txn| {
            let record = txn.load(ids[i % ids.len()])?;
            record.list_mut("tags")?.push(tag(config, i));
            txn.flush()?;
            if should_fail {
                Err(CoreError::invalid_operation("intentional"))
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => successful += 1,
            Err(err) => failures.record(&err),
        }
    }

    StressTestResult::new(successful, &failures, start.elapsed())
}

/// Checks that every index of the stress schema holds exactly the keys the
/// committed records produce.
pub fn verify_stress_indexes(db: &Database, ids: &[RecordId]) -> CoreResult<()> {
    let mut expected_counters = BTreeSet::new();
    let mut expected_tags = BTreeSet::new();
    let mut txn = db.begin()?;
    for &rid in ids {
        let record = txn.load(rid)?;
        let counter = record.property("counter").cloned().unwrap_or(Value::Null);
        expected_counters.insert((IndexKey::single(counter), rid));
        if let Some(tags) = record.list("tags")? {
            for tag in tags.iter() {
                expected_tags.insert((IndexKey::single(tag.clone()), rid));
            }
        }
    }

    for (name, expected) in [("Item.counter", expected_counters), ("Item.tags", expected_tags)] {
        let index = db.index(name)?;
        let op = txn.atomic_operation()?;
        let keys = index.stream_keys(op);
        let actual: BTreeSet<_> = index.stream_entries(op, &keys, true)?.into_iter().collect();
        if actual != expected {
            return Err(CoreError::invalid_operation(format!(
                "index {name} diverged: {} entries, expected {}",
                actual.len(),
                expected.len()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db(records: usize) -> (Database, Vec<RecordId>) {
        let db = Database::open_in_memory().expect("Failed to create database");
        prepare_stress_schema(&db).expect("Failed to create schema");
        let ids = populate(&db, records).expect("Failed to populate");
        (db, ids)
    }

    #[test]
    fn test_sequential_updates() {
        let (db, ids) = create_test_db(20);
        let config = StressConfig {
            operations: 500,
            ..Default::default()
        };

        let result = stress_sequential_updates(&db, &ids, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
        verify_stress_indexes(&db, &ids).unwrap();
    }

    #[test]
    fn test_concurrent_updates() {
        let (db, ids) = create_test_db(5);
        let db = Arc::new(db);
        let ids = Arc::new(ids);
        let config = StressConfig {
            operations: 400,
            threads: 4,
            record_count: 5,
            tag_count: 4,
        };

        let result = stress_concurrent_updates(Arc::clone(&db), Arc::clone(&ids), &config);
        assert_eq!(result.total_ops, 400);
        assert_eq!(result.failed_ops, result.conflicts);
        assert_eq!(db.active_transactions(), 0);
        verify_stress_indexes(&db, &ids).unwrap();
    }

    #[test]
    fn test_unique_inserts() {
        let db = Database::open_in_memory().unwrap();
        prepare_stress_schema(&db).unwrap();
        let db = Arc::new(db);
        let config = StressConfig {
            threads: 4,
            record_count: 25,
            ..Default::default()
        };

        let result = stress_unique_inserts(Arc::clone(&db), &config);
        assert_eq!(result.successful_ops, 25);
        assert_eq!(result.uniqueness_violations, 75);
        assert_eq!(db.index("Item.code").unwrap().committed_size(), 25);
    }

    #[test]
    fn test_transaction_aborts() {
        let (db, ids) = create_test_db(10);
        let config = StressConfig {
            operations: 100,
            ..Default::default()
        };

        let result = stress_transaction_aborts(&db, &ids, &config);
        // Half should succeed, half should fail (intentionally)
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
        verify_stress_indexes(&db, &ids).unwrap();
    }
}
