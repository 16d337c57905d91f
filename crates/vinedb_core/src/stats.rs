//! Database statistics.
//!
//! Counters are updated by the transaction manager and read through
//! [`Database::stats`](crate::Database::stats), which adds the live record
//! and index entry gauges.
//!
//! ```rust,ignore
//! let stats = db.stats();
//! println!("commits: {}", stats.transactions_committed);
//! println!("conflicts: {}", stats.conflicts);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Database counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Transaction counters
    /// Physical transactions started.
    transactions_started: AtomicU64,
    /// Physical transactions committed.
    transactions_committed: AtomicU64,
    /// Physical transactions rolled back, explicitly or by a failed commit.
    transactions_rolled_back: AtomicU64,

    // Commit failures
    /// Commits rejected by version validation.
    conflicts: AtomicU64,
    /// Commits rejected by a unique index.
    uniqueness_violations: AtomicU64,

    // Write volume
    /// Record versions installed by commits.
    record_versions_written: AtomicU64,
    /// Index entry changes merged by commits.
    index_changes_merged: AtomicU64,

    // Cleanup
    /// Cleanup passes run.
    cleanups: AtomicU64,
    /// Record versions dropped by cleanup.
    versions_collected: AtomicU64,
    /// Index lifespans dropped by cleanup.
    index_entries_collected: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self, versions: u64, index_changes: u64) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.record_versions_written
            .fetch_add(versions, Ordering::Relaxed);
        self.index_changes_merged
            .fetch_add(index_changes, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_uniqueness_violation(&self) {
        self.uniqueness_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup(&self, versions: u64, index_entries: u64) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
        self.versions_collected.fetch_add(versions, Ordering::Relaxed);
        self.index_entries_collected
            .fetch_add(index_entries, Ordering::Relaxed);
    }

    /// Returns the number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of commits rejected by version validation.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of commits rejected by a unique index.
    pub fn uniqueness_violations(&self) -> u64 {
        self.uniqueness_violations.load(Ordering::Relaxed)
    }

    /// Returns the number of record versions installed.
    pub fn record_versions_written(&self) -> u64 {
        self.record_versions_written.load(Ordering::Relaxed)
    }

    /// Returns the number of index entry changes merged.
    pub fn index_changes_merged(&self) -> u64 {
        self.index_changes_merged.load(Ordering::Relaxed)
    }

    /// Returns the number of cleanup passes.
    pub fn cleanups(&self) -> u64 {
        self.cleanups.load(Ordering::Relaxed)
    }

    /// Returns the number of record versions dropped by cleanup.
    pub fn versions_collected(&self) -> u64 {
        self.versions_collected.load(Ordering::Relaxed)
    }

    /// Returns the number of index lifespans dropped by cleanup.
    pub fn index_entries_collected(&self) -> u64 {
        self.index_entries_collected.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters. Gauges are left at zero.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            conflicts: self.conflicts(),
            uniqueness_violations: self.uniqueness_violations(),
            record_versions_written: self.record_versions_written(),
            index_changes_merged: self.index_changes_merged(),
            cleanups: self.cleanups(),
            versions_collected: self.versions_collected(),
            index_entries_collected: self.index_entries_collected(),
            live_records: 0,
            index_entries: 0,
        }
    }
}

/// A point-in-time snapshot of database statistics.
///
/// Unlike `DatabaseStats`, this is a plain struct that can be serialized,
/// compared, or passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Commits rejected by version validation.
    pub conflicts: u64,
    /// Commits rejected by a unique index.
    pub uniqueness_violations: u64,
    /// Record versions installed.
    pub record_versions_written: u64,
    /// Index entry changes merged.
    pub index_changes_merged: u64,
    /// Cleanup passes.
    pub cleanups: u64,
    /// Record versions dropped by cleanup.
    pub versions_collected: u64,
    /// Index lifespans dropped by cleanup.
    pub index_entries_collected: u64,
    /// Records alive at the latest commit.
    pub live_records: u64,
    /// Index associations at the latest commit, across all indexes.
    pub index_entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = DatabaseStats::new();
        assert_eq!(stats.transactions_started(), 0);
        assert_eq!(stats.conflicts(), 0);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_transactions() {
        let stats = DatabaseStats::new();

        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit(3, 7);
        stats.record_transaction_rollback();
        stats.record_conflict();

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_rolled_back, 1);
        assert_eq!(snap.record_versions_written, 3);
        assert_eq!(snap.index_changes_merged, 7);
        assert_eq!(snap.conflicts, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = DatabaseStats::new();
        stats.record_cleanup(4, 2);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"versions_collected\":4"));
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DatabaseStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_transaction_start();
                    s.record_uniqueness_violation();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.transactions_started(), 1000);
        assert_eq!(stats.uniqueness_violations(), 1000);
    }
}
