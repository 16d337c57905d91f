//! Committed record storage.

use crate::types::{CollectionId, RecordId, SequenceNumber};
use crate::value::PropertyMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// One committed state of a record.
#[derive(Debug, Clone)]
pub(crate) struct RecordVersion {
    /// Commit sequence that produced this state.
    pub seq: SequenceNumber,
    /// Record version after that commit.
    pub version: u64,
    /// Property values, `None` for a deletion tombstone.
    pub data: Option<Arc<PropertyMap>>,
}

/// Committed states of one record, newest first.
#[derive(Debug, Clone, Default)]
pub(crate) struct VersionChain {
    versions: VecDeque<RecordVersion>,
}

impl VersionChain {
    /// Adds a state newer than every existing one.
    pub fn push(&mut self, version: RecordVersion) {
        self.versions.push_front(version);
    }

    /// The state visible to a snapshot taken at `seq`.
    pub fn get_at(&self, seq: SequenceNumber) -> Option<&RecordVersion> {
        self.versions.iter().find(|v| v.seq <= seq)
    }

    /// The newest committed state.
    pub fn latest(&self) -> Option<&RecordVersion> {
        self.versions.front()
    }

    /// Iterates oldest first.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &RecordVersion> {
        self.versions.iter().rev()
    }

    /// Drops states no snapshot at or after `horizon` can see.
    ///
    /// Keeps every state newer than the horizon plus the newest one at or
    /// below it. Returns the number of states dropped.
    pub fn gc(&mut self, horizon: SequenceNumber) -> usize {
        let Some(keep) = self.versions.iter().position(|v| v.seq <= horizon) else {
            return 0;
        };
        let dropped = self.versions.len() - keep - 1;
        self.versions.truncate(keep + 1);
        dropped
    }

    /// Returns true if the only remaining state is a tombstone at or below
    /// the horizon, so the whole chain can go.
    pub fn is_dead(&self, horizon: SequenceNumber) -> bool {
        self.versions.len() == 1
            && self
                .versions
                .front()
                .is_some_and(|v| v.data.is_none() && v.seq <= horizon)
    }
}

/// All committed record versions of a database.
#[derive(Debug, Default)]
pub(crate) struct RecordStore {
    chains: RwLock<FxHashMap<RecordId, VersionChain>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a record as of `seq`. Returns `None` if it did not exist or
    /// was deleted at that point.
    pub fn read_at(&self, rid: RecordId, seq: SequenceNumber) -> Option<(u64, Arc<PropertyMap>)> {
        let chains = self.chains.read();
        let version = chains.get(&rid)?.get_at(seq)?;
        version.data.clone().map(|data| (version.version, data))
    }

    /// Latest committed version number, tombstones included.
    pub fn latest_version(&self, rid: RecordId) -> Option<u64> {
        self.chains
            .read()
            .get(&rid)
            .and_then(VersionChain::latest)
            .map(|v| v.version)
    }

    /// Installs a new committed state. Only called inside the commit
    /// critical section.
    pub fn install(&self, rid: RecordId, version: RecordVersion) {
        self.chains.write().entry(rid).or_default().push(version);
    }

    /// Copies the version chains of every record in a collection.
    pub fn chains_for(&self, collection: CollectionId) -> Vec<(RecordId, VersionChain)> {
        let chains = self.chains.read();
        let mut out: Vec<_> = chains
            .iter()
            .filter(|(rid, _)| rid.collection() == collection)
            .map(|(rid, chain)| (*rid, chain.clone()))
            .collect();
        out.sort_by_key(|(rid, _)| *rid);
        out
    }

    /// Number of records alive at `seq`.
    pub fn live_count(&self, seq: SequenceNumber) -> usize {
        self.chains
            .read()
            .values()
            .filter(|chain| chain.get_at(seq).is_some_and(|v| v.data.is_some()))
            .count()
    }

    /// Drops unreachable versions. Returns (versions dropped, records dropped).
    pub fn cleanup(&self, horizon: SequenceNumber) -> (usize, usize) {
        let mut chains = self.chains.write();
        let mut versions = 0;
        for chain in chains.values_mut() {
            versions += chain.gc(horizon);
        }
        let before = chains.len();
        chains.retain(|_, chain| !chain.is_dead(horizon));
        (versions, before - chains.len())
    }
}
