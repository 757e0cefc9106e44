//! In-memory stats store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    BlockAttemptRecord, BlockStatsIdentity, Estimate, StatsStore, StatsStoreError,
    build_estimate_from_records,
};

#[derive(Default)]
struct Inner {
    records: Vec<BlockAttemptRecord>,
    // Secondary index: identity -> positions in `records`.
    index: HashMap<BlockStatsIdentity, Vec<usize>>,
}

/// Append-only in-memory stats store with an identity index.
#[derive(Default)]
pub struct InMemoryStatsStore {
    inner: Mutex<Inner>,
}

impl InMemoryStatsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .len()
    }

    /// True when no records have been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records for one block series, in insertion order.
    pub fn records_for(&self, identity: &BlockStatsIdentity) -> Vec<BlockAttemptRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .index
            .get(identity)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| inner.records[position].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of all records, in insertion order.
    pub fn snapshot(&self) -> Vec<BlockAttemptRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .clone()
    }
}

impl StatsStore for InMemoryStatsStore {
    fn record_attempt(&self, record: &BlockAttemptRecord) -> Result<(), StatsStoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let identity = BlockStatsIdentity {
            block_name: record.block_name.clone(),
            block_type: record.block_type.clone(),
            version: record.version.clone(),
        };
        let position = inner.records.len();
        inner.records.push(record.clone());
        inner.index.entry(identity).or_default().push(position);
        Ok(())
    }

    fn estimate(&self, identity: &BlockStatsIdentity) -> Estimate {
        let relevant = self.records_for(identity);
        let prior = Estimate::from_prior(identity);
        build_estimate_from_records(identity, &relevant, &prior)
    }
}
