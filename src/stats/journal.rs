//! JSON journal stats store.
//!
//! Records persist as newline-delimited JSON, one record per line, at a
//! configured path. Every write applies retention (keep the last
//! `max_records`) and compacts the journal (rewrite with the retained slice)
//! whenever retention trimmed anything or the file outgrew
//! `max_file_bytes`. A limit of zero disables that limit.
//!
//! The legacy top-level JSON list format is read-only: load detects it by
//! peeking the first non-whitespace byte. Unparseable lines are logged and
//! skipped so one corrupt record never poisons the journal.
//!
//! After any write the file mode is tightened to owner read/write.
//! Permission errors are logged, not fatal.

use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use super::{
    BlockAttemptRecord, BlockStatsIdentity, Estimate, StatsStore, StatsStoreError,
    build_estimate_from_records,
};

/// JSONL-backed stats store with retention and compaction.
pub struct JsonStatsStore {
    path: PathBuf,
    max_records: usize,
    max_file_bytes: u64,
    // Guards the append+compact pair as well as the in-memory slice.
    records: Mutex<Vec<BlockAttemptRecord>>,
}

impl JsonStatsStore {
    /// Default retention cap on stored records.
    pub const DEFAULT_MAX_RECORDS: usize = 5000;
    /// Default journal size that triggers compaction.
    pub const DEFAULT_MAX_FILE_BYTES: u64 = 5_000_000;

    /// Open a journal at `path` with default limits, loading existing
    /// records. Load failures are logged and leave the store empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_limits(path, Self::DEFAULT_MAX_RECORDS, Self::DEFAULT_MAX_FILE_BYTES)
    }

    /// Open a journal with explicit limits. A limit of zero disables it.
    pub fn with_limits(path: impl Into<PathBuf>, max_records: usize, max_file_bytes: u64) -> Self {
        let path = path.into();
        let mut records = load_records(&path);
        apply_retention(&mut records, max_records);
        Self {
            path,
            max_records,
            max_file_bytes,
            records: Mutex::new(records),
        }
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when no records are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append_record(&self, record: &BlockAttemptRecord) -> Result<(), StatsStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        self.tighten_permissions();
        Ok(())
    }

    fn compact(&self, records: &[BlockAttemptRecord]) -> Result<(), StatsStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }
        fs::write(&self.path, buffer)?;
        self.tighten_permissions();
        Ok(())
    }

    fn should_compact(&self) -> bool {
        if self.max_file_bytes == 0 {
            return false;
        }
        match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len() > self.max_file_bytes,
            Err(_) => false,
        }
    }

    #[cfg(unix)]
    fn tighten_permissions(&self) {
        use std::os::unix::fs::PermissionsExt;
        if let Err(error) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)) {
            warn!(path = %self.path.display(), %error, "failed to tighten stats journal permissions");
        }
    }

    #[cfg(not(unix))]
    fn tighten_permissions(&self) {}
}

impl StatsStore for JsonStatsStore {
    fn record_attempt(&self, record: &BlockAttemptRecord) -> Result<(), StatsStoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record.clone());
        let trimmed = apply_retention(&mut records, self.max_records);
        self.append_record(record)?;
        if trimmed || self.should_compact() {
            self.compact(&records)?;
        }
        Ok(())
    }

    fn estimate(&self, identity: &BlockStatsIdentity) -> Estimate {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let relevant: Vec<BlockAttemptRecord> = records
            .iter()
            .filter(|record| record.matches(identity))
            .cloned()
            .collect();
        let prior = Estimate::from_prior(identity);
        build_estimate_from_records(identity, &relevant, &prior)
    }
}

/// Trim to the last `max_records` entries. Zero disables retention.
fn apply_retention(records: &mut Vec<BlockAttemptRecord>, max_records: usize) -> bool {
    if max_records == 0 || records.len() <= max_records {
        return false;
    }
    let excess = records.len() - max_records;
    records.drain(..excess);
    true
}

fn load_records(path: &Path) -> Vec<BlockAttemptRecord> {
    if !path.exists() {
        return Vec::new();
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to load stats journal; starting empty");
            return Vec::new();
        }
    };
    match content.chars().find(|c| !c.is_whitespace()) {
        None => Vec::new(),
        // Legacy format: one top-level JSON list.
        Some('[') => match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| parse_record(path, item))
                .collect(),
            Ok(_) => {
                warn!(path = %path.display(), "stats journal has invalid format; expected list");
                Vec::new()
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to parse legacy stats journal");
                Vec::new()
            }
        },
        Some(_) => content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Value>(line) {
                Ok(value) => parse_record(path, value),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping invalid stats journal line");
                    None
                }
            })
            .collect(),
    }
}

fn parse_record(path: &Path, value: Value) -> Option<BlockAttemptRecord> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(error) => {
            warn!(path = %path.display(), %error, "skipping invalid stats record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::EstimateSource;
    use tempfile::tempdir;

    fn identity() -> BlockStatsIdentity {
        BlockStatsIdentity::new("worker", "test_block")
    }

    #[test]
    fn records_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");

        {
            let store = JsonStatsStore::new(&path);
            for _ in 0..3 {
                store
                    .record_attempt(&BlockAttemptRecord::test_record(&identity(), 50.0))
                    .unwrap();
            }
        }

        let reopened = JsonStatsStore::new(&path);
        let estimate = reopened.estimate(&identity());
        assert_eq!(estimate.estimate_source, EstimateSource::Stats);
        assert_eq!(estimate.sample_size, 3);
    }

    #[test]
    fn retention_caps_record_count_and_compacts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let store = JsonStatsStore::with_limits(&path, 5, 0);

        for _ in 0..12 {
            store
                .record_attempt(&BlockAttemptRecord::test_record(&identity(), 10.0))
                .unwrap();
        }

        assert_eq!(store.len(), 5);
        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 5);
    }

    #[test]
    fn size_limit_triggers_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        // Tiny byte cap: every append overflows and rewrites the journal
        // with the retained slice.
        let store = JsonStatsStore::with_limits(&path, 2, 64);

        for _ in 0..10 {
            store
                .record_attempt(&BlockAttemptRecord::test_record(&identity(), 10.0))
                .unwrap();
        }

        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn zero_limits_disable_retention() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let store = JsonStatsStore::with_limits(&path, 0, 0);

        for _ in 0..20 {
            store
                .record_attempt(&BlockAttemptRecord::test_record(&identity(), 10.0))
                .unwrap();
        }

        assert_eq!(store.len(), 20);
        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 20);
    }

    #[test]
    fn legacy_list_format_is_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let records = vec![
            BlockAttemptRecord::test_record(&identity(), 10.0),
            BlockAttemptRecord::test_record(&identity(), 30.0),
        ];
        fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let store = JsonStatsStore::new(&path);
        let estimate = store.estimate(&identity());
        assert_eq!(estimate.sample_size, 2);
        assert!((estimate.time_ms_mean - 20.0).abs() < 1e-9);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let good = serde_json::to_string(&BlockAttemptRecord::test_record(&identity(), 10.0)).unwrap();
        fs::write(&path, format!("{good}\nnot json\n{{\"half\": true}}\n{good}\n")).unwrap();

        let store = JsonStatsStore::new(&path);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn non_list_top_level_json_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "[1, 2").unwrap();

        let store = JsonStatsStore::new(&path);
        assert!(store.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn journal_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let store = JsonStatsStore::new(&path);
        store
            .record_attempt(&BlockAttemptRecord::test_record(&identity(), 10.0))
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
