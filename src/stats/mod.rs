//! Execution stats: attempt records, stores, and estimates.
//!
//! Every block execution emits one [`BlockAttemptRecord`] to a
//! [`StatsStore`] as it exits, success or failure. Stores answer
//! [`estimate`](StatsStore::estimate) queries keyed by a block's
//! [`BlockStatsIdentity`], so hosts can plan work with cold-start priors
//! that tighten as samples accumulate.
//!
//! Recording is best-effort by design: a store error is logged and swallowed
//! by the engine and never alters the block's response.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStatsStore`]: append-only list plus an identity index.
//! - [`JsonStatsStore`]: newline-delimited JSON journal with retention and
//!   compaction.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

mod estimate;
mod journal;
mod memory;

pub use estimate::{
    Estimate, EstimateConfidence, EstimateSource, build_estimate_from_records,
    confidence_from_sample_size, mean_std,
};
pub use journal::JsonStatsStore;
pub use memory::InMemoryStatsStore;

/// Stable identity metadata for a block series.
///
/// Equality over `(block_name, block_type, version)` defines which records
/// aggregate into one estimate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockStatsIdentity {
    /// Stable block instance name.
    pub block_name: String,
    /// Stable block type identifier.
    pub block_type: String,
    /// Optional block version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl BlockStatsIdentity {
    /// Identity without a version.
    pub fn new(block_name: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            block_name: block_name.into(),
            block_type: block_type.into(),
            version: None,
        }
    }

    /// Identity with an explicit version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Record of a single block execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAttemptRecord {
    /// Trace identifier for the run.
    pub trace_id: String,
    /// Run identifier for the trace.
    pub run_id: String,
    /// Span identifier for this block attempt.
    pub span_id: String,
    /// Parent span identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Stable block instance name.
    pub block_name: String,
    /// Stable block type identifier.
    pub block_type: String,
    /// Optional block version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Composite node name this execution ran under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Attempt index within the recovery-loop walk.
    pub attempt: u32,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Failure reason label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failure classification label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Execution duration in milliseconds.
    pub duration_ms: f64,
    /// Actual cost in USD, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Model identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Input token count, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Output token count, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Number of LLM calls made by this attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_calls: Option<u64>,
    /// Number of block executions within this attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_executions: Option<u64>,
    /// Wall-clock time the record was emitted.
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl BlockAttemptRecord {
    /// True when this record belongs to the given block series.
    pub fn matches(&self, identity: &BlockStatsIdentity) -> bool {
        self.block_name == identity.block_name
            && self.block_type == identity.block_type
            && self.version == identity.version
    }

    #[cfg(test)]
    pub(crate) fn test_record(identity: &BlockStatsIdentity, duration_ms: f64) -> Self {
        Self {
            trace_id: "trace".into(),
            run_id: "run".into(),
            span_id: crate::envelope::next_id(),
            parent_span_id: None,
            block_name: identity.block_name.clone(),
            block_type: identity.block_type.clone(),
            version: identity.version.clone(),
            node_name: None,
            attempt: 1,
            success: true,
            reason: None,
            error_type: None,
            duration_ms,
            cost_usd: None,
            model: None,
            input_tokens: None,
            output_tokens: None,
            llm_calls: None,
            block_executions: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Errors surfaced by stats store implementations.
#[derive(Debug, Error)]
pub enum StatsStoreError {
    /// I/O error against the journal file.
    #[error("stats journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error while encoding a record.
    #[error("stats record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Interface for recording attempts and querying block estimates.
pub trait StatsStore: Send + Sync {
    /// Record a single block execution attempt.
    fn record_attempt(&self, record: &BlockAttemptRecord) -> Result<(), StatsStoreError>;

    /// Estimate execution cost/latency for a block series.
    fn estimate(&self, identity: &BlockStatsIdentity) -> Estimate;
}

static DEFAULT_STORE: Lazy<RwLock<Arc<dyn StatsStore>>> =
    Lazy::new(|| RwLock::new(Arc::new(InMemoryStatsStore::new())));

/// The process-wide default stats store.
///
/// Starts as an [`InMemoryStatsStore`]; hosts that want durability install a
/// [`JsonStatsStore`] via [`set_default_store`].
pub fn default_store() -> Arc<dyn StatsStore> {
    DEFAULT_STORE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Replace the process-wide default stats store.
pub fn set_default_store(store: Arc<dyn StatsStore>) {
    let mut guard = DEFAULT_STORE.write().unwrap_or_else(|e| e.into_inner());
    *guard = store;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_defines_series() {
        let a = BlockStatsIdentity::new("echo", "test_block");
        let b = BlockStatsIdentity::new("echo", "test_block");
        let c = BlockStatsIdentity::new("echo", "test_block").with_version("2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn record_matches_its_identity() {
        let identity = BlockStatsIdentity::new("echo", "test_block");
        let record = BlockAttemptRecord::test_record(&identity, 5.0);
        assert!(record.matches(&identity));
        assert!(!record.matches(&BlockStatsIdentity::new("other", "test_block")));
    }

    #[test]
    fn record_serde_round_trip() {
        let identity = BlockStatsIdentity::new("echo", "test_block");
        let record = BlockAttemptRecord::test_record(&identity, 12.5);
        let line = serde_json::to_string(&record).unwrap();
        let decoded: BlockAttemptRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded, record);
    }
}
