//! Execution estimates derived from recorded attempts.
//!
//! An [`Estimate`] summarizes the expected footprint of a block: duration,
//! cost, LLM calls, and child executions, with explicit source and
//! confidence tags so callers can tell a cold-start prior from a
//! statistics-backed figure. Means and standard deviations use Welford's
//! one-pass algorithm.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BlockAttemptRecord, BlockStatsIdentity};

/// Where an estimate's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    /// Computed from recorded attempts.
    Stats,
    /// Conservative defaults; no samples were available.
    Prior,
    /// Derived from request shape rather than history.
    Heuristic,
    /// Source could not be determined.
    Unknown,
}

/// Confidence bands keyed to sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateConfidence {
    Low,
    Medium,
    High,
}

/// Structured estimate of a block's expected execution footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Stable block instance name.
    pub block_name: String,
    /// Stable block type identifier.
    pub block_type: String,
    /// Optional block version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Source of the numbers below.
    pub estimate_source: EstimateSource,
    /// Confidence derived from sample size.
    pub confidence: EstimateConfidence,
    /// Number of samples backing the estimate.
    pub sample_size: usize,
    /// Mean duration in milliseconds.
    pub time_ms_mean: f64,
    /// Standard deviation of duration in milliseconds.
    pub time_ms_std: f64,
    /// Mean cost in USD.
    pub cost_usd_mean: f64,
    /// Standard deviation of cost in USD.
    pub cost_usd_std: f64,
    /// Expected number of LLM calls per execution.
    pub expected_llm_calls: f64,
    /// Expected number of block executions per execution.
    pub expected_block_executions: f64,
    /// Optional per-component breakdown for composites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, Estimate>>,
    /// Assumptions and fallback notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Estimate {
    /// Build a conservative prior for a block with no recorded samples.
    pub fn from_prior(identity: &BlockStatsIdentity) -> Self {
        Self {
            block_name: identity.block_name.clone(),
            block_type: identity.block_type.clone(),
            version: identity.version.clone(),
            estimate_source: EstimateSource::Prior,
            confidence: EstimateConfidence::Low,
            sample_size: 0,
            time_ms_mean: 10.0,
            time_ms_std: 5.0,
            cost_usd_mean: 0.0,
            cost_usd_std: 0.0,
            expected_llm_calls: 0.0,
            expected_block_executions: 1.0,
            components: None,
            notes: Vec::new(),
        }
    }

    /// Override the prior duration figures, builder style.
    pub fn with_time(mut self, mean_ms: f64, std_ms: f64) -> Self {
        self.time_ms_mean = mean_ms;
        self.time_ms_std = std_ms;
        self
    }

    /// Override the prior cost figures, builder style.
    pub fn with_cost(mut self, mean_usd: f64, std_usd: f64) -> Self {
        self.cost_usd_mean = mean_usd;
        self.cost_usd_std = std_usd;
        self
    }

    /// Override the expected call counts, builder style.
    pub fn with_expected_calls(mut self, llm_calls: f64, block_executions: f64) -> Self {
        self.expected_llm_calls = llm_calls;
        self.expected_block_executions = block_executions;
        self
    }

    /// Append a note, builder style.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Mean and population standard deviation via Welford's one-pass algorithm.
///
/// Returns `(0.0, 0.0)` for an empty input and a zero deviation for a single
/// sample.
pub fn mean_std(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let mut count = 0u64;
    let mut mean = 0.0f64;
    let mut m2 = 0.0f64;

    for value in values {
        count += 1;
        let delta = value - mean;
        mean += delta / count as f64;
        let delta2 = value - mean;
        m2 += delta * delta2;
    }

    match count {
        0 => (0.0, 0.0),
        1 => (mean, 0.0),
        _ => (mean, (m2 / count as f64).sqrt()),
    }
}

/// Confidence band for a given sample size.
pub fn confidence_from_sample_size(sample_size: usize) -> EstimateConfidence {
    if sample_size >= 20 {
        EstimateConfidence::High
    } else if sample_size >= 5 {
        EstimateConfidence::Medium
    } else {
        EstimateConfidence::Low
    }
}

/// Build an estimate from recorded attempts, falling back to `prior` for
/// fields with no observations.
pub fn build_estimate_from_records(
    identity: &BlockStatsIdentity,
    records: &[BlockAttemptRecord],
    prior: &Estimate,
) -> Estimate {
    let sample_size = records.len();
    if sample_size == 0 {
        return prior.clone();
    }

    let (time_mean, time_std) = mean_std(records.iter().map(|r| r.duration_ms));

    let cost_values: Vec<f64> = records.iter().filter_map(|r| r.cost_usd).collect();
    let llm_call_values: Vec<f64> = records
        .iter()
        .filter_map(|r| r.llm_calls.map(|n| n as f64))
        .collect();
    let block_exec_values: Vec<f64> = records
        .iter()
        .filter_map(|r| r.block_executions.map(|n| n as f64))
        .collect();

    let (cost_mean, cost_std) = mean_std(cost_values.iter().copied());
    let (llm_calls_mean, _) = mean_std(llm_call_values.iter().copied());
    let (block_exec_mean, _) = mean_std(block_exec_values.iter().copied());

    let mut notes = prior.notes.clone();
    if cost_values.is_empty() {
        notes.push("cost_estimate_fell_back_to_prior".into());
    }
    if llm_call_values.is_empty() {
        notes.push("llm_calls_estimate_fell_back_to_prior".into());
    }
    if block_exec_values.is_empty() {
        notes.push("block_exec_estimate_fell_back_to_prior".into());
    }

    Estimate {
        block_name: identity.block_name.clone(),
        block_type: identity.block_type.clone(),
        version: identity.version.clone(),
        estimate_source: EstimateSource::Stats,
        confidence: confidence_from_sample_size(sample_size),
        sample_size,
        time_ms_mean: time_mean,
        time_ms_std: time_std,
        cost_usd_mean: if cost_values.is_empty() {
            prior.cost_usd_mean
        } else {
            cost_mean
        },
        cost_usd_std: if cost_values.is_empty() {
            prior.cost_usd_std
        } else {
            cost_std
        },
        expected_llm_calls: if llm_call_values.is_empty() {
            prior.expected_llm_calls
        } else {
            llm_calls_mean
        },
        expected_block_executions: if block_exec_values.is_empty() {
            prior.expected_block_executions
        } else {
            block_exec_mean
        },
        components: None,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::BlockAttemptRecord;

    fn identity() -> BlockStatsIdentity {
        BlockStatsIdentity::new("worker", "test_block")
    }

    fn record(duration_ms: f64) -> BlockAttemptRecord {
        BlockAttemptRecord::test_record(&identity(), duration_ms)
    }

    #[test]
    fn mean_std_handles_empty_and_single() {
        assert_eq!(mean_std([]), (0.0, 0.0));
        assert_eq!(mean_std([42.0]), (42.0, 0.0));
    }

    #[test]
    fn mean_std_matches_population_formula() {
        let (mean, std) = mean_std([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((std - 2.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(confidence_from_sample_size(0), EstimateConfidence::Low);
        assert_eq!(confidence_from_sample_size(4), EstimateConfidence::Low);
        assert_eq!(confidence_from_sample_size(5), EstimateConfidence::Medium);
        assert_eq!(confidence_from_sample_size(19), EstimateConfidence::Medium);
        assert_eq!(confidence_from_sample_size(20), EstimateConfidence::High);
    }

    #[test]
    fn empty_records_return_the_prior() {
        let prior = Estimate::from_prior(&identity());
        let estimate = build_estimate_from_records(&identity(), &[], &prior);
        assert_eq!(estimate.estimate_source, EstimateSource::Prior);
        assert_eq!(estimate.sample_size, 0);
    }

    #[test]
    fn records_produce_stats_estimate_with_fallback_notes() {
        let prior = Estimate::from_prior(&identity()).with_cost(0.5, 0.1);
        let records = vec![record(100.0), record(200.0), record(300.0)];
        let estimate = build_estimate_from_records(&identity(), &records, &prior);

        assert_eq!(estimate.estimate_source, EstimateSource::Stats);
        assert_eq!(estimate.sample_size, 3);
        assert!((estimate.time_ms_mean - 200.0).abs() < 1e-9);
        // No cost observations: falls back to the prior and says so.
        assert!((estimate.cost_usd_mean - 0.5).abs() < 1e-9);
        assert!(
            estimate
                .notes
                .iter()
                .any(|n| n == "cost_estimate_fell_back_to_prior")
        );
    }
}
