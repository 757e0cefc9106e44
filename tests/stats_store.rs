//! Stats recording and estimation through the engine: cold-start priors,
//! sample accumulation, and journal durability.

mod common;

use blockflow::prelude::*;
use common::*;
use serde_json::json;
use std::sync::Arc;

// ------------------------------------
// 8. Cold-start estimation
// ------------------------------------

#[tokio::test]
async fn estimate_moves_from_prior_to_stats_after_one_attempt() {
    let stats = Arc::new(InMemoryStatsStore::new());
    let echo = echo_block("echo", &stats);
    let identity = echo.stats_identity();

    let cold = stats.estimate(&identity);
    assert_eq!(cold.estimate_source, EstimateSource::Prior);
    assert_eq!(cold.sample_size, 0);
    assert_eq!(cold.confidence, EstimateConfidence::Low);

    let _ = echo.execute(&Request::new(json!({"value": 1}))).await;

    let warm = stats.estimate(&identity);
    assert_eq!(warm.estimate_source, EstimateSource::Stats);
    assert_eq!(warm.sample_size, 1);
    assert_eq!(warm.confidence, EstimateConfidence::Low);
}

#[tokio::test]
async fn block_estimate_execution_reads_its_own_store() {
    let stats = Arc::new(InMemoryStatsStore::new());
    let echo = echo_block("echo", &stats);

    let request = Request::new(json!({"value": 1}));
    assert_eq!(
        echo.estimate_execution(&request).estimate_source,
        EstimateSource::Prior
    );

    for _ in 0..5 {
        let _ = echo.execute(&request).await;
    }

    let estimate = echo.estimate_execution(&request);
    assert_eq!(estimate.estimate_source, EstimateSource::Stats);
    assert_eq!(estimate.sample_size, 5);
    assert_eq!(estimate.confidence, EstimateConfidence::Medium);
}

#[tokio::test]
async fn failures_are_recorded_too() {
    let stats = Arc::new(InMemoryStatsStore::new());
    let seen = seen_requests();
    let broken = failing_block("broken", "fail", ErrorKind::InternalError, seen, &stats);

    let _ = broken.execute(&Request::default()).await;

    let records = stats.snapshot();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].reason.as_deref(), Some("fail"));
    assert_eq!(records[0].error_type.as_deref(), Some("internal_error"));
}

#[tokio::test]
async fn every_execute_appends_exactly_one_record() {
    let stats = Arc::new(InMemoryStatsStore::new());
    let echo = echo_block("echo", &stats);

    for run in 0..4 {
        let _ = echo.execute(&Request::new(json!({"value": run}))).await;
        assert_eq!(stats.len(), run + 1);
    }
}

// ------------------------------------
// Journal durability through the engine
// ------------------------------------

#[tokio::test]
async fn journal_reload_preserves_sample_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.jsonl");

    let identity;
    {
        let journal: Arc<JsonStatsStore> = Arc::new(JsonStatsStore::new(&path));
        let echo = FunctionBlock::new("echo", |request: &Request| {
            Ok(Response::success(
                request.payload.get("value").cloned().unwrap_or(JsonValue::Null),
            ))
        })
        .with_stats_store(journal.clone());
        identity = echo.stats_identity();

        for run in 0..6 {
            let _ = echo.execute(&Request::new(json!({"value": run}))).await;
        }
    }

    let reopened = JsonStatsStore::new(&path);
    let estimate = reopened.estimate(&identity);
    assert_eq!(estimate.estimate_source, EstimateSource::Stats);
    assert_eq!(estimate.sample_size, 6);
    assert_eq!(estimate.confidence, EstimateConfidence::Medium);
}

#[tokio::test]
async fn journal_retention_holds_under_engine_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.jsonl");
    let journal: Arc<JsonStatsStore> = Arc::new(JsonStatsStore::with_limits(&path, 10, 0));

    let echo = FunctionBlock::new("echo", |_request: &Request| {
        Ok(Response::success(json!(1)))
    })
    .with_stats_store(journal.clone());

    for _ in 0..25 {
        let _ = echo.execute(&Request::default()).await;
    }

    // Retention invariant: lines never exceed max_records after a write.
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 10);
    assert_eq!(journal.len(), 10);
}
