//! The LLM primitive end to end: error mapping, recovery inside a
//! composite, usage telemetry, and sanitization at the block boundary.

use async_trait::async_trait;
use blockflow::prelude::*;
use blockflow::JsonMap;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn store() -> Arc<InMemoryStatsStore> {
    Arc::new(InMemoryStatsStore::new())
}

fn output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"title": {"type": "string"}},
        "required": ["title"]
    })
}

/// Executor that fails with a schema error until `succeed_after` calls have
/// been made, then succeeds. Records every request it receives.
struct FlakyExecutor {
    calls: AtomicUsize,
    succeed_after: usize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl FlakyExecutor {
    fn new(succeed_after: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            succeed_after,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredOutputExecutor for FlakyExecutor {
    async fn execute(&self, request: &LlmRequest) -> LlmResponse {
        self.requests.lock().unwrap().push(request.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.succeed_after {
            let mut details = JsonMap::new();
            details.insert("error".into(), json!("output missing required field 'title'"));
            LlmResponse::failure(
                LlmStatus::SemanticError,
                "schema_error",
                ErrorKind::SchemaError,
                details,
            )
        } else {
            LlmResponse::success(json!({"title": "summary"})).with_usage(LlmUsage {
                requests: Some(1),
                input_tokens: Some(42),
                output_tokens: Some(7),
            })
        }
    }
}

fn primitive(executor: Arc<dyn StructuredOutputExecutor>, stats: &Arc<InMemoryStatsStore>) -> LlmPrimitive {
    LlmPrimitive::new("summarize", "You summarize text.", output_schema(), executor)
        .with_stats_store(stats.clone())
}

// ------------------------------------
// 7. Schema error mapping and recovery
// ------------------------------------

#[tokio::test]
async fn schema_failure_maps_to_schema_error_response() {
    let stats = store();
    let executor = Arc::new(FlakyExecutor::new(usize::MAX));
    let block = primitive(executor, &stats);

    let response = block
        .execute(&Request::new(json!({"prompt": "summarize this"})))
        .await;

    assert!(!response.success);
    assert_eq!(response.reason.as_deref(), Some("schema_error"));
    assert_eq!(response.error_kind, Some(ErrorKind::SchemaError));
    assert!(
        response.details["error"]
            .as_str()
            .unwrap()
            .contains("required field")
    );
}

#[tokio::test]
async fn composite_applies_the_primitive_recovery_stack() {
    let stats = store();
    let executor = Arc::new(FlakyExecutor::new(1));
    let block = primitive(executor.clone(), &stats);

    let graph = GraphBuilder::new()
        .entry_point("llm")
        .node("llm", Arc::new(block) as Arc<dyn Block>)
        .build();
    let composite = CompositeBlock::new("writer", graph).with_stats_store(stats.clone());

    let response = composite
        .execute(&Request::new(json!({"prompt": "summarize this"})))
        .await;

    // First attempt fails schema validation; the declared stack retries and
    // the second attempt succeeds.
    assert!(response.success);
    assert_eq!(response.data, Some(json!({"title": "summary"})));
    assert_eq!(executor.calls(), 2);

    let attempts: Vec<u32> = stats
        .snapshot()
        .iter()
        .filter(|record| record.block_name == "summarize")
        .map(|record| record.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test]
async fn validation_feedback_repair_amends_the_prompt() {
    let stats = store();
    // Retry(2) exhausts first, then the built-in repair appends feedback and
    // the third attempt succeeds.
    let executor = Arc::new(FlakyExecutor::new(2));
    let block = primitive(executor.clone(), &stats);

    let graph = GraphBuilder::new()
        .entry_point("llm")
        .node("llm", Arc::new(block) as Arc<dyn Block>)
        .build();
    let composite = CompositeBlock::new("writer", graph).with_stats_store(stats.clone());

    let response = composite
        .execute(&Request::new(json!({"prompt": "summarize this"})))
        .await;

    assert!(response.success);
    assert_eq!(executor.calls(), 3);

    let requests = executor.requests.lock().unwrap();
    let last_prompt = &requests[2].messages.last().unwrap().content;
    assert!(last_prompt.starts_with("summarize this"));
    assert!(last_prompt.contains("failed validation"));
    assert!(last_prompt.contains("missing required field 'title'"));
}

// ------------------------------------
// Telemetry and sanitization
// ------------------------------------

#[tokio::test]
async fn success_records_llm_telemetry() {
    let stats = store();
    let executor = Arc::new(FlakyExecutor::new(0));
    let block = primitive(executor, &stats);

    let response = block
        .execute(&Request::new(json!({"prompt": "summarize this"})))
        .await;

    assert!(response.success);
    assert_eq!(response.metadata["llm_calls"], json!(1));
    assert_eq!(response.metadata["llm.retry_count"], json!(0));
    assert!(
        response.metadata["llm.execution_id"]
            .as_str()
            .unwrap()
            .starts_with("summarize-")
    );

    let records = stats.snapshot();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.block_type, "llm_primitive");
    assert_eq!(record.llm_calls, Some(1));
    assert_eq!(record.input_tokens, Some(42));
    assert_eq!(record.output_tokens, Some(7));
    assert_eq!(record.block_executions, Some(1));
    assert!(record.model.is_some());
}

struct LeakyExecutor;

#[async_trait]
impl StructuredOutputExecutor for LeakyExecutor {
    async fn execute(&self, _request: &LlmRequest) -> LlmResponse {
        let mut details = JsonMap::new();
        details.insert("api_key".into(), json!("sk-verysecretkey12345"));
        details.insert(
            "error".into(),
            json!("rejected credential sk-verysecretkey12345"),
        );
        LlmResponse::failure(
            LlmStatus::ConfigError,
            "api_key_error",
            ErrorKind::ApiKeyError,
            details,
        )
    }
}

#[tokio::test]
async fn failure_details_are_sanitized_at_the_boundary() {
    let stats = store();
    let block = primitive(Arc::new(LeakyExecutor), &stats);

    let response = block
        .execute(&Request::new(json!({"prompt": "summarize this"})))
        .await;

    assert!(!response.success);
    assert_eq!(response.reason.as_deref(), Some("api_key_error"));
    assert_eq!(response.details["api_key"], json!("<redacted>"));
    let error_text = response.details["error"].as_str().unwrap();
    assert!(!error_text.contains("sk-verysecretkey"));
}

#[tokio::test]
async fn non_prompt_payload_is_rejected_before_the_executor_runs() {
    let stats = store();
    let executor = Arc::new(FlakyExecutor::new(0));
    let block = primitive(executor.clone(), &stats);

    let response = block.execute(&Request::new(json!(17))).await;

    assert!(!response.success);
    assert_eq!(response.reason.as_deref(), Some("invalid_payload"));
    assert_eq!(response.error_kind, Some(ErrorKind::SchemaError));
    assert_eq!(executor.calls(), 0);
}
