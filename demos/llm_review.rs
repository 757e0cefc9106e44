//! 🤖 LLM primitive with a mock executor and a durable stats journal
//!
//! Runs an `LlmPrimitive` against a canned structured-output executor, lets
//! its schema-error recovery stack repair a failing attempt, and shows the
//! stats journal turning a cold-start prior into a sampled estimate.

use async_trait::async_trait;
use blockflow::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fails schema validation on the first call, then produces valid output.
struct ScriptedExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl StructuredOutputExecutor for ScriptedExecutor {
    async fn execute(&self, request: &LlmRequest) -> LlmResponse {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        println!(
            "   executor call #{call}: model={} prompt_chars={}",
            request.model,
            request.messages.last().map(|m| m.content.len()).unwrap_or(0)
        );
        if call == 0 {
            let mut details = JsonMap::new();
            details.insert("error".into(), json!("missing required field 'verdict'"));
            LlmResponse::failure(
                LlmStatus::SemanticError,
                "schema_error",
                ErrorKind::SchemaError,
                details,
            )
        } else {
            LlmResponse::success(json!({"verdict": "approve", "confidence": 0.9})).with_usage(
                LlmUsage {
                    requests: Some(1),
                    input_tokens: Some(180),
                    output_tokens: Some(24),
                },
            )
        }
    }
}

#[tokio::main]
async fn main() {
    println!("🤖 blockflow: LLM primitive + stats journal");
    println!("===========================================\n");

    let journal_path = std::env::temp_dir().join("blockflow_demo_stats.jsonl");
    let journal: Arc<JsonStatsStore> = Arc::new(JsonStatsStore::new(&journal_path));

    let schema = json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string"},
            "confidence": {"type": "number"}
        },
        "required": ["verdict"]
    });

    let reviewer = LlmPrimitive::new(
        "code_reviewer",
        "You review pull requests and return a verdict.",
        schema,
        Arc::new(ScriptedExecutor {
            calls: AtomicUsize::new(0),
        }),
    )
    .with_stats_store(journal.clone());

    let request = Request::new(json!({"prompt": "Review this diff: fn main() {}"}));

    let cold = reviewer.estimate_execution(&request);
    println!(
        "📐 cold estimate: source={:?} time={:.0}ms ±{:.0} llm_calls={}",
        cold.estimate_source, cold.time_ms_mean, cold.time_ms_std, cold.expected_llm_calls
    );

    // Wrap in a composite so the primitive's schema-error stack applies.
    let graph = GraphBuilder::new()
        .entry_point("review")
        .node("review", Arc::new(reviewer) as Arc<dyn Block>)
        .build();
    let pipeline = CompositeBlock::new("review_pipeline", graph).with_stats_store(journal.clone());

    println!("\n▶ executing review pipeline");
    let response = pipeline.execute(&request).await;
    println!(
        "   success={} data={}",
        response.success,
        response.data.clone().unwrap_or(JsonValue::Null)
    );

    let identity = BlockStatsIdentity::new("code_reviewer", "llm_primitive");
    let warm = journal.estimate(&identity);
    println!(
        "\n📐 warm estimate: source={:?} samples={} confidence={:?}",
        warm.estimate_source, warm.sample_size, warm.confidence
    );
    println!("🗒  journal at {}", journal_path.display());
}
