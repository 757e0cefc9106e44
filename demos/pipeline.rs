//! 🔀 Composite pipelines, conditional branching, and recovery
//!
//! Builds a small triage pipeline: a scorer block feeds a conditional
//! transition, and a flaky worker is rescued by its retry policy.

use blockflow::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::main]
async fn main() {
    println!("🔀 blockflow: pipelines, branching, recovery");
    println!("============================================\n");

    demo_branching().await;
    println!("\n{}\n", "=".repeat(50));
    demo_retry_recovery().await;
}

/// Route a request to a different node depending on the scorer's output.
async fn demo_branching() {
    println!("📊 Demo 1: conditional branching");

    let conditions = ConditionRegistry::new();
    conditions.register("is_urgent", |response: &Response| {
        Ok(response
            .data
            .as_ref()
            .and_then(Value::as_i64)
            .map(|score| score > 7)
            .unwrap_or(false))
    });

    let scorer = Arc::new(FunctionBlock::new("scorer", |request: &Request| {
        let score = request.payload.get("score").cloned().unwrap_or(json!(0));
        Ok(Response::success(score))
    }));
    let escalate = Arc::new(FunctionBlock::new("escalate", |_: &Request| {
        Ok(Response::success(json!("paged the on-call")))
    }));
    let archive = Arc::new(FunctionBlock::new("archive", |_: &Request| {
        Ok(Response::success(json!("filed for later")))
    }));

    let graph = GraphBuilder::new()
        .entry_point("score")
        .node("score", scorer)
        .node("urgent", escalate)
        .node("routine", archive)
        .branches(
            "score",
            vec![
                Branch::new("is_urgent", "urgent"),
                Branch::default_to("routine"),
            ],
        )
        .build();
    let triage = CompositeBlock::new("triage", graph).with_conditions(conditions);

    for score in [9, 3] {
        let response = triage.execute(&Request::new(json!({"score": score}))).await;
        let last_node = response
            .metadata_str(keys::LAST_NODE)
            .unwrap_or("?")
            .to_string();
        let data = response.data.unwrap_or(JsonValue::Null);
        println!("   score={score} → last_node={last_node} data={data}");
    }
}

/// A worker that fails twice before succeeding, rescued by Retry.
async fn demo_retry_recovery() {
    println!("🔁 Demo 2: retry recovery");

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let worker = FunctionBlock::new("worker", move |_: &Request| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(Response::failure(
                "upstream_hiccup",
                ErrorKind::InternalError,
                JsonMap::new(),
            ))
        } else {
            Ok(Response::success(json!("third time lucky")))
        }
    })
    .with_policy_stack(|_| vec![RecoveryPolicy::retry(3), RecoveryPolicy::Bubble]);

    let graph = GraphBuilder::new()
        .entry_point("work")
        .node("work", Arc::new(worker) as Arc<dyn Block>)
        .build();
    let supervisor = CompositeBlock::new("supervisor", graph);

    let response = supervisor.execute(&Request::default()).await;
    println!(
        "   success={} after {} executions, data={}",
        response.success,
        failures.load(Ordering::SeqCst),
        response.data.unwrap_or(JsonValue::Null)
    );
}
