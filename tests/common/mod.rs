//! Shared fixtures for the integration suites.
//!
//! Every fixture block is wired to an explicit stats store so tests can
//! observe the records of both composites and children without touching the
//! process-wide default store.
#![allow(dead_code)]

use blockflow::prelude::*;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Requests observed by fixture blocks, in execution order.
pub type SeenRequests = Arc<Mutex<Vec<Request>>>;

pub fn seen_requests() -> SeenRequests {
    Arc::new(Mutex::new(Vec::new()))
}

/// An atomic block that echoes `payload.value` as its data.
pub fn echo_block(name: &str, store: &Arc<InMemoryStatsStore>) -> FunctionBlock {
    FunctionBlock::new(name, |request: &Request| {
        Ok(Response::success(
            request.payload.get("value").cloned().unwrap_or(Value::Null),
        ))
    })
    .with_stats_store(store.clone())
}

/// An atomic block that succeeds with fixed data.
pub fn constant_block(name: &str, data: Value, store: &Arc<InMemoryStatsStore>) -> FunctionBlock {
    FunctionBlock::new(name, move |_request: &Request| {
        Ok(Response::success(data.clone()))
    })
    .with_stats_store(store.clone())
}

/// An atomic block that always fails with the given reason, recording every
/// request it sees.
pub fn failing_block(
    name: &str,
    reason: &str,
    kind: ErrorKind,
    seen: SeenRequests,
    store: &Arc<InMemoryStatsStore>,
) -> FunctionBlock {
    let reason = reason.to_string();
    FunctionBlock::new(name, move |request: &Request| {
        seen.lock().unwrap().push(request.clone());
        Ok(Response::failure(reason.clone(), kind, JsonMap::new()))
    })
    .with_stats_store(store.clone())
}

/// Wrap a single child into a one-node composite with the given stats store
/// and fresh registries.
pub fn single_node_composite(
    name: &str,
    node_name: &str,
    child: Arc<dyn Block>,
    store: &Arc<InMemoryStatsStore>,
) -> CompositeBlock {
    single_node_composite_with_repairs(name, node_name, child, store, RepairRegistry::new())
}

/// Same as [`single_node_composite`], with an explicit repair registry.
pub fn single_node_composite_with_repairs(
    name: &str,
    node_name: &str,
    child: Arc<dyn Block>,
    store: &Arc<InMemoryStatsStore>,
    repairs: RepairRegistry,
) -> CompositeBlock {
    let graph = GraphBuilder::new()
        .entry_point(node_name)
        .node(node_name, child)
        .build();
    CompositeBlock::new(name, graph)
        .with_stats_store(store.clone())
        .with_conditions(ConditionRegistry::new())
        .with_repairs(repairs)
}
