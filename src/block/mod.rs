//! # Block System - The Building Blocks of the Engine
//!
//! A [`Block`] is the uniform unit of work: atomic blocks perform work
//! directly (an LLM call, a tool invocation), composite blocks interpret a
//! named-node graph of child blocks. Both expose the same contract,
//! `execute(Request) -> Response`, provided by this module:
//!
//! 1. Mark the block busy and capture a monotonic start time.
//! 2. Enrich the request with base correlation metadata (set-if-absent).
//! 3. Dispatch to the graph interpreter (composites) or the
//!    [`execute_primitive`](Block::execute_primitive) hook (atoms). A
//!    `BlockError` escaping the hook becomes an `internal_error` response
//!    with sanitized details.
//! 4. Mark the block ready, attach correlation metadata and duration to the
//!    response, and emit one [`BlockAttemptRecord`] to the stats store.
//!    Stats failures are logged and swallowed; they never fail the block.
//!
//! Implementors embed a [`BlockCore`] carrying the generic machinery and
//! override at most the primitive hook, the policy stack, and the stats
//! identity (composition over inheritance). The provided `execute` is not
//! meant to be overridden.
//!
//! ## Concurrency
//!
//! Execution is synchronous and single-threaded within one `execute` call;
//! the engine never spawns tasks. Block state is advisory bookkeeping held
//! in an atomic, not a lock: two overlapping `execute` calls on the same
//! instance are not guarded here, and hosts that need overlap must
//! interpose their own mutex.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tracing::{error, warn};

use crate::envelope::{JsonMap, Request, Response, keys, next_id};
use crate::error::{BlockError, ErrorKind};
use crate::policy::{RecoveryPolicy, default_policy_stack};
use crate::registry::{ConditionRegistry, RepairRegistry, global_conditions, global_repairs};
use crate::sanitize::exception_details;
use crate::stats::{BlockAttemptRecord, BlockStatsIdentity, Estimate, StatsStore, default_store};

mod builtin;
mod graph;
mod recovery;

pub use builtin::{CompositeBlock, FunctionBlock};
pub use graph::{Branch, DEFAULT_MAX_STEPS, Graph, GraphBuilder, Transition};

/// Side-effect classification gating retry/repair safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    /// No observable side effects.
    None,
    /// Side effects that are safe to repeat.
    Idempotent,
    /// Side effects that must not be repeated.
    NonIdempotent,
}

impl SideEffectClass {
    /// Parse a label, normalizing unknown values to `NonIdempotent`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "none" => SideEffectClass::None,
            "idempotent" => SideEffectClass::Idempotent,
            _ => SideEffectClass::NonIdempotent,
        }
    }

    /// Stable string label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectClass::None => "none",
            SideEffectClass::Idempotent => "idempotent",
            SideEffectClass::NonIdempotent => "non_idempotent",
        }
    }

    /// True when retry/repair policies may re-execute the block.
    pub fn retry_safe(&self) -> bool {
        matches!(self, SideEffectClass::None | SideEffectClass::Idempotent)
    }
}

impl fmt::Display for SideEffectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory execution state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Idle and ready to execute.
    Ready,
    /// Currently inside an `execute` call.
    Busy,
    /// Parked by a host scheduler. Never set by the engine itself.
    Waiting,
}

impl BlockState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BlockState::Busy,
            2 => BlockState::Waiting,
            _ => BlockState::Ready,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BlockState::Ready => 0,
            BlockState::Busy => 1,
            BlockState::Waiting => 2,
        }
    }
}

enum ValidationCache {
    Pending,
    Valid,
    Invalid(Response),
}

/// Generic machinery embedded by every block implementation.
pub struct BlockCore {
    name: String,
    block_type: String,
    side_effect_class: SideEffectClass,
    graph: Option<Graph>,
    state: AtomicU8,
    stats_store: Option<Arc<dyn StatsStore>>,
    conditions: ConditionRegistry,
    repairs: RepairRegistry,
    validation: Mutex<ValidationCache>,
}

impl BlockCore {
    /// Create a core for an atomic block.
    ///
    /// Registries default to the process-wide ones and the stats store to
    /// the process default; all are injectable through the builder methods.
    pub fn new(
        name: impl Into<String>,
        block_type: impl Into<String>,
        side_effect_class: SideEffectClass,
    ) -> Self {
        Self {
            name: name.into(),
            block_type: block_type.into(),
            side_effect_class,
            graph: None,
            state: AtomicU8::new(BlockState::Ready.as_u8()),
            stats_store: None,
            conditions: global_conditions().clone(),
            repairs: global_repairs().clone(),
            validation: Mutex::new(ValidationCache::Pending),
        }
    }

    /// Attach a composite graph, builder style.
    pub fn with_graph(mut self, graph: Graph) -> Self {
        self.set_graph(graph);
        self
    }

    /// Override the stats store, builder style.
    pub fn with_stats_store(mut self, store: Arc<dyn StatsStore>) -> Self {
        self.set_stats_store(store);
        self
    }

    /// Override the condition registry, builder style.
    pub fn with_conditions(mut self, conditions: ConditionRegistry) -> Self {
        self.set_conditions(conditions);
        self
    }

    /// Override the repair registry, builder style.
    pub fn with_repairs(mut self, repairs: RepairRegistry) -> Self {
        self.set_repairs(repairs);
        self
    }

    /// Override the stats store.
    pub fn set_stats_store(&mut self, store: Arc<dyn StatsStore>) {
        self.stats_store = Some(store);
    }

    /// Override the condition registry.
    pub fn set_conditions(&mut self, conditions: ConditionRegistry) {
        self.conditions = conditions;
    }

    /// Override the repair registry.
    pub fn set_repairs(&mut self, repairs: RepairRegistry) {
        self.repairs = repairs;
    }

    /// Override the side-effect classification. Construction-time only;
    /// the class is frozen once the block starts executing.
    pub fn set_side_effect_class(&mut self, side_effect_class: SideEffectClass) {
        self.side_effect_class = side_effect_class;
    }

    /// Stable identifier for this block instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable type identifier for this block.
    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    /// Side-effect classification, frozen at construction.
    pub fn side_effect_class(&self) -> SideEffectClass {
        self.side_effect_class
    }

    /// Current advisory execution state.
    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: BlockState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// True when this block interprets a child graph.
    pub fn is_composite(&self) -> bool {
        self.graph.is_some()
    }

    /// The composite graph, if any.
    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Replace the composite graph and invalidate the validation cache.
    pub fn set_graph(&mut self, graph: Graph) {
        self.graph = Some(graph);
        *self.validation.lock().unwrap_or_else(|e| e.into_inner()) = ValidationCache::Pending;
    }

    /// Resolve the stats store: instance override or process default.
    pub fn stats_store(&self) -> Arc<dyn StatsStore> {
        self.stats_store.clone().unwrap_or_else(default_store)
    }

    pub(crate) fn conditions(&self) -> &ConditionRegistry {
        &self.conditions
    }

    pub(crate) fn repairs(&self) -> &RepairRegistry {
        &self.repairs
    }

    /// Validate the graph on first use; subsequent calls return the cached
    /// outcome until [`set_graph`](Self::set_graph) invalidates it.
    pub(crate) fn validate_graph(&self) -> Option<Response> {
        let mut cache = self.validation.lock().unwrap_or_else(|e| e.into_inner());
        if let ValidationCache::Valid = *cache {
            return None;
        }
        if let ValidationCache::Invalid(failure) = &*cache {
            return Some(failure.clone());
        }
        let outcome = match &self.graph {
            Some(graph) => graph.validate(&self.conditions),
            None => None,
        };
        *cache = match &outcome {
            None => ValidationCache::Valid,
            Some(failure) => ValidationCache::Invalid(failure.clone()),
        };
        outcome
    }

    /// Return a request copy with minimal base metadata populated
    /// (set-if-absent). The input request is never mutated.
    pub(crate) fn enrich_base_metadata(&self, request: &Request) -> Request {
        let mut enriched = request.clone();
        let metadata = &mut enriched.metadata;
        for key in [keys::ID, keys::TRACE_ID, keys::RUN_ID, keys::SPAN_ID] {
            metadata
                .entry(key.to_string())
                .or_insert_with(|| Value::String(next_id()));
        }
        metadata
            .entry(keys::BLOCK_NAME.to_string())
            .or_insert_with(|| Value::String(self.name.clone()));
        metadata
            .entry(keys::ATTEMPT.to_string())
            .or_insert(Value::from(1u32));
        enriched
    }
}

/// Overwrite the response's correlation fields with those of the request
/// that drove this specific attempt.
pub(crate) fn attach_correlation_metadata(request: &Request, response: &mut Response) {
    for key in [
        keys::ID,
        keys::TRACE_ID,
        keys::RUN_ID,
        keys::SPAN_ID,
        keys::PARENT_SPAN_ID,
        keys::ATTEMPT,
        keys::BLOCK_NAME,
        keys::NODE_NAME,
    ] {
        if let Some(value) = request.metadata.get(key) {
            response.metadata.insert(key.to_string(), value.clone());
        }
    }
}

fn metadata_string(metadata: &JsonMap, key: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Build the base attempt record for one block execution.
pub(crate) fn base_attempt_record(
    identity: &BlockStatsIdentity,
    request: &Request,
    response: &Response,
    duration_ms: f64,
) -> BlockAttemptRecord {
    let metadata = &request.metadata;
    BlockAttemptRecord {
        trace_id: metadata_string(metadata, keys::TRACE_ID),
        run_id: metadata_string(metadata, keys::RUN_ID),
        span_id: metadata_string(metadata, keys::SPAN_ID),
        parent_span_id: metadata
            .get(keys::PARENT_SPAN_ID)
            .and_then(Value::as_str)
            .map(str::to_string),
        block_name: identity.block_name.clone(),
        block_type: identity.block_type.clone(),
        version: identity.version.clone(),
        node_name: metadata
            .get(keys::NODE_NAME)
            .and_then(Value::as_str)
            .map(str::to_string),
        attempt: metadata
            .get(keys::ATTEMPT)
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32,
        success: response.success,
        reason: response.reason.clone(),
        error_type: response.error_kind.map(|kind| kind.as_str().to_string()),
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

/// The uniform executable unit.
///
/// Implementors provide [`core`](Block::core)/[`core_mut`](Block::core_mut)
/// and override the hooks they need; `execute` itself is provided and should
/// not be overridden.
#[async_trait]
pub trait Block: Send + Sync {
    /// The embedded generic machinery.
    fn core(&self) -> &BlockCore;

    /// Mutable access to the core, used by [`build`](Block::build) to
    /// configure composite graphs.
    fn core_mut(&mut self) -> &mut BlockCore;

    /// Construction hook: composites call
    /// [`BlockCore::set_graph`] here; atoms leave it as a no-op.
    fn build(&mut self) {}

    /// Atomic work hook. The default succeeds with null data.
    async fn execute_primitive(&self, _request: &Request) -> Result<Response, BlockError> {
        Ok(Response::success(Value::Null))
    }

    /// Recovery policy stack for a failure of the given kind. The default
    /// escalates immediately.
    fn policy_stack(&self, _error: ErrorKind) -> Vec<RecoveryPolicy> {
        default_policy_stack()
    }

    /// Stable identifier for this block instance.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Stable type identifier for this block.
    fn block_type(&self) -> &str {
        self.core().block_type()
    }

    /// Side-effect classification, frozen at construction.
    fn side_effect_class(&self) -> SideEffectClass {
        self.core().side_effect_class()
    }

    /// Identity under which attempts are recorded and estimated. Override
    /// to attach a version.
    fn stats_identity(&self) -> BlockStatsIdentity {
        BlockStatsIdentity::new(self.name(), self.block_type())
    }

    /// Build the stats record for one execution. The base record carries
    /// correlation fields, outcome, and duration; blocks with richer
    /// telemetry (the LLM primitive) override this to enrich it.
    fn attempt_record(
        &self,
        request: &Request,
        response: &Response,
        duration_ms: f64,
    ) -> BlockAttemptRecord {
        base_attempt_record(&self.stats_identity(), request, response, duration_ms)
    }

    /// Side-effect-free estimate of this block's execution footprint.
    fn estimate_execution(&self, _request: &Request) -> Estimate {
        self.core().stats_store().estimate(&self.stats_identity())
    }

    /// Execute the block: composites run the graph interpreter, atoms run
    /// [`execute_primitive`](Block::execute_primitive). Provided; do not
    /// override.
    async fn execute(&self, request: &Request) -> Response {
        let core = self.core();
        core.set_state(BlockState::Busy);
        let started = Instant::now();
        let enriched = core.enrich_base_metadata(request);

        let mut response = if core.is_composite() {
            graph::run_graph(core, self.name(), &enriched).await
        } else {
            match self.execute_primitive(&enriched).await {
                Ok(response) => response,
                Err(execution_error) => {
                    error!(
                        block_name = self.name(),
                        trace_id = enriched.metadata_str(keys::TRACE_ID).unwrap_or_default(),
                        span_id = enriched.metadata_str(keys::SPAN_ID).unwrap_or_default(),
                        error = %execution_error,
                        "block execution failed"
                    );
                    Response::failure_kind(
                        ErrorKind::InternalError,
                        exception_details(&execution_error),
                    )
                }
            }
        };

        core.set_state(BlockState::Ready);
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        attach_correlation_metadata(&enriched, &mut response);
        response
            .metadata
            .insert(keys::DURATION_MS.to_string(), Value::from(duration_ms));

        let record = self.attempt_record(&enriched, &response, duration_ms);
        if let Err(stats_error) = core.stats_store().record_attempt(&record) {
            // Stats are best-effort: never fail the block over bookkeeping.
            warn!(
                block_name = self.name(),
                trace_id = enriched.metadata_str(keys::TRACE_ID).unwrap_or_default(),
                span_id = enriched.metadata_str(keys::SPAN_ID).unwrap_or_default(),
                error = %stats_error,
                "failed to record block attempt"
            );
        }

        response
    }
}
