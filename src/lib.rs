//! # Blockflow
//!
//! A composable block execution engine for agent runtimes.
//!
//! Blockflow models work as a **graph of blocks** sharing one uniform
//! contract:
//!
//! - **Block**: the unit of work, atomic (an LLM call, a tool invocation)
//!   or composite (a directed graph of child blocks)
//! - **Envelope**: the `Request`/`Response` pair carrying payload, context,
//!   and correlation metadata (`trace_id`, `span_id`, `attempt`, ...)
//! - **Recovery policies**: retry / repair / debug / bubble stacks applied
//!   per child failure, gated by the child's side-effect class
//! - **Stats store**: an append-only log of attempt records, readable as
//!   cold-start-aware execution estimates
//!
//! ## Architecture
//!
//! The crate is organized into a few subsystems:
//!
//! ### Core
//! - [`envelope`]: `Request`/`Response`, reserved metadata keys, id factory
//! - [`error`]: the flat `ErrorKind` taxonomy and `BlockError`
//! - [`policy`]: `RecoveryPolicy` tagged variants
//! - [`block`]: `BlockCore`, the `Block` trait, the composite graph
//!   interpreter, and the recovery loop
//!
//! ### Registries
//! - [`registry`]: named condition and repair functions, as process-wide
//!   defaults or injectable instances
//!
//! ### Stats
//! - [`stats`]: attempt records, the in-memory store, the JSONL journal
//!   store with retention and compaction, and the estimate model
//!
//! ### LLM
//! - [`llm`]: the structured-output executor interface, provider error
//!   classification, and the `LlmPrimitive` block
//!
//! ## Example
//!
//! ```rust
//! use blockflow::prelude::*;
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let echo = Arc::new(FunctionBlock::new("echo", |request: &Request| {
//!     Ok(Response::success(
//!         request.payload.get("value").cloned().unwrap_or(Value::Null),
//!     ))
//! }));
//!
//! let graph = GraphBuilder::new().entry_point("echo").node("echo", echo).build();
//! let composite = CompositeBlock::new("pipeline", graph);
//!
//! let response = composite.execute(&Request::new(json!({"value": 42}))).await;
//! assert!(response.success);
//! assert_eq!(response.data, Some(json!(42)));
//! # }
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod block;
pub mod envelope;
pub mod error;
pub mod llm;
pub mod policy;
pub mod registry;
pub mod sanitize;
pub mod stats;

// ============================================================================
// RE-EXPORTS
// ============================================================================

// Envelope - the uniform request/response contract
pub use envelope::{JsonMap, Request, Response, keys, next_id, reset_id_factory, set_id_factory};

// Error taxonomy
pub use error::{BlockError, ErrorKind};

// Recovery policies
pub use policy::{RecoveryPolicy, default_policy_stack};

// Block system
pub use block::{
    Block, BlockCore, BlockState, Branch, CompositeBlock, DEFAULT_MAX_STEPS, FunctionBlock, Graph,
    GraphBuilder, SideEffectClass, Transition,
};

// Registries
pub use registry::{
    ADD_VALIDATION_FEEDBACK, ConditionRegistry, RegistryError, RepairRegistry, global_conditions,
    global_repairs,
};

// Stats
pub use stats::{
    BlockAttemptRecord, BlockStatsIdentity, Estimate, EstimateConfidence, EstimateSource,
    InMemoryStatsStore, JsonStatsStore, StatsStore, StatsStoreError, default_store,
    set_default_store,
};

// LLM executor interface and primitive
pub use llm::{
    ChatMessage, LlmPrimitive, LlmRequest, LlmResponse, LlmStatsAdapter, LlmStatus, LlmUsage,
    StructuredOutputExecutor,
};

/// Commonly used external type.
pub use serde_json::Value as JsonValue;

/// Convenient re-exports for common types and traits.
pub mod prelude {
    pub use crate::block::{
        Block, BlockCore, BlockState, Branch, CompositeBlock, FunctionBlock, Graph, GraphBuilder,
        SideEffectClass, Transition,
    };
    pub use crate::envelope::{JsonMap, Request, Response, keys};
    pub use crate::error::{BlockError, ErrorKind};
    pub use crate::llm::{
        ChatMessage, LlmPrimitive, LlmRequest, LlmResponse, LlmStatus, LlmUsage,
        StructuredOutputExecutor,
    };
    pub use crate::policy::RecoveryPolicy;
    pub use crate::registry::{ConditionRegistry, RepairRegistry};
    pub use crate::stats::{
        BlockAttemptRecord, BlockStatsIdentity, Estimate, EstimateConfidence, EstimateSource,
        InMemoryStatsStore, JsonStatsStore, StatsStore,
    };
    pub use serde_json::Value as JsonValue;
}

// ============================================================================
// INTEGRATION TESTS
// ============================================================================
