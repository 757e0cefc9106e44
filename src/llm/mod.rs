//! Structured-output LLM executor interface.
//!
//! The engine depends on no provider SDK. The [`LlmPrimitive`] block talks
//! to a [`StructuredOutputExecutor`]: an adapter that sends a message list
//! plus a declared output schema to a model, performs its own
//! schema-validation retries internally, and reports back a tagged
//! [`LlmResponse`]. Hosts implement the trait over whatever client they
//! use; tests implement it with canned responses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::envelope::JsonMap;
use crate::error::ErrorKind;
use crate::stats::{BlockStatsIdentity, Estimate, EstimateSource, StatsStore};

mod error_map;
mod primitive;

pub use error_map::{LlmErrorMapping, classify_provider_error, classify_schema_failure};
pub use primitive::{DEFAULT_MODEL, LlmPrimitive};

/// One chat message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role, `system` or `user`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// A user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Executor-level status for one LLM execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStatus {
    /// Output parsed and validated against the schema.
    Success,
    /// Output was well-formed transport-wise but failed validation.
    SemanticError,
    /// Transport or provider failure (timeouts, 5xx, rate limits).
    MechanicalError,
    /// The request exceeded a capacity limit such as the context window.
    CapacityError,
    /// Misconfiguration such as bad credentials.
    ConfigError,
    /// A spend or quota budget was exhausted.
    BudgetError,
}

/// Provider usage metadata for one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Number of provider requests made, including validation retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<u64>,
    /// Input token count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Output token count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Request payload handed to a structured-output executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Chat messages for the model.
    pub messages: Vec<ChatMessage>,
    /// JSON schema the output must validate against.
    pub output_schema: Value,
    /// Model identifier for the request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Unique execution identifier for auditing.
    pub execution_id: String,
    /// Attempt number for this execution.
    pub attempt: u32,
    /// Correlation metadata forwarded for auditing.
    #[serde(default)]
    pub metadata: JsonMap,
    /// Optional API base override for proxy routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Optional API key for provider access. Never emitted in error
    /// details; the sanitizer redacts the key name wholesale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Response container returned by a structured-output executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Execution status.
    pub status: LlmStatus,
    /// Parsed output when successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Stable reason label for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failure classification for recovery mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Structured error details.
    #[serde(default)]
    pub error_details: JsonMap,
    /// Provider usage metadata when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
}

impl LlmResponse {
    /// Build a successful executor response.
    pub fn success(data: Value) -> Self {
        Self {
            status: LlmStatus::Success,
            data: Some(data),
            reason: None,
            error_kind: None,
            error_details: JsonMap::new(),
            usage: None,
        }
    }

    /// Attach usage metadata, builder style.
    pub fn with_usage(mut self, usage: LlmUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Build a failed executor response.
    pub fn failure(
        status: LlmStatus,
        reason: impl Into<String>,
        error_kind: ErrorKind,
        error_details: JsonMap,
    ) -> Self {
        Self {
            status,
            data: None,
            reason: Some(reason.into()),
            error_kind: Some(error_kind),
            error_details,
            usage: None,
        }
    }

    /// Build a failure directly from an error mapping.
    pub fn from_mapping(mapping: LlmErrorMapping) -> Self {
        Self::failure(
            mapping.status,
            mapping.reason,
            mapping.error_kind,
            mapping.details,
        )
    }
}

/// Adapter that executes one structured-output request against a model.
///
/// Implementations own transport, timeouts, and schema-validation retries.
/// The primitive invokes `execute` exactly once per block attempt.
#[async_trait]
pub trait StructuredOutputExecutor: Send + Sync {
    /// Execute an LLM request.
    async fn execute(&self, request: &LlmRequest) -> LlmResponse;
}

/// Stats adapter preferring recorded history over a caller-supplied prior.
pub struct LlmStatsAdapter {
    store: Arc<dyn StatsStore>,
}

impl LlmStatsAdapter {
    /// Create an adapter over a stats store.
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self { store }
    }

    /// Estimate via the store; fall back to `prior` while the store has no
    /// samples for the identity.
    pub fn estimate(&self, identity: &BlockStatsIdentity, prior: Estimate) -> Estimate {
        let estimate = self.store.estimate(identity);
        if estimate.estimate_source == EstimateSource::Prior || estimate.sample_size == 0 {
            return prior;
        }
        estimate
    }
}
