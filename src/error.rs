//! Error taxonomy for block execution.
//!
//! Failures surface in two forms:
//!
//! - [`ErrorKind`]: a flat classification tag attached to failed
//!   [`Response`](crate::envelope::Response)s. Recovery policy selection keys
//!   off this tag.
//! - [`BlockError`]: the error type returned by fallible hooks (primitive
//!   execution, condition evaluation, repair functions). The engine converts
//!   an escaping `BlockError` into an `internal_error` response with
//!   sanitized details; it never crosses the block boundary as an `Err`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classification attached to a failed response.
///
/// The tag drives recovery policy selection and is recorded verbatim into
/// the stats store, so variants serialize as stable `snake_case` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model output failed validation against the declared schema.
    SchemaError,
    /// Provider returned a rate-limit signal (HTTP 429 or equivalent).
    RateLimitError,
    /// Provider rejected credentials (HTTP 401/403 or equivalent).
    ApiKeyError,
    /// Prompt exceeded the model's context window.
    ContextLengthError,
    /// Request payload could not be coerced into the expected shape.
    InvalidPayload,
    /// Unclassified failure inside a block.
    InternalError,
    /// Retry or repair was requested for a non-idempotent block.
    UnsafeToRetry,
    /// Composite graph configuration is invalid.
    InvalidGraph,
    /// Graph interpreter reached a node name with no registered block.
    UnknownNode,
    /// Graph interpreter exceeded the configured step ceiling.
    MaxStepsExceeded,
    /// A transition list was present but no branch matched.
    NoTransition,
    /// A branch condition name did not resolve in the registry.
    ConditionResolutionError,
    /// A branch condition failed while evaluating.
    ConditionExecutionError,
    /// A repair function was missing or failed while running.
    RepairExecutionFailed,
    /// A debug policy halted the recovery walk.
    DebugBreakpointHit,
    /// The structured-output executor failed for an unclassified reason.
    LlmExecutionFailed,
}

impl ErrorKind {
    /// Stable string label, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaError => "schema_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::ApiKeyError => "api_key_error",
            ErrorKind::ContextLengthError => "context_length_error",
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::UnsafeToRetry => "unsafe_to_retry",
            ErrorKind::InvalidGraph => "invalid_graph",
            ErrorKind::UnknownNode => "unknown_node",
            ErrorKind::MaxStepsExceeded => "max_steps_exceeded",
            ErrorKind::NoTransition => "no_transition",
            ErrorKind::ConditionResolutionError => "condition_resolution_error",
            ErrorKind::ConditionExecutionError => "condition_execution_error",
            ErrorKind::RepairExecutionFailed => "repair_execution_failed",
            ErrorKind::DebugBreakpointHit => "debug_breakpoint_hit",
            ErrorKind::LlmExecutionFailed => "llm_execution_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for fallible block internals.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Error during primitive execution.
    #[error("execution error: {0}")]
    Execution(String),
    /// Input failed validation before execution.
    #[error("validation error: {0}")]
    Validation(String),
    /// Error during serialization/deserialization.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Error from an underlying storage layer.
    #[error("storage error: {0}")]
    Storage(String),
}

impl BlockError {
    /// Short class label used in sanitized error details.
    pub fn class(&self) -> &'static str {
        match self {
            BlockError::Execution(_) => "execution_error",
            BlockError::Validation(_) => "validation_error",
            BlockError::Serialization(_) => "serialization_error",
            BlockError::Storage(_) => "storage_error",
        }
    }
}

impl From<String> for BlockError {
    fn from(s: String) -> Self {
        BlockError::Execution(s)
    }
}

impl From<&str> for BlockError {
    fn from(s: &str) -> Self {
        BlockError::Execution(s.to_string())
    }
}
