//! Provider error classification.
//!
//! Executor implementations funnel raw provider failures through
//! [`classify_provider_error`] to obtain the normalized
//! `(status, reason, error_kind)` triple the engine understands. The
//! classifier prefers explicit HTTP status codes, then structured error
//! payloads, then message wording, and falls back to
//! `llm_execution_failed`.

use serde_json::Value;

use super::LlmStatus;
use crate::envelope::JsonMap;
use crate::error::ErrorKind;
use crate::sanitize::sanitize_text;

/// Normalized classification of one provider failure.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmErrorMapping {
    /// Executor-level status category.
    pub status: LlmStatus,
    /// Stable reason label.
    pub reason: &'static str,
    /// Error classification for recovery policy selection.
    pub error_kind: ErrorKind,
    /// Sanitized details describing the failure.
    pub details: JsonMap,
}

impl LlmErrorMapping {
    fn new(status: LlmStatus, reason: &'static str, error_kind: ErrorKind, details: JsonMap) -> Self {
        Self {
            status,
            reason,
            error_kind,
            details,
        }
    }
}

/// Classify a schema-validation failure reported by the output validator.
pub fn classify_schema_failure(message: &str) -> LlmErrorMapping {
    let mut details = JsonMap::new();
    details.insert("error".into(), Value::String(sanitize_text(message)));
    LlmErrorMapping::new(
        LlmStatus::SemanticError,
        "schema_error",
        ErrorKind::SchemaError,
        details,
    )
}

/// Classify a provider failure from its HTTP status code, error payload,
/// and message text.
pub fn classify_provider_error(
    status_code: Option<u16>,
    message: &str,
    payload: Option<&Value>,
) -> LlmErrorMapping {
    let mut details = JsonMap::new();
    let sanitized = sanitize_text(message);
    if !sanitized.is_empty() {
        details.insert("error".into(), Value::String(sanitized));
    }
    if let Some(code) = status_code {
        details.insert("status_code".into(), Value::from(code));
    }

    match status_code {
        Some(429) => {
            return LlmErrorMapping::new(
                LlmStatus::MechanicalError,
                "rate_limit_error",
                ErrorKind::RateLimitError,
                details,
            );
        }
        Some(401) | Some(403) => {
            return LlmErrorMapping::new(
                LlmStatus::ConfigError,
                "api_key_error",
                ErrorKind::ApiKeyError,
                details,
            );
        }
        Some(400) => {
            let payload_says_context = payload.map(is_context_length_payload).unwrap_or(false);
            if payload_says_context || mentions_context_length(message) {
                return LlmErrorMapping::new(
                    LlmStatus::CapacityError,
                    "context_length_error",
                    ErrorKind::ContextLengthError,
                    details,
                );
            }
        }
        _ => {}
    }

    let lowered = message.to_lowercase();
    if mentions_context_length(&lowered) {
        return LlmErrorMapping::new(
            LlmStatus::CapacityError,
            "context_length_error",
            ErrorKind::ContextLengthError,
            details,
        );
    }
    if lowered.contains("validation") || lowered.contains("schema") {
        return LlmErrorMapping::new(
            LlmStatus::SemanticError,
            "schema_error",
            ErrorKind::SchemaError,
            details,
        );
    }
    if lowered.contains("rate limit") || lowered.contains("ratelimit") || lowered.contains("429") {
        return LlmErrorMapping::new(
            LlmStatus::MechanicalError,
            "rate_limit_error",
            ErrorKind::RateLimitError,
            details,
        );
    }
    if lowered.contains("api key")
        || lowered.contains("apikey")
        || lowered.contains("authentication")
        || lowered.contains("unauthorized")
    {
        return LlmErrorMapping::new(
            LlmStatus::ConfigError,
            "api_key_error",
            ErrorKind::ApiKeyError,
            details,
        );
    }

    LlmErrorMapping::new(
        LlmStatus::MechanicalError,
        "llm_execution_failed",
        ErrorKind::InternalError,
        details,
    )
}

fn mentions_context_length(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("maximum context length")
        || lowered.contains("context length exceeded")
        || lowered.contains("context_length_exceeded")
        || lowered.contains("context window")
}

/// True when a structured error payload indicates a context-length failure.
fn is_context_length_payload(payload: &Value) -> bool {
    let Some(error_info) = payload.get("error").and_then(Value::as_object) else {
        return false;
    };
    let code = error_info
        .get("code")
        .or_else(|| error_info.get("type"))
        .and_then(Value::as_str);
    if let Some(code) = code {
        let normalized = code.trim().to_lowercase();
        if matches!(
            normalized.as_str(),
            "context_length_exceeded" | "context_window_exceeded" | "context_length" | "context_window"
        ) {
            return true;
        }
    }
    error_info
        .get("message")
        .and_then(Value::as_str)
        .map(mentions_context_length)
        .unwrap_or(false)
}
