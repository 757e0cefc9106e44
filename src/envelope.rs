//! Request/Response envelope and correlation metadata.
//!
//! Every block consumes a [`Request`] and produces a [`Response`]. Both carry
//! an opaque string-keyed metadata map with a small set of reserved keys
//! (see [`keys`]) used for end-to-end correlation: `trace_id` spans a whole
//! run, `span_id` identifies one block attempt, `parent_span_id` links an
//! attempt to the envelope it was derived from, and `attempt` counts
//! recovery-loop attempts for one child.
//!
//! The engine never mutates an incoming request. Every derivation clones the
//! envelope and rewrites a fresh metadata map, so callers can rely on deep
//! equality of their request before and after `execute`.
//!
//! Envelope ids come from a process-wide factory that defaults to UUIDv4 and
//! can be overridden for deterministic tests via [`set_id_factory`].

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::ErrorKind;

/// String-keyed JSON object used for payload/context/metadata maps.
pub type JsonMap = serde_json::Map<String, Value>;

/// Reserved metadata keys understood by the engine.
///
/// Callers may add arbitrary keys next to these; the engine only ever reads
/// and writes the reserved set.
pub mod keys {
    /// Unique envelope id, minted per attempt.
    pub const ID: &str = "id";
    /// Correlation id spanning a whole run tree.
    pub const TRACE_ID: &str = "trace_id";
    /// Host-assigned run identifier.
    pub const RUN_ID: &str = "run_id";
    /// Identifier of this specific block attempt.
    pub const SPAN_ID: &str = "span_id";
    /// Span of the envelope this attempt was derived from.
    pub const PARENT_SPAN_ID: &str = "parent_span_id";
    /// Attempt counter within one recovery-loop walk.
    pub const ATTEMPT: &str = "attempt";
    /// Name of the block executing this envelope.
    pub const BLOCK_NAME: &str = "block_name";
    /// Composite node name the child was executed under.
    pub const NODE_NAME: &str = "node_name";
    /// Terminal overlay: name of the child that produced the final response.
    pub const SOURCE: &str = "source";
    /// Terminal overlay: name of the enclosing composite.
    pub const COMPOSITE: &str = "composite";
    /// Terminal overlay: node name of the terminal child.
    pub const LAST_NODE: &str = "last_node";
    /// Wall-clock execution duration attached on block exit.
    pub const DURATION_MS: &str = "duration_ms";
}

type IdFn = dyn Fn() -> String + Send + Sync;

static ID_FACTORY: Lazy<RwLock<Option<Arc<IdFn>>>> = Lazy::new(|| RwLock::new(None));

/// Mint a new envelope id from the process-wide factory.
pub fn next_id() -> String {
    let guard = ID_FACTORY.read().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(factory) => factory(),
        None => Uuid::new_v4().to_string(),
    }
}

/// Override the process-wide id factory (deterministic tests).
pub fn set_id_factory<F>(factory: F)
where
    F: Fn() -> String + Send + Sync + 'static,
{
    let mut guard = ID_FACTORY.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(Arc::new(factory));
}

/// Restore the default UUIDv4 id factory.
pub fn reset_id_factory() {
    let mut guard = ID_FACTORY.write().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

/// Standardized request envelope passed to blocks.
///
/// `payload` is the work input (an object in the common case, though atomic
/// blocks may accept a bare string), `context` carries caller-scoped data
/// that travels with the request, and `metadata` holds correlation fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Work input for the block.
    #[serde(default)]
    pub payload: Value,
    /// Caller-scoped context propagated to children.
    #[serde(default)]
    pub context: JsonMap,
    /// Correlation metadata map.
    #[serde(default)]
    pub metadata: JsonMap,
}

impl Request {
    /// Create a request with the given payload and a fresh metadata id.
    pub fn new(payload: Value) -> Self {
        Self::with_parts(payload, JsonMap::new(), JsonMap::new())
    }

    /// Create a request from explicit parts, minting a metadata id if absent.
    pub fn with_parts(payload: Value, context: JsonMap, metadata: JsonMap) -> Self {
        let mut request = Self {
            payload,
            context,
            metadata,
        };
        request
            .metadata
            .entry(keys::ID.to_string())
            .or_insert_with(|| Value::String(next_id()));
        request
    }

    /// Set a context entry, builder style.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Set a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a metadata value as a string slice.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Value::Object(JsonMap::new()))
    }
}

/// Unified response envelope returned by blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the execution succeeded.
    pub success: bool,
    /// Result value produced by the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Short failure label, set whenever `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Structured diagnostic details, sanitized before leaving a block.
    #[serde(default)]
    pub details: JsonMap,
    /// Failure classification used for recovery policy selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Correlation metadata of the attempt that produced this response.
    #[serde(default)]
    pub metadata: JsonMap,
}

impl Response {
    /// Build a successful response carrying `data`.
    pub fn success(data: Value) -> Self {
        let mut response = Self {
            success: true,
            data: Some(data),
            reason: None,
            details: JsonMap::new(),
            error_kind: None,
            metadata: JsonMap::new(),
        };
        response.ensure_id();
        response
    }

    /// Build a failed response with a reason label and classification.
    pub fn failure(reason: impl Into<String>, kind: ErrorKind, details: JsonMap) -> Self {
        let mut response = Self {
            success: false,
            data: None,
            reason: Some(reason.into()),
            details,
            error_kind: Some(kind),
            metadata: JsonMap::new(),
        };
        response.ensure_id();
        response
    }

    /// Build a failed response whose reason label equals the kind label.
    pub fn failure_kind(kind: ErrorKind, details: JsonMap) -> Self {
        Self::failure(kind.as_str(), kind, details)
    }

    /// Replace the metadata map, builder style.
    pub fn with_metadata_map(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self.ensure_id();
        self
    }

    /// Read a metadata value as a string slice.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    fn ensure_id(&mut self) {
        self.metadata
            .entry(keys::ID.to_string())
            .or_insert_with(|| Value::String(next_id()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn request_mints_metadata_id() {
        let request = Request::new(json!({"value": 1}));
        assert!(request.metadata_str(keys::ID).is_some());
    }

    #[test]
    fn request_keeps_caller_supplied_id() {
        let mut metadata = JsonMap::new();
        metadata.insert(keys::ID.into(), json!("fixed"));
        let request = Request::with_parts(json!({}), JsonMap::new(), metadata);
        assert_eq!(request.metadata_str(keys::ID), Some("fixed"));
    }

    #[test]
    fn response_constructors_set_reason_and_kind() {
        let ok = Response::success(json!(42));
        assert!(ok.success);
        assert_eq!(ok.data, Some(json!(42)));
        assert!(ok.reason.is_none());

        let failed = Response::failure_kind(ErrorKind::NoTransition, JsonMap::new());
        assert!(!failed.success);
        assert_eq!(failed.reason.as_deref(), Some("no_transition"));
        assert_eq!(failed.error_kind, Some(ErrorKind::NoTransition));
    }

    #[test]
    fn id_factory_is_overridable() {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        set_id_factory(|| format!("id-{}", COUNTER.fetch_add(1, Ordering::SeqCst)));
        let first = next_id();
        let second = next_id();
        reset_id_factory();
        assert!(first.starts_with("id-"));
        assert_ne!(first, second);
        // Back to UUIDs after reset.
        assert_eq!(next_id().len(), 36);
    }

    #[test]
    fn response_serde_round_trip() {
        let mut details = JsonMap::new();
        details.insert("node".into(), json!("a"));
        let failed = Response::failure("max_steps_exceeded", ErrorKind::MaxStepsExceeded, details);
        let encoded = serde_json::to_string(&failed).unwrap();
        let decoded: Response = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, failed);
    }
}
