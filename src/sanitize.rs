//! Sanitization of error details at the block boundary.
//!
//! Any `details` map attached to a failure response passes through here
//! before it leaves a block. Sanitization is a security boundary: values
//! under sensitive-looking keys are replaced wholesale, token-shaped
//! substrings are redacted from free text, and strings, collections, and
//! recursion depth are capped so a failure can never echo a prompt, an API
//! key, or an unbounded provider payload back to the caller.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::envelope::JsonMap;
use crate::error::BlockError;

/// Sentinel inserted wherever a value was removed or truncated.
pub const REDACTED: &str = "<redacted>";

/// Maximum length of any sanitized string value.
pub const MAX_STRING_LENGTH: usize = 256;
/// Maximum number of items kept per list or map.
pub const MAX_ITEMS: usize = 25;
/// Maximum recursion depth into nested structures.
pub const MAX_DEPTH: usize = 3;

/// Key fragments whose values are always redacted.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "api_key",
    "apikey",
    "authorization",
    "token",
    "secret",
    "password",
    "prompt",
    "messages",
    "message",
    "content",
    "input",
    "output",
    "completion",
    "payload",
    "schema",
];

static TOKEN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"sk-[A-Za-z0-9]{10,}").expect("valid token pattern"),
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9._-]{10,}").expect("valid token pattern"),
        Regex::new(r"(?i)authorization:\s*bearer\s+[A-Za-z0-9._-]{10,}")
            .expect("valid token pattern"),
    ]
});

/// Redact token patterns and cap a string value.
pub fn sanitize_text(value: &str) -> String {
    sanitize_text_with_limit(value, MAX_STRING_LENGTH)
}

/// Redact token patterns and cap a string value at `max_length`.
pub fn sanitize_text_with_limit(value: &str, max_length: usize) -> String {
    let mut sanitized = value.to_string();
    for pattern in TOKEN_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, REDACTED).into_owned();
    }
    if sanitized.chars().count() <= max_length {
        return sanitized;
    }
    let truncated: String = sanitized.chars().take(max_length).collect();
    format!("{truncated}...[truncated]")
}

/// Sanitize a structured error details map.
pub fn sanitize_details(details: &JsonMap) -> JsonMap {
    match sanitize_value(&Value::Object(details.clone()), MAX_DEPTH) {
        Value::Object(map) => map,
        other => {
            let mut map = JsonMap::new();
            map.insert("error".into(), other);
            map
        }
    }
}

/// Build a sanitized detail map summarizing a [`BlockError`].
///
/// The summary carries only the error class, a capped message, and the cause
/// chain head when one exists.
pub fn exception_details(error: &BlockError) -> JsonMap {
    let mut details = JsonMap::new();
    details.insert("error_class".into(), Value::String(error.class().into()));
    let message = error.to_string();
    if !message.is_empty() {
        details.insert("message".into(), Value::String(sanitize_text(&message)));
    }
    if let Some(cause) = std::error::Error::source(error) {
        details.insert(
            "cause_class".into(),
            Value::String(cause_class_label(error).into()),
        );
        let cause_message = cause.to_string();
        if !cause_message.is_empty() {
            details.insert(
                "cause_message".into(),
                Value::String(sanitize_text(&cause_message)),
            );
        }
    }
    details
}

fn cause_class_label(error: &BlockError) -> &'static str {
    match error {
        BlockError::Serialization(_) => "serde_json_error",
        _ => "source_error",
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

fn sanitize_value(value: &Value, depth: usize) -> Value {
    if depth == 0 {
        return Value::String(REDACTED.into());
    }
    match value {
        Value::String(text) => Value::String(sanitize_text(text)),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::Object(map) => {
            let mut sanitized = JsonMap::new();
            for (index, (key, item)) in map.iter().enumerate() {
                if index >= MAX_ITEMS {
                    sanitized.insert("_truncated".into(), Value::Bool(true));
                    break;
                }
                if is_sensitive_key(key) {
                    sanitized.insert(key.clone(), Value::String(REDACTED.into()));
                } else {
                    sanitized.insert(key.clone(), sanitize_value(item, depth - 1));
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => {
            let mut sanitized = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if index >= MAX_ITEMS {
                    sanitized.push(Value::String(REDACTED.into()));
                    break;
                }
                sanitized.push(sanitize_value(item, depth - 1));
            }
            Value::Array(sanitized)
        }
    }
}
