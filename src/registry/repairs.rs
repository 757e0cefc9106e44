//! Repair function registry.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::RegistryError;
use crate::envelope::{JsonMap, Request, Response};
use crate::error::BlockError;

/// A named request amender applied between recovery attempts. Repairs MUST
/// return a new request rather than mutating their input, and should carry
/// metadata forward so correlation chains survive the amendment.
pub type RepairFn = Arc<dyn Fn(&Request, &Response) -> Result<Request, BlockError> + Send + Sync>;

/// Name of the built-in repair that appends validation feedback to a prompt.
pub const ADD_VALIDATION_FEEDBACK: &str = "add_validation_feedback";

/// Registry mapping repair names to functions.
///
/// The built-in [`ADD_VALIDATION_FEEDBACK`] repair is seeded at construction
/// and re-seeded by [`clear`](RepairRegistry::clear), so it is always
/// resolvable.
#[derive(Clone)]
pub struct RepairRegistry {
    inner: Arc<RwLock<HashMap<String, RepairFn>>>,
}

impl RepairRegistry {
    /// Create a registry seeded with the built-in repairs.
    pub fn new() -> Self {
        let registry = Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        };
        registry.seed_builtins();
        registry
    }

    /// Register a repair under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: impl Into<String>, repair: F)
    where
        F: Fn(&Request, &Response) -> Result<Request, BlockError> + Send + Sync + 'static,
    {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        table.insert(name.into(), Arc::new(repair));
    }

    /// Resolve a repair by name.
    pub fn get(&self, name: &str) -> Result<RepairFn, RegistryError> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRepair(name.to_string()))
    }

    /// True when a name would resolve.
    pub fn contains(&self, name: &str) -> bool {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table.contains_key(name)
    }

    /// Remove user-registered repairs and re-seed the built-ins (test reset).
    pub fn clear(&self) {
        {
            let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
            table.clear();
        }
        self.seed_builtins();
    }

    fn seed_builtins(&self) {
        self.register(ADD_VALIDATION_FEEDBACK, add_validation_feedback);
    }
}

impl Default for RepairRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Lazy<RepairRegistry> = Lazy::new(RepairRegistry::new);

/// The process-wide default repair registry.
pub fn global_repairs() -> &'static RepairRegistry {
    &GLOBAL
}

/// Built-in repair: append the validation error from the failure to the
/// request prompt so the next attempt can correct its output.
fn add_validation_feedback(request: &Request, failure: &Response) -> Result<Request, BlockError> {
    let feedback = failure
        .details
        .get("error")
        .map(|error| match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unknown validation error".to_string());

    let original_prompt = extract_prompt(&request.payload);
    let instruction = format!(
        "The previous response failed validation with the following error:\n{feedback}\n\
         Correct the output so it conforms to the required schema."
    );
    let amended = match original_prompt {
        Some(prompt) if !prompt.is_empty() => format!("{prompt}\n\n{instruction}"),
        _ => instruction,
    };

    let mut payload = match &request.payload {
        Value::Object(map) => map.clone(),
        _ => JsonMap::new(),
    };
    payload.insert("prompt".into(), Value::String(amended));

    Ok(Request {
        payload: Value::Object(payload),
        context: request.context.clone(),
        metadata: request.metadata.clone(),
    })
}

fn extract_prompt(payload: &Value) -> Option<String> {
    match payload {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => ["prompt", "content", "input"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str).map(str::to_string)),
        _ => None,
    }
}
