//! Transition condition registry.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::RegistryError;
use crate::envelope::Response;
use crate::error::BlockError;

/// A named predicate over a child response, used to select a transition
/// branch. Conditions must be pure and fast; an `Err` surfaces as
/// `condition_execution_error` in the interpreter.
pub type ConditionFn = Arc<dyn Fn(&Response) -> Result<bool, BlockError> + Send + Sync>;

/// The reserved condition name that always matches.
pub const DEFAULT_CONDITION: &str = "default";

/// Registry mapping condition names to predicates.
#[derive(Clone, Default)]
pub struct ConditionRegistry {
    inner: Arc<RwLock<HashMap<String, ConditionFn>>>,
}

impl ConditionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a condition under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: impl Into<String>, condition: F)
    where
        F: Fn(&Response) -> Result<bool, BlockError> + Send + Sync + 'static,
    {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        table.insert(name.into(), Arc::new(condition));
    }

    /// Resolve a condition by name.
    ///
    /// The literal name `"default"` always resolves to a constant-true
    /// predicate, whether or not anything is registered under it.
    pub fn get(&self, name: &str) -> Result<ConditionFn, RegistryError> {
        if name == DEFAULT_CONDITION {
            return Ok(Arc::new(|_: &Response| Ok(true)));
        }
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCondition(name.to_string()))
    }

    /// True when a name would resolve.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Remove all registered conditions (test reset).
    pub fn clear(&self) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        table.clear();
    }
}

static GLOBAL: Lazy<ConditionRegistry> = Lazy::new(ConditionRegistry::new);

/// The process-wide default condition registry.
pub fn global_conditions() -> &'static ConditionRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Response;
    use serde_json::json;

    #[test]
    fn default_condition_always_matches() {
        let registry = ConditionRegistry::new();
        let condition = registry.get("default").unwrap();
        let response = Response::success(json!(null));
        assert!(condition(&response).unwrap());
    }

    #[test]
    fn unknown_condition_is_an_error() {
        let registry = ConditionRegistry::new();
        assert_eq!(
            registry.get("missing").err().unwrap(),
            RegistryError::UnknownCondition("missing".into())
        );
    }

    #[test]
    fn registered_condition_resolves_and_clears() {
        let registry = ConditionRegistry::new();
        registry.register("is_large", |response: &Response| {
            Ok(response
                .data
                .as_ref()
                .and_then(|v| v.as_i64())
                .map(|n| n > 10)
                .unwrap_or(false))
        });

        let condition = registry.get("is_large").unwrap();
        assert!(condition(&Response::success(json!(15))).unwrap());
        assert!(!condition(&Response::success(json!(5))).unwrap());

        registry.clear();
        assert!(registry.get("is_large").is_err());
        // "default" survives a clear because it is synthesized on lookup.
        assert!(registry.contains("default"));
    }

    #[test]
    fn clones_share_the_same_table() {
        let registry = ConditionRegistry::new();
        let clone = registry.clone();
        registry.register("shared", |_| Ok(true));
        assert!(clone.contains("shared"));
    }
}
