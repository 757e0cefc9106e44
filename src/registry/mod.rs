//! Named registries consumed by the graph interpreter.
//!
//! Transition conditions and repair functions are keyed by name so graph
//! configuration stays declarative and data-driven. Both registries come in
//! two flavors: a process-wide default (ergonomic for applications) and
//! injectable instances (tests, multi-tenant embedding). A registry handle
//! is cheap to clone; clones share the same underlying table.

use thiserror::Error;

mod conditions;
mod repairs;

pub use conditions::{ConditionFn, ConditionRegistry, DEFAULT_CONDITION, global_conditions};
pub use repairs::{ADD_VALIDATION_FEEDBACK, RepairFn, RepairRegistry, global_repairs};

/// Lookup failures for named registry entries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No condition registered under the requested name.
    #[error("condition function '{0}' not found in registry")]
    UnknownCondition(String),
    /// No repair function registered under the requested name.
    #[error("repair function '{0}' not found in registry")]
    UnknownRepair(String),
}
