//! Recovery policies applied when a child block fails.
//!
//! A block exposes a policy stack per [`ErrorKind`](crate::error::ErrorKind)
//! via [`Block::policy_stack`](crate::block::Block::policy_stack). The
//! composite's recovery loop walks the stack in order; `Bubble` is always
//! terminal for the walk. Policies are plain configuration values, consumed
//! by the interpreter and never persisted.

use std::time::Duration;

/// Tagged recovery strategy for a failed child execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Re-execute the child with the same input, up to `max_attempts` total
    /// attempts, sleeping `delay` between attempts.
    Retry {
        /// Total attempt ceiling across the walk, including the first try.
        max_attempts: u32,
        /// Pause before each re-attempt. `Duration::ZERO` disables the sleep.
        delay: Duration,
    },
    /// Amend the last child request with a named repair function, then
    /// re-execute once.
    Repair {
        /// Name resolved in the repair registry.
        repair_function: String,
    },
    /// Halt the walk and surface a `debug_breakpoint_hit` response carrying
    /// the original failure.
    Debug,
    /// Escalate the failure to the parent unchanged. Terminal for the stack.
    Bubble,
}

impl RecoveryPolicy {
    /// Retry without delay.
    pub fn retry(max_attempts: u32) -> Self {
        RecoveryPolicy::Retry {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    /// Retry with a pause between attempts.
    pub fn retry_with_delay(max_attempts: u32, delay: Duration) -> Self {
        RecoveryPolicy::Retry {
            max_attempts,
            delay,
        }
    }

    /// Repair with the named registry function.
    pub fn repair(repair_function: impl Into<String>) -> Self {
        RecoveryPolicy::Repair {
            repair_function: repair_function.into(),
        }
    }

    /// True for policies that end the stack walk regardless of outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryPolicy::Bubble | RecoveryPolicy::Debug)
    }
}

/// The default stack for any block: escalate immediately.
pub fn default_policy_stack() -> Vec<RecoveryPolicy> {
    vec![RecoveryPolicy::Bubble]
}
