//! Built-in block implementations.
//!
//! - [`FunctionBlock`]: an atomic block from a closure, for quick
//!   prototyping and tests.
//! - [`CompositeBlock`]: a plain composite over a [`Graph`], for graphs
//!   that need no custom hooks.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Block, BlockCore, Graph, SideEffectClass};
use crate::envelope::{Request, Response};
use crate::error::{BlockError, ErrorKind};
use crate::policy::RecoveryPolicy;
use crate::registry::{ConditionRegistry, RepairRegistry};
use crate::stats::StatsStore;

type Handler = dyn Fn(&Request) -> Result<Response, BlockError> + Send + Sync;
type PolicyStackFn = dyn Fn(ErrorKind) -> Vec<RecoveryPolicy> + Send + Sync;

/// An atomic block backed by a closure.
pub struct FunctionBlock {
    core: BlockCore,
    handler: Box<Handler>,
    policies: Option<Box<PolicyStackFn>>,
}

impl FunctionBlock {
    /// Block type label for function blocks.
    pub const BLOCK_TYPE: &'static str = "function_block";

    /// Create a function block with side-effect class `none`.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, BlockError> + Send + Sync + 'static,
    {
        Self {
            core: BlockCore::new(name, Self::BLOCK_TYPE, SideEffectClass::None),
            handler: Box::new(handler),
            policies: None,
        }
    }

    /// Set the side-effect classification, builder style.
    pub fn with_side_effect_class(mut self, side_effect_class: SideEffectClass) -> Self {
        self.core.set_side_effect_class(side_effect_class);
        self
    }

    /// Override the recovery policy stack, builder style.
    pub fn with_policy_stack<F>(mut self, policies: F) -> Self
    where
        F: Fn(ErrorKind) -> Vec<RecoveryPolicy> + Send + Sync + 'static,
    {
        self.policies = Some(Box::new(policies));
        self
    }

    /// Override the stats store, builder style.
    pub fn with_stats_store(mut self, store: Arc<dyn StatsStore>) -> Self {
        self.core.set_stats_store(store);
        self
    }
}

#[async_trait]
impl Block for FunctionBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    async fn execute_primitive(&self, request: &Request) -> Result<Response, BlockError> {
        (self.handler)(request)
    }

    fn policy_stack(&self, error: ErrorKind) -> Vec<RecoveryPolicy> {
        match &self.policies {
            Some(policies) => policies(error),
            None => crate::policy::default_policy_stack(),
        }
    }
}

/// A plain composite block over a child graph.
pub struct CompositeBlock {
    core: BlockCore,
}

impl CompositeBlock {
    /// Block type label for plain composites.
    pub const BLOCK_TYPE: &'static str = "composite_block";

    /// Create a composite with side-effect class `none`.
    pub fn new(name: impl Into<String>, graph: Graph) -> Self {
        Self {
            core: BlockCore::new(name, Self::BLOCK_TYPE, SideEffectClass::None).with_graph(graph),
        }
    }

    /// Set the side-effect classification, builder style.
    pub fn with_side_effect_class(mut self, side_effect_class: SideEffectClass) -> Self {
        self.core.set_side_effect_class(side_effect_class);
        self
    }

    /// Override the stats store, builder style.
    pub fn with_stats_store(mut self, store: Arc<dyn StatsStore>) -> Self {
        self.core.set_stats_store(store);
        self
    }

    /// Override the condition registry, builder style.
    pub fn with_conditions(mut self, conditions: ConditionRegistry) -> Self {
        self.core.set_conditions(conditions);
        self
    }

    /// Override the repair registry, builder style.
    pub fn with_repairs(mut self, repairs: RepairRegistry) -> Self {
        self.core.set_repairs(repairs);
        self
    }
}

#[async_trait]
impl Block for CompositeBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }
}
