//! Composite graph model and interpreter.
//!
//! A composite block holds named child blocks, an entry point, and per-node
//! transition rules:
//!
//! - no transition: the node is terminal;
//! - [`Transition::Next`]: unconditional next node;
//! - [`Transition::Branches`]: ordered condition/target pairs, first match
//!   wins.
//!
//! Graphs validate on first use (cached until the graph changes): the entry
//! point must exist, every transition source and target must name a known
//! node, and every branch condition must resolve in the condition registry.
//! The interpreter walks children strictly sequentially, applies each
//! child's recovery policies on failure, and enforces a step ceiling.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::recovery;
use super::{Block, BlockCore};
use crate::envelope::{JsonMap, Request, Response, keys};
use crate::error::ErrorKind;
use crate::registry::ConditionRegistry;
use crate::sanitize::exception_details;

/// Default ceiling on graph steps per execution.
pub const DEFAULT_MAX_STEPS: usize = 128;

/// One conditional branch of a transition list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Condition name resolved in the condition registry.
    pub condition: String,
    /// Target node name.
    pub target: String,
}

impl Branch {
    /// Branch guarded by a named condition.
    pub fn new(condition: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            target: target.into(),
        }
    }

    /// Branch guarded by the always-true `default` condition.
    pub fn default_to(target: impl Into<String>) -> Self {
        Self::new(crate::registry::DEFAULT_CONDITION, target)
    }
}

/// Outgoing transition configuration for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Unconditional next node.
    Next(String),
    /// Ordered branches; the first condition returning true wins.
    Branches(Vec<Branch>),
}

/// Child graph of a composite block.
pub struct Graph {
    nodes: HashMap<String, Arc<dyn Block>>,
    entry_point: String,
    transitions: HashMap<String, Transition>,
    max_steps: usize,
}

impl Graph {
    /// Create a graph from parts with the default step ceiling.
    pub fn new(
        nodes: HashMap<String, Arc<dyn Block>>,
        entry_point: impl Into<String>,
        transitions: HashMap<String, Transition>,
    ) -> Self {
        Self {
            nodes,
            entry_point: entry_point.into(),
            transitions,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Override the step ceiling, builder style.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Name of the start node.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Step ceiling for one execution.
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Look up a child by node name.
    pub fn node(&self, name: &str) -> Option<&Arc<dyn Block>> {
        self.nodes.get(name)
    }

    /// Node names of this graph.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Outgoing transition for a node, if configured.
    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.get(name)
    }

    /// Check graph integrity. Returns a failure response describing the
    /// first problem found, or `None` when the graph is valid.
    pub fn validate(&self, conditions: &ConditionRegistry) -> Option<Response> {
        if self.entry_point.is_empty() {
            return Some(invalid_graph("graph block missing entry_point"));
        }
        if !self.nodes.contains_key(&self.entry_point) {
            return Some(invalid_graph(format!(
                "entry_point '{}' not found",
                self.entry_point
            )));
        }
        for (from_node, transition) in &self.transitions {
            if !self.nodes.contains_key(from_node) {
                return Some(invalid_graph(format!(
                    "transition from unknown node '{from_node}'"
                )));
            }
            match transition {
                Transition::Next(target) => {
                    if !self.nodes.contains_key(target) {
                        return Some(invalid_graph(format!(
                            "transition target '{target}' not found"
                        )));
                    }
                }
                Transition::Branches(branches) => {
                    for branch in branches {
                        if branch.target.is_empty() {
                            return Some(invalid_graph(format!(
                                "missing target for node '{from_node}'"
                            )));
                        }
                        if !self.nodes.contains_key(&branch.target) {
                            return Some(invalid_graph(format!(
                                "transition target '{}' not found",
                                branch.target
                            )));
                        }
                        if let Err(resolution_error) = conditions.get(&branch.condition) {
                            let mut details = JsonMap::new();
                            details.insert(
                                "error".into(),
                                Value::String(resolution_error.to_string()),
                            );
                            details.insert(
                                "condition".into(),
                                Value::String(branch.condition.clone()),
                            );
                            return Some(Response::failure_kind(
                                ErrorKind::ConditionResolutionError,
                                details,
                            ));
                        }
                    }
                }
            }
        }
        None
    }
}

fn invalid_graph(message: impl Into<String>) -> Response {
    let mut details = JsonMap::new();
    details.insert("error".into(), Value::String(message.into()));
    Response::failure_kind(ErrorKind::InvalidGraph, details)
}

/// Fluent builder for composite graphs.
pub struct GraphBuilder {
    nodes: HashMap<String, Arc<dyn Block>>,
    entry_point: String,
    transitions: HashMap<String, Transition>,
    max_steps: usize,
}

impl GraphBuilder {
    /// Start an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            entry_point: String::new(),
            transitions: HashMap::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Set the entry node name.
    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }

    /// Set the step ceiling.
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Add a child block under a node name.
    pub fn node(mut self, name: impl Into<String>, block: Arc<dyn Block>) -> Self {
        self.nodes.insert(name.into(), block);
        self
    }

    /// Add an unconditional transition.
    pub fn next(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions
            .insert(from.into(), Transition::Next(to.into()));
        self
    }

    /// Add an ordered branch list for a node.
    pub fn branches(mut self, from: impl Into<String>, branches: Vec<Branch>) -> Self {
        self.transitions
            .insert(from.into(), Transition::Branches(branches));
        self
    }

    /// Build the graph.
    pub fn build(self) -> Graph {
        Graph {
            nodes: self.nodes,
            entry_point: self.entry_point,
            transitions: self.transitions,
            max_steps: self.max_steps,
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret the composite graph of `core`.
pub(crate) async fn run_graph(core: &BlockCore, composite_name: &str, request: &Request) -> Response {
    if let Some(validation_failure) = core.validate_graph() {
        return validation_failure;
    }
    let Some(graph) = core.graph() else {
        return invalid_graph("composite block has no graph");
    };

    let mut current = Some(graph.entry_point().to_string());
    let mut steps = 0usize;

    while let Some(node_name) = current.take() {
        steps += 1;
        if steps > graph.max_steps() {
            let mut details = JsonMap::new();
            details.insert("max_steps".into(), Value::from(graph.max_steps()));
            details.insert("node".into(), Value::String(node_name));
            return Response::failure_kind(ErrorKind::MaxStepsExceeded, details);
        }

        let Some(node) = graph.node(&node_name) else {
            let mut details = JsonMap::new();
            details.insert(
                "error".into(),
                Value::String(format!("entry point/node '{node_name}' not found")),
            );
            return Response::failure_kind(ErrorKind::UnknownNode, details);
        };

        let response = recovery::execute_child_with_recovery(core, request, node, &node_name).await;
        if !response.success {
            // The child's policy stack already had its chance; the graph
            // fails with the child response unchanged.
            return response;
        }

        match graph.transition(&node_name) {
            None => {
                let mut terminal = response;
                terminal
                    .metadata
                    .insert(keys::SOURCE.to_string(), Value::String(node.name().into()));
                terminal.metadata.insert(
                    keys::COMPOSITE.to_string(),
                    Value::String(composite_name.into()),
                );
                terminal
                    .metadata
                    .insert(keys::LAST_NODE.to_string(), Value::String(node_name));
                return terminal;
            }
            Some(Transition::Next(next)) => {
                current = Some(next.clone());
            }
            Some(Transition::Branches(branches)) => {
                let mut next = None;
                for branch in branches {
                    let condition = match core.conditions().get(&branch.condition) {
                        Ok(condition) => condition,
                        Err(resolution_error) => {
                            let mut details = JsonMap::new();
                            details.insert(
                                "error".into(),
                                Value::String(resolution_error.to_string()),
                            );
                            details.insert(
                                "condition".into(),
                                Value::String(branch.condition.clone()),
                            );
                            return Response::failure_kind(
                                ErrorKind::ConditionResolutionError,
                                details,
                            );
                        }
                    };
                    match condition(&response) {
                        Ok(true) => {
                            next = Some(branch.target.clone());
                            break;
                        }
                        Ok(false) => {}
                        Err(execution_error) => {
                            let mut details = JsonMap::new();
                            details.insert(
                                "condition".into(),
                                Value::String(branch.condition.clone()),
                            );
                            details.insert(
                                "error".into(),
                                Value::Object(exception_details(&execution_error)),
                            );
                            return Response::failure_kind(
                                ErrorKind::ConditionExecutionError,
                                details,
                            );
                        }
                    }
                }
                match next {
                    Some(target) => current = Some(target),
                    None => {
                        let mut details = JsonMap::new();
                        details.insert("node".into(), Value::String(node_name));
                        return Response::failure_kind(ErrorKind::NoTransition, details);
                    }
                }
            }
        }
    }

    // Terminal nodes return inside the loop; reaching this point means the
    // walk ended without producing a response.
    Response::failure(
        "graph_execution_ended_unexpectedly",
        ErrorKind::InternalError,
        JsonMap::new(),
    )
}
