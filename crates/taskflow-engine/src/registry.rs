//! Node type registry
//!
//! Maps each [`NodeKind`] to the handler that implements its processing
//! contract. Handlers are stateless: everything they need arrives through
//! their arguments, and everything they change is returned as a
//! [`NodePatch`] for the engine to commit.
//!
//! # Usage
//!
//! ```ignore
//! use taskflow_engine::{NodeRegistry, NodeKind};
//!
//! // Everything the nodes crate submitted via `inventory`
//! let registry = NodeRegistry::with_builtins();
//! assert!(registry.has_kind(NodeKind::Problem));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{HandlerError, Result, TaskflowError};
use crate::fetch::Fetcher;
use crate::types::{FlowNode, InputData, NodeData, NodeKind, NodePatch};

/// Processing contract for one node kind
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The kind this handler serves
    fn kind(&self) -> NodeKind;

    /// Initial data for a freshly created node, overlaid with `fields`
    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        NodeData::with_fields(fields)
    }

    /// Derive the node's output from its own data
    ///
    /// Must be deterministic given the node data and fetcher responses.
    /// Returning `Value::Null` leaves the node without output.
    async fn generate_output(
        &self,
        node: &FlowNode,
        fetcher: &dyn Fetcher,
    ) -> std::result::Result<Value, HandlerError>;

    /// Fold fresh parent outputs into the node's data
    ///
    /// The returned patch is merged into the node's data before
    /// [`generate_output`](Self::generate_output) runs. The default records
    /// the parent outputs as `inputData`.
    async fn process_input(
        &self,
        _data: &NodeData,
        parent_outputs: &InputData,
        _fetcher: &dyn Fetcher,
    ) -> std::result::Result<NodePatch, HandlerError> {
        Ok(NodePatch::input_data(parent_outputs))
    }

    /// Run a named, user-triggered action
    async fn handle_action(
        &self,
        action: &str,
        _params: &Value,
        _node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> std::result::Result<NodePatch, HandlerError> {
        Err(HandlerError::UnsupportedAction(action.to_string()))
    }
}

/// Link-time registration of a built-in handler
///
/// # Example
///
/// ```ignore
/// inventory::submit!(taskflow_engine::HandlerRegistration {
///     kind: NodeKind::Problem,
///     handler: || Arc::new(ProblemHandler),
/// });
/// ```
pub struct HandlerRegistration {
    /// The kind the handler serves
    pub kind: NodeKind,
    /// Factory for the handler instance
    pub handler: fn() -> Arc<dyn NodeHandler>,
}

inventory::collect!(HandlerRegistration);

/// Registry of node handlers
pub struct NodeRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry holding every handler submitted via `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<HandlerRegistration> {
            let handler = (registration.handler)();
            if handler.kind() != registration.kind {
                log::warn!(
                    "Handler registered as '{}' reports kind '{}', using the registration",
                    registration.kind,
                    handler.kind()
                );
            }
            registry.handlers.insert(registration.kind, handler);
        }
        log::debug!("Collected {} built-in node handlers", registry.len());
        registry
    }

    /// Register a handler under the kind it reports
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Get the handler for a kind
    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Resolve the handler for a node, failing with `NodeTypeNotFound`
    pub fn handler_for(&self, node: &FlowNode) -> Result<Arc<dyn NodeHandler>> {
        let kind = node.kind()?;
        self.get(kind)
            .ok_or_else(|| TaskflowError::unknown_type(&node.id, &node.node_type))
    }

    pub fn has_kind(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Whether a wire tag resolves to a registered handler
    pub fn has_node_type(&self, node_type: &str) -> bool {
        NodeKind::parse(node_type).is_some_and(|k| self.has_kind(k))
    }

    /// Registered kinds in palette order
    pub fn kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|k| self.has_kind(*k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Handlers from `other` override handlers in `self` for the same kind.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.handlers.extend(other.handlers);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Closure-backed handlers
// =============================================================================

/// Handler whose output is computed by a synchronous closure
///
/// `process_input` and `handle_action` keep their default behaviour. Handy
/// for hosts that want to stub a kind, and for tests.
pub struct FnHandler {
    kind: NodeKind,
    output: Box<dyn Fn(&FlowNode) -> std::result::Result<Value, HandlerError> + Send + Sync>,
}

impl FnHandler {
    pub fn new<F>(kind: NodeKind, output: F) -> Self
    where
        F: Fn(&FlowNode) -> std::result::Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self {
            kind,
            output: Box::new(output),
        }
    }
}

#[async_trait]
impl NodeHandler for FnHandler {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    async fn generate_output(
        &self,
        node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> std::result::Result<Value, HandlerError> {
        (self.output)(node)
    }
}
