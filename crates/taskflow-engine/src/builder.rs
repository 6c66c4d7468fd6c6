//! Fluent builder for flow snapshots
//!
//! Provides a compact API for constructing flows programmatically, mostly
//! for seeding storage and for tests.

use serde_json::Value;

use crate::types::{FlowEdge, FlowNode, FlowSnapshot, NodeKind, Position, Viewport};

/// Fluent builder for constructing flow snapshots
///
/// # Example
///
/// ```ignore
/// let flow = FlowBuilder::new()
///     .node("problem-1", NodeKind::Problem)
///     .with_field("title", "Churn")
///     .node("data-1", NodeKind::DataSource)
///     .connect("problem-1", "data-1")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct FlowBuilder {
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    viewport: Viewport,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node at the origin
    pub fn node(self, id: impl Into<String>, kind: NodeKind) -> Self {
        self.node_at(id, kind, Position::default())
    }

    /// Add a node at a position
    pub fn node_at(mut self, id: impl Into<String>, kind: NodeKind, position: Position) -> Self {
        self.nodes.push(FlowNode::new(id, kind, position));
        self
    }

    /// Add a node with a raw type tag, which may be outside the catalog
    pub fn raw_node(mut self, id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.nodes.push(FlowNode {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            data: Default::default(),
        });
        self
    }

    /// Set a type-specific field on the most recently added node
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.data.fields.insert(key.into(), value.into());
        }
        self
    }

    /// Set the output of the most recently added node
    pub fn with_output(mut self, output: Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.data.output_data = Some(output);
        }
        self
    }

    /// Connect two nodes with a derived edge id
    pub fn connect(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(FlowEdge::between(source, target));
        self
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn build(self) -> FlowSnapshot {
        FlowSnapshot {
            nodes: self.nodes,
            edges: self.edges,
            viewport: self.viewport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flow_builder() {
        let flow = FlowBuilder::new()
            .node("p", NodeKind::Problem)
            .with_field("title", "Churn")
            .node("d", NodeKind::DataSource)
            .with_output(json!({ "uploaded_files": [] }))
            .connect("p", "d")
            .build();

        assert_eq!(flow.nodes.len(), 2);
        assert_eq!(flow.edges[0].id, "edge_p-d");
        assert_eq!(flow.find_node("p").unwrap().data.str_field("title"), Some("Churn"));
        assert!(flow.find_node("d").unwrap().data.output_data.is_some());
    }
}
