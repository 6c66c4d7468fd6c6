//! In-memory graph store
//!
//! Owns the nodes and edges of one loaded flow and exposes the primitive
//! mutations the façade and propagation engine are built from. Nothing in
//! here propagates: every method touches exactly what it names.
//!
//! Nodes keep their insertion order, which makes traversal order (and so
//! tie-breaking during propagation) deterministic.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, TaskflowError};
use crate::types::{
    FlowEdge, FlowNode, NodeData, NodeId, NodePatch, Position, ProcessingFailure,
};

/// Outcome of inserting an edge
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeInsert {
    /// The edge was added
    Inserted(FlowEdge),
    /// An edge for the same source/target pair already existed
    Existing(FlowEdge),
}

impl EdgeInsert {
    pub fn edge(&self) -> &FlowEdge {
        match self {
            EdgeInsert::Inserted(edge) | EdgeInsert::Existing(edge) => edge,
        }
    }

    pub fn into_edge(self) -> FlowEdge {
        match self {
            EdgeInsert::Inserted(edge) | EdgeInsert::Existing(edge) => edge,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EdgeInsert::Inserted(_))
    }
}

/// A removed node together with the edges that went with it
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedNode {
    pub node: FlowNode,
    pub edges: Vec<FlowEdge>,
}

/// Nodes and edges of a single flow
pub struct GraphStore {
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    clock: Arc<dyn Clock>,
}

impl GraphStore {
    /// Create an empty store using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with a specific clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            clock,
        }
    }

    /// Build a store from already-validated parts
    pub fn from_parts(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>, clock: Arc<dyn Clock>) -> Self {
        Self { nodes, edges, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Like [`get_node`](Self::get_node) but failing with `NodeNotFound`
    pub fn node(&self, id: &str) -> Result<&FlowNode> {
        self.get_node(id)
            .ok_or_else(|| TaskflowError::NodeNotFound(id.to_string()))
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.get_node(id).is_some()
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut FlowNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| TaskflowError::NodeNotFound(id.to_string()))
    }

    pub fn get_edge(&self, id: &str) -> Option<&FlowEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Edges leaving a node
    pub fn edges_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Edges entering a node
    pub fn edges_to<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Direct parents in incoming-edge order, without duplicates
    pub fn parents_of(&self, node_id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.edges_to(node_id)
            .filter(|e| seen.insert(e.source.as_str()))
            .map(|e| e.source.clone())
            .collect()
    }

    /// Direct children in outgoing-edge order, without duplicates
    pub fn children_of(&self, node_id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.edges_from(node_id)
            .filter(|e| seen.insert(e.target.as_str()))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Nodes with no incoming edge, in store order
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.edges_to(&n.id).next().is_none())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Every node reachable from `node_id`, excluding the node itself
    ///
    /// Breadth-first, visiting children in edge order.
    pub fn descendants(&self, node_id: &str) -> Vec<NodeId> {
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(node_id);
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(node_id);

        while let Some(current) = queue.pop_front() {
            for edge in self.edges_from(current) {
                if seen.insert(edge.target.as_str()) {
                    order.push(edge.target.clone());
                    queue.push_back(edge.target.as_str());
                }
            }
        }
        order
    }

    /// Whether adding `source -> target` would close a cycle
    pub fn would_create_cycle(&self, source: &str, target: &str) -> bool {
        source == target || self.descendants(target).iter().any(|id| id == source)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add a node, rejecting duplicate ids
    pub fn insert_node(&mut self, node: FlowNode) -> Result<()> {
        if self.contains_node(&node.id) {
            return Err(TaskflowError::DuplicateNode(node.id));
        }
        log::debug!("Inserted node '{}' ({})", node.id, node.node_type);
        self.nodes.push(node);
        Ok(())
    }

    /// Add an edge
    ///
    /// Idempotent on the source/target pair: inserting a second edge between
    /// the same two nodes returns the existing one and changes nothing.
    pub fn insert_edge(&mut self, edge: FlowEdge) -> Result<EdgeInsert> {
        if let Some(existing) = self
            .edges
            .iter()
            .find(|e| e.connects(&edge.source, &edge.target))
        {
            return Ok(EdgeInsert::Existing(existing.clone()));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains_node(endpoint) {
                return Err(TaskflowError::NodeNotFound(endpoint.clone()));
            }
        }
        if let Some(clash) = self.get_edge(&edge.id) {
            return Err(TaskflowError::EdgeIdConflict {
                edge_id: edge.id.clone(),
                existing_source: clash.source.clone(),
                existing_target: clash.target.clone(),
            });
        }
        log::debug!("Inserted edge '{}' ({} -> {})", edge.id, edge.source, edge.target);
        self.edges.push(edge.clone());
        Ok(EdgeInsert::Inserted(edge))
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(&mut self, id: &str) -> Result<RemovedNode> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| TaskflowError::NodeNotFound(id.to_string()))?;
        let node = self.nodes.remove(index);

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|e| e.source == id || e.target == id);
        self.edges = kept;

        log::debug!("Removed node '{}' with {} edge(s)", id, removed.len());
        Ok(RemovedNode {
            node,
            edges: removed,
        })
    }

    /// Remove a single edge
    pub fn remove_edge(&mut self, id: &str) -> Result<FlowEdge> {
        let index = self
            .edges
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| TaskflowError::EdgeNotFound(id.to_string()))?;
        let edge = self.edges.remove(index);
        log::debug!("Removed edge '{}' ({} -> {})", edge.id, edge.source, edge.target);
        Ok(edge)
    }

    /// Shallow-merge a patch into a node's data and stamp `updated_at`
    ///
    /// The node is left untouched if any field of the patch fails to decode.
    pub fn update_node_data(&mut self, id: &str, patch: &NodePatch) -> Result<()> {
        let now = self.now();
        let node = self.node_mut(id)?;
        let mut data = node.data.clone();
        data.apply_patch(patch)?;
        data.updated_at = Some(now);
        node.data = data;
        Ok(())
    }

    /// Replace a node's data wholesale
    pub fn replace_node_data(&mut self, id: &str, data: NodeData) -> Result<()> {
        self.node_mut(id)?.data = data;
        Ok(())
    }

    /// Record or clear a node's processing failure
    pub fn set_processing_error(
        &mut self,
        id: &str,
        failure: Option<ProcessingFailure>,
    ) -> Result<()> {
        let now = self.now();
        let node = self.node_mut(id)?;
        node.data.processing_error = failure;
        node.data.updated_at = Some(now);
        Ok(())
    }

    /// Move a node on the canvas
    pub fn set_node_position(&mut self, id: &str, position: Position) -> Result<()> {
        self.node_mut(id)?.position = position;
        Ok(())
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;
    use serde_json::json;

    fn node(id: &str) -> FlowNode {
        FlowNode::new(id, NodeKind::Default, Position::default())
    }

    fn store_with(ids: &[&str]) -> GraphStore {
        let mut store = GraphStore::new();
        for id in ids {
            store.insert_node(node(id)).unwrap();
        }
        store
    }

    #[test]
    fn test_insert_node_rejects_duplicates() {
        let mut store = store_with(&["a"]);
        assert!(matches!(
            store.insert_node(node("a")),
            Err(TaskflowError::DuplicateNode(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_edge_is_idempotent_per_pair() {
        let mut store = store_with(&["a", "b"]);
        let first = store.insert_edge(FlowEdge::between("a", "b")).unwrap();
        assert!(first.is_new());

        let second = store.insert_edge(FlowEdge::new("other-id", "a", "b")).unwrap();
        assert!(!second.is_new());
        assert_eq!(second.edge().id, "edge_a-b");
        assert_eq!(store.edges().len(), 1);
    }

    #[test]
    fn test_insert_edge_requires_endpoints() {
        let mut store = store_with(&["a"]);
        let err = store.insert_edge(FlowEdge::between("a", "ghost")).unwrap_err();
        assert!(matches!(err, TaskflowError::NodeNotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_insert_edge_id_conflict() {
        let mut store = store_with(&["a", "b", "c"]);
        store.insert_edge(FlowEdge::new("e1", "a", "b")).unwrap();
        assert!(matches!(
            store.insert_edge(FlowEdge::new("e1", "a", "c")),
            Err(TaskflowError::EdgeIdConflict { .. })
        ));
    }

    #[test]
    fn test_remove_node_removes_incident_edges() {
        let mut store = store_with(&["a", "b", "c"]);
        store.insert_edge(FlowEdge::between("a", "b")).unwrap();
        store.insert_edge(FlowEdge::between("b", "c")).unwrap();
        store.insert_edge(FlowEdge::between("a", "c")).unwrap();

        let removed = store.remove_node("b").unwrap();
        assert_eq!(removed.edges.len(), 2);
        assert_eq!(store.edges().len(), 1);
        assert!(store.get_node("b").is_none());
    }

    #[test]
    fn test_remove_missing_edge() {
        let mut store = store_with(&["a"]);
        assert!(matches!(
            store.remove_edge("nope"),
            Err(TaskflowError::EdgeNotFound(_))
        ));
    }

    #[test]
    fn test_update_node_data_merges_and_stamps() {
        let mut store = store_with(&["a"]);
        store
            .update_node_data("a", &NodePatch::new().set("title", "T"))
            .unwrap();
        store
            .update_node_data("a", &NodePatch::new().set("description", "D"))
            .unwrap();

        let data = &store.get_node("a").unwrap().data;
        assert_eq!(data.field("title"), Some(&json!("T")));
        assert_eq!(data.field("description"), Some(&json!("D")));
        assert!(data.updated_at.is_some());
    }

    #[test]
    fn test_update_node_data_is_atomic() {
        let mut store = store_with(&["a"]);
        let bad = NodePatch::new()
            .set("title", "T")
            .set("inputData", json!("not-a-map"));
        assert!(store.update_node_data("a", &bad).is_err());
        assert!(store.get_node("a").unwrap().data.field("title").is_none());
    }

    #[test]
    fn test_traversal_helpers() {
        let mut store = store_with(&["a", "b", "c", "d"]);
        store.insert_edge(FlowEdge::between("a", "b")).unwrap();
        store.insert_edge(FlowEdge::between("a", "c")).unwrap();
        store.insert_edge(FlowEdge::between("b", "d")).unwrap();
        store.insert_edge(FlowEdge::between("c", "d")).unwrap();

        assert_eq!(store.parents_of("d"), vec!["b", "c"]);
        assert_eq!(store.children_of("a"), vec!["b", "c"]);
        assert_eq!(store.descendants("a"), vec!["b", "c", "d"]);
        assert_eq!(store.roots(), vec!["a"]);
        assert!(store.would_create_cycle("d", "a"));
        assert!(store.would_create_cycle("a", "a"));
        assert!(!store.would_create_cycle("a", "d"));
    }
}
