//! Structural validation of persisted flows
//!
//! Checks edge references, duplicate ids, cycles and node types. Flows
//! loaded from storage can be repaired in place with [`repair_flow`], which
//! drops what the in-memory store cannot represent.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::registry::NodeRegistry;
use crate::types::{FlowEdge, FlowSnapshot};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Cycle detected in the graph
    CycleDetected,
    /// A node has an unknown type (not in registry)
    UnknownNodeType { node_id: String, node_type: String },
    /// An edge references a non-existent node
    UnknownNode { edge_id: String, node_id: String },
    /// Two nodes share an id
    DuplicateNodeId { node_id: String },
    /// Two edges connect the same source/target pair
    DuplicateEdge {
        edge_id: String,
        source: String,
        target: String,
    },
    /// Two different connections share an edge id
    DuplicateEdgeId {
        edge_id: String,
        source: String,
        target: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "Cycle detected in graph"),
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "Node id '{}' is used more than once", node_id)
            }
            Self::DuplicateEdge {
                edge_id,
                source,
                target,
            } => {
                write!(
                    f,
                    "Edge '{}' duplicates an existing connection {} -> {}",
                    edge_id, source, target
                )
            }
            Self::DuplicateEdgeId {
                edge_id,
                source,
                target,
            } => {
                write!(
                    f,
                    "Edge id '{}' is reused by {} -> {}",
                    edge_id, source, target
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a flow snapshot
///
/// Returns all validation errors found (not just the first).
/// Pass a registry to enable node type validation.
pub fn validate_flow(flow: &FlowSnapshot, registry: Option<&NodeRegistry>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_node_ids(flow, &mut errors);
    validate_edge_references(flow, &mut errors);
    validate_edge_pairs(flow, &mut errors);
    validate_edge_ids(flow, &mut errors);
    detect_cycles(flow, &mut errors);

    if let Some(reg) = registry {
        validate_node_types(flow, reg, &mut errors);
    }

    errors
}

/// Drop duplicate nodes, dangling edges and duplicate connections
///
/// The first occurrence of a node id or source/target pair wins. Later
/// connections that reuse an edge id get a fresh one. Returns the
/// problems that were repaired; cycles and unknown types are left for the
/// caller since fixing them would mean guessing.
pub fn repair_flow(flow: &mut FlowSnapshot) -> Vec<ValidationError> {
    let mut repaired = Vec::new();

    let mut seen_nodes: HashSet<String> = HashSet::new();
    flow.nodes.retain(|node| {
        if seen_nodes.insert(node.id.clone()) {
            true
        } else {
            repaired.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
            false
        }
    });

    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    flow.edges.retain(|edge| {
        for endpoint in [&edge.source, &edge.target] {
            if !seen_nodes.contains(endpoint) {
                repaired.push(ValidationError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
                return false;
            }
        }
        if !seen_pairs.insert((edge.source.clone(), edge.target.clone())) {
            repaired.push(ValidationError::DuplicateEdge {
                edge_id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
            });
            return false;
        }
        true
    });

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut reused = Vec::new();
    for (index, edge) in flow.edges.iter().enumerate() {
        if !seen_ids.insert(edge.id.clone()) {
            reused.push(index);
        }
    }
    for index in reused {
        let edge = &mut flow.edges[index];
        repaired.push(ValidationError::DuplicateEdgeId {
            edge_id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
        });
        let base = FlowEdge::derive_id(&edge.source, &edge.target);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen_ids.contains(&candidate) {
            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        log::warn!("Renamed reused edge id '{}' to '{}'", edge.id, candidate);
        seen_ids.insert(candidate.clone());
        edge.id = candidate;
    }

    repaired
}

fn validate_node_ids(flow: &FlowSnapshot, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &flow.nodes {
        if !seen.insert(&node.id) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }
}

/// Check that all edge source/target nodes exist
fn validate_edge_references(flow: &FlowSnapshot, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &flow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                errors.push(ValidationError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }
}

fn validate_edge_pairs(flow: &FlowSnapshot, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for edge in &flow.edges {
        if !seen.insert((&edge.source, &edge.target)) {
            errors.push(ValidationError::DuplicateEdge {
                edge_id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
    }
}

fn validate_edge_ids(flow: &FlowSnapshot, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for edge in &flow.edges {
        if !seen.insert(&edge.id) {
            errors.push(ValidationError::DuplicateEdgeId {
                edge_id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
    }
}

/// Detect cycles using Kahn's algorithm (topological sort)
fn detect_cycles(flow: &FlowSnapshot, errors: &mut Vec<ValidationError>) {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in &flow.nodes {
        in_degree.insert(&node.id, 0);
    }
    for edge in &flow.edges {
        if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
            *deg += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited = 0;
    while let Some(node_id) = queue.pop_front() {
        visited += 1;
        for edge in &flow.edges {
            if edge.source == node_id {
                if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(&edge.target);
                    }
                }
            }
        }
    }

    if visited < in_degree.len() {
        errors.push(ValidationError::CycleDetected);
    }
}

/// Check that all nodes have known types in the registry
fn validate_node_types(
    flow: &FlowSnapshot,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for node in &flow.nodes {
        if !registry.has_node_type(&node.node_type) {
            errors.push(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowBuilder;
    use crate::registry::FnHandler;
    use crate::types::NodeKind;
    use serde_json::Value;
    use std::sync::Arc;

    fn linear_flow() -> FlowSnapshot {
        FlowBuilder::new()
            .node("a", NodeKind::Problem)
            .node("b", NodeKind::DataSource)
            .node("c", NodeKind::Analysis)
            .connect("a", "b")
            .connect("b", "c")
            .build()
    }

    #[test]
    fn test_valid_flow() {
        assert!(validate_flow(&linear_flow(), None).is_empty());
    }

    #[test]
    fn test_detect_cycle() {
        let mut flow = linear_flow();
        flow.edges.push(FlowEdge::between("c", "a"));
        let errors = validate_flow(&flow, None);
        assert!(errors.contains(&ValidationError::CycleDetected));
    }

    #[test]
    fn test_unknown_node_type() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(FnHandler::new(NodeKind::Problem, |_| Ok(Value::Null))));
        let errors = validate_flow(&linear_flow(), Some(&registry));
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            &errors[0],
            ValidationError::UnknownNodeType { node_id, .. } if node_id == "b"
        ));
    }

    #[test]
    fn test_dangling_and_duplicate_edges() {
        let mut flow = linear_flow();
        flow.edges.push(FlowEdge::new("dup", "a", "b"));
        flow.edges.push(FlowEdge::between("b", "ghost"));
        let errors = validate_flow(&flow, None);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DuplicateEdge { edge_id, .. } if edge_id == "dup")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownNode { node_id, .. } if node_id == "ghost")));
    }

    #[test]
    fn test_repair_flow() {
        let mut flow = linear_flow();
        flow.nodes.push(flow.nodes[0].clone());
        flow.edges.push(FlowEdge::new("dup", "a", "b"));
        flow.edges.push(FlowEdge::between("ghost", "c"));

        let repaired = repair_flow(&mut flow);
        assert_eq!(repaired.len(), 3);
        assert_eq!(flow.nodes.len(), 3);
        assert_eq!(flow.edges.len(), 2);
        assert!(validate_flow(&flow, None).is_empty());
    }

    #[test]
    fn test_repair_renames_reused_edge_ids() {
        let mut flow = linear_flow();
        let reused = flow.edges[0].id.clone();
        flow.edges.push(FlowEdge::new(reused.clone(), "a", "c"));
        assert!(validate_flow(&flow, None).iter().any(|e| matches!(
            e,
            ValidationError::DuplicateEdgeId { edge_id, .. } if *edge_id == reused
        )));

        let repaired = repair_flow(&mut flow);
        assert_eq!(repaired.len(), 1);
        assert_eq!(flow.edges.len(), 3);
        let renamed = &flow.edges[2];
        assert_eq!(renamed.id, FlowEdge::derive_id("a", "c"));
        assert!(renamed.connects("a", "c"));
        assert!(validate_flow(&flow, None).is_empty());
    }
}
