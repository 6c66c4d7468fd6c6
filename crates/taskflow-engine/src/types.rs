//! Core types for canvas flows
//!
//! These types define the persisted shape of a flow: nodes with their
//! type-specific data, the directed edges between them, and the viewport
//! the canvas was last looking at. Wire names are camelCase to match the
//! canvas JSON, except `updated_at` and the node `type` tag.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::CumulativeContext;
use crate::error::{Result, TaskflowError};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for a persisted flow
pub type FlowId = String;

/// Map from direct-parent id to that parent's latest output
pub type InputData = BTreeMap<NodeId, Value>;

// =============================================================================
// Node kinds
// =============================================================================

/// The closed catalog of node types the canvas knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Problem statement that roots most flows
    Problem,
    /// Uploaded files and other raw sources
    DataSource,
    /// A survey and its collected results
    Survey,
    /// Aggregated analysis over upstream data
    Analysis,
    /// Report assembled from an analysis
    Report,
    /// Free-form annotation
    Note,
    /// Pass-through node with no special behaviour
    Default,
}

impl NodeKind {
    /// Every kind, in palette order
    pub const ALL: [NodeKind; 7] = [
        NodeKind::Problem,
        NodeKind::DataSource,
        NodeKind::Survey,
        NodeKind::Analysis,
        NodeKind::Report,
        NodeKind::Note,
        NodeKind::Default,
    ];

    /// The wire tag stored in `FlowNode::node_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Problem => "problem",
            NodeKind::DataSource => "dataSource",
            NodeKind::Survey => "survey",
            NodeKind::Analysis => "analysis",
            NodeKind::Report => "report",
            NodeKind::Note => "note",
            NodeKind::Default => "default",
        }
    }

    /// Parse a wire tag
    pub fn parse(tag: &str) -> Option<NodeKind> {
        NodeKind::ALL.into_iter().find(|k| k.as_str() == tag)
    }

    /// Human-readable label for palettes and default titles
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Problem => "Problem",
            NodeKind::DataSource => "Data Source",
            NodeKind::Survey => "Survey",
            NodeKind::Analysis => "Analysis",
            NodeKind::Report => "Report",
            NodeKind::Note => "Note",
            NodeKind::Default => "Node",
        }
    }

    /// Rendered size used for placement before the canvas measures the node
    pub fn estimated_dimensions(&self) -> Dimensions {
        match self {
            NodeKind::Problem => Dimensions::new(300.0, 151.0),
            NodeKind::DataSource => Dimensions::new(300.0, 180.0),
            NodeKind::Survey => Dimensions::new(350.0, 220.0),
            NodeKind::Analysis => Dimensions::new(300.0, 150.0),
            NodeKind::Report => Dimensions::new(300.0, 150.0),
            NodeKind::Note => Dimensions::new(300.0, 150.0),
            NodeKind::Default => Dimensions::new(300.0, 150.0),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Width and height in canvas units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// The visible window onto the canvas
///
/// `x`/`y` are the pan offset in screen pixels, `width`/`height` the size of
/// the canvas element on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
            width: 1280.0,
            height: 720.0,
        }
    }
}

// =============================================================================
// Node data
// =============================================================================

/// Stage of node processing that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingStage {
    ProcessInput,
    GenerateOutput,
    HandleAction,
}

/// Last processing failure recorded on a node
///
/// Always written as `{ stage, message, occurredAt }`. Older flows stored a
/// bare message string or a loose object; those read as a `processInput`
/// failure, and a missing time reads as the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawFailure")]
pub struct ProcessingFailure {
    pub stage: ProcessingStage,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFailure {
    Message(String),
    Record(FailureRecord),
    Other(Value),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailureRecord {
    #[serde(default)]
    stage: Option<ProcessingStage>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
}

impl From<RawFailure> for ProcessingFailure {
    fn from(raw: RawFailure) -> Self {
        let legacy = |message: String| ProcessingFailure {
            stage: ProcessingStage::ProcessInput,
            message,
            occurred_at: DateTime::<Utc>::default(),
        };
        match raw {
            RawFailure::Message(message) => legacy(message),
            RawFailure::Record(record) => ProcessingFailure {
                stage: record.stage.unwrap_or(ProcessingStage::ProcessInput),
                message: record
                    .message
                    .or(record.error)
                    .unwrap_or_else(|| "Unknown processing error".to_string()),
                occurred_at: record.occurred_at.unwrap_or_default(),
            },
            RawFailure::Other(value) => legacy(value.to_string()),
        }
    }
}

/// Data carried by a node
///
/// The engine-owned fields are typed; everything else a node type stores
/// (title, sources, surveyId, ...) lives in `fields`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeData {
    /// Latest output of every direct parent, keyed by parent id
    #[serde(rename = "inputData", default)]
    pub input_data: Option<InputData>,

    /// Output derived by this node's handler
    #[serde(rename = "outputData", default)]
    pub output_data: Option<Value>,

    /// Accumulated ancestor outputs
    #[serde(rename = "cumulativeContext", default)]
    pub cumulative_context: CumulativeContext,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(rename = "processInputError", default)]
    pub processing_error: Option<ProcessingFailure>,

    /// Type-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NodeData {
    /// Data with the given type-specific fields and empty engine fields
    pub fn with_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Look up a type-specific field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a type-specific string field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Shallow-merge a patch into this data
    ///
    /// Engine-owned keys are decoded into their typed slots; any other key
    /// replaces the matching entry in `fields`.
    pub fn apply_patch(&mut self, patch: &NodePatch) -> Result<()> {
        for (key, value) in patch.iter() {
            match key.as_str() {
                "inputData" => self.input_data = serde_json::from_value(value.clone())?,
                "outputData" => {
                    self.output_data = if value.is_null() {
                        None
                    } else {
                        Some(value.clone())
                    }
                }
                "cumulativeContext" => {
                    self.cumulative_context = serde_json::from_value(value.clone())?
                }
                "updated_at" => self.updated_at = serde_json::from_value(value.clone())?,
                "processInputError" => {
                    self.processing_error = serde_json::from_value(value.clone())?
                }
                _ => {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

/// A shallow set of fields to merge into a node's data
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePatch(Map<String, Value>);

impl NodePatch {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a field, returning the patch for chaining
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Patch that replaces `inputData`
    pub fn input_data(parent_outputs: &InputData) -> Self {
        let map: Map<String, Value> = parent_outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self::new().set("inputData", Value::Object(map))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Combine two patches, `other` winning on shared keys
    pub fn merged(mut self, other: NodePatch) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Build a patch from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for NodePatch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Nodes and edges
// =============================================================================

/// A node on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    /// Wire tag of the node's kind
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

impl FlowNode {
    /// Create a node of a known kind
    pub fn new(id: impl Into<String>, kind: NodeKind, position: Position) -> Self {
        Self {
            id: id.into(),
            node_type: kind.as_str().to_string(),
            position,
            data: NodeData::default(),
        }
    }

    /// Replace the node's data
    pub fn with_data(mut self, data: NodeData) -> Self {
        self.data = data;
        self
    }

    /// Set a type-specific field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.fields.insert(key.into(), value.into());
        self
    }

    /// Resolve the node's kind, failing for tags outside the catalog
    pub fn kind(&self) -> Result<NodeKind> {
        NodeKind::parse(&self.node_type)
            .ok_or_else(|| TaskflowError::unknown_type(&self.id, &self.node_type))
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

impl FlowEdge {
    /// Create an edge with an explicit id
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    /// Create an edge whose id is derived from its endpoints
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: Self::derive_id(&source, &target),
            source,
            target,
        }
    }

    /// Deterministic edge id for a source/target pair
    pub fn derive_id(source: &str, target: &str) -> EdgeId {
        format!("edge_{}-{}", source, target)
    }

    /// Whether this edge connects the given pair
    pub fn connects(&self, source: &str, target: &str) -> bool {
        self.source == source && self.target == target
    }
}

/// Request to add an edge, with an optional caller-chosen id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: Option<EdgeId>,
    pub source: NodeId,
    pub target: NodeId,
}

impl EdgeSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Materialize the edge, deriving the id when none was given
    pub fn into_edge(self) -> FlowEdge {
        match self.id {
            Some(id) => FlowEdge::new(id, self.source, self.target),
            None => FlowEdge::between(self.source, self.target),
        }
    }
}

/// Persisted state of a flow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSnapshot {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub viewport: Viewport,
}

impl FlowSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a node by id
    pub fn find_node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
