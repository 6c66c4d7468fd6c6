//! Taskflow Engine - typed node graphs with forward propagation
//!
//! This crate holds the core of the canvas: a directed acyclic graph of
//! typed nodes where every node derives an output from its own data, and
//! every change flows forward to the nodes downstream of it. It supports:
//!
//! - Pluggable per-kind handlers collected through `inventory`
//! - Topological propagation passes with per-node failure isolation
//! - Cumulative ancestor context, zstd-compressed once it grows large
//! - Connection rules, cycle rejection and viewport-aware placement
//! - Per-flow sessions with JSON persistence
//!
//! # Architecture
//!
//! - `GraphStore`: the nodes and edges of one flow, primitive mutations only
//! - `PropagationEngine`: runs passes over a store using the `NodeRegistry`
//! - `ContextCodec`: encodes and merges cumulative context blobs
//! - `FlowEditor`: the mutation façade; serializes edits per flow and saves
//!   through a `FlowStore`
//! - `EventSink`: progress events for whatever host embeds the engine
//!
//! # Example
//!
//! ```ignore
//! use taskflow_engine::{EdgeSpec, FlowEditor, NodeRegistry};
//!
//! let editor = FlowEditor::builder(Arc::new(NodeRegistry::with_builtins())).build();
//! editor.open_flow("task-42").await?;
//! editor.add_edge("task-42", EdgeSpec::new("problem-1", "data-1")).await?;
//! ```

pub mod builder;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod facade;
pub mod fetch;
pub mod layout;
pub mod persistence;
pub mod propagation;
pub mod registry;
pub mod rules;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::FlowBuilder;
pub use clock::{Clock, ManualClock, SystemClock, VersionStamper};
pub use config::EngineConfig;
pub use context::{ContextBlob, ContextCodec, ContextEntry, CumulativeContext};
pub use error::{FetchError, HandlerError, Result, TaskflowError};
pub use events::{EventError, EventSink, NullEventSink, PropagationEvent, VecEventSink};
pub use facade::{FlowEditor, FlowEditorBuilder, Mutation, NewNodeRequest};
pub use fetch::{CallbackFetcher, FetchMethod, FetchRequest, Fetcher, NoopFetcher};
pub use persistence::{FileFlowStore, FlowStore, InMemoryFlowStore};
pub use propagation::{NodeFailure, PropagationEngine, PropagationMode, PropagationReport};
pub use registry::{FnHandler, HandlerRegistration, NodeHandler, NodeRegistry};
pub use rules::{AllowAllConnections, CanvasConnectionRules, Connection, ConnectionRules};
pub use session::GraphSession;
pub use store::{EdgeInsert, GraphStore, RemovedNode};
pub use types::{
    Dimensions, EdgeId, EdgeSpec, FlowEdge, FlowId, FlowNode, FlowSnapshot, InputData, NodeData,
    NodeId, NodeKind, NodePatch, Position, ProcessingFailure, ProcessingStage, Viewport,
};
pub use validation::{repair_flow, validate_flow, ValidationError};

// Handlers submit registrations through this path
pub use inventory;
