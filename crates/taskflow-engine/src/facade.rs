//! Graph mutation façade
//!
//! [`FlowEditor`] is the only entry point callers (the canvas UI, an agent
//! action router) use to change a flow. Every operation:
//!
//! 1. locks the flow's session for its whole duration, so two edits on one
//!    flow never interleave,
//! 2. validates the request against the current graph before touching it,
//! 3. applies the structural change and runs the propagation it implies,
//! 4. saves the flow when autosave is on.
//!
//! Per-node handler failures during propagation are recorded on the nodes
//! themselves and reported in the returned [`Mutation`]; only a bad request
//! (unknown node, disallowed connection, cycle) fails the call.
//!
//! # Example
//!
//! ```ignore
//! let editor = FlowEditor::builder(Arc::new(registry))
//!     .flow_store(Arc::new(FileFlowStore::new("flows")))
//!     .build();
//!
//! editor.open_flow("task-42").await?;
//! let edge = editor.add_edge("task-42", EdgeSpec::new("problem-1", "data-1")).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::clock::{Clock, SystemClock, VersionStamper};
use crate::config::EngineConfig;
use crate::error::{Result, TaskflowError};
use crate::events::{EventSink, NullEventSink, PropagationEvent};
use crate::fetch::{Fetcher, NoopFetcher};
use crate::layout::{self, FreeSpaceSearch, Rect};
use crate::persistence::{FlowStore, InMemoryFlowStore};
use crate::propagation::{PropagationEngine, PropagationMode, PropagationReport};
use crate::registry::NodeRegistry;
use crate::rules::{CanvasConnectionRules, ConnectionRules};
use crate::session::GraphSession;
use crate::store::{EdgeInsert, GraphStore, RemovedNode};
use crate::types::{
    EdgeSpec, FlowEdge, FlowNode, FlowSnapshot, NodeKind, NodePatch, Position, ProcessingStage,
    Viewport,
};
use crate::validation::{repair_flow, validate_flow};

/// Result of a façade operation
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    /// The affected node or edge
    pub value: T,
    /// The propagation pass the operation ran, if any
    pub report: Option<PropagationReport>,
}

impl<T> Mutation<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            report: None,
        }
    }

    fn with_report(value: T, report: PropagationReport) -> Self {
        Self {
            value,
            report: Some(report),
        }
    }

    /// Some node failed during the pass this operation ran
    pub fn is_partial_failure(&self) -> bool {
        self.report
            .as_ref()
            .is_some_and(PropagationReport::is_partial_failure)
    }
}

/// Request to create a node, optionally wired to an existing one
#[derive(Debug, Clone, PartialEq)]
pub struct NewNodeRequest {
    pub kind: NodeKind,
    /// Id for the new node; generated when absent
    pub id: Option<String>,
    /// Node to connect from
    pub origin_id: Option<String>,
    /// Where the canvas currently draws the origin
    pub origin_position: Option<Position>,
    /// Rendered height of the origin
    pub origin_height: Option<f64>,
    /// Canvas point the user aimed at
    pub target: Option<Position>,
    /// Type-specific fields for the new node
    pub fields: Map<String, Value>,
}

impl NewNodeRequest {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            id: None,
            origin_id: None,
            origin_position: None,
            origin_height: None,
            target: None,
            fields: Map::new(),
        }
    }

    pub fn from_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    pub fn at(mut self, target: Position) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Builder for [`FlowEditor`]
pub struct FlowEditorBuilder {
    registry: Arc<NodeRegistry>,
    rules: Arc<dyn ConnectionRules>,
    flow_store: Arc<dyn FlowStore>,
    fetcher: Arc<dyn Fetcher>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl FlowEditorBuilder {
    pub fn rules(mut self, rules: Arc<dyn ConnectionRules>) -> Self {
        self.rules = rules;
        self
    }

    pub fn flow_store(mut self, store: Arc<dyn FlowStore>) -> Self {
        self.flow_store = store;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> FlowEditor {
        let engine = PropagationEngine::with_config(self.registry, &self.config)
            .with_events(self.events.clone())
            .with_stamper(Arc::new(VersionStamper::new()));
        FlowEditor {
            engine,
            rules: self.rules,
            flow_store: self.flow_store,
            fetcher: self.fetcher,
            events: self.events,
            clock: self.clock,
            config: self.config,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

type SharedSession = Arc<Mutex<GraphSession>>;

/// Mutation façade over every open flow
pub struct FlowEditor {
    engine: PropagationEngine,
    rules: Arc<dyn ConnectionRules>,
    flow_store: Arc<dyn FlowStore>,
    fetcher: Arc<dyn Fetcher>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl FlowEditor {
    /// Start building an editor
    ///
    /// Defaults: the canvas connection rules, an in-memory flow store, no
    /// fetcher, no events, the system clock and the default config.
    pub fn builder(registry: Arc<NodeRegistry>) -> FlowEditorBuilder {
        FlowEditorBuilder {
            registry,
            rules: Arc::new(CanvasConnectionRules),
            flow_store: Arc::new(InMemoryFlowStore::new()),
            fetcher: Arc::new(NoopFetcher),
            events: Arc::new(NullEventSink),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.engine.registry()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Load a flow into memory
    ///
    /// Duplicate nodes and edges pointing at missing nodes are dropped, and
    /// reused edge ids renamed, with a warning. Opening an already open flow returns its current state.
    pub async fn open_flow(&self, flow_id: &str) -> Result<FlowSnapshot> {
        let existing = self.sessions.lock().await.get(flow_id).cloned();
        if let Some(session) = existing {
            let guard = session.lock().await;
            if !guard.closed {
                return Ok(guard.snapshot());
            }
        }

        let mut flow = self.flow_store.load_flow(flow_id).await?;
        for problem in repair_flow(&mut flow) {
            log::warn!("Flow '{}': repaired on load: {}", flow_id, problem);
        }
        for problem in validate_flow(&flow, Some(self.engine.registry())) {
            log::warn!("Flow '{}': {}", flow_id, problem);
        }
        log::info!(
            "Opened flow '{}' with {} nodes and {} edges",
            flow_id,
            flow.nodes.len(),
            flow.edges.len()
        );

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(flow_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(GraphSession::from_snapshot(
                    flow_id,
                    flow,
                    self.clock.clone(),
                )))
            })
            .clone();
        drop(sessions);

        let snapshot = session.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Save a flow and drop it from memory
    ///
    /// The session stays open if the save fails.
    pub async fn close_flow(&self, flow_id: &str) -> Result<FlowSnapshot> {
        let mut guard = self.lock_session(flow_id).await?;
        self.save(&mut guard).await?;
        let snapshot = guard.snapshot();

        // Operations already waiting on this session see `closed` once the guard drops
        self.sessions.lock().await.remove(flow_id);
        guard.closed = true;
        drop(guard);
        log::info!("Closed flow '{}'", flow_id);
        Ok(snapshot)
    }

    /// Save a flow if it has unsaved changes
    pub async fn flush(&self, flow_id: &str) -> Result<()> {
        let mut guard = self.lock_session(flow_id).await?;
        if guard.dirty {
            self.save(&mut guard).await?;
        }
        Ok(())
    }

    /// Ids of every open flow
    pub async fn open_flows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_open(&self, flow_id: &str) -> bool {
        self.sessions.lock().await.contains_key(flow_id)
    }

    /// Current state of an open flow
    pub async fn snapshot(&self, flow_id: &str) -> Result<FlowSnapshot> {
        let guard = self.lock_session(flow_id).await?;
        Ok(guard.snapshot())
    }

    /// Current state of one node
    pub async fn node(&self, flow_id: &str, node_id: &str) -> Result<FlowNode> {
        let guard = self.lock_session(flow_id).await?;
        guard.store.node(node_id).cloned()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Insert a node and generate its output once
    ///
    /// An empty id is replaced with a generated one.
    pub async fn add_node(&self, flow_id: &str, mut node: FlowNode) -> Result<Mutation<FlowNode>> {
        if node.id.is_empty() {
            node.id = generate_node_id();
        }
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        self.engine.registry().handler_for(&node)?;
        if guard.store.contains_node(&node.id) {
            return Err(TaskflowError::DuplicateNode(node.id));
        }

        let node_id = node.id.clone();
        guard.store.insert_node(node)?;
        let report = self
            .propagate(&mut guard.store, &node_id, PropagationMode::OutputChanged)
            .await?;

        self.finish(&mut guard, "addNode", vec![node_id.clone()]).await;
        let node = guard.store.node(&node_id)?.clone();
        Ok(Mutation::with_report(node, report))
    }

    /// Create a node of `request.kind`, place it, and wire it to the origin
    ///
    /// Placement: centred on `target` and clamped into the viewport when a
    /// target is given; otherwise below the origin next to its other
    /// children; otherwise near the top-left of the viewport. The pass then
    /// runs from the origin so the new node receives its ancestors' context
    /// right away.
    pub async fn add_node_and_connect(
        &self,
        flow_id: &str,
        request: NewNodeRequest,
    ) -> Result<Mutation<FlowNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        let node_id = request.id.clone().unwrap_or_else(generate_node_id);
        let handler = self
            .engine
            .registry()
            .get(request.kind)
            .ok_or_else(|| TaskflowError::unknown_type(node_id.as_str(), request.kind.as_str()))?;

        if let Some(origin_id) = &request.origin_id {
            let origin_kind = guard.store.node(origin_id)?.kind()?;
            self.check_connection(origin_kind, request.kind)?;
            self.engine.preflight(&guard.store, origin_id)?;
        }

        if guard.store.contains_node(&node_id) {
            return Err(TaskflowError::DuplicateNode(node_id));
        }

        let position = self.place_node(&guard, &request)?;
        let node = FlowNode::new(node_id.clone(), request.kind, position)
            .with_data(handler.initialize_data(request.fields.clone()));
        guard.store.insert_node(node)?;

        let origin = match &request.origin_id {
            Some(origin_id) => {
                guard
                    .store
                    .insert_edge(FlowEdge::between(origin_id.clone(), node_id.clone()))?;
                origin_id.clone()
            }
            None => node_id.clone(),
        };

        let report = self
            .propagate(&mut guard.store, &origin, PropagationMode::OutputChanged)
            .await?;

        let mut touched = vec![node_id.clone()];
        touched.extend(request.origin_id.clone());
        self.finish(&mut guard, "addNodeAndConnect", touched).await;
        let node = guard.store.node(&node_id)?.clone();
        Ok(Mutation::with_report(node, report))
    }

    /// Merge `patch` into a node's data and propagate from it
    pub async fn update_node_data(
        &self,
        flow_id: &str,
        node_id: &str,
        patch: NodePatch,
    ) -> Result<Mutation<FlowNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        self.engine.preflight(&guard.store, node_id)?;
        guard.store.update_node_data(node_id, &patch)?;
        let report = self
            .propagate(&mut guard.store, node_id, PropagationMode::OutputChanged)
            .await?;

        self.finish(&mut guard, "updateNodeData", vec![node_id.to_string()])
            .await;
        let node = guard.store.node(node_id)?.clone();
        Ok(Mutation::with_report(node, report))
    }

    /// Remove a node and its edges
    ///
    /// Every former child loses the removed node's entry from its
    /// `inputData` and cumulative context. Nothing is re-propagated.
    pub async fn remove_node(&self, flow_id: &str, node_id: &str) -> Result<Mutation<RemovedNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        let children = guard.store.children_of(node_id);
        let removed = guard.store.remove_node(node_id)?;
        for child in &children {
            self.clear_reference(&mut guard.store, child, node_id)?;
        }

        let mut touched = vec![node_id.to_string()];
        touched.extend(children);
        self.finish(&mut guard, "removeNode", touched).await;
        Ok(Mutation::new(removed))
    }

    /// Move a node on the canvas
    pub async fn update_node_position(
        &self,
        flow_id: &str,
        node_id: &str,
        position: Position,
    ) -> Result<Mutation<FlowNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        guard.store.set_node_position(node_id, position)?;
        self.finish(&mut guard, "updateNodePosition", vec![node_id.to_string()])
            .await;
        let node = guard.store.node(node_id)?.clone();
        Ok(Mutation::new(node))
    }

    /// Re-run a node's output from its parents and propagate forward
    ///
    /// For changes the node depends on outside its own data, such as an
    /// upload finishing.
    pub async fn request_node_reprocessing(
        &self,
        flow_id: &str,
        node_id: &str,
    ) -> Result<Mutation<FlowNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        let report = self
            .propagate(&mut guard.store, node_id, PropagationMode::Reprocess)
            .await?;

        self.finish(&mut guard, "requestNodeReprocessing", vec![node_id.to_string()])
            .await;
        let node = guard.store.node(node_id)?.clone();
        Ok(Mutation::with_report(node, report))
    }

    /// Run a handler action on a node, merge its patch, and propagate
    ///
    /// A failing action is recorded on the node with stage `handleAction`
    /// and reported in the mutation's report; the call itself succeeds.
    pub async fn dispatch_action(
        &self,
        flow_id: &str,
        node_id: &str,
        action: &str,
        params: Value,
    ) -> Result<Mutation<FlowNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        self.engine.preflight(&guard.store, node_id)?;
        let outcome = self
            .engine
            .run_action(&guard.store, node_id, action, &params, self.fetcher.as_ref())
            .await?;

        let report = match outcome {
            Ok(patch) => {
                guard.store.update_node_data(node_id, &patch)?;
                self.propagate(&mut guard.store, node_id, PropagationMode::OutputChanged)
                    .await?
            }
            Err(failure) => {
                log::warn!(
                    "Action '{}' on '{}' failed: {}",
                    action,
                    node_id,
                    failure.message
                );
                self.engine.record_failure(
                    &mut guard.store,
                    node_id,
                    ProcessingStage::HandleAction,
                    &failure.message,
                )?;
                let mut report = PropagationReport::new(node_id);
                report.failed.push(failure);
                report
            }
        };

        self.finish(&mut guard, "dispatchAction", vec![node_id.to_string()])
            .await;
        let node = guard.store.node(node_id)?.clone();
        Ok(Mutation::with_report(node, report))
    }

    /// Run a pass from every node without parents
    pub async fn repropagate_from_roots(&self, flow_id: &str) -> Result<Vec<PropagationReport>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        let roots = guard.store.roots();
        for root in &roots {
            self.engine.preflight(&guard.store, root)?;
        }
        let mut reports = Vec::with_capacity(roots.len());
        for root in &roots {
            reports.push(
                self.propagate(&mut guard.store, root, PropagationMode::OutputChanged)
                    .await?,
            );
        }

        self.finish(&mut guard, "repropagateFromRoots", roots).await;
        Ok(reports)
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Connect two nodes and push current data into the target's subtree
    ///
    /// Re-adding an existing connection returns the existing edge and runs
    /// no pass.
    pub async fn add_edge(&self, flow_id: &str, spec: EdgeSpec) -> Result<Mutation<FlowEdge>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        let source_kind = guard.store.node(&spec.source)?.kind()?;
        let target_kind = guard.store.node(&spec.target)?.kind()?;
        self.check_connection(source_kind, target_kind)?;

        if let Some(existing) = guard
            .store
            .edges()
            .iter()
            .find(|e| e.connects(&spec.source, &spec.target))
        {
            log::debug!(
                "Edge {} -> {} already exists as '{}'",
                spec.source,
                spec.target,
                existing.id
            );
            return Ok(Mutation::new(existing.clone()));
        }
        if guard.store.would_create_cycle(&spec.source, &spec.target) {
            return Err(TaskflowError::CycleDetected {
                source_id: spec.source,
                target_id: spec.target,
            });
        }
        // The target joins the source's subtree for the pass below
        self.engine.preflight(&guard.store, &spec.source)?;
        self.engine.preflight(&guard.store, &spec.target)?;

        let source = spec.source.clone();
        let edge = match guard.store.insert_edge(spec.into_edge())? {
            EdgeInsert::Inserted(edge) => edge,
            EdgeInsert::Existing(edge) => return Ok(Mutation::new(edge)),
        };
        let report = self
            .propagate(&mut guard.store, &source, PropagationMode::OutputChanged)
            .await?;

        self.finish(
            &mut guard,
            "addEdge",
            vec![edge.source.clone(), edge.target.clone()],
        )
        .await;
        Ok(Mutation::with_report(edge, report))
    }

    /// Remove an edge
    ///
    /// The target keeps the source's entries in `inputData` and cumulative
    /// context; call [`clear_ancestor_reference`](Self::clear_ancestor_reference)
    /// or reconnect to refresh them.
    pub async fn remove_edge(&self, flow_id: &str, edge_id: &str) -> Result<Mutation<FlowEdge>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        let edge = guard.store.remove_edge(edge_id)?;
        self.finish(
            &mut guard,
            "removeEdge",
            vec![edge.source.clone(), edge.target.clone()],
        )
        .await;
        Ok(Mutation::new(edge))
    }

    /// Drop `ancestor_id`'s entries from a node's `inputData` and context
    pub async fn clear_ancestor_reference(
        &self,
        flow_id: &str,
        node_id: &str,
        ancestor_id: &str,
    ) -> Result<Mutation<FlowNode>> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();

        self.clear_reference(&mut guard.store, node_id, ancestor_id)?;
        self.finish(&mut guard, "clearAncestorReference", vec![node_id.to_string()])
            .await;
        let node = guard.store.node(node_id)?.clone();
        Ok(Mutation::new(node))
    }

    // =========================================================================
    // Viewport
    // =========================================================================

    pub async fn set_viewport(&self, flow_id: &str, viewport: Viewport) -> Result<()> {
        let mut guard = self.lock_session(flow_id).await?;
        guard.touch();
        guard.viewport = viewport;
        self.finish(&mut guard, "setViewport", Vec::new()).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn lock_session(&self, flow_id: &str) -> Result<OwnedMutexGuard<GraphSession>> {
        let session = self
            .sessions
            .lock()
            .await
            .get(flow_id)
            .cloned()
            .ok_or_else(|| TaskflowError::FlowNotOpen(flow_id.to_string()))?;
        let guard = session.lock_owned().await;
        if guard.closed {
            return Err(TaskflowError::FlowNotOpen(flow_id.to_string()));
        }
        Ok(guard)
    }

    async fn propagate(
        &self,
        store: &mut GraphStore,
        origin: &str,
        mode: PropagationMode,
    ) -> Result<PropagationReport> {
        self.engine
            .propagate(store, origin, mode, self.fetcher.as_ref())
            .await
    }

    fn check_connection(&self, source: NodeKind, target: NodeKind) -> Result<()> {
        if self.rules.can_connect(source, target).allowed {
            Ok(())
        } else {
            Err(TaskflowError::ConnectionNotAllowed {
                source_type: source.to_string(),
                target_type: target.to_string(),
            })
        }
    }

    fn clear_reference(&self, store: &mut GraphStore, node_id: &str, ancestor_id: &str) -> Result<()> {
        let mut data = store.node(node_id)?.data.clone();
        if let Some(inputs) = data.input_data.as_mut() {
            inputs.remove(ancestor_id);
        }
        data.cumulative_context = self
            .engine
            .codec()
            .without_entry(&data.cumulative_context, ancestor_id)?;
        data.updated_at = Some(store.now());
        store.replace_node_data(node_id, data)?;
        log::debug!("Cleared '{}' from '{}'", ancestor_id, node_id);
        Ok(())
    }

    fn place_node(&self, session: &GraphSession, request: &NewNodeRequest) -> Result<Position> {
        let dims = request.kind.estimated_dimensions();
        let viewport = &session.viewport;

        if let Some(target) = request.target {
            let candidate = layout::centered_on(target, dims);
            return Ok(layout::clamp_to_viewport(
                candidate,
                dims,
                viewport,
                self.config.viewport_margin,
            ));
        }

        let occupied: Vec<Rect> = session.store.nodes().iter().map(layout::footprint).collect();
        let start = match &request.origin_id {
            Some(origin_id) => {
                let origin = session.store.node(origin_id)?;
                let mut parent = layout::footprint(origin);
                if let Some(position) = request.origin_position {
                    parent.x = position.x;
                    parent.y = position.y;
                }
                if let Some(height) = request.origin_height {
                    parent.height = height;
                }
                let siblings: Vec<Rect> = session
                    .store
                    .children_of(origin_id)
                    .iter()
                    .filter_map(|id| session.store.get_node(id))
                    .map(layout::footprint)
                    .collect();
                layout::child_position(
                    parent,
                    &siblings,
                    dims,
                    self.config.child_gap_x,
                    self.config.child_gap_y,
                )
            }
            None => layout::default_position(viewport, dims),
        };
        Ok(layout::find_free_position(
            &occupied,
            dims,
            start,
            FreeSpaceSearch::default(),
        ))
    }

    /// Mark the flow changed, announce it, and save when autosave is on
    async fn finish(&self, session: &mut GraphSession, operation: &str, node_ids: Vec<String>) {
        session.dirty = true;
        self.emit(PropagationEvent::flow_modified(
            session.flow_id(),
            operation,
            node_ids,
        ));
        if self.config.autosave {
            // A failed save leaves the flow dirty for the next flush
            let _ = self.save(session).await;
        }
    }

    async fn save(&self, session: &mut GraphSession) -> Result<()> {
        let snapshot = session.snapshot();
        match self.flow_store.save_flow(session.flow_id(), &snapshot).await {
            Ok(()) => {
                session.dirty = false;
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to save flow '{}': {}", session.flow_id(), e);
                session.dirty = true;
                self.emit(PropagationEvent::SaveFailed {
                    flow_id: session.flow_id().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn emit(&self, event: PropagationEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("Dropped editor event: {}", e);
        }
    }
}

fn generate_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowBuilder;
    use crate::events::VecEventSink;
    use crate::registry::FnHandler;
    use async_trait::async_trait;
    use serde_json::json;

    /// Outputs `{ "label": <label field> }` for every kind
    fn registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::new();
        for kind in NodeKind::ALL {
            registry.register(Arc::new(FnHandler::new(kind, |node| {
                Ok(json!({ "label": node.data.field("label").cloned().unwrap_or(Value::Null) }))
            })));
        }
        Arc::new(registry)
    }

    async fn editor_with(flow: FlowSnapshot) -> (FlowEditor, Arc<InMemoryFlowStore>) {
        let store = Arc::new(InMemoryFlowStore::new());
        store.insert("f", flow).await;
        let editor = FlowEditor::builder(registry())
            .flow_store(store.clone())
            .build();
        editor.open_flow("f").await.unwrap();
        (editor, store)
    }

    #[tokio::test]
    async fn test_operations_require_open_flow() {
        let editor = FlowEditor::builder(registry()).build();
        let err = editor.snapshot("nope").await.unwrap_err();
        assert!(matches!(err, TaskflowError::FlowNotOpen(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_add_node_generates_output_and_saves() {
        let (editor, store) = editor_with(FlowSnapshot::default()).await;
        let node = FlowNode::new("n1", NodeKind::Note, Position::default())
            .with_field("label", "hello");

        let mutation = editor.add_node("f", node).await.unwrap();
        assert_eq!(mutation.value.data.output_data, Some(json!({ "label": "hello" })));

        let saved = store.get("f").await.unwrap();
        assert_eq!(saved.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_add_node_with_empty_id_gets_generated_id() {
        let (editor, _) = editor_with(FlowSnapshot::default()).await;
        let node = FlowNode::new("", NodeKind::Note, Position::default());
        let mutation = editor.add_node("f", node).await.unwrap();
        assert!(!mutation.value.id.is_empty());
    }

    #[tokio::test]
    async fn test_add_edge_is_idempotent() {
        let flow = FlowBuilder::new()
            .node("p", NodeKind::Problem)
            .node("d", NodeKind::DataSource)
            .build();
        let (editor, _) = editor_with(flow).await;

        let first = editor.add_edge("f", EdgeSpec::new("p", "d")).await.unwrap();
        assert!(first.report.is_some());
        let second = editor
            .add_edge("f", EdgeSpec::new("p", "d").with_id("other"))
            .await
            .unwrap();
        assert_eq!(second.value, first.value);
        assert!(second.report.is_none());
        assert_eq!(editor.snapshot("f").await.unwrap().edges.len(), 1);
    }

    #[tokio::test]
    async fn test_disallowed_connection_is_rejected() {
        let flow = FlowBuilder::new()
            .node("p", NodeKind::Problem)
            .node("r", NodeKind::Report)
            .build();
        let (editor, _) = editor_with(flow).await;

        let err = editor.add_edge("f", EdgeSpec::new("p", "r")).await.unwrap_err();
        assert!(matches!(err, TaskflowError::ConnectionNotAllowed { .. }));
        assert!(editor.snapshot("f").await.unwrap().edges.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_is_rejected() {
        let flow = FlowBuilder::new()
            .node("a", NodeKind::Note)
            .node("b", NodeKind::Note)
            .connect("a", "b")
            .build();
        let (editor, _) = editor_with(flow).await;

        let err = editor.add_edge("f", EdgeSpec::new("b", "a")).await.unwrap_err();
        assert!(matches!(err, TaskflowError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn test_open_flow_drops_dangling_edges() {
        let mut flow = FlowBuilder::new().node("a", NodeKind::Note).build();
        flow.edges.push(FlowEdge::between("a", "ghost"));
        let (editor, _) = editor_with(flow).await;
        assert!(editor.snapshot("f").await.unwrap().edges.is_empty());
    }

    #[tokio::test]
    async fn test_add_node_and_connect_below_origin() {
        let flow = FlowBuilder::new()
            .node_at("p", NodeKind::Problem, Position::new(100.0, 100.0))
            .with_field("label", "root")
            .build();
        let (editor, _) = editor_with(flow).await;

        let request = NewNodeRequest::new(NodeKind::DataSource)
            .with_id("d")
            .from_origin("p");
        let mutation = editor.add_node_and_connect("f", request).await.unwrap();

        // Problem nodes are 300x151; the child row starts 160 below
        assert_eq!(mutation.value.position.y, 100.0 + 151.0 + 160.0);
        let inputs = mutation.value.data.input_data.unwrap();
        assert_eq!(inputs["p"], json!({ "label": "root" }));
    }

    #[tokio::test]
    async fn test_add_node_and_connect_unknown_origin_mutates_nothing() {
        let (editor, _) = editor_with(FlowSnapshot::default()).await;
        let request = NewNodeRequest::new(NodeKind::DataSource).from_origin("missing");
        let err = editor.add_node_and_connect("f", request).await.unwrap_err();
        assert!(matches!(err, TaskflowError::NodeNotFound(_)));
        assert!(editor.snapshot("f").await.unwrap().nodes.is_empty());
    }

    #[tokio::test]
    async fn test_remove_edge_keeps_stale_entries_until_cleared() {
        let flow = FlowBuilder::new()
            .node("a", NodeKind::Note)
            .with_field("label", "x")
            .node("b", NodeKind::Note)
            .build();
        let (editor, _) = editor_with(flow).await;
        let edge = editor.add_edge("f", EdgeSpec::new("a", "b")).await.unwrap().value;

        editor.remove_edge("f", &edge.id).await.unwrap();
        let b = editor.node("f", "b").await.unwrap();
        assert!(b.data.input_data.as_ref().unwrap().contains_key("a"));

        let cleared = editor.clear_ancestor_reference("f", "b", "a").await.unwrap();
        assert!(!cleared.value.data.input_data.unwrap().contains_key("a"));
        let codec = crate::context::ContextCodec::default();
        let blob = codec.decompress(&cleared.value.data.cumulative_context).unwrap();
        assert!(!blob.contains_key("a"));
    }

    #[tokio::test]
    async fn test_unsupported_action_is_recorded() {
        let flow = FlowBuilder::new().node("a", NodeKind::Note).build();
        let (editor, _) = editor_with(flow).await;

        let mutation = editor
            .dispatch_action("f", "a", "explode", Value::Null)
            .await
            .unwrap();
        assert!(mutation.is_partial_failure());
        let failure = mutation.value.data.processing_error.unwrap();
        assert_eq!(failure.stage, ProcessingStage::HandleAction);
    }

    struct FailingStore;

    #[async_trait]
    impl FlowStore for FailingStore {
        async fn load_flow(&self, _flow_id: &str) -> Result<FlowSnapshot> {
            Ok(FlowSnapshot::default())
        }

        async fn save_flow(&self, _flow_id: &str, _flow: &FlowSnapshot) -> Result<()> {
            Err(TaskflowError::persistence("disk full"))
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_flow_dirty() {
        let events = Arc::new(VecEventSink::new());
        let editor = FlowEditor::builder(registry())
            .flow_store(Arc::new(FailingStore))
            .events(events.clone())
            .build();
        editor.open_flow("f").await.unwrap();

        let node = FlowNode::new("n", NodeKind::Note, Position::default());
        assert!(editor.add_node("f", node).await.is_ok());
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, PropagationEvent::SaveFailed { .. })));

        assert!(editor.flush("f").await.is_err());
        assert!(editor.close_flow("f").await.is_err());
        assert!(editor.is_open("f").await);
    }

    #[tokio::test]
    async fn test_close_flow_saves_and_forgets() {
        let store = Arc::new(InMemoryFlowStore::new());
        let editor = FlowEditor::builder(registry())
            .flow_store(store.clone())
            .config(EngineConfig {
                autosave: false,
                ..EngineConfig::default()
            })
            .build();
        editor.open_flow("f").await.unwrap();
        editor
            .add_node("f", FlowNode::new("n", NodeKind::Note, Position::default()))
            .await
            .unwrap();
        assert!(store.get("f").await.is_none());

        editor.close_flow("f").await.unwrap();
        assert!(!editor.is_open("f").await);
        assert_eq!(store.get("f").await.unwrap().nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_edit_queued_behind_close_is_rejected() {
        let (editor, store) = editor_with(FlowSnapshot::default()).await;
        let session = editor.sessions.lock().await.get("f").cloned().unwrap();
        let held = session.lock_owned().await;

        // Both calls queue on the session lock, close first
        let (closed, added, _) = tokio::join!(
            editor.close_flow("f"),
            editor.add_node("f", FlowNode::new("late", NodeKind::Note, Position::default())),
            async move {
                tokio::task::yield_now().await;
                drop(held);
            }
        );

        assert!(closed.unwrap().nodes.is_empty());
        assert!(matches!(added, Err(TaskflowError::FlowNotOpen(_))));
        assert!(!editor.is_open("f").await);
        assert!(store.get("f").await.unwrap().nodes.is_empty());

        // Reopening loads a fresh session from storage
        assert!(editor.open_flow("f").await.unwrap().nodes.is_empty());
    }
}
