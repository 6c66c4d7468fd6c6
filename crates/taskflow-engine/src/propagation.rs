//! Forward propagation of node outputs
//!
//! A pass starts at one node whose data changed and walks everything
//! reachable from it in topological order. Each descendant gathers the
//! current outputs of all its direct parents, runs its handler's
//! `process_input`, rebuilds its cumulative context from its parents'
//! contexts, and regenerates its own output before any of its children are
//! visited.
//!
//! Work on a node is staged on a copy and committed only when every step
//! succeeded. A failing node keeps its last good data plus an error marker,
//! and everything below it is skipped for the rest of the pass. Failures
//! never abort the pass as a whole.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::VersionStamper;
use crate::config::EngineConfig;
use crate::context::{ContextBlob, ContextCodec, CumulativeContext};
use crate::error::{HandlerError, Result};
use crate::events::{EventSink, NullEventSink, PropagationEvent};
use crate::fetch::Fetcher;
use crate::registry::{NodeHandler, NodeRegistry};
use crate::store::GraphStore;
use crate::types::{InputData, NodeId, NodePatch, ProcessingFailure, ProcessingStage};

/// What triggered a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropagationMode {
    /// The origin's own data changed; only its output is regenerated
    OutputChanged,
    /// The origin is refreshed from its parents as well, as if it were a
    /// descendant of itself
    Reprocess,
}

/// A node that failed during a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub stage: ProcessingStage,
    pub message: String,
}

/// Outcome of one propagation pass
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReport {
    pub origin: NodeId,
    /// Nodes recomputed and committed, in processing order
    pub processed: Vec<NodeId>,
    pub failed: Vec<NodeFailure>,
    /// Nodes left untouched because an upstream node failed or they sit on a cycle
    pub skipped: Vec<NodeId>,
}

impl PropagationReport {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// The pass completed but at least one node failed
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failure_for(&self, node_id: &str) -> Option<&NodeFailure> {
        self.failed.iter().find(|f| f.node_id == node_id)
    }

    pub fn was_processed(&self, node_id: &str) -> bool {
        self.processed.iter().any(|id| id == node_id)
    }

    pub fn was_skipped(&self, node_id: &str) -> bool {
        self.skipped.iter().any(|id| id == node_id)
    }
}

/// Failure of one step on one node
#[derive(Debug)]
struct StepFailure {
    stage: ProcessingStage,
    message: String,
}

impl StepFailure {
    fn new(stage: ProcessingStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Runs propagation passes against a [`GraphStore`]
pub struct PropagationEngine {
    registry: Arc<NodeRegistry>,
    codec: ContextCodec,
    handler_timeout: Duration,
    stamper: Arc<VersionStamper>,
    events: Arc<dyn EventSink>,
}

impl PropagationEngine {
    /// Create an engine with default configuration and no event sink
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, &EngineConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            codec: ContextCodec::from_config(config),
            handler_timeout: config.handler_timeout(),
            stamper: Arc::new(VersionStamper::new()),
            events: Arc::new(NullEventSink),
        }
    }

    /// Send events to `sink`
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Share a version stamper with other engines
    pub fn with_stamper(mut self, stamper: Arc<VersionStamper>) -> Self {
        self.stamper = stamper;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &ContextCodec {
        &self.codec
    }

    /// Run one pass starting at `origin`
    ///
    /// Fails without touching the store if `origin` is missing or any node in
    /// the affected subgraph has no registered handler. Handler failures are
    /// reported in the returned [`PropagationReport`] instead.
    pub async fn propagate(
        &self,
        store: &mut GraphStore,
        origin: &str,
        mode: PropagationMode,
        fetcher: &dyn Fetcher,
    ) -> Result<PropagationReport> {
        let (affected, handlers) = self.resolve_handlers(store, origin)?;
        let (order, stranded) = topological_order(store, origin, &affected);
        let pass_id = uuid::Uuid::new_v4().to_string();
        log::debug!(
            "Propagation {} from '{}' ({:?}) over {} node(s)",
            pass_id,
            origin,
            mode,
            affected.len()
        );
        self.emit(PropagationEvent::PropagationStarted {
            pass_id: pass_id.clone(),
            origin: origin.to_string(),
            affected: affected.clone(),
        });

        let mut report = PropagationReport::new(origin);
        let mut blocked: HashSet<NodeId> = HashSet::new();

        for id in order {
            let Some(handler) = handlers.get(&id) else {
                continue;
            };

            if id != origin {
                if let Some(parent) = store
                    .parents_of(&id)
                    .into_iter()
                    .find(|p| blocked.contains(p))
                {
                    log::debug!("Skipping '{}': upstream '{}' did not complete", id, parent);
                    self.emit(PropagationEvent::NodeSkipped {
                        pass_id: pass_id.clone(),
                        node_id: id.clone(),
                        reason: format!("upstream node '{}' did not complete", parent),
                    });
                    report.skipped.push(id.clone());
                    blocked.insert(id);
                    continue;
                }
            }

            let refresh_inputs = id != origin || mode == PropagationMode::Reprocess;
            let outcome = if refresh_inputs {
                self.refresh_node(store, &id, handler.as_ref(), fetcher).await
            } else {
                self.regenerate_output(store, &id, handler.as_ref(), fetcher)
                    .await
            };

            match outcome {
                Ok(output) => {
                    self.emit(PropagationEvent::NodeProcessed {
                        pass_id: pass_id.clone(),
                        node_id: id.clone(),
                        output,
                    });
                    report.processed.push(id);
                }
                Err(failure) => {
                    log::warn!(
                        "Node '{}' failed during {:?}: {}",
                        id,
                        failure.stage,
                        failure.message
                    );
                    self.record_failure(store, &id, failure.stage, &failure.message)?;
                    self.emit(PropagationEvent::NodeFailed {
                        pass_id: pass_id.clone(),
                        node_id: id.clone(),
                        stage: failure.stage,
                        error: failure.message.clone(),
                    });
                    report.failed.push(NodeFailure {
                        node_id: id.clone(),
                        stage: failure.stage,
                        message: failure.message,
                    });
                    blocked.insert(id);
                }
            }
        }

        for id in stranded {
            log::warn!("Skipping '{}': it sits on a cycle", id);
            self.emit(PropagationEvent::NodeSkipped {
                pass_id: pass_id.clone(),
                node_id: id.clone(),
                reason: "node is part of a cycle".to_string(),
            });
            report.skipped.push(id);
        }

        self.emit(PropagationEvent::PropagationCompleted {
            pass_id,
            origin: origin.to_string(),
            processed: report.processed.len(),
            failed: report.failed.len(),
            skipped: report.skipped.len(),
        });
        if report.is_partial_failure() {
            log::info!(
                "Propagation from '{}' finished with {} failure(s)",
                origin,
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Check that a pass from `origin` could run
    ///
    /// Fails if `origin` is missing or a node it reaches has no handler.
    /// Returns the affected nodes, origin first.
    pub fn preflight(&self, store: &GraphStore, origin: &str) -> Result<Vec<NodeId>> {
        self.resolve_handlers(store, origin)
            .map(|(affected, _)| affected)
    }

    fn resolve_handlers(
        &self,
        store: &GraphStore,
        origin: &str,
    ) -> Result<(Vec<NodeId>, HashMap<NodeId, Arc<dyn NodeHandler>>)> {
        store.node(origin)?;
        let mut affected = vec![origin.to_string()];
        affected.extend(store.descendants(origin));

        let mut handlers: HashMap<NodeId, Arc<dyn NodeHandler>> =
            HashMap::with_capacity(affected.len());
        for id in &affected {
            let node = store.node(id)?;
            handlers.insert(id.clone(), self.registry.handler_for(node)?);
        }
        Ok((affected, handlers))
    }

    /// Run a handler action on a node
    ///
    /// Returns the patch the action produced, or the failure to record on the
    /// node. Nothing is written to the store.
    pub async fn run_action(
        &self,
        store: &GraphStore,
        node_id: &str,
        action: &str,
        params: &Value,
        fetcher: &dyn Fetcher,
    ) -> Result<std::result::Result<NodePatch, NodeFailure>> {
        let node = store.node(node_id)?;
        let handler = self.registry.handler_for(node)?;
        let outcome = self
            .guarded(
                ProcessingStage::HandleAction,
                handler.handle_action(action, params, node, fetcher),
            )
            .await;
        Ok(outcome.map_err(|failure| NodeFailure {
            node_id: node_id.to_string(),
            stage: failure.stage,
            message: failure.message,
        }))
    }

    /// Attach a processing failure to a node without touching its other data
    pub fn record_failure(
        &self,
        store: &mut GraphStore,
        node_id: &str,
        stage: ProcessingStage,
        message: &str,
    ) -> Result<()> {
        let failure = ProcessingFailure {
            stage,
            message: message.to_string(),
            occurred_at: store.now(),
        };
        store.set_processing_error(node_id, Some(failure))
    }

    // -------------------------------------------------------------------------
    // Per-node steps
    // -------------------------------------------------------------------------

    /// Regenerate a node's output from its current data
    async fn regenerate_output(
        &self,
        store: &mut GraphStore,
        node_id: &str,
        handler: &dyn NodeHandler,
        fetcher: &dyn Fetcher,
    ) -> std::result::Result<Option<Value>, StepFailure> {
        let staged = store
            .node(node_id)
            .map_err(|e| StepFailure::new(ProcessingStage::GenerateOutput, e.to_string()))?
            .clone();
        let output = self
            .guarded(
                ProcessingStage::GenerateOutput,
                handler.generate_output(&staged, fetcher),
            )
            .await?;

        let mut data = staged.data;
        data.output_data = Some(normalize_output(output));
        data.processing_error = None;
        data.updated_at = Some(store.now());
        let committed = data.output_data.clone();
        store
            .replace_node_data(node_id, data)
            .map_err(|e| StepFailure::new(ProcessingStage::GenerateOutput, e.to_string()))?;
        Ok(committed)
    }

    /// Recompute a node's inputs, context and output from its parents
    async fn refresh_node(
        &self,
        store: &mut GraphStore,
        node_id: &str,
        handler: &dyn NodeHandler,
        fetcher: &dyn Fetcher,
    ) -> std::result::Result<Option<Value>, StepFailure> {
        let node = store
            .node(node_id)
            .map_err(|e| StepFailure::new(ProcessingStage::ProcessInput, e.to_string()))?
            .clone();
        let parents = store.parents_of(node_id);

        let mut parent_outputs = InputData::new();
        for parent_id in &parents {
            let output = store
                .get_node(parent_id)
                .and_then(|p| p.data.output_data.clone())
                .unwrap_or(Value::Null);
            parent_outputs.insert(parent_id.clone(), output);
        }

        let patch = self
            .guarded(
                ProcessingStage::ProcessInput,
                handler.process_input(&node.data, &parent_outputs, fetcher),
            )
            .await?;

        let mut staged = node;
        staged.data.input_data = Some(parent_outputs);
        staged
            .data
            .apply_patch(&patch)
            .map_err(|e| StepFailure::new(ProcessingStage::ProcessInput, e.to_string()))?;
        staged.data.cumulative_context = self
            .child_context(store, &parents)
            .map_err(|e| StepFailure::new(ProcessingStage::ProcessInput, e.to_string()))?;

        let output = self
            .guarded(
                ProcessingStage::GenerateOutput,
                handler.generate_output(&staged, fetcher),
            )
            .await?;

        let mut data = staged.data;
        data.output_data = Some(normalize_output(output));
        data.processing_error = None;
        data.updated_at = Some(store.now());
        let committed = data.output_data.clone();
        store
            .replace_node_data(node_id, data)
            .map_err(|e| StepFailure::new(ProcessingStage::GenerateOutput, e.to_string()))?;
        Ok(committed)
    }

    /// Fold every parent's context plus an entry for the parent itself
    fn child_context(&self, store: &GraphStore, parents: &[NodeId]) -> Result<CumulativeContext> {
        let clock = store.clock().clone();
        let mut blob = ContextBlob::new();
        for parent_id in parents {
            let parent = store.node(parent_id)?;
            blob = self.codec.accumulate(
                blob,
                &parent.data.cumulative_context,
                &parent.id,
                &parent.node_type,
                parent.data.output_data.as_ref(),
                self.stamper.next(clock.as_ref()),
            )?;
        }
        self.codec.encode(blob)
    }

    /// Await a handler call under the configured timeout
    async fn guarded<T, F>(
        &self,
        stage: ProcessingStage,
        call: F,
    ) -> std::result::Result<T, StepFailure>
    where
        F: Future<Output = std::result::Result<T, HandlerError>>,
    {
        match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StepFailure::new(stage, err.to_string())),
            Err(_) => {
                let millis = self.handler_timeout.as_millis() as u64;
                Err(StepFailure::new(stage, HandlerError::Timeout(millis).to_string()))
            }
        }
    }

    fn emit(&self, event: PropagationEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("Dropped propagation event: {}", e);
        }
    }
}

/// A null output is stored as an empty object
fn normalize_output(output: Value) -> Value {
    if output.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        output
    }
}

/// Kahn's algorithm over the affected subgraph
///
/// Only edges between affected nodes count, and edges into the origin are
/// ignored so the origin always goes first. Ties are broken by store order.
/// Returns the processing order and the nodes stranded on a cycle.
fn topological_order(
    store: &GraphStore,
    origin: &str,
    affected: &[NodeId],
) -> (Vec<NodeId>, Vec<NodeId>) {
    let in_pass: HashSet<&str> = affected.iter().map(String::as_str).collect();
    let rank: HashMap<&str, usize> = store
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree: HashMap<&str, usize> = in_pass.iter().map(|id| (*id, 0)).collect();
    for &id in &in_pass {
        if id == origin {
            continue;
        }
        let parents = store
            .parents_of(id)
            .into_iter()
            .filter(|p| in_pass.contains(p.as_str()))
            .count();
        in_degree.insert(id, parents);
    }

    let mut ready: BTreeSet<(usize, &str)> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .filter_map(|(id, _)| rank.get(id).map(|r| (*r, *id)))
        .collect();

    let mut order = Vec::with_capacity(affected.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id.to_string());
        for child in store.children_of(id) {
            let Some((child_id, deg)) = in_degree.get_key_value(child.as_str()) else {
                continue;
            };
            if *child_id == origin || *deg == 0 {
                continue;
            }
            let child_id = *child_id;
            let remaining = deg - 1;
            in_degree.insert(child_id, remaining);
            if remaining == 0 {
                if let Some(r) = rank.get(child_id) {
                    ready.insert((*r, child_id));
                }
            }
        }
    }

    let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
    let stranded = affected
        .iter()
        .filter(|id| !placed.contains(id.as_str()))
        .cloned()
        .collect();
    (order, stranded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextCodec;
    use crate::error::TaskflowError;
    use crate::events::VecEventSink;
    use crate::fetch::NoopFetcher;
    use crate::types::{FlowEdge, FlowNode, NodeData, NodeKind, Position};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Output echoes the node's title and the parents it saw
    struct EchoHandler {
        kind: NodeKind,
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl EchoHandler {
        fn new(kind: NodeKind) -> Self {
            Self {
                kind,
                calls: AtomicUsize::new(0),
                fail: false,
                delay: None,
            }
        }

        fn failing(kind: NodeKind) -> Self {
            Self {
                fail: true,
                ..Self::new(kind)
            }
        }

        fn slow(kind: NodeKind, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(kind)
            }
        }
    }

    #[async_trait]
    impl NodeHandler for EchoHandler {
        fn kind(&self) -> NodeKind {
            self.kind
        }

        async fn generate_output(
            &self,
            node: &FlowNode,
            _fetcher: &dyn Fetcher,
        ) -> std::result::Result<Value, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(HandlerError::failed("upstream service unavailable"));
            }
            let parents: Vec<&String> = node
                .data
                .input_data
                .as_ref()
                .map(|m| m.keys().collect())
                .unwrap_or_default();
            Ok(json!({
                "id": node.id,
                "title": node.data.field("title"),
                "parents": parents,
            }))
        }
    }

    fn registry_with(handlers: Vec<Arc<dyn NodeHandler>>) -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::new();
        for kind in NodeKind::ALL {
            registry.register(Arc::new(EchoHandler::new(kind)));
        }
        for handler in handlers {
            registry.register(handler);
        }
        Arc::new(registry)
    }

    fn store_of(nodes: &[(&str, NodeKind)], edges: &[(&str, &str)]) -> GraphStore {
        let mut store = GraphStore::new();
        for (id, kind) in nodes {
            store
                .insert_node(FlowNode::new(*id, *kind, Position::default()).with_field("title", *id))
                .unwrap();
        }
        for (s, t) in edges {
            store.insert_edge(FlowEdge::between(*s, *t)).unwrap();
        }
        store
    }

    fn blob_of(store: &GraphStore, id: &str) -> ContextBlob {
        ContextCodec::default()
            .decompress(&store.get_node(id).unwrap().data.cumulative_context)
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_chain_propagates_inputs_and_context() {
        let engine = PropagationEngine::new(registry_with(vec![]));
        let mut store = store_of(
            &[("a", NodeKind::Problem), ("b", NodeKind::DataSource), ("c", NodeKind::Analysis)],
            &[("a", "b"), ("b", "c")],
        );

        let report = engine
            .propagate(&mut store, "a", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();
        assert_eq!(report.processed, vec!["a", "b", "c"]);
        assert!(!report.is_partial_failure());

        let b = store.get_node("b").unwrap();
        let a_out = store.get_node("a").unwrap().data.output_data.clone().unwrap();
        assert_eq!(b.data.input_data.as_ref().unwrap()["a"], a_out);

        let c_ctx = blob_of(&store, "c");
        assert_eq!(c_ctx.len(), 2);
        assert_eq!(c_ctx["a"].node_type, "problem");
        assert_eq!(c_ctx["b"].node_type, "dataSource");
        assert_eq!(c_ctx["a"].output, a_out);
    }

    #[tokio::test]
    async fn test_diamond_visits_join_once_after_both_parents() {
        let join = Arc::new(EchoHandler::new(NodeKind::Report));
        let engine = PropagationEngine::new(registry_with(vec![join.clone()]));
        let mut store = store_of(
            &[
                ("d", NodeKind::Report),
                ("a", NodeKind::Problem),
                ("b", NodeKind::DataSource),
                ("c", NodeKind::Survey),
            ],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        let report = engine
            .propagate(&mut store, "a", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();

        assert_eq!(join.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.processed.iter().filter(|id| *id == "d").count(), 1);
        let pos = |id: &str| report.processed.iter().position(|p| p == id).unwrap();
        assert!(pos("d") > pos("b") && pos("d") > pos("c"));

        let d = store.get_node("d").unwrap();
        let inputs = d.data.input_data.as_ref().unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs["b"]["id"], json!("b"));
        assert_eq!(inputs["c"]["id"], json!("c"));

        let ctx = blob_of(&store, "d");
        let keys: Vec<&str> = ctx.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_halts_subtree_only() {
        let engine = PropagationEngine::new(registry_with(vec![Arc::new(EchoHandler::failing(
            NodeKind::Survey,
        ))]));
        let mut store = store_of(
            &[
                ("p", NodeKind::Problem),
                ("s", NodeKind::Survey),
                ("x", NodeKind::Analysis),
                ("n", NodeKind::Note),
            ],
            &[("p", "s"), ("s", "x"), ("p", "n")],
        );
        let previous = json!({ "last": "good" });
        store
            .update_node_data("s", &NodePatch::new().set("outputData", previous.clone()))
            .unwrap();

        let report = engine
            .propagate(&mut store, "p", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();

        assert!(report.is_partial_failure());
        assert_eq!(report.failure_for("s").unwrap().stage, ProcessingStage::GenerateOutput);
        assert!(report.was_skipped("x"));
        assert!(report.was_processed("n"));
        assert!(report.was_processed("p"));

        let s = store.get_node("s").unwrap();
        assert_eq!(s.data.output_data, Some(previous));
        assert!(s.data.input_data.is_none());
        assert!(s.data.processing_error.is_some());
        assert!(store.get_node("x").unwrap().data.output_data.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_a_processing_error() {
        let config = EngineConfig {
            handler_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let registry = registry_with(vec![Arc::new(EchoHandler::slow(
            NodeKind::Survey,
            Duration::from_millis(500),
        ))]);
        let engine = PropagationEngine::with_config(registry, &config);
        let mut store = store_of(
            &[("p", NodeKind::Problem), ("s", NodeKind::Survey)],
            &[("p", "s")],
        );

        let report = engine
            .propagate(&mut store, "p", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();
        let failure = report.failure_for("s").unwrap();
        assert!(failure.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_type_fails_before_mutation() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(EchoHandler::new(NodeKind::Problem)));
        let engine = PropagationEngine::new(Arc::new(registry));
        let mut store = store_of(
            &[("p", NodeKind::Problem), ("s", NodeKind::Survey)],
            &[("p", "s")],
        );

        let err = engine
            .propagate(&mut store, "p", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskflowError::NodeTypeNotFound { node_id, .. } if node_id == "s"));
        assert!(store.get_node("p").unwrap().data.output_data.is_none());
    }

    #[tokio::test]
    async fn test_missing_origin() {
        let engine = PropagationEngine::new(registry_with(vec![]));
        let mut store = GraphStore::new();
        let err = engine
            .propagate(&mut store, "ghost", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskflowError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_reprocess_refreshes_origin_inputs() {
        let engine = PropagationEngine::new(registry_with(vec![]));
        let mut store = store_of(
            &[("p", NodeKind::Problem), ("d", NodeKind::DataSource)],
            &[("p", "d")],
        );
        store
            .update_node_data("p", &NodePatch::new().set("outputData", json!({ "v": 1 })))
            .unwrap();

        engine
            .propagate(&mut store, "d", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();
        assert!(store.get_node("d").unwrap().data.input_data.is_none());

        engine
            .propagate(&mut store, "d", PropagationMode::Reprocess, &NoopFetcher)
            .await
            .unwrap();
        let d = store.get_node("d").unwrap();
        assert_eq!(d.data.input_data.as_ref().unwrap()["p"], json!({ "v": 1 }));
        assert!(blob_of(&store, "d").contains_key("p"));
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let engine = PropagationEngine::new(registry_with(vec![]));
        let mut store = store_of(&[("p", NodeKind::Problem)], &[]);
        engine
            .record_failure(&mut store, "p", ProcessingStage::GenerateOutput, "old")
            .unwrap();

        engine
            .propagate(&mut store, "p", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();
        assert!(store.get_node("p").unwrap().data.processing_error.is_none());
    }

    #[tokio::test]
    async fn test_cycle_members_are_skipped() {
        let engine = PropagationEngine::new(registry_with(vec![]));
        let mut store = GraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .insert_node(FlowNode::new(id, NodeKind::Default, Position::default()))
                .unwrap();
        }
        // The store itself does not reject cycles; the façade does.
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "b")] {
            store.insert_edge(FlowEdge::between(s, t)).unwrap();
        }

        let report = engine
            .propagate(&mut store, "a", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();
        assert_eq!(report.processed, vec!["a"]);
        assert!(report.was_skipped("b") && report.was_skipped("c"));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let sink = Arc::new(VecEventSink::new());
        let engine = PropagationEngine::new(registry_with(vec![])).with_events(sink.clone());
        let mut store = store_of(
            &[("p", NodeKind::Problem), ("d", NodeKind::DataSource)],
            &[("p", "d")],
        );
        engine
            .propagate(&mut store, "p", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();

        let events = sink.events();
        assert!(matches!(events.first(), Some(PropagationEvent::PropagationStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(PropagationEvent::PropagationCompleted { processed: 2, failed: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_null_output_is_stored_as_empty_object() {
        let registry = {
            let mut r = NodeRegistry::new();
            r.register(Arc::new(crate::registry::FnHandler::new(NodeKind::Note, |_| {
                Ok(Value::Null)
            })));
            Arc::new(r)
        };
        let engine = PropagationEngine::new(registry);
        let mut store = GraphStore::new();
        store
            .insert_node(FlowNode::new("n", NodeKind::Note, Position::default()).with_data(NodeData::default()))
            .unwrap();
        engine
            .propagate(&mut store, "n", PropagationMode::OutputChanged, &NoopFetcher)
            .await
            .unwrap();
        assert_eq!(store.get_node("n").unwrap().data.output_data, Some(json!({})));
    }
}
