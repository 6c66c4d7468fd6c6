//! State of one open flow
//!
//! A session owns the [`GraphStore`] of a flow together with its viewport
//! and bookkeeping. The editor creates one when a flow is opened and drops
//! it when the flow is closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::store::GraphStore;
use crate::types::{FlowId, FlowSnapshot, Viewport};

/// One loaded flow
pub struct GraphSession {
    flow_id: FlowId,
    pub store: GraphStore,
    pub viewport: Viewport,
    /// Changes exist that have not reached storage yet
    pub dirty: bool,
    /// Dropped by the editor; later operations must not touch it
    pub closed: bool,
    opened_at: Instant,
    last_accessed: Instant,
}

impl GraphSession {
    /// An empty session
    pub fn new(flow_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self::from_snapshot(flow_id, FlowSnapshot::default(), clock)
    }

    /// Session seeded from stored state
    pub fn from_snapshot(flow_id: impl Into<String>, flow: FlowSnapshot, clock: Arc<dyn Clock>) -> Self {
        let now = Instant::now();
        Self {
            flow_id: flow_id.into(),
            store: GraphStore::from_parts(flow.nodes, flow.edges, clock),
            viewport: flow.viewport,
            dirty: false,
            closed: false,
            opened_at: now,
            last_accessed: now,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Current state in its persisted form
    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            nodes: self.store.nodes().to_vec(),
            edges: self.store.edges().to_vec(),
            viewport: self.viewport,
        }
    }

    /// Update the last accessed time
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Check if this session hasn't been accessed within `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_accessed.elapsed() > timeout
    }
}
