//! Event types for observing propagation
//!
//! Events are sent from the engine to the canvas (or any consumer) so it
//! can show per-node progress and failures while a pass is running.

use serde::{Deserialize, Serialize};

use crate::types::ProcessingStage;

/// Trait for sending propagation events
///
/// This abstracts over the transport mechanism (websocket, mpsc, etc.)
/// so the engine stays usable in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: PropagationEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while mutating and propagating a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PropagationEvent {
    /// A propagation pass started
    #[serde(rename_all = "camelCase")]
    PropagationStarted {
        pass_id: String,
        origin: String,
        affected: Vec<String>,
    },

    /// A node was recomputed and committed
    #[serde(rename_all = "camelCase")]
    NodeProcessed {
        pass_id: String,
        node_id: String,
        output: Option<serde_json::Value>,
    },

    /// A node's handler failed; its subtree will be skipped
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        pass_id: String,
        node_id: String,
        stage: ProcessingStage,
        error: String,
    },

    /// A node was not recomputed this pass
    #[serde(rename_all = "camelCase")]
    NodeSkipped {
        pass_id: String,
        node_id: String,
        reason: String,
    },

    /// A propagation pass finished
    #[serde(rename_all = "camelCase")]
    PropagationCompleted {
        pass_id: String,
        origin: String,
        processed: usize,
        failed: usize,
        skipped: usize,
    },

    /// The flow's structure or data changed through the façade
    #[serde(rename_all = "camelCase")]
    FlowModified {
        flow_id: String,
        operation: String,
        node_ids: Vec<String>,
    },

    /// Saving the flow failed; it stays dirty until the next successful save
    #[serde(rename_all = "camelCase")]
    SaveFailed { flow_id: String, error: String },
}

impl PropagationEvent {
    /// Create a flow modified event
    pub fn flow_modified(flow_id: &str, operation: &str, node_ids: Vec<String>) -> Self {
        Self::FlowModified {
            flow_id: flow_id.to_string(),
            operation: operation.to_string(),
            node_ids,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: PropagationEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<PropagationEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<PropagationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: PropagationEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "Event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}
