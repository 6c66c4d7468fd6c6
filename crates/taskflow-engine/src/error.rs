//! Error types for the taskflow engine

use thiserror::Error;

/// Result type alias using TaskflowError
pub type Result<T> = std::result::Result<T, TaskflowError>;

/// Errors returned by graph operations
///
/// These are the "top-level" failures: an operation that returns one of
/// these did not mutate the graph. Per-node handler failures during a
/// propagation pass are reported separately (see [`HandlerError`]).
#[derive(Debug, Error)]
pub enum TaskflowError {
    /// A node id does not exist in the loaded flow
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A node's type tag has no registered handler
    #[error("No handler registered for node type '{node_type}' (node '{node_id}')")]
    NodeTypeNotFound { node_id: String, node_type: String },

    /// The connection rules reject this source/target pairing
    #[error("Connection not allowed: {source_type} -> {target_type}")]
    ConnectionNotAllowed {
        source_type: String,
        target_type: String,
    },

    /// An edge id does not exist in the loaded flow
    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    /// A node with this id already exists
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge id is already used by a different source/target pair
    #[error("Edge id '{edge_id}' already connects {existing_source} -> {existing_target}")]
    EdgeIdConflict {
        edge_id: String,
        existing_source: String,
        existing_target: String,
    },

    /// Adding the edge would close a cycle
    #[error("Edge {source_id} -> {target_id} would create a cycle")]
    CycleDetected { source_id: String, target_id: String },

    /// The flow has not been opened in this editor
    #[error("Flow not open: {0}")]
    FlowNotOpen(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Persistence backend failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskflowError {
    /// Create a NodeTypeNotFound error
    pub fn unknown_type(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self::NodeTypeNotFound {
            node_id: node_id.into(),
            node_type: node_type.into(),
        }
    }

    /// Create a persistence error with a message
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}

/// Failure raised by a node handler
///
/// Handler errors never escape a propagation pass. The engine records them
/// on the failing node and stops descending into its subtree.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Generic handler failure
    #[error("{0}")]
    Failed(String),

    /// A fetch through the injected fetcher failed
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The node's data could not be interpreted
    #[error("Invalid node data: {0}")]
    InvalidData(String),

    /// The handler has no action with this name
    #[error("Unsupported action '{0}'")]
    UnsupportedAction(String),

    /// The handler did not finish within the configured timeout
    #[error("Handler timed out after {0} ms")]
    Timeout(u64),
}

impl HandlerError {
    /// Create a failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create an invalid-data error with a message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}

/// Failure from a [`Fetcher`](crate::fetch::Fetcher)
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// No fetcher is configured for this engine
    #[error("No fetcher configured for {0}")]
    Unavailable(String),

    /// The remote answered with a non-success status
    #[error("{path} returned status {status}")]
    Status { path: String, status: u16 },

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}
