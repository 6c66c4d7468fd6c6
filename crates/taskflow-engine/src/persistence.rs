//! Flow persistence
//!
//! The editor loads a flow when it is opened and saves it after every
//! mutation. Storage is behind the [`FlowStore`] trait; two backends ship
//! with the crate: an in-memory map and one JSON file per flow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{Result, TaskflowError};
use crate::types::FlowSnapshot;

/// Storage backend for flows
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Load a flow. A flow that was never saved loads as an empty snapshot.
    async fn load_flow(&self, flow_id: &str) -> Result<FlowSnapshot>;

    /// Replace the stored state of a flow
    async fn save_flow(&self, flow_id: &str, flow: &FlowSnapshot) -> Result<()>;
}

/// Flows kept in memory
///
/// Useful for tests and for hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<String, FlowSnapshot>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a flow without going through `save_flow`
    pub async fn insert(&self, flow_id: impl Into<String>, flow: FlowSnapshot) {
        self.flows.write().await.insert(flow_id.into(), flow);
    }

    /// The stored state of a flow, if any
    pub async fn get(&self, flow_id: &str) -> Option<FlowSnapshot> {
        self.flows.read().await.get(flow_id).cloned()
    }

    pub async fn flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn load_flow(&self, flow_id: &str) -> Result<FlowSnapshot> {
        Ok(self.get(flow_id).await.unwrap_or_default())
    }

    async fn save_flow(&self, flow_id: &str, flow: &FlowSnapshot) -> Result<()> {
        self.insert(flow_id, flow.clone()).await;
        Ok(())
    }
}

/// One pretty-printed JSON file per flow
///
/// # Example
///
/// ```ignore
/// let store = FileFlowStore::new(".taskflow/flows");
/// let flow = store.load_flow("task-42").await?;
/// ```
#[derive(Debug, Clone)]
pub struct FileFlowStore {
    root: PathBuf,
}

impl FileFlowStore {
    /// Create a store rooted at `path`
    ///
    /// The directory will be created if it doesn't exist when saving.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root: path.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, flow_id: &str) -> Result<PathBuf> {
        let valid = !flow_id.is_empty()
            && flow_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !flow_id.starts_with('.');
        if !valid {
            return Err(TaskflowError::persistence(format!(
                "invalid flow id '{}'",
                flow_id
            )));
        }
        Ok(self.root.join(format!("{}.json", flow_id)))
    }

    /// Ids of every flow stored under the root
    pub async fn list_flows(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl FlowStore for FileFlowStore {
    async fn load_flow(&self, flow_id: &str) -> Result<FlowSnapshot> {
        let file_path = self.file_path(flow_id)?;
        if !file_path.exists() {
            log::debug!("No stored flow '{}', starting empty", flow_id);
            return Ok(FlowSnapshot::default());
        }
        let content = fs::read_to_string(&file_path).await?;
        let flow: FlowSnapshot = serde_json::from_str(&content)?;
        log::info!(
            "Loaded flow '{}' ({} nodes, {} edges) from {:?}",
            flow_id,
            flow.nodes.len(),
            flow.edges.len(),
            file_path
        );
        Ok(flow)
    }

    async fn save_flow(&self, flow_id: &str, flow: &FlowSnapshot) -> Result<()> {
        let file_path = self.file_path(flow_id)?;
        fs::create_dir_all(&self.root).await?;
        let content = serde_json::to_string_pretty(flow)?;

        // Write then rename so a crash never leaves a truncated flow behind
        let tmp_path = file_path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &file_path).await?;
        log::debug!("Saved flow '{}' to {:?}", flow_id, file_path);
        Ok(())
    }
}
