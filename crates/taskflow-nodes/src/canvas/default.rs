//! Default node
//!
//! A pass-through node used for scratch work and as the neutral member of
//! the catalog. Its output is whatever `outputData` it already holds.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskflow_engine::{
    Fetcher, FlowNode, HandlerError, HandlerRegistration, NodeData, NodeHandler, NodeKind,
};

use crate::fields::seeded;

/// Handler for `default` nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

#[async_trait]
impl NodeHandler for DefaultHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Default
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(vec![("label", json!("Default Node"))], fields)
    }

    async fn generate_output(
        &self,
        node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> Result<Value, HandlerError> {
        Ok(node.data.output_data.clone().unwrap_or_else(|| json!({})))
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::Default,
    handler: || Arc::new(DefaultHandler),
});
