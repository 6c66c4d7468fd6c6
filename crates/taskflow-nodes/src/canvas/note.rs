//! Note node

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskflow_engine::{
    Fetcher, FlowNode, HandlerError, HandlerRegistration, NodeData, NodeHandler, NodeKind,
};

use crate::fields::seeded;

/// Handler for `note` nodes
///
/// Outputs `{ "note": { "text" } }` so annotations can feed any node.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoteHandler;

#[async_trait]
impl NodeHandler for NoteHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Note
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(vec![("label", json!("Nota")), ("text", json!(""))], fields)
    }

    async fn generate_output(
        &self,
        node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> Result<Value, HandlerError> {
        let text = node.data.str_field("text").unwrap_or("");
        Ok(json!({ "note": { "text": text } }))
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::Note,
    handler: || Arc::new(NoteHandler),
});
