//! Problem node
//!
//! The problem statement most flows start from. Its output is the title and
//! description the user wrote, and everything downstream sees it through
//! their cumulative context.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskflow_engine::{
    ContextCodec, FetchRequest, Fetcher, FlowNode, HandlerError, HandlerRegistration, InputData,
    NodeData, NodeHandler, NodeKind, NodePatch,
};

use crate::fields::{non_blank, seeded};

/// Title used when the user has not written one
pub const UNTITLED_PROBLEM: &str = "Problema sem título";

/// Handler for `problem` nodes
///
/// # Output
/// `{ "problem": { "title", "description" } }`
///
/// # Actions
/// - `refineProblem`: asks the analysis backend to rewrite the title and
///   description. A blank description makes it a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProblemHandler;

impl ProblemHandler {
    pub const ACTION_REFINE: &'static str = "refineProblem";
    const ANALYSIS_PATH: &'static str = "/api/ai/runAnalysis";

    async fn refine(&self, node: &FlowNode, fetcher: &dyn Fetcher) -> Result<NodePatch, HandlerError> {
        let data = &node.data;
        if non_blank(data, "description").is_none() {
            log::debug!("Problem '{}': nothing to refine", node.id);
            return Ok(NodePatch::new());
        }

        let context = ContextCodec::default()
            .decompress(&data.cumulative_context)
            .map_err(|e| HandlerError::invalid(e.to_string()))?;
        let body = json!({
            "analysisKey": "refineProblemStatement",
            "nodeData": {
                "inputData": {
                    "currentTitle": data.field("title").cloned().unwrap_or(Value::Null),
                    "currentDescription": data.field("description").cloned().unwrap_or(Value::Null),
                },
                "cumulativeContext": context,
            },
        });

        let response = fetcher
            .fetch(FetchRequest::post(Self::ANALYSIS_PATH, body))
            .await?;
        let refined = response.get("analyzedData");
        let title = refined.and_then(|r| r.get("title")).and_then(Value::as_str);
        let description = refined
            .and_then(|r| r.get("description"))
            .and_then(Value::as_str);

        match (title, description) {
            (Some(title), Some(description)) => {
                let recommendations = refined
                    .and_then(|r| r.get("recommendations"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(NodePatch::new()
                    .set("title", title)
                    .set("description", description)
                    .set("analyzedData", json!({ "recommendations": recommendations })))
            }
            _ => Err(HandlerError::invalid(
                response
                    .get("processInputError")
                    .and_then(Value::as_str)
                    .unwrap_or("AI refinement returned invalid data structure."),
            )),
        }
    }
}

#[async_trait]
impl NodeHandler for ProblemHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Problem
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(
            vec![
                ("label", json!("Problem Definition")),
                ("title", json!("Define the Core Problem")),
                ("description", json!("")),
                ("sources", json!([])),
            ],
            fields,
        )
    }

    async fn generate_output(
        &self,
        node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> Result<Value, HandlerError> {
        let title = non_blank(&node.data, "title").unwrap_or(UNTITLED_PROBLEM);
        let description = node.data.str_field("description").unwrap_or("");
        Ok(json!({
            "problem": {
                "title": title,
                "description": description,
            }
        }))
    }

    /// Parent outputs are recorded by the engine; the problem itself has
    /// nothing to derive from them.
    async fn process_input(
        &self,
        _data: &NodeData,
        _parent_outputs: &InputData,
        _fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        Ok(NodePatch::new())
    }

    async fn handle_action(
        &self,
        action: &str,
        _params: &Value,
        node: &FlowNode,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        match action {
            Self::ACTION_REFINE => self.refine(node, fetcher).await,
            other => Err(HandlerError::UnsupportedAction(other.to_string())),
        }
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::Problem,
    handler: || Arc::new(ProblemHandler),
});

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_engine::{CallbackFetcher, FetchError, NoopFetcher, Position};

    fn problem(title: &str, description: &str) -> FlowNode {
        FlowNode::new("problem-1", NodeKind::Problem, Position::default())
            .with_field("title", title)
            .with_field("description", description)
    }

    #[tokio::test]
    async fn test_output_shape() {
        let node = problem("Problema Teste", "Descrição do problema");
        let output = ProblemHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        assert_eq!(
            output,
            json!({ "problem": { "title": "Problema Teste", "description": "Descrição do problema" } })
        );
    }

    #[tokio::test]
    async fn test_blank_title_falls_back() {
        let node = problem("", "x");
        let output = ProblemHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        assert_eq!(output["problem"]["title"], UNTITLED_PROBLEM);
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let node = problem("A", "B");
        let first = ProblemHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        let second = ProblemHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_initialize_data_defaults() {
        let data = ProblemHandler.initialize_data(Map::new());
        assert_eq!(data.str_field("title"), Some("Define the Core Problem"));
        assert_eq!(data.field("sources"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_refine_with_blank_description_is_noop() {
        let node = problem("A", "  ");
        let patch = ProblemHandler
            .handle_action(ProblemHandler::ACTION_REFINE, &Value::Null, &node, &NoopFetcher)
            .await
            .unwrap();
        assert!(patch.is_empty());
    }

    #[tokio::test]
    async fn test_refine_applies_backend_answer() {
        let fetcher = CallbackFetcher::new(|req: FetchRequest| async move {
            assert_eq!(req.path, "/api/ai/runAnalysis");
            let body = req.body.unwrap_or(Value::Null);
            assert_eq!(body["analysisKey"], "refineProblemStatement");
            Ok::<_, FetchError>(json!({
                "analyzedData": {
                    "title": "Churn em clientes novos",
                    "description": "Refinado",
                    "recommendations": ["entrevistar"]
                }
            }))
        });

        let node = problem("Churn", "clientes saem");
        let patch = ProblemHandler
            .handle_action(ProblemHandler::ACTION_REFINE, &Value::Null, &node, &fetcher)
            .await
            .unwrap();
        assert_eq!(patch.get("title"), Some(&json!("Churn em clientes novos")));
        assert_eq!(
            patch.get("analyzedData"),
            Some(&json!({ "recommendations": ["entrevistar"] }))
        );
    }

    #[tokio::test]
    async fn test_refine_rejects_malformed_answer() {
        let fetcher = CallbackFetcher::new(|_req: FetchRequest| async move {
            Ok::<_, FetchError>(json!({ "analyzedData": { "title": 3 } }))
        });
        let node = problem("Churn", "clientes saem");
        let err = ProblemHandler
            .handle_action(ProblemHandler::ACTION_REFINE, &Value::Null, &node, &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidData(_)));
    }
}
