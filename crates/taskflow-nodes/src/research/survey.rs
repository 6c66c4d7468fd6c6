//! Survey node
//!
//! Links the canvas to a survey run on the backend. Whenever the node is
//! refreshed from its parents it pulls the latest results, and its output
//! exposes them together with the question structure.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskflow_engine::{
    FetchRequest, Fetcher, FlowNode, HandlerError, HandlerRegistration, InputData, NodeData,
    NodeHandler, NodeKind, NodePatch,
};

use crate::fields::{non_blank, seeded};

/// Handler for `survey` nodes
///
/// # Output
/// `{}` until a `surveyId` is set, then the fetched
/// `{ "survey_results", "survey_structure" }`.
///
/// # Actions
/// - `fetchSurveyStatus`: reloads `responseCount` and the results.
/// - `fetchSurveyStructure`: reloads `surveyStructure` from the backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurveyHandler;

impl SurveyHandler {
    pub const ACTION_FETCH_STATUS: &'static str = "fetchSurveyStatus";
    pub const ACTION_FETCH_STRUCTURE: &'static str = "fetchSurveyStructure";

    fn results_path(survey_id: &str) -> String {
        format!("/api/surveys/{}/results", survey_id)
    }

    fn questions_path(survey_id: &str) -> String {
        format!("/api/surveys/{}/questions", survey_id)
    }

    /// Pull the latest results into `responseCount` and `outputData`
    async fn fetch_status(
        survey_id: &str,
        data: &NodeData,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        let results = fetcher
            .fetch(FetchRequest::get(Self::results_path(survey_id)))
            .await?;
        let response_count = results
            .get("submissions")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        log::debug!(
            "Survey '{}': fetched {} submission(s)",
            survey_id,
            response_count
        );

        let structure = data.field("surveyStructure").cloned().unwrap_or(Value::Null);
        Ok(NodePatch::new()
            .set("responseCount", response_count)
            .set(
                "outputData",
                json!({
                    "survey_results": results,
                    "survey_structure": structure,
                }),
            ))
    }

    async fn fetch_structure(
        survey_id: &str,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        let response = fetcher
            .fetch(FetchRequest::get(Self::questions_path(survey_id)))
            .await?;
        let questions = response
            .get("questions")
            .filter(|q| q.is_array())
            .cloned()
            .ok_or_else(|| HandlerError::invalid("survey questions response has no question list"))?;
        Ok(NodePatch::new().set("surveyStructure", questions))
    }
}

#[async_trait]
impl NodeHandler for SurveyHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Survey
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(
            vec![
                ("label", json!("Survey")),
                ("title", json!("Define & Run Survey")),
                ("description", json!("Collect user feedback.")),
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
        if non_blank(&node.data, "surveyId").is_none() {
            return Ok(json!({}));
        }
        Ok(node.data.output_data.clone().unwrap_or_else(|| json!({})))
    }

    async fn process_input(
        &self,
        data: &NodeData,
        _parent_outputs: &InputData,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        match non_blank(data, "surveyId") {
            Some(survey_id) => Self::fetch_status(survey_id, data, fetcher).await,
            None => Ok(NodePatch::new()),
        }
    }

    async fn handle_action(
        &self,
        action: &str,
        _params: &Value,
        node: &FlowNode,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        if action != Self::ACTION_FETCH_STATUS && action != Self::ACTION_FETCH_STRUCTURE {
            return Err(HandlerError::UnsupportedAction(action.to_string()));
        }
        let Some(survey_id) = non_blank(&node.data, "surveyId") else {
            return Ok(NodePatch::new());
        };

        if action == Self::ACTION_FETCH_STATUS {
            Self::fetch_status(survey_id, &node.data, fetcher).await
        } else {
            Self::fetch_structure(survey_id, fetcher).await
        }
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::Survey,
    handler: || Arc::new(SurveyHandler),
});
