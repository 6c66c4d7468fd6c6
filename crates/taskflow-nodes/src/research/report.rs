//! Report node
//!
//! Assembles the insights of every connected analysis into one report.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskflow_engine::{
    Fetcher, FlowNode, HandlerError, HandlerRegistration, NodeData, NodeHandler, NodeKind,
};

use crate::fields::{non_blank, seeded};

/// Handler for `report` nodes
///
/// # Output
/// `{ "report": { "title", "sections": [{ "source", "insights" }] } }`,
/// one section per parent that produced `analysis_results`, in parent id
/// order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportHandler;

#[async_trait]
impl NodeHandler for ReportHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Report
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(
            vec![("label", json!("Relatório")), ("title", json!("Relatório"))],
            fields,
        )
    }

    async fn generate_output(
        &self,
        node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> Result<Value, HandlerError> {
        let title = non_blank(&node.data, "title").unwrap_or("Relatório");
        let sections: Vec<Value> = node
            .data
            .input_data
            .iter()
            .flatten()
            .filter_map(|(source, output)| {
                let insights = output.get("analysis_results")?.get("insights")?;
                Some(json!({ "source": source, "insights": insights }))
            })
            .collect();

        Ok(json!({
            "report": {
                "title": title,
                "sections": sections,
            }
        }))
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::Report,
    handler: || Arc::new(ReportHandler),
});

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_engine::{InputData, NoopFetcher, Position};

    #[tokio::test]
    async fn test_sections_follow_analysis_parents() {
        let mut inputs = InputData::new();
        inputs.insert(
            "analysis-1".into(),
            json!({ "analysis_results": { "insights": [{ "theme": "prazo" }] } }),
        );
        inputs.insert("note-1".into(), json!({ "note": { "text": "lembrete" } }));

        let mut node = FlowNode::new("report-1", NodeKind::Report, Position::default())
            .with_field("title", "Q3");
        node.data.input_data = Some(inputs);

        let output = ReportHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        assert_eq!(output["report"]["title"], "Q3");
        assert_eq!(
            output["report"]["sections"],
            json!([{ "source": "analysis-1", "insights": [{ "theme": "prazo" }] }])
        );
    }

    #[tokio::test]
    async fn test_unconnected_report_is_empty() {
        let node = FlowNode::new("r", NodeKind::Report, Position::default());
        let output = ReportHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        assert_eq!(output["report"]["sections"], json!([]));
        assert_eq!(output["report"]["title"], "Relatório");
    }
}
