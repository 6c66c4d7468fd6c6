//! Analysis node
//!
//! Collects qualitative text (uploaded documents, open-text survey answers)
//! and quantitative KPIs from its parents and sends them to the analysis
//! backend. The insights that come back are the node's output.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskflow_engine::{
    FetchRequest, Fetcher, FlowNode, HandlerError, HandlerRegistration, InputData, NodeData,
    NodeHandler, NodeKind, NodePatch,
};

use crate::fields::seeded;

/// Material gathered from parent outputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisMaterial {
    pub qualitative_texts: Vec<String>,
    pub quantitative_kpis: Vec<Value>,
}

impl AnalysisMaterial {
    pub fn is_empty(&self) -> bool {
        self.qualitative_texts.iter().all(|t| t.trim().is_empty())
            && self.quantitative_kpis.is_empty()
    }

    /// Qualitative texts joined into one document
    pub fn text_content(&self) -> String {
        self.qualitative_texts.join("\n\n---\n\n")
    }
}

fn open_text_block(column: &Value) -> Option<String> {
    if column.get("questionType").and_then(Value::as_str) != Some("openText") {
        return None;
    }
    let responses: Vec<&str> = column
        .get("openTextResponses")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let question = column
        .get("questionText")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(format!(
        "Pergunta: \"{}\"\nRespostas:\n- {}",
        question,
        responses.join("\n- ")
    ))
}

/// Gather texts and KPIs from every parent output
///
/// Reads `uploaded_files` (file `content`, open-text columns and
/// spreadsheet KPIs) and top-level `survey_kpis`. Outputs wrapped as
/// `{ "output": ... }` are unwrapped first.
pub fn collect_material(parent_outputs: &InputData) -> AnalysisMaterial {
    let mut material = AnalysisMaterial::default();

    for output in parent_outputs.values() {
        let output = output.get("output").unwrap_or(output);

        if let Some(files) = output.get("uploaded_files").and_then(Value::as_array) {
            for file in files {
                if let Some(content) = file.get("content").and_then(Value::as_str) {
                    let name = file.get("name").and_then(Value::as_str).unwrap_or_default();
                    material
                        .qualitative_texts
                        .push(format!("Fonte: {}\nConteúdo:\n{}", name, content));
                }
                if let Some(columns) = file.get("inferred_survey_columns").and_then(Value::as_array) {
                    material
                        .qualitative_texts
                        .extend(columns.iter().filter_map(open_text_block));
                }
                if let Some(kpis) = file
                    .get("structured_data")
                    .and_then(|s| s.get("quantitativeKPIs"))
                    .and_then(Value::as_array)
                {
                    material.quantitative_kpis.extend(kpis.iter().cloned());
                }
            }
        }

        if let Some(kpis) = output.get("survey_kpis").and_then(Value::as_array) {
            material.quantitative_kpis.extend(kpis.iter().cloned());
        }
    }
    material
}

/// Handler for `analysis` nodes
///
/// # Output
/// `{ "analysis_results": <analyzedData> }`
///
/// # Actions
/// - `runAnalysis`: re-runs the analysis over the node's current inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalysisHandler;

impl AnalysisHandler {
    pub const ACTION_RUN: &'static str = "runAnalysis";
    const ANALYSIS_PATH: &'static str = "/api/ai/runAnalysis";

    async fn analyze(
        &self,
        parent_outputs: &InputData,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        let material = collect_material(parent_outputs);
        if material.is_empty() {
            return Err(HandlerError::invalid(
                "Nenhum dado qualitativo ou quantitativo encontrado nos nós conectados para analisar.",
            ));
        }

        let body = json!({
            "textContent": material.text_content(),
            "kpiData": material.quantitative_kpis,
        });
        let response = fetcher
            .fetch(FetchRequest::post(Self::ANALYSIS_PATH, body))
            .await?;
        let insights = response
            .get("insights")
            .filter(|i| i.is_array())
            .cloned()
            .ok_or_else(|| HandlerError::invalid("A resposta da API de análise é inválida."))?;

        log::debug!(
            "Analysis over {} text block(s) and {} KPI(s) returned {} insight(s)",
            material.qualitative_texts.len(),
            material.quantitative_kpis.len(),
            insights.as_array().map(Vec::len).unwrap_or(0)
        );
        Ok(NodePatch::new().set(
            "analyzedData",
            json!({
                "insights": insights,
                "sourceKPIs": material.quantitative_kpis,
            }),
        ))
    }
}

#[async_trait]
impl NodeHandler for AnalysisHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Analysis
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(
            vec![
                ("label", json!("Análise de IA")),
                ("title", json!("Análise de IA")),
                (
                    "description",
                    json!("Extrai e categoriza dados de fontes conectadas."),
                ),
                ("analyzedData", json!({ "insights": [] })),
            ],
            fields,
        )
    }

    async fn generate_output(
        &self,
        node: &FlowNode,
        _fetcher: &dyn Fetcher,
    ) -> Result<Value, HandlerError> {
        Ok(json!({
            "analysis_results": node.data.field("analyzedData").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn process_input(
        &self,
        _data: &NodeData,
        parent_outputs: &InputData,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        self.analyze(parent_outputs, fetcher).await
    }

    async fn handle_action(
        &self,
        action: &str,
        _params: &Value,
        node: &FlowNode,
        fetcher: &dyn Fetcher,
    ) -> Result<NodePatch, HandlerError> {
        match action {
            Self::ACTION_RUN => {
                let inputs = node.data.input_data.clone().unwrap_or_default();
                self.analyze(&inputs, fetcher).await
            }
            other => Err(HandlerError::UnsupportedAction(other.to_string())),
        }
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::Analysis,
    handler: || Arc::new(AnalysisHandler),
});

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_engine::{CallbackFetcher, FetchError, NoopFetcher, Position};

    fn inputs() -> InputData {
        let mut inputs = InputData::new();
        inputs.insert(
            "data-1".into(),
            json!({ "uploaded_files": [{
                "name": "entrevista.txt",
                "content": "Clientes reclamam do prazo",
                "inferred_survey_columns": [{
                    "questionText": "Comentários",
                    "questionType": "openText",
                    "openTextResponses": ["Ótimo", "Lento"]
                }],
                "structured_data": { "quantitativeKPIs": [{ "metric": "NPS", "value": "8.8" }] }
            }]}),
        );
        inputs.insert("survey-1".into(), json!({ "survey_kpis": [{ "metric": "CSAT" }] }));
        inputs
    }

    #[test]
    fn test_collect_material() {
        let material = collect_material(&inputs());
        assert_eq!(material.qualitative_texts.len(), 2);
        assert!(material.qualitative_texts[0].starts_with("Fonte: entrevista.txt"));
        assert_eq!(
            material.qualitative_texts[1],
            "Pergunta: \"Comentários\"\nRespostas:\n- Ótimo\n- Lento"
        );
        assert_eq!(material.quantitative_kpis.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_inputs_fail() {
        let err = AnalysisHandler
            .process_input(&NodeData::default(), &InputData::new(), &NoopFetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_insights_are_stored_and_output() {
        let fetcher = CallbackFetcher::new(|req: FetchRequest| async move {
            let body = req.body.unwrap_or(Value::Null);
            assert!(body["textContent"].as_str().unwrap().contains("prazo"));
            Ok::<_, FetchError>(json!({ "insights": [{ "theme": "prazo" }] }))
        });

        let patch = AnalysisHandler
            .process_input(&NodeData::default(), &inputs(), &fetcher)
            .await
            .unwrap();
        let mut node = FlowNode::new("analysis-1", NodeKind::Analysis, Position::default());
        node.data.apply_patch(&patch).unwrap();

        let output = AnalysisHandler.generate_output(&node, &NoopFetcher).await.unwrap();
        assert_eq!(output["analysis_results"]["insights"][0]["theme"], "prazo");
        assert_eq!(output["analysis_results"]["sourceKPIs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_fails() {
        let fetcher = CallbackFetcher::new(|_req: FetchRequest| async move {
            Ok::<_, FetchError>(json!({ "insights": "nope" }))
        });
        let err = AnalysisHandler
            .process_input(&NodeData::default(), &inputs(), &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidData(_)));
    }
}
