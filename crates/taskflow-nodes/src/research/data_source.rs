//! Data source node
//!
//! Holds the files a user attached to the project. Spreadsheet uploads carry
//! `structured_data` (sheets of columns with raw responses); the output
//! enriches each such file with per-column survey statistics so downstream
//! analysis does not need to re-parse them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use taskflow_engine::{
    Fetcher, FlowNode, HandlerError, HandlerRegistration, NodeData, NodeHandler, NodeKind,
};

use crate::fields::{array_field, seeded};

/// How a spreadsheet column is read as a survey question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionType {
    /// Numeric scale answers
    Rating,
    /// Answers drawn from a small set of options, possibly several per row
    MultipleChoice,
    /// Free text
    OpenText,
}

/// Statistics for one column of a spreadsheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredColumn {
    pub question_text: String,
    pub question_type: QuestionType,
    pub total_responses: usize,
    /// Count per answer, for rating and multiple choice columns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_text_responses: Option<Vec<String>>,
}

/// Summary metric derived from a rating column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub metric: String,
    /// Mean rounded to one decimal
    pub value: String,
    pub details: String,
}

/// A column as uploaded
#[derive(Debug, Clone, Deserialize)]
struct RawColumn {
    #[serde(default)]
    header: String,
    #[serde(default)]
    responses: Vec<Value>,
    #[serde(rename = "type", default)]
    declared: Option<QuestionType>,
}

/// Distinct answers at or below which an undeclared column is treated as
/// multiple choice
const MAX_CHOICES: usize = 8;

fn response_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Split a multi-select answer such as `"A: x., B: y"` into its options
///
/// A comma only separates options when the next option starts with an
/// uppercase letter, so commas inside an option's own text survive.
fn split_choices(answer: &str) -> Vec<String> {
    let mut choices: Vec<String> = Vec::new();
    for part in answer.split(", ") {
        let starts_option = part.chars().next().is_some_and(char::is_uppercase);
        match choices.last_mut() {
            Some(previous) if !starts_option => {
                previous.push_str(", ");
                previous.push_str(part);
            }
            _ => choices.push(part.to_string()),
        }
    }
    choices
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn infer_type(answers: &[String]) -> QuestionType {
    if !answers.is_empty() && answers.iter().all(|a| a.parse::<f64>().is_ok()) {
        return QuestionType::Rating;
    }
    let mut distinct: Vec<&String> = answers.iter().collect();
    distinct.sort();
    distinct.dedup();
    if distinct.len() <= MAX_CHOICES && distinct.len() < answers.len() {
        QuestionType::MultipleChoice
    } else {
        QuestionType::OpenText
    }
}

/// Statistics for one uploaded column
pub fn infer_column(header: &str, responses: &[Value], declared: Option<QuestionType>) -> InferredColumn {
    let answers: Vec<String> = responses.iter().filter_map(response_text).collect();
    let question_type = declared.unwrap_or_else(|| infer_type(&answers));

    let (distribution, open_text_responses) = match question_type {
        QuestionType::Rating => {
            let mut counts = BTreeMap::new();
            for answer in &answers {
                *counts.entry(answer.clone()).or_insert(0) += 1;
            }
            (Some(counts), None)
        }
        QuestionType::MultipleChoice => {
            let mut counts = BTreeMap::new();
            for answer in &answers {
                for choice in split_choices(answer) {
                    *counts.entry(choice).or_insert(0) += 1;
                }
            }
            (Some(counts), None)
        }
        QuestionType::OpenText => (None, Some(answers.clone())),
    };

    InferredColumn {
        question_text: header.to_string(),
        question_type,
        total_responses: answers.len(),
        distribution,
        open_text_responses,
    }
}

/// Mean of a rating column, if it has numeric answers
pub fn rating_kpi(column: &InferredColumn) -> Option<Kpi> {
    if column.question_type != QuestionType::Rating {
        return None;
    }
    let distribution = column.distribution.as_ref()?;
    let mut total = 0.0;
    let mut count = 0usize;
    for (answer, n) in distribution {
        if let Ok(value) = answer.parse::<f64>() {
            total += value * *n as f64;
            count += n;
        }
    }
    if count == 0 {
        return None;
    }
    let mean = ((total / count as f64) * 10.0).round() / 10.0;
    Some(Kpi {
        metric: column.question_text.clone(),
        value: format!("{:.1}", mean),
        details: format!("N={} respostas", count),
    })
}

/// Add inferred columns and KPIs to a spreadsheet upload
///
/// Anything that is not an object with `structured_data.sheets` is returned
/// unchanged.
pub fn enrich_source(source: &Value) -> Value {
    let Some(sheets) = source
        .get("structured_data")
        .and_then(|s| s.get("sheets"))
        .and_then(Value::as_array)
    else {
        return source.clone();
    };

    let mut columns = Vec::new();
    for sheet in sheets {
        let raw: Vec<RawColumn> = sheet
            .get("columns")
            .cloned()
            .and_then(|c| serde_json::from_value(c).ok())
            .unwrap_or_default();
        for column in raw {
            columns.push(infer_column(&column.header, &column.responses, column.declared));
        }
    }
    let kpis: Vec<Kpi> = columns.iter().filter_map(rating_kpi).collect();

    let mut enriched = source.clone();
    if let Some(obj) = enriched.as_object_mut() {
        obj.insert("inferred_survey_columns".into(), json!(columns));
        if let Some(structured) = obj.get_mut("structured_data").and_then(Value::as_object_mut) {
            structured.insert("quantitativeKPIs".into(), json!(kpis));
        }
    }
    enriched
}

/// Handler for `dataSource` nodes
///
/// # Output
/// `{ "uploaded_files": [...] }`: the node's `sources`, spreadsheets enriched
/// with `inferred_survey_columns` and `structured_data.quantitativeKPIs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataSourceHandler;

#[async_trait]
impl NodeHandler for DataSourceHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::DataSource
    }

    fn initialize_data(&self, fields: Map<String, Value>) -> NodeData {
        seeded(
            vec![
                ("label", json!("Fontes de dados")),
                ("title", json!("Dados do projeto")),
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
        let files: Vec<Value> = array_field(&node.data, "sources")
            .iter()
            .map(enrich_source)
            .collect();
        Ok(json!({ "uploaded_files": files }))
    }
}

inventory::submit!(HandlerRegistration {
    kind: NodeKind::DataSource,
    handler: || Arc::new(DataSourceHandler),
});
