//! Research nodes
//!
//! The problem → data → analysis → report chain the canvas is built around.

mod analysis;
mod data_source;
mod problem;
mod report;
mod survey;

pub use analysis::{collect_material, AnalysisHandler, AnalysisMaterial};
pub use data_source::{
    enrich_source, infer_column, rating_kpi, DataSourceHandler, InferredColumn, Kpi, QuestionType,
};
pub use problem::{ProblemHandler, UNTITLED_PROBLEM};
pub use report::ReportHandler;
pub use survey::SurveyHandler;
