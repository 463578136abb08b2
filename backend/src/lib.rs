//! QueryLens Library
//!
//! Detects performance anti-patterns in SQL queries, prices each finding
//! against the query's execution plan and ranks them for remediation.

pub mod config;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::query_analyzer::{
    AnalysisResult, Bottleneck, DetectorEngine, DetectorEngineConfig, ExecutionPlan, IssueType,
    PlanNode, Severity, analyze_query, load_plan_file, load_plan_json,
};
pub use utils::{AnalyzerError, AnalyzerResult};
