//! SQL Query Analyzer
//!
//! Detects performance anti-patterns in SQL text, prices them against the
//! query's execution plan and ranks the findings.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        analyze_query()                        │
//! │                              │                                │
//! │     SQL text ───────────────┐│┌─────────────── ExecutionPlan  │
//! │                             ▼▼▼                (loader.rs)    │
//! │                    ┌──────────────────┐                       │
//! │                    │  DetectorEngine  │                       │
//! │                    └──────────────────┘                       │
//! │                              │                                │
//! │   ┌──────────┬──────────┬────┴─────┬──────────┬──────────┐    │
//! │   ▼          ▼          ▼          ▼          ▼          ▼    │
//! │ NonSarg  Correlated  OrCond   LateFilter  MissingIdx  HeavyAgg│
//! │   └──────────┴──────────┴────┬─────┴──────────┴──────────┘    │
//! │                              ▼                                │
//! │             rank + summarize ─▶ AnalysisResult                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use querylens::services::query_analyzer::{analyze_query, load_plan_json};
//!
//! let plan = load_plan_json(plan_json)?;
//! let result = analyze_query("SELECT ... WHERE YEAR(gd.posted_date) = 2023", &plan);
//! for finding in &result.bottlenecks {
//!     println!("{} {}", finding.severity, finding.problem_description);
//! }
//! ```

pub mod analyzer;
pub mod loader;
pub mod models;
pub mod plan;


pub use analyzer::{DetectorEngine, DetectorEngineConfig};
pub use loader::{load_plan_file, load_plan_json};
pub use models::*;
pub use plan::{CostCategory, ExecutionPlan, PlanNode, PlanNodeId};

/// Analyze a query with the default engine configuration
///
/// The same (sql, plan) pair always yields the same ranked result.
pub fn analyze_query(sql: &str, plan: &ExecutionPlan) -> AnalysisResult {
    DetectorEngine::new().analyze(sql, plan)
}
