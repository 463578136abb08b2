//! JSON execution-plan loader
//!
//! Plans arrive as a nested document:
//!
//! ```text
//! { "total_cost": 68000,
//!   "root": { "operator_type": "SELECT", "actual_cost": 68000,
//!             "children": [ { "operator_type": "Table Scan", ... } ] } }
//! ```
//!
//! The tree is flattened pre-order into an [`ExecutionPlan`] arena and cost
//! percentages are derived once, here, before any detector sees the plan.

use serde::Deserialize;
use std::path::Path;

use super::plan::{ExecutionPlan, PlanNode, PlanNodeId};
use crate::utils::{AnalyzerError, AnalyzerResult};

#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    total_cost: Option<f64>,
    root: PlanNodeInput,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanNodeInput {
    operator_type: Option<String>,
    object_name: Option<String>,
    estimated_cost: f64,
    actual_cost: f64,
    estimated_rows: u64,
    actual_rows: u64,
    elapsed_time_ms: f64,
    cpu_time_ms: f64,
    logical_reads: u64,
    physical_reads: u64,
    start_line: Option<usize>,
    end_line: Option<usize>,
    query_fragment: Option<String>,
    children: Vec<PlanNodeInput>,
}

impl PlanNodeInput {
    fn to_node(&self, path: &str) -> AnalyzerResult<PlanNode> {
        let operator = self
            .operator_type
            .as_deref()
            .map(str::trim)
            .filter(|op| !op.is_empty())
            .ok_or_else(|| {
                AnalyzerError::invalid_plan(format!("node at {} has no operator_type", path))
            })?;

        let mut node = PlanNode::new(operator)
            .with_estimated_cost(self.estimated_cost)
            .with_actual_cost(self.actual_cost)
            .with_estimated_rows(self.estimated_rows)
            .with_actual_rows(self.actual_rows)
            .with_elapsed_ms(self.elapsed_time_ms)
            .with_cpu_ms(self.cpu_time_ms)
            .with_logical_reads(self.logical_reads)
            .with_physical_reads(self.physical_reads);
        if let Some(object) = &self.object_name {
            node = node.with_object(object.as_str());
        }
        if let Some(start) = self.start_line {
            node = node.with_lines(start, self.end_line);
        }
        if let Some(fragment) = &self.query_fragment {
            node = node.with_fragment(fragment.as_str());
        }
        Ok(node)
    }
}

/// Parse a JSON plan document into a plan with cost percentages computed.
///
/// Percentages are taken against `total_cost` when present, otherwise against
/// the root's actual cost. A zero total leaves every percentage at zero.
pub fn load_plan_json(json: &str) -> AnalyzerResult<ExecutionPlan> {
    let document: PlanDocument = serde_json::from_str(json)?;

    let mut plan = ExecutionPlan::new();
    let root = plan.add_node(document.root.to_node("root")?);
    append_children(&mut plan, root, &document.root, "root")?;

    let total = document.total_cost.unwrap_or(document.root.actual_cost);
    if !total.is_finite() || total < 0.0 {
        return Err(AnalyzerError::invalid_plan(format!("total cost {} is not a valid cost", total)));
    }
    plan.calculate_cost_percentages(total);

    tracing::debug!("Loaded execution plan with {} node(s), total cost {}", plan.len(), total);
    Ok(plan)
}

/// Read and parse a JSON plan file
pub fn load_plan_file(path: impl AsRef<Path>) -> AnalyzerResult<ExecutionPlan> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| AnalyzerError::io(path.display().to_string(), e))?;
    load_plan_json(&json)
}

fn append_children(
    plan: &mut ExecutionPlan,
    parent: PlanNodeId,
    input: &PlanNodeInput,
    path: &str,
) -> AnalyzerResult<()> {
    for (idx, child) in input.children.iter().enumerate() {
        let child_path = format!("{}.children[{}]", path, idx);
        let id = plan.add_child(parent, child.to_node(&child_path)?)?;
        append_children(plan, id, child, &child_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::plan::CostCategory;

    const GIVING_PLAN: &str = r#"{
        "total_cost": 68000,
        "root": {
            "operator_type": "SELECT",
            "actual_cost": 68000,
            "elapsed_time_ms": 68000,
            "children": [
                {
                    "operator_type": "Hash Match (Inner Join)",
                    "actual_cost": 12000,
                    "children": [
                        {
                            "operator_type": "Table Scan",
                            "object_name": "SFDC.dbo.GIVING_DETAIL",
                            "actual_cost": 49000,
                            "actual_rows": 18200000,
                            "elapsed_time_ms": 49000,
                            "logical_reads": 2500000,
                            "start_line": 12,
                            "end_line": 14
                        },
                        { "operator_type": "Index Seek", "object_name": "IX_DONOR", "actual_cost": 500 }
                    ]
                },
                { "operator_type": "Sort", "actual_cost": 1500 }
            ]
        }
    }"#;

    #[test]
    fn test_load_flattens_pre_order() {
        let plan = load_plan_json(GIVING_PLAN).unwrap();
        let operators: Vec<&str> = plan.nodes().iter().map(|n| n.operator_type.as_str()).collect();
        assert_eq!(
            operators,
            vec!["SELECT", "Hash Match (Inner Join)", "Table Scan", "Index Seek", "Sort"]
        );

        let scan = &plan.nodes()[2];
        assert_eq!(plan.parent(scan.id).map(|p| p.operator_type.as_str()), Some("Hash Match (Inner Join)"));
        assert_eq!(scan.start_line, Some(12));
        assert_eq!(scan.end_line, Some(14));
        assert_eq!(plan.root().map(|r| r.id), Some(PlanNodeId(0)));
        assert_eq!(plan.descendants(PlanNodeId(0)).count(), 4);
    }

    #[test]
    fn test_load_computes_percentages() {
        let plan = load_plan_json(GIVING_PLAN).unwrap();
        let scan = &plan.nodes()[2];
        assert!((scan.cost_percentage - 72.058_823_529).abs() < 1e-6);
        assert_eq!(scan.cost_category, Some(CostCategory::Critical));
        assert_eq!(plan.nodes()[4].cost_category, Some(CostCategory::Ok));
    }

    #[test]
    fn test_total_defaults_to_root_cost() {
        let plan = load_plan_json(
            r#"{"root": {"operator_type": "SELECT", "actual_cost": 200,
                "children": [{"operator_type": "Index Scan", "actual_cost": 30}]}}"#,
        )
        .unwrap();
        assert_eq!(plan.nodes()[1].cost_percentage, 15.0);
    }

    #[test]
    fn test_missing_operator_is_rejected() {
        let err = load_plan_json(r#"{"root": {"operator_type": "SELECT", "children": [{"actual_cost": 1}]}}"#)
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidPlan(_)));
        assert!(err.to_string().contains("root.children[0]"));

        let err = load_plan_json(r#"{"root": {"operator_type": "  "}}"#).unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidPlan(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = load_plan_json("{ not json").unwrap_err();
        assert!(matches!(err, AnalyzerError::Json(_)));
        assert_eq!(err.error_code(), 2002);
    }

    #[test]
    fn test_missing_file() {
        let err = load_plan_file("/nonexistent/plan.json").unwrap_err();
        assert!(matches!(err, AnalyzerError::Io { .. }));
    }
}
