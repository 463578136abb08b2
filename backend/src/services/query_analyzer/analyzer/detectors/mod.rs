//! Anti-pattern detectors
//!
//! Each detector is a stateless unit struct that scans raw SQL text (line by line,
//! plus whole-text passes for constructs that cross lines) and reads plan nodes to
//! price what it finds. A detector never fails: no match means no findings.

pub mod correlated_subquery;
pub mod heavy_aggregation;
pub mod late_filter;
pub mod missing_index;
pub mod non_sargable;
pub mod or_condition;

use regex::{Captures, Regex};

use crate::services::query_analyzer::models::{Bottleneck, IssueType, Severity};
use crate::services::query_analyzer::plan::{ExecutionPlan, PlanNode};
use crate::utils::SqlText;
use crate::utils::sql_text::is_comment_line;

// ============================================================================
// Detector Trait and Context
// ============================================================================

/// Inputs shared by every detector for one analysis pass
pub struct DetectionContext<'a> {
    pub sql: SqlText<'a>,
    pub plan: &'a ExecutionPlan,
}

impl<'a> DetectionContext<'a> {
    pub fn new(sql: &'a str, plan: &'a ExecutionPlan) -> Self {
        Self { sql: SqlText::new(sql), plan }
    }

    /// Numbered lines, skipping lines that only hold a `--` comment
    pub fn code_lines(&self) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        self.sql.lines().filter(|(_, line)| !is_comment_line(line))
    }

    /// First match of `regex` on line `number` that starts in code (not in a literal or comment)
    pub fn find_in_line<'t>(
        &self,
        regex: &Regex,
        number: usize,
        line: &'t str,
    ) -> Option<Captures<'t>> {
        let base = self.sql.line_start(number)?;
        regex
            .captures_iter(line)
            .find(|caps| caps.get(0).is_some_and(|m| self.sql.is_code(base + m.start())))
    }

    /// Every whole-text match of `regex` that starts in code
    pub fn find_in_text<'r>(&'r self, regex: &'r Regex) -> impl Iterator<Item = Captures<'a>> + 'r {
        let text = self.sql.as_str();
        regex
            .captures_iter(text)
            .filter(|caps| caps.get(0).is_some_and(|m| self.sql.is_code(m.start())))
    }

    pub fn first_expensive_scan(&self) -> Option<&'a PlanNode> {
        self.plan.nodes().iter().find(|node| node.is_scan_operation() && node.is_expensive())
    }

    pub fn first_expensive_join(&self) -> Option<&'a PlanNode> {
        self.plan.nodes().iter().find(|node| node.is_join_operation() && node.is_expensive())
    }

    /// Last aggregate-like operator in plan order; outer aggregates come last
    pub fn last_aggregate(&self) -> Option<&'a PlanNode> {
        self.plan.nodes().iter().rev().find(|node| node.is_aggregate_operation())
    }

    /// First non-scan operator that reports produced rows
    pub fn first_row_producer(&self) -> Option<&'a PlanNode> {
        self.plan.nodes().iter().find(|node| node.actual_rows > 0 && !node.is_scan_operation())
    }
}

/// Trait for anti-pattern detectors
pub trait Detector: Send + Sync {
    /// Detector ID (e.g., "D001")
    fn id(&self) -> &str;

    /// Detector name
    fn name(&self) -> &str;

    /// Issue family this detector reports
    fn issue_type(&self) -> IssueType;

    /// Scan the query and plan, returning findings in discovery order
    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck>;
}

// ============================================================================
// Shared Pricing
// ============================================================================

/// Price a predicate finding by the first expensive scan in the plan.
///
/// With a scan, cost and time come from the node and severity follows its share.
/// Without one, the finding is a WARNING carrying `fallback_cost` as an estimate.
pub(crate) fn priced_by_scan(
    context: &DetectionContext,
    bottleneck: Bottleneck,
    fallback_cost: f64,
) -> Bottleneck {
    match context.first_expensive_scan() {
        Some(scan) => bottleneck
            .attributed_to(scan)
            .with_severity(Severity::from_cost_percentage(scan.cost_percentage)),
        None => bottleneck.with_estimated_cost(fallback_cost).with_severity(Severity::Warning),
    }
}

/// Table named by the first expensive scan, or a placeholder for templates
pub(crate) fn scanned_table_or_placeholder(context: &DetectionContext) -> String {
    context
        .first_expensive_scan()
        .and_then(|scan| scan.object())
        .unwrap_or("table_name")
        .to_string()
}

/// `gd.posted_date` -> `posted_date`
pub(crate) fn bare_column(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

const RESERVED_ALIASES: &[&str] = &[
    "ON", "AS", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "USING",
    "GROUP", "ORDER", "HAVING", "UNION", "WITH", "SET", "AND", "OR", "SELECT", "FROM", "OPTION",
];

/// False for SQL keywords that a `table alias` regex can swallow
pub(crate) fn is_valid_alias(word: &str) -> bool {
    !RESERVED_ALIASES.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

// ============================================================================
// Detector Registry
// ============================================================================

/// Get all registered detectors, in reporting order
pub fn get_all_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(non_sargable::NonSargableDetector),
        Box::new(correlated_subquery::CorrelatedSubqueryDetector),
        Box::new(or_condition::OrConditionDetector),
        Box::new(late_filter::LateFilterDetector),
        Box::new(missing_index::MissingIndexAnalyzer),
        Box::new(heavy_aggregation::HeavyAggregationOptimizer),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::models::CostBasis;

    #[test]
    fn test_registry_ids_are_unique() {
        let detectors = get_all_detectors();
        assert_eq!(detectors.len(), 6);
        let mut ids: Vec<&str> = detectors.iter().map(|d| d.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_priced_by_scan_with_and_without_plan() {
        let empty = ExecutionPlan::new();
        let context = DetectionContext::new("SELECT 1", &empty);
        let b = priced_by_scan(
            &context,
            Bottleneck::new(IssueType::NonSargablePredicate, Severity::Info, "x"),
            50.0,
        );
        assert_eq!(b.severity, Severity::Warning);
        assert_eq!(b.cost_percentage, 50.0);
        assert_eq!(b.cost_basis, CostBasis::Heuristic);

        let mut plan = ExecutionPlan::from_nodes([
            PlanNode::new("Table Scan").with_object("dbo.T").with_actual_cost(15.0),
        ]);
        plan.calculate_cost_percentages(100.0);
        let context = DetectionContext::new("SELECT 1", &plan);
        let b = priced_by_scan(
            &context,
            Bottleneck::new(IssueType::NonSargablePredicate, Severity::Info, "x"),
            50.0,
        );
        assert_eq!(b.severity, Severity::Warning);
        assert_eq!(b.cost_basis, CostBasis::PlanNode);
        assert_eq!(scanned_table_or_placeholder(&context), "dbo.T");
    }

    #[test]
    fn test_find_in_line_skips_comments() {
        let plan = ExecutionPlan::new();
        let sql = "SELECT 1 -- YEAR(x) = 1\nWHERE YEAR(y) = 2";
        let context = DetectionContext::new(sql, &plan);
        let re = Regex::new(r"YEAR\((\w)\)").unwrap();
        assert!(context.find_in_line(&re, 1, context.sql.line(1).unwrap()).is_none());
        let caps = context.find_in_line(&re, 2, context.sql.line(2).unwrap()).unwrap();
        assert_eq!(&caps[1], "y");
        assert_eq!(context.find_in_text(&re).count(), 1);
    }

    #[test]
    fn test_alias_helpers() {
        assert!(is_valid_alias("gd"));
        assert!(!is_valid_alias("on"));
        assert!(!is_valid_alias("WHERE"));
        assert_eq!(bare_column("gd.posted_date"), "posted_date");
        assert_eq!(bare_column("amount"), "amount");
    }
}
