//! Correlated scalar-aggregate subquery detection
//!
//! Finds `(SELECT MAX(...) FROM ...)` style subqueries in the select list or in
//! predicates, which the engine re-evaluates once per outer row. The balanced span
//! of the subquery may cross any number of lines.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DetectionContext, Detector};
use crate::services::query_analyzer::models::{Bottleneck, IssueType, Severity};
use crate::utils::format::{format_count, truncate_fragment};

/// Assumed outer row count when the plan reports none
const DEFAULT_EXECUTION_COUNT: u64 = 10_000;
const MAX_FRAGMENT_CHARS: usize = 200;

static SUBQUERY_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(\s*SELECT\b").unwrap());
static AGGREGATE_SUBQUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\(\s*SELECT\s+(?:TOP\s+\d+\s+)?((MAX|MIN|COUNT|SUM|AVG)\s*\([^)]+\))\s+(?:AS\s+\w+\s+)?FROM\b",
    )
    .unwrap()
});
/// Derived tables and IN/EXISTS lists start on these lines
static EXCLUDED_LINE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(FROM|WHERE)\b").unwrap());

/// D002: aggregate subquery evaluated per outer row
pub struct CorrelatedSubqueryDetector;

impl Detector for CorrelatedSubqueryDetector {
    fn id(&self) -> &str {
        "D002"
    }

    fn name(&self) -> &str {
        "correlated_subquery"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::CorrelatedSubquery
    }

    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        let text = context.sql.as_str();
        let mut findings = Vec::new();
        let mut search_from = 0;

        while let Some(open) = SUBQUERY_OPEN.find_at(text, search_from) {
            search_from = open.end();
            if !context.sql.is_code(open.start()) {
                continue;
            }

            let start_line = context.sql.line_of(open.start());
            let line_text = context.sql.line(start_line).unwrap_or_default().trim_start();
            if EXCLUDED_LINE_START.is_match(line_text) {
                continue;
            }

            // An unbalanced subquery runs to the end of the text.
            let close = context.sql.matching_paren(open.start());
            let span_end = close.map(|idx| idx + 1).unwrap_or(text.len());
            let span = &text[open.start()..span_end];

            let Some(caps) = AGGREGATE_SUBQUERY.captures(span) else {
                continue;
            };
            let end_line = match close {
                Some(idx) => context.sql.line_of(idx),
                None => context.sql.line_count(),
            };

            findings.push(self.build_finding(
                context,
                &caps[2].to_uppercase(),
                &caps[1],
                span,
                start_line,
                end_line,
            ));

            // Nested subqueries belong to this finding.
            search_from = span_end;
        }

        findings
    }
}

impl CorrelatedSubqueryDetector {
    fn build_finding(
        &self,
        context: &DetectionContext,
        function: &str,
        aggregate: &str,
        span: &str,
        start_line: usize,
        end_line: usize,
    ) -> Bottleneck {
        let executions = context
            .first_row_producer()
            .map(|node| node.actual_rows)
            .unwrap_or(DEFAULT_EXECUTION_COUNT);
        let (severity, cost) = match executions {
            n if n > 10_000 => (Severity::Critical, 20.0),
            n if n > 1_000 => (Severity::Warning, 10.0),
            _ => (Severity::Info, 5.0),
        };
        let executions_text = format_count(executions);

        Bottleneck::new(
            self.issue_type(),
            severity,
            format!("Correlated subquery with {}() executes once per row", function),
        )
        .at_line(start_line)
        .spanning(start_line, end_line)
        .with_fragment(truncate_fragment(span.trim(), MAX_FRAGMENT_CHARS))
        .with_estimated_cost(cost)
        .with_execution_count(executions)
        .with_why(format!(
            "This subquery runs {} times (once for each row in the outer query). Each execution \
             repeats the lookup and the aggregation instead of processing the data in a single pass.",
            executions_text
        ))
        .with_fix("Move the aggregate to the main query's GROUP BY")
        .with_fix("Or use a LEFT JOIN with pre-aggregated CTE")
        .with_fix("This allows single-pass processing with parallelism")
        .with_optimized_fragment(format!(
            "-- Option 1: aggregate in the outer query\n\
             SELECT outer_key, {agg} AS agg_value\n\
             FROM ...\n\
             GROUP BY outer_key;\n\
             \n\
             -- Option 2: pre-aggregate once, then LEFT JOIN\n\
             WITH pre_agg AS (\n\
             \x20 SELECT join_key, {agg} AS agg_value\n\
             \x20 FROM ...\n\
             \x20 GROUP BY join_key\n\
             )\n\
             SELECT o.*, pre_agg.agg_value\n\
             FROM outer_table o\n\
             LEFT JOIN pre_agg ON pre_agg.join_key = o.join_key;",
            agg = aggregate
        ))
        .with_expected_improvement(format!(
            "Eliminates {} subquery executions, typically 50-90% faster",
            executions_text
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::models::CostBasis;
    use crate::services::query_analyzer::plan::{ExecutionPlan, PlanNode};

    const SELECT_LIST_SUBQUERY: &str = "SELECT\n\
        \x20 d.descr AS donor_name,\n\
        \x20 (SELECT MAX(gd2.posted_date)\n\
        \x20    FROM SFDC.dbo.GIVING_DETAIL gd2\n\
        \x20    WHERE COALESCE(gd2.account, gd2.contact) = COALESCE(gd.account, gd.contact)\n\
        \x20      AND gd2.isdeleted = 'false'\n\
        \x20 ) AS last_gift_date\n\
        FROM SFDC.dbo.GIVING_DETAIL gd";

    fn detect(sql: &str, plan: &ExecutionPlan) -> Vec<Bottleneck> {
        CorrelatedSubqueryDetector.detect(&DetectionContext::new(sql, plan))
    }

    #[test]
    fn test_multiline_span_is_one_finding() {
        let findings = detect(SELECT_LIST_SUBQUERY, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);

        let b = &findings[0];
        assert_eq!(b.issue_type, IssueType::CorrelatedSubquery);
        assert_eq!(b.start_line, Some(3));
        assert_eq!(b.end_line, Some(7));
        assert_eq!(b.line_number, Some(3));
        assert!(b.query_fragment.as_deref().unwrap().starts_with("(SELECT MAX"));
        assert!(b.problem_description.contains("MAX()"));
        assert!(b.optimized_fragment.as_deref().unwrap().contains("MAX(gd2.posted_date)"));
    }

    #[test]
    fn test_default_execution_count_is_warning() {
        let findings = detect(SELECT_LIST_SUBQUERY, &ExecutionPlan::new());
        let b = &findings[0];
        assert_eq!(b.execution_count, Some(DEFAULT_EXECUTION_COUNT));
        assert_eq!(b.severity, Severity::Warning);
        assert_eq!(b.cost_percentage, 10.0);
        assert_eq!(b.cost_basis, CostBasis::Heuristic);
    }

    #[test]
    fn test_execution_count_thresholds() {
        for (rows, severity, cost) in [
            (45_000, Severity::Critical, 20.0),
            (10_000, Severity::Warning, 10.0),
            (1_001, Severity::Warning, 10.0),
            (1_000, Severity::Info, 5.0),
        ] {
            let plan = ExecutionPlan::from_nodes([
                PlanNode::new("Table Scan").with_actual_rows(18_000_000),
                PlanNode::new("Nested Loops").with_actual_rows(rows),
            ]);
            let b = &detect(SELECT_LIST_SUBQUERY, &plan)[0];
            assert_eq!(b.execution_count, Some(rows), "rows {}", rows);
            assert_eq!(b.severity, severity, "rows {}", rows);
            assert_eq!(b.cost_percentage, cost, "rows {}", rows);
        }
    }

    #[test]
    fn test_paren_on_its_own_line() {
        let sql = "SELECT\n  (\n    SELECT COUNT(*)\n    FROM orders o2\n    WHERE o2.cid = c.id\n  ) AS n\nFROM customers c";
        let findings = detect(sql, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].start_line, Some(2));
        assert_eq!(findings[0].end_line, Some(6));
        assert!(findings[0].problem_description.contains("COUNT()"));
    }

    #[test]
    fn test_derived_tables_and_non_aggregates_are_ignored() {
        let plan = ExecutionPlan::new();
        assert!(detect("SELECT *\nFROM (SELECT MAX(x) FROM t) m", &plan).is_empty());
        assert!(detect("SELECT *\nFROM t\nWHERE t.id IN (SELECT MAX(id) FROM u)", &plan).is_empty());
        assert!(detect("SELECT (SELECT name FROM u WHERE u.id = t.uid) FROM t", &plan).is_empty());
    }

    #[test]
    fn test_parens_in_literals_do_not_end_span() {
        let sql = "SELECT (SELECT MAX(p.amount)\n  FROM payments p\n  WHERE p.memo <> ')'\n) AS top_payment\nFROM t";
        let findings = detect(sql, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].end_line, Some(4));
    }

    #[test]
    fn test_unbalanced_subquery_runs_to_end() {
        let sql = "SELECT (SELECT SUM(x.v)\nFROM x\nWHERE x.k = t.k";
        let findings = detect(sql, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].end_line, Some(3));
    }

    #[test]
    fn test_long_fragment_is_truncated() {
        let filler = "  AND p.flag = 1\n".repeat(30);
        let sql = format!("SELECT (SELECT AVG(p.v)\nFROM p\nWHERE p.k = t.k\n{}) AS a\nFROM t", filler);
        let b = &detect(&sql, &ExecutionPlan::new())[0];
        let fragment = b.query_fragment.as_deref().unwrap();
        assert!(fragment.ends_with("..."));
        assert_eq!(fragment.chars().count(), MAX_FRAGMENT_CHARS + 3);
    }
}
