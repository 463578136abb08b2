//! Heavy aggregation detection
//!
//! Line checks for STRING_AGG, COUNT(DISTINCT) and CASE-heavy aggregates, plus a
//! whole-text pass over every GROUP BY clause, which is free to span lines.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DetectionContext, Detector};
use crate::services::query_analyzer::models::{Bottleneck, IssueType, Severity};
use crate::utils::format::normalize_whitespace;

/// Share of the aggregate operator's cost attributed to STRING_AGG
const AGGREGATE_COST_SHARE: f64 = 0.6;
const STRING_AGG_COST: f64 = 5.0;
const COUNT_DISTINCT_COST: f64 = 3.0;
const MIN_CASE_EXPRESSIONS: usize = 3;
const MIN_GROUP_BY_COLUMNS: usize = 5;

static STRING_AGG_DISTINCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSTRING_AGG\s*\(\s*DISTINCT\s+([^,]+),").unwrap());
static STRING_AGG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSTRING_AGG\s*\(\s*([^,]+),").unwrap());
static COUNT_DISTINCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCOUNT\s*\(\s*DISTINCT\s+([^)]+)\)").unwrap());
static CASE_IN_AGGREGATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(COUNT|SUM)\s*\(\s*CASE\s+WHEN\b").unwrap());
static CASE_WHEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bCASE\s+WHEN\b").unwrap());
static GROUP_BY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());
/// Clauses that may follow GROUP BY
static CLAUSE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(HAVING|ORDER\s+BY|UNION|INTERSECT|EXCEPT|LIMIT|OFFSET|OPTION|FETCH|WINDOW|QUALIFY)\b")
        .unwrap()
});

/// D006: aggregation shapes that are CPU or memory heavy
pub struct HeavyAggregationOptimizer;

impl Detector for HeavyAggregationOptimizer {
    fn id(&self) -> &str {
        "D006"
    }

    fn name(&self) -> &str {
        "heavy_aggregation"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::HeavyAggregation
    }

    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        let mut findings = Vec::new();

        for (number, line) in context.code_lines() {
            let located = |severity: Severity, problem: String| {
                Bottleneck::new(self.issue_type(), severity, problem)
                    .at_line(number)
                    .spanning(number, number)
                    .with_fragment(line.trim())
            };

            if let Some(caps) = context.find_in_line(&STRING_AGG_DISTINCT, number, line) {
                let column = caps[1].trim();
                let finding = located(
                    Severity::Warning,
                    "STRING_AGG with DISTINCT on large result set".to_string(),
                )
                .with_why(
                    "STRING_AGG with DISTINCT must process and concatenate all values in memory. \
                     DISTINCT adds sorting/hashing overhead. For large groups, this can be CPU \
                     and memory intensive.",
                )
                .with_fix("Pre-aggregate DISTINCT values in a CTE")
                .with_fix("Then apply STRING_AGG to pre-deduplicated set")
                .with_optimized_fragment(format!(
                    "-- Pre-aggregate in CTE:\n\
                     WITH distinct_vals AS (\n\
                     \x20 SELECT DISTINCT\n\
                     \x20   group_key,\n\
                     \x20   {} AS value\n\
                     \x20 FROM table_name\n\
                     \x20 WHERE ...\n\
                     )\n\
                     SELECT\n\
                     \x20 group_key,\n\
                     \x20 STRING_AGG(value, ',') AS aggregated\n\
                     FROM distinct_vals\n\
                     GROUP BY group_key",
                    column
                ))
                .with_expected_improvement("20-40% faster for large aggregations");
                findings.push(priced_by_aggregate(context, finding));
            } else if context.find_in_line(&STRING_AGG, number, line).is_some() {
                let finding = located(Severity::Warning, "STRING_AGG on large result set".to_string())
                    .with_why(
                        "STRING_AGG must process and concatenate all values in memory. For large \
                         groups, this can be CPU and memory intensive.",
                    )
                    .with_fix("Consider if DISTINCT is needed in source data")
                    .with_fix("Or pre-filter to reduce rows before aggregation")
                    .with_expected_improvement("20-40% faster for large aggregations");
                findings.push(priced_by_aggregate(context, finding));
            }

            if context.find_in_line(&COUNT_DISTINCT, number, line).is_some() {
                findings.push(
                    located(
                        Severity::Info,
                        "COUNT(DISTINCT) may be expensive on high-cardinality columns".to_string(),
                    )
                    .with_estimated_cost(COUNT_DISTINCT_COST)
                    .with_why(
                        "COUNT(DISTINCT) requires sorting or hashing to find unique values, which \
                         can be expensive with millions of rows and high cardinality.",
                    )
                    .with_fix("Consider APPROX_COUNT_DISTINCT if an exact count isn't needed")
                    .with_fix("Or pre-aggregate in an indexed view if the query runs frequently"),
                );
            }

            if context.find_in_line(&CASE_IN_AGGREGATE, number, line).is_some() {
                let case_count = CASE_WHEN.find_iter(line).count();
                if case_count >= MIN_CASE_EXPRESSIONS {
                    findings.push(
                        located(Severity::Info, format!("{} CASE expressions in aggregation", case_count))
                            .with_estimated_cost(0.0)
                            .with_why(
                                "Multiple CASE evaluations in aggregates add CPU overhead. Each \
                                 CASE is evaluated for every row in the group.",
                            )
                            .with_fix("Consider using FILTER clause if supported")
                            .with_fix("Or pivot the data first in a CTE")
                            .with_fix("Or use conditional aggregation: SUM(column) instead of COUNT(CASE)"),
                    );
                }
            }
        }

        findings.extend(self.detect_wide_group_by(context));
        findings
    }
}

impl HeavyAggregationOptimizer {
    fn detect_wide_group_by(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        let mut findings = Vec::new();

        for caps in context.find_in_text(&GROUP_BY) {
            let Some(keyword) = caps.get(0) else { continue };
            let columns = group_by_columns(context, keyword.end());
            if columns.len() < MIN_GROUP_BY_COLUMNS {
                continue;
            }

            let line = context.sql.line_of(keyword.start());
            findings.push(
                Bottleneck::new(
                    self.issue_type(),
                    Severity::Info,
                    format!("GROUP BY with {} columns may have high cardinality", columns.len()),
                )
                .at_line(line)
                .spanning(line, line)
                .with_fragment(format!("GROUP BY {}", columns.join(", ")))
                .with_estimated_cost(0.0)
                .with_why(
                    "Large GROUP BY clauses create many groups, increasing memory usage and \
                     hash/sort operations.",
                )
                .with_fix("Review if all GROUP BY columns are necessary")
                .with_fix("Consider aggregating in stages with CTEs"),
            );
        }

        findings
    }
}

/// STRING_AGG findings take a share of the last aggregate operator, if any
fn priced_by_aggregate(context: &DetectionContext, finding: Bottleneck) -> Bottleneck {
    match context.last_aggregate() {
        Some(node) => finding.apportioned_from(node, AGGREGATE_COST_SHARE),
        None => finding.with_estimated_cost(STRING_AGG_COST),
    }
}

/// Top-level items of the GROUP BY list starting at byte `start`.
///
/// The list ends at the next clause keyword, a `;`, or a `)` closing an
/// enclosing subquery. Commas nested in function calls do not split items.
fn group_by_columns(context: &DetectionContext, start: usize) -> Vec<String> {
    let text = context.sql.as_str();
    let clause_end = CLAUSE_END
        .find_iter(&text[start..])
        .map(|m| start + m.start())
        .find(|&offset| context.sql.is_code(offset))
        .unwrap_or(text.len());

    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for (offset, ch) in text[start..clause_end].char_indices() {
        if context.sql.is_code(start + offset) {
            match ch {
                '(' => depth += 1,
                ')' if depth == 0 => break,
                ')' => depth -= 1,
                ';' => break,
                ',' if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                    continue;
                },
                _ => {},
            }
        }
        current.push(ch);
    }
    items.push(current);

    items
        .iter()
        .map(|item| normalize_whitespace(item))
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::models::CostBasis;
    use crate::services::query_analyzer::plan::{ExecutionPlan, PlanNode};

    fn detect(sql: &str, plan: &ExecutionPlan) -> Vec<Bottleneck> {
        HeavyAggregationOptimizer.detect(&DetectionContext::new(sql, plan))
    }

    #[test]
    fn test_string_agg_distinct_proposes_cte() {
        let sql = "SELECT d.id,\n  STRING_AGG(DISTINCT dd.business_unit, ', ') AS units\nFROM d";
        let findings = detect(sql, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);

        let b = &findings[0];
        assert_eq!(b.severity, Severity::Warning);
        assert_eq!(b.line_number, Some(2));
        assert_eq!(b.cost_percentage, STRING_AGG_COST);
        assert!(b.problem_description.contains("DISTINCT"));
        let rewrite = b.optimized_fragment.as_deref().unwrap();
        assert!(rewrite.contains("WITH distinct_vals AS"));
        assert!(rewrite.contains("dd.business_unit AS value"));
    }

    #[test]
    fn test_plain_string_agg_is_softer() {
        let findings = detect("SELECT STRING_AGG(name, ',') FROM t", &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].problem_description, "STRING_AGG on large result set");
        assert!(findings[0].optimized_fragment.is_none());
    }

    #[test]
    fn test_string_agg_takes_share_of_aggregate_node() {
        let mut plan = ExecutionPlan::from_nodes([
            PlanNode::new("SELECT").with_actual_cost(10_000.0),
            PlanNode::new("Hash Match (Aggregate)").with_actual_cost(2_000.0).with_elapsed_ms(2_000.0),
        ]);
        plan.calculate_cost_percentages(10_000.0);

        let b = &detect("SELECT STRING_AGG(DISTINCT x, ',') FROM t", &plan)[0];
        assert!((b.cost_percentage - 12.0).abs() < 1e-9);
        assert_eq!(b.time_impact_seconds, Some(1.2));
        assert_eq!(b.cost_basis, CostBasis::Heuristic);
        assert_eq!(b.related_node, Some(plan.nodes()[1].id));
    }

    #[test]
    fn test_string_agg_priced_by_last_aggregate_node() {
        let mut plan = ExecutionPlan::from_nodes([
            PlanNode::new("SELECT").with_actual_cost(10_000.0),
            PlanNode::new("Stream Aggregate").with_actual_cost(500.0).with_elapsed_ms(500.0),
            PlanNode::new("Hash Match (Aggregate)").with_actual_cost(4_000.0).with_elapsed_ms(4_000.0),
        ]);
        plan.calculate_cost_percentages(10_000.0);

        let b = &detect("SELECT STRING_AGG(DISTINCT x, ',') FROM t", &plan)[0];
        assert!((b.cost_percentage - 24.0).abs() < 1e-9);
        assert!((b.time_impact_seconds.unwrap() - 2.4).abs() < 1e-9);
        assert_eq!(b.related_node, Some(plan.nodes()[2].id));
    }

    #[test]
    fn test_count_distinct_is_info() {
        let findings = detect("SELECT COUNT(DISTINCT gd.donor_id) FROM gd", &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].cost_percentage, COUNT_DISTINCT_COST);
        assert!(findings[0].fixes[0].contains("APPROX_COUNT_DISTINCT"));
    }

    #[test]
    fn test_case_heavy_aggregate() {
        let three = "SELECT SUM(CASE WHEN a = 1 THEN 1 END), SUM(CASE WHEN a = 2 THEN 1 END), COUNT(CASE WHEN a = 3 THEN 1 END) FROM t";
        let findings = detect(three, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].problem_description, "3 CASE expressions in aggregation");
        assert_eq!(findings[0].cost_percentage, 0.0);

        let two = "SELECT SUM(CASE WHEN a = 1 THEN 1 END), SUM(CASE WHEN a = 2 THEN 1 END) FROM t";
        assert!(detect(two, &ExecutionPlan::new()).is_empty());
    }

    #[test]
    fn test_group_by_five_columns() {
        let findings = detect("SELECT a, b, c, d, e, COUNT(*)\nFROM t\nGROUP BY a,b,c,d,e", &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);

        let b = &findings[0];
        assert_eq!(b.issue_type, IssueType::HeavyAggregation);
        assert_eq!(b.severity, Severity::Info);
        assert_eq!(b.line_number, Some(3));
        assert!(b.problem_description.contains('5'));
        assert_eq!(b.query_fragment.as_deref(), Some("GROUP BY a, b, c, d, e"));
    }

    #[test]
    fn test_group_by_spanning_lines_stops_at_next_clause() {
        let sql = "SELECT 1\nFROM t\nGROUP BY\n  t.a,\n  t.b,\n  t.c,\n  t.d\nHAVING COUNT(*) > 1\nORDER BY t.a, t.b, t.c";
        assert!(detect(sql, &ExecutionPlan::new()).is_empty());

        let sql = "SELECT 1\nFROM t\nGROUP BY\n  t.a,\n  t.b,\n  t.c,\n  t.d,\n  t.e\nORDER BY t.a";
        let findings = detect(sql, &ExecutionPlan::new());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_number, Some(3));
    }

    #[test]
    fn test_group_by_nested_commas_and_subquery_end() {
        let sql = "SELECT * FROM (SELECT 1 FROM t GROUP BY COALESCE(a, b), CONVERT(date, c), d) x GROUP BY x.a";
        assert!(detect(sql, &ExecutionPlan::new()).is_empty());
    }

    #[test]
    fn test_commented_aggregates_are_ignored() {
        let sql = "-- STRING_AGG(DISTINCT x, ',')\nSELECT 1 /* COUNT(DISTINCT y) */ FROM t";
        assert!(detect(sql, &ExecutionPlan::new()).is_empty());
    }
}
