//! Late dimension-filter detection
//!
//! Tracks every `JOIN table alias` and then looks for WHERE/AND predicates that
//! filter one of those aliases on a low-cardinality dimension column. Such a filter
//! runs after the join has already processed every row of the joined table.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DetectionContext, Detector, is_valid_alias};
use crate::services::query_analyzer::models::{Bottleneck, IssueType, Severity};

/// Share of the join node's cost attributed to the late filter
const JOIN_COST_SHARE: f64 = 0.5;
const FALLBACK_COST_PERCENT: f64 = 8.0;

const DIMENSION_COLUMNS: &[&str] =
    &["business_unit", "department", "category", "status", "type", "region", "division"];

static JOIN_TABLE_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bJOIN\s+([\w.\[\]]+)\s+(?:AS\s+)?(\w+)").unwrap()
});

struct JoinedTable {
    table: String,
    alias: String,
    line: usize,
    /// Per-column `alias.column = value` matchers
    filters: Vec<(&'static str, Regex)>,
}

impl JoinedTable {
    fn new(table: &str, alias: &str, line: usize) -> Self {
        let filters = DIMENSION_COLUMNS
            .iter()
            .filter_map(|column| {
                let pattern = format!(
                    r"(?i)\b{}\.{}\s*=\s*('[^']*'|[@:]?[\w.]+)?",
                    regex::escape(alias),
                    column
                );
                Regex::new(&pattern).ok().map(|re| (*column, re))
            })
            .collect();
        Self { table: table.to_string(), alias: alias.to_string(), line, filters }
    }
}

/// D004: dimension filters applied after the join instead of before it
pub struct LateFilterDetector;

impl Detector for LateFilterDetector {
    fn id(&self) -> &str {
        "D004"
    }

    fn name(&self) -> &str {
        "late_filter"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::LateFilter
    }

    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        let mut findings = Vec::new();
        let mut joined: Vec<JoinedTable> = Vec::new();
        let mut in_join_section = false;

        for (number, line) in context.code_lines() {
            let upper = line.trim().to_uppercase();

            if upper.contains("JOIN ") {
                in_join_section = true;
                if let Some(caps) = context.find_in_line(&JOIN_TABLE_ALIAS, number, line)
                    && is_valid_alias(&caps[2])
                {
                    let alias = &caps[2];
                    // A re-used alias refers to the latest join.
                    joined.retain(|j| !j.alias.eq_ignore_ascii_case(alias));
                    joined.push(JoinedTable::new(&caps[1], alias, number));
                }
            }

            let is_filter_line =
                upper.starts_with("WHERE") || (in_join_section && upper.contains("AND "));
            if !is_filter_line {
                continue;
            }

            for join in &joined {
                for (column, filter) in &join.filters {
                    if let Some(caps) = context.find_in_line(filter, number, line) {
                        let value = caps.get(1).map(|m| m.as_str()).unwrap_or("@value");
                        findings.push(self.build_finding(context, join, column, value, number, line));
                    }
                }
            }
        }

        findings
    }
}

impl LateFilterDetector {
    fn build_finding(
        &self,
        context: &DetectionContext,
        join: &JoinedTable,
        column: &str,
        value: &str,
        line_number: usize,
        line: &str,
    ) -> Bottleneck {
        let finding = Bottleneck::new(
            self.issue_type(),
            Severity::Warning,
            format!("Filter on {}.{} is applied after the join", join.alias, column),
        )
        .at_line(line_number)
        .spanning(join.line, line_number)
        .with_fragment(line.trim())
        .with_why(format!(
            "'{}' is joined at line {} but only filtered at line {}. The join processes every \
             row of {} and most of them are discarded afterwards.",
            join.alias, join.line, line_number, join.table
        ))
        .with_fix(format!("Move {} filter into a CTE", column))
        .with_fix("Filter dimension table BEFORE joining to fact table")
        .with_fix("This reduces row count early in execution")
        .with_optimized_fragment(format!(
            "WITH filtered_{alias} AS (\n\
             \x20 SELECT *\n\
             \x20 FROM {table}\n\
             \x20 WHERE {column} = {value}\n\
             )\n\
             -- then: JOIN filtered_{alias} {alias} ON ...",
            alias = join.alias,
            table = join.table,
            column = column,
            value = value
        ))
        .with_expected_improvement(
            "20-40% reduction in rows processed, faster hash/merge join operations",
        );

        match context.first_expensive_join() {
            Some(node) => finding.apportioned_from(node, JOIN_COST_SHARE),
            None => finding.with_estimated_cost(FALLBACK_COST_PERCENT),
        }
    }
}
