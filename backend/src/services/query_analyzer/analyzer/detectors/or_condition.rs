//! OR-condition detection
//!
//! An OR across two different columns cannot be answered by one index seek.
//! `COALESCE(a, b) = x` in a WHERE clause is the same predicate in disguise
//! (`a = x OR (a IS NULL AND b = x)`) and is by far the most common production
//! scan cause, so it is always reported as critical.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DetectionContext, Detector, bare_column, priced_by_scan, scanned_table_or_placeholder};
use crate::services::query_analyzer::models::{Bottleneck, CostBasis, IssueType, Severity};
use crate::utils::format::{normalize_whitespace, sanitize_identifier, take_chars};

const SIMPLE_OR_FALLBACK_COST: f64 = 15.0;
const NESTED_OR_COST: f64 = 10.0;
const COALESCE_FALLBACK_COST: f64 = 25.0;
/// Characters of trailing context kept after a COALESCE match
const COALESCE_CONTEXT_CHARS: usize = 50;

static SIMPLE_OR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\(\s*([\w.]+)\s*=\s*[^)]+\s+OR\s+([\w.]+)\s*=\s*[^)]+\)").unwrap()
});
static NESTED_OR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\([^()]+\s+OR\s+\([^)]+\)\)").unwrap());
static WHERE_COALESCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)\bWHERE\b.*?\b(COALESCE)\s*\(\s*([\w.]+)\s*,\s*([\w.]+)\s*\)\s*=\s*([@:]?[\w.]+)?",
    )
    .unwrap()
});

/// D003: OR predicates and COALESCE equalities that defeat index seeks
pub struct OrConditionDetector;

impl Detector for OrConditionDetector {
    fn id(&self) -> &str {
        "D003"
    }

    fn name(&self) -> &str {
        "or_condition"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::OrCondition
    }

    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        let mut findings = Vec::new();

        for (number, line) in context.code_lines() {
            let located = |problem: String| {
                Bottleneck::new(self.issue_type(), Severity::Warning, problem)
                    .at_line(number)
                    .spanning(number, number)
                    .with_fragment(line.trim())
            };

            if let Some(caps) = context.find_in_line(&SIMPLE_OR, number, line) {
                let (first, second) = (&caps[1], &caps[2]);
                let finding = located(format!(
                    "OR condition on '{}' and '{}' prevents index seek",
                    first, second
                ))
                .with_why(
                    "An OR across two different columns cannot be satisfied by a single index seek, \
                     so the optimizer falls back to scanning and testing every row.",
                )
                .with_fix("Split OR condition into UNION ALL")
                .with_fix("Each branch can use its respective index")
                .with_fix(format!(
                    "Add '{} IS NULL' to the second branch so no row is counted twice",
                    first
                ))
                .with_optimized_fragment(format!(
                    "SELECT ... WHERE {first} = @value1\n\
                     UNION ALL\n\
                     SELECT ... WHERE {second} = @value2 AND {first} IS NULL",
                    first = first,
                    second = second
                ))
                .with_expected_improvement("Two index seeks instead of one full scan");
                findings.push(priced_by_scan(context, finding, SIMPLE_OR_FALLBACK_COST));
            }

            if context.find_in_line(&NESTED_OR, number, line).is_some() {
                findings.push(
                    located("Nested OR condition prevents efficient index usage".to_string())
                        .with_estimated_cost(NESTED_OR_COST)
                        .with_why(
                            "Mixed AND/OR groups force the optimizer to evaluate the whole \
                             expression per row instead of seeking on any single column.",
                        )
                        .with_fix("Consider breaking into UNION ALL branches")
                        .with_fix("Or restructure logic to use IN clauses where possible"),
                );
            }
        }

        if let Some(finding) = self.detect_where_coalesce(context) {
            findings.push(finding);
        }

        findings
    }
}

impl OrConditionDetector {
    fn detect_where_coalesce(&self, context: &DetectionContext) -> Option<Bottleneck> {
        let text = context.sql.as_str();
        let caps = WHERE_COALESCE
            .captures_iter(text)
            .find(|caps| caps.get(1).is_some_and(|m| context.sql.is_code(m.start())))?;

        let keyword = caps.get(1)?;
        let whole = caps.get(0)?;
        let (first, second) = (&caps[2], &caps[3]);
        let value = caps
            .get(4)
            .filter(|m| !text[m.end()..].trim_start().starts_with('('))
            .map(|m| m.as_str())
            .unwrap_or("@value");

        let line = context.sql.line_of(keyword.start());
        let matched_chars = text[keyword.start()..whole.end()].chars().count();
        let fragment = normalize_whitespace(take_chars(
            text,
            keyword.start(),
            matched_chars + COALESCE_CONTEXT_CHARS,
        ));

        let table = scanned_table_or_placeholder(context);
        let short_table = sanitize_identifier(table.rsplit('.').next().unwrap_or(&table));
        let (first_col, second_col) = (bare_column(first), bare_column(second));

        let finding = Bottleneck::new(
            self.issue_type(),
            Severity::Critical,
            format!("COALESCE({}, {}) in WHERE clause forces a full scan", first, second),
        )
        .at_line(line)
        .spanning(line, line)
        .with_fragment(fragment)
        .with_why(format!(
            "The predicate behaves like '{a} = x OR ({a} IS NULL AND {b} = x)'. Neither column's \
             index can be seeked through the function, so every row is read and evaluated.",
            a = first,
            b = second
        ))
        .with_fix("Split COALESCE into two index-seekable branches")
        .with_fix(format!("First branch: seek on '{}'", first))
        .with_fix(format!("Second branch: seek on '{}' where {} IS NULL", second, first))
        .with_fix_query(format!(
            "CREATE INDEX IX_{t}_{c} ON {table} ({c});",
            t = short_table,
            c = first_col,
            table = table
        ))
        .with_fix_query(format!(
            "CREATE INDEX IX_{t}_{c} ON {table} ({c});",
            t = short_table,
            c = second_col,
            table = table
        ))
        .with_optimized_fragment(format!(
            "WITH by_{a} AS (\n\
             \x20 SELECT ... FROM ... WHERE {first} = {value}\n\
             ),\n\
             by_{b} AS (\n\
             \x20 SELECT ... FROM ... WHERE {second} = {value} AND {first} IS NULL\n\
             )\n\
             SELECT * FROM by_{a}\n\
             UNION ALL\n\
             SELECT * FROM by_{b};",
            a = sanitize_identifier(first_col),
            b = sanitize_identifier(second_col),
            first = first,
            second = second,
            value = value
        ))
        .with_expected_improvement("Converts one full scan into two index seeks, typically 10-20x faster");

        // Severity is fixed for this shape, so the borrowed scan share is only an estimate.
        let mut finding = priced_by_scan(context, finding, COALESCE_FALLBACK_COST)
            .with_severity(Severity::Critical);
        finding.cost_basis = CostBasis::Heuristic;
        Some(finding)
    }
}
