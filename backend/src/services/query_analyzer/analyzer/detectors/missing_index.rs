//! Missing-index analysis
//!
//! Works from the plan side: every scan that costs at least 5% of the query is
//! traced back to its table alias in the SQL, and the alias' predicate and join
//! columns become the key of a suggested covering index.
//!
//! Key columns keep the order in which they first appear. The reduction estimate
//! is a fixed lookup by key count, not a selectivity measurement.

use regex::Regex;

use super::{DetectionContext, Detector, is_valid_alias};
use crate::services::query_analyzer::models::{Bottleneck, IssueType};
use crate::services::query_analyzer::plan::PlanNode;
use crate::utils::format::{format_count, format_count_f64, sanitize_identifier, short_object_name};

/// Scans below this share of total cost are not worth an index
const MIN_SCAN_COST_PERCENT: f64 = 5.0;
const MAX_INCLUDE_COLUMNS: usize = 6;
const MAX_INDEX_NAME_COLUMN_CHARS: usize = 30;

/// Columns that an index on the scanned table should carry
#[derive(Debug, Default, PartialEq)]
struct IndexColumns {
    aliases: Vec<String>,
    keys: Vec<String>,
    includes: Vec<String>,
    first_reference_line: Option<usize>,
}

/// D005: expensive scans that a covering index would turn into seeks
pub struct MissingIndexAnalyzer;

impl Detector for MissingIndexAnalyzer {
    fn id(&self) -> &str {
        "D005"
    }

    fn name(&self) -> &str {
        "missing_index"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::MissingIndex
    }

    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        context
            .plan
            .nodes()
            .iter()
            .filter(|node| node.is_scan_operation() && node.cost_percentage >= MIN_SCAN_COST_PERCENT)
            .filter_map(|node| {
                let table = node.object()?;
                let columns = collect_index_columns(context, table);
                Some(self.build_finding(node, table, &columns))
            })
            .collect()
    }
}

impl MissingIndexAnalyzer {
    fn build_finding(&self, node: &PlanNode, table: &str, columns: &IndexColumns) -> Bottleneck {
        let mut finding = Bottleneck::from_node(self.issue_type(), node)
            .with_problem(format!("Table/Index Scan on {}", table))
            .with_why(format!(
                "Scanning {} rows from {} instead of seeking through an index. This reads {} logical pages.",
                format_count(node.actual_rows),
                table,
                format_count(node.logical_reads)
            ));
        if finding.line_number.is_none()
            && let Some(line) = columns.first_reference_line
        {
            finding = finding.at_line(line);
        }

        if columns.keys.is_empty() {
            finding = finding
                .with_fix("Add index on filtered/joined columns")
                .with_fix("Capture the actual plan with SET STATISTICS IO ON to see which predicates drive the scan");
        } else {
            finding = finding
                .with_fix("Create a covering index on key columns")
                .with_fix("Include frequently selected columns to avoid key lookups");
            if columns.keys.len() > 1 {
                finding = finding.with_fix("Column order matters: most selective first, then equality, then range");
            }
            let statement = create_index_statement(table, columns);
            finding = finding.with_optimized_fragment(statement.clone()).with_fix_query(statement);
        }

        let reduction = match columns.keys.len() {
            0 => 50.0,
            1 => 80.0,
            2 => 95.0,
            _ => 98.0,
        };
        let remaining_rows = node.actual_rows as f64 * (1.0 - reduction / 100.0);
        finding.with_expected_improvement(format!(
            "~{:.0}% reduction in logical reads, seek instead of scan (estimated {} → {} rows)",
            reduction,
            format_count(node.actual_rows),
            format_count_f64(remaining_rows)
        ))
    }
}

fn collect_index_columns(context: &DetectionContext, table: &str) -> IndexColumns {
    let mut columns = IndexColumns::default();
    let short = short_object_name(table);
    let Ok(alias_re) =
        Regex::new(&format!(r"(?i)(?:^|[^\w]){}\s+(?:AS\s+)?(\w+)", regex::escape(short)))
    else {
        return columns;
    };

    for caps in alias_re.captures_iter(context.sql.as_str()) {
        let Some(alias) = caps.get(1) else { continue };
        if !context.sql.is_code(alias.start()) || !is_valid_alias(alias.as_str()) {
            continue;
        }
        if !columns.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias.as_str())) {
            columns.aliases.push(alias.as_str().to_string());
            columns.first_reference_line.get_or_insert(context.sql.line_of(alias.start()));
        }
    }

    for alias in &columns.aliases {
        let alias = regex::escape(alias);
        let patterns = [
            format!(r"(?i)\b{}\.(\w+)\b\s*(>=|<=|<>|!=|=|>|<|IN\b|BETWEEN\b)", alias),
            format!(r"(?i)\bON\s+[\w.]+\s*=\s*{}\.(\w+)\b", alias),
        ];
        for (idx, pattern) in patterns.iter().enumerate() {
            let Ok(re) = Regex::new(pattern) else { continue };
            for caps in re.captures_iter(context.sql.as_str()) {
                let (Some(whole), Some(column)) = (caps.get(0), caps.get(1)) else { continue };
                let negated = idx == 0 && matches!(caps.get(2).map(|m| m.as_str()), Some("<>" | "!="));
                if negated || !context.sql.is_code(whole.start()) {
                    continue;
                }
                push_unique(&mut columns.keys, column.as_str());
            }
        }
    }

    for alias in &columns.aliases {
        let Ok(re) = Regex::new(&format!(r"(?i)\b{}\.(\w+)", regex::escape(alias))) else {
            continue;
        };
        for caps in re.captures_iter(context.sql.as_str()) {
            let Some(column) = caps.get(1) else { continue };
            if columns.includes.len() >= MAX_INCLUDE_COLUMNS {
                break;
            }
            let is_key = columns.keys.iter().any(|k| k.eq_ignore_ascii_case(column.as_str()));
            if !is_key && context.sql.is_code(column.start()) {
                push_unique(&mut columns.includes, column.as_str());
            }
        }
    }

    columns
}

fn push_unique(columns: &mut Vec<String>, column: &str) {
    if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
        columns.push(column.to_string());
    }
}

fn create_index_statement(table: &str, columns: &IndexColumns) -> String {
    let joined: String = columns.keys.join("_").chars().take(MAX_INDEX_NAME_COLUMN_CHARS).collect();
    let name = format!("IX_{}_{}", sanitize_identifier(short_object_name(table)), joined);

    let mut statement = format!("CREATE INDEX {}\nON {} ({})", name, table, columns.keys.join(", "));
    if !columns.includes.is_empty() {
        statement.push_str(&format!("\nINCLUDE ({})", columns.includes.join(", ")));
    }
    statement.push(';');
    statement
}
