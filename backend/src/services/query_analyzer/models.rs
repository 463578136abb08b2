//! Finding and result types produced by the detectors and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::plan::{CRITICAL_COST_PERCENT, PlanNode, PlanNodeId, WARNING_COST_PERCENT};
use crate::utils::format::format_percent;

/// Upper bound for the summed improvement estimate of one analysis
pub const MAX_POTENTIAL_IMPROVEMENT_PERCENT: f64 = 95.0;

// ============================================================================
// Severity
// ============================================================================

/// Finding severity. Declaration order is ranking order: `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn from_cost_percentage(percentage: f64) -> Self {
        if percentage >= CRITICAL_COST_PERCENT {
            Severity::Critical
        } else if percentage >= WARNING_COST_PERCENT {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
        }
    }

    /// True when `self` is at least as severe as `threshold`
    pub fn meets(self, threshold: Severity) -> bool {
        self <= threshold
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "warning" | "warn" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity '{}' (expected critical, warning or info)", other)),
        }
    }
}

// ============================================================================
// Issue Type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    NonSargablePredicate,
    CorrelatedSubquery,
    OrCondition,
    LateFilter,
    MissingIndex,
    HeavyAggregation,
    /// Reserved, no detector emits it yet
    ExpensiveJoin,
    /// Reserved, no detector emits it yet
    CartesianProduct,
}

impl IssueType {
    pub fn description(&self) -> &'static str {
        match self {
            IssueType::NonSargablePredicate => "Non-SARGABLE Predicate",
            IssueType::CorrelatedSubquery => "Correlated Subquery",
            IssueType::OrCondition => "OR Condition Blocking Index",
            IssueType::LateFilter => "Late Filter Application",
            IssueType::MissingIndex => "Missing Index",
            IssueType::HeavyAggregation => "Heavy Aggregation",
            IssueType::ExpensiveJoin => "Expensive JOIN Operation",
            IssueType::CartesianProduct => "Cartesian Product",
        }
    }
}

/// Where a finding's `cost_percentage` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostBasis {
    /// Copied verbatim from a plan node's measured share
    PlanNode,
    /// Detector estimate: a fixed constant or a fraction of some node's share
    Heuristic,
}

// ============================================================================
// Bottleneck
// ============================================================================

/// One detected performance issue with its location, cost and remediation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub severity: Severity,
    pub issue_type: IssueType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_fragment: Option<String>,

    pub cost_percentage: f64,
    pub cost_basis: CostBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_impact_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u64>,

    pub problem_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_its_slow: Option<String>,
    pub fixes: Vec<String>,
    pub fix_queries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_fragment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_improvement: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_node: Option<PlanNodeId>,
}

impl Bottleneck {
    pub fn new(issue_type: IssueType, severity: Severity, problem: impl Into<String>) -> Self {
        Self {
            severity,
            issue_type,
            line_number: None,
            start_line: None,
            end_line: None,
            query_fragment: None,
            cost_percentage: 0.0,
            cost_basis: CostBasis::Heuristic,
            time_impact_seconds: None,
            operator_name: None,
            execution_count: None,
            problem_description: problem.into(),
            why_its_slow: None,
            fixes: Vec::new(),
            fix_queries: Vec::new(),
            optimized_fragment: None,
            expected_improvement: None,
            related_node: None,
        }
    }

    /// Finding located and priced entirely from a plan node
    pub fn from_node(issue_type: IssueType, node: &PlanNode) -> Self {
        let mut bottleneck =
            Self::new(issue_type, Severity::from_cost_percentage(node.cost_percentage), "")
                .attributed_to(node);
        bottleneck.line_number = node.start_line;
        bottleneck.start_line = node.start_line;
        bottleneck.end_line = node.end_line;
        bottleneck.query_fragment = node.query_fragment.clone();
        bottleneck
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    pub fn spanning(mut self, start: usize, end: usize) -> Self {
        self.start_line = Some(start);
        self.end_line = Some(end);
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.query_fragment = Some(fragment.into());
        self
    }

    /// Heuristic cost estimate, not backed by a plan node
    pub fn with_estimated_cost(mut self, percentage: f64) -> Self {
        self.cost_percentage = percentage;
        self.cost_basis = CostBasis::Heuristic;
        self
    }

    /// Take cost, time and operator from `node` verbatim.
    pub fn attributed_to(mut self, node: &PlanNode) -> Self {
        self.cost_percentage = node.cost_percentage;
        self.cost_basis = CostBasis::PlanNode;
        self.time_impact_seconds = Some(node.elapsed_time_ms / 1000.0);
        self.operator_name = Some(node.description());
        self.related_node = Some(node.id);
        self
    }

    /// Take a `share` of `node`'s cost and time. The result is an estimate.
    pub fn apportioned_from(mut self, node: &PlanNode, share: f64) -> Self {
        self.cost_percentage = node.cost_percentage * share;
        self.cost_basis = CostBasis::Heuristic;
        self.time_impact_seconds = Some(node.elapsed_time_ms / 1000.0 * share);
        self.operator_name = Some(node.description());
        self.related_node = Some(node.id);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_problem(mut self, problem: impl Into<String>) -> Self {
        self.problem_description = problem.into();
        self
    }

    pub fn with_execution_count(mut self, count: u64) -> Self {
        self.execution_count = Some(count);
        self
    }

    pub fn with_why(mut self, why: impl Into<String>) -> Self {
        self.why_its_slow = Some(why.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn with_fix_query(mut self, sql: impl Into<String>) -> Self {
        self.fix_queries.push(sql.into());
        self
    }

    pub fn with_optimized_fragment(mut self, sql: impl Into<String>) -> Self {
        self.optimized_fragment = Some(sql.into());
        self
    }

    pub fn with_expected_improvement(mut self, text: impl Into<String>) -> Self {
        self.expected_improvement = Some(text.into());
        self
    }

    pub fn issue_title(&self) -> &'static str {
        self.issue_type.description()
    }

    /// e.g. `72.1% of runtime (49.0s)`
    pub fn formatted_cost_impact(&self) -> String {
        match self.time_impact_seconds {
            Some(seconds) => {
                format!("{} of runtime ({:.1}s)", format_percent(self.cost_percentage), seconds)
            },
            None => format!("{} of runtime", format_percent(self.cost_percentage)),
        }
    }
}

// ============================================================================
// Analysis Result
// ============================================================================

/// Ranked findings plus summary counters for one (sql, plan) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub bottlenecks: Vec<Bottleneck>,
    pub total_bottlenecks: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub total_cost_ms: f64,
    pub total_impact_seconds: f64,
    pub potential_improvement_percent: f64,
}

impl AnalysisResult {
    pub fn has_critical_issues(&self) -> bool {
        self.critical_count > 0
    }

    pub fn count_of(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical_count,
            Severity::Warning => self.warning_count,
            Severity::Info => self.info_count,
        }
    }

    /// Distinct `CREATE INDEX` statements in ranked order
    pub fn index_recommendations(&self) -> Vec<&str> {
        let mut statements: Vec<&str> = Vec::new();
        for sql in self.bottlenecks.iter().flat_map(|b| b.fix_queries.iter()) {
            if sql.contains("CREATE INDEX") && !statements.contains(&sql.as_str()) {
                statements.push(sql);
            }
        }
        statements
    }

    pub fn estimated_baseline_seconds(&self) -> f64 {
        self.total_cost_ms / 1000.0
    }

    pub fn estimated_optimized_seconds(&self) -> f64 {
        self.estimated_baseline_seconds() * (1.0 - self.potential_improvement_percent / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_threshold() {
        let mut severities = vec![Severity::Info, Severity::Critical, Severity::Warning];
        severities.sort();
        assert_eq!(severities, vec![Severity::Critical, Severity::Warning, Severity::Info]);

        assert!(Severity::Critical.meets(Severity::Warning));
        assert!(Severity::Warning.meets(Severity::Warning));
        assert!(!Severity::Info.meets(Severity::Warning));
    }

    #[test]
    fn test_severity_from_cost_and_str() {
        assert_eq!(Severity::from_cost_percentage(72.0), Severity::Critical);
        assert_eq!(Severity::from_cost_percentage(20.0), Severity::Critical);
        assert_eq!(Severity::from_cost_percentage(10.0), Severity::Warning);
        assert_eq!(Severity::from_cost_percentage(9.9), Severity::Info);

        assert_eq!(" Warning ".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert!("urgent".parse::<Severity>().is_err());
        assert_eq!(Severity::Info.to_string(), "INFO");
    }

    #[test]
    fn test_from_node_inherits_everything() {
        let mut node = PlanNode::new("Table Scan")
            .with_object("SFDC.dbo.GIVING_DETAIL")
            .with_actual_cost(49_000.0)
            .with_elapsed_ms(49_000.0)
            .with_actual_rows(18_200_000)
            .with_lines(17, None)
            .with_fragment("AND YEAR(gd.posted_date) = 2023");
        node.calculate_cost_percentage(68_000.0);

        let b = Bottleneck::from_node(IssueType::MissingIndex, &node);
        assert_eq!(b.severity, Severity::Critical);
        assert_eq!(b.cost_basis, CostBasis::PlanNode);
        assert_eq!(b.line_number, Some(17));
        assert_eq!(b.time_impact_seconds, Some(49.0));
        assert_eq!(b.related_node, Some(node.id));
        assert_eq!(b.operator_name.as_deref(), Some("Table Scan on SFDC.dbo.GIVING_DETAIL (18.2M rows)"));
        assert_eq!(b.formatted_cost_impact(), "72.1% of runtime (49.0s)");
    }

    #[test]
    fn test_apportioned_cost_is_heuristic() {
        let mut node = PlanNode::new("Hash Match (Inner Join)").with_actual_cost(6_000.0).with_elapsed_ms(6_000.0);
        node.calculate_cost_percentage(30_000.0);

        let b = Bottleneck::new(IssueType::LateFilter, Severity::Warning, "late").apportioned_from(&node, 0.5);
        assert!((b.cost_percentage - 10.0).abs() < 1e-9);
        assert_eq!(b.time_impact_seconds, Some(3.0));
        assert_eq!(b.cost_basis, CostBasis::Heuristic);
        assert_eq!(
            Bottleneck::new(IssueType::LateFilter, Severity::Info, "x").with_estimated_cost(8.0).formatted_cost_impact(),
            "8.0% of runtime"
        );
    }

    #[test]
    fn test_index_recommendations_are_distinct() {
        let index = "CREATE INDEX IX_T_a\nON t (a);";
        let finding = |fix: &str| {
            Bottleneck::new(IssueType::MissingIndex, Severity::Warning, "scan").with_fix_query(fix)
        };
        let result = AnalysisResult {
            bottlenecks: vec![finding(index), finding("-- hint only"), finding(index)],
            total_bottlenecks: 3,
            critical_count: 0,
            warning_count: 3,
            info_count: 0,
            total_cost_ms: 68_000.0,
            total_impact_seconds: 0.0,
            potential_improvement_percent: 90.0,
        };
        assert_eq!(result.index_recommendations(), vec![index]);
        assert!(!result.has_critical_issues());
        assert_eq!(result.count_of(Severity::Warning), 3);
        assert!((result.estimated_optimized_seconds() - 6.8).abs() < 1e-9);
    }

    #[test]
    fn test_serializes_enums_screaming_case() {
        let b = Bottleneck::new(IssueType::NonSargablePredicate, Severity::Critical, "x");
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["issue_type"], "NON_SARGABLE_PREDICATE");
        assert_eq!(json["severity"], "CRITICAL");
        assert_eq!(json["cost_basis"], "HEURISTIC");
        assert!(json.get("line_number").is_none());
    }
}
