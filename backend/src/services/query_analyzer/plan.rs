//! Execution plan model
//!
//! Plan operators live in an arena owned by [`ExecutionPlan`]. Nodes refer to each
//! other through [`PlanNodeId`] indices: children are an ordered index list and the
//! parent is an optional index, so the tree carries no ownership cycles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::format::format_count;
use crate::utils::{AnalyzerError, AnalyzerResult};

/// Share of total cost at which a node becomes critical
pub const CRITICAL_COST_PERCENT: f64 = 20.0;
/// Share of total cost at which a node becomes a warning
pub const WARNING_COST_PERCENT: f64 = 10.0;

const SCAN_OPERATORS: &[&str] = &["Table Scan", "Clustered Index Scan", "Index Scan"];
const SEEK_OPERATORS: &[&str] = &["Index Seek", "Clustered Index Seek"];
const JOIN_OPERATORS: &[&str] = &["Join", "Nested Loops"];
const AGGREGATE_OPERATORS: &[&str] = &["Aggregate", "Hash Match"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(pub usize);

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostCategory {
    Critical,
    Warning,
    Ok,
}

impl CostCategory {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= CRITICAL_COST_PERCENT {
            CostCategory::Critical
        } else if percentage >= WARNING_COST_PERCENT {
            CostCategory::Warning
        } else {
            CostCategory::Ok
        }
    }
}

// ============================================================================
// Plan Node
// ============================================================================

/// One physical operator with its runtime statistics.
///
/// `cost_percentage` and `cost_category` stay at zero/`None` until
/// [`PlanNode::calculate_cost_percentage`] runs with the query total.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanNode {
    pub id: PlanNodeId,
    pub operator_type: String,
    pub object_name: Option<String>,

    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub estimated_rows: u64,
    pub actual_rows: u64,
    pub elapsed_time_ms: f64,
    pub cpu_time_ms: f64,
    pub logical_reads: u64,
    pub physical_reads: u64,

    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub query_fragment: Option<String>,

    pub cost_percentage: f64,
    pub cost_category: Option<CostCategory>,

    children: Vec<PlanNodeId>,
    parent: Option<PlanNodeId>,
}

impl PlanNode {
    pub fn new(operator_type: impl Into<String>) -> Self {
        Self { operator_type: operator_type.into(), ..Default::default() }
    }

    pub fn with_object(mut self, name: impl Into<String>) -> Self {
        self.object_name = Some(name.into());
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_actual_cost(mut self, cost: f64) -> Self {
        self.actual_cost = cost;
        self
    }

    pub fn with_estimated_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = rows;
        self
    }

    pub fn with_actual_rows(mut self, rows: u64) -> Self {
        self.actual_rows = rows;
        self
    }

    pub fn with_elapsed_ms(mut self, ms: f64) -> Self {
        self.elapsed_time_ms = ms;
        self
    }

    pub fn with_cpu_ms(mut self, ms: f64) -> Self {
        self.cpu_time_ms = ms;
        self
    }

    pub fn with_logical_reads(mut self, reads: u64) -> Self {
        self.logical_reads = reads;
        self
    }

    pub fn with_physical_reads(mut self, reads: u64) -> Self {
        self.physical_reads = reads;
        self
    }

    pub fn with_lines(mut self, start: usize, end: Option<usize>) -> Self {
        self.start_line = Some(start);
        self.end_line = end;
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.query_fragment = Some(fragment.into());
        self
    }

    /// Derive cost share and category from the query total. No-op when `total_cost <= 0`.
    pub fn calculate_cost_percentage(&mut self, total_cost: f64) {
        if total_cost <= 0.0 || !total_cost.is_finite() {
            return;
        }
        self.cost_percentage = (self.actual_cost / total_cost * 100.0).max(0.0);
        self.cost_category = Some(CostCategory::from_percentage(self.cost_percentage));
    }

    pub fn is_expensive(&self) -> bool {
        matches!(self.cost_category, Some(CostCategory::Critical | CostCategory::Warning))
    }

    pub fn is_scan_operation(&self) -> bool {
        operator_matches(&self.operator_type, SCAN_OPERATORS)
    }

    pub fn is_seek_operation(&self) -> bool {
        operator_matches(&self.operator_type, SEEK_OPERATORS)
    }

    pub fn is_join_operation(&self) -> bool {
        operator_matches(&self.operator_type, JOIN_OPERATORS)
    }

    pub fn is_aggregate_operation(&self) -> bool {
        operator_matches(&self.operator_type, AGGREGATE_OPERATORS)
    }

    /// Table or index name, if one is set and non-blank
    pub fn object(&self) -> Option<&str> {
        self.object_name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }

    /// e.g. `Table Scan on SFDC.dbo.GIVING_DETAIL (18.2M rows)`
    pub fn description(&self) -> String {
        let mut description = self.operator_type.clone();
        if let Some(object) = self.object() {
            description.push_str(" on ");
            description.push_str(object);
        }
        if self.actual_rows > 0 {
            description.push_str(&format!(" ({} rows)", format_count(self.actual_rows)));
        }
        description
    }

    pub fn children(&self) -> &[PlanNodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<PlanNodeId> {
        self.parent
    }
}

fn operator_matches(operator: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| operator.contains(needle))
}

// ============================================================================
// Execution Plan (arena)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionPlan {
    nodes: Vec<PlanNode>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from unlinked nodes, keeping their order. Ids are reassigned.
    pub fn from_nodes(nodes: impl IntoIterator<Item = PlanNode>) -> Self {
        let mut plan = Self::new();
        for node in nodes {
            plan.add_node(node);
        }
        plan
    }

    /// Insert a detached node and return its id.
    pub fn add_node(&mut self, mut node: PlanNode) -> PlanNodeId {
        let id = PlanNodeId(self.nodes.len());
        node.id = id;
        node.children.clear();
        node.parent = None;
        self.nodes.push(node);
        id
    }

    /// Insert `node` as the last child of `parent` and link it back to `parent`.
    pub fn add_child(&mut self, parent: PlanNodeId, node: PlanNode) -> AnalyzerResult<PlanNodeId> {
        if parent.0 >= self.nodes.len() {
            return Err(AnalyzerError::invalid_plan(format!("unknown parent node {}", parent)));
        }
        let id = self.add_node(node);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.nodes.get(id.0)
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First inserted node without a parent
    pub fn root(&self) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| node.parent.is_none())
    }

    pub fn children(&self, id: PlanNodeId) -> impl Iterator<Item = &PlanNode> + '_ {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(move |child| self.node(*child))
    }

    pub fn parent(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.node(id)?.parent.and_then(|parent| self.node(parent))
    }

    /// Lazy pre-order walk of everything below `id`. Each call starts a fresh traversal.
    pub fn descendants(&self, id: PlanNodeId) -> Descendants<'_> {
        let stack = self
            .node(id)
            .map(|node| node.children.iter().rev().copied().collect())
            .unwrap_or_default();
        Descendants { plan: self, stack }
    }

    pub fn calculate_cost_percentages(&mut self, total_cost: f64) {
        for node in &mut self.nodes {
            node.calculate_cost_percentage(total_cost);
        }
    }

    pub fn total_actual_cost(&self) -> f64 {
        self.nodes.iter().map(|node| node.actual_cost).sum()
    }
}

pub struct Descendants<'a> {
    plan: &'a ExecutionPlan,
    stack: Vec<PlanNodeId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a PlanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.plan.node(self.stack.pop()?)?;
        self.stack.extend(node.children.iter().rev().copied());
        Some(node)
    }
}
