//! Detector Engine
//!
//! Runs every registered detector over one (sql, plan) pair, ranks the combined
//! findings and computes the summary counters of the result.

use super::detectors::{DetectionContext, Detector, get_all_detectors};
use crate::services::query_analyzer::models::{
    AnalysisResult, Bottleneck, MAX_POTENTIAL_IMPROVEMENT_PERCENT, Severity,
};
use crate::services::query_analyzer::plan::ExecutionPlan;
use crate::utils::format::{format_duration_ms, format_percent};

/// Detector engine configuration
#[derive(Debug, Clone)]
pub struct DetectorEngineConfig {
    /// Least severe finding still reported
    pub min_severity: Severity,
    /// Maximum number of findings to return, after ranking
    pub max_findings: Option<usize>,
}

impl Default for DetectorEngineConfig {
    fn default() -> Self {
        Self { min_severity: Severity::Info, max_findings: None }
    }
}

/// Detector engine for SQL anti-pattern analysis
pub struct DetectorEngine {
    config: DetectorEngineConfig,
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorEngine {
    /// Create a new engine with default configuration
    pub fn new() -> Self {
        Self::with_config(DetectorEngineConfig::default())
    }

    pub fn with_config(config: DetectorEngineConfig) -> Self {
        Self { config, detectors: get_all_detectors() }
    }

    pub fn config(&self) -> &DetectorEngineConfig {
        &self.config
    }

    /// Analyze a query against its plan and return ranked findings
    pub fn analyze(&self, sql: &str, plan: &ExecutionPlan) -> AnalysisResult {
        let context = DetectionContext::new(sql, plan);
        let mut bottlenecks = Vec::new();

        for detector in &self.detectors {
            let found = detector.detect(&context);
            tracing::debug!(
                "Detector {} ({}) reported {} finding(s)",
                detector.id(),
                detector.name(),
                found.len()
            );
            bottlenecks.extend(found);
        }

        rank(&mut bottlenecks);

        bottlenecks.retain(|b| b.severity.meets(self.config.min_severity));
        if let Some(max) = self.config.max_findings
            && bottlenecks.len() > max
        {
            bottlenecks.truncate(max);
        }

        let result = summarize(bottlenecks, plan);
        tracing::info!(
            "Analysis complete: {} finding(s) ({} critical, {} warning, {} info), plan cost {}, potential improvement {}",
            result.total_bottlenecks,
            result.critical_count,
            result.warning_count,
            result.info_count,
            format_duration_ms(result.total_cost_ms),
            format_percent(result.potential_improvement_percent)
        );
        result
    }
}

impl Default for DetectorEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Ranking and Summary
// ============================================================================

/// Severity first (critical on top), then cost descending.
///
/// The sort is stable, so ties keep detector order and the output is
/// reproducible for identical input.
fn rank(bottlenecks: &mut [Bottleneck]) {
    bottlenecks.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.cost_percentage.total_cmp(&a.cost_percentage))
    });
}

fn summarize(bottlenecks: Vec<Bottleneck>, plan: &ExecutionPlan) -> AnalysisResult {
    let count = |severity: Severity| bottlenecks.iter().filter(|b| b.severity == severity).count();
    let critical_count = count(Severity::Critical);
    let warning_count = count(Severity::Warning);
    let info_count = count(Severity::Info);

    let total_impact_seconds =
        bottlenecks.iter().map(|b| b.time_impact_seconds.unwrap_or(0.0)).sum();
    // Overlapping findings double-count, so the raw sum saturates at the cap.
    let potential_improvement_percent = bottlenecks
        .iter()
        .map(|b| b.cost_percentage)
        .sum::<f64>()
        .clamp(0.0, MAX_POTENTIAL_IMPROVEMENT_PERCENT);

    AnalysisResult {
        total_bottlenecks: bottlenecks.len(),
        critical_count,
        warning_count,
        info_count,
        total_cost_ms: plan.total_actual_cost(),
        total_impact_seconds,
        potential_improvement_percent,
        bottlenecks,
    }
}
