//! Between-arm hypothesis tests
//!
//! Each configured hypothesis binds one derived metric to a treatment and a
//! control arm. A hypothesis that cannot be tested is reported as not run with
//! a reason; it never aborts the rest of the batch.

mod ttest;

pub use ttest::{student_t_test, GroupSummary, TTest, TTestError};

use crate::dataset::{CanonicalRow, Metric};
use crate::models::Condition;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisConfig {
    pub name: String,
    pub metric: Metric,
    #[serde(default = "default_treatment")]
    pub treatment: Condition,
    #[serde(default = "default_control")]
    pub control: Condition,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_treatment() -> Condition {
    Condition::Adaptive
}

fn default_control() -> Condition {
    Condition::Static
}

impl HypothesisConfig {
    pub fn new(name: impl Into<String>, metric: Metric) -> Self {
        Self {
            name: name.into(),
            metric,
            treatment: default_treatment(),
            control: default_control(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The four study hypotheses, adaptive tutor against static tutor
pub fn default_hypotheses() -> Vec<HypothesisConfig> {
    vec![
        HypothesisConfig::new("H1_performance", Metric::Accuracy)
            .with_description("Adaptive tutoring improves quiz accuracy"),
        HypothesisConfig::new("H2_engagement", Metric::EngagementScore)
            .with_description("Adaptive tutoring increases engagement"),
        HypothesisConfig::new("H3_trust", Metric::AdaptivenessScore)
            .with_description("Adaptive tutoring is perceived as more adaptive"),
        HypothesisConfig::new("H4_satisfaction", Metric::SatisfactionOverall)
            .with_description("Adaptive tutoring increases overall satisfaction"),
    ]
}

/// Decides whether a completed test supports the hypothesis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportRule {
    /// p < alpha and the treatment mean is above the control mean
    #[default]
    TreatmentExceedsControl,
    /// p < alpha in either direction
    AnyDifference,
    /// p < alpha and the control mean is above the treatment mean
    ControlExceedsTreatment,
}

impl SupportRule {
    pub fn is_supported(&self, test: &TTest, alpha: f64) -> bool {
        if test.p_value >= alpha {
            return false;
        }
        match self {
            SupportRule::TreatmentExceedsControl => test.t > 0.0,
            SupportRule::AnyDifference => true,
            SupportRule::ControlExceedsTreatment => test.t < 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportRule::TreatmentExceedsControl => "treatment_exceeds_control",
            SupportRule::AnyDifference => "any_difference",
            SupportRule::ControlExceedsTreatment => "control_exceeds_treatment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Significance level
    pub alpha: f64,
    pub support_rule: SupportRule,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            support_rule: SupportRule::default(),
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HypothesisStatus {
    Supported(TTest),
    NotSupported(TTest),
    NotRun { reason: String },
}

impl HypothesisStatus {
    pub fn test(&self) -> Option<&TTest> {
        match self {
            HypothesisStatus::Supported(t) | HypothesisStatus::NotSupported(t) => Some(t),
            HypothesisStatus::NotRun { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            HypothesisStatus::Supported(_) => "SUPPORTED".to_string(),
            HypothesisStatus::NotSupported(_) => "NOT SUPPORTED".to_string(),
            HypothesisStatus::NotRun { reason } => format!("NOT RUN ({})", reason),
        }
    }
}

impl fmt::Display for HypothesisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisResult {
    pub name: String,
    pub description: Option<String>,
    pub metric: Metric,
    pub treatment: Condition,
    pub control: Condition,
    pub treatment_group: GroupSummary,
    pub control_group: GroupSummary,
    pub status: HypothesisStatus,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Runs every hypothesis in order against the same rows
pub fn run_hypotheses<'a>(
    rows: impl IntoIterator<Item = &'a CanonicalRow> + Clone,
    hypotheses: &[HypothesisConfig],
    analysis: &AnalysisConfig,
) -> Vec<HypothesisResult> {
    let results: Vec<HypothesisResult> = hypotheses
        .iter()
        .map(|h| run_hypothesis(rows.clone(), h, analysis))
        .collect();

    let supported = results
        .iter()
        .filter(|r| matches!(r.status, HypothesisStatus::Supported(_)))
        .count();
    let not_run = results
        .iter()
        .filter(|r| matches!(r.status, HypothesisStatus::NotRun { .. }))
        .count();
    info!(
        hypotheses = results.len(),
        supported, not_run, "Hypothesis tests complete"
    );
    results
}

pub fn run_hypothesis<'a>(
    rows: impl IntoIterator<Item = &'a CanonicalRow>,
    hypothesis: &HypothesisConfig,
    analysis: &AnalysisConfig,
) -> HypothesisResult {
    let mut treatment_values = Vec::new();
    let mut control_values = Vec::new();
    let mut treatment_excluded = 0;
    let mut control_excluded = 0;

    for row in rows {
        let value = hypothesis.metric.value(row);
        if row.condition == Some(hypothesis.treatment) {
            match value {
                Some(v) => treatment_values.push(v),
                None => treatment_excluded += 1,
            }
        } else if row.condition == Some(hypothesis.control) {
            match value {
                Some(v) => control_values.push(v),
                None => control_excluded += 1,
            }
        }
    }

    let treatment_group = GroupSummary::from_values(&treatment_values, treatment_excluded);
    let control_group = GroupSummary::from_values(&control_values, control_excluded);

    let status = if hypothesis.treatment == hypothesis.control {
        HypothesisStatus::NotRun {
            reason: "treatment and control are the same arm".to_string(),
        }
    } else {
        match student_t_test(&treatment_group, &control_group) {
            Ok(test) if analysis.support_rule.is_supported(&test, analysis.alpha) => {
                HypothesisStatus::Supported(test)
            }
            Ok(test) => HypothesisStatus::NotSupported(test),
            Err(e) => HypothesisStatus::NotRun {
                reason: e.to_string(),
            },
        }
    };

    match &status {
        HypothesisStatus::NotRun { reason } => warn!(
            hypothesis = %hypothesis.name,
            metric = %hypothesis.metric,
            treatment_n = treatment_group.n,
            control_n = control_group.n,
            reason = %reason,
            "Hypothesis not run"
        ),
        _ => debug!(
            hypothesis = %hypothesis.name,
            status = %status,
            "Hypothesis tested"
        ),
    }

    HypothesisResult {
        name: hypothesis.name.clone(),
        description: hypothesis.description.clone(),
        metric: hypothesis.metric,
        treatment: hypothesis.treatment,
        control: hypothesis.control,
        treatment_group,
        control_group,
        status,
    }
}
