//! Offline analysis: snapshot in, dataset + hypothesis results + report out

use crate::config::StudyConfig;
use crate::dataset::{build_dataset, Dataset};
use crate::demographics::DemographicSummary;
use crate::hypothesis::{run_hypotheses, HypothesisResult};
use crate::models::ParticipantSnapshot;
use crate::report::{export_report, render_report, RenderedReport, ReportError};
use crate::store::{ParticipantStore, StoreResult};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub dataset: Dataset,
    pub demographics: DemographicSummary,
    pub results: Vec<HypothesisResult>,
}

impl AnalysisOutput {
    pub fn render(&self, config: &StudyConfig) -> Result<RenderedReport, ReportError> {
        render_report(
            &self.dataset,
            &self.demographics,
            &self.results,
            &config.analysis,
            &config.report,
        )
    }

    pub fn export(&self, config: &StudyConfig) -> Result<Vec<PathBuf>, ReportError> {
        export_report(
            &self.dataset,
            &self.demographics,
            &self.results,
            &config.analysis,
            &config.report,
        )
    }
}

/// Single-threaded batch over an already loaded snapshot
pub fn analyze(snapshots: &[ParticipantSnapshot], config: &StudyConfig) -> AnalysisOutput {
    let dataset = build_dataset(snapshots, &config.bonus);
    let demographics = DemographicSummary::from_rows(dataset.rows().map(|r| &r.demographics));
    let results = run_hypotheses(dataset.rows(), &config.hypotheses, &config.analysis);

    info!(
        participants = dataset.len(),
        skipped_records = dataset.parse_report.skipped_count(),
        hypotheses = results.len(),
        "Analysis complete"
    );

    AnalysisOutput {
        dataset,
        demographics,
        results,
    }
}

/// Analysis over a store snapshot. Store failures abort before anything is
/// computed or written.
pub fn analyze_store(
    store: &dyn ParticipantStore,
    config: &StudyConfig,
) -> StoreResult<AnalysisOutput> {
    let snapshots = store.get_all()?;
    Ok(analyze(&snapshots, config))
}
