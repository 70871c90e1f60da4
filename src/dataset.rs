//! Canonical per-participant dataset
//!
//! A read-only projection of the store (or feed files): every row is rebuilt
//! from the raw event log on each call.

use crate::demographics::{self, Demographics, SurveyScores};
use crate::ingest::{assigned_condition, parse_log, trial_condition, EventRecord, ParseReport};
use crate::metrics::{self, BonusPolicy, PerformanceMetrics};
use crate::models::{
    Condition, ParticipantId, ParticipantSnapshot, ParticipantStatus, QuestionnaireResponse,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Per-participant parse counts carried on the row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseCounts {
    pub total: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub repaired: usize,
    pub out_of_order_trials: usize,
}

impl From<&ParseReport> for ParseCounts {
    fn from(report: &ParseReport) -> Self {
        Self {
            total: report.total,
            parsed: report.parsed,
            skipped: report.skipped_count(),
            repaired: report.repaired,
            out_of_order_trials: report.out_of_order_trials,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub participant_id: ParticipantId,
    /// `None` when neither the log nor the store names an arm
    pub condition: Option<Condition>,
    pub status: ParticipantStatus,
    pub demographics: Demographics,
    pub performance: PerformanceMetrics,
    pub survey: SurveyScores,
    pub parse: ParseCounts,
}

impl CanonicalRow {
    pub fn condition_label(&self) -> &'static str {
        self.condition.map(|c| c.as_str()).unwrap_or("unknown")
    }
}

/// A row together with the typed log and merged answers it was built from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantEntry {
    pub row: CanonicalRow,
    pub records: Vec<EventRecord>,
    pub questionnaire: QuestionnaireResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    /// Sorted by participant id
    pub entries: Vec<ParticipantEntry>,
    /// Parse outcomes summed over every participant
    pub parse_report: ParseReport,
}

impl Dataset {
    pub fn rows(&self) -> impl Iterator<Item = &CanonicalRow> + Clone {
        self.entries.iter().map(|e| &e.row)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// METRIC BINDING
// =============================================================================

/// Derived metric a hypothesis can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    EngagementScore,
    UsabilityScore,
    AdaptivenessScore,
    SatisfactionOverall,
    MeanRt,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::EngagementScore => "engagement_score",
            Metric::UsabilityScore => "usability_score",
            Metric::AdaptivenessScore => "adaptiveness_score",
            Metric::SatisfactionOverall => "satisfaction_overall",
            Metric::MeanRt => "mean_rt",
        }
    }

    pub fn value(&self, row: &CanonicalRow) -> Option<f64> {
        match self {
            Metric::Accuracy => row.performance.accuracy,
            Metric::EngagementScore => row.survey.engagement_score,
            Metric::UsabilityScore => row.survey.usability_score,
            Metric::AdaptivenessScore => row.survey.adaptiveness_score,
            Metric::SatisfactionOverall => row.survey.satisfaction_overall,
            Metric::MeanRt => row.performance.mean_rt,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BUILD
// =============================================================================

/// Condition for a row: the persisted arm when there is one, then the
/// assignment event, then the label carried on trial records.
pub fn resolve_condition(
    records: &[EventRecord],
    stored: Option<Condition>,
) -> Option<Condition> {
    stored
        .or_else(|| assigned_condition(records))
        .or_else(|| trial_condition(records))
}

/// Status implied by the log alone
pub fn status_from_log(records: &[EventRecord]) -> ParticipantStatus {
    if records.iter().any(EventRecord::is_completion) {
        ParticipantStatus::Completed
    } else if records.is_empty() {
        ParticipantStatus::Pending
    } else {
        ParticipantStatus::InProgress
    }
}

pub fn build_entry(
    snapshot: &ParticipantSnapshot,
    bonus: &BonusPolicy,
) -> (ParticipantEntry, ParseReport) {
    let parsed = parse_log(&snapshot.events);
    if parsed.report.skipped_count() > 0 {
        warn!(
            participant = %snapshot.id,
            skipped = parsed.report.skipped_count(),
            "Dropped unreadable log entries"
        );
    }

    let questionnaire =
        demographics::merged_questionnaire(&snapshot.questionnaire, &parsed.records);
    let (demographics, survey) = demographics::extract(&questionnaire);
    let performance = metrics::aggregate(&parsed.records, bonus);

    let row = CanonicalRow {
        participant_id: snapshot.id.clone(),
        condition: resolve_condition(&parsed.records, snapshot.condition),
        status: snapshot.status.advance(status_from_log(&parsed.records)),
        demographics,
        performance,
        survey,
        parse: ParseCounts::from(&parsed.report),
    };

    (
        ParticipantEntry {
            row,
            records: parsed.records,
            questionnaire,
        },
        parsed.report,
    )
}

pub fn build_dataset(snapshots: &[ParticipantSnapshot], bonus: &BonusPolicy) -> Dataset {
    let mut dataset = Dataset::default();

    for snapshot in snapshots {
        let (entry, report) = build_entry(snapshot, bonus);
        dataset.parse_report.absorb(&report);
        dataset.entries.push(entry);
    }
    dataset
        .entries
        .sort_by(|a, b| a.row.participant_id.cmp(&b.row.participant_id));

    debug!(
        participants = dataset.len(),
        records = dataset.parse_report.parsed,
        skipped = dataset.parse_report.skipped_count(),
        "Built canonical dataset"
    );
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEvent;

    fn snapshot(id: &str, payloads: &[&str]) -> ParticipantSnapshot {
        let events = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| RawEvent::new(i as u64, None, *p))
            .collect();
        ParticipantSnapshot::from_feeds(ParticipantId::new(id), events, Default::default())
    }

    #[test]
    fn test_rows_are_sorted_by_id() {
        let snapshots = vec![snapshot("w2:a", &[]), snapshot("w1:a", &[])];
        let dataset = build_dataset(&snapshots, &BonusPolicy::default());
        let ids: Vec<&str> = dataset.rows().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["w1:a", "w2:a"]);
    }

    #[test]
    fn test_condition_fallback_order() {
        let from_assignment = snapshot(
            "w1:a",
            &[
                r#"{"phase": "ASSIGNMENT", "condition": "static"}"#,
                r#"{"phase": "TEST", "question_id": "q1", "trial_index": 0, "condition": "adaptive"}"#,
            ],
        );
        let from_trial = snapshot(
            "w2:a",
            &[r#"{"phase": "TEST", "question_id": "q1", "trial_index": 0, "condition": "adaptive"}"#],
        );
        let mut from_store = snapshot(
            "w3:a",
            &[r#"{"phase": "ASSIGNMENT", "condition": "adaptive"}"#],
        );
        from_store.condition = Some(Condition::Static);

        let dataset = build_dataset(
            &[from_assignment, from_trial, from_store, snapshot("w4:a", &[])],
            &BonusPolicy::default(),
        );
        let conditions: Vec<Option<Condition>> = dataset.rows().map(|r| r.condition).collect();

        assert_eq!(
            conditions,
            vec![
                Some(Condition::Static),
                Some(Condition::Adaptive),
                Some(Condition::Static),
                None
            ]
        );
        assert_eq!(dataset.entries[3].row.condition_label(), "unknown");
    }

    #[test]
    fn test_status_follows_log_but_never_regresses() {
        let done = snapshot(
            "w1:a",
            &[
                r#"{"phase": "TEST", "question_id": "q1", "trial_index": 0}"#,
                r#"{"phase": "postquestionnaire", "status": "submit"}"#,
            ],
        );
        let mut stored_done = snapshot("w2:a", &[]);
        stored_done.status = ParticipantStatus::Completed;

        let dataset = build_dataset(&[done, stored_done], &BonusPolicy::default());

        assert_eq!(dataset.entries[0].row.status, ParticipantStatus::Completed);
        assert_eq!(dataset.entries[1].row.status, ParticipantStatus::Completed);
    }

    #[test]
    fn test_parse_counts_are_aggregated() {
        let dataset = build_dataset(
            &[
                snapshot("w1:a", &["garbage", r#"{"phase": "FEEDBACK"}"#]),
                snapshot("w2:a", &["[1]"]),
            ],
            &BonusPolicy::default(),
        );

        assert_eq!(dataset.parse_report.total, 3);
        assert_eq!(dataset.parse_report.skipped_count(), 2);
        assert_eq!(dataset.entries[0].row.parse.skipped, 1);
        assert_eq!(dataset.entries[1].row.parse.parsed, 0);
    }

    #[test]
    fn test_metric_binding_reads_row_fields() {
        let dataset = build_dataset(
            &[snapshot(
                "w1:a",
                &[
                    r#"{"phase": "TEST", "question_id": "q1", "trial_index": 0, "correct": true, "rt": 800}"#,
                    r#"{"phase": "TEST", "question_id": "q2", "trial_index": 1, "correct": false, "rt": 1200}"#,
                ],
            )],
            &BonusPolicy::default(),
        );
        let row = &dataset.entries[0].row;

        assert_eq!(Metric::Accuracy.value(row), Some(0.5));
        assert_eq!(Metric::MeanRt.value(row), Some(1000.0));
        assert_eq!(Metric::EngagementScore.value(row), None);
    }
}
