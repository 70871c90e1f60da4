//! CSV renderings: the cleaned dataset and the two raw streams

use super::{fmt_opt, ReportError};
use crate::dataset::{CanonicalRow, Dataset};
use crate::demographics::QUESTIONNAIRE_KEYS;
use crate::ingest::assigned_condition;
use csv::Writer;

pub const DATASET_HEADER: [&str; 27] = [
    "participant_id",
    "condition",
    "status",
    "age",
    "gender",
    "psiturk_exp",
    "robot_exp",
    "correct_count",
    "total_questions",
    "accuracy",
    "mean_rt",
    "bonus",
    "engagement_q1",
    "engagement_q2",
    "engagement_score",
    "usability_q1",
    "usability_q2",
    "usability_score",
    "adaptiveness_q1",
    "adaptiveness_q2",
    "adaptiveness_score",
    "satisfaction_overall",
    "general_comments",
    "events_total",
    "events_skipped",
    "events_repaired",
    "out_of_order_trials",
];

pub const TRIAL_HEADER: [&str; 11] = [
    "participant_id",
    "condition",
    "trial_index",
    "question_id",
    "question_text",
    "correct_answer",
    "response",
    "correct",
    "difficulty",
    "rt",
    "timestamp",
];

fn finish(writer: Writer<Vec<u8>>) -> Result<String, ReportError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ReportError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| ReportError::Encoding(e.to_string()))
}

fn dataset_record(row: &CanonicalRow, precision: usize) -> Vec<String> {
    let d = &row.demographics;
    let p = &row.performance;
    let s = &row.survey;
    let text = |v: &Option<String>| v.clone().unwrap_or_default();

    vec![
        row.participant_id.to_string(),
        row.condition_label().to_string(),
        row.status.as_str().to_string(),
        fmt_opt(d.age, precision),
        text(&d.gender),
        text(&d.platform_experience),
        text(&d.robot_experience),
        p.correct_count.to_string(),
        p.total_questions.to_string(),
        fmt_opt(p.accuracy, precision),
        fmt_opt(p.mean_rt, precision),
        format!("{:.2}", p.bonus),
        fmt_opt(s.engagement_q1, precision),
        fmt_opt(s.engagement_q2, precision),
        fmt_opt(s.engagement_score, precision),
        fmt_opt(s.usability_q1, precision),
        fmt_opt(s.usability_q2, precision),
        fmt_opt(s.usability_score, precision),
        fmt_opt(s.adaptiveness_q1, precision),
        fmt_opt(s.adaptiveness_q2, precision),
        fmt_opt(s.adaptiveness_score, precision),
        fmt_opt(s.satisfaction_overall, precision),
        text(&d.general_comments),
        row.parse.total.to_string(),
        row.parse.skipped.to_string(),
        row.parse.repaired.to_string(),
        row.parse.out_of_order_trials.to_string(),
    ]
}

/// One row per participant, sorted by id
pub fn render_dataset_csv(dataset: &Dataset, precision: usize) -> Result<String, ReportError> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(DATASET_HEADER)?;
    for row in dataset.rows() {
        writer.write_record(dataset_record(row, precision))?;
    }
    finish(writer)
}

/// Every TEST trial, labelled with the condition from the assignment event
pub fn render_trial_csv(dataset: &Dataset, precision: usize) -> Result<String, ReportError> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(TRIAL_HEADER)?;

    for entry in &dataset.entries {
        let condition = assigned_condition(&entry.records)
            .map(|c| c.as_str())
            .unwrap_or("unknown");
        for (record, trial) in entry.records.iter().filter_map(|r| r.trial().map(|t| (r, t))) {
            writer.write_record([
                entry.row.participant_id.to_string(),
                condition.to_string(),
                trial.trial_index.to_string(),
                trial.question_id.clone(),
                trial.question_text.clone().unwrap_or_default(),
                trial.correct_answer.clone().unwrap_or_default(),
                trial.response.clone().unwrap_or_default(),
                trial.correct.map(|c| c.to_string()).unwrap_or_default(),
                trial.difficulty.clone().unwrap_or_default(),
                fmt_opt(trial.rt, precision),
                record.timestamp_ms.map(|t| t.to_string()).unwrap_or_default(),
            ])?;
        }
    }
    finish(writer)
}

/// One row per participant with the raw (merged) questionnaire answers
pub fn render_questionnaire_csv(dataset: &Dataset) -> Result<String, ReportError> {
    let mut writer = Writer::from_writer(Vec::new());
    let mut header = vec!["participant_id", "condition"];
    header.extend(QUESTIONNAIRE_KEYS);
    writer.write_record(&header)?;

    for entry in &dataset.entries {
        let condition = assigned_condition(&entry.records)
            .map(|c| c.as_str())
            .unwrap_or("unknown");
        let mut record = vec![entry.row.participant_id.to_string(), condition.to_string()];
        record.extend(
            QUESTIONNAIRE_KEYS
                .iter()
                .map(|k| entry.questionnaire.get(*k).cloned().unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    finish(writer)
}
