//! Full-fidelity JSON reconstruction of every participant

use super::ReportError;
use crate::dataset::{Dataset, ParticipantEntry};
use crate::ingest::ParseReport;
use serde::Serialize;

#[derive(Serialize)]
struct FullDump<'a> {
    participant_count: usize,
    participants: &'a [ParticipantEntry],
    parse_report: &'a ParseReport,
}

pub fn render_full_json(dataset: &Dataset) -> Result<String, ReportError> {
    let dump = FullDump {
        participant_count: dataset.len(),
        participants: &dataset.entries,
        parse_report: &dataset.parse_report,
    };
    let mut json = serde_json::to_string_pretty(&dump)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::build_dataset;
    use crate::metrics::BonusPolicy;
    use crate::models::{ParticipantId, ParticipantSnapshot, RawEvent};

    #[test]
    fn test_dump_carries_rows_records_and_answers() {
        let mut answers = crate::models::QuestionnaireResponse::new();
        answers.insert("gender".to_string(), "female".to_string());
        let snapshot = ParticipantSnapshot::from_feeds(
            ParticipantId::new("w1:a1"),
            vec![
                RawEvent::new(0, None, "{'phase': 'ASSIGNMENT', 'condition': 'static'}"),
                RawEvent::new(1, None, "broken"),
            ],
            answers,
        );
        let dataset = build_dataset(&[snapshot], &BonusPolicy::default());

        let json = render_full_json(&dataset).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["participant_count"], 1);
        let p = &value["participants"][0];
        assert_eq!(p["row"]["participant_id"], "w1:a1");
        assert_eq!(p["row"]["condition"], "static");
        assert_eq!(p["records"][0]["payload"]["kind"], "assignment");
        assert_eq!(p["questionnaire"]["gender"], "female");
        assert_eq!(value["parse_report"]["repaired"], 1);
        assert_eq!(value["parse_report"]["skipped"][0]["sequence_index"], 1);
    }
}
