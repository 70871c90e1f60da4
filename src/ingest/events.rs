//! Typed event records produced by the log parser.

use crate::models::{Condition, QuestionnaireResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Phase tag carried by every event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPhase {
    Assignment,
    Test,
    Questionnaire,
    Other(String),
}

impl EventPhase {
    /// Maps the raw `phase` field. Matching is case-insensitive; the
    /// questionnaire phase is recorded as `postquestionnaire` by the task page.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("ASSIGNMENT") {
            EventPhase::Assignment
        } else if trimmed.eq_ignore_ascii_case("TEST") {
            EventPhase::Test
        } else if trimmed.eq_ignore_ascii_case("postquestionnaire")
            || trimmed.eq_ignore_ascii_case("QUESTIONNAIRE")
        {
            EventPhase::Questionnaire
        } else {
            EventPhase::Other(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventPhase::Assignment => "ASSIGNMENT",
            EventPhase::Test => "TEST",
            EventPhase::Questionnaire => "QUESTIONNAIRE",
            EventPhase::Other(name) => name,
        }
    }
}

/// One answered quiz question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_index: u64,
    pub question_id: String,
    pub question_text: Option<String>,
    pub correct_answer: Option<String>,
    pub response: Option<String>,
    pub correct: Option<bool>,
    pub difficulty: Option<String>,
    /// Reaction time in milliseconds
    pub rt: Option<f64>,
    /// Condition label the task page attached to the trial, if any
    pub condition: Option<String>,
}

/// Phase-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Assignment {
        condition: Option<String>,
    },
    Trial(TrialRecord),
    /// TEST-phase bookkeeping record without a question (e.g. `status: finished`)
    TestMarker {
        status: Option<String>,
    },
    Questionnaire {
        status: Option<String>,
        survey: Option<QuestionnaireResponse>,
    },
    Other {
        phase: String,
        fields: Map<String, Value>,
    },
}

/// A parsed, phase-tagged entry of a participant's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence_index: u64,
    pub timestamp_ms: Option<i64>,
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn phase(&self) -> EventPhase {
        match &self.payload {
            EventPayload::Assignment { .. } => EventPhase::Assignment,
            EventPayload::Trial(_) | EventPayload::TestMarker { .. } => EventPhase::Test,
            EventPayload::Questionnaire { .. } => EventPhase::Questionnaire,
            EventPayload::Other { phase, .. } => EventPhase::Other(phase.clone()),
        }
    }

    pub fn trial(&self) -> Option<&TrialRecord> {
        match &self.payload {
            EventPayload::Trial(trial) => Some(trial),
            _ => None,
        }
    }

    /// True for the questionnaire submission that finalizes a session
    pub fn is_completion(&self) -> bool {
        matches!(
            &self.payload,
            EventPayload::Questionnaire { status: Some(status), .. } if status == "submit"
        )
    }
}

/// Condition named by the first assignment-phase event that carries a valid label
pub fn assigned_condition(records: &[EventRecord]) -> Option<Condition> {
    records.iter().find_map(|record| match &record.payload {
        EventPayload::Assignment {
            condition: Some(label),
        } => Condition::parse(label),
        _ => None,
    })
}

/// Condition carried on trial records, used when no assignment event exists
pub fn trial_condition(records: &[EventRecord]) -> Option<Condition> {
    records
        .iter()
        .filter_map(EventRecord::trial)
        .find_map(|trial| trial.condition.as_deref().and_then(Condition::parse))
}

/// Survey object from the last questionnaire event that embedded one
pub fn embedded_survey(records: &[EventRecord]) -> Option<&QuestionnaireResponse> {
    records.iter().rev().find_map(|record| match &record.payload {
        EventPayload::Questionnaire {
            survey: Some(survey),
            ..
        } => Some(survey),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_from_raw() {
        assert_eq!(EventPhase::from_raw("TEST"), EventPhase::Test);
        assert_eq!(EventPhase::from_raw("assignment"), EventPhase::Assignment);
        assert_eq!(
            EventPhase::from_raw("postquestionnaire"),
            EventPhase::Questionnaire
        );
        assert_eq!(
            EventPhase::from_raw("FEEDBACK"),
            EventPhase::Other("FEEDBACK".to_string())
        );
    }

    #[test]
    fn test_assigned_condition_skips_unknown_labels() {
        let records = vec![
            EventRecord {
                sequence_index: 0,
                timestamp_ms: None,
                payload: EventPayload::Assignment {
                    condition: Some("unknown".to_string()),
                },
            },
            EventRecord {
                sequence_index: 1,
                timestamp_ms: None,
                payload: EventPayload::Assignment {
                    condition: Some("static".to_string()),
                },
            },
        ];
        assert_eq!(assigned_condition(&records), Some(Condition::Static));
    }
}
