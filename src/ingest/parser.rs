//! Event log parser
//!
//! Turns one participant's raw log into ordered, phase-tagged [`EventRecord`]s.
//! Every raw entry gets an explicit outcome: parsed (possibly after quoting
//! repair) or skipped with a [`SkipReason`]. Skips are collected into a
//! [`ParseReport`]; nothing here is fatal and nothing is carried between calls.

use super::events::{EventPayload, EventPhase, EventRecord, TrialRecord};
use super::sanitize::sanitize_payload;
use crate::models::{QuestionnaireResponse, RawEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

// =============================================================================
// OUTCOMES
// =============================================================================

/// Why a raw entry was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Not valid JSON even after quoting repair
    InvalidJson { detail: String },
    /// Valid JSON, but not an object
    NotAnObject,
    /// A TEST trial repeating an already accepted trial index
    DuplicateTrial { trial_index: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson { detail } => write!(f, "invalid JSON: {}", detail),
            Self::NotAnObject => write!(f, "payload is not an object"),
            Self::DuplicateTrial { trial_index } => {
                write!(f, "duplicate trial index {}", trial_index)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub sequence_index: u64,
    pub reason: SkipReason,
}

/// Per-participant parse accounting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseReport {
    pub total: usize,
    pub parsed: usize,
    /// Entries that only parsed after quoting repair
    pub repaired: usize,
    /// Trials whose index went backwards relative to the previous trial
    pub out_of_order_trials: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl ParseReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Folds another participant's report into a run-level total
    pub fn absorb(&mut self, other: &ParseReport) {
        self.total += other.total;
        self.parsed += other.parsed;
        self.repaired += other.repaired;
        self.out_of_order_trials += other.out_of_order_trials;
        self.skipped.extend(other.skipped.iter().cloned());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedLog {
    pub records: Vec<EventRecord>,
    pub report: ParseReport,
}

/// Successful single-entry parse
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub record: EventRecord,
    pub repaired: bool,
}

// =============================================================================
// PARSING
// =============================================================================

/// Parses a whole log. Output is ordered by sequence index.
pub fn parse_log(raw: &[RawEvent]) -> ParsedLog {
    let mut report = ParseReport {
        total: raw.len(),
        ..ParseReport::default()
    };
    let mut records = Vec::with_capacity(raw.len());

    for event in raw {
        match parse_record(event) {
            Ok(parsed) => {
                if parsed.repaired {
                    report.repaired += 1;
                }
                records.push(parsed.record);
            }
            Err(reason) => {
                debug!(
                    sequence_index = event.sequence_index,
                    %reason,
                    "Skipping malformed event"
                );
                report.skipped.push(SkippedRecord {
                    sequence_index: event.sequence_index,
                    reason,
                });
            }
        }
    }

    records.sort_by_key(|r| r.sequence_index);

    let mut seen = BTreeSet::new();
    let mut last_trial: Option<u64> = None;
    records.retain(|record| {
        let Some(trial) = record.trial() else {
            return true;
        };
        if !seen.insert(trial.trial_index) {
            report.skipped.push(SkippedRecord {
                sequence_index: record.sequence_index,
                reason: SkipReason::DuplicateTrial {
                    trial_index: trial.trial_index,
                },
            });
            return false;
        }
        if last_trial.is_some_and(|last| trial.trial_index < last) {
            report.out_of_order_trials += 1;
        }
        last_trial = Some(trial.trial_index);
        true
    });

    report.skipped.sort_by_key(|s| s.sequence_index);
    report.parsed = records.len();

    ParsedLog { records, report }
}

/// Parses one raw entry: strict JSON first, then the quoting repair.
pub fn parse_record(raw: &RawEvent) -> Result<ParsedRecord, SkipReason> {
    let (value, repaired) = match serde_json::from_str::<Value>(&raw.payload) {
        Ok(value) => (value, false),
        Err(strict_err) => {
            let fixed = sanitize_payload(&raw.payload);
            match serde_json::from_str::<Value>(&fixed) {
                Ok(value) => (value, true),
                Err(_) => {
                    return Err(SkipReason::InvalidJson {
                        detail: strict_err.to_string(),
                    })
                }
            }
        }
    };

    let Value::Object(fields) = value else {
        return Err(SkipReason::NotAnObject);
    };

    Ok(ParsedRecord {
        record: EventRecord {
            sequence_index: raw.sequence_index,
            timestamp_ms: raw.timestamp_ms,
            payload: classify(raw.sequence_index, fields),
        },
        repaired,
    })
}

fn classify(sequence_index: u64, fields: Map<String, Value>) -> EventPayload {
    let phase = field_string(&fields, "phase").unwrap_or_default();

    match EventPhase::from_raw(&phase) {
        EventPhase::Assignment => EventPayload::Assignment {
            condition: field_string(&fields, "condition"),
        },
        EventPhase::Test => match field_string(&fields, "question_id") {
            Some(question_id) => EventPayload::Trial(TrialRecord {
                trial_index: field_u64(&fields, "trial_index").unwrap_or(sequence_index),
                question_id,
                question_text: field_string(&fields, "question_text"),
                correct_answer: field_string(&fields, "correct_answer"),
                response: field_string(&fields, "response"),
                correct: field_bool(&fields, "correct"),
                difficulty: field_string(&fields, "difficulty"),
                rt: field_f64(&fields, "rt"),
                condition: field_string(&fields, "condition"),
            }),
            None => EventPayload::TestMarker {
                status: field_string(&fields, "status"),
            },
        },
        EventPhase::Questionnaire => EventPayload::Questionnaire {
            status: field_string(&fields, "status"),
            survey: fields.get("survey").and_then(survey_map),
        },
        EventPhase::Other(name) => EventPayload::Other {
            phase: name,
            fields,
        },
    }
}

/// The task page stores the survey as a JSON-encoded string; older exports
/// inline it as an object.
fn survey_map(value: &Value) -> Option<QuestionnaireResponse> {
    let object = match value {
        Value::Object(map) => map.clone(),
        Value::String(text) => {
            let fixed = sanitize_payload(text);
            match serde_json::from_str::<Value>(&fixed) {
                Ok(Value::Object(map)) => map,
                _ => {
                    debug!("Ignoring unparseable survey payload");
                    return None;
                }
            }
        }
        _ => return None,
    };

    Some(
        object
            .iter()
            .filter_map(|(k, v)| value_string(v).map(|s| (k.clone(), s)))
            .collect(),
    )
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(value_string)
}

fn field_bool(fields: &Map<String, Value>, key: &str) -> Option<bool> {
    match fields.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn field_f64(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn field_u64(fields: &Map<String, Value>, key: &str) -> Option<u64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
