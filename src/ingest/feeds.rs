//! Input feeds
//!
//! - Feed A (trial stream, no header): `participant_id, sequence_index, timestamp, payload`
//! - Feed B (questionnaire stream, no header): `participant_id, question_key, response_value`
//! - psiTurk-style datastrings: `{"data": [...], "questiondata": {...}}`
//!
//! All three end up as [`RawEvent`] logs plus a flat [`QuestionnaireResponse`]
//! per participant, so every downstream path parses the same way.

use crate::models::{ParticipantId, ParticipantSnapshot, QuestionnaireResponse, RawEvent};
use chrono::DateTime;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub enum FeedError {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    /// The datastring parsed but does not have the expected shape
    Shape(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Csv(e) => write!(f, "CSV error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
            Self::Shape(msg) => write!(f, "Unexpected datastring shape: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<std::io::Error> for FeedError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for FeedError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Rows read vs rows that could not be used at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub rows: usize,
    /// Every unusable row, including the two sequence-index cases below
    pub rejected: usize,
    pub duplicate_answers: usize,
    /// Trial rows whose sequence index is missing or not a number
    pub invalid_sequence: usize,
    /// Trial rows repeating a sequence index already read for that participant
    pub duplicate_sequence: usize,
}

// =============================================================================
// FEED A: TRIAL STREAM
// =============================================================================

/// Reads the trial stream. Rows keep their file order within a participant.
/// Rows without a payload column, without a numeric sequence index, or
/// repeating a sequence index are rejected and counted; the first row with a
/// given index wins.
pub fn read_trial_feed<R: Read>(
    reader: R,
) -> Result<(BTreeMap<ParticipantId, Vec<RawEvent>>, FeedStats), FeedError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut logs: BTreeMap<ParticipantId, Vec<RawEvent>> = BTreeMap::new();
    let mut seen: BTreeMap<ParticipantId, BTreeSet<u64>> = BTreeMap::new();
    let mut stats = FeedStats::default();

    for row in csv_reader.records() {
        let row = row?;
        stats.rows += 1;

        let (Some(pid), Some(payload)) = (row.get(0), row.get(3)) else {
            stats.rejected += 1;
            warn!(line = stats.rows, "Trial feed row has fewer than 4 columns");
            continue;
        };
        if pid.trim().is_empty() {
            stats.rejected += 1;
            continue;
        }

        let pid = ParticipantId::new(pid.trim());
        let Some(sequence_index) = row.get(1).and_then(|s| s.trim().parse::<u64>().ok()) else {
            stats.rejected += 1;
            stats.invalid_sequence += 1;
            warn!(line = stats.rows, participant = %pid, "Trial feed row has no numeric sequence index");
            continue;
        };
        if !seen.entry(pid.clone()).or_default().insert(sequence_index) {
            stats.rejected += 1;
            stats.duplicate_sequence += 1;
            warn!(
                line = stats.rows,
                participant = %pid,
                sequence_index,
                "Trial feed row repeats a sequence index"
            );
            continue;
        }
        let timestamp_ms = row.get(2).and_then(parse_timestamp_ms);

        logs.entry(pid)
            .or_default()
            .push(RawEvent::new(sequence_index, timestamp_ms, payload));
    }

    debug!(
        rows = stats.rows,
        participants = logs.len(),
        "Read trial feed"
    );
    Ok((logs, stats))
}

// =============================================================================
// FEED B: QUESTIONNAIRE STREAM
// =============================================================================

/// Pivots the questionnaire stream to one map per participant. A repeated key
/// keeps the last value.
pub fn read_question_feed<R: Read>(
    reader: R,
) -> Result<(BTreeMap<ParticipantId, QuestionnaireResponse>, FeedStats), FeedError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut answers: BTreeMap<ParticipantId, QuestionnaireResponse> = BTreeMap::new();
    let mut stats = FeedStats::default();

    for row in csv_reader.records() {
        let row = row?;
        stats.rows += 1;

        let (Some(pid), Some(key)) = (row.get(0), row.get(1)) else {
            stats.rejected += 1;
            continue;
        };
        if pid.trim().is_empty() || key.trim().is_empty() {
            stats.rejected += 1;
            continue;
        }
        let value = row.get(2).unwrap_or_default().to_string();

        let previous = answers
            .entry(ParticipantId::new(pid.trim()))
            .or_default()
            .insert(key.trim().to_string(), value);
        if previous.is_some() {
            stats.duplicate_answers += 1;
        }
    }

    if stats.duplicate_answers > 0 {
        warn!(
            duplicates = stats.duplicate_answers,
            "Questionnaire feed repeats keys; last value kept"
        );
    }
    Ok((answers, stats))
}

/// Joins both feeds into participant snapshots, ordered by id. Participants
/// present in only one feed are kept.
pub fn load_feed_files(
    trials_path: &Path,
    questions_path: &Path,
) -> Result<Vec<ParticipantSnapshot>, FeedError> {
    let (mut logs, trial_stats) = read_trial_feed(File::open(trials_path)?)?;
    let (mut answers, question_stats) = read_question_feed(File::open(questions_path)?)?;

    info!(
        trial_rows = trial_stats.rows,
        trial_rows_rejected = trial_stats.rejected,
        trial_rows_invalid_sequence = trial_stats.invalid_sequence,
        trial_rows_duplicate_sequence = trial_stats.duplicate_sequence,
        question_rows = question_stats.rows,
        question_rows_rejected = question_stats.rejected,
        "Loaded feed files"
    );

    let ids: Vec<ParticipantId> = logs
        .keys()
        .chain(answers.keys())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Ok(ids
        .into_iter()
        .map(|id| {
            let events = logs.remove(&id).unwrap_or_default();
            let questionnaire = answers.remove(&id).unwrap_or_default();
            ParticipantSnapshot::from_feeds(id, events, questionnaire)
        })
        .collect())
}

// =============================================================================
// DATASTRINGS
// =============================================================================

/// Unpacks a psiTurk-style datastring into raw events and the flat
/// questionnaire map. `trialdata` may be an object or an already-encoded
/// string; either way it is kept as text so the parser sees it verbatim.
pub fn raw_events_from_datastring(
    datastring: &str,
) -> Result<(Vec<RawEvent>, QuestionnaireResponse), FeedError> {
    let root: Value = serde_json::from_str(datastring)?;
    let Value::Object(root) = root else {
        return Err(FeedError::Shape("root is not an object".to_string()));
    };

    let mut events = Vec::new();
    let mut seen = BTreeSet::new();
    if let Some(data) = root.get("data") {
        let Value::Array(entries) = data else {
            return Err(FeedError::Shape("`data` is not an array".to_string()));
        };
        for (position, entry) in entries.iter().enumerate() {
            let Some(sequence_index) = entry.get("current_trial").and_then(Value::as_u64) else {
                warn!(position, "Datastring entry has no numeric current_trial, skipped");
                continue;
            };
            if !seen.insert(sequence_index) {
                warn!(position, sequence_index, "Datastring entry repeats current_trial, skipped");
                continue;
            }
            let timestamp_ms = entry.get("dateTime").and_then(Value::as_i64);
            let payload = match entry.get("trialdata") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            events.push(RawEvent::new(sequence_index, timestamp_ms, payload));
        }
    }

    let mut questionnaire = QuestionnaireResponse::new();
    if let Some(Value::Object(questions)) = root.get("questiondata") {
        for (key, value) in questions {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            questionnaire.insert(key.clone(), text);
        }
    }

    Ok((events, questionnaire))
}

/// Epoch milliseconds, or an RFC 3339 timestamp converted to them
fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i64>().ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.timestamp_millis())
    })
}
