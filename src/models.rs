use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Assignment id the recruitment platform sends for preview (not accepted) sessions
pub const PREVIEW_ASSIGNMENT_ID: &str = "ASSIGNMENT_ID_NOT_AVAILABLE";

/// Flat questionnaire answers, question key -> raw response value
pub type QuestionnaireResponse = BTreeMap<String, String>;

/// Experimental arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Adaptive,
    Static,
}

impl Condition {
    pub const ALL: [Condition; 2] = [Condition::Adaptive, Condition::Static];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Adaptive => "adaptive",
            Condition::Static => "static",
        }
    }

    /// Numeric arm code stored alongside the participant (0 = adaptive, 1 = static)
    pub fn code(&self) -> i64 {
        match self {
            Condition::Adaptive => 0,
            Condition::Static => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Condition::Adaptive),
            1 => Some(Condition::Static),
            _ => None,
        }
    }

    /// Alternation rule: the n-th participant (0-based count) gets arm `n mod 2`
    pub fn from_slot(count: u64) -> Self {
        if count % 2 == 0 {
            Condition::Adaptive
        } else {
            Condition::Static
        }
    }

    /// Accepts labels ("adaptive"/"static", any case) and numeric codes ("0"/"1")
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("adaptive") {
            return Some(Condition::Adaptive);
        }
        if s.eq_ignore_ascii_case("static") {
            return Some(Condition::Static);
        }
        s.parse::<i64>().ok().and_then(Self::from_code)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique participant id, `"{worker_id}:{assignment_id}"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_worker_assignment(worker_id: &str, assignment_id: &str) -> Self {
        Self(format!("{}:{}", worker_id.trim(), assignment_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits back into (worker_id, assignment_id) when the id has that shape
    pub fn worker_assignment(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Pending,
    InProgress,
    Completed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Pending => "pending",
            ParticipantStatus::InProgress => "in_progress",
            ParticipantStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ParticipantStatus::Pending),
            "in_progress" => Some(ParticipantStatus::InProgress),
            "completed" => Some(ParticipantStatus::Completed),
            _ => None,
        }
    }

    /// The later of two statuses
    pub fn advance(self, next: ParticipantStatus) -> ParticipantStatus {
        self.max(next)
    }
}

/// One opaque entry of a participant's append-only log, exactly as received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub sequence_index: u64,
    /// Milliseconds since the unix epoch, when the source recorded one
    pub timestamp_ms: Option<i64>,
    pub payload: String,
}

impl RawEvent {
    pub fn new(sequence_index: u64, timestamp_ms: Option<i64>, payload: impl Into<String>) -> Self {
        Self {
            sequence_index,
            timestamp_ms,
            payload: payload.into(),
        }
    }
}

/// Everything the store holds for one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub condition: Option<Condition>,
    /// Participant count observed when this participant was created
    pub assignment_slot: Option<u64>,
    pub status: ParticipantStatus,
    pub bonus: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub events: Vec<RawEvent>,
    pub questionnaire: QuestionnaireResponse,
}

impl ParticipantSnapshot {
    /// A participant reconstructed from feed files, with no store-side metadata
    pub fn from_feeds(
        id: ParticipantId,
        events: Vec<RawEvent>,
        questionnaire: QuestionnaireResponse,
    ) -> Self {
        Self {
            id,
            condition: None,
            assignment_slot: None,
            status: ParticipantStatus::Pending,
            bonus: 0.0,
            created_at: None,
            events,
            questionnaire,
        }
    }
}

/// Fields the inline session path may change after creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantUpdate {
    pub bonus: Option<f64>,
    pub status: Option<ParticipantStatus>,
}
