//! Participant store
//!
//! The core reaches persistence only through [`ParticipantStore`]. Creation of
//! a new participant is a single read-count-then-insert operation owned by the
//! store, so two simultaneous first contacts can never observe the same count.

mod memory;
mod sqlite;

pub use memory::MemoryParticipantStore;
pub use sqlite::SqliteParticipantStore;

use crate::models::{
    Condition, ParticipantId, ParticipantSnapshot, ParticipantUpdate, QuestionnaireResponse,
    RawEvent,
};
use std::fmt;

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic create attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Creation {
    /// This call created the participant; `slot` is the count it observed
    Created { slot: u64, condition: Condition },
    /// The participant already existed (possibly created by a racing call)
    Existing(ParticipantSnapshot),
}

pub trait ParticipantStore: Send + Sync {
    fn get(&self, id: &ParticipantId) -> StoreResult<Option<ParticipantSnapshot>>;

    /// Every participant, ordered by id
    fn get_all(&self) -> StoreResult<Vec<ParticipantSnapshot>>;

    /// Atomically: if `id` is absent, read the participant count, derive the
    /// condition with `assign`, and insert the participant in `pending` state.
    fn atomic_create_with_count(
        &self,
        id: &ParticipantId,
        assign: &dyn Fn(u64) -> Condition,
    ) -> StoreResult<Creation>;

    /// Appends to the participant's raw log. Entries whose sequence index is
    /// already present are ignored, so replays are harmless.
    fn append_events(&self, id: &ParticipantId, events: &[RawEvent]) -> StoreResult<usize>;

    /// Upserts questionnaire answers key by key
    fn record_questionnaire(
        &self,
        id: &ParticipantId,
        answers: &QuestionnaireResponse,
    ) -> StoreResult<()>;

    fn update(&self, id: &ParticipantId, update: &ParticipantUpdate) -> StoreResult<()>;
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub enum StoreError {
    /// The store cannot be reached; fatal to an analysis run
    Unavailable(String),
    /// Lock contention that outlived the busy timeout; safe to retry
    Busy(String),
    NotFound(ParticipantId),
    Sqlite(rusqlite::Error),
    /// A stored value that does not decode (bad status or condition code)
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Participant store unavailable: {}", e),
            Self::Busy(e) => write!(f, "Participant store busy: {}", e),
            Self::NotFound(id) => write!(f, "Participant not found: {}", id),
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Corrupt(e) => write!(f, "Corrupt participant record: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Busy(e.to_string())
            }
            Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Sqlite(e),
        }
    }
}
