//! Condition assignment
//!
//! New participants get arm `count mod 2`, where `count` is read inside the
//! store's create transaction. Existing participants keep whatever they were
//! given; nothing here ever rewrites a persisted condition.

use crate::ingest::{assigned_condition, parse_log};
use crate::models::{Condition, ParticipantId, ParticipantSnapshot, PREVIEW_ASSIGNMENT_ID};
use crate::store::{Creation, ParticipantStore, StoreError, StoreResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Attempts at the create transaction before contention is surfaced
    pub max_attempts: u32,
    /// Linear backoff step between attempts
    pub retry_backoff_ms: u64,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 20,
        }
    }
}

/// Preview sessions carry no real assignment id
pub fn is_preview(assignment_id: &str) -> bool {
    let id = assignment_id.trim();
    id.is_empty() || id == PREVIEW_ASSIGNMENT_ID
}

pub struct ConditionAssignor {
    store: Arc<dyn ParticipantStore>,
    config: AssignmentConfig,
}

impl ConditionAssignor {
    pub fn new(store: Arc<dyn ParticipantStore>, config: AssignmentConfig) -> Self {
        Self { store, config }
    }

    /// Condition for a recruitment-platform session. Previews get a random arm
    /// that is never persisted.
    pub fn assign_condition(&self, worker_id: &str, assignment_id: &str) -> StoreResult<Condition> {
        if is_preview(assignment_id) {
            let condition = if rand::thread_rng().gen_bool(0.5) {
                Condition::Adaptive
            } else {
                Condition::Static
            };
            debug!(worker = worker_id, %condition, "Preview session, condition not persisted");
            return Ok(condition);
        }
        self.assign_or_lookup(&ParticipantId::from_worker_assignment(worker_id, assignment_id))
    }

    /// Returns the participant's arm, creating the participant if needed
    pub fn assign_or_lookup(&self, id: &ParticipantId) -> StoreResult<Condition> {
        self.assign_or_lookup_as(id, None)
    }

    /// Like [`assign_or_lookup`](Self::assign_or_lookup), but a participant
    /// created here gets `preset` instead of the alternating arm. Used when an
    /// imported log already names the arm. An existing participant keeps its
    /// stored arm whatever `preset` says.
    pub fn assign_or_lookup_as(
        &self,
        id: &ParticipantId,
        preset: Option<Condition>,
    ) -> StoreResult<Condition> {
        if let Some(existing) = self.store.get(id)? {
            return existing_condition(&existing);
        }

        let assign = |slot: u64| preset.unwrap_or_else(|| Condition::from_slot(slot));
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.atomic_create_with_count(id, &assign) {
                Ok(Creation::Created { slot, condition }) => {
                    info!(participant = %id, slot, %condition, preset = preset.is_some(), "Assigned condition");
                    return Ok(condition);
                }
                Ok(Creation::Existing(existing)) => {
                    debug!(participant = %id, "Participant created by a concurrent request");
                    return existing_condition(&existing);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        participant = %id,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Assignment contended, retrying"
                    );
                    thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read-only lookup; `None` for unknown participants
    pub fn lookup(&self, id: &ParticipantId) -> StoreResult<Option<Condition>> {
        match self.store.get(id)? {
            Some(existing) => existing_condition(&existing).map(Some),
            None => Ok(None),
        }
    }
}

/// The stored arm is authoritative. The log is consulted only for snapshots
/// that were never assigned through a store (seeded from feed files).
fn existing_condition(snapshot: &ParticipantSnapshot) -> StoreResult<Condition> {
    if let Some(condition) = snapshot.condition {
        return Ok(condition);
    }
    let records = parse_log(&snapshot.events).records;
    assigned_condition(&records).ok_or_else(|| {
        StoreError::Corrupt(format!("participant {} has no condition", snapshot.id))
    })
}
