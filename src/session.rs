//! Inline entry points used while a participant is taking the study

use crate::assignment::{AssignmentConfig, ConditionAssignor};
use crate::dataset::status_from_log;
use crate::ingest::{assigned_condition, parse_log, parse_record, trial_condition};
use crate::metrics::{self, BonusPolicy};
use crate::models::{
    Condition, ParticipantId, ParticipantSnapshot, ParticipantStatus, ParticipantUpdate,
    QuestionnaireResponse, RawEvent,
};
use crate::store::{ParticipantStore, StoreError, StoreResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of appending to a participant's log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvents {
    /// Lifecycle status after the append
    pub status: ParticipantStatus,
    /// Entries newly stored (replayed sequence indices are not counted)
    pub inserted: usize,
    /// Assignment events naming a different arm than the stored one; dropped
    pub conflicting_assignments: usize,
}

pub struct StudySession {
    store: Arc<dyn ParticipantStore>,
    assignor: ConditionAssignor,
    bonus: BonusPolicy,
}

impl StudySession {
    pub fn new(
        store: Arc<dyn ParticipantStore>,
        assignment: AssignmentConfig,
        bonus: BonusPolicy,
    ) -> Self {
        Self {
            assignor: ConditionAssignor::new(store.clone(), assignment),
            store,
            bonus,
        }
    }

    pub fn store(&self) -> &Arc<dyn ParticipantStore> {
        &self.store
    }

    pub fn assignor(&self) -> &ConditionAssignor {
        &self.assignor
    }

    pub fn assign_condition(&self, worker_id: &str, assignment_id: &str) -> StoreResult<Condition> {
        self.assignor.assign_condition(worker_id, assignment_id)
    }

    /// Recomputes the bonus from the full log and stores it. Calling this
    /// repeatedly always stores the same value.
    pub fn compute_bonus(&self, id: &ParticipantId) -> StoreResult<f64> {
        let snapshot = self.load(id)?;
        let records = parse_log(&snapshot.events).records;
        let bonus = metrics::aggregate(&records, &self.bonus).bonus;

        self.store.update(
            id,
            &ParticipantUpdate {
                bonus: Some(bonus),
                ..Default::default()
            },
        )?;
        debug!(participant = %id, bonus, "Bonus recomputed");
        Ok(bonus)
    }

    /// Appends to the log and moves the lifecycle forward. Assignment events
    /// that contradict the stored arm are dropped and counted.
    pub fn record_events(
        &self,
        id: &ParticipantId,
        events: &[RawEvent],
    ) -> StoreResult<RecordedEvents> {
        let stored = self.load(id)?.condition;
        let accepted: Vec<RawEvent> = events
            .iter()
            .filter(|event| !names_other_arm(event, stored))
            .cloned()
            .collect();
        let conflicting_assignments = events.len() - accepted.len();
        if conflicting_assignments > 0 {
            warn!(
                participant = %id,
                conflicting_assignments,
                "Dropped assignment events that contradict the stored condition"
            );
        }

        let inserted = self.store.append_events(id, &accepted)?;
        let snapshot = self.load(id)?;
        let records = parse_log(&snapshot.events).records;
        let status = snapshot.status.advance(status_from_log(&records));

        if status != snapshot.status {
            self.store.update(
                id,
                &ParticipantUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )?;
            info!(participant = %id, status = status.as_str(), "Participant status advanced");
        }
        debug!(participant = %id, inserted, "Recorded events");
        Ok(RecordedEvents {
            status,
            inserted,
            conflicting_assignments,
        })
    }

    pub fn record_questionnaire(
        &self,
        id: &ParticipantId,
        answers: &QuestionnaireResponse,
    ) -> StoreResult<()> {
        self.store.record_questionnaire(id, answers)
    }

    /// Brings an externally collected participant (feed files, datastrings)
    /// into the store: assign or look up, append the log, record answers,
    /// settle the bonus. A new participant is stored under the arm its log
    /// names; an existing one keeps its stored arm. Returns that arm.
    pub fn import_participant(&self, snapshot: &ParticipantSnapshot) -> StoreResult<Condition> {
        let records = parse_log(&snapshot.events).records;
        let logged = assigned_condition(&records).or_else(|| trial_condition(&records));
        let condition = self.assignor.assign_or_lookup_as(&snapshot.id, logged)?;

        if !snapshot.events.is_empty() {
            self.record_events(&snapshot.id, &snapshot.events)?;
        }
        if !snapshot.questionnaire.is_empty() {
            self.record_questionnaire(&snapshot.id, &snapshot.questionnaire)?;
        }
        self.compute_bonus(&snapshot.id)?;
        Ok(condition)
    }

    fn load(&self, id: &ParticipantId) -> StoreResult<ParticipantSnapshot> {
        self.store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

fn names_other_arm(event: &RawEvent, stored: Option<Condition>) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    match parse_record(event) {
        Ok(parsed) => matches!(
            assigned_condition(std::slice::from_ref(&parsed.record)),
            Some(named) if named != stored
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryParticipantStore, SqliteParticipantStore};

    fn trial(seq: u64, correct: bool) -> RawEvent {
        RawEvent::new(
            seq,
            None,
            format!(
                r#"{{"phase": "TEST", "trial_index": {}, "question_id": "q{}", "correct": {}}}"#,
                seq, seq, correct
            ),
        )
    }

    fn session(store: Arc<dyn ParticipantStore>) -> StudySession {
        StudySession::new(store, AssignmentConfig::default(), BonusPolicy::default())
    }

    #[test]
    fn test_lifecycle_moves_forward_only() {
        let store = Arc::new(MemoryParticipantStore::new());
        let s = session(store.clone());
        let id = ParticipantId::new("W1:A1");

        s.assign_condition("W1", "A1").unwrap();
        assert_eq!(
            store.get(&id).unwrap().unwrap().status,
            ParticipantStatus::Pending
        );

        let status = s.record_events(&id, &[trial(0, true)]).unwrap().status;
        assert_eq!(status, ParticipantStatus::InProgress);

        let submit = RawEvent::new(1, None, r#"{"phase": "postquestionnaire", "status": "submit"}"#);
        assert_eq!(
            s.record_events(&id, &[submit]).unwrap().status,
            ParticipantStatus::Completed
        );

        // late events never move a completed participant back
        let status = s
            .record_events(&id, &[RawEvent::new(2, None, r#"{"phase": "FEEDBACK"}"#)])
            .unwrap()
            .status;
        assert_eq!(status, ParticipantStatus::Completed);
        assert_eq!(
            store.get(&id).unwrap().unwrap().status,
            ParticipantStatus::Completed
        );
    }

    #[test]
    fn test_compute_bonus_is_idempotent() {
        let store = Arc::new(SqliteParticipantStore::open_in_memory().unwrap());
        let s = session(store.clone());
        let id = ParticipantId::new("W1:A1");
        s.assign_condition("W1", "A1").unwrap();

        let events: Vec<RawEvent> = (0..10).map(|i| trial(i, i < 7)).collect();
        s.record_events(&id, &events).unwrap();

        let first = s.compute_bonus(&id).unwrap();
        let second = s.compute_bonus(&id).unwrap();

        assert!((first - 0.14).abs() < 1e-9);
        assert_eq!(first, second);
        assert_eq!(store.get(&id).unwrap().unwrap().bonus, first);
    }

    #[test]
    fn test_replayed_events_do_not_inflate_bonus() {
        let store = Arc::new(MemoryParticipantStore::new());
        let s = session(store);
        let id = ParticipantId::new("W1:A1");
        s.assign_condition("W1", "A1").unwrap();

        let events: Vec<RawEvent> = (0..3).map(|i| trial(i, true)).collect();
        assert_eq!(s.record_events(&id, &events).unwrap().inserted, 3);
        assert_eq!(s.record_events(&id, &events).unwrap().inserted, 0);

        assert!((s.compute_bonus(&id).unwrap() - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_bonus_for_unknown_participant_is_not_found() {
        let s = session(Arc::new(MemoryParticipantStore::new()));
        let err = s.compute_bonus(&ParticipantId::new("nobody:x")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_contradicting_assignment_event_is_dropped() {
        let store = Arc::new(SqliteParticipantStore::open_in_memory().unwrap());
        let s = session(store.clone());
        let id = ParticipantId::new("W1:A1");

        let first = s.assign_condition("W1", "A1").unwrap();
        assert_eq!(first, Condition::Adaptive);

        let recorded = s
            .record_events(
                &id,
                &[
                    RawEvent::new(0, None, r#"{"phase": "ASSIGNMENT", "condition": "static"}"#),
                    trial(1, true),
                ],
            )
            .unwrap();
        assert_eq!(recorded.conflicting_assignments, 1);
        assert_eq!(recorded.inserted, 1);

        // an assignment event agreeing with the stored arm is kept
        let agreeing = s
            .record_events(
                &id,
                &[RawEvent::new(2, None, "{'phase': 'ASSIGNMENT', 'condition': 'adaptive'}")],
            )
            .unwrap();
        assert_eq!(agreeing.conflicting_assignments, 0);
        assert_eq!(agreeing.inserted, 1);

        assert_eq!(s.assign_condition("W1", "A1").unwrap(), first);
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.condition, Some(first));
        assert_eq!(stored.events.len(), 2);
    }

    #[test]
    fn test_import_persists_the_logged_arm() {
        let store = Arc::new(MemoryParticipantStore::new());
        let s = session(store.clone());
        let mut answers = QuestionnaireResponse::new();
        answers.insert("age".to_string(), "31".to_string());
        let snapshot = ParticipantSnapshot::from_feeds(
            ParticipantId::new("W9:A9"),
            vec![
                RawEvent::new(0, None, r#"{"phase": "ASSIGNMENT", "condition": "static"}"#),
                trial(1, true),
            ],
            answers,
        );

        let condition = s.import_participant(&snapshot).unwrap();
        let stored = store.get(&snapshot.id).unwrap().unwrap();

        // slot 0 would alternate to adaptive; the log names static
        assert_eq!(condition, Condition::Static);
        assert_eq!(stored.condition, Some(Condition::Static));
        assert_eq!(stored.events.len(), 2);
        assert_eq!(stored.questionnaire["age"], "31");
        assert_eq!(stored.status, ParticipantStatus::InProgress);
        assert!((stored.bonus - 0.02).abs() < 1e-9);
        assert_eq!(s.assign_condition("W9", "A9").unwrap(), Condition::Static);
    }

    #[test]
    fn test_reimport_keeps_the_stored_arm() {
        let store = Arc::new(MemoryParticipantStore::new());
        let s = session(store.clone());
        let id = ParticipantId::new("W1:A1");
        assert_eq!(s.assign_condition("W1", "A1").unwrap(), Condition::Adaptive);

        let snapshot = ParticipantSnapshot::from_feeds(
            id.clone(),
            vec![
                RawEvent::new(0, None, r#"{"phase": "ASSIGNMENT", "condition": "static"}"#),
                trial(1, false),
            ],
            QuestionnaireResponse::new(),
        );

        assert_eq!(s.import_participant(&snapshot).unwrap(), Condition::Adaptive);
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.condition, Some(Condition::Adaptive));
        assert_eq!(stored.events.len(), 1);
    }
}
