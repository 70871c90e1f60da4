//! In-process participant store.
//!
//! One mutex guards the whole map, so create-with-count is trivially atomic.
//! The store can be taken offline to exercise the unavailable-store path.

use super::{Creation, ParticipantStore, StoreError, StoreResult};
use crate::models::{
    Condition, ParticipantId, ParticipantSnapshot, ParticipantStatus, ParticipantUpdate,
    QuestionnaireResponse, RawEvent,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct MemoryParticipantStore {
    participants: Mutex<BTreeMap<ParticipantId, ParticipantSnapshot>>,
    offline: AtomicBool,
}

impl MemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with already-built snapshots (e.g. from feed files)
    pub fn with_participants(participants: impl IntoIterator<Item = ParticipantSnapshot>) -> Self {
        let store = Self::new();
        {
            let mut map = store.participants.lock();
            for p in participants {
                map.insert(p.id.clone(), p);
            }
        }
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ParticipantStore for MemoryParticipantStore {
    fn get(&self, id: &ParticipantId) -> StoreResult<Option<ParticipantSnapshot>> {
        self.check_online()?;
        Ok(self.participants.lock().get(id).cloned())
    }

    fn get_all(&self) -> StoreResult<Vec<ParticipantSnapshot>> {
        self.check_online()?;
        Ok(self.participants.lock().values().cloned().collect())
    }

    fn atomic_create_with_count(
        &self,
        id: &ParticipantId,
        assign: &dyn Fn(u64) -> Condition,
    ) -> StoreResult<Creation> {
        self.check_online()?;
        let mut map = self.participants.lock();
        if let Some(existing) = map.get(id) {
            return Ok(Creation::Existing(existing.clone()));
        }

        let slot = map.len() as u64;
        let condition = assign(slot);
        map.insert(
            id.clone(),
            ParticipantSnapshot {
                id: id.clone(),
                condition: Some(condition),
                assignment_slot: Some(slot),
                status: ParticipantStatus::Pending,
                bonus: 0.0,
                created_at: Some(Utc::now()),
                events: Vec::new(),
                questionnaire: QuestionnaireResponse::new(),
            },
        );
        Ok(Creation::Created { slot, condition })
    }

    fn append_events(&self, id: &ParticipantId, events: &[RawEvent]) -> StoreResult<usize> {
        self.check_online()?;
        let mut map = self.participants.lock();
        let participant = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let mut inserted = 0;
        for event in events {
            let present = participant
                .events
                .iter()
                .any(|e| e.sequence_index == event.sequence_index);
            if !present {
                participant.events.push(event.clone());
                inserted += 1;
            }
        }
        participant.events.sort_by_key(|e| e.sequence_index);
        Ok(inserted)
    }

    fn record_questionnaire(
        &self,
        id: &ParticipantId,
        answers: &QuestionnaireResponse,
    ) -> StoreResult<()> {
        self.check_online()?;
        let mut map = self.participants.lock();
        let participant = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        participant
            .questionnaire
            .extend(answers.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn update(&self, id: &ParticipantId, update: &ParticipantUpdate) -> StoreResult<()> {
        self.check_online()?;
        let mut map = self.participants.lock();
        let participant = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(bonus) = update.bonus {
            participant.bonus = bonus;
        }
        if let Some(status) = update.status {
            participant.status = status;
        }
        Ok(())
    }
}
