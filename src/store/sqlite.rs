//! SQLite-backed participant store
//!
//! - WAL mode so analysis reads do not block live writes
//! - `BEGIN IMMEDIATE` for participant creation: the write lock is held before
//!   the count is read, which serializes concurrent first contacts across
//!   connections and processes
//! - busy timeout so contending writers wait instead of failing fast

use super::{Creation, ParticipantStore, StoreError, StoreResult};
use crate::models::{
    Condition, ParticipantId, ParticipantSnapshot, ParticipantStatus, ParticipantUpdate,
    QuestionnaireResponse, RawEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS participants (
    uniqueid TEXT PRIMARY KEY,
    worker_id TEXT,
    assignment_id TEXT,
    cond INTEGER NOT NULL,
    assignment_slot INTEGER NOT NULL UNIQUE,
    status TEXT NOT NULL,
    bonus REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS participant_events (
    participant_id TEXT NOT NULL REFERENCES participants(uniqueid),
    sequence_index INTEGER NOT NULL,
    timestamp_ms INTEGER,
    payload TEXT NOT NULL,
    PRIMARY KEY (participant_id, sequence_index)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS participant_questions (
    participant_id TEXT NOT NULL REFERENCES participants(uniqueid),
    question_key TEXT NOT NULL,
    response_value TEXT NOT NULL,
    PRIMARY KEY (participant_id, question_key)
) WITHOUT ROWID;
"#;

const SELECT_PARTICIPANT: &str = "SELECT uniqueid, cond, assignment_slot, status, bonus, created_at
     FROM participants";

/// Participant store over a single SQLite connection
#[derive(Clone)]
pub struct SqliteParticipantStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteParticipantStore {
    /// Opens (creating if needed) the database at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = db_path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened participant store");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn load_one(conn: &Connection, id: &ParticipantId) -> StoreResult<Option<ParticipantSnapshot>> {
        let row = conn
            .query_row(
                &format!("{} WHERE uniqueid = ?1", SELECT_PARTICIPANT),
                params![id.as_str()],
                read_participant_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut snapshot = row.into_snapshot()?;

        let mut stmt = conn.prepare_cached(
            "SELECT sequence_index, timestamp_ms, payload FROM participant_events
             WHERE participant_id = ?1 ORDER BY sequence_index ASC",
        )?;
        snapshot.events = stmt
            .query_map(params![id.as_str()], read_event_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT question_key, response_value FROM participant_questions
             WHERE participant_id = ?1",
        )?;
        snapshot.questionnaire = stmt
            .query_map(params![id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<QuestionnaireResponse, _>>()?;

        Ok(Some(snapshot))
    }
}

impl ParticipantStore for SqliteParticipantStore {
    fn get(&self, id: &ParticipantId) -> StoreResult<Option<ParticipantSnapshot>> {
        let conn = self.conn.lock();
        Self::load_one(&conn, id)
    }

    fn get_all(&self) -> StoreResult<Vec<ParticipantSnapshot>> {
        let conn = self.conn.lock();

        let mut participants: BTreeMap<String, ParticipantSnapshot> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(&format!("{} ORDER BY uniqueid ASC", SELECT_PARTICIPANT))?;
            let rows = stmt.query_map([], read_participant_row)?;
            for row in rows {
                let snapshot = row?.into_snapshot()?;
                participants.insert(snapshot.id.as_str().to_string(), snapshot);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT participant_id, sequence_index, timestamp_ms, payload FROM participant_events
                 ORDER BY participant_id ASC, sequence_index ASC",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let pid: String = row.get(0)?;
                let event = RawEvent {
                    sequence_index: row.get::<_, i64>(1)? as u64,
                    timestamp_ms: row.get(2)?,
                    payload: row.get(3)?,
                };
                if let Some(p) = participants.get_mut(&pid) {
                    p.events.push(event);
                }
            }
        }

        {
            let mut stmt = conn
                .prepare("SELECT participant_id, question_key, response_value FROM participant_questions")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let pid: String = row.get(0)?;
                if let Some(p) = participants.get_mut(&pid) {
                    p.questionnaire.insert(row.get(1)?, row.get(2)?);
                }
            }
        }

        debug!(participants = participants.len(), "Loaded store snapshot");
        Ok(participants.into_values().collect())
    }

    fn atomic_create_with_count(
        &self,
        id: &ParticipantId,
        assign: &dyn Fn(u64) -> Condition,
    ) -> StoreResult<Creation> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::load_one(&tx, id)? {
            tx.commit()?;
            return Ok(Creation::Existing(existing));
        }

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM participants", [], |row| row.get(0))?;
        let slot = count as u64;
        let condition = assign(slot);
        let (worker_id, assignment_id) = match id.worker_assignment() {
            Some((w, a)) => (Some(w), Some(a)),
            None => (None, None),
        };

        tx.execute(
            "INSERT INTO participants
                (uniqueid, worker_id, assignment_id, cond, assignment_slot, status, bonus, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                id.as_str(),
                worker_id,
                assignment_id,
                condition.code(),
                count,
                ParticipantStatus::Pending.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        debug!(participant = %id, slot, %condition, "Created participant");
        Ok(Creation::Created { slot, condition })
    }

    fn append_events(&self, id: &ParticipantId, events: &[RawEvent]) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_exists(&tx, id)?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO participant_events
                    (participant_id, sequence_index, timestamp_ms, payload)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    id.as_str(),
                    event.sequence_index as i64,
                    event.timestamp_ms,
                    event.payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn record_questionnaire(
        &self,
        id: &ParticipantId,
        answers: &QuestionnaireResponse,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_exists(&tx, id)?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO participant_questions (participant_id, question_key, response_value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(participant_id, question_key) DO UPDATE SET
                    response_value = excluded.response_value",
            )?;
            for (key, value) in answers {
                stmt.execute(params![id.as_str(), key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update(&self, id: &ParticipantId, update: &ParticipantUpdate) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE participants SET
                bonus = COALESCE(?2, bonus),
                status = COALESCE(?3, status)
             WHERE uniqueid = ?1",
            params![
                id.as_str(),
                update.bonus,
                update.status.map(|s| s.as_str()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// ROW DECODING
// =============================================================================

struct ParticipantRow {
    id: String,
    cond: i64,
    slot: i64,
    status: String,
    bonus: f64,
    created_at: String,
}

impl ParticipantRow {
    fn into_snapshot(self) -> StoreResult<ParticipantSnapshot> {
        let condition = Condition::from_code(self.cond).ok_or_else(|| {
            StoreError::Corrupt(format!("{}: condition code {}", self.id, self.cond))
        })?;
        let status = ParticipantStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("{}: status {:?}", self.id, self.status))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));

        Ok(ParticipantSnapshot {
            id: ParticipantId::new(self.id),
            condition: Some(condition),
            assignment_slot: Some(self.slot as u64),
            status,
            bonus: self.bonus,
            created_at,
            events: Vec::new(),
            questionnaire: QuestionnaireResponse::new(),
        })
    }
}

fn read_participant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        cond: row.get(1)?,
        slot: row.get(2)?,
        status: row.get(3)?,
        bonus: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        sequence_index: row.get::<_, i64>(0)? as u64,
        timestamp_ms: row.get(1)?,
        payload: row.get(2)?,
    })
}

fn ensure_exists(conn: &Connection, id: &ParticipantId) -> StoreResult<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM participants WHERE uniqueid = ?1",
            params![id.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64, payload: &str) -> RawEvent {
        RawEvent::new(seq, Some(1_700_000_000_000 + seq as i64), payload)
    }

    #[test]
    fn test_create_then_existing() {
        let store = SqliteParticipantStore::open_in_memory().unwrap();
        let id = ParticipantId::new("W1:A1");

        let first = store
            .atomic_create_with_count(&id, &Condition::from_slot)
            .unwrap();
        assert_eq!(
            first,
            Creation::Created {
                slot: 0,
                condition: Condition::Adaptive
            }
        );

        match store
            .atomic_create_with_count(&id, &Condition::from_slot)
            .unwrap()
        {
            Creation::Existing(snapshot) => {
                assert_eq!(snapshot.condition, Some(Condition::Adaptive));
                assert_eq!(snapshot.assignment_slot, Some(0));
                assert_eq!(snapshot.status, ParticipantStatus::Pending);
                assert!(snapshot.created_at.is_some());
            }
            other => panic!("expected existing participant, got {:?}", other),
        }

        let second = store
            .atomic_create_with_count(&ParticipantId::new("W2:A2"), &Condition::from_slot)
            .unwrap();
        assert_eq!(
            second,
            Creation::Created {
                slot: 1,
                condition: Condition::Static
            }
        );
    }

    #[test]
    fn test_append_ignores_replayed_sequence_indices() {
        let store = SqliteParticipantStore::open_in_memory().unwrap();
        let id = ParticipantId::new("W1:A1");
        store
            .atomic_create_with_count(&id, &Condition::from_slot)
            .unwrap();

        let events = vec![event(1, "{}"), event(0, "{\"phase\": \"TEST\"}")];
        assert_eq!(store.append_events(&id, &events).unwrap(), 2);
        assert_eq!(store.append_events(&id, &events).unwrap(), 0);

        let snapshot = store.get(&id).unwrap().unwrap();
        let order: Vec<u64> = snapshot.events.iter().map(|e| e.sequence_index).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(snapshot.events[0].timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_questionnaire_upserts_by_key() {
        let store = SqliteParticipantStore::open_in_memory().unwrap();
        let id = ParticipantId::new("W1:A1");
        store
            .atomic_create_with_count(&id, &Condition::from_slot)
            .unwrap();

        let mut answers = QuestionnaireResponse::new();
        answers.insert("age".to_string(), "30".to_string());
        answers.insert("gender".to_string(), "female".to_string());
        store.record_questionnaire(&id, &answers).unwrap();

        let mut later = QuestionnaireResponse::new();
        later.insert("age".to_string(), "31".to_string());
        store.record_questionnaire(&id, &later).unwrap();

        let snapshot = store.get(&id).unwrap().unwrap();
        assert_eq!(snapshot.questionnaire["age"], "31");
        assert_eq!(snapshot.questionnaire["gender"], "female");
    }

    #[test]
    fn test_writes_to_unknown_participant_are_not_found() {
        let store = SqliteParticipantStore::open_in_memory().unwrap();
        let id = ParticipantId::new("nobody:x");

        assert!(matches!(
            store.append_events(&id, &[event(0, "{}")]),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update(&id, &ParticipantUpdate::default()),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let store = SqliteParticipantStore::open_in_memory().unwrap();
        let id = ParticipantId::new("W1:A1");
        store
            .atomic_create_with_count(&id, &Condition::from_slot)
            .unwrap();

        store
            .update(
                &id,
                &ParticipantUpdate {
                    bonus: Some(0.14),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update(
                &id,
                &ParticipantUpdate {
                    status: Some(ParticipantStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();

        let snapshot = store.get(&id).unwrap().unwrap();
        assert_eq!(snapshot.bonus, 0.14);
        assert_eq!(snapshot.status, ParticipantStatus::Completed);
    }

    #[test]
    fn test_get_all_is_ordered_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("participants.db");

        {
            let store = SqliteParticipantStore::open(&path).unwrap();
            for id in ["W3:A3", "W1:A1", "W2:A2"] {
                let id = ParticipantId::new(id);
                store
                    .atomic_create_with_count(&id, &Condition::from_slot)
                    .unwrap();
                store.append_events(&id, &[event(0, "{}")]).unwrap();
            }
        }

        let reopened = SqliteParticipantStore::open(&path).unwrap();
        let all = reopened.get_all().unwrap();
        let ids: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["W1:A1", "W2:A2", "W3:A3"]);
        assert!(all.iter().all(|p| p.events.len() == 1));
        assert_eq!(all[2].assignment_slot, Some(0));
    }

    #[test]
    fn test_undecodable_condition_is_corrupt() {
        let store = SqliteParticipantStore::open_in_memory().unwrap();
        let id = ParticipantId::new("W1:A1");
        store
            .atomic_create_with_count(&id, &Condition::from_slot)
            .unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE participants SET cond = 7", [])
            .unwrap();

        assert!(matches!(store.get(&id), Err(StoreError::Corrupt(_))));
    }
}
