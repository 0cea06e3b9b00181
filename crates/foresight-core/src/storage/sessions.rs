//! SQLite-backed job record store.
//!
//! Every mutation runs inside one `IMMEDIATE` transaction: the row is loaded,
//! the transition is applied through the `TrainingSession::apply_*` methods and
//! the row is written back before the lock is released.

use chrono::{DateTime, SecondsFormat, Utc};
use foresight_orchestrator::store::{JobStore, StoreResult, note_transition};
use foresight_training::{
    EpochSnapshot, JobSpec, SessionId, TrainingMetrics, TrainingSession, TrainingStatus, Transition,
};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::storage::database::Database;
use crate::storage::error::StorageResult;

const SESSION_COLUMNS: &str = "session_id, spec_json, status, metrics_json, progress_json, error, \
                               created_at, started_at, updated_at, completed_at";

/// Formats timestamps at a fixed width so text order matches time order.
fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn optional_timestamp(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(timestamp)
}

fn invalid_column(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), rusqlite::types::Type::Text)
}

/// Parses a JSON column into a deserializable type.
///
/// # Errors
/// Returns a `rusqlite::Error::InvalidColumnType` if parsing fails.
fn parse_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: String = row.get(idx)?;
    serde_json::from_str(&json_str).map_err(|_| invalid_column(idx, column_name))
}

fn parse_optional_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: Option<String> = row.get(idx)?;
    json_str
        .map(|s| serde_json::from_str(&s).map_err(|_| invalid_column(idx, column_name)))
        .transpose()
}

fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let timestamp_str: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid_column(idx, column_name))
}

fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let timestamp_str: Option<String> = row.get(idx)?;
    timestamp_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid_column(idx, column_name))
        })
        .transpose()
}

fn row_to_session(row: &Row) -> rusqlite::Result<TrainingSession> {
    let session_id: String = row.get(0)?;
    let spec: JobSpec = parse_json_field(row, 1, "spec_json")?;
    let status: String = row.get(2)?;
    let status: TrainingStatus = status.parse().map_err(|_| invalid_column(2, "status"))?;

    Ok(TrainingSession {
        session_id: SessionId::from(session_id),
        spec,
        status,
        metrics: parse_optional_json_field(row, 3, "metrics_json")?,
        progress: parse_optional_json_field(row, 4, "progress_json")?,
        error: row.get(5)?,
        created_at: parse_timestamp(row, 6, "created_at")?,
        started_at: parse_optional_timestamp(row, 7, "started_at")?,
        updated_at: parse_timestamp(row, 8, "updated_at")?,
        completed_at: parse_optional_timestamp(row, 9, "completed_at")?,
    })
}

fn load(conn: &Connection, session_id: &SessionId) -> StorageResult<Option<TrainingSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM training_sessions WHERE session_id = ?1");
    let session = conn
        .query_row(&sql, params![session_id.as_str()], row_to_session)
        .optional()?;
    Ok(session)
}

fn insert(conn: &Connection, session: &TrainingSession) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO training_sessions (session_id, ticker, model_type, spec_json, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session.session_id.as_str(),
            session.spec.ticker,
            session.spec.model_type.as_str(),
            serde_json::to_string(&session.spec)?,
            session.status.as_str(),
            timestamp(&session.created_at),
            timestamp(&session.updated_at),
        ],
    )?;
    Ok(())
}

fn save(conn: &Connection, session: &TrainingSession) -> StorageResult<()> {
    let metrics = session.metrics.as_ref().map(serde_json::to_string).transpose()?;
    let progress = session.progress.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "UPDATE training_sessions
         SET status = ?2, metrics_json = ?3, progress_json = ?4, error = ?5,
             started_at = ?6, updated_at = ?7, completed_at = ?8
         WHERE session_id = ?1",
        params![
            session.session_id.as_str(),
            session.status.as_str(),
            metrics,
            progress,
            session.error,
            optional_timestamp(session.started_at.as_ref()),
            timestamp(&session.updated_at),
            optional_timestamp(session.completed_at.as_ref()),
        ],
    )?;
    Ok(())
}

/// Durable [`JobStore`] over a single SQLite connection.
#[derive(Debug)]
pub struct SqliteJobStore {
    db: Mutex<Database>,
}

impl SqliteJobStore {
    /// Wraps an opened database.
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Database::open(path).map(Self::new)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the connection.
    pub fn open_in_memory() -> StorageResult<Self> {
        Database::open_in_memory().map(Self::new)
    }

    /// Every stored session, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub fn list_all(&self) -> StorageResult<Vec<TrainingSession>> {
        let db = self.db();
        let sql = format!("SELECT {SESSION_COLUMNS} FROM training_sessions ORDER BY created_at DESC, rowid DESC");
        let mut stmt = db.conn().prepare(&sql)?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Deletes finished sessions created before `cutoff`. Returns how many were removed.
    ///
    /// Pending and running sessions are never removed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let removed = self.db().conn().execute(
            "DELETE FROM training_sessions WHERE created_at < ?1 AND status IN (?2, ?3, ?4)",
            params![
                timestamp(&cutoff),
                TrainingStatus::Completed.as_str(),
                TrainingStatus::Failed.as_str(),
                TrainingStatus::Cancelled.as_str(),
            ],
        )?;
        debug!(removed, cutoff = %cutoff, "training_sessions_purged");
        Ok(removed)
    }

    fn insert_or_fetch(&self, session_id: &SessionId, spec: &JobSpec) -> StorageResult<TrainingSession> {
        let mut db = self.db();
        let tx = db.conn_mut().transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = if let Some(existing) = load(&tx, session_id)? {
            existing
        } else {
            let session = TrainingSession::new(session_id.clone(), spec.clone());
            insert(&tx, &session)?;
            debug!(session_id = %session_id, "training_session_created");
            session
        };
        tx.commit()?;
        Ok(session)
    }

    fn active_count(&self) -> StorageResult<usize> {
        let count: i64 = self.db().conn().query_row(
            "SELECT COUNT(*) FROM training_sessions WHERE status = ?1",
            params![TrainingStatus::InProgress.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn active_sessions(&self) -> StorageResult<Vec<TrainingSession>> {
        let db = self.db();
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM training_sessions WHERE status = ?1 ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = db.conn().prepare(&sql)?;
        let sessions = stmt
            .query_map(params![TrainingStatus::InProgress.as_str()], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads, mutates and writes back one row inside a single transaction.
    fn modify<F>(&self, operation: &str, session_id: &SessionId, f: F) -> StorageResult<Transition>
    where
        F: FnOnce(&mut TrainingSession) -> Transition,
    {
        let mut db = self.db();
        let tx = db.conn_mut().transaction_with_behavior(TransactionBehavior::Immediate)?;
        let transition = match load(&tx, session_id)? {
            Some(mut session) => {
                let transition = f(&mut session);
                if transition.is_applied() {
                    save(&tx, &session)?;
                }
                transition
            }
            None => Transition::Missing,
        };
        tx.commit()?;
        drop(db);

        note_transition(operation, session_id, transition);
        Ok(transition)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, session_id: &SessionId, spec: &JobSpec) -> StoreResult<TrainingSession> {
        Ok(self.insert_or_fetch(session_id, spec)?)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<TrainingSession>> {
        Ok(load(self.db().conn(), session_id)?)
    }

    fn update_status(&self, session_id: &SessionId, status: TrainingStatus) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("update_status", session_id, |s| s.apply_status(status, now))?)
    }

    fn update_progress(&self, session_id: &SessionId, snapshot: &EpochSnapshot) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("update_progress", session_id, |s| {
            if s.apply_progress(snapshot.clone(), now) {
                Transition::Applied { from: s.status }
            } else {
                Transition::Rejected { current: s.status }
            }
        })?)
    }

    fn touch(&self, session_id: &SessionId) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("touch", session_id, |s| {
            if s.apply_heartbeat(now) {
                Transition::Applied { from: s.status }
            } else {
                Transition::Rejected { current: s.status }
            }
        })?)
    }

    fn complete(&self, session_id: &SessionId, metrics: &TrainingMetrics) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("complete", session_id, |s| s.apply_completion(metrics.clone(), now))?)
    }

    fn fail(&self, session_id: &SessionId, reason: &str) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("fail", session_id, |s| s.apply_failure(reason, now))?)
    }

    fn count_active(&self) -> StoreResult<usize> {
        Ok(self.active_count()?)
    }

    fn list_active(&self) -> StoreResult<Vec<TrainingSession>> {
        Ok(self.active_sessions()?)
    }
}
