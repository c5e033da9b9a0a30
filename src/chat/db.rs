use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use super::models::{NewTurn, Role, Turn};
use crate::errors::StoreError;

/// Async-safe handle to the session store.
///
/// Wraps `SessionStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<SessionStore>>,
}

impl StoreHandle {
    pub fn new(store: SessionStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&SessionStore) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    pub async fn append(&self, turn: NewTurn) -> Result<Turn, StoreError> {
        self.call(move |store| store.append(&turn)).await
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |store| store.history(&session_id)).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        self.call(|store| store.list_sessions()).await
    }

    pub async fn create_session(&self, session_id: &str) -> Result<Turn, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |store| store.create_session(&session_id)).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |store| store.delete_session(&session_id)).await
    }
}

/// Append-only log of turns, one SQLite table keyed by `session_id`.
pub struct SessionStore {
    conn: Connection,
}

struct TurnRow {
    id: i64,
    session_id: String,
    role: String,
    content: String,
    created_at: String,
}

impl TurnRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_turn(self) -> Result<Turn, StoreError> {
        let role = self.role.parse::<Role>().map_err(|_| StoreError::CorruptRow {
            id: self.id,
            field: "role",
            value: self.role.clone(),
        })?;
        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| StoreError::CorruptRow {
            id: self.id,
            field: "created_at",
            value: self.created_at.clone(),
        })?;
        Ok(Turn {
            id: self.id,
            session_id: self.session_id,
            role,
            content: self.content,
            created_at,
        })
    }
}

/// Fixed-width RFC 3339 with milliseconds, so text order is time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl SessionStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".into(),
            source,
        })?;
        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS turns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                    content TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, created_at, id);
                ",
            )
            .map_err(StoreError::Migration)
    }

    // ── Turns ─────────────────────────────────────────────────────────

    /// Insert a turn, assigning `id` and `created_at`.
    ///
    /// `created_at` never goes backwards within a session: if the wall clock
    /// reads earlier than the session's newest turn, that turn's timestamp is
    /// reused and `id` breaks the tie.
    pub fn append(&self, turn: &NewTurn) -> Result<Turn, StoreError> {
        let now = format_timestamp(Utc::now());
        let (id, created_at): (i64, String) = self.conn.query_row(
            "INSERT INTO turns (session_id, role, content, created_at)
             SELECT ?1, ?2, ?3, MAX(?4, COALESCE((SELECT MAX(created_at) FROM turns WHERE session_id = ?1), ?4))
             RETURNING id, created_at",
            params![turn.session_id, turn.role.as_str(), turn.content, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        TurnRow {
            id,
            session_id: turn.session_id.clone(),
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
            created_at,
        }
        .into_turn()
    }

    /// All turns of a session, oldest first. Unknown sessions yield an empty list.
    pub fn history(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, role, content, created_at
             FROM turns WHERE session_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], TurnRow::from_row)?;
        let mut turns = Vec::new();
        for row in rows {
            turns.push(row?.into_turn()?);
        }
        Ok(turns)
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT session_id FROM turns ORDER BY session_id DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Make a session enumerable before it has any real messages by storing an
    /// empty assistant turn. Repeated calls store repeated placeholders.
    pub fn create_session(&self, session_id: &str) -> Result<Turn, StoreError> {
        self.append(&NewTurn::assistant(session_id, ""))
    }

    /// Remove every turn of the session. Returns how many were deleted.
    pub fn delete_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM turns WHERE session_id = ?1", params![session_id])?;
        Ok(deleted)
    }
}
