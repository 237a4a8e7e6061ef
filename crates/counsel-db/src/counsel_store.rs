use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use counsel_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::migrations;

/// Placeholder stored when name discovery ran but found no name.
pub const UNKNOWN_USER_NAME: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub user_name: Option<String>,
}

impl UserRecord {
    /// The stored name, unless it is unset or the sentinel.
    pub fn known_name(&self) -> Option<&str> {
        self.user_name
            .as_deref()
            .filter(|name| !name.is_empty() && *name != UNKNOWN_USER_NAME)
    }
}

/// One persisted user/assistant exchange.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub user_id: String,
    pub user_input: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent storage for counseling users, raw turns and rolling summaries.
///
/// The connection sits behind a mutex so the store can be shared across
/// connection tasks; calls are short and never held across an await point.
pub struct CounselStore {
    conn: Mutex<Connection>,
}

impl CounselStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening counsel store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrations::apply(&conn, migrations::MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("store connection lock poisoned".to_string()))
    }

    /// Create the user row if absent. Returns `true` when a row was inserted.
    pub fn ensure_user(&self, user_id: &str) -> Result<bool> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO users (user_id) VALUES (?1)",
                params![user_id],
            )
            .map_err(|e| Error::Database(format!("failed to ensure user: {e}")))?;
        if inserted > 0 {
            info!(user_id, "created user record");
        }
        Ok(inserted > 0)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        self.conn()?
            .query_row(
                "SELECT user_id, user_name FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        user_id: row.get(0)?,
                        user_name: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load user: {e}")))
    }

    /// Overwrite the stored name. Creates the user row if it does not exist yet.
    pub fn set_user_name(&self, user_id: &str, user_name: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO users (user_id, user_name) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET user_name = excluded.user_name",
                params![user_id, user_name],
            )
            .map_err(|e| Error::Database(format!("failed to set user name: {e}")))?;
        Ok(())
    }

    pub fn append_history(&self, user_id: &str, user_input: &str, answer: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO counsel_history (user_id, user_input, answer, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, user_input, answer, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to append history: {e}")))?;
        debug!(user_id, "persisted counsel history row");
        Ok(())
    }

    /// Load the most recent history rows for a user in chronological order.
    pub fn load_recent_history(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, user_input, answer, created_at
                 FROM counsel_history
                 WHERE user_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let created_raw: String = row.get(3)?;
                Ok(HistoryRow {
                    user_id: row.get(0)?,
                    user_input: row.get(1)?,
                    answer: row.get(2)?,
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load history: {e}")))?;

        let mut history = Vec::new();
        for row in rows {
            history.push(
                row.map_err(|e| Error::Database(format!("failed to read history row: {e}")))?,
            );
        }

        // Query is DESC for efficient tail fetch; return in chronological order.
        history.reverse();
        Ok(history)
    }

    pub fn count_history(&self, user_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM counsel_history WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count history: {e}")))?;
        Ok(count as usize)
    }

    /// Append a summary row. Earlier summaries are never touched.
    pub fn insert_summary(&self, user_id: &str, content: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO counsel_summary (user_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, content, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to insert summary: {e}")))?;
        Ok(())
    }

    /// The active summary: the most recently inserted row for the user.
    pub fn latest_summary(&self, user_id: &str) -> Result<Option<SummaryRow>> {
        self.conn()?
            .query_row(
                "SELECT user_id, content, created_at
                 FROM counsel_summary
                 WHERE user_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                params![user_id],
                summary_from_row,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load latest summary: {e}")))
    }

    /// Every summary for a user, oldest first.
    pub fn list_summaries(&self, user_id: &str) -> Result<Vec<SummaryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, content, created_at
                 FROM counsel_summary
                 WHERE user_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare summary query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], summary_from_row)
            .map_err(|e| Error::Database(format!("failed to list summaries: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read summary row: {e}")))
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SummaryRow> {
    let created_raw: String = row.get(2)?;
    Ok(SummaryRow {
        user_id: row.get(0)?,
        content: row.get(1)?,
        created_at: parse_timestamp(&created_raw),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
