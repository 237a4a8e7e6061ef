use counsel_common::{Error, Result};
use rusqlite::{Connection, params};
use tracing::info;

/// A versioned schema change, applied once and recorded in `_migrations`.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const COUNSEL_SCHEMA_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE,
    user_name TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS counsel_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    user_input TEXT NOT NULL,
    answer TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_user
    ON counsel_history(user_id, id);

CREATE TABLE IF NOT EXISTS counsel_summary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_summary_user
    ON counsel_summary(user_id, id);
";

pub const COUNSEL_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "counsel_schema_v1",
    sql: COUNSEL_SCHEMA_V1_SQL,
};

pub const MIGRATIONS: &[Migration] = &[COUNSEL_SCHEMA_V1];

/// Apply every migration newer than the recorded version.
pub fn apply(conn: &Connection, migrations: &[Migration]) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create migrations table: {e}")))?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
            row.get(0)
        })
        .map_err(|e| Error::Database(format!("failed to read schema version: {e}")))?;

    for migration in migrations.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .map_err(|e| Error::Database(format!("migration {} failed: {e}", migration.name)))?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )
        .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
        info!("applied migration {} ({})", migration.version, migration.name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn, MIGRATIONS).unwrap();
        apply(&conn, MIGRATIONS).unwrap();

        let recorded: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(recorded, 1);
    }
}
