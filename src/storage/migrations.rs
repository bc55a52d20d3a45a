//! Versioned schema migrations, tracked in `schema_migrations`.

use rusqlite::{params, Connection};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations in order. New migrations go at the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_sessions_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                url TEXT,
                page_title TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                event_count INTEGER NOT NULL,
                has_snapshot INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);
        "#,
    },
    Migration {
        version: 2,
        name: "add_sessions_user_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);",
    },
];

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Highest recorded version, 0 for a fresh database.
fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

fn apply(conn: &mut Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![
            migration.version,
            migration.name,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    tx.commit()
}

/// Bring the schema up to date. Each migration runs in its own transaction;
/// a failure leaves earlier ones applied.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute(LEDGER_DDL, [])?;
    let current = current_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");
        apply(conn, migration).map_err(|e| {
            tracing::error!(version = migration.version, error = %e, "Migration failed");
            e
        })?;
    }
    Ok(())
}
