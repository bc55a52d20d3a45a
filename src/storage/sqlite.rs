//! SQLite session store

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{migrations, StorageAdapter, StorageError};
use crate::session::{RecordingSession, SessionSummary};

/// Sessions as JSON payloads plus indexed summary columns.
///
/// rusqlite is blocking, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    /// Path to the database file (`None` for in-memory stores)
    pub path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open or create a database at the specified path
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::CreateDir)?;
        }

        let mut conn = Connection::open(&path)?;
        migrations::run_migrations(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open the store in the default location (~/.pagetape/sessions.db)
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(crate::util::database_path())
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await?
    }

    fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
        let id: String = row.get(0)?;
        let start_time: String = row.get(4)?;
        let end_time: Option<String> = row.get(5)?;
        let event_count: i64 = row.get(6)?;
        let has_snapshot: i64 = row.get(7)?;

        Ok(SessionSummary {
            id: parse_uuid(0, &id)?,
            user_id: row.get(1)?,
            url: row.get(2)?,
            page_title: row.get(3)?,
            start_time: parse_time(4, &start_time)?,
            end_time: end_time.map(|t| parse_time(5, &t)).transpose()?,
            event_count: usize::try_from(event_count).unwrap_or_default(),
            has_snapshot: has_snapshot != 0,
        })
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn save(&self, session: &RecordingSession) -> Result<(), StorageError> {
        let payload = session.to_json()?;
        let summary = session.summary();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions
                    (id, user_id, url, page_title, start_time, end_time, event_count, has_snapshot, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    summary.id.to_string(),
                    summary.user_id,
                    summary.url,
                    summary.page_title,
                    format_time(summary.start_time),
                    summary.end_time.map(format_time),
                    summary.event_count as i64,
                    summary.has_snapshot as i32,
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<RecordingSession>, StorageError> {
        let payload: Option<String> = self
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT payload FROM sessions WHERE id = ?1",
                        params![id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        payload
            .map(|json| RecordingSession::from_json(&json).map_err(StorageError::from))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, url, page_title, start_time, end_time, event_count, has_snapshot
                 FROM sessions ORDER BY start_time DESC",
            )?;
            let summaries = stmt
                .query_map([], Self::row_to_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(summaries)
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        self.with_connection(move |conn| {
            let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?;
            Ok(removed > 0)
        })
        .await
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.path)
            .finish()
    }
}
