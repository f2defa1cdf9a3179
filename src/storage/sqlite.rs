//! Embedded SQLite engine.
//!
//! The connection lives behind a mutex and every statement runs on the
//! blocking thread pool, so async callers never stall the runtime on disk I/O.

use super::{to_db_timestamp, EventFilter, RawEvent, SaveOutcome, Storage, StorageKind};
use crate::error::{Error, Result};
use crate::event::Event;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS event (
    id TEXT PRIMARY KEY,
    pubkey TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    kind INTEGER NOT NULL,
    tags TEXT NOT NULL,
    content TEXT NOT NULL,
    sig TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS pubkeyidx ON event (pubkey);
CREATE INDEX IF NOT EXISTS timeidx ON event (created_at DESC);
";

/// SQLite-backed event store.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database at `location`.
    ///
    /// `:memory:` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(location: &str) -> Result<Self> {
        Ok(Self::from_connection(open_connection(location)?))
    }

    /// Wrap an already open connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        run_blocking(&self.conn, f).await
    }
}

/// Open a connection at `location` with WAL journaling and a busy timeout.
pub(crate) fn open_connection(location: &str) -> Result<Connection> {
    let conn = if location == ":memory:" {
        Connection::open_in_memory()?
    } else {
        if let Some(parent) = Path::new(location).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(location)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {mode}");
        conn
    };
    conn.busy_timeout(Duration::from_secs(5))?;
    debug!("Opened SQLite database at {location}");
    Ok(conn)
}

/// Run `f` against the shared connection on the blocking pool.
pub(crate) async fn run_blocking<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock();
        f(&conn)
    })
    .await
    .map_err(|e| Error::Storage(format!("SQLite task failed: {e}")))?
}

/// Build the lookup statement and its bound values for `filter`.
fn select_sql(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut sql =
        String::from("SELECT id, pubkey, created_at, kind, tags, content, sig FROM event");
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if !filter.ids.is_empty() {
        let marks = vec!["?"; filter.ids.len()].join(", ");
        clauses.push(format!("id IN ({marks})"));
        values.extend(filter.ids.iter().cloned().map(Value::Text));
    }
    if !filter.authors.is_empty() {
        let marks = vec!["?"; filter.authors.len()].join(", ");
        clauses.push(format!("pubkey IN ({marks})"));
        values.extend(filter.authors.iter().cloned().map(Value::Text));
    }
    if let Some(since) = filter.since {
        clauses.push("created_at >= ?".to_string());
        values.push(Value::Integer(to_db_timestamp(since)));
    }
    if let Some(until) = filter.until {
        clauses.push("created_at <= ?".to_string());
        values.push(Value::Integer(to_db_timestamp(until)));
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id ASC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }
    (sql, values)
}

#[async_trait]
impl Storage for SqliteStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Sqlite3
    }

    async fn init(&self) -> Result<()> {
        self.with_conn(|conn| Ok(conn.execute_batch(SCHEMA)?)).await
    }

    async fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let tags = serde_json::to_string(&event.tags)?;
        let event = event.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO event (id, pubkey, created_at, kind, tags, content, sig)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.pubkey,
                    to_db_timestamp(event.created_at),
                    i64::from(event.kind),
                    tags,
                    event.content,
                    event.sig,
                ],
            )?;
            Ok(if inserted == 0 {
                SaveOutcome::Duplicate
            } else {
                SaveOutcome::Stored
            })
        })
        .await
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let (sql, values) = select_sql(filter);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok(RawEvent {
                    id: row.get(0)?,
                    pubkey: row.get(1)?,
                    created_at: row.get(2)?,
                    kind: row.get(3)?,
                    tags: row.get(4)?,
                    content: row.get(5)?,
                    sig: row.get(6)?,
                })
            })?;
            let mut events = Vec::new();
            for raw in rows {
                events.push(raw?.into_event()?);
            }
            Ok(events)
        })
        .await
    }

    async fn delete_event(&self, id: &str, pubkey: &str) -> Result<u64> {
        let (id, pubkey) = (id.to_string(), pubkey.to_string());
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM event WHERE id = ?1 AND pubkey = ?2",
                params![id, pubkey],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM event WHERE created_at < ?1",
                params![to_db_timestamp(cutoff)],
            )?;
            Ok(removed as u64)
        })
        .await
    }
}
