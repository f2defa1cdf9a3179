//! Pluggable event storage.
//!
//! Every engine implements the same [`Storage`] contract so the relay can pick
//! one at startup without any other code noticing:
//!
//! ```text
//!              Arc<dyn Storage>
//!                    │
//!     ┌──────────┬───┴──────┬──────────────┐
//!     ▼          ▼          ▼              ▼
//!  SQLite    PostgreSQL  Elasticsearch   Memory
//! ```
//!
//! The contract is deliberately small: save with uniqueness on `id`, a minimal
//! lookup by id/author/time, an ownership-checked delete, and a bulk purge of
//! everything older than a cutoff (driven by the [`crate::janitor`]).

mod elasticsearch;
mod memory;
mod postgres;
mod sqlite;

pub use elasticsearch::ElasticsearchStorage;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub(crate) use sqlite::{open_connection, run_blocking};

use crate::error::{Error, Result};
use crate::event::Event;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Storage engines a relay can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Elasticsearch index over its REST API.
    Elasticsearch,
    /// PostgreSQL database.
    Postgresql,
    /// Embedded SQLite database.
    Sqlite3,
    /// Process memory; nothing survives a restart.
    Memory,
}

impl StorageKind {
    /// Resolve a configured engine name.
    ///
    /// Matching is case-insensitive. Anything unrecognized selects
    /// [`StorageKind::Sqlite3`] and logs the fallback.
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "elasticsearch" => Self::Elasticsearch,
            "postgresql" | "postgres" => Self::Postgresql,
            "sqlite3" | "sqlite" => Self::Sqlite3,
            "memory" => Self::Memory,
            other => {
                warn!("Unknown storage type {other:?}, falling back to sqlite3");
                Self::Sqlite3
            }
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Elasticsearch => "elasticsearch",
            Self::Postgresql => "postgresql",
            Self::Sqlite3 => "sqlite3",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Storage::save_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The event was written.
    Stored,
    /// An event with the same id already exists; nothing was written.
    Duplicate,
}

/// Minimal lookup used by deletion and by callers that need to read back.
///
/// Empty `ids`/`authors` mean "any". Results are ordered newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Match any of these event ids.
    pub ids: Vec<String>,
    /// Match any of these authors.
    pub authors: Vec<String>,
    /// Only events created at or after this timestamp.
    pub since: Option<u64>,
    /// Only events created at or before this timestamp.
    pub until: Option<u64>,
    /// Maximum number of events returned.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Filter matching a single event id.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            ..Self::default()
        }
    }

    /// Filter matching every event by one author.
    #[must_use]
    pub fn by_author(pubkey: impl Into<String>) -> Self {
        Self {
            authors: vec![pubkey.into()],
            ..Self::default()
        }
    }

    /// Whether `event` satisfies every constraint of this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        (self.ids.is_empty() || self.ids.iter().any(|id| id == &event.id))
            && (self.authors.is_empty() || self.authors.iter().any(|a| a == &event.pubkey))
            && self.since.map_or(true, |s| event.created_at >= s)
            && self.until.map_or(true, |u| event.created_at <= u)
    }
}

/// Uniform persistence contract implemented by every engine.
///
/// Implementations are shared across concurrent admissions and the janitor,
/// and rely on their engine for isolation; the only constraint this layer
/// adds is uniqueness on the event id.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Engine behind this backend.
    fn kind(&self) -> StorageKind;

    /// Create tables, indexes or mappings. Safe to call more than once.
    async fn init(&self) -> Result<()>;

    /// Persist an admitted event.
    ///
    /// A second save of the same id returns [`SaveOutcome::Duplicate`] and
    /// leaves the stored copy untouched.
    async fn save_event(&self, event: &Event) -> Result<SaveOutcome>;

    /// Look up events by id, author and time range.
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Delete the event matching both `id` and `pubkey`.
    ///
    /// Returns the number of events removed; zero is not an error.
    async fn delete_event(&self, id: &str, pubkey: &str) -> Result<u64>;

    /// Bulk delete every event with `created_at` strictly before `cutoff`.
    ///
    /// Returns the number of events removed.
    async fn purge_before(&self, cutoff: u64) -> Result<u64>;
}

/// Open the configured engine and prepare its schema.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or initialized.
pub async fn open_storage(kind: StorageKind, location: &str) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match kind {
        StorageKind::Elasticsearch => Arc::new(ElasticsearchStorage::new(location)?),
        StorageKind::Postgresql => Arc::new(PostgresStorage::connect(location).await?),
        StorageKind::Sqlite3 => Arc::new(SqliteStorage::open(location)?),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    };
    storage.init().await?;
    info!("Storage backend {} ready", kind);
    Ok(storage)
}

/// Newest first, then truncated to the filter's limit.
fn order_and_limit(mut events: Vec<Event>, limit: Option<usize>) -> Vec<Event> {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    if let Some(limit) = limit {
        events.truncate(limit);
    }
    events
}

/// Event row as the SQL engines return it, before JSON columns are decoded.
struct RawEvent {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: i64,
    tags: String,
    content: String,
    sig: String,
}

impl RawEvent {
    fn into_event(self) -> Result<Event> {
        Ok(Event {
            id: self.id,
            pubkey: self.pubkey,
            created_at: from_db_timestamp(self.created_at),
            kind: u32::try_from(self.kind)
                .map_err(|_| Error::Storage(format!("stored kind out of range: {}", self.kind)))?,
            tags: serde_json::from_str(&self.tags)?,
            content: self.content,
            sig: self.sig,
        })
    }
}

/// Timestamps are unsigned on the wire and signed in the SQL engines.
fn to_db_timestamp(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

fn from_db_timestamp(ts: i64) -> u64 {
    u64::try_from(ts).unwrap_or(0)
}
