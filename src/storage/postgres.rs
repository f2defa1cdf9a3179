//! PostgreSQL engine.

use super::{to_db_timestamp, EventFilter, RawEvent, SaveOutcome, Storage, StorageKind};
use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::debug;

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS event (
        id text NOT NULL,
        pubkey text NOT NULL,
        created_at bigint NOT NULL,
        kind bigint NOT NULL,
        tags jsonb NOT NULL,
        content text NOT NULL,
        sig text NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS ididx ON event (id)",
    "CREATE INDEX IF NOT EXISTS pubkeyprefix ON event USING btree (pubkey text_pattern_ops)",
    "CREATE INDEX IF NOT EXISTS timeidx ON event (created_at DESC)",
    // Tables created with an integer kind column cannot hold every u32.
    "ALTER TABLE event ALTER COLUMN kind TYPE bigint",
];

/// PostgreSQL-backed event store over a connection pool.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        debug!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Use an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Build the lookup statement for `filter`.
fn select_query(filter: &EventFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT id, pubkey, created_at, kind::bigint AS kind, tags::text AS tags, content, sig FROM event WHERE true",
    );
    if !filter.ids.is_empty() {
        qb.push(" AND id = ANY(").push_bind(filter.ids.clone()).push(")");
    }
    if !filter.authors.is_empty() {
        qb.push(" AND pubkey = ANY(")
            .push_bind(filter.authors.clone())
            .push(")");
    }
    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ").push_bind(to_db_timestamp(since));
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at <= ").push_bind(to_db_timestamp(until));
    }
    qb.push(" ORDER BY created_at DESC, id ASC");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    qb
}

fn raw_event(row: &PgRow) -> std::result::Result<RawEvent, sqlx::Error> {
    Ok(RawEvent {
        id: row.try_get("id")?,
        pubkey: row.try_get("pubkey")?,
        created_at: row.try_get("created_at")?,
        kind: row.try_get("kind")?,
        tags: row.try_get("tags")?,
        content: row.try_get("content")?,
        sig: row.try_get("sig")?,
    })
}

#[async_trait]
impl Storage for PostgresStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Postgresql
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let tags = serde_json::to_string(&event.tags)?;
        let result = sqlx::query(
            "INSERT INTO event (id, pubkey, created_at, kind, tags, content, sig)
             VALUES ($1, $2, $3, $4, $5::jsonb, $6, $7)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&event.id)
        .bind(&event.pubkey)
        .bind(to_db_timestamp(event.created_at))
        .bind(i64::from(event.kind))
        .bind(tags)
        .bind(&event.content)
        .bind(&event.sig)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            SaveOutcome::Duplicate
        } else {
            SaveOutcome::Stored
        })
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut qb = select_query(filter);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| raw_event(row)?.into_event())
            .collect()
    }

    async fn delete_event(&self, id: &str, pubkey: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event WHERE id = $1 AND pubkey = $2")
            .bind(id)
            .bind(pubkey)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event WHERE created_at < $1")
            .bind(to_db_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
