//! Persistent invoice records, one per identity.
//!
//! Every state change is a compare-and-set against the stored record, so
//! concurrent requests and settlement checks for the same identity cannot
//! overwrite each other. A settled record is never replaced: settlement grants
//! the identity access for as long as the record exists.

use crate::error::Result;
use crate::storage::{open_connection, run_blocking};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;

/// Stored invoice for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRecord {
    /// Paying identity.
    pub pubkey: String,
    /// BOLT11 payment request.
    pub bolt11: String,
    /// Payment hash identifying the invoice at the node.
    pub payment_hash: String,
    /// Amount charged, in satoshis.
    pub amount_sats: u64,
    /// Unix timestamp of issue.
    pub created_at: u64,
    /// Unix timestamp after which the invoice can no longer be paid.
    pub expires_at: u64,
    /// Whether the node has confirmed payment.
    pub settled: bool,
}

impl InvoiceRecord {
    /// Whether the invoice can no longer be paid as of `now`.
    ///
    /// Settled invoices never expire.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        !self.settled && now >= self.expires_at
    }
}

/// Persistence for invoice records.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Record for `pubkey`, if any.
    async fn get(&self, pubkey: &str) -> Result<Option<InvoiceRecord>>;

    /// Store `record` unless its identity already has one.
    ///
    /// Returns whichever record is stored afterwards.
    async fn insert_if_absent(&self, record: InvoiceRecord) -> Result<InvoiceRecord>;

    /// Replace the identity's record with `record`, but only while the stored
    /// one is still unsettled and carries `previous_hash`.
    ///
    /// Returns whichever record is stored afterwards.
    async fn replace_unsettled(
        &self,
        previous_hash: &str,
        record: InvoiceRecord,
    ) -> Result<InvoiceRecord>;

    /// Flag the record settled if it is unsettled and carries `payment_hash`.
    ///
    /// Returns `true` only for the call that made the transition.
    async fn mark_settled(&self, pubkey: &str, payment_hash: &str) -> Result<bool>;
}

/// Invoice records kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryInvoiceStore {
    records: Arc<Mutex<HashMap<String, InvoiceRecord>>>,
}

impl MemoryInvoiceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn get(&self, pubkey: &str) -> Result<Option<InvoiceRecord>> {
        Ok(self.records.lock().get(pubkey).cloned())
    }

    async fn insert_if_absent(&self, record: InvoiceRecord) -> Result<InvoiceRecord> {
        let mut records = self.records.lock();
        Ok(records
            .entry(record.pubkey.clone())
            .or_insert(record)
            .clone())
    }

    async fn replace_unsettled(
        &self,
        previous_hash: &str,
        record: InvoiceRecord,
    ) -> Result<InvoiceRecord> {
        let mut records = self.records.lock();
        match records.get_mut(&record.pubkey) {
            Some(current) if !current.settled && current.payment_hash == previous_hash => {
                *current = record;
                Ok(current.clone())
            }
            Some(current) => Ok(current.clone()),
            None => {
                records.insert(record.pubkey.clone(), record.clone());
                Ok(record)
            }
        }
    }

    async fn mark_settled(&self, pubkey: &str, payment_hash: &str) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get_mut(pubkey) {
            Some(current) if !current.settled && current.payment_hash == payment_hash => {
                current.settled = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS invoice (
    pubkey TEXT PRIMARY KEY,
    bolt11 TEXT NOT NULL,
    payment_hash TEXT NOT NULL,
    amount_sats INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    settled INTEGER NOT NULL DEFAULT 0
);
";

const SELECT: &str = "SELECT pubkey, bolt11, payment_hash, amount_sats, created_at, expires_at, settled
     FROM invoice WHERE pubkey = ?1";

/// Invoice records in an SQLite database.
#[derive(Clone)]
pub struct SqliteInvoiceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteInvoiceStore {
    /// Open (or create) the invoice database at `location` and ensure its schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(location: &str) -> Result<Self> {
        let conn = open_connection(location)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<InvoiceRecord> {
    let amount: i64 = row.get(3)?;
    let created_at: i64 = row.get(4)?;
    let expires_at: i64 = row.get(5)?;
    Ok(InvoiceRecord {
        pubkey: row.get(0)?,
        bolt11: row.get(1)?,
        payment_hash: row.get(2)?,
        amount_sats: u64::try_from(amount).unwrap_or(0),
        created_at: u64::try_from(created_at).unwrap_or(0),
        expires_at: u64::try_from(expires_at).unwrap_or(0),
        settled: row.get(6)?,
    })
}

fn select(conn: &Connection, pubkey: &str) -> Result<Option<InvoiceRecord>> {
    Ok(conn
        .query_row(SELECT, params![pubkey], read_record)
        .optional()?)
}

fn stored(conn: &Connection, pubkey: &str) -> Result<InvoiceRecord> {
    conn.query_row(SELECT, params![pubkey], read_record)
        .map_err(Into::into)
}

fn db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl InvoiceStore for SqliteInvoiceStore {
    async fn get(&self, pubkey: &str) -> Result<Option<InvoiceRecord>> {
        let pubkey = pubkey.to_string();
        run_blocking(&self.conn, move |conn| select(conn, &pubkey)).await
    }

    async fn insert_if_absent(&self, record: InvoiceRecord) -> Result<InvoiceRecord> {
        run_blocking(&self.conn, move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO invoice
                     (pubkey, bolt11, payment_hash, amount_sats, created_at, expires_at, settled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.pubkey,
                    record.bolt11,
                    record.payment_hash,
                    db_int(record.amount_sats),
                    db_int(record.created_at),
                    db_int(record.expires_at),
                    record.settled,
                ],
            )?;
            stored(conn, &record.pubkey)
        })
        .await
    }

    async fn replace_unsettled(
        &self,
        previous_hash: &str,
        record: InvoiceRecord,
    ) -> Result<InvoiceRecord> {
        let previous_hash = previous_hash.to_string();
        run_blocking(&self.conn, move |conn| {
            let replaced = conn.execute(
                "UPDATE invoice
                 SET bolt11 = ?2, payment_hash = ?3, amount_sats = ?4, created_at = ?5, expires_at = ?6
                 WHERE pubkey = ?1 AND settled = 0 AND payment_hash = ?7",
                params![
                    record.pubkey,
                    record.bolt11,
                    record.payment_hash,
                    db_int(record.amount_sats),
                    db_int(record.created_at),
                    db_int(record.expires_at),
                    previous_hash,
                ],
            )?;
            if replaced == 0 {
                conn.execute(
                    "INSERT OR IGNORE INTO invoice
                         (pubkey, bolt11, payment_hash, amount_sats, created_at, expires_at, settled)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                    params![
                        record.pubkey,
                        record.bolt11,
                        record.payment_hash,
                        db_int(record.amount_sats),
                        db_int(record.created_at),
                        db_int(record.expires_at),
                    ],
                )?;
            }
            stored(conn, &record.pubkey)
        })
        .await
    }

    async fn mark_settled(&self, pubkey: &str, payment_hash: &str) -> Result<bool> {
        let (pubkey, payment_hash) = (pubkey.to_string(), payment_hash.to_string());
        run_blocking(&self.conn, move |conn| {
            let changed = conn.execute(
                "UPDATE invoice SET settled = 1
                 WHERE pubkey = ?1 AND payment_hash = ?2 AND settled = 0",
                params![pubkey, payment_hash],
            )?;
            Ok(changed == 1)
        })
        .await
    }
}
