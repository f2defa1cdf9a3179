//! Invoice lifecycle: issue one invoice per identity and track its settlement.

use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use crate::notify::{RelayEvent, RelayEventsSender};
use crate::payment::backend::{InvoiceRequest, InvoiceStatus, IssuedInvoice, PaymentBackend};
use crate::payment::cache::{CacheStats, SettledCache};
use crate::payment::ledger::{InvoiceRecord, InvoiceStore};
use chrono::Utc;
use serde::Serialize;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Longest identity accepted for an invoice.
const MAX_IDENTITY_LEN: usize = 256;

/// Configuration for the invoice manager.
#[derive(Debug, Clone)]
pub struct InvoiceManagerConfig {
    /// Price of access, in satoshis.
    pub price_sats: u64,
    /// Lifetime requested for new invoices.
    pub invoice_expiry: Duration,
    /// Upper bound on one payment backend round-trip.
    pub backend_timeout: Duration,
    /// Name embedded in invoice descriptions.
    pub relay_name: String,
    /// Capacity of the settled-identity cache.
    pub cache_capacity: usize,
}

impl Default for InvoiceManagerConfig {
    fn default() -> Self {
        Self {
            price_sats: 1_000,
            invoice_expiry: Duration::from_secs(3600),
            backend_timeout: Duration::from_secs(10),
            relay_name: "relay-keeper".to_string(),
            cache_capacity: 10_000,
        }
    }
}

impl InvoiceManagerConfig {
    /// Derive manager settings from the relay's payment configuration.
    #[must_use]
    pub fn from_payment_config(config: &PaymentConfig, relay_name: &str) -> Self {
        Self {
            price_sats: config.ticket_price_sats,
            invoice_expiry: config.invoice_expiry(),
            backend_timeout: config.timeout(),
            relay_name: relay_name.to_string(),
            ..Self::default()
        }
    }
}

/// Invoice as presented to the paying identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceDescriptor {
    /// Paying identity.
    pub pubkey: String,
    /// BOLT11 payment request.
    pub bolt11: String,
    /// Payment hash.
    pub payment_hash: String,
    /// Amount charged, in satoshis.
    pub amount_sats: u64,
    /// Unix timestamp after which the invoice can no longer be paid.
    pub expires_at: u64,
    /// Whether payment has been confirmed.
    pub paid: bool,
}

impl From<InvoiceRecord> for InvoiceDescriptor {
    fn from(record: InvoiceRecord) -> Self {
        Self {
            pubkey: record.pubkey,
            bolt11: record.bolt11,
            payment_hash: record.payment_hash,
            amount_sats: record.amount_sats,
            expires_at: record.expires_at,
            paid: record.settled,
        }
    }
}

/// Issues invoices and answers whether an identity has paid.
///
/// Backend failures never grant access: any error or timeout while asking
/// the node is answered as "not settled". Once an identity is settled the
/// answer is served from the store (and the settled cache) without contacting
/// the node again.
pub struct InvoiceManager {
    store: Arc<dyn InvoiceStore>,
    backend: Arc<dyn PaymentBackend>,
    cache: SettledCache,
    /// Per-identity locks held while an invoice is looked up or issued.
    issuing: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    config: InvoiceManagerConfig,
    events_tx: RelayEventsSender,
}

impl InvoiceManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        backend: Arc<dyn PaymentBackend>,
        config: InvoiceManagerConfig,
        events_tx: RelayEventsSender,
    ) -> Self {
        let cache = SettledCache::with_capacity(config.cache_capacity);

        info!(
            "Invoice manager initialized (price={} sats, expiry={:?}, timeout={:?})",
            config.price_sats, config.invoice_expiry, config.backend_timeout
        );

        Self {
            store,
            backend,
            cache,
            issuing: Mutex::new(HashMap::new()),
            config,
            events_tx,
        }
    }

    /// Price of access, in satoshis.
    #[must_use]
    pub fn price_sats(&self) -> u64 {
        self.config.price_sats
    }

    /// Settled-cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Return the identity's invoice, issuing one if needed.
    ///
    /// Repeated calls return the same invoice until it expires unpaid, at
    /// which point it is replaced. An unsettled invoice is checked against
    /// the node first, so the returned `paid` flag is current. Requests for
    /// the same identity are serialized, so the node issues one invoice at a
    /// time per identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] for an unusable identity and
    /// [`Error::Payment`] if the node cannot issue an invoice.
    pub async fn request_invoice(&self, pubkey: &str) -> Result<InvoiceDescriptor> {
        let pubkey = validate_identity(pubkey)?;

        let lock = self.issuance_lock(pubkey);
        let result = {
            let _guard = lock.lock().await;
            self.current_or_issue(pubkey).await
        };
        drop(lock);
        self.issuing
            .lock()
            .retain(|_, held| Arc::strong_count(held) > 1);

        result
    }

    fn issuance_lock(&self, pubkey: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.issuing.lock().entry(pubkey.to_string()).or_default())
    }

    async fn current_or_issue(&self, pubkey: &str) -> Result<InvoiceDescriptor> {
        let now = unix_now();

        let stored = match self.store.get(pubkey).await? {
            Some(record) if record.settled => return Ok(record.into()),
            Some(record) if !record.is_expired(now) => {
                debug!("Returning existing invoice for {pubkey}");
                if self.check_settled(pubkey).await {
                    self.store.get(pubkey).await?.unwrap_or(record)
                } else {
                    record
                }
            }
            Some(expired) => {
                // A late payment on the expired invoice still counts.
                if self.check_settled(pubkey).await {
                    if let Some(record) = self.store.get(pubkey).await? {
                        return Ok(record.into());
                    }
                }
                let fresh = self.issue(pubkey, now).await?;
                let hash = fresh.payment_hash.clone();
                let stored = self
                    .store
                    .replace_unsettled(&expired.payment_hash, fresh)
                    .await?;
                self.announce_if_issued(&stored, &hash);
                stored
            }
            None => {
                let fresh = self.issue(pubkey, now).await?;
                let hash = fresh.payment_hash.clone();
                let stored = self.store.insert_if_absent(fresh).await?;
                self.announce_if_issued(&stored, &hash);
                stored
            }
        };

        Ok(stored.into())
    }

    /// Whether `pubkey` holds a settled invoice.
    ///
    /// Never fails: store errors, backend errors and timeouts all answer
    /// `false`.
    pub async fn check_settled(&self, pubkey: &str) -> bool {
        if self.cache.contains(pubkey) {
            return true;
        }

        let record = match self.store.get(pubkey).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No invoice on record for {pubkey}");
                return false;
            }
            Err(e) => {
                warn!("Invoice lookup failed for {pubkey}: {e}");
                return false;
            }
        };

        if record.settled {
            self.cache.insert(pubkey);
            return true;
        }

        let status = match tokio::time::timeout(
            self.config.backend_timeout,
            self.backend.invoice_status(&record.payment_hash),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Settlement check failed for {pubkey}: {e}");
                return false;
            }
            Err(_) => {
                warn!("Settlement check timed out for {pubkey}");
                return false;
            }
        };

        match status {
            InvoiceStatus::Paid => self.settle(pubkey, &record.payment_hash).await,
            InvoiceStatus::Unpaid => {
                debug!("Invoice for {pubkey} is unpaid");
                false
            }
            InvoiceStatus::Expired => {
                debug!("Invoice for {pubkey} expired unpaid");
                false
            }
        }
    }

    async fn settle(&self, pubkey: &str, payment_hash: &str) -> bool {
        match self.store.mark_settled(pubkey, payment_hash).await {
            Ok(true) => {
                info!("Invoice {payment_hash} settled, {pubkey} admitted");
                let _ = self.events_tx.send(RelayEvent::InvoiceSettled {
                    pubkey: pubkey.to_string(),
                });
                self.cache.insert(pubkey);
                true
            }
            // Lost the race: the record was settled or replaced concurrently.
            Ok(false) => match self.store.get(pubkey).await {
                Ok(Some(record)) if record.settled => {
                    self.cache.insert(pubkey);
                    true
                }
                Ok(_) => false,
                Err(e) => {
                    warn!("Invoice lookup failed for {pubkey}: {e}");
                    false
                }
            },
            Err(e) => {
                warn!("Failed to record settlement for {pubkey}: {e}");
                false
            }
        }
    }

    async fn issue(&self, pubkey: &str, now: u64) -> Result<InvoiceRecord> {
        let request = InvoiceRequest {
            amount_sats: self.config.price_sats,
            label: format!(
                "{}:{pubkey}:{}",
                self.config.relay_name,
                Utc::now().timestamp_micros()
            ),
            description: format!("{} access for {pubkey}", self.config.relay_name),
            expiry: self.config.invoice_expiry,
        };

        let IssuedInvoice {
            bolt11,
            payment_hash,
            expires_at,
        } = match tokio::time::timeout(
            self.config.backend_timeout,
            self.backend.create_invoice(request),
        )
        .await
        {
            Ok(Ok(invoice)) => invoice,
            Ok(Err(e)) => {
                warn!("Invoice creation failed for {pubkey}: {e}");
                return Err(e);
            }
            Err(_) => {
                warn!("Invoice creation timed out for {pubkey}");
                return Err(Error::Payment("invoice creation timed out".to_string()));
            }
        };

        Ok(InvoiceRecord {
            pubkey: pubkey.to_string(),
            bolt11,
            payment_hash,
            amount_sats: self.config.price_sats,
            created_at: now,
            expires_at,
            settled: false,
        })
    }

    fn announce_if_issued(&self, stored: &InvoiceRecord, issued_hash: &str) {
        if stored.payment_hash == issued_hash {
            info!("Issued invoice {issued_hash} for {}", stored.pubkey);
            let _ = self.events_tx.send(RelayEvent::InvoiceIssued {
                pubkey: stored.pubkey.clone(),
                payment_hash: issued_hash.to_string(),
            });
        } else {
            debug!(
                "Concurrent request for {} won, discarding invoice {issued_hash}",
                stored.pubkey
            );
        }
    }
}

/// Check that `pubkey` can own an invoice and return it trimmed.
///
/// # Errors
///
/// Returns [`Error::InvalidIdentity`] for an empty, oversized or
/// whitespace-containing identity.
pub fn validate_identity(pubkey: &str) -> Result<&str> {
    let trimmed = pubkey.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidIdentity("identity is empty".to_string()));
    }
    if trimmed.len() > MAX_IDENTITY_LEN {
        return Err(Error::InvalidIdentity(format!(
            "identity longer than {MAX_IDENTITY_LEN} bytes"
        )));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidIdentity(
            "identity contains whitespace".to_string(),
        ));
    }
    Ok(trimmed)
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
