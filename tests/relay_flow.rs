//! End-to-end admission flows through a built relay.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_keeper::config::PaymentConfig;
use relay_keeper::payment::{
    InvoiceRequest, InvoiceStatus, IssuedInvoice, PaymentBackend, SqliteInvoiceStore,
};
use relay_keeper::storage::MemoryStorage;
use relay_keeper::{
    Error, Event, EventFilter, RelayBuilder, RelayConfig, RelayEvent, RelayMode, Result,
    RunningRelay, Storage, Submission,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Lightning node double: hashes are issued in order, statuses set by the test.
#[derive(Default)]
struct FakeNode {
    statuses: Mutex<HashMap<String, InvoiceStatus>>,
    offline: Mutex<bool>,
    issued: Mutex<u32>,
}

impl FakeNode {
    fn pay(&self, payment_hash: &str) {
        self.statuses
            .lock()
            .insert(payment_hash.to_string(), InvoiceStatus::Paid);
    }

    fn go_offline(&self) {
        *self.offline.lock() = true;
    }
}

#[async_trait]
impl PaymentBackend for FakeNode {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<IssuedInvoice> {
        if *self.offline.lock() {
            return Err(Error::Payment("node offline".into()));
        }
        let mut issued = self.issued.lock();
        *issued += 1;
        let payment_hash = format!("hash-{issued}");
        self.statuses
            .lock()
            .insert(payment_hash.clone(), InvoiceStatus::Unpaid);
        Ok(IssuedInvoice {
            bolt11: format!("lnbc{}-{issued}", request.amount_sats),
            payment_hash,
            expires_at: u64::MAX,
        })
    }

    async fn invoice_status(&self, payment_hash: &str) -> Result<InvoiceStatus> {
        if *self.offline.lock() {
            return Err(Error::Payment("node offline".into()));
        }
        self.statuses
            .lock()
            .get(payment_hash)
            .copied()
            .ok_or_else(|| Error::Payment(format!("unknown invoice {payment_hash}")))
    }
}

fn event(id: &str, pubkey: &str, size: usize) -> Event {
    let mut event = Event {
        id: id.into(),
        pubkey: pubkey.into(),
        created_at: u64::try_from(chrono::Utc::now().timestamp()).unwrap(),
        kind: 1,
        tags: vec![],
        content: String::new(),
        sig: "00".repeat(64),
    };
    let base = event.serialized_size().unwrap();
    event.content = "x".repeat(size.saturating_sub(base));
    event
}

async fn basic_relay(whitelist: &[&str], storage: &MemoryStorage) -> RunningRelay {
    let config = RelayConfig {
        storage_type: "memory".into(),
        whitelist: whitelist.iter().map(ToString::to_string).collect(),
        ..RelayConfig::default()
    };
    RelayBuilder::new(config)
        .with_storage(Arc::new(storage.clone()))
        .build()
        .await
        .expect("build")
}

fn expensive_config() -> RelayConfig {
    RelayConfig {
        mode: RelayMode::Expensive,
        storage_type: "memory".into(),
        payment: PaymentConfig {
            cln_host: "https://127.0.0.1:3010".into(),
            cln_rune: "rune".into(),
            ticket_price_sats: 500,
            ..PaymentConfig::default()
        },
        ..RelayConfig::default()
    }
}

async fn expensive_relay(node: &Arc<FakeNode>) -> RunningRelay {
    RelayBuilder::new(expensive_config())
        .with_payment_backend(Arc::clone(node) as Arc<dyn PaymentBackend>)
        .build()
        .await
        .expect("build")
}

#[tokio::test]
async fn test_allow_list_admits_listed_identity_only() {
    let storage = MemoryStorage::new();
    let relay = basic_relay(&["abc"], &storage).await;

    assert!(relay.accept_event(&event("e1", "abc", 500)).await);
    assert!(!relay.accept_event(&event("e2", "xyz", 500)).await);

    assert_eq!(
        relay.submit(&event("e2", "xyz", 500)).await.expect("submit"),
        Submission::Rejected
    );
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_oversized_event_rejected_for_listed_identity() {
    let storage = MemoryStorage::new();
    let relay = basic_relay(&["abc"], &storage).await;

    let large = event("big", "abc", 150_000);
    assert_eq!(large.serialized_size().expect("size"), 150_000);
    assert!(!relay.accept_event(&large).await);
}

#[tokio::test]
async fn test_unpaid_identity_is_rejected() {
    let node = Arc::new(FakeNode::default());
    let relay = expensive_relay(&node).await;
    let invoices = relay.invoices().expect("payment gate");

    assert!(!invoices.check_settled("P1").await);
    assert_eq!(
        relay.submit(&event("e1", "P1", 500)).await.expect("submit"),
        Submission::Rejected
    );
}

#[tokio::test]
async fn test_paid_identity_is_admitted() {
    let node = Arc::new(FakeNode::default());
    let relay = expensive_relay(&node).await;
    let invoices = relay.invoices().expect("payment gate");
    let mut events = relay.subscribe_events();

    let invoice = invoices.request_invoice("P1").await.expect("invoice");
    assert_eq!(invoice.amount_sats, 500);
    assert!(!invoice.paid);
    assert!(!relay.accept_event(&event("e1", "P1", 500)).await);

    node.pay(&invoice.payment_hash);
    assert!(invoices.check_settled("P1").await);
    assert_eq!(
        relay.submit(&event("e1", "P1", 500)).await.expect("submit"),
        Submission::Stored
    );
    assert!(!relay.accept_event(&event("e2", "P1", 100_001)).await);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&RelayEvent::InvoiceSettled {
        pubkey: "P1".into()
    }));
    assert!(seen.contains(&RelayEvent::EventStored { id: "e1".into() }));
}

#[tokio::test]
async fn test_settlement_survives_backend_outage() {
    let node = Arc::new(FakeNode::default());
    let relay = expensive_relay(&node).await;
    let invoices = relay.invoices().expect("payment gate");

    let invoice = invoices.request_invoice("P1").await.expect("invoice");
    node.pay(&invoice.payment_hash);
    assert!(invoices.check_settled("P1").await);

    node.go_offline();
    for n in 0..5 {
        assert!(invoices.check_settled("P1").await);
        assert!(relay.accept_event(&event(&format!("e{n}"), "P1", 500)).await);
    }
    assert!(invoices.request_invoice("P2").await.is_err());
    assert!(!invoices.check_settled("P2").await);
}

#[tokio::test]
async fn test_settlement_persists_across_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("invoices.db");
    let node = Arc::new(FakeNode::default());

    {
        let store = SqliteInvoiceStore::open(&path.to_string_lossy()).expect("store");
        let relay = RelayBuilder::new(expensive_config())
            .with_payment_backend(Arc::clone(&node) as Arc<dyn PaymentBackend>)
            .with_invoice_store(Arc::new(store))
            .build()
            .await
            .expect("build");
        let invoices = relay.invoices().expect("payment gate");
        let invoice = invoices.request_invoice("P1").await.expect("invoice");
        node.pay(&invoice.payment_hash);
        assert!(invoices.check_settled("P1").await);
    }

    node.go_offline();
    let mut config = expensive_config();
    config.payment.invoice_db = Some(path);
    let relay = RelayBuilder::new(config)
        .with_payment_backend(Arc::clone(&node) as Arc<dyn PaymentBackend>)
        .build()
        .await
        .expect("rebuild");
    assert!(relay.accept_event(&event("e1", "P1", 500)).await);
}

#[tokio::test]
async fn test_concurrent_identical_submissions_store_once() {
    let storage = MemoryStorage::new();
    let relay = Arc::new(basic_relay(&["abc"], &storage).await);
    let same = event("dup", "abc", 500);

    let (first, second) = tokio::join!(relay.submit(&same), relay.submit(&same));
    let outcomes = [first.expect("first"), second.expect("second")];
    assert!(outcomes.iter().all(Submission::is_accepted));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == Submission::Stored)
            .count(),
        1
    );

    let rows = storage
        .query_events(&EventFilter::by_id("dup"))
        .await
        .expect("query");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_repeated_invoice_requests_return_same_invoice() {
    let node = Arc::new(FakeNode::default());
    let relay = expensive_relay(&node).await;
    let invoices = relay.invoices().expect("payment gate");

    let (a, b) = tokio::join!(invoices.request_invoice("P1"), invoices.request_invoice("P1"));
    let (a, b) = (a.expect("first"), b.expect("second"));
    assert_eq!(a.payment_hash, b.payment_hash);

    let again = invoices.request_invoice("P1").await.expect("third");
    assert_eq!(again.payment_hash, a.payment_hash);

    assert!(matches!(
        invoices.request_invoice("   ").await,
        Err(Error::InvalidIdentity(_))
    ));
}
