//! Relay assembly: storage, admission policy, janitor and HTTP routes.

use crate::admission::{AdmissionPolicy, AllowListPolicy, PaymentGatePolicy};
use crate::config::{RelayConfig, RelayMode};
use crate::error::Result;
use crate::event::Event;
use crate::http::{self, HttpState};
use crate::janitor::{Janitor, RetentionPolicy};
use crate::notify::{create_event_channel, RelayEvent, RelayEventsChannel, RelayEventsSender};
use crate::payment::{
    ClnRestBackend, ClnRestConfig, InvoiceManager, InvoiceManagerConfig, InvoiceStore,
    MemoryInvoiceStore, PaymentBackend, SqliteInvoiceStore,
};
use crate::storage::{open_storage, SaveOutcome, Storage};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of [`RunningRelay::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Admitted and persisted.
    Stored,
    /// Admitted, but an event with the same id was already stored.
    Duplicate,
    /// Dropped by the admission gate.
    Rejected,
}

impl Submission {
    /// Whether the event is in storage after the call.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Stored | Self::Duplicate)
    }
}

/// Builder for constructing a relay.
pub struct RelayBuilder {
    config: RelayConfig,
    storage: Option<Arc<dyn Storage>>,
    payment_backend: Option<Arc<dyn PaymentBackend>>,
    invoice_store: Option<Arc<dyn InvoiceStore>>,
}

impl RelayBuilder {
    /// Create a new relay builder with the given configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            storage: None,
            payment_backend: None,
            invoice_store: None,
        }
    }

    /// Use `storage` instead of opening the configured engine.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use `backend` instead of the configured Lightning node.
    #[must_use]
    pub fn with_payment_backend(mut self, backend: Arc<dyn PaymentBackend>) -> Self {
        self.payment_backend = Some(backend);
        self
    }

    /// Use `store` instead of the configured invoice database.
    #[must_use]
    pub fn with_invoice_store(mut self, store: Arc<dyn InvoiceStore>) -> Self {
        self.invoice_store = Some(store);
        self
    }

    /// Validate the configuration, open storage and start the janitor.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, storage cannot be
    /// opened or initialized, or the payment node settings are unusable.
    pub async fn build(self) -> Result<RunningRelay> {
        self.config.validate()?;
        let kind = self.config.storage_kind();
        info!(
            "Building {} ({:?} mode, {kind} storage)",
            self.config.name, self.config.mode
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, _) = create_event_channel();

        let storage = match self.storage {
            Some(storage) => {
                storage.init().await?;
                storage
            }
            None => open_storage(kind, &self.config.storage_db).await?,
        };

        let (policy, invoices): (Arc<dyn AdmissionPolicy>, Option<Arc<InvoiceManager>>) =
            match self.config.mode {
                RelayMode::Basic => {
                    let allow = AllowListPolicy::new(self.config.whitelist.iter().cloned());
                    if allow.is_empty() {
                        warn!("WHITELIST is empty, every event will be rejected");
                    } else {
                        info!("Allow-list holds {} identities", allow.len());
                    }
                    (Arc::new(allow) as Arc<dyn AdmissionPolicy>, None)
                }
                RelayMode::Expensive => {
                    let backend: Arc<dyn PaymentBackend> = match self.payment_backend {
                        Some(backend) => backend,
                        None => Arc::new(ClnRestBackend::new(ClnRestConfig::from_payment_config(
                            &self.config.payment,
                        ))?),
                    };
                    let store = match self.invoice_store {
                        Some(store) => store,
                        None => open_invoice_store(&self.config)?,
                    };
                    let manager = Arc::new(InvoiceManager::new(
                        store,
                        backend,
                        InvoiceManagerConfig::from_payment_config(
                            &self.config.payment,
                            &self.config.name,
                        ),
                        events_tx.clone(),
                    ));
                    let gate: Arc<dyn AdmissionPolicy> =
                        Arc::new(PaymentGatePolicy::new(Arc::clone(&manager)));
                    (gate, Some(manager))
                }
            };

        let janitor = Janitor::new(
            Arc::clone(&storage),
            RetentionPolicy::from(&self.config.retention),
            events_tx.clone(),
        )
        .spawn(shutdown_rx.clone());

        Ok(RunningRelay {
            config: self.config,
            storage,
            policy,
            invoices,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            events_tx,
            janitor: Some(janitor),
        })
    }
}

fn open_invoice_store(config: &RelayConfig) -> Result<Arc<dyn InvoiceStore>> {
    match &config.payment.invoice_db {
        Some(path) => {
            let location = path.to_string_lossy();
            info!("Invoice records in {location}");
            Ok(Arc::new(SqliteInvoiceStore::open(&location)?))
        }
        None => {
            warn!("INVOICE_DB not set, invoice records will not survive a restart");
            Ok(Arc::new(MemoryInvoiceStore::new()))
        }
    }
}

/// A running relay.
pub struct RunningRelay {
    config: RelayConfig,
    storage: Arc<dyn Storage>,
    policy: Arc<dyn AdmissionPolicy>,
    invoices: Option<Arc<InvoiceManager>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: RelayEventsSender,
    janitor: Option<JoinHandle<()>>,
}

impl RunningRelay {
    /// Relay name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the relay was built with.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Shared storage backend.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Invoice manager, for payment-gated relays.
    #[must_use]
    pub fn invoices(&self) -> Option<&Arc<InvoiceManager>> {
        self.invoices.as_ref()
    }

    /// Whether the admission gate lets `event` through.
    pub async fn accept_event(&self, event: &Event) -> bool {
        self.policy.accept_event(event).await
    }

    /// Run `event` through the admission gate and persist it if admitted.
    ///
    /// A duplicate id is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage engine fails.
    pub async fn submit(&self, event: &Event) -> Result<Submission> {
        if !self.accept_event(event).await {
            let _ = self.events_tx.send(RelayEvent::EventRejected {
                id: event.id.clone(),
            });
            return Ok(Submission::Rejected);
        }

        match self.storage.save_event(event).await? {
            SaveOutcome::Stored => {
                debug!("Stored event {}", event.id);
                let _ = self.events_tx.send(RelayEvent::EventStored {
                    id: event.id.clone(),
                });
                Ok(Submission::Stored)
            }
            SaveOutcome::Duplicate => {
                debug!("Event {} already stored", event.id);
                Ok(Submission::Duplicate)
            }
        }
    }

    /// Delete event `id` if it belongs to `pubkey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage engine fails.
    pub async fn delete_event(&self, id: &str, pubkey: &str) -> Result<u64> {
        self.storage.delete_event(id, pubkey).await
    }

    /// HTTP routes for this relay.
    #[must_use]
    pub fn router(&self) -> Router {
        http::router(HttpState {
            relay_name: self.config.name.clone(),
            node_id: self.config.payment.cln_node_id.clone(),
            invoices: self.invoices.clone(),
        })
    }

    /// Subscribe to relay events.
    #[must_use]
    pub fn subscribe_events(&self) -> RelayEventsChannel {
        self.events_tx.subscribe()
    }

    /// Serve the HTTP routes and run until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP address cannot be bound.
    pub async fn run(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_http).await?;
        self.run_with_listener(listener).await
    }

    /// Like [`RunningRelay::run`], serving on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay encounters a fatal error.
    pub async fn run_with_listener(&mut self, listener: TcpListener) -> Result<()> {
        info!("Starting {}", self.config.name);
        let _ = self.events_tx.send(RelayEvent::Started);

        let mut server_shutdown = self.shutdown_rx.clone();
        let server = tokio::spawn(http::serve_http(listener, self.router(), async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        }));

        info!("Relay running, waiting for shutdown signal");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    self.shutdown();
                    break;
                }
            }
        }

        let _ = self.events_tx.send(RelayEvent::ShuttingDown);

        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("HTTP server stopped with error: {e}"),
            Err(e) => warn!("HTTP server task failed: {e}"),
        }
        if let Some(janitor) = self.janitor.take() {
            if let Err(e) = janitor.await {
                warn!("Janitor task failed: {e}");
            }
        }

        info!("Relay shutdown complete");
        Ok(())
    }

    /// Request the relay to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}
