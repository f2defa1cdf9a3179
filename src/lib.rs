//! # relay-keeper
//!
//! Admission, retention and storage core for small Nostr relays.
//!
//! Two relay flavours share one engine:
//!
//! - **basic**: only identities on a static allow-list may publish.
//! - **expensive**: an identity pays a one-time Lightning invoice and may
//!   publish from then on.
//!
//! Admitted events land in a pluggable [`storage::Storage`] backend (SQLite,
//! PostgreSQL, Elasticsearch or memory). A background [`janitor::Janitor`]
//! purges everything older than the retention window.
//!
//! ```no_run
//! use relay_keeper::{RelayBuilder, RelayConfig};
//!
//! # async fn demo() -> relay_keeper::Result<()> {
//! let config = RelayConfig {
//!     whitelist: vec!["6e468422dfb74a57".to_string()],
//!     ..RelayConfig::default()
//! };
//! let mut relay = RelayBuilder::new(config).build().await?;
//! relay.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod janitor;
pub mod notify;
pub mod payment;
pub mod relay;
pub mod storage;

pub use admission::{AdmissionPolicy, AllowListPolicy, PaymentGatePolicy, MAX_EVENT_SIZE};
pub use config::{RelayConfig, RelayMode};
pub use error::{Error, Result};
pub use event::{Event, Tag};
pub use notify::RelayEvent;
pub use payment::{InvoiceDescriptor, InvoiceManager};
pub use relay::{RelayBuilder, RunningRelay, Submission};
pub use storage::{EventFilter, SaveOutcome, Storage, StorageKind};
