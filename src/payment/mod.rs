//! Lightning payment gate for the expensive relay.
//!
//! An identity pays one invoice and is admitted from then on. The
//! [`InvoiceManager`] owns that lifecycle:
//!
//! ```text
//! check_settled(pubkey)
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Settled LRU cache   │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────┐
//!    │             │
//!   HIT          MISS
//!    │             │
//!    ▼             ▼
//!  ADMIT     Invoice store ──── settled ───► cache + ADMIT
//!                  │
//!              unsettled
//!                  │
//!                  ▼
//!          Payment node (timeout)
//!                  │
//!           ┌──────┴──────┐
//!           │             │
//!         PAID     unpaid/expired/error
//!           │             │
//!           ▼             ▼
//!   mark_settled CAS    REJECT
//!   + cache + ADMIT
//! ```

mod backend;
mod cache;
mod ledger;
mod manager;

pub use backend::{
    ClnRestBackend, ClnRestConfig, InvoiceRequest, InvoiceStatus, IssuedInvoice, PaymentBackend,
};
pub use cache::{CacheStats, SettledCache};
pub use ledger::{InvoiceRecord, InvoiceStore, MemoryInvoiceStore, SqliteInvoiceStore};
pub use manager::{validate_identity, InvoiceDescriptor, InvoiceManager, InvoiceManagerConfig};
