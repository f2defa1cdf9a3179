//! Relay lifecycle notifications.

use tokio::sync::broadcast;

/// Notifications emitted by the running relay and its background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Relay has started and the janitor is scheduled.
    Started,

    /// Relay is shutting down.
    ShuttingDown,

    /// An admitted event was persisted.
    EventStored {
        /// Event id.
        id: String,
    },

    /// The admission gate dropped an event.
    EventRejected {
        /// Event id.
        id: String,
    },

    /// A new invoice was issued for an identity.
    InvoiceIssued {
        /// Paying identity.
        pubkey: String,
        /// Payment hash reported by the payment node.
        payment_hash: String,
    },

    /// An identity's invoice transitioned to settled.
    InvoiceSettled {
        /// Paying identity.
        pubkey: String,
    },

    /// A retention pass finished.
    CleanupComplete {
        /// Number of events removed.
        removed: u64,
        /// Unix timestamp; events older than this were removed.
        cutoff: u64,
    },

    /// A retention pass failed and will be retried on the next tick.
    CleanupFailed {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving relay events.
pub type RelayEventsChannel = broadcast::Receiver<RelayEvent>;

/// Sender for relay events.
pub type RelayEventsSender = broadcast::Sender<RelayEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (RelayEventsSender, RelayEventsChannel) {
    broadcast::channel(256)
}
