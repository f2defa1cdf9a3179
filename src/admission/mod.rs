//! Admission gate: decides whether an inbound event is persisted.
//!
//! Both relay flavours share the size rule in [`within_size_limit`] and add
//! their own identity check on top of it. A policy only answers yes or no; it
//! never touches storage.

mod allowlist;
mod paid;

pub use allowlist::AllowListPolicy;
pub use paid::PaymentGatePolicy;

use crate::event::Event;
use async_trait::async_trait;
use tracing::debug;

/// Largest accepted event, in bytes of its JSON serialization.
pub const MAX_EVENT_SIZE: usize = 100_000;

/// Whether `event` serializes to at most [`MAX_EVENT_SIZE`] bytes.
///
/// An event that cannot be serialized is rejected.
#[must_use]
pub fn within_size_limit(event: &Event) -> bool {
    match event.serialized_size() {
        Ok(size) if size <= MAX_EVENT_SIZE => true,
        Ok(size) => {
            debug!("Event {} is {size} bytes, over the {MAX_EVENT_SIZE} byte limit", event.id);
            false
        }
        Err(e) => {
            debug!("Event {} cannot be serialized: {e}", event.id);
            false
        }
    }
}

/// Decides whether an event may be stored.
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    /// `true` to persist `event`, `false` to drop it.
    async fn accept_event(&self, event: &Event) -> bool;
}
