//! Payment-gated policy for the expensive relay.

use super::{within_size_limit, AdmissionPolicy};
use crate::event::Event;
use crate::payment::InvoiceManager;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Admits events from identities holding a settled invoice.
#[derive(Clone)]
pub struct PaymentGatePolicy {
    invoices: Arc<InvoiceManager>,
}

impl PaymentGatePolicy {
    /// Gate on settlement as reported by `invoices`.
    #[must_use]
    pub fn new(invoices: Arc<InvoiceManager>) -> Self {
        Self { invoices }
    }
}

#[async_trait]
impl AdmissionPolicy for PaymentGatePolicy {
    async fn accept_event(&self, event: &Event) -> bool {
        if !self.invoices.check_settled(&event.pubkey).await {
            debug!("Rejecting event {} from unpaid {}", event.id, event.pubkey);
            return false;
        }
        within_size_limit(event)
    }
}
