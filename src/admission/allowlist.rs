//! Static allow-list policy for the basic relay.

use super::{within_size_limit, AdmissionPolicy};
use crate::event::Event;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

/// Admits events from a fixed set of identities.
///
/// Membership is an exact string match. An empty list admits nobody.
#[derive(Debug, Clone, Default)]
pub struct AllowListPolicy {
    allowed: HashSet<String>,
}

impl AllowListPolicy {
    /// Build a policy from configured identities; blank entries are skipped.
    #[must_use]
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = identities
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| !id.trim().is_empty())
            .collect();
        Self { allowed }
    }

    /// Whether `pubkey` is on the list.
    #[must_use]
    pub fn contains(&self, pubkey: &str) -> bool {
        self.allowed.contains(pubkey)
    }

    /// Number of listed identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

#[async_trait]
impl AdmissionPolicy for AllowListPolicy {
    async fn accept_event(&self, event: &Event) -> bool {
        if !self.contains(&event.pubkey) {
            debug!("Rejecting event {} from unlisted {}", event.id, event.pubkey);
            return false;
        }
        within_size_limit(event)
    }
}
