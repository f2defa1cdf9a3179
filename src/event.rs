//! Nostr event model as seen by the admission and storage layers.

use serde::{Deserialize, Serialize};

/// A single Nostr tag such as `["p", "<pubkey>"]` or `["t", "news"]`.
///
/// Tags are kept verbatim; this layer never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

/// A signed, content-addressed Nostr event.
///
/// ```json
/// {
///   "id": "4376c65d...",
///   "pubkey": "6e468422...",
///   "created_at": 1700000000,
///   "kind": 1,
///   "tags": [["t", "news"]],
///   "content": "hello",
///   "sig": "908a15e4..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex SHA-256 of the canonical serialization).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Unix timestamp of creation, in seconds.
    pub created_at: u64,
    /// Kind number, e.g. `1` for a short text note.
    pub kind: u32,
    /// Arbitrary tags.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event id.
    pub sig: String,
}

impl Event {
    /// Length in bytes of the event's JSON serialization.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn serialized_size(&self) -> crate::Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_size_matches_json_length() {
        let event = Event {
            id: "aa".into(),
            pubkey: "bb".into(),
            created_at: 1,
            kind: 1,
            tags: vec![Tag(vec!["t".into(), "news".into()])],
            content: "hello".into(),
            sig: String::new(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(event.serialized_size().expect("size"), json.len());
        assert!(json.contains(r#""tags":[["t","news"]]"#));
    }

    #[test]
    fn test_deserializes_wire_shape() {
        let raw = r#"{"id":"ab","pubkey":"cd","created_at":42,"kind":7,"tags":[["e","ff"]],"content":"+","sig":"00"}"#;
        let event: Event = serde_json::from_str(raw).expect("parse");
        assert_eq!(event.created_at, 42);
        assert_eq!(event.tags[0].0, vec!["e".to_string(), "ff".to_string()]);
    }
}
