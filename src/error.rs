//! Error types for relay-keeper.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the admission, retention and invoice layers.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage engine failure not covered by a more specific variant.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Payment backend failure (unreachable node, bad response, timeout).
    #[error("Payment error: {0}")]
    Payment(String),

    /// An identity that cannot own an invoice.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Filesystem or socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite engine failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL engine failure.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// HTTP client failure talking to Elasticsearch or the payment node.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
