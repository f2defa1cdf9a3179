//! Configuration for relay-keeper.
//!
//! A [`RelayConfig`] is resolved once at startup (TOML file, then CLI flags and
//! environment variables) and handed by value to [`crate::RelayBuilder`].
//! Nothing reads configuration from ambient state after that.

use crate::error::{Error, Result};
use crate::storage::StorageKind;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Admission policy the relay runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Static allow-list of identities.
    #[default]
    Basic,
    /// Identities must hold a settled Lightning invoice.
    Expensive,
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay name shown to clients and embedded in invoices.
    #[serde(default = "default_name")]
    pub name: String,

    /// Admission policy.
    #[serde(default)]
    pub mode: RelayMode,

    /// Storage engine name: `sqlite3`, `postgresql`, `elasticsearch` or `memory`.
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    /// Storage location: a file path, connection string or index URL.
    #[serde(default = "default_storage_db")]
    pub storage_db: String,

    /// Identities admitted by the basic relay.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Address the auxiliary HTTP routes are served on.
    #[serde(default = "default_bind_http")]
    pub bind_http: SocketAddr,

    /// Retention configuration.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Payment configuration (expensive relay only).
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Retention janitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Minutes between cleanup passes.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Events older than this many calendar months are purged.
    #[serde(default = "default_window_months")]
    pub window_months: u32,
}

/// Lightning payment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Node id shown to payers.
    #[serde(default)]
    pub cln_node_id: String,

    /// Base URL of the node's REST interface.
    #[serde(default)]
    pub cln_host: String,

    /// Rune authorizing invoice creation and lookup.
    #[serde(default)]
    pub cln_rune: String,

    /// Price of access, in satoshis.
    #[serde(default)]
    pub ticket_price_sats: u64,

    /// SQLite file for invoice records. In-memory when unset.
    #[serde(default)]
    pub invoice_db: Option<PathBuf>,

    /// Upper bound on a single payment node round-trip, in seconds.
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,

    /// Lifetime of an issued invoice, in seconds.
    #[serde(default = "default_invoice_expiry")]
    pub invoice_expiry_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            mode: RelayMode::default(),
            storage_type: default_storage_type(),
            storage_db: default_storage_db(),
            whitelist: Vec::new(),
            bind_http: default_bind_http(),
            retention: RetentionConfig::default(),
            payment: PaymentConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            window_months: default_window_months(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            cln_node_id: String::new(),
            cln_host: String::new(),
            cln_rune: String::new(),
            ticket_price_sats: 0,
            invoice_db: None,
            timeout_secs: default_payment_timeout(),
            invoice_expiry_secs: default_invoice_expiry(),
        }
    }
}

fn default_name() -> String {
    "relay-keeper".to_string()
}

fn default_storage_type() -> String {
    "sqlite3".to_string()
}

fn default_storage_db() -> String {
    "./storage.db".to_string()
}

fn default_bind_http() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7447))
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Longest retention interval accepted, one year in minutes.
pub const MAX_RETENTION_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

const fn default_interval_minutes() -> u64 {
    60
}

const fn default_window_months() -> u32 {
    3
}

const fn default_payment_timeout() -> u64 {
    10
}

const fn default_invoice_expiry() -> u64 {
    3600
}

impl RetentionConfig {
    /// Interval between cleanup passes.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl PaymentConfig {
    /// Timeout for a single payment node round-trip.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Lifetime of an issued invoice.
    #[must_use]
    pub fn invoice_expiry(&self) -> Duration {
        Duration::from_secs(self.invoice_expiry_secs)
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The storage engine this configuration selects.
    ///
    /// Unrecognized names fall back to SQLite with a warning.
    #[must_use]
    pub fn storage_kind(&self) -> StorageKind {
        StorageKind::resolve(&self.storage_type)
    }

    /// Check the settings a relay cannot start without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.storage_db.trim().is_empty() {
            return Err(Error::Config("STORAGE_DB must not be empty".to_string()));
        }

        if self.storage_kind() == StorageKind::Postgresql
            && !(self.storage_db.starts_with("postgres://")
                || self.storage_db.starts_with("postgresql://"))
        {
            return Err(Error::Config(format!(
                "STORAGE_DB is not a PostgreSQL connection string: {}",
                self.storage_db
            )));
        }

        if self.retention.interval_minutes == 0 {
            return Err(Error::Config(
                "retention interval must be at least one minute".to_string(),
            ));
        }
        if self.retention.interval_minutes > MAX_RETENTION_INTERVAL_MINUTES {
            return Err(Error::Config(format!(
                "retention interval must not exceed {MAX_RETENTION_INTERVAL_MINUTES} minutes"
            )));
        }
        if self.retention.window_months == 0 {
            return Err(Error::Config(
                "retention window must be at least one month".to_string(),
            ));
        }

        if self.mode == RelayMode::Expensive {
            if self.payment.cln_host.trim().is_empty() {
                return Err(Error::Config("CLN_HOST is required".to_string()));
            }
            if self.payment.cln_rune.trim().is_empty() {
                return Err(Error::Config("CLN_RUNE is required".to_string()));
            }
            if self.payment.ticket_price_sats == 0 {
                return Err(Error::Config(
                    "TICKET_PRICE_SATS must be greater than zero".to_string(),
                ));
            }
            if self.payment.timeout_secs == 0 {
                return Err(Error::Config(
                    "payment timeout must be at least one second".to_string(),
                ));
            }
            if self.payment.invoice_expiry_secs == 0 {
                return Err(Error::Config(
                    "invoice expiry must be at least one second".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn expensive() -> RelayConfig {
        RelayConfig {
            mode: RelayMode::Expensive,
            payment: PaymentConfig {
                cln_host: "https://node.example:3010".into(),
                cln_rune: "rune".into(),
                ticket_price_sats: 500,
                ..PaymentConfig::default()
            },
            ..RelayConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.mode, RelayMode::Basic);
        assert_eq!(config.storage_kind(), StorageKind::Sqlite3);
        assert_eq!(config.storage_db, "./storage.db");
        assert!(config.whitelist.is_empty());
        assert_eq!(config.retention.interval(), Duration::from_secs(3600));
        assert_eq!(config.retention.window_months, 3);
        assert_eq!(config.payment.timeout(), Duration::from_secs(10));
        assert_eq!(config.payment.invoice_expiry(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expensive_requires_payment_settings() {
        assert!(expensive().validate().is_ok());

        let mut missing_host = expensive();
        missing_host.payment.cln_host.clear();
        assert!(matches!(missing_host.validate(), Err(Error::Config(_))));

        let mut missing_rune = expensive();
        missing_rune.payment.cln_rune = "  ".into();
        assert!(matches!(missing_rune.validate(), Err(Error::Config(_))));

        let mut free = expensive();
        free.payment.ticket_price_sats = 0;
        assert!(matches!(free.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_retention_bounds() {
        let mut config = RelayConfig::default();
        config.retention.interval_minutes = MAX_RETENTION_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());

        config.retention.interval_minutes = u64::MAX;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.retention.interval_minutes = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut wipe_all = RelayConfig::default();
        wipe_all.retention.window_months = 0;
        assert!(matches!(wipe_all.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_postgres_requires_connection_string() {
        let mut config = RelayConfig {
            storage_type: "postgresql".into(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        config.storage_db = "postgres://relay@localhost/relay".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip_with_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            concat!(
                "mode = \"expensive\"\n",
                "storage_type = \"memory\"\n",
                "whitelist = [\"abc\"]\n",
                "[payment]\n",
                "cln_host = \"https://node\"\n",
                "cln_rune = \"r\"\n",
                "ticket_price_sats = 21\n",
            ),
        )
        .expect("write");

        let config = RelayConfig::from_file(&path).expect("load");
        assert_eq!(config.mode, RelayMode::Expensive);
        assert_eq!(config.storage_kind(), StorageKind::Memory);
        assert_eq!(config.whitelist, vec!["abc".to_string()]);
        assert_eq!(config.payment.ticket_price_sats, 21);
        assert_eq!(config.payment.timeout(), Duration::from_secs(10));
        assert_eq!(config.retention.window_months, 3);

        let out = dir.path().join("out.toml");
        config.to_file(&out).expect("save");
        let reloaded = RelayConfig::from_file(&out).expect("reload");
        assert_eq!(reloaded.payment.cln_host, "https://node");
    }
}
