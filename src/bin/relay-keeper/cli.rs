//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use relay_keeper::config::{RelayConfig, RelayMode};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Nostr relay admission and retention service.
#[derive(Parser, Debug)]
#[command(name = "relay-keeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Relay name shown to clients.
    #[arg(long, env = "RELAY_NAME")]
    pub name: Option<String>,

    /// Admission policy.
    #[arg(long, value_enum, env = "RELAY_MODE")]
    pub mode: Option<CliRelayMode>,

    /// Storage engine: sqlite3, postgresql, elasticsearch or memory.
    #[arg(long, env = "STORAGE_TYPE")]
    pub storage_type: Option<String>,

    /// Storage location (file path, connection string or URL).
    #[arg(long, env = "STORAGE_DB")]
    pub storage_db: Option<String>,

    /// Identities allowed to publish on the basic relay.
    #[arg(long, env = "WHITELIST", value_delimiter = ',')]
    pub whitelist: Vec<String>,

    /// Lightning node id shown to payers.
    #[arg(long, env = "CLN_NODE_ID")]
    pub cln_node_id: Option<String>,

    /// Base URL of the Core Lightning REST interface.
    #[arg(long, env = "CLN_HOST")]
    pub cln_host: Option<String>,

    /// Rune for the Core Lightning REST interface.
    #[arg(long, env = "CLN_RUNE", hide_env_values = true)]
    pub cln_rune: Option<String>,

    /// Price of access, in satoshis.
    #[arg(long, env = "TICKET_PRICE_SATS")]
    pub ticket_price_sats: Option<u64>,

    /// SQLite file for invoice records.
    #[arg(long, env = "INVOICE_DB")]
    pub invoice_db: Option<PathBuf>,

    /// Seconds to wait for the Lightning node.
    #[arg(long, env = "PAYMENT_TIMEOUT_SECS")]
    pub payment_timeout_secs: Option<u64>,

    /// Lifetime of issued invoices, in seconds.
    #[arg(long, env = "INVOICE_EXPIRY_SECS")]
    pub invoice_expiry_secs: Option<u64>,

    /// Address for the HTTP routes.
    #[arg(long, env = "BIND_HTTP")]
    pub bind_http: Option<SocketAddr>,

    /// Minutes between retention passes.
    #[arg(long, env = "RETENTION_INTERVAL_MINUTES")]
    pub retention_interval_minutes: Option<u64>,

    /// Retention window, in calendar months.
    #[arg(long, env = "RETENTION_WINDOW_MONTHS")]
    pub retention_window_months: Option<u32>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Relay mode CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliRelayMode {
    /// Static allow-list.
    Basic,
    /// Lightning payment gate.
    Expensive,
}

impl Cli {
    /// Convert CLI arguments into a `RelayConfig`.
    ///
    /// Flags and environment variables override values from the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<RelayConfig> {
        let mut config = if let Some(ref path) = self.config {
            RelayConfig::from_file(path)?
        } else {
            RelayConfig::default()
        };

        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(storage_type) = self.storage_type {
            config.storage_type = storage_type;
        }
        if let Some(storage_db) = self.storage_db {
            config.storage_db = storage_db;
        }
        let whitelist: Vec<String> = self
            .whitelist
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if !whitelist.is_empty() {
            config.whitelist = whitelist;
        }
        if let Some(bind_http) = self.bind_http {
            config.bind_http = bind_http;
        }

        if let Some(minutes) = self.retention_interval_minutes {
            config.retention.interval_minutes = minutes;
        }
        if let Some(months) = self.retention_window_months {
            config.retention.window_months = months;
        }

        let payment = &mut config.payment;
        if let Some(node_id) = self.cln_node_id {
            payment.cln_node_id = node_id;
        }
        if let Some(host) = self.cln_host {
            payment.cln_host = host;
        }
        if let Some(rune) = self.cln_rune {
            payment.cln_rune = rune;
        }
        if let Some(price) = self.ticket_price_sats {
            payment.ticket_price_sats = price;
        }
        if let Some(path) = self.invoice_db {
            payment.invoice_db = Some(path);
        }
        if let Some(secs) = self.payment_timeout_secs {
            payment.timeout_secs = secs;
        }
        if let Some(secs) = self.invoice_expiry_secs {
            payment.invoice_expiry_secs = secs;
        }

        config.log_level = self.log_level;

        config.validate()?;
        Ok(config)
    }
}

impl From<CliRelayMode> for RelayMode {
    fn from(m: CliRelayMode) -> Self {
        match m {
            CliRelayMode::Basic => RelayMode::Basic,
            CliRelayMode::Expensive => RelayMode::Expensive,
        }
    }
}
