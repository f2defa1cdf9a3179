//! External Lightning node interface.
//!
//! [`PaymentBackend`] is the seam between the invoice manager and whatever
//! actually issues and settles invoices. [`ClnRestBackend`] talks to a Core
//! Lightning node over its REST plugin.

use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Parameters for a new invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    /// Amount to charge, in satoshis.
    pub amount_sats: u64,
    /// Label unique per invoice on the node.
    pub label: String,
    /// Human-readable description embedded in the invoice.
    pub description: String,
    /// Lifetime of the invoice.
    pub expiry: Duration,
}

/// An invoice the node has issued.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedInvoice {
    /// BOLT11 payment request.
    pub bolt11: String,
    /// Payment hash identifying the invoice.
    pub payment_hash: String,
    /// Unix timestamp after which the invoice can no longer be paid.
    pub expires_at: u64,
}

/// Settlement state reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Not paid yet.
    Unpaid,
    /// Paid in full.
    Paid,
    /// Expired without payment.
    Expired,
}

/// Issues invoices and reports their settlement.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Ask the node for a new invoice.
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<IssuedInvoice>;

    /// Current settlement state of the invoice with `payment_hash`.
    async fn invoice_status(&self, payment_hash: &str) -> Result<InvoiceStatus>;
}

/// Connection settings for a Core Lightning REST endpoint.
#[derive(Debug, Clone)]
pub struct ClnRestConfig {
    /// Base URL, e.g. `https://127.0.0.1:3010`.
    pub host: String,
    /// Rune sent in the `Rune` header.
    pub rune: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ClnRestConfig {
    /// Take the node settings out of the payment configuration.
    #[must_use]
    pub fn from_payment_config(config: &PaymentConfig) -> Self {
        Self {
            host: config.cln_host.clone(),
            rune: config.cln_rune.clone(),
            request_timeout: config.timeout(),
        }
    }
}

#[derive(Serialize)]
struct CreateInvoiceBody<'a> {
    amount_msat: u64,
    label: &'a str,
    description: &'a str,
    expiry: u64,
}

#[derive(Serialize)]
struct ListInvoicesBody<'a> {
    payment_hash: &'a str,
}

#[derive(Deserialize)]
struct ListInvoicesResponse {
    invoices: Vec<ListedInvoice>,
}

#[derive(Deserialize)]
struct ListedInvoice {
    status: InvoiceStatus,
}

/// Core Lightning node reached through `clnrest`.
pub struct ClnRestBackend {
    client: Client,
    base: Url,
    rune: String,
}

impl ClnRestBackend {
    /// Create a backend for the node described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(config: ClnRestConfig) -> Result<Self> {
        let base = Url::parse(&config.host)
            .map_err(|e| Error::Config(format!("invalid CLN_HOST {}: {e}", config.host)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid CLN_HOST {}", config.host)));
        }
        let client = Client::builder().timeout(config.request_timeout).build()?;

        info!("Payment backend: Core Lightning at {base}");
        Ok(Self {
            client,
            base,
            rune: config.rune,
        })
    }

    fn endpoint(&self, method: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["v1", method]);
        }
        url
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(method))
            .header("Rune", &self.rune)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Payment(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Payment(format!("{method} returned {status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Payment(format!("{method} returned an unreadable body: {e}")))
    }
}

#[async_trait]
impl PaymentBackend for ClnRestBackend {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<IssuedInvoice> {
        let body = CreateInvoiceBody {
            amount_msat: request.amount_sats.saturating_mul(1_000),
            label: &request.label,
            description: &request.description,
            expiry: request.expiry.as_secs(),
        };
        let invoice: IssuedInvoice = self.call("invoice", &body).await?;
        debug!("Node issued invoice {}", invoice.payment_hash);
        Ok(invoice)
    }

    async fn invoice_status(&self, payment_hash: &str) -> Result<InvoiceStatus> {
        let listed: ListInvoicesResponse = self
            .call("listinvoices", &ListInvoicesBody { payment_hash })
            .await?;
        listed
            .invoices
            .first()
            .map(|invoice| invoice.status)
            .ok_or_else(|| Error::Payment(format!("node has no invoice {payment_hash}")))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn config(host: &str) -> ClnRestConfig {
        ClnRestConfig {
            host: host.into(),
            rune: "rune".into(),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_endpoints_extend_base_path() {
        let backend = ClnRestBackend::new(config("https://node.local:3010/")).expect("backend");
        assert_eq!(
            backend.endpoint("invoice").as_str(),
            "https://node.local:3010/v1/invoice"
        );

        let nested = ClnRestBackend::new(config("https://proxy.local/cln")).expect("backend");
        assert_eq!(
            nested.endpoint("listinvoices").as_str(),
            "https://proxy.local/cln/v1/listinvoices"
        );
    }

    #[test]
    fn test_rejects_malformed_host() {
        assert!(matches!(
            ClnRestBackend::new(config("not a url")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_status_parses_node_vocabulary() {
        let listed: ListInvoicesResponse = serde_json::from_str(
            r#"{"invoices":[{"label":"x","status":"paid","payment_hash":"h"}]}"#,
        )
        .expect("parse");
        assert_eq!(listed.invoices[0].status, InvoiceStatus::Paid);

        let expired: ListedInvoice =
            serde_json::from_str(r#"{"status":"expired"}"#).expect("parse");
        assert_eq!(expired.status, InvoiceStatus::Expired);
    }

    #[test]
    fn test_issued_invoice_ignores_extra_fields() {
        let invoice: IssuedInvoice = serde_json::from_str(
            r#"{"payment_hash":"h","expires_at":1700003600,"bolt11":"lnbc1","payment_secret":"s","created_index":4}"#,
        )
        .expect("parse");
        assert_eq!(invoice.payment_hash, "h");
        assert_eq!(invoice.expires_at, 1_700_003_600);
    }

    #[test]
    fn test_amount_is_sent_in_millisatoshis() {
        let body = CreateInvoiceBody {
            amount_msat: 21u64.saturating_mul(1_000),
            label: "l",
            description: "d",
            expiry: 60,
        };
        let value = serde_json::to_value(&body).expect("encode");
        assert_eq!(value["amount_msat"], 21_000);
        assert_eq!(value["expiry"], 60);
    }
}
