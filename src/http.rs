//! Auxiliary HTTP routes served next to the relay.
//!
//! Every relay answers `GET /healthz`. The expensive relay also serves a
//! landing page at `/` and issues invoices at `/invoice`.

use crate::error::{Error, Result};
use crate::payment::{InvoiceDescriptor, InvoiceManager};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// What the routes need to know about the relay.
#[derive(Clone)]
pub struct HttpState {
    /// Relay name shown on the landing page.
    pub relay_name: String,
    /// Lightning node id shown to payers.
    pub node_id: String,
    /// Invoice manager; `None` for relays without a payment gate.
    pub invoices: Option<Arc<InvoiceManager>>,
}

/// Response body for the `/healthz` endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    /// Always "ok" when the server is running.
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceParams {
    #[serde(default)]
    pubkey: String,
}

/// [`Error`] rendered as a JSON error response.
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            Error::Payment(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Build the router for `state`.
pub fn router(state: HttpState) -> Router {
    let paid = state.invoices.is_some();
    let mut app: Router<Arc<HttpState>> = Router::new().route("/healthz", get(healthz));
    if paid {
        app = app
            .route("/", get(landing_page))
            .route("/invoice", get(invoice_by_query).post(invoice_by_body));
    }
    app.with_state(Arc::new(state))
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve_http(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP routes listening on {addr}");
    }
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

async fn landing_page(State(state): State<Arc<HttpState>>) -> Html<String> {
    let price = state.invoices.as_ref().map_or(0, |m| m.price_sats());
    Html(render_landing_page(&state.relay_name, price, &state.node_id))
}

async fn invoice_by_query(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<InvoiceParams>,
) -> std::result::Result<Json<InvoiceDescriptor>, ApiError> {
    issue(&state, &params.pubkey).await
}

async fn invoice_by_body(
    State(state): State<Arc<HttpState>>,
    Json(params): Json<InvoiceParams>,
) -> std::result::Result<Json<InvoiceDescriptor>, ApiError> {
    issue(&state, &params.pubkey).await
}

async fn issue(
    state: &HttpState,
    pubkey: &str,
) -> std::result::Result<Json<InvoiceDescriptor>, ApiError> {
    let manager = state
        .invoices
        .as_ref()
        .ok_or_else(|| ApiError(Error::Config("relay does not sell access".to_string())))?;
    debug!("Invoice requested for {pubkey:?}");
    let invoice = manager.request_invoice(pubkey).await.map_err(ApiError)?;
    Ok(Json(invoice))
}

fn render_landing_page(name: &str, price_sats: u64, node_id: &str) -> String {
    let name = escape_html(name);
    let node_id = escape_html(node_id);
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>{name}</title></head>
<body>
<h1>{name}</h1>
<p>Publishing to this relay costs a one-time payment of <b>{price_sats} sats</b>.
Once the invoice for your public key is paid, every event you publish is accepted.</p>
<p>Lightning node: <code>{node_id}</code></p>
<form action="/invoice" method="get">
<input name="pubkey" placeholder="hex public key" size="70" required>
<button type="submit">Get invoice</button>
</form>
</body>
</html>
"#
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::notify::create_event_channel;
    use crate::payment::{
        InvoiceManagerConfig, InvoiceRequest, InvoiceStatus, IssuedInvoice, MemoryInvoiceStore,
        PaymentBackend,
    };
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use tokio::sync::oneshot;

    struct Node {
        fail: bool,
    }

    #[async_trait]
    impl PaymentBackend for Node {
        async fn create_invoice(&self, request: InvoiceRequest) -> Result<IssuedInvoice> {
            if self.fail {
                return Err(Error::Payment("node unreachable".into()));
            }
            Ok(IssuedInvoice {
                bolt11: format!("lnbc{}", request.amount_sats),
                payment_hash: "hash".into(),
                expires_at: u64::MAX,
            })
        }

        async fn invoice_status(&self, _payment_hash: &str) -> Result<InvoiceStatus> {
            Ok(InvoiceStatus::Unpaid)
        }
    }

    fn state(invoices: Option<Node>) -> HttpState {
        let (tx, _rx) = create_event_channel();
        HttpState {
            relay_name: "<paid> relay".into(),
            node_id: "02abc".into(),
            invoices: invoices.map(|node| {
                Arc::new(InvoiceManager::new(
                    Arc::new(MemoryInvoiceStore::new()),
                    Arc::new(node),
                    InvoiceManagerConfig {
                        price_sats: 21,
                        ..InvoiceManagerConfig::default()
                    },
                    tx,
                ))
            }),
        }
    }

    async fn spawn(state: HttpState) -> (SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(serve_http(listener, router(state), async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, _stop) = spawn(state(None)).await;
        let resp = reqwest::get(format!("http://{addr}/healthz"))
            .await
            .expect("request");
        let body: Health = resp.json().await.expect("json");
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_basic_relay_has_no_invoice_route() {
        let (addr, _stop) = spawn(state(None)).await;
        let resp = reqwest::get(format!("http://{addr}/invoice?pubkey=abc"))
            .await
            .expect("request");
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_landing_page_escapes_name() {
        let (addr, _stop) = spawn(state(Some(Node { fail: false }))).await;
        let page = reqwest::get(format!("http://{addr}/"))
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert!(page.contains("&lt;paid&gt; relay"));
        assert!(page.contains("21 sats"));
        assert!(page.contains("02abc"));
    }

    #[tokio::test]
    async fn test_invoice_via_get_and_post() {
        let (addr, _stop) = spawn(state(Some(Node { fail: false }))).await;
        let by_query: serde_json::Value = reqwest::get(format!("http://{addr}/invoice?pubkey=abc"))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(by_query["pubkey"], "abc");
        assert_eq!(by_query["bolt11"], "lnbc21");
        assert_eq!(by_query["amount_sats"], 21);
        assert_eq!(by_query["paid"], false);

        let by_body: serde_json::Value = reqwest::Client::new()
            .post(format!("http://{addr}/invoice"))
            .json(&json!({ "pubkey": "abc" }))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(by_body, by_query);
    }

    #[tokio::test]
    async fn test_invoice_error_statuses() {
        let (addr, _stop) = spawn(state(Some(Node { fail: false }))).await;
        let missing = reqwest::get(format!("http://{addr}/invoice"))
            .await
            .expect("request");
        assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);

        let (addr, _stop) = spawn(state(Some(Node { fail: true }))).await;
        let failed = reqwest::get(format!("http://{addr}/invoice?pubkey=abc"))
            .await
            .expect("request");
        assert_eq!(failed.status(), reqwest::StatusCode::BAD_GATEWAY);
    }
}
