//! Elasticsearch engine over the REST API.
//!
//! Events are documents in a single index, keyed by event id. Uniqueness comes
//! from the `_create` endpoint (HTTP 409 on an existing id); deletion and
//! retention both go through `_delete_by_query`.

use super::{EventFilter, SaveOutcome, Storage, StorageKind};
use crate::error::{Error, Result};
use crate::event::Event;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_URL: &str = "http://localhost:9200";
const INDEX: &str = "events";
/// Upper bound on hits returned by an unlimited lookup.
const MAX_SEARCH_SIZE: usize = 500;

/// Elasticsearch-backed event store.
#[derive(Clone)]
pub struct ElasticsearchStorage {
    client: Client,
    base: Url,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: Event,
}

#[derive(Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

impl ElasticsearchStorage {
    /// Create a client for the cluster at `location`.
    ///
    /// Anything that is not an `http(s)://` URL (such as the default SQLite
    /// path) selects a local cluster on port 9200.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the HTTP client cannot be built.
    pub fn new(location: &str) -> Result<Self> {
        let raw = if location.starts_with("http://") || location.starts_with("https://") {
            location
        } else {
            info!("STORAGE_DB is not an Elasticsearch URL, using {DEFAULT_URL}");
            DEFAULT_URL
        };
        let base = Url::parse(raw)
            .map_err(|e| Error::Config(format!("invalid Elasticsearch URL {raw}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid Elasticsearch URL {raw}")));
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn delete_by_query(&self, body: Value) -> Result<u64> {
        let mut url = self.url(&[INDEX, "_delete_by_query"]);
        url.query_pairs_mut()
            .append_pair("refresh", "true")
            .append_pair("conflicts", "proceed");
        let response = self.client.post(url).json(&body).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let response = ensure_success(response).await?;
        Ok(response.json::<DeleteByQueryResponse>().await?.deleted)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Storage(format!("Elasticsearch returned {status}: {body}")))
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "pubkey": { "type": "keyword" },
                "created_at": { "type": "long" },
                "kind": { "type": "integer" },
                "tags": { "type": "keyword" },
                "content": { "type": "text" },
                "sig": { "type": "keyword", "index": false }
            }
        }
    })
}

fn search_body(filter: &EventFilter) -> Value {
    let mut clauses = Vec::new();
    if !filter.ids.is_empty() {
        clauses.push(json!({ "terms": { "id": filter.ids } }));
    }
    if !filter.authors.is_empty() {
        clauses.push(json!({ "terms": { "pubkey": filter.authors } }));
    }
    if filter.since.is_some() || filter.until.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(since) = filter.since {
            range.insert("gte".into(), json!(since));
        }
        if let Some(until) = filter.until {
            range.insert("lte".into(), json!(until));
        }
        clauses.push(json!({ "range": { "created_at": range } }));
    }
    json!({
        "query": { "bool": { "filter": clauses } },
        "sort": [{ "created_at": "desc" }, { "id": "asc" }],
        "size": filter.limit.unwrap_or(MAX_SEARCH_SIZE).min(MAX_SEARCH_SIZE),
    })
}

fn delete_body(id: &str, pubkey: &str) -> Value {
    json!({
        "query": {
            "bool": {
                "filter": [
                    { "term": { "id": id } },
                    { "term": { "pubkey": pubkey } }
                ]
            }
        }
    })
}

fn purge_body(cutoff: u64) -> Value {
    json!({ "query": { "range": { "created_at": { "lt": cutoff } } } })
}

#[async_trait]
impl Storage for ElasticsearchStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Elasticsearch
    }

    async fn init(&self) -> Result<()> {
        let response = self
            .client
            .put(self.url(&[INDEX]))
            .json(&index_mapping())
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                debug!("Elasticsearch index {INDEX} already exists");
                return Ok(());
            }
            return Err(Error::Storage(format!(
                "Elasticsearch rejected index creation: {body}"
            )));
        }
        ensure_success(response).await?;
        info!("Created Elasticsearch index {INDEX}");
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let mut url = self.url(&[INDEX, "_create", &event.id]);
        url.query_pairs_mut().append_pair("refresh", "wait_for");
        let response = self.client.put(url).json(event).send().await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(SaveOutcome::Duplicate);
        }
        ensure_success(response).await?;
        Ok(SaveOutcome::Stored)
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let response = self
            .client
            .post(self.url(&[INDEX, "_search"]))
            .json(&search_body(filter))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = ensure_success(response).await?;
        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.hits.hits.into_iter().map(|hit| hit.source).collect())
    }

    async fn delete_event(&self, id: &str, pubkey: &str) -> Result<u64> {
        self.delete_by_query(delete_body(id, pubkey)).await
    }

    async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        self.delete_by_query(purge_body(cutoff)).await
    }
}
