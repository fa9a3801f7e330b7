//! Search-engine transport over the `_bulk` and `_search` REST APIs

use crate::client::{BatchResult, RejectedItem, Transport};
use crate::converter::Document;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// REST transport for an Elasticsearch/OpenSearch cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticsearchTransport {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Maps send failures that never reached the cluster to `Error::Connection`.
fn send_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::Connection(e.to_string())
    } else {
        Error::Http(e)
    }
}

/// NDJSON body of a `_bulk` request: action line then source per document.
pub fn bulk_body(batch: &[Document]) -> Result<String> {
    let mut body = String::new();
    for doc in batch {
        let action = json!({ "index": { "_index": doc.index, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.source)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    status: u16,
    error: Option<Json>,
}

/// Splits a `_bulk` response into accepted and rejected items.
pub fn parse_bulk_response(body: &[u8]) -> Result<BatchResult> {
    let response: BulkResponse = serde_json::from_slice(body)?;
    let mut result = BatchResult::default();
    for item in response.items.into_iter().flat_map(HashMap::into_values) {
        if item.status >= 300 || item.error.is_some() {
            let reason = match &item.error {
                Some(Json::Object(err)) => format!(
                    "{}: {}",
                    err.get("type").and_then(Json::as_str).unwrap_or("error"),
                    err.get("reason").and_then(Json::as_str).unwrap_or("")
                ),
                Some(other) => other.to_string(),
                None => format!("status {}", item.status),
            };
            result.rejected.push(RejectedItem {
                table: item.index,
                id: item.id,
                reason,
            });
        } else {
            result.succeeded += 1;
        }
    }
    if response.errors && result.rejected.is_empty() {
        debug!("Bulk response flagged errors without failed items");
    }
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Map<String, Json>,
}

#[async_trait]
impl Transport for ElasticsearchTransport {
    type Request = Document;
    type Row = Document;

    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn open(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/"))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "{} answered {}",
                self.base_url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn bulk(&self, batch: Vec<Document>) -> Result<BatchResult> {
        if batch.is_empty() {
            return Ok(BatchResult::default());
        }
        let response = self
            .client
            .post(self.url("/_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(&batch)?)
            .send()
            .await
            .map_err(send_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(send_error)?;
        if !status.is_success() {
            return Err(Error::WholeBatchFailure(format!(
                "bulk of {} documents answered {}: {}",
                batch.len(),
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        parse_bulk_response(&body)
    }

    async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = json!({
            "size": ids.len(),
            "query": { "ids": { "values": ids } }
        });
        let response = self
            .client
            .post(self.url(&format!("/{}-*/_search?ignore_unavailable=true", table)))
            .json(&query)
            .send()
            .await
            .map_err(send_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response.error_for_status()?;
        let parsed: SearchResponse = response.json().await.map_err(send_error)?;

        // Daily indices may hold the same id; the latest day wins.
        let mut by_id: HashMap<String, Hit> = HashMap::new();
        for hit in parsed.hits.hits {
            match by_id.get(&hit.id) {
                Some(existing) if existing.index >= hit.index => {}
                _ => {
                    by_id.insert(hit.id.clone(), hit);
                }
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .map(|hit| Document {
                index: hit.index,
                id: hit.id,
                source: hit.source,
            })
            .collect())
    }
}
