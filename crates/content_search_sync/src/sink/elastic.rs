//! HTTP client for an Elasticsearch-compatible `_bulk` endpoint, grounded in
//! `fivetran_destination::convex_api::ConvexApi`'s `get`/`post` pattern: a
//! single `reqwest::Client`, JSON bodies, status-code-based error
//! classification. The batching threshold mirrors
//! `fivetran_destination::application::ROWS_BY_REQUEST`.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{
    PendingDocument,
    SinkWriter,
};
use crate::errors::EtlError;

fn sink_err(context: String, e: reqwest::Error) -> EtlError {
    EtlError::SinkConnection(anyhow::Error::new(e).context(context))
}

/// A bulk-upserting client for an Elasticsearch-compatible index, batching
/// documents in memory until `batch_size` is reached.
pub struct ElasticSink {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
    pending: Vec<PendingDocument>,
}

impl ElasticSink {
    pub fn new(base_url: impl Into<String>, batch_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            batch_size,
            pending: Vec::new(),
        }
    }

    /// Builds the NDJSON body for `_bulk`: one `index` action line per
    /// document (`_index`, `_id`), one source line carrying the document
    /// itself. `index` replaces whatever was previously stored at that id,
    /// which is what makes a bunch replayed after a crash (§8 property 2)
    /// safe to write again — the second write produces the same document,
    /// not a merge of old and new fields.
    fn bulk_body(documents: &[PendingDocument]) -> String {
        let mut body = String::new();
        for document in documents {
            let action = json!({
                "index": {
                    "_index": document.index,
                    "_id": document.id.to_string(),
                }
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&document.body.to_string());
            body.push('\n');
        }
        body
    }
}

#[async_trait]
impl SinkWriter for ElasticSink {
    fn save(&mut self, document: PendingDocument) {
        self.pending.push(document);
    }

    fn is_batch_ready(&self) -> bool {
        self.pending.len() >= self.batch_size
    }

    async fn flush(&mut self) -> Result<(), EtlError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let url = format!("{}/_bulk", self.base_url);
        let body = Self::bulk_body(&self.pending);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| sink_err(format!("bulk request to {url} failed"), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EtlError::SinkConnection(anyhow::anyhow!(
                "bulk request to {url} returned {status}: {text}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| sink_err("failed to parse bulk response".to_string(), e))?;
        if payload.get("errors").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(EtlError::SinkConnection(anyhow::anyhow!(
                "bulk request to {url} reported per-item errors: {payload}"
            )));
        }

        self.pending.clear();
        Ok(())
    }

    async fn get(&mut self, index: &'static str, id: Uuid) -> Result<Option<serde_json::Value>, EtlError> {
        let url = format!("{}/{}/_doc/{}", self.base_url, index, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| sink_err(format!("get request to {url} failed"), e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EtlError::SinkConnection(anyhow::anyhow!(
                "get request to {url} returned {status}: {text}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| sink_err("failed to parse get response".to_string(), e))?;
        Ok(payload.get("_source").cloned())
    }
}
