//! The `SinkWriter` boundary: everything the Coordinator needs from the
//! search index, abstracted the same way [`crate::source::Source`] is, so
//! it can be driven against an in-memory fake in tests.

pub mod elastic;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::EtlError;

/// One document queued for upsert, carrying the index it belongs to since a
/// single pass writes to `movies`/`genres`/`persons` in the same batch
/// boundary accounting (see §4.7's batch-readiness note).
#[derive(Debug, Clone)]
pub struct PendingDocument {
    pub index: &'static str,
    pub id: Uuid,
    pub body: serde_json::Value,
}

impl PendingDocument {
    pub fn new(index: &'static str, id: Uuid, body: impl Serialize) -> Result<Self, EtlError> {
        let body = serde_json::to_value(body)
            .map_err(|e| EtlError::Validation(crate::errors::ValidationError::BadTimestamp {
                entity: index,
                id: id.to_string(),
                field: "<document>",
                reason: e.to_string(),
            }))?;
        Ok(Self { index, id, body })
    }
}

/// The search-index sink, abstracted so the Coordinator is agnostic to
/// whether it is talking to a live Elasticsearch-compatible endpoint or an
/// in-memory fixture.
#[async_trait]
pub trait SinkWriter: Send {
    /// Queues a document for upsert. Does not guarantee the document is
    /// durable in the index until a subsequent `flush` succeeds.
    fn save(&mut self, document: PendingDocument);

    /// True once enough documents are queued that the Coordinator should
    /// flush before checkpointing, per §4.7.
    fn is_batch_ready(&self) -> bool;

    /// Upserts every queued document and clears the queue on success. A
    /// partial failure leaves the queue untouched so a retried `flush` is
    /// safe (at-least-once, not exactly-once, per §8 property 2).
    async fn flush(&mut self) -> Result<(), EtlError>;

    /// Fetches a single document by id, for tests and diagnostics; returns
    /// `None` if the index has no such document (mirrors
    /// `ElasticSearchSaver.get` swallowing a 404).
    async fn get(&mut self, index: &'static str, id: Uuid) -> Result<Option<serde_json::Value>, EtlError>;
}
