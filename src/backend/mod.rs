//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait is everything finder needs from the indexing
//! backend: a liveness probe, index administration for the startup
//! bootstrap, document writes for the sync engine, and status information
//! for `/status`.
//!
//! Implementations:
//! - **[`ElasticsearchBackend`]**: Elasticsearch over its HTTP API.
//! - **[`InMemoryBackend`]**: keeps indices in memory and records every call, for tests.

pub mod elasticsearch;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::IndexDocument;

pub use elasticsearch::ElasticsearchBackend;
pub use memory::{BackendCall, InMemoryBackend};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("invalid backend url '{0}'")]
    InvalidUrl(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Where the backend lives, for logs and `/status`.
    fn location(&self) -> &str;

    /// Liveness probe. Must give up after `timeout`.
    async fn ping(&self, timeout: Duration) -> Result<(), BackendError>;

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError>;

    async fn delete_index(&self, index: &str) -> Result<(), BackendError>;

    async fn create_index(&self, index: &str) -> Result<(), BackendError>;

    /// Apply `mapping` to `index`, under `mapping_type` for clusters that
    /// still use mapping types.
    async fn put_mapping(
        &self,
        index: &str,
        mapping_type: Option<&str>,
        mapping: &Value,
    ) -> Result<(), BackendError>;

    /// Create or replace the document stored under `id`.
    async fn index_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
        doc: &IndexDocument,
    ) -> Result<(), BackendError>;

    /// Remove the document stored under `id`. Removing a document that does
    /// not exist succeeds.
    async fn delete_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
    ) -> Result<(), BackendError>;

    /// Cluster information (name, version, …).
    async fn info(&self) -> Result<Value, BackendError>;

    /// Per-index statistics, keyed by index name.
    async fn index_stats(&self) -> Result<Value, BackendError>;
}
