//! Search engine abstraction.
//!
//! The [`SearchEngine`] trait is the indexer's only view of the document
//! search engine. Implementations:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`ElasticClient`](http::ElasticClient) | Elasticsearch-compatible HTTP API |
//! | [`MemoryEngine`](memory::MemoryEngine) | In-process engine for tests and dry runs |
//!
//! Errors are typed so callers can treat "already exists" and "not found"
//! as idempotent no-ops by matching the variant rather than parsing
//! messages.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::Document;

/// Failure reported by a search engine.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The index (or alias) to create already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The index, alias or document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-success HTTP status not covered above.
    #[error("Search engine error {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Some items of a bulk request were rejected.
    #[error("Bulk request rejected {failed} item(s): {reason}")]
    Bulk { failed: usize, reason: String },

    /// Network or protocol failure.
    #[error("Search engine request failed: {0}")]
    Transport(String),
}

impl SearchError {
    /// True for errors that mean the requested state already holds.
    pub fn is_noop(&self) -> bool {
        matches!(self, SearchError::AlreadyExists(_) | SearchError::NotFound(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Transport(err.to_string())
    }
}

/// Operations the indexer needs from a search engine.
///
/// Bulk submission is an upsert keyed by document id: submitting the same
/// chunk twice leaves the index in the same state as submitting it once.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Create an index with the given mapping.
    ///
    /// Returns [`SearchError::AlreadyExists`] when the index exists.
    async fn create_index(
        &self,
        index: &str,
        mapping: &Value,
        shards: u32,
        replicas: u32,
    ) -> Result<(), SearchError>;

    /// Index or replace documents by id.
    async fn bulk_upsert(&self, index: &str, docs: &[(i64, Document)]) -> Result<(), SearchError>;

    async fn delete_document(&self, index: &str, id: i64) -> Result<(), SearchError>;

    async fn delete_index(&self, index: &str) -> Result<(), SearchError>;

    /// Point `alias` at `index` only, detaching it from every other index
    /// in the same atomic request.
    async fn add_alias(&self, index: &str, alias: &str) -> Result<(), SearchError>;

    async fn remove_alias(&self, index: &str, alias: &str) -> Result<(), SearchError>;
}

/// Create an index unless it already exists.
pub async fn create_index_if_missing(
    engine: &dyn SearchEngine,
    index: &str,
    mapping: &Value,
    shards: u32,
    replicas: u32,
) -> Result<(), SearchError> {
    match engine.create_index(index, mapping, shards, replicas).await {
        Err(SearchError::AlreadyExists(_)) => Ok(()),
        other => other,
    }
}
