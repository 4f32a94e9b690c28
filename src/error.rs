//! Error taxonomy for the indexing pipeline.
//!
//! Configuration errors are fatal at startup, remote errors abort the
//! current run, and data errors never reach this type: the transformation
//! pipeline recovers from them by dropping the offending field.

use thiserror::Error;

use crate::engine::SearchError;

/// Errors surfaced by the registry, query builder and orchestrator.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Static configuration is unusable (invalid identifier, unknown
    /// entity category, cyclic bundle dependency, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested bundle is not registered.
    #[error("Unknown bundle: '{0}'")]
    UnknownBundle(String),

    /// The run has no entity to process.
    #[error("Nothing to index for bundle '{0}'")]
    NothingToIndex(String),

    /// Relational store failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Search engine failure other than the idempotent no-ops.
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl IndexerError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        IndexerError::Config(msg.into())
    }
}

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, IndexerError>;
