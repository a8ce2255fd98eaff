//! Indexing pipeline: stream message → guard → graph upsert → search index

mod events;
mod handler;

pub use events::{EventKind, EventRoutes, RecipeEvent};
pub use handler::{Applied, IndexingPipeline};

use crate::fulltext::IndexError;
use crate::storage::StorageError;
use crate::upsert::UpsertError;
use thiserror::Error;

/// How a failure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection or lock trouble; retried with backoff.
    Transient,
    /// Unusable payload; acknowledged and dropped.
    Malformed,
    /// A create lost its race; the winner holds the data. Acknowledged.
    DuplicateIdentity,
    /// The store rejected the whole transaction; the event may be retried.
    TransactionAborted,
}

/// Errors from processing one event
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error(transparent)]
    Upsert(#[from] UpsertError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Worker task failed: {0}")]
    Task(String),

    /// The graph write committed but a later step failed, so the index or
    /// the applied log may be behind the graph.
    #[error("Event for {external_id} only partly applied: {source}")]
    Incomplete {
        external_id: String,
        #[source]
        source: Box<PipelineError>,
    },
}

fn classify_storage(err: &StorageError) -> ErrorKind {
    if err.is_transient() {
        ErrorKind::Transient
    } else {
        ErrorKind::TransactionAborted
    }
}

impl PipelineError {
    pub(crate) fn incomplete(external_id: &str, source: PipelineError) -> Self {
        Self::Incomplete {
            external_id: external_id.to_string(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed(_) | Self::Upsert(UpsertError::Invalid(_)) => ErrorKind::Malformed,
            Self::Upsert(UpsertError::DuplicateIdentity(_)) => ErrorKind::DuplicateIdentity,
            Self::Upsert(UpsertError::Storage(e)) | Self::Storage(e) => classify_storage(e),
            Self::Index(e) if e.is_transient() => ErrorKind::Transient,
            Self::Index(_) => ErrorKind::TransactionAborted,
            Self::Task(_) => ErrorKind::Transient,
            Self::Incomplete { source, .. } => source.kind(),
        }
    }

    /// Worth retrying in place, after a backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// The graph may hold a write the rest of the system has not caught up with.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
