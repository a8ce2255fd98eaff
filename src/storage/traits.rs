//! Storage trait definitions

use super::txn::{Transaction, TxnOutcome};
use crate::graph::{NodeId, NodeKind};
use crate::recipe::Recipe;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store rejected the transaction as a whole (constraint conflict,
    /// refused cascade). Nothing was committed.
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// A mutation referenced a variable or blank node that resolved to
    /// nothing. Nothing was committed.
    #[error("Unresolved reference: {0}")]
    Unresolved(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),
}

impl StorageError {
    /// Lock contention and similar conditions that clear up on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// A conflict the caller may resolve by re-reading state and retrying.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Aborted(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A Food or Tag node as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub term: String,
    pub stem: String,
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync); writes go through
/// [`GraphStore::execute`] and are atomic per call.
pub trait GraphStore: Send + Sync {
    // === Writes ===

    /// Evaluate the bindings, then apply every mutation whose condition
    /// holds, all-or-nothing.
    fn execute(&self, txn: &Transaction) -> StorageResult<TxnOutcome>;

    // === Reads ===

    /// True if a recipe with this external ID exists.
    fn recipe_exists(&self, external_id: &str) -> StorageResult<bool>;

    /// Reconstruct a recipe with its ingredients (and their foods), steps
    /// and tags.
    fn load_recipe(&self, external_id: &str) -> StorageResult<Option<Recipe>>;

    /// Load several recipes, skipping IDs that do not exist. Order follows
    /// the input.
    fn load_recipes(&self, external_ids: &[String]) -> StorageResult<Vec<Recipe>> {
        let mut out = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            if let Some(recipe) = self.load_recipe(id)? {
                out.push(recipe);
            }
        }
        Ok(out)
    }

    /// Number of nodes of a kind.
    fn count(&self, kind: NodeKind) -> StorageResult<usize>;

    /// Look up a Food or Tag by stem.
    fn find_shared(&self, kind: NodeKind, stem: &str) -> StorageResult<Option<SharedNode>>;

    fn find_food(&self, stem: &str) -> StorageResult<Option<SharedNode>> {
        self.find_shared(NodeKind::Food, stem)
    }

    fn find_tag(&self, stem: &str) -> StorageResult<Option<SharedNode>> {
        self.find_shared(NodeKind::Tag, stem)
    }

    /// External IDs of recipes that reference a shared node, sorted.
    fn recipes_referencing(&self, node: &NodeId) -> StorageResult<Vec<String>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
