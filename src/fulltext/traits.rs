//! Fulltext index trait definitions

use super::document::RecipeDocument;
use crate::recipe::Recipe;
use thiserror::Error;

/// Errors from the search index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Lock contention or I/O trouble; schema and data errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Secondary search index keyed by recipe external ID.
///
/// Not transactional with the graph store; every write is idempotent so
/// replaying an event converges.
pub trait FulltextIndex: Send + Sync {
    /// Insert or fully replace the document for this recipe.
    fn index_document(&self, doc: &RecipeDocument) -> IndexResult<()>;

    fn index_recipe(&self, recipe: &Recipe) -> IndexResult<()> {
        self.index_document(&RecipeDocument::from_recipe(recipe))
    }

    /// Remove a recipe's document. Unknown IDs are ignored.
    fn delete_recipe(&self, recipe_id: &str) -> IndexResult<()>;

    /// Recipe IDs ranked by relevance, best first.
    fn search_recipes(&self, query: &str, limit: usize) -> IndexResult<Vec<String>>;

    /// Recipe IDs carrying this tag (case-insensitive exact match), sorted.
    fn search_by_tag(&self, tag: &str) -> IndexResult<Vec<String>>;

    /// Every distinct tag name in the index, sorted.
    fn all_tags(&self) -> IndexResult<Vec<String>>;

    /// Number of indexed documents.
    fn document_count(&self) -> IndexResult<usize>;
}
