//! Read-side query API
//!
//! `RecipeApi` is what a presentation layer calls. Search goes to the
//! fulltext index, which returns recipe IDs; hydration goes to the graph
//! store so callers only ever see canonical recipes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::fulltext::{FulltextIndex, IndexError};
use crate::graph::NodeKind;
use crate::recipe::Recipe;
use crate::storage::{GraphStore, StorageError};
use thiserror::Error;

/// Results returned by [`RecipeApi::search_recipes`] when no limit is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Single entry point for read operations.
#[derive(Clone)]
pub struct RecipeApi {
    store: Arc<dyn GraphStore>,
    index: Arc<dyn FulltextIndex>,
}

impl RecipeApi {
    pub fn new(store: Arc<dyn GraphStore>, index: Arc<dyn FulltextIndex>) -> Self {
        Self { store, index }
    }

    // --- Search ---

    /// Recipe IDs ranked by relevance. Blank queries match nothing.
    pub fn search_recipes(&self, query: &str, limit: Option<usize>) -> ApiResult<Vec<String>> {
        Ok(self
            .index
            .search_recipes(query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))?)
    }

    /// Recipe IDs carrying `tag` (case-insensitive exact match).
    pub fn search_by_tag(&self, tag: &str) -> ApiResult<Vec<String>> {
        Ok(self.index.search_by_tag(tag)?)
    }

    /// Every tag name in the index.
    pub fn all_recipe_tags(&self) -> ApiResult<BTreeSet<String>> {
        Ok(self.index.all_tags()?.into_iter().collect())
    }

    // --- Hydration ---

    pub fn get_recipe(&self, external_id: &str) -> ApiResult<Option<Recipe>> {
        Ok(self.store.load_recipe(external_id)?)
    }

    /// Canonical recipes in the given order; unknown IDs are skipped.
    pub fn get_recipes(&self, external_ids: &[String]) -> ApiResult<Vec<Recipe>> {
        Ok(self.store.load_recipes(external_ids)?)
    }

    /// Search and hydrate in one call.
    pub fn find_recipes(&self, query: &str, limit: Option<usize>) -> ApiResult<Vec<Recipe>> {
        let ids = self.search_recipes(query, limit)?;
        self.get_recipes(&ids)
    }

    pub fn count_recipes(&self) -> ApiResult<usize> {
        Ok(self.store.count(NodeKind::Recipe)?)
    }
}
