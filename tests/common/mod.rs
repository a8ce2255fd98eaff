//! Shared fixtures for the integration tests
//!
//! `Harness` wires an in-memory graph store, fulltext index and indexing
//! pipeline the same way the service does; `fixtures` holds sample recipes.

pub mod fixtures;

use ricetta::pipeline::Applied;
use ricetta::storage::SharedNode;
use ricetta::{
    GraphStore, IndexingPipeline, Language, OpenStore, Recipe, RecipeApi, RecipeEvent,
    RetryPolicy, SqliteIndex, SqliteStore, TermStemmer, UpsertEngine,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub index: Arc<SqliteIndex>,
    pub pipeline: IndexingPipeline,
    pub api: RecipeApi,
    pub stemmer: TermStemmer,
}

impl Harness {
    pub fn new(language: Language) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().expect("graph store"));
        let index = Arc::new(
            SqliteIndex::open_in_memory()
                .expect("fulltext index")
                .with_stemmer(TermStemmer::new(language)),
        );
        Self::with_parts(store, index, language)
    }

    pub fn with_parts(store: Arc<SqliteStore>, index: Arc<SqliteIndex>, language: Language) -> Self {
        let stemmer = TermStemmer::new(language);
        let engine = UpsertEngine::new(store.clone(), stemmer.clone());
        let pipeline = IndexingPipeline::new(engine, index.clone(), store.clone(), Default::default())
            .with_retry(fast_retry());
        let api = RecipeApi::new(store.clone(), index.clone());
        Self {
            store,
            index,
            pipeline,
            api,
            stemmer,
        }
    }

    pub async fn save(&self, recipe: &Recipe) -> Applied {
        self.pipeline
            .process(RecipeEvent::Saved(recipe.clone()))
            .await
            .expect("save applied")
    }

    pub async fn delete(&self, external_id: &str) -> Applied {
        self.pipeline
            .process(RecipeEvent::Deleted(external_id.to_string()))
            .await
            .expect("delete applied")
    }

    /// The Food node an ingredient name resolves to.
    pub fn food(&self, term: &str) -> Option<SharedNode> {
        self.store.find_food(&self.stemmer.stem(term)).expect("find food")
    }

    pub fn tag(&self, term: &str) -> Option<SharedNode> {
        self.store.find_tag(&self.stemmer.stem(term)).expect("find tag")
    }

    pub fn referencing(&self, node: &SharedNode) -> Vec<String> {
        self.store.recipes_referencing(&node.id).expect("referencing recipes")
    }
}

/// Short delays so retry paths finish quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
