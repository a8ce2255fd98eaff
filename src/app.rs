//! Process wiring
//!
//! Capabilities are constructed once here and handed to the components that
//! need them. Nothing is looked up globally.

use crate::api::{ApiError, RecipeApi};
use crate::config::{Config, ConfigError};
use crate::fulltext::{IndexError, SqliteIndex};
use crate::gateway::{GatewayError, StreamGateway};
use crate::graph::TermStemmer;
use crate::pipeline::IndexingPipeline;
use crate::recipe::Recipe;
use crate::storage::{OpenStore, SqliteStore, StorageError};
use crate::stream::{self, CancellationToken, StreamError, Streamer};
use crate::upsert::UpsertEngine;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Graph store: {0}")]
    Storage(#[from] StorageError),

    #[error("Fulltext index: {0}")]
    Index(#[from] IndexError),

    #[error("Broker: {0}")]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// The assembled indexing service.
pub struct Indexer {
    config: Config,
    store: Arc<SqliteStore>,
    index: Arc<SqliteIndex>,
    streamer: Arc<dyn Streamer>,
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

impl Indexer {
    /// Open the graph store, the index and the broker named by `config`.
    pub async fn open(config: Config) -> AppResult<Self> {
        ensure_parent(&config.graph_db)?;
        ensure_parent(&config.index_db)?;
        if let Some(path) = config.broker.strip_prefix("sqlite:") {
            if path != ":memory:" {
                ensure_parent(Path::new(path))?;
            }
        }

        let store = Arc::new(SqliteStore::open(&config.graph_db)?);
        let index = Arc::new(
            SqliteIndex::open(&config.index_db)?.with_stemmer(TermStemmer::new(config.language)),
        );
        let streamer = stream::connect(&config.broker, &config.retry).await?;
        info!(
            graph = %config.graph_db.display(),
            index = %config.index_db.display(),
            language = %config.language,
            "indexer opened"
        );
        Ok(Self::from_parts(config, store, index, streamer))
    }

    /// Assemble from already opened capabilities.
    pub fn from_parts(
        config: Config,
        store: Arc<SqliteStore>,
        index: Arc<SqliteIndex>,
        streamer: Arc<dyn Streamer>,
    ) -> Self {
        Self {
            config,
            store,
            index,
            streamer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn streamer(&self) -> &Arc<dyn Streamer> {
        &self.streamer
    }

    pub fn engine(&self) -> UpsertEngine {
        UpsertEngine::new(self.store.clone(), TermStemmer::new(self.config.language))
    }

    pub fn pipeline(&self) -> IndexingPipeline {
        IndexingPipeline::new(
            self.engine(),
            self.index.clone(),
            self.store.clone(),
            self.config.routes.clone(),
        )
        .with_retry(self.config.retry)
    }

    pub fn api(&self) -> RecipeApi {
        RecipeApi::new(self.store.clone(), self.index.clone())
    }

    pub fn gateway(&self, token: CancellationToken) -> StreamGateway {
        StreamGateway::new(
            self.streamer.clone(),
            Arc::new(self.pipeline()),
            self.config.gateway(),
            token,
        )
    }

    /// Consume until `token` is cancelled or the broker gives out.
    pub async fn run(&self, token: CancellationToken) -> AppResult<()> {
        self.gateway(token).run().await?;
        Ok(())
    }

    /// Publish a saved-recipe event; returns the message ID.
    pub async fn publish_saved(&self, recipe: &Recipe) -> AppResult<String> {
        recipe.validate().map_err(AppError::InvalidRecipe)?;
        let payload = serde_json::to_string(recipe).map_err(StorageError::from)?;
        Ok(self
            .streamer
            .add(&self.config.routes.saved, &payload)
            .await?)
    }

    /// Publish a deleted-recipe event; returns the message ID.
    pub async fn publish_deleted(&self, external_id: &str) -> AppResult<String> {
        if external_id.trim().is_empty() {
            return Err(AppError::InvalidRecipe("empty external ID".to_string()));
        }
        Ok(self
            .streamer
            .add(&self.config.routes.deleted, external_id.trim())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(&dir.path().join("nested"));

        let indexer = Indexer::open(config).await.unwrap();

        assert!(dir.path().join("nested/graph.db").exists());
        assert!(dir.path().join("nested/fulltext.db").exists());
        assert_eq!(indexer.api().count_recipes().unwrap(), 0);
    }

    #[tokio::test]
    async fn published_events_are_indexed_by_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.block = Duration::from_millis(20);
        let indexer = Indexer::open(config).await.unwrap();

        indexer
            .publish_saved(&Recipe::new("r1", "Tomato Soup").with_tag("easy"))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let gateway = indexer.gateway(token.clone());
        let running = tokio::spawn(async move { gateway.run().await });

        let api = indexer.api();
        let mut found = Vec::new();
        for _ in 0..100 {
            found = api.search_by_tag("easy").unwrap();
            if !found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        running.await.unwrap().unwrap();

        assert_eq!(found, vec!["r1"]);
    }

    #[tokio::test]
    async fn invalid_recipes_are_not_published() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = Indexer::open(Config::with_data_dir(dir.path())).await.unwrap();
        assert!(matches!(
            indexer.publish_saved(&Recipe::new("", "Nameless")).await,
            Err(AppError::InvalidRecipe(_))
        ));
        assert!(indexer.publish_deleted(" ").await.is_err());
    }
}
