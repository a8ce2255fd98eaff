//! Ricetta: event-driven recipe indexing
//!
//! Consumes "saved" and "deleted" recipe events from broker streams and keeps
//! two stores in step: a recipe graph in which Food and Tag nodes are shared
//! across recipes and deduplicated by stem, and a fulltext index for search.
//!
//! # Core Concepts
//!
//! - **Recipes** own their Steps and Ingredients
//! - **Foods** and **Tags** are shared and keyed by the stem of their term
//! - Every write is one conditional transaction: existence bindings plus
//!   mutations guarded by predicates over them
//! - A message is acknowledged only after graph and index are both updated
//!
//! # Example
//!
//! ```
//! use ricetta::{Ingredient, Language, OpenStore, Recipe, SqliteStore, TermStemmer, UpsertEngine};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let engine = UpsertEngine::new(store, TermStemmer::new(Language::English));
//! let recipe = Recipe::new("r1", "Tomato Soup").with_ingredient(Ingredient::new("tomatoes"));
//! engine.save(&recipe).unwrap();
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod fulltext;
pub mod gateway;
mod graph;
pub mod guard;
pub mod logging;
pub mod pipeline;
pub mod recipe;
pub mod retry;
pub mod storage;
pub mod stream;
pub mod upsert;

pub use api::RecipeApi;
pub use app::{AppError, AppResult, Indexer};
pub use config::{Config, ConfigError};
pub use fulltext::{FulltextIndex, SqliteIndex};
pub use gateway::{Disposition, GatewayConfig, MessageHandler, StreamGateway};
pub use graph::{relationship, Language, NodeId, NodeKind, TermStemmer};
pub use guard::{AppliedLog, IdempotencyGuard, MemoryAppliedLog};
pub use pipeline::{IndexingPipeline, RecipeEvent};
pub use recipe::{Cost, Difficulty, Food, Ingredient, Quantity, Recipe, Step, Tag};
pub use retry::RetryPolicy;
pub use storage::{GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};
pub use stream::{CancellationToken, Message, Streamer};
pub use upsert::{UpsertEngine, UpsertError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
