//! Storage backends for the recipe graph
//!
//! Writes are expressed as conditional [`Transaction`]s so that existence
//! checks and the mutations that depend on them commit atomically. The
//! primary implementation is `SqliteStore`.

mod record;
mod sqlite;
mod traits;
mod txn;

pub use record::{IngredientRecord, RecipeRecord, SharedRecord, StepRecord};
pub use sqlite::SqliteStore;
pub use traits::{GraphStore, OpenStore, SharedNode, StorageError, StorageResult};
pub use txn::{
    Binding, BindingCounts, Condition, Mutation, NodeData, NodeRef, Op, Presence, Properties,
    Transaction, TxnOutcome,
};
