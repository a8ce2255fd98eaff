//! Entity resolver and graph upsert engine
//!
//! Turns a recipe into one conditional transaction that creates or links
//! its shared Food and Tag nodes by stem, so concurrent writers converge on
//! a single node per stem.

mod engine;
pub mod plan;

pub use engine::{DeleteOutcome, SaveOutcome, UpsertEngine};
pub use plan::Resolution;

use crate::storage::StorageError;
use thiserror::Error;

/// Errors from the upsert engine
#[derive(Debug, Error)]
pub enum UpsertError {
    /// The recipe cannot be written as given.
    #[error("Invalid recipe: {0}")]
    Invalid(String),

    /// A create lost the race for its external ID.
    #[error("Recipe already exists: {0}")]
    DuplicateIdentity(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for upsert operations
pub type UpsertResult<T> = Result<T, UpsertError>;
