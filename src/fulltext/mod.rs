//! Fulltext search index over canonical recipes
//!
//! Kept separate from the graph store and updated after it; the message is
//! only acknowledged once both are written.

mod document;
mod sqlite;
mod traits;

pub use document::RecipeDocument;
pub use sqlite::{match_expression, SqliteIndex};
pub use traits::{FulltextIndex, IndexError, IndexResult};
