//! Core graph vocabulary: node identities, kinds, edge labels and stems

mod node;
mod stem;

pub use node::{relationship, NodeId, NodeKind};
pub use stem::{Language, TermStemmer};
