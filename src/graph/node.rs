//! Node identities and kinds in the recipe graph

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node, assigned by the store on creation.
///
/// Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a NodeId from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a node represents.
///
/// Recipe, Step and Ingredient nodes form an ownership tree rooted at the
/// recipe. Food and Tag nodes are shared: referenced from many recipes,
/// owned by none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Recipe,
    Step,
    Ingredient,
    Food,
    Tag,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recipe => "recipe",
            Self::Step => "step",
            Self::Ingredient => "ingredient",
            Self::Food => "food",
            Self::Tag => "tag",
        }
    }

    /// Shared kinds are keyed by stem and never deleted by recipe mutations.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Food | Self::Tag)
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recipe" => Some(Self::Recipe),
            "step" => Some(Self::Step),
            "ingredient" => Some(Self::Ingredient),
            "food" => Some(Self::Food),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge labels between nodes.
pub mod relationship {
    /// Recipe → Ingredient (owned, ordered)
    pub const INGREDIENTS: &str = "ingredients";
    /// Recipe → Step (owned, ordered)
    pub const STEPS: &str = "steps";
    /// Ingredient → Food (shared)
    pub const FOOD: &str = "food";
    /// Recipe → Tag (shared)
    pub const TAGS: &str = "tags";
}
