//! Recipe lifecycle events carried on the streams

use crate::recipe::Recipe;
use serde::Deserialize;

/// Which logical stream a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Saved,
    Deleted,
}

/// Maps stream names to event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRoutes {
    pub saved: String,
    pub deleted: String,
}

impl Default for EventRoutes {
    fn default() -> Self {
        Self {
            saved: "saved-recipes".to_string(),
            deleted: "deleted-recipes".to_string(),
        }
    }
}

impl EventRoutes {
    pub fn kind_of(&self, stream: &str) -> Option<EventKind> {
        if stream == self.saved {
            Some(EventKind::Saved)
        } else if stream == self.deleted {
            Some(EventKind::Deleted)
        } else {
            None
        }
    }

    pub fn streams(&self) -> Vec<String> {
        vec![self.saved.clone(), self.deleted.clone()]
    }
}

/// A parsed event.
#[derive(Debug, Clone, PartialEq)]
pub enum RecipeEvent {
    Saved(Recipe),
    /// External ID of the recipe to delete.
    Deleted(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeletedPayload {
    Id(String),
    Object {
        #[serde(rename = "externalID", alias = "externalId", alias = "xid", alias = "id")]
        external_id: String,
    },
}

impl RecipeEvent {
    /// Parse a payload. The error describes why the payload is unusable.
    pub fn parse(kind: EventKind, payload: &str) -> Result<Self, String> {
        match kind {
            EventKind::Saved => {
                let recipe: Recipe = serde_json::from_str(payload)
                    .map_err(|e| format!("saved-recipe payload: {}", e))?;
                recipe.validate()?;
                Ok(Self::Saved(recipe))
            }
            EventKind::Deleted => {
                let trimmed = payload.trim();
                // bare IDs are published unquoted
                let id = if trimmed.starts_with('"') || trimmed.starts_with('{') {
                    match serde_json::from_str::<DeletedPayload>(trimmed)
                        .map_err(|e| format!("deleted-recipe payload: {}", e))?
                    {
                        DeletedPayload::Id(id) => id,
                        DeletedPayload::Object { external_id } => external_id,
                    }
                } else {
                    trimmed.to_string()
                };
                let id = id.trim();
                if id.is_empty() {
                    return Err("deleted-recipe payload has an empty external ID".to_string());
                }
                Ok(Self::Deleted(id.to_string()))
            }
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            Self::Saved(recipe) => &recipe.external_id,
            Self::Deleted(id) => id,
        }
    }
}
