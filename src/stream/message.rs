//! Stream message envelope

use serde::{Deserialize, Serialize};

/// A message claimed from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "streamName")]
    pub stream: String,
    /// Opaque payload as published.
    pub payload: String,
    /// How many times the group has delivered this message, this one included.
    #[serde(default = "first_delivery")]
    pub delivery_count: u32,
}

fn first_delivery() -> u32 {
    1
}

impl Message {
    pub fn new(stream: impl Into<String>, id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream: stream.into(),
            payload: payload.into(),
            delivery_count: 1,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
