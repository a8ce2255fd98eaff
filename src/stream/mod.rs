//! Stream brokers with consumer-group semantics
//!
//! The [`Streamer`] capability is implemented over SQLite (default) and
//! Redis Streams (`redis` feature). Pick one at startup with [`connect`].

mod cancel;
mod message;
#[cfg(feature = "redis")]
mod redis;
mod sqlite;
mod traits;

pub use cancel::CancellationToken;
pub use message::Message;
#[cfg(feature = "redis")]
pub use self::redis::RedisStreamer;
pub use sqlite::SqliteStreamer;
pub use traits::{Cursor, ReadGroup, StreamError, StreamResult, Streamer, DEFAULT_CLAIM_IDLE};

use crate::retry::RetryPolicy;
use std::sync::Arc;

/// Open the broker named by a URL.
///
/// `sqlite:<path>` (or `sqlite::memory:`) opens a database-backed broker;
/// `redis://...` needs the `redis` feature.
pub async fn connect(url: &str, policy: &RetryPolicy) -> StreamResult<Arc<dyn Streamer>> {
    if let Some(path) = url.strip_prefix("sqlite:") {
        let streamer = if path == ":memory:" {
            SqliteStreamer::open_in_memory()?
        } else {
            SqliteStreamer::open(path)?
        };
        return Ok(Arc::new(streamer));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            return Ok(Arc::new(RedisStreamer::connect(url, policy).await?));
        }
        #[cfg(not(feature = "redis"))]
        {
            let _ = policy;
            return Err(StreamError::UnsupportedUrl(format!(
                "{} (built without the redis feature)",
                url
            )));
        }
    }
    Err(StreamError::UnsupportedUrl(url.to_string()))
}
