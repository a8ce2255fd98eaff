//! Stream broker trait definitions

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from a stream broker
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Consumer group {group} does not exist on stream {stream}")]
    UnknownGroup { stream: String, group: String },

    #[error("Unsupported broker URL: {0}")]
    UnsupportedUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broker task failed: {0}")]
    Task(String),
}

impl StreamError {
    /// Connection-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            #[cfg(feature = "redis")]
            Self::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Where a group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Messages never delivered to the group (`>`).
    New,
    /// Delivered but unacknowledged messages: this consumer's own, plus
    /// other consumers' entries idle for at least `min_idle`, which are
    /// transferred to this consumer.
    Pending,
}

/// How long another consumer's pending entry must sit idle before a
/// `Pending` read takes it over.
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(30);

/// Parameters of a consumer-group read.
#[derive(Debug, Clone)]
pub struct ReadGroup {
    pub streams: Vec<String>,
    pub group: String,
    pub consumer: String,
    /// Maximum messages per stream.
    pub count: usize,
    /// How long a `New` read waits for messages. Pending reads never block.
    pub block: Duration,
    pub cursor: Cursor,
    /// Idle time after which a `Pending` read claims other consumers' entries.
    pub min_idle: Duration,
}

impl ReadGroup {
    pub fn new(stream: impl Into<String>, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            streams: vec![stream.into()],
            group: group.into(),
            consumer: consumer.into(),
            count: 10,
            block: Duration::from_millis(500),
            cursor: Cursor::New,
            min_idle: DEFAULT_CLAIM_IDLE,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }
}

/// Capability over a stream broker with consumer-group semantics.
///
/// Delivery is at-least-once: a message stays pending for the group until
/// acknowledged and is redelivered through the `Pending` cursor, to the
/// consumer that holds it or, once idle, to any consumer of the group.
#[async_trait]
pub trait Streamer: Send + Sync {
    /// Create a consumer group reading from the start of the stream,
    /// creating the stream if needed. Existing groups are left alone.
    async fn create_group(&self, stream: &str, group: &str) -> StreamResult<()>;

    /// Append a message; returns its ID.
    async fn add(&self, stream: &str, payload: &str) -> StreamResult<String>;

    /// Claim messages for a consumer.
    async fn read_group(&self, request: &ReadGroup) -> StreamResult<Vec<super::Message>>;

    /// Remove messages from the group's pending list. Unknown or already
    /// acknowledged IDs are ignored; returns how many were removed.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<usize>;

    /// Number of delivered but unacknowledged messages in the group.
    async fn pending(&self, stream: &str, group: &str) -> StreamResult<usize>;
}
