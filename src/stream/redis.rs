//! Redis Streams broker

use super::message::Message;
use super::traits::{Cursor, ReadGroup, StreamError, StreamResult, Streamer};
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Field holding the payload in each stream entry.
const PAYLOAD_FIELD: &str = "payload";

/// Streamer over Redis consumer groups
///
/// Short commands share a `ConnectionManager`, which reconnects on its own.
/// `XREADGROUP ... BLOCK` holds its connection for the whole wait, so each
/// consumer/stream set gets a dedicated connection for blocking reads.
#[derive(Clone)]
pub struct RedisStreamer {
    client: redis::Client,
    manager: ConnectionManager,
    readers: Arc<DashMap<String, MultiplexedConnection>>,
}

/// `BLOCK 0` waits forever; never send it.
fn block_millis(block: Duration) -> usize {
    usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1)
}

impl RedisStreamer {
    /// Connect, retrying with backoff while the server is unreachable.
    pub async fn connect(url: &str, policy: &RetryPolicy) -> StreamResult<Self> {
        info!("Connecting to Redis at {}", url);
        let client = redis::Client::open(url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(Duration::from_secs(30));

        let manager = retry(policy, "Redis connection", StreamError::is_transient, || {
            let client = client.clone();
            let config = config.clone();
            async move {
                ConnectionManager::new_with_config(client, config)
                    .await
                    .map_err(StreamError::from)
            }
        })
        .await?;
        info!("Successfully connected to Redis");
        Ok(Self {
            client,
            manager,
            readers: Arc::new(DashMap::new()),
        })
    }

    fn to_message(stream: &str, entry: &StreamId, delivery_count: u32) -> Message {
        let payload: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
        Message {
            delivery_count,
            ..Message::new(stream, entry.id.clone(), payload)
        }
    }

    /// Connection reserved for blocking reads of one consumer/stream set.
    async fn reader(&self, key: &str) -> StreamResult<MultiplexedConnection> {
        if let Some(conn) = self.readers.get(key) {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        self.readers.insert(key.to_string(), conn.clone());
        Ok(conn)
    }

    async fn read_new(&self, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        let key = format!("{}/{}", request.consumer, request.streams.join(","));
        let mut conn = self.reader(&key).await?;
        let opts = StreamReadOptions::default()
            .group(&request.group, &request.consumer)
            .count(request.count)
            .block(block_millis(request.block));
        let ids: Vec<&str> = request.streams.iter().map(|_| ">").collect();
        let read: redis::RedisResult<Option<StreamReadReply>> = conn
            .xread_options(request.streams.as_slice(), ids.as_slice(), &opts)
            .await;
        let reply = match read {
            Ok(reply) => reply,
            Err(e) => {
                // reconnect on the next read
                self.readers.remove(&key);
                return Err(e.into());
            }
        };

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| {
                        key.ids
                            .iter()
                            .map(move |entry| Self::to_message(&key.key, entry, 1))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Reclaim this consumer's pending entries and take over other
    /// consumers' entries idle for `min_idle`. XCLAIM bumps the delivery
    /// counter and, with a min-idle time, skips entries another consumer
    /// touched in the meantime.
    async fn read_pending(&self, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        let mut conn = self.manager.clone();
        let min_idle = usize::try_from(request.min_idle.as_millis()).unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for stream in &request.streams {
            let pending: StreamPendingCountReply = conn
                .xpending_count(stream, &request.group, "-", "+", request.count)
                .await?;
            let (own, idle): (Vec<_>, Vec<_>) = pending
                .ids
                .iter()
                .filter(|p| p.consumer == request.consumer || p.last_delivered_ms >= min_idle)
                .partition(|p| p.consumer == request.consumer);

            for (batch, idle_ms) in [(own, 0), (idle, min_idle)] {
                if batch.is_empty() {
                    continue;
                }
                let ids: Vec<&str> = batch.iter().map(|p| p.id.as_str()).collect();
                let claimed: StreamClaimReply = conn
                    .xclaim(stream, &request.group, &request.consumer, idle_ms, ids.as_slice())
                    .await?;
                for entry in &claimed.ids {
                    let Some(prior) = batch.iter().find(|p| p.id == entry.id) else {
                        continue;
                    };
                    if prior.consumer != request.consumer {
                        info!(stream = %stream, id = %entry.id, from = %prior.consumer, "claiming idle message");
                    }
                    out.push(Self::to_message(stream, entry, prior.times_delivered as u32 + 1));
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Streamer for RedisStreamer {
    async fn create_group(&self, stream: &str, group: &str) -> StreamResult<()> {
        let mut conn = self.manager.clone();
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn add(&self, stream: &str, payload: &str) -> StreamResult<String> {
        let mut conn = self.manager.clone();
        let id: String = conn.xadd(stream, "*", &[(PAYLOAD_FIELD, payload)]).await?;
        Ok(id)
    }

    async fn read_group(&self, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        match request.cursor {
            Cursor::New => self.read_new(request).await,
            Cursor::Pending => self.read_pending(request).await,
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let removed: usize = conn.xack(stream, group, ids).await?;
        Ok(removed)
    }

    async fn pending(&self, stream: &str, group: &str) -> StreamResult<usize> {
        let mut conn = self.manager.clone();
        let reply: StreamPendingReply = conn.xpending(stream, group).await?;
        Ok(reply.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_time_is_never_zero() {
        assert_eq!(block_millis(Duration::ZERO), 1);
        assert_eq!(block_millis(Duration::from_micros(300)), 1);
        assert_eq!(block_millis(Duration::from_millis(500)), 500);
    }
}
