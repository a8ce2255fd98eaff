//! SQLite-backed stream broker
//!
//! Models Redis stream semantics in three tables: append-only entries with
//! `<millis>-<seq>` IDs, a per-group last-delivered cursor, and a
//! pending-entries list recording consumer, delivery count and delivery
//! time. Several processes can share one database file; entries left
//! pending by a consumer that went away are taken over once idle.

use super::message::Message;
use super::traits::{Cursor, ReadGroup, StreamError, StreamResult, Streamer};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::info;

/// Upper bound on how long a blocked read sleeps between polls; writes from
/// this process wake readers sooner.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stream broker on SQLite
///
/// Every database call runs on the blocking pool.
pub struct SqliteStreamer {
    inner: Arc<Inner>,
    appended: Notify,
}

struct Inner {
    conn: Mutex<Connection>,
}

/// Position in a stream.
type EntryId = (i64, i64);

fn format_id((ms, seq): EntryId) -> String {
    format!("{}-{}", ms, seq)
}

fn parse_id(id: &str) -> Option<EntryId> {
    let (ms, seq) = id.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl Inner {
    fn init_schema(conn: &Connection) -> StreamResult<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stream_entries (
                stream TEXT NOT NULL,
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (stream, ms, seq)
            );

            CREATE TABLE IF NOT EXISTS stream_groups (
                stream TEXT NOT NULL,
                grp TEXT NOT NULL,
                last_ms INTEGER NOT NULL,
                last_seq INTEGER NOT NULL,
                PRIMARY KEY (stream, grp)
            );

            CREATE TABLE IF NOT EXISTS stream_pending (
                stream TEXT NOT NULL,
                grp TEXT NOT NULL,
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                consumer TEXT NOT NULL,
                delivery_count INTEGER NOT NULL,
                delivered_ms INTEGER NOT NULL,
                PRIMARY KEY (stream, grp, ms, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_stream_pending_consumer
                ON stream_pending(stream, grp, consumer);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn create_group(&self, stream: &str, group: &str) -> StreamResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO stream_groups (stream, grp, last_ms, last_seq) VALUES (?1, ?2, 0, 0)",
            params![stream, group],
        )?;
        Ok(())
    }

    fn append(&self, stream: &str, payload: &str) -> StreamResult<String> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let last: Option<EntryId> = tx
            .query_row(
                "SELECT ms, seq FROM stream_entries WHERE stream = ?1 ORDER BY ms DESC, seq DESC LIMIT 1",
                params![stream],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let now = Utc::now().timestamp_millis();
        let id = match last {
            Some((ms, seq)) if now <= ms => (ms, seq + 1),
            _ => (now, 0),
        };
        tx.execute(
            "INSERT INTO stream_entries (stream, ms, seq, payload) VALUES (?1, ?2, ?3, ?4)",
            params![stream, id.0, id.1, payload],
        )?;
        tx.commit()?;
        Ok(format_id(id))
    }

    /// Deliver never-delivered entries and advance the group cursor.
    fn claim_new(&self, stream: &str, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cursor: Option<EntryId> = tx
            .query_row(
                "SELECT last_ms, last_seq FROM stream_groups WHERE stream = ?1 AND grp = ?2",
                params![stream, request.group],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((last_ms, last_seq)) = cursor else {
            return Err(StreamError::UnknownGroup {
                stream: stream.to_string(),
                group: request.group.clone(),
            });
        };

        let entries: Vec<(i64, i64, String)> = {
            let mut stmt = tx.prepare_cached(
                r#"
                SELECT ms, seq, payload FROM stream_entries
                WHERE stream = ?1 AND (ms > ?2 OR (ms = ?2 AND seq > ?3))
                ORDER BY ms, seq
                LIMIT ?4
                "#,
            )?;
            let rows = stmt
                .query_map(
                    params![stream, last_ms, last_seq, request.count as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let Some(&(tail_ms, tail_seq, _)) = entries.last() else {
            return Ok(Vec::new());
        };

        let now = Utc::now().timestamp_millis();
        for (ms, seq, _) in &entries {
            tx.execute(
                r#"
                INSERT INTO stream_pending (stream, grp, ms, seq, consumer, delivery_count, delivered_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                "#,
                params![stream, request.group, ms, seq, request.consumer, now],
            )?;
        }
        tx.execute(
            "UPDATE stream_groups SET last_ms = ?1, last_seq = ?2 WHERE stream = ?3 AND grp = ?4",
            params![tail_ms, tail_seq, stream, request.group],
        )?;
        tx.commit()?;

        Ok(entries
            .into_iter()
            .map(|(ms, seq, payload)| Message::new(stream, format_id((ms, seq)), payload))
            .collect())
    }

    /// Redeliver this consumer's unacknowledged entries and take over other
    /// consumers' entries idle for `min_idle`, bumping delivery counts.
    fn claim_pending(&self, stream: &str, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().timestamp_millis();
        let idle_before = now.saturating_sub(millis(request.min_idle));

        let entries: Vec<(i64, i64, String, u32, String)> = {
            let mut stmt = tx.prepare_cached(
                r#"
                SELECT p.ms, p.seq, e.payload, p.delivery_count, p.consumer FROM stream_pending p
                JOIN stream_entries e ON e.stream = p.stream AND e.ms = p.ms AND e.seq = p.seq
                WHERE p.stream = ?1 AND p.grp = ?2 AND (p.consumer = ?3 OR p.delivered_ms <= ?4)
                ORDER BY p.ms, p.seq
                LIMIT ?5
                "#,
            )?;
            let rows = stmt
                .query_map(
                    params![stream, request.group, request.consumer, idle_before, request.count as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (ms, seq, _, _, owner) in &entries {
            if owner != &request.consumer {
                info!(stream, id = %format_id((*ms, *seq)), from = %owner, to = %request.consumer, "claiming idle message");
            }
            tx.execute(
                r#"
                UPDATE stream_pending
                SET consumer = ?1, delivery_count = delivery_count + 1, delivered_ms = ?2
                WHERE stream = ?3 AND grp = ?4 AND ms = ?5 AND seq = ?6
                "#,
                params![request.consumer, now, stream, request.group, ms, seq],
            )?;
        }
        tx.commit()?;

        Ok(entries
            .into_iter()
            .map(|(ms, seq, payload, count, _)| Message {
                delivery_count: count + 1,
                ..Message::new(stream, format_id((ms, seq)), payload)
            })
            .collect())
    }

    fn claim(&self, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        let mut out = Vec::new();
        for stream in &request.streams {
            let mut batch = match request.cursor {
                Cursor::New => self.claim_new(stream, request)?,
                Cursor::Pending => self.claim_pending(stream, request)?,
            };
            out.append(&mut batch);
        }
        Ok(out)
    }

    fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<usize> {
        let conn = self.conn.lock().unwrap();
        let mut removed = 0;
        for (ms, seq) in ids.iter().filter_map(|id| parse_id(id)) {
            removed += conn.execute(
                "DELETE FROM stream_pending WHERE stream = ?1 AND grp = ?2 AND ms = ?3 AND seq = ?4",
                params![stream, group, ms, seq],
            )?;
        }
        Ok(removed)
    }

    fn pending(&self, stream: &str, group: &str) -> StreamResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stream_pending WHERE stream = ?1 AND grp = ?2",
            params![stream, group],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl SqliteStreamer {
    fn from_connection(conn: Connection) -> StreamResult<Self> {
        Inner::init_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
            }),
            appended: Notify::new(),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StreamResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Run database work on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> StreamResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StreamResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(|e| StreamError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Streamer for SqliteStreamer {
    async fn create_group(&self, stream: &str, group: &str) -> StreamResult<()> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.blocking(move |inner| inner.create_group(&stream, &group)).await
    }

    async fn add(&self, stream: &str, payload: &str) -> StreamResult<String> {
        let (stream, payload) = (stream.to_string(), payload.to_string());
        let id = self.blocking(move |inner| inner.append(&stream, &payload)).await?;
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(&self, request: &ReadGroup) -> StreamResult<Vec<Message>> {
        let deadline = Instant::now() + request.block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claim = request.clone();
            let messages = self.blocking(move |inner| inner.claim(&claim)).await?;
            if !messages.is_empty() || request.cursor == Cursor::Pending {
                return Ok(messages);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(messages);
            }
            let wait = (deadline - now).min(POLL_INTERVAL);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<usize> {
        let (stream, group, ids) = (stream.to_string(), group.to_string(), ids.to_vec());
        self.blocking(move |inner| inner.ack(&stream, &group, &ids)).await
    }

    async fn pending(&self, stream: &str, group: &str) -> StreamResult<usize> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.blocking(move |inner| inner.pending(&stream, &group)).await
    }
}
