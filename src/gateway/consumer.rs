//! Read loops

use super::tracker::InFlight;
use super::{Disposition, GatewayError, MessageHandler};
use crate::retry::{retry, RetryPolicy};
use crate::stream::{CancellationToken, Cursor, Message, ReadGroup, Streamer, DEFAULT_CLAIM_IDLE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub group: String,
    pub consumer: String,
    pub streams: Vec<String>,
    /// Messages claimed per read.
    pub batch_size: usize,
    /// How long a read waits for new messages.
    pub block: Duration,
    /// Delivery on which a message the handler still wants retried is
    /// logged and acknowledged instead; 0 means no limit.
    pub max_deliveries: u32,
    /// How long another consumer's pending message sits idle before this
    /// one takes it over. Also the interval between pending sweeps.
    pub claim_idle: Duration,
    /// Backoff for broker calls and for redelivering failed messages.
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>, streams: Vec<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            streams,
            batch_size: 10,
            block: Duration::from_millis(500),
            max_deliveries: 5,
            claim_idle: DEFAULT_CLAIM_IDLE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Consumes every configured stream until cancelled, until a broker failure
/// outlasts the retry policy, or until the handler halts on a message.
pub struct StreamGateway {
    streamer: Arc<dyn Streamer>,
    handler: Arc<dyn MessageHandler>,
    config: Arc<GatewayConfig>,
    token: CancellationToken,
}

impl StreamGateway {
    pub fn new(
        streamer: Arc<dyn Streamer>,
        handler: Arc<dyn MessageHandler>,
        config: GatewayConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            streamer,
            handler,
            config: Arc::new(config),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Make sure every stream has the consumer group.
    pub async fn ensure_groups(&self) -> Result<(), GatewayError> {
        for stream in &self.config.streams {
            retry(
                &self.config.retry,
                "create consumer group",
                |e: &crate::stream::StreamError| e.is_transient(),
                || self.streamer.create_group(stream, &self.config.group),
            )
            .await
            .map_err(|source| GatewayError::Stream {
                stream: stream.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run one read loop per stream and wait for all of them.
    ///
    /// The first loop to fail cancels the others; its error is returned
    /// once every loop has drained its in-flight messages.
    pub async fn run(&self) -> Result<(), GatewayError> {
        self.ensure_groups().await?;
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            streams = ?self.config.streams,
            "stream gateway started"
        );

        let mut loops = JoinSet::new();
        for stream in &self.config.streams {
            let read_loop = ReadLoop {
                stream: stream.clone(),
                streamer: self.streamer.clone(),
                handler: self.handler.clone(),
                config: self.config.clone(),
                token: self.token.clone(),
                tracker: InFlight::new(),
            };
            loops.spawn(read_loop.run());
        }

        let mut result = Ok(());
        while let Some(joined) = loops.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(GatewayError::Task(e.to_string())),
            };
            if let Err(e) = outcome {
                error!(error = %e, "read loop failed, shutting down gateway");
                self.token.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!("stream gateway stopped");
        result
    }
}

struct ReadLoop {
    stream: String,
    streamer: Arc<dyn Streamer>,
    handler: Arc<dyn MessageHandler>,
    config: Arc<GatewayConfig>,
    token: CancellationToken,
    tracker: InFlight,
}

impl ReadLoop {
    async fn run(self) -> Result<(), GatewayError> {
        // unacknowledged messages from a previous run come first
        let mut cursor = Cursor::Pending;
        let mut last_sweep = Instant::now();
        let mut read_failures = 0u32;
        let mut redelivery_round = 0u32;

        let result = loop {
            if self.token.is_cancelled() {
                break Ok(());
            }
            if cursor == Cursor::New && last_sweep.elapsed() >= self.config.claim_idle {
                cursor = Cursor::Pending;
            }
            let request = ReadGroup::new(&self.stream, &self.config.group, &self.config.consumer)
                .with_count(self.config.batch_size)
                .with_block(self.config.block)
                .with_cursor(cursor)
                .with_min_idle(self.config.claim_idle);

            let read = tokio::select! {
                biased;
                _ = self.token.cancelled() => break Ok(()),
                read = self.streamer.read_group(&request) => read,
            };
            let messages = match read {
                Ok(messages) => {
                    read_failures = 0;
                    messages
                }
                Err(e) if e.is_transient() && read_failures < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay_for(read_failures);
                    read_failures += 1;
                    warn!(
                        stream = %self.stream,
                        attempt = read_failures,
                        "read failed, retrying in {}ms: {}",
                        delay.as_millis(),
                        e
                    );
                    self.pause(delay).await;
                    continue;
                }
                Err(source) if source.is_transient() => {
                    break Err(GatewayError::RetriesExhausted {
                        stream: self.stream.clone(),
                        attempts: read_failures + 1,
                        source,
                    })
                }
                Err(source) => {
                    break Err(GatewayError::Stream {
                        stream: self.stream.clone(),
                        source,
                    })
                }
            };

            if messages.is_empty() {
                if cursor == Cursor::Pending {
                    debug!(stream = %self.stream, "no pending messages, reading new");
                    cursor = Cursor::New;
                    last_sweep = Instant::now();
                    redelivery_round = 0;
                }
                continue;
            }

            let batch = self.dispatch(messages);
            self.tracker.wait_idle().await;

            if let Some(id) = batch.halted() {
                break Err(GatewayError::Halted {
                    stream: self.stream.clone(),
                    id,
                });
            }
            if batch.needs_retry.load(Ordering::SeqCst) {
                let delay = self.config.retry.delay_for(redelivery_round);
                redelivery_round = redelivery_round.saturating_add(1);
                debug!(stream = %self.stream, "redelivering failed messages in {}ms", delay.as_millis());
                cursor = Cursor::Pending;
                self.pause(delay).await;
            }
        };

        self.tracker.wait_idle().await;
        debug!(stream = %self.stream, "read loop stopped");
        result
    }

    /// Spawn a handler per message and collect what they asked for.
    fn dispatch(&self, messages: Vec<Message>) -> Arc<Batch> {
        let batch = Arc::new(Batch::default());
        for message in messages {
            let guard = self.tracker.enter();
            let handler = self.handler.clone();
            let acker = self.acker();
            let batch = batch.clone();
            let max_deliveries = self.config.max_deliveries;
            tokio::spawn(async move {
                let _guard = guard;
                match handler.handle(&message).await {
                    Disposition::Ack => acker.ack(&message.id).await,
                    Disposition::Retry
                        if max_deliveries > 0 && message.delivery_count >= max_deliveries =>
                    {
                        error!(
                            stream = %message.stream,
                            id = %message.id,
                            deliveries = message.delivery_count,
                            "message failed on every delivery, dead-lettering"
                        );
                        acker.ack(&message.id).await;
                    }
                    Disposition::Retry => {
                        debug!(stream = %message.stream, id = %message.id, "left pending for redelivery");
                        batch.needs_retry.store(true, Ordering::SeqCst);
                    }
                    Disposition::Halt => {
                        error!(stream = %message.stream, id = %message.id, "handler halted, leaving message pending");
                        batch.halt(&message.id);
                    }
                }
            });
        }
        batch
    }

    fn acker(&self) -> Acker {
        Acker {
            streamer: self.streamer.clone(),
            stream: self.stream.clone(),
            group: self.config.group.clone(),
            policy: self.config.retry,
        }
    }

    /// Sleep unless cancelled first.
    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// What the handlers of one dispatched batch asked for.
#[derive(Default)]
struct Batch {
    needs_retry: AtomicBool,
    halted: Mutex<Option<String>>,
}

impl Batch {
    fn halt(&self, id: &str) {
        self.halted.lock().unwrap().get_or_insert_with(|| id.to_string());
    }

    fn halted(&self) -> Option<String> {
        self.halted.lock().unwrap().clone()
    }
}

/// Acknowledges messages of one stream with retry.
struct Acker {
    streamer: Arc<dyn Streamer>,
    stream: String,
    group: String,
    policy: RetryPolicy,
}

impl Acker {
    /// A failed ack leaves the message pending; it will be redelivered and
    /// skipped or reapplied idempotently.
    async fn ack(&self, id: &str) {
        let ids = [id.to_string()];
        let acked = retry(
            &self.policy,
            "ack",
            |e: &crate::stream::StreamError| e.is_transient(),
            || self.streamer.ack(&self.stream, &self.group, &ids),
        )
        .await;
        match acked {
            Ok(_) => debug!(stream = %self.stream, id, "acknowledged"),
            Err(e) => error!(stream = %self.stream, id, error = %e, "ack failed"),
        }
    }
}
