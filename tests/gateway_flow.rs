//! Stream gateway against the SQLite broker
//!
//! Covers acknowledgment rules: malformed messages are discarded without
//! blocking the stream, shutdown lets dispatched handlers finish, failed
//! messages are redelivered, messages past the delivery limit are
//! dead-lettered, and a half-applied event is never acknowledged. Also
//! covers recovery of another consumer's pending messages and giving up
//! on a broker that stays unreachable.
//!
//! Run with: `cargo test --test gateway_flow`

mod common;

use async_trait::async_trait;
use common::fixtures::tomato_soup;
use common::{eventually, fast_retry, Harness};
use ricetta::fulltext::{FulltextIndex, IndexResult, RecipeDocument};
use ricetta::gateway::{Disposition, GatewayConfig, GatewayError, MessageHandler, StreamGateway};
use ricetta::stream::{
    CancellationToken, Message, ReadGroup, SqliteStreamer, StreamError, StreamResult, Streamer,
};
use ricetta::{
    GraphStore, IndexingPipeline, Language, OpenStore, SqliteStore, TermStemmer, UpsertEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const SAVED: &str = "saved-recipes";
const DELETED: &str = "deleted-recipes";

fn test_config(max_deliveries: u32) -> GatewayConfig {
    let mut config = GatewayConfig::new("indexer", "c1", vec![SAVED.to_string(), DELETED.to_string()]);
    config.block = Duration::from_millis(20);
    config.max_deliveries = max_deliveries;
    config.retry = fast_retry();
    config
}

fn start(
    streamer: Arc<dyn Streamer>,
    handler: Arc<dyn MessageHandler>,
    config: GatewayConfig,
) -> (CancellationToken, JoinHandle<Result<(), ricetta::gateway::GatewayError>>) {
    let token = CancellationToken::new();
    let gateway = StreamGateway::new(streamer, handler, config, token.clone());
    let running = tokio::spawn(async move { gateway.run().await });
    (token, running)
}

async fn pending(streamer: &Arc<dyn Streamer>, stream: &str) -> usize {
    streamer.pending(stream, "indexer").await.unwrap()
}

async fn drained(streamer: &Arc<dyn Streamer>, stream: &str) -> bool {
    for _ in 0..200 {
        if pending(streamer, stream).await == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn refused() -> std::io::Error {
    std::io::Error::from(std::io::ErrorKind::ConnectionRefused)
}

// ============================================================================
// Handlers
// ============================================================================

/// Records deliveries and answers with a scripted disposition.
struct Scripted {
    deliveries: Mutex<Vec<(String, u32)>>,
    retry_first: usize,
    delay: Duration,
    finished: AtomicUsize,
}

impl Scripted {
    fn new(retry_first: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            retry_first,
            delay,
            finished: AtomicUsize::new(0),
        })
    }

    fn deliveries(&self) -> Vec<(String, u32)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for Scripted {
    async fn handle(&self, message: &Message) -> Disposition {
        let seen = {
            let mut deliveries = self.deliveries.lock().unwrap();
            deliveries.push((message.payload.clone(), message.delivery_count));
            deliveries.len()
        };
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        if seen <= self.retry_first {
            Disposition::Retry
        } else {
            Disposition::Ack
        }
    }
}

/// A broker that accepts groups but never answers a read.
struct Unreachable {
    reads: AtomicUsize,
}

#[async_trait]
impl Streamer for Unreachable {
    async fn create_group(&self, _stream: &str, _group: &str) -> StreamResult<()> {
        Ok(())
    }

    async fn add(&self, _stream: &str, _payload: &str) -> StreamResult<String> {
        Err(refused().into())
    }

    async fn read_group(&self, _request: &ReadGroup) -> StreamResult<Vec<Message>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(StreamError::Io(refused()))
    }

    async fn ack(&self, _stream: &str, _group: &str, _ids: &[String]) -> StreamResult<usize> {
        Err(refused().into())
    }

    async fn pending(&self, _stream: &str, _group: &str) -> StreamResult<usize> {
        Err(refused().into())
    }
}

/// An index whose every write fails.
struct RefusingIndex;

impl FulltextIndex for RefusingIndex {
    fn index_document(&self, _doc: &RecipeDocument) -> IndexResult<()> {
        Err(refused().into())
    }

    fn delete_recipe(&self, _recipe_id: &str) -> IndexResult<()> {
        Err(refused().into())
    }

    fn search_recipes(&self, _query: &str, _limit: usize) -> IndexResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn search_by_tag(&self, _tag: &str) -> IndexResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn all_tags(&self) -> IndexResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn document_count(&self) -> IndexResult<usize> {
        Ok(0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn poison_message_does_not_block_the_stream() {
    let h = Harness::new(Language::English);
    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    streamer.add(SAVED, "{definitely not a recipe").await.unwrap();
    streamer
        .add(SAVED, &serde_json::to_string(&tomato_soup()).unwrap())
        .await
        .unwrap();

    let (token, running) = start(streamer.clone(), Arc::new(h.pipeline.clone()), test_config(5));

    assert!(eventually(|| !h.api.search_by_tag("easy").unwrap().is_empty()).await);
    let mut drained = false;
    for _ in 0..100 {
        if pending(&streamer, SAVED).await == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();
    running.await.unwrap().unwrap();

    assert!(drained, "both messages acknowledged");
    assert_eq!(h.api.search_recipes("tomato", None).unwrap(), vec!["r1"]);
}

#[tokio::test]
async fn delete_stream_removes_indexed_recipe() {
    let h = Harness::new(Language::English);
    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    let (token, running) = start(streamer.clone(), Arc::new(h.pipeline.clone()), test_config(5));

    streamer
        .add(SAVED, &serde_json::to_string(&tomato_soup()).unwrap())
        .await
        .unwrap();
    assert!(eventually(|| h.api.get_recipe("r1").unwrap().is_some()).await);

    streamer.add(DELETED, "r1").await.unwrap();
    assert!(eventually(|| h.api.get_recipe("r1").unwrap().is_none()).await);
    assert!(eventually(|| h.api.search_recipes("tomato", None).unwrap().is_empty()).await);

    token.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_dispatched_handlers() {
    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    for n in 0..3 {
        streamer.add(SAVED, &format!("m{}", n)).await.unwrap();
    }
    let handler = Scripted::new(0, Duration::from_millis(150));
    let (token, running) = start(streamer.clone(), handler.clone(), test_config(5));

    assert!(eventually(|| handler.deliveries().len() == 3).await);
    token.cancel();
    running.await.unwrap().unwrap();

    // every started handler ran to completion and was acknowledged
    assert_eq!(handler.finished.load(Ordering::SeqCst), 3);
    assert_eq!(pending(&streamer, SAVED).await, 0);
}

#[tokio::test]
async fn retried_message_is_redelivered() {
    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    streamer.add(SAVED, "flaky").await.unwrap();
    let handler = Scripted::new(1, Duration::ZERO);
    let (token, running) = start(streamer.clone(), handler.clone(), test_config(5));

    assert!(eventually(|| handler.deliveries().len() == 2).await);
    let mut drained = false;
    for _ in 0..100 {
        if pending(&streamer, SAVED).await == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();
    running.await.unwrap().unwrap();

    assert!(drained);
    assert_eq!(
        handler.deliveries(),
        vec![("flaky".to_string(), 1), ("flaky".to_string(), 2)]
    );
}

#[tokio::test]
async fn message_past_delivery_limit_is_dead_lettered() {
    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    streamer.add(SAVED, "cursed").await.unwrap();
    streamer.add(SAVED, "fine").await.unwrap();
    // fails forever
    let handler = Scripted::new(usize::MAX, Duration::ZERO);
    let (token, running) = start(streamer.clone(), handler.clone(), test_config(2));

    let mut drained = false;
    for _ in 0..200 {
        if pending(&streamer, SAVED).await == 0 && !handler.deliveries().is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();
    running.await.unwrap().unwrap();

    assert!(drained, "dead-lettered messages are acknowledged");
    // each message is handled on deliveries 1 and 2 only
    let deliveries = handler.deliveries();
    assert_eq!(deliveries.len(), 4);
    assert!(deliveries.iter().all(|(_, count)| *count <= 2));
}

#[tokio::test]
async fn restart_under_new_name_recovers_pending_message() {
    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    streamer.create_group(SAVED, "indexer").await.unwrap();
    streamer.add(SAVED, "leftover").await.unwrap();

    // a previous run claimed the message and died before acknowledging
    let claimed = streamer
        .read_group(&ReadGroup::new(SAVED, "indexer", "indexer-111"))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(pending(&streamer, SAVED).await, 1);

    let handler = Scripted::new(0, Duration::ZERO);
    let mut config = test_config(5);
    config.consumer = "indexer-222".to_string();
    config.claim_idle = Duration::from_millis(50);
    let (token, running) = start(streamer.clone(), handler.clone(), config);

    assert!(eventually(|| !handler.deliveries().is_empty()).await);
    assert!(drained(&streamer, SAVED).await);
    token.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(handler.deliveries(), vec![("leftover".to_string(), 2)]);
}

#[tokio::test]
async fn unreachable_broker_exhausts_read_retries() {
    let streamer = Arc::new(Unreachable {
        reads: AtomicUsize::new(0),
    });
    let mut config = test_config(5);
    config.streams = vec![SAVED.to_string()];
    let retries = config.retry.max_retries;
    let (_token, running) = start(streamer.clone(), Scripted::new(0, Duration::ZERO), config);

    let err = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("gateway gives up")
        .unwrap()
        .unwrap_err();

    match err {
        GatewayError::RetriesExhausted {
            stream,
            attempts,
            source,
        } => {
            assert_eq!(stream, SAVED);
            assert_eq!(attempts, retries + 1);
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(streamer.reads.load(Ordering::SeqCst), retries as usize + 1);
}

#[tokio::test]
async fn failing_index_leaves_message_pending_and_stops() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = UpsertEngine::new(store.clone(), TermStemmer::new(Language::English));
    let pipeline = IndexingPipeline::new(
        engine,
        Arc::new(RefusingIndex),
        store.clone(),
        Default::default(),
    )
    .with_retry(fast_retry());

    let streamer: Arc<dyn Streamer> = Arc::new(SqliteStreamer::open_in_memory().unwrap());
    streamer
        .add(SAVED, &serde_json::to_string(&tomato_soup()).unwrap())
        .await
        .unwrap();
    // a delivery limit must not release a half-applied event
    let (_token, running) = start(streamer.clone(), Arc::new(pipeline), test_config(1));

    let err = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("gateway stops")
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, GatewayError::Halted { ref stream, .. } if stream == SAVED));
    assert_eq!(pending(&streamer, SAVED).await, 1);
    // the graph holds the recipe; redelivery will index it
    assert!(store.recipe_exists("r1").unwrap());
}
