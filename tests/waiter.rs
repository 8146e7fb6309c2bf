// End-to-end protocol tests over the in-memory backend: the submit/
// subscribe/complete races, streaming order, duplicate suppression,
// timeout and channel-failure behavior.

use assert_matches::assert_matches;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use studyforge_jobs::db::{JobStore, StoreError};
use studyforge_jobs::feed::{ChangeFeed, FeedError, JobSubscription};
use studyforge_jobs::memory::MemoryBackend;
use studyforge_jobs::{JobDispatcher, JobError, JobKind, JobOutcome, JobWaiter, WaitOptions};
use tokio::sync::mpsc;
use tokio::time::sleep;
use uuid::Uuid;

fn waiter(backend: &Arc<MemoryBackend>) -> JobWaiter<MemoryBackend, MemoryBackend> {
    JobWaiter::new(backend.clone(), backend.clone())
}

fn short_waiter<F: ChangeFeed>(
    backend: &Arc<MemoryBackend>,
    feed: Arc<F>,
    timeout: Duration,
) -> JobWaiter<MemoryBackend, F> {
    JobWaiter::with_options(backend.clone(), feed, WaitOptions { timeout })
}

async fn submit(backend: &Arc<MemoryBackend>, kind: JobKind) -> Uuid {
    JobDispatcher::new(backend.clone())
        .submit(kind, serde_json::json!({"input": "test"}))
        .await
        .expect("dispatch should succeed")
}

// Worker writes "Hel", then "Hello", then succeeds with a structured
// result. Expected: onChunk("Hel"), onChunk("Hello"), then the result,
// strictly in that order.
#[tokio::test]
async fn streaming_chat_delivers_chunks_then_result() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Chat).await;

    let worker = backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        worker.set_partial(job_id, "Hel");
        sleep(Duration::from_millis(20)).await;
        worker.set_partial(job_id, "Hello");
        sleep(Duration::from_millis(20)).await;
        worker.succeed(job_id, serde_json::json!({"message": "Hello"}));
    });

    let mut chunks: Vec<String> = Vec::new();
    let outcome = waiter(&backend)
        .wait_streaming(job_id, |s| chunks.push(s.to_string()))
        .await
        .expect("job should succeed");

    assert_eq!(chunks, vec!["Hel".to_string(), "Hello".to_string()]);
    assert_eq!(
        outcome,
        JobOutcome::Structured(serde_json::json!({"message": "Hello"}))
    );
}

#[tokio::test]
async fn duplicate_partial_updates_are_suppressed() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Chat).await;

    let worker = backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        worker.set_partial(job_id, "Hel");
        sleep(Duration::from_millis(20)).await;
        // idempotent worker write: same value, another notification
        worker.touch(job_id);
        sleep(Duration::from_millis(20)).await;
        worker.succeed(job_id, serde_json::json!({"message": "Hel"}));
    });

    let mut chunks: Vec<String> = Vec::new();
    waiter(&backend)
        .wait_streaming(job_id, |s| chunks.push(s.to_string()))
        .await
        .expect("job should succeed");

    assert_eq!(chunks, vec!["Hel".to_string()]);
}

#[tokio::test]
async fn missing_result_falls_back_to_last_partial() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Chat).await;

    let worker = backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        worker.set_partial(job_id, "truncated but useful");
        sleep(Duration::from_millis(20)).await;
        worker.finish_without_result(job_id);
    });

    let outcome = waiter(&backend).wait(job_id).await.expect("should succeed");
    assert_eq!(outcome, JobOutcome::Text("truncated but useful".to_string()));
}

#[tokio::test]
async fn blocking_wait_resolves_worker_failure() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Grade).await;

    let worker = backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        worker.fail(job_id, "model refused the rubric");
    });

    let err = waiter(&backend).wait(job_id).await.unwrap_err();
    assert_matches!(err, JobError::Failed(msg) if msg == "model refused the rubric");
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let backend = Arc::new(MemoryBackend::new());
    let bogus = Uuid::new_v4();
    let err = waiter(&backend).wait(bogus).await.unwrap_err();
    assert_matches!(err, JobError::NotFound(id) if id == bogus);
}

// ---------------------------------------------------------------------------
// Feed instrumentation: wrappers over the memory feed that count
// subscriptions and observe teardown from the outside.

struct TeardownFlag(Arc<AtomicBool>);

impl Drop for TeardownFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Counts subscriptions and raises `torn_down` once the waiter's handle is
/// closed (the forwarding task owns the flag, so aborting it trips it).
struct TrackingFeed {
    inner: Arc<MemoryBackend>,
    subscriptions: Arc<AtomicUsize>,
    torn_down: Arc<AtomicBool>,
}

#[async_trait]
impl ChangeFeed for TrackingFeed {
    async fn subscribe(&self, job_id: Uuid) -> Result<JobSubscription, FeedError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.subscribe(job_id).await?;
        let flag = TeardownFlag(self.torn_down.clone());
        let (tx, rx) = mpsc::channel(16);
        let pump = tokio::spawn(async move {
            let _flag = flag;
            while let Some(event) = inner.next_event().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(JobSubscription::new(job_id, rx, Some(pump)))
    }
}

/// Completes the job *inside* the subscribe handshake: the terminal write
/// lands after the waiter's immediate check but before the subscription
/// exists, so no update event will ever arrive. Only the reconciliation
/// read can resolve this.
struct RacingFeed {
    inner: Arc<MemoryBackend>,
}

#[async_trait]
impl ChangeFeed for RacingFeed {
    async fn subscribe(&self, job_id: Uuid) -> Result<JobSubscription, FeedError> {
        self.inner
            .succeed(job_id, serde_json::json!({"raced": true}));
        self.inner.subscribe(job_id).await
    }
}

/// The handshake itself fails.
struct FailingFeed;

#[async_trait]
impl ChangeFeed for FailingFeed {
    async fn subscribe(&self, _job_id: Uuid) -> Result<JobSubscription, FeedError> {
        Err(FeedError::Subscribe("realtime socket refused".to_string()))
    }
}

#[tokio::test]
async fn race_between_check_and_subscribe_is_closed_by_reconciliation() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Plan).await;

    let feed = Arc::new(RacingFeed {
        inner: backend.clone(),
    });
    let outcome = short_waiter(&backend, feed, Duration::from_secs(5))
        .wait(job_id)
        .await
        .expect("reconciliation read must catch the lost update");

    assert_eq!(outcome, JobOutcome::Structured(serde_json::json!({"raced": true})));
}

// Job stuck in `queued` within a 50ms budget: the wait resolves with
// Timeout and the subscription is torn down.
#[tokio::test]
async fn wait_times_out_and_tears_down_the_subscription() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Transcribe).await;

    let subscriptions = Arc::new(AtomicUsize::new(0));
    let torn_down = Arc::new(AtomicBool::new(false));
    let feed = Arc::new(TrackingFeed {
        inner: backend.clone(),
        subscriptions: subscriptions.clone(),
        torn_down: torn_down.clone(),
    });

    let budget = Duration::from_millis(50);
    let err = short_waiter(&backend, feed, budget)
        .wait(job_id)
        .await
        .unwrap_err();

    assert_matches!(err, JobError::Timeout { job_id: id, budget: b } => {
        assert_eq!(id, job_id);
        assert_eq!(b, budget);
    });
    assert_eq!(subscriptions.load(Ordering::SeqCst), 1);

    // teardown happens via task abort; give it a moment to land
    for _ in 0..50 {
        if torn_down.load(Ordering::SeqCst) {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(torn_down.load(Ordering::SeqCst));
}

// Job already failed before the waiter attached: the immediate check
// resolves it and no subscription is ever opened.
#[tokio::test]
async fn immediate_check_resolves_without_subscribing() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Embed).await;
    backend.fail(job_id, "rate limited");

    let subscriptions = Arc::new(AtomicUsize::new(0));
    let feed = Arc::new(TrackingFeed {
        inner: backend.clone(),
        subscriptions: subscriptions.clone(),
        torn_down: Arc::new(AtomicBool::new(false)),
    });

    let err = short_waiter(&backend, feed, Duration::from_secs(5))
        .wait(job_id)
        .await
        .unwrap_err();

    assert_matches!(err, JobError::Failed(msg) if msg == "rate limited");
    assert_eq!(subscriptions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_handshake_surfaces_as_channel_error() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Chat).await;

    let err = short_waiter(&backend, Arc::new(FailingFeed), Duration::from_secs(5))
        .wait(job_id)
        .await
        .unwrap_err();

    assert_matches!(err, JobError::Channel { job_id: id, reason } => {
        assert_eq!(id, job_id);
        assert!(reason.contains("realtime socket refused"));
    });
}

// Streaming caller hit by a mid-wait channel loss keeps the chunks it
// already received.
#[tokio::test]
async fn chunks_survive_a_channel_error() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Chat).await;
    backend.set_partial(job_id, "partial answer");

    let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    let err = short_waiter(&backend, Arc::new(FailingFeed), Duration::from_secs(5))
        .wait_streaming(job_id, move |s| sink.lock().unwrap().push(s.to_string()))
        .await
        .unwrap_err();

    assert_matches!(err, JobError::Channel { .. });
    // the immediate check delivered the partial before the handshake failed
    assert_eq!(*chunks.lock().unwrap(), vec!["partial answer".to_string()]);
}

// Abandoning a wait (the caller navigating away) drops its future; the
// subscription tears down and no callback fires afterwards.
#[tokio::test]
async fn cancelling_a_wait_stops_callbacks() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Chat).await;

    let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    let w = waiter(&backend);
    let handle = tokio::spawn(async move {
        w.wait_streaming(job_id, move |s| sink.lock().unwrap().push(s.to_string()))
            .await
    });

    sleep(Duration::from_millis(20)).await;
    backend.set_partial(job_id, "Hel");
    sleep(Duration::from_millis(30)).await;

    handle.abort();
    let _ = handle.await;

    backend.set_partial(job_id, "Hello there");
    backend.succeed(job_id, serde_json::json!({"message": "Hello there"}));
    sleep(Duration::from_millis(30)).await;

    assert_eq!(*chunks.lock().unwrap(), vec!["Hel".to_string()]);
}

#[tokio::test]
async fn concurrent_waiters_see_identical_resolution() {
    let backend = Arc::new(MemoryBackend::new());
    let job_id = submit(&backend, JobKind::Exam).await;

    let worker = backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(30)).await;
        worker.succeed(job_id, serde_json::json!({"score": 87}));
    });

    let w1 = waiter(&backend);
    let w2 = waiter(&backend);
    let (a, b) = tokio::join!(w1.wait(job_id), w2.wait(job_id));

    let expected = JobOutcome::Structured(serde_json::json!({"score": 87}));
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);
}

#[tokio::test]
async fn wait_all_resolves_each_job_independently() {
    let backend = Arc::new(MemoryBackend::new());
    let ok_id = submit(&backend, JobKind::Metadata).await;
    let bad_id = submit(&backend, JobKind::Metadata).await;

    let worker = backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        worker.succeed(ok_id, serde_json::json!({"title": "Cell Biology"}));
        worker.fail(bad_id, "unreadable source");
    });

    let results = waiter(&backend).wait_all(&[ok_id, bad_id]).await;
    assert_eq!(results.len(), 2);
    assert_matches!(&results[0], Ok(JobOutcome::Structured(_)));
    assert_matches!(&results[1], Err(JobError::Failed(msg)) if msg.as_str() == "unreadable source");
}

// ---------------------------------------------------------------------------
// Dispatch failure: no job id, nothing to wait on.

struct BrokenStore;

#[async_trait]
impl JobStore for BrokenStore {
    async fn insert_job(
        &self,
        _kind: JobKind,
        _payload: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn fetch_job(
        &self,
        _id: Uuid,
    ) -> Result<Option<studyforge_jobs::Job>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn dispatch_failure_is_typed_and_produces_no_id() {
    let dispatcher = JobDispatcher::new(Arc::new(BrokenStore));
    let err = dispatcher
        .submit(JobKind::Chat, serde_json::json!({"message": "hi"}))
        .await
        .unwrap_err();
    assert_matches!(err, JobError::Dispatch(msg) if msg.contains("connection refused"));
}

#[tokio::test]
async fn embedding_dispatch_carries_hashed_chunks() {
    use studyforge_jobs::chunks::PageText;
    use studyforge_jobs::config::ChunkingConfig;

    let backend = Arc::new(MemoryBackend::new());
    let dispatcher = JobDispatcher::new(backend.clone());

    let pages = vec![PageText {
        page: 1,
        text: "The mitochondria is the powerhouse of the cell. ".repeat(40),
    }];
    let chunking = ChunkingConfig {
        max_chars: 400,
        overlap_chars: 80,
    };
    let job_id = dispatcher
        .submit_embedding("doc-42", &pages, &chunking)
        .await
        .expect("dispatch should succeed");

    let job = backend.fetch_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.kind, JobKind::Embed);
    assert_eq!(job.payload["document_id"], "doc-42");
    let chunks = job.payload["chunks"].as_array().unwrap();
    assert!(!chunks.is_empty());
    for chunk in chunks {
        assert_eq!(chunk["content_hash"].as_str().unwrap().len(), 64);
        assert!(chunk["text"].as_str().unwrap().chars().count() <= 400);
    }
}
