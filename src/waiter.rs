//! Job completion waiter.
//!
//! Resolves a dispatched job to its final result (or a typed error) without
//! busy-polling, and without losing a completion to the race between
//! "submit", "subscribe" and "complete".
//!
//! # Protocol Flow
//!
//! ```text
//! ┌──────────┐   row terminal?   ┌─────────────┐
//! │ Checking │──────yes─────────▶│  resolved   │
//! └────┬─────┘                   └─────────────┘
//!      │ no                            ▲ ▲ ▲
//!      ▼                               │ │ │
//! ┌─────────────┐  handshake error ────┘ │ │   (channel error)
//! │ Subscribing │                        │ │
//! └────┬────────┘                        │ │
//!      │ established                     │ │
//!      ▼                                 │ │
//! ┌─────────────┐  row terminal? ────────┘ │   (reconciliation read)
//! │ Reconciling │                          │
//! └────┬────────┘                          │
//!      │ no                                │
//!      ▼                                   │
//! ┌─────────────┐  event → re-read row ────┘   (event-driven resolution)
//! │  Listening  │
//! └─────────────┘
//! ```
//!
//! The reconciliation read after the subscription is established is what
//! closes the lost-update window: a job that turned terminal between the
//! first read and the LISTEN becoming active would otherwise produce no
//! further event, and the waiter would hang. The whole machine runs under
//! one timeout; every exit path drops the subscription handle, whose close
//! is idempotent.
//!
//! Both consumption modes share this machine. Streaming waits thread an
//! `on_chunk` callback through it: each observation that carries a grown
//! `partial_result` delivers the snapshot *before* the terminal check for
//! that same observation, so the final text never trails the terminal
//! resolution, is never reordered, and is never duplicated.
//!
//! Cancelling a wait is dropping its future: the subscription tears down on
//! drop and no callback can fire afterwards. Multiple waiters may attach to
//! the same job concurrently; each holds its own subscription and its own
//! last-seen-partial cursor, and the store remains the single source of
//! truth.

use crate::db::store::JobStore;
use crate::feed::{ChangeFeed, FeedEvent, JobSubscription};
use crate::models::Job;
use crate::types::{JobError, JobOutcome, JobResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Wait budget the source system shipped with.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Bounds the whole wait, all phases included. Expiry is a client-side
    /// giving-up signal only; the worker is not told to abandon the job.
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Resolves job ids to terminal outcomes.
pub struct JobWaiter<S, F> {
    store: Arc<S>,
    feed: Arc<F>,
    options: WaitOptions,
}

enum Phase {
    Checking,
    Subscribing,
    Reconciling(JobSubscription),
    Listening(JobSubscription),
}

impl<S: JobStore, F: ChangeFeed> JobWaiter<S, F> {
    pub fn new(store: Arc<S>, feed: Arc<F>) -> Self {
        Self::with_options(store, feed, WaitOptions::default())
    }

    pub fn with_options(store: Arc<S>, feed: Arc<F>, options: WaitOptions) -> Self {
        Self {
            store,
            feed,
            options,
        }
    }

    /// Block until the job reaches a terminal state.
    ///
    /// Returns exactly one of: the outcome, [`JobError::Failed`],
    /// [`JobError::Timeout`], or [`JobError::Channel`].
    pub async fn wait(&self, job_id: Uuid) -> JobResult<JobOutcome> {
        self.bounded(job_id, ChunkSink::disabled()).await
    }

    /// Same contract as [`wait`](Self::wait), but `on_chunk` additionally
    /// receives every grown `partial_result` snapshot before the terminal
    /// resolution. Text already delivered stays valid even if the wait
    /// ends in a timeout or channel error.
    pub async fn wait_streaming<C>(&self, job_id: Uuid, mut on_chunk: C) -> JobResult<JobOutcome>
    where
        C: FnMut(&str) + Send,
    {
        self.bounded(job_id, ChunkSink::new(&mut on_chunk)).await
    }

    /// Wait on several jobs concurrently; outcomes come back in input
    /// order, each independently typed.
    pub async fn wait_all(&self, job_ids: &[Uuid]) -> Vec<JobResult<JobOutcome>> {
        futures::future::join_all(job_ids.iter().map(|id| self.wait(*id))).await
    }

    async fn bounded(&self, job_id: Uuid, sink: ChunkSink<'_>) -> JobResult<JobOutcome> {
        let budget = self.options.timeout;
        match tokio::time::timeout(budget, self.resolve(job_id, sink)).await {
            Ok(resolution) => resolution,
            Err(_elapsed) => {
                // The machine future was dropped, which closed any live
                // subscription.
                warn!(%job_id, ?budget, "wait budget exhausted");
                Err(JobError::Timeout { job_id, budget })
            }
        }
    }

    async fn resolve(&self, job_id: Uuid, mut sink: ChunkSink<'_>) -> JobResult<JobOutcome> {
        let mut phase = Phase::Checking;
        loop {
            phase = match phase {
                // Handles jobs that completed between dispatch and the
                // caller attaching this waiter.
                Phase::Checking => {
                    let job = self.fetch(job_id).await?;
                    if let Some(resolution) = sink.observe(&job) {
                        debug!(%job_id, "resolved on immediate check");
                        return resolution;
                    }
                    Phase::Subscribing
                }

                Phase::Subscribing => {
                    let subscription =
                        self.feed
                            .subscribe(job_id)
                            .await
                            .map_err(|e| JobError::Channel {
                                job_id,
                                reason: e.to_string(),
                            })?;
                    Phase::Reconciling(subscription)
                }

                // A terminal transition in the window between the first
                // read and the subscription becoming active produces no
                // further event; this re-read closes that window.
                Phase::Reconciling(mut subscription) => {
                    let job = self.fetch(job_id).await?;
                    if let Some(resolution) = sink.observe(&job) {
                        subscription.close();
                        debug!(%job_id, "resolved on reconciliation read");
                        return resolution;
                    }
                    Phase::Listening(subscription)
                }

                Phase::Listening(mut subscription) => match subscription.next_event().await {
                    Some(FeedEvent::Touched) => {
                        let job = self.fetch(job_id).await?;
                        if let Some(resolution) = sink.observe(&job) {
                            subscription.close();
                            debug!(%job_id, status = %job.status, "resolved on update event");
                            return resolution;
                        }
                        Phase::Listening(subscription)
                    }
                    Some(FeedEvent::Lost(reason)) => {
                        subscription.close();
                        return Err(JobError::Channel { job_id, reason });
                    }
                    None => {
                        subscription.close();
                        return Err(JobError::Channel {
                            job_id,
                            reason: "change feed closed unexpectedly".to_string(),
                        });
                    }
                },
            };
        }
    }

    async fn fetch(&self, job_id: Uuid) -> JobResult<Job> {
        match self.store.fetch_job(job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(JobError::NotFound(job_id)),
            // Once a wait is in flight, row reads are part of the
            // observation transport.
            Err(e) => Err(JobError::Channel {
                job_id,
                reason: e.to_string(),
            }),
        }
    }
}

/// Per-wait streaming cursor: the optional chunk callback plus the length
/// of the last snapshot it was given. One instance per in-flight wait, so
/// concurrent waiters never share progress.
struct ChunkSink<'a> {
    on_chunk: Option<&'a mut (dyn FnMut(&str) + Send)>,
    delivered_len: usize,
}

impl<'a> ChunkSink<'a> {
    fn disabled() -> ChunkSink<'static> {
        ChunkSink {
            on_chunk: None,
            delivered_len: 0,
        }
    }

    fn new(on_chunk: &'a mut (dyn FnMut(&str) + Send)) -> Self {
        Self {
            on_chunk: Some(on_chunk),
            delivered_len: 0,
        }
    }

    /// Feed one row observation through the sink: deliver any new partial
    /// first, then report the row's terminal resolution if it has one.
    ///
    /// A snapshot is delivered only when strictly longer than the last one
    /// delivered — partials grow monotonically, so this suppresses
    /// duplicates and keeps a stale read racing a fresher event from
    /// delivering out of order.
    fn observe(&mut self, job: &Job) -> Option<JobResult<JobOutcome>> {
        if let Some(on_chunk) = self.on_chunk.as_mut() {
            if let Some(partial) = job.partial_result.as_deref() {
                if partial.len() > self.delivered_len {
                    (*on_chunk)(partial);
                    self.delivered_len = partial.len();
                }
            }
        }
        job.resolution()
    }
}
