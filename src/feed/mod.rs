//! Per-job change feed.
//!
//! A thin wrapper over the real-time notification primitive: one
//! subscription delivers "row updated" events for a single job id and
//! nothing else (the filter is server-side, so a waiter never sees
//! unrelated jobs). The feed can fail independently of the job itself —
//! that distinction is what lets waiters resolve with a channel error
//! instead of hanging forever.

pub mod postgres;

pub use postgres::PgChangeFeed;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The subscription handshake itself failed; no events will ever
    /// arrive on this subscription.
    #[error("subscription handshake failed: {0}")]
    Subscribe(String),
}

/// One event on a job's change feed.
///
/// Events deliberately carry no row data: the job store is the single
/// source of truth, so listeners re-read the row on every event. That
/// keeps event handling idempotent and coalescing-safe.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The job's row was updated.
    Touched,
    /// The transport died mid-stream; no further events will arrive.
    Lost(String),
}

/// Source of per-job update subscriptions.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription scoped to `job_id`.
    ///
    /// Returning `Ok` is the "subscription established" signal the
    /// post-subscribe reconciliation read depends on; returning `Err` is
    /// the channel-failure signal.
    async fn subscribe(&self, job_id: Uuid) -> Result<JobSubscription, FeedError>;
}

/// Handle to one live subscription.
///
/// Closing is idempotent and also runs on drop, so abandoning a wait
/// (dropping the future that owns the handle) tears the subscription down
/// without firing anything afterwards.
pub struct JobSubscription {
    job_id: Uuid,
    rx: mpsc::Receiver<FeedEvent>,
    pump: Option<JoinHandle<()>>,
}

impl JobSubscription {
    pub fn new(job_id: Uuid, rx: mpsc::Receiver<FeedEvent>, pump: Option<JoinHandle<()>>) -> Self {
        Self { job_id, rx, pump }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next event, or `None` once the feed has shut down.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    /// Stop the subscription. Safe to call any number of times, including
    /// after the underlying channel has already torn itself down.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.rx.close();
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
