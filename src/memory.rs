//! In-memory job store and change feed.
//!
//! Implements both protocol seams over a mutexed map plus one broadcast
//! topic per job, and exposes the worker's side of the lifecycle
//! (`set_partial`, `succeed`, `fail`, ...) so tests and local development
//! can drive jobs to completion without Postgres or a real worker pool.

use crate::db::store::{JobStore, StoreError};
use crate::feed::{ChangeFeed, FeedError, FeedEvent, JobSubscription};
use crate::models::Job;
use crate::types::{JobKind, JobStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

pub struct MemoryBackend {
    jobs: Mutex<HashMap<Uuid, Job>>,
    topics: Mutex<HashMap<Uuid, broadcast::Sender<()>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topic(&self, job_id: Uuid) -> broadcast::Sender<()> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }

    /// Apply `mutate` to the row, then notify subscribers. Returns false
    /// if the job does not exist.
    fn update(&self, job_id: Uuid, mutate: impl FnOnce(&mut Job)) -> bool {
        let updated = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&job_id) {
                Some(job) => {
                    mutate(job);
                    job.updated_at = chrono::Utc::now();
                    true
                }
                None => false,
            }
        };
        if updated {
            // no subscribers is fine
            let _ = self.topic(job_id).send(());
        }
        updated
    }

    // Worker-side simulation -------------------------------------------------

    /// Overwrite the partial snapshot (and move a queued job to running),
    /// as the worker does while streaming tokens.
    pub fn set_partial(&self, job_id: Uuid, partial: &str) -> bool {
        self.update(job_id, |job| {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
            }
            job.partial_result = Some(partial.to_string());
        })
    }

    /// Terminal success with a structured result.
    pub fn succeed(&self, job_id: Uuid, result: serde_json::Value) -> bool {
        self.update(job_id, |job| {
            job.status = JobStatus::Succeeded;
            job.result = Some(result);
        })
    }

    /// Terminal success without a structured result (the waiter falls back
    /// to the frozen partial snapshot).
    pub fn finish_without_result(&self, job_id: Uuid) -> bool {
        self.update(job_id, |job| {
            job.status = JobStatus::Succeeded;
        })
    }

    /// Terminal failure with the worker's error text.
    pub fn fail(&self, job_id: Uuid, error: &str) -> bool {
        self.update(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
        })
    }

    /// Re-notify subscribers without changing the row (a no-op write, as
    /// produced by an idempotent worker update).
    pub fn touch(&self, job_id: Uuid) {
        let _ = self.topic(job_id).send(());
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryBackend {
    async fn insert_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let job = Job {
            id,
            kind,
            payload,
            status: JobStatus::Queued,
            result: None,
            partial_result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().unwrap().insert(id, job);
        Ok(id)
    }

    async fn fetch_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, job_id: Uuid) -> Result<JobSubscription, FeedError> {
        let mut topic_rx = self.topic(job_id).subscribe();
        let (tx, rx) = mpsc::channel(16);
        let pump = tokio::spawn(async move {
            loop {
                match topic_rx.recv().await {
                    Ok(()) => {
                        if tx.send(FeedEvent::Touched).await.is_err() {
                            break;
                        }
                    }
                    // Events carry no data, so lagging only coalesces
                    // notifications; one Touched still triggers a re-read.
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if tx.send(FeedEvent::Touched).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(JobSubscription::new(job_id, rx, Some(pump)))
    }
}
