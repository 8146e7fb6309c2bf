// Postgres LISTEN/NOTIFY change feed.
//
// The jobs table's AFTER UPDATE trigger notifies 'jobs_<id>' per row, so a
// LISTEN on that channel is a server-side filter: each subscription only
// ever hears about its own job.

use crate::feed::{ChangeFeed, FeedError, FeedEvent, JobSubscription};
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Notification channel for one job, matching the trigger in the
/// migrations (uuid without hyphens, so it is a plain identifier).
pub(crate) fn channel_name(job_id: &Uuid) -> String {
    format!("jobs_{}", job_id.simple())
}

pub struct PgChangeFeed {
    pool: PgPool,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, job_id: Uuid) -> Result<JobSubscription, FeedError> {
        // Each subscription gets its own listener connection so concurrent
        // waiters on the same job hold independent handles.
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;

        let channel = channel_name(&job_id);
        listener
            .listen(&channel)
            .await
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;

        debug!(%job_id, channel, "change feed subscription established");

        let (tx, rx) = mpsc::channel(16);
        let pump = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(_notification) => {
                        // Payload is ignored; the waiter re-reads the row.
                        if tx.send(FeedEvent::Touched).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(FeedEvent::Lost(e.to_string())).await;
                        break;
                    }
                }
            }
        });

        Ok(JobSubscription::new(job_id, rx, Some(pump)))
    }
}
