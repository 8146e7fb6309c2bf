// Postgres-backed front door: wires pool, store, feed, dispatcher and
// waiter together from one Config.

use crate::chunks::PageText;
use crate::config::Config;
use crate::db::{self, PgJobStore};
use crate::dispatch::JobDispatcher;
use crate::feed::PgChangeFeed;
use crate::types::{JobKind, JobOutcome, JobResult};
use crate::waiter::{JobWaiter, WaitOptions};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct JobClient {
    config: Config,
    dispatcher: JobDispatcher<PgJobStore>,
    waiter: JobWaiter<PgJobStore, PgChangeFeed>,
}

impl JobClient {
    /// Connect to the job store and build the dispatch/wait pair. The wait
    /// budget comes from the config; migrations are not run here — the
    /// store's owner applies [`db::MIGRATOR`].
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = db::create_pool(&config.database).await?;
        info!("connected to job store");

        let store = Arc::new(PgJobStore::new(pool.clone()));
        let feed = Arc::new(PgChangeFeed::new(pool));
        let options = WaitOptions {
            timeout: config.wait.timeout(),
        };

        Ok(Self {
            dispatcher: JobDispatcher::new(store.clone()),
            waiter: JobWaiter::with_options(store, feed, options),
            config,
        })
    }

    /// Submit a job; returns its id without waiting.
    pub async fn submit(&self, kind: JobKind, payload: serde_json::Value) -> JobResult<Uuid> {
        self.dispatcher.submit(kind, payload).await
    }

    /// Chunk a document's pages and submit one `embed` job for them.
    pub async fn submit_embedding(&self, document_id: &str, pages: &[PageText]) -> JobResult<Uuid> {
        self.dispatcher
            .submit_embedding(document_id, pages, &self.config.chunking)
            .await
    }

    /// Block until the job resolves.
    pub async fn wait(&self, job_id: Uuid) -> JobResult<JobOutcome> {
        self.waiter.wait(job_id).await
    }

    /// Stream partial output into `on_chunk` until the job resolves.
    pub async fn wait_streaming<C>(&self, job_id: Uuid, on_chunk: C) -> JobResult<JobOutcome>
    where
        C: FnMut(&str) + Send,
    {
        self.waiter.wait_streaming(job_id, on_chunk).await
    }

    /// Submit and block for the result in one call.
    pub async fn run(&self, kind: JobKind, payload: serde_json::Value) -> JobResult<JobOutcome> {
        let job_id = self.submit(kind, payload).await?;
        self.wait(job_id).await
    }

    pub fn dispatcher(&self) -> &JobDispatcher<PgJobStore> {
        &self.dispatcher
    }

    pub fn waiter(&self) -> &JobWaiter<PgJobStore, PgChangeFeed> {
        &self.waiter
    }
}
