// Job dispatch: pure request/response, no waiting.

use crate::chunks::{self, PageText};
use crate::config::ChunkingConfig;
use crate::db::store::JobStore;
use crate::types::{JobError, JobKind, JobResult};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Submits typed jobs to the store.
///
/// Creates exactly one row in `queued` state per successful call and
/// returns its server-assigned id. A failed submission returns
/// [`JobError::Dispatch`] with no id — the id only exists on success, so
/// there is no partial creation to clean up. No retries happen here;
/// resubmission policy belongs to the caller.
pub struct JobDispatcher<S> {
    store: Arc<S>,
}

impl<S: JobStore> JobDispatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Submit a job of `kind` with `payload`. Payload schemas are
    /// validated server-side.
    pub async fn submit(&self, kind: JobKind, payload: serde_json::Value) -> JobResult<Uuid> {
        let job_id = self
            .store
            .insert_job(kind, payload)
            .await
            .map_err(|e| JobError::Dispatch(e.to_string()))?;

        info!(%job_id, kind = %kind, "job dispatched");
        Ok(job_id)
    }

    /// Submit one `embed` job for a document, running chunk preparation
    /// first: pages are split into bounded overlapping segments, each
    /// carrying a deterministic content hash the store uses as an
    /// upsert-by-hash idempotency key.
    pub async fn submit_embedding(
        &self,
        document_id: &str,
        pages: &[PageText],
        chunking: &ChunkingConfig,
    ) -> JobResult<Uuid> {
        let segments = chunks::prepare_pages(pages, chunking);
        info!(
            document_id,
            pages = pages.len(),
            segments = segments.len(),
            "prepared embedding chunks"
        );

        self.submit(
            JobKind::Embed,
            chunks::embedding_payload(document_id, &segments),
        )
        .await
    }
}
