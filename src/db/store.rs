// Job store access: the trait seam the dispatcher and waiters work
// against, plus the Postgres implementation.

use crate::models::Job;
use crate::types::JobKind;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

/// Read/create access to the job store.
///
/// Creation happens exactly once per dispatch; everything else is read-only
/// here. The worker owns all other mutation.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create one job row in `queued` state and return its server-assigned
    /// id. The id exists only on success, so a failed insert leaves nothing
    /// to clean up.
    async fn insert_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Uuid, StoreError>;

    /// Current row for `id`, or `None` if the store has never seen it.
    async fn fetch_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (kind, payload, status)
            VALUES ($1, $2, 'queued')
            RETURNING id
            "#,
        )
        .bind(kind.to_string())
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn fetch_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }
}
