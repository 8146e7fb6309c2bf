// Job row model, matching the job store schema
// Note: FromRow is written by hand so `kind`/`status` decode into typed
// enums from TEXT columns with runtime query_as (no DATABASE_URL at
// compile time).

use crate::types::{JobError, JobKind, JobOutcome, JobResult, JobStatus, UnknownVariant};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

/// One unit of asynchronous work, as stored by the external job store.
///
/// This subsystem creates rows (via dispatch) and reads them; only the
/// worker mutates `status`, `partial_result`, `result` and `error`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Present iff `status = succeeded`.
    pub result: Option<serde_json::Value>,
    /// Monotonically growing text snapshot while the job is non-terminal;
    /// frozen once a terminal status is reached.
    pub partial_result: Option<String>,
    /// Present iff `status = failed`.
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal resolution for this row, if it has one.
    ///
    /// On success, prefers the structured `result`; falls back to the frozen
    /// partial snapshot when the worker did not populate `result`, so
    /// truncated-but-useful generations are not lost.
    pub(crate) fn resolution(&self) -> Option<JobResult<JobOutcome>> {
        match self.status {
            JobStatus::Succeeded => Some(Ok(match &self.result {
                Some(value) if !value.is_null() => JobOutcome::Structured(value.clone()),
                _ => JobOutcome::Text(self.partial_result.clone().unwrap_or_default()),
            })),
            JobStatus::Failed => Some(Err(JobError::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| "worker reported no error message".to_string()),
            ))),
            JobStatus::Queued | JobStatus::Running => None,
        }
    }
}

fn decode_variant<T>(column: &str, raw: String) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    raw.parse().map_err(|e: UnknownVariant| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl sqlx::FromRow<'_, PgRow> for Job {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: decode_variant("kind", row.try_get("kind")?)?,
            payload: row.try_get("payload")?,
            status: decode_variant("status", row.try_get("status")?)?,
            result: row.try_get("result")?,
            partial_result: row.try_get("partial_result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
