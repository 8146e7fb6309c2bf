// Type definitions and enums

use std::time::Duration;
use uuid::Uuid;

/// Kind of server-executed work a job performs.
///
/// Determines the payload/result shape on the worker side; the completion
/// protocol itself treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Metadata,
    Plan,
    Grade,
    Chat,
    Embed,
    Transcribe,
    Exam,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Metadata => write!(f, "metadata"),
            JobKind::Plan => write!(f, "plan"),
            JobKind::Grade => write!(f, "grade"),
            JobKind::Chat => write!(f, "chat"),
            JobKind::Embed => write!(f, "embed"),
            JobKind::Transcribe => write!(f, "transcribe"),
            JobKind::Exam => write!(f, "exam"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(JobKind::Metadata),
            "plan" => Ok(JobKind::Plan),
            "grade" => Ok(JobKind::Grade),
            "chat" => Ok(JobKind::Chat),
            "embed" => Ok(JobKind::Embed),
            "transcribe" => Ok(JobKind::Transcribe),
            "exam" => Ok(JobKind::Exam),
            other => Err(UnknownVariant::new("job kind", other)),
        }
    }
}

/// Lifecycle state of a job.
///
/// Transitions are monotonic: `queued → running → {succeeded, failed}`.
/// A terminal status never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Whether the job can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownVariant::new("job status", other)),
        }
    }
}

/// A string that matched no known enum variant (bad row or env value).
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    what: &'static str,
    value: String,
}

impl UnknownVariant {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Final output of a successfully completed job.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum JobOutcome {
    /// The worker populated the structured `result` column.
    Structured(serde_json::Value),
    /// The worker finished without a structured result; this is the last
    /// partial snapshot, preserved so truncated-but-useful generations are
    /// not lost.
    Text(String),
}

impl JobOutcome {
    /// Collapse to a JSON value (text outcomes become a JSON string).
    pub fn into_value(self) -> serde_json::Value {
        match self {
            JobOutcome::Structured(value) => value,
            JobOutcome::Text(text) => serde_json::Value::String(text),
        }
    }
}

/// Every way a dispatch or wait can go wrong, kept distinct because the
/// caller's recovery differs: retry the dispatch, re-poll later, fall back
/// to a non-streaming path, or show the worker's error message. Nothing
/// here is retried automatically — resubmitting a `chat` or `grade` job
/// could double-charge.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The submission call failed before a job id was assigned. There is
    /// nothing to wait on and nothing to clean up.
    #[error("job dispatch failed: {0}")]
    Dispatch(String),

    /// The client gave up after its wait budget. The job may still be
    /// running (and may still finish) server-side; no cancellation is sent.
    #[error("timed out after {budget:?} waiting for job {job_id}")]
    Timeout { job_id: Uuid, budget: Duration },

    /// The notification transport (or a row read made on its behalf)
    /// failed. Distinct from the job itself failing: without the channel no
    /// future event will arrive, so continuing to wait would hang forever.
    #[error("change feed error for job {job_id}: {reason}")]
    Channel { job_id: Uuid, reason: String },

    /// The worker marked the job failed; carries the worker's error text.
    #[error("job failed: {0}")]
    Failed(String),

    /// The store has no row for this id.
    #[error("job not found: {0}")]
    NotFound(Uuid),
}

pub type JobResult<T> = std::result::Result<T, JobError>;
