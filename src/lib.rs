// StudyForge Jobs - asynchronous AI job dispatch and streaming completion
// for the StudyForge tutoring backend.

pub mod chunks;
pub mod client;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod feed;
pub mod memory;
pub mod models;
pub mod types;
pub mod waiter;

// Re-exports for convenience
pub use client::JobClient;
pub use config::Config;
pub use dispatch::JobDispatcher;
pub use models::Job;
pub use types::{JobError, JobKind, JobOutcome, JobResult, JobStatus};
pub use waiter::{JobWaiter, WaitOptions, DEFAULT_WAIT_TIMEOUT};

/// Install the default env-filtered tracing subscriber.
///
/// Intended for binaries and local development; applications embedding
/// this crate usually install their own.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studyforge_jobs=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
