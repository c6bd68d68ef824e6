//! Error types for Jaypore CI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A pipeline invariant was violated at construction time. Surfaced
    /// before any container runs.
    #[error("invalid pipeline: {0}")]
    Config(String),

    /// The container backend rejected a job launch. Recorded as the job's
    /// terminal FAILED state; the pipeline continues.
    #[error("could not trigger job: {0}")]
    TriggerFailed(String),

    /// Transient backend error while polling a container. Retried on the
    /// next tick.
    #[error("transient inspect failure: {0}")]
    InspectTransient(String),

    /// Publishing a report failed. Logged; the pipeline continues.
    #[error("could not publish report: {0}")]
    Platform(String),

    /// A job exceeded its wall-clock timeout.
    #[error("job exceeded timeout of {0:?}")]
    Timeout(std::time::Duration),

    /// The backend is unreachable or setup failed for good. Aborts the
    /// pipeline after teardown.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
