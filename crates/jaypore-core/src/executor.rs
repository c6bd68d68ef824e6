//! Executor trait and container observation types.
//!
//! An executor turns a [`Job`](crate::pipeline::Job) into a running,
//! observable, stoppable container and owns the per-run network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pipeline::Job;
use crate::Result;

/// A volume mounted into a job container in addition to the shared
/// workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path or named volume.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    pub read_only: bool,
}

/// Executor-specific settings a job can carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Extra environment merged in last.
    pub env: HashMap<String, String>,
    /// Extra volumes besides the workspace.
    pub volumes: Vec<VolumeMount>,
}

/// Raw container state as observed by the backend. The scheduler derives
/// the job status from it: running means RUNNING (or PASSED for services),
/// exited means PASSED when the exit code is zero and FAILED otherwise.
#[derive(Debug, Clone)]
pub struct ContainerProbe {
    pub is_running: bool,
    pub exit_code: Option<i64>,
    pub logs: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor backend.
    fn name(&self) -> &'static str;

    /// Sweep expired artefacts left behind by prior runs. Must never touch
    /// artefacts of the current run.
    async fn setup(&self) -> Result<()>;

    /// Idempotently ensure the per-run network exists. Retries transient
    /// backend failures; terminal failure is fatal for the pipeline.
    async fn create_network(&self) -> Result<()>;

    /// Launch a job as a detached container on the run network and return
    /// the backend's container id.
    async fn run(&self, job: &Job) -> Result<String>;

    /// Inspect a previously launched container.
    async fn get_status(&self, run_id: &str) -> Result<ContainerProbe>;

    /// Stop a container, allowing it a short grace period.
    async fn stop(&self, run_id: &str) -> Result<()>;

    /// Stop every live container this run launched, then remove the run
    /// network. Idempotent; must tolerate partial prior teardown and must
    /// run regardless of how the scheduler exited.
    async fn teardown(&self);
}
