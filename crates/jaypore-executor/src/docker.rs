//! Docker executor.
//!
//! Runs every job of a pipeline run inside its own detached container,
//! attached to a per-run bridge network and sharing one workspace volume.
//! Everything the executor creates is named after the run sha, so a later
//! run can recognise and sweep leftovers.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use jaypore_core::executor::{ContainerProbe, Executor};
use jaypore_core::name::{workspace_dir, Name, WORKSPACE_MOUNT};
use jaypore_core::pipeline::Job;
use jaypore_core::{Error, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retention window for artefacts of prior runs.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default grace period given to a container before it is killed.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

const NETWORK_CREATE_ATTEMPTS: u32 = 3;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap()
});

/// Executor backed by the local Docker daemon.
pub struct DockerExecutor {
    docker: Docker,
    sha: String,
    workspace_root: PathBuf,
    retention: Duration,
    grace: Duration,
    /// Container ids launched by this run, owned until teardown.
    launched: Mutex<Vec<String>>,
}

impl DockerExecutor {
    /// Connect to the local Docker daemon and scope the executor to the
    /// given run sha.
    pub fn new(sha: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            Error::Fatal(format!(
                "{e}; make sure the Docker daemon is installed and running"
            ))
        })?;
        Ok(Self::with_client(docker, sha))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, sha: impl Into<String>) -> Self {
        DockerExecutor {
            docker,
            sha: sha.into(),
            workspace_root: PathBuf::from(jaypore_core::name::DEFAULT_WORKSPACE_ROOT),
            retention: DEFAULT_RETENTION,
            grace: DEFAULT_GRACE,
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Host directory of the shared workspace for this run.
    pub fn workspace(&self) -> PathBuf {
        workspace_dir(&self.workspace_root, &self.sha)
    }

    fn network_name(&self) -> String {
        Name::net(self.sha.clone()).to_string()
    }

    async fn network_exists(&self) -> Result<bool> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![self.network_name()]);
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| Error::InspectTransient(e.to_string()))?;
        // The name filter matches substrings; check for an exact hit.
        Ok(networks
            .iter()
            .any(|n| n.name.as_deref() == Some(self.network_name().as_str())))
    }

    async fn pull_image(&self, image: &str) {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    // A locally built image with no registry counterpart is
                    // fine; container creation fails later if it truly does
                    // not exist.
                    warn!(image = %image, error = %e, "pull warning");
                }
            }
        }
    }

    async fn collect_logs(&self, run_id: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(run_id, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    collected.push_str(&String::from_utf8_lossy(&output.into_bytes()));
                }
                Err(e) => {
                    debug!(run_id = %run_id, error = %e, "log read error");
                    break;
                }
            }
        }
        strip_ansi(&collected)
    }

    async fn stop_with_grace(&self, id: &str) -> std::result::Result<(), bollard::errors::Error> {
        let options = StopContainerOptions {
            t: self.grace.as_secs() as i64,
        };
        self.docker.stop_container(id, Some(options)).await
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    /// Sweep exited containers of prior runs that have outlived the
    /// retention window, together with their networks. Artefacts of the
    /// current sha are never touched. Individual removal failures are
    /// logged and skipped; only an unreachable backend is fatal.
    async fn setup(&self) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["exited".to_string()]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::Fatal(format!("could not list containers: {e}")))?;

        let now = Utc::now();
        let mut swept_shas: HashSet<String> = HashSet::new();
        for container in &containers {
            let Some(name) = parse_container_name(container.names.as_deref()) else {
                continue;
            };
            if name.sha() == self.sha {
                continue;
            }
            let Some(created) = container.created else {
                continue;
            };
            if !expired(created, now, self.retention) {
                continue;
            }
            let raw = name.to_string();
            match self
                .docker
                .remove_container(
                    &raw,
                    Some(RemoveContainerOptions {
                        v: true,
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                Ok(()) => {
                    info!(container = %raw, "removed expired container");
                    swept_shas.insert(name.sha().to_string());
                }
                Err(e) => warn!(container = %raw, error = %e, "could not remove container"),
            }
        }

        if swept_shas.is_empty() {
            return Ok(());
        }

        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|e| Error::Fatal(format!("could not list networks: {e}")))?;
        for network in networks {
            let Some(raw) = network.name else { continue };
            let Some(name) = Name::parse(&raw) else { continue };
            if name.sha() != self.sha && swept_shas.contains(name.sha()) {
                match self.docker.remove_network(&raw).await {
                    Ok(()) => info!(network = %raw, "removed expired network"),
                    Err(e) => warn!(network = %raw, error = %e, "could not remove network"),
                }
            }
        }
        Ok(())
    }

    /// Ensure the per-run bridge network exists, retrying a few times
    /// before giving up on the whole pipeline.
    async fn create_network(&self) -> Result<()> {
        let name = self.network_name();
        for attempt in 1..=NETWORK_CREATE_ATTEMPTS {
            match self.network_exists().await {
                Ok(true) => {
                    debug!(network = %name, "found network");
                    return Ok(());
                }
                Ok(false) => {
                    match self
                        .docker
                        .create_network(CreateNetworkOptions {
                            name: name.clone(),
                            driver: "bridge".to_string(),
                            ..Default::default()
                        })
                        .await
                    {
                        Ok(_) => {
                            info!(network = %name, "created network");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(network = %name, attempt, error = %e, "could not create network")
                        }
                    }
                }
                Err(e) => warn!(network = %name, attempt, error = %e, "could not list networks"),
            }
        }
        Err(Error::Fatal(format!("cannot create network {name}")))
    }

    async fn run(&self, job: &Job) -> Result<String> {
        let name = Name::job(self.sha.clone(), &job.name).to_string();

        self.pull_image(&job.image).await;

        // A container left behind under the same name blocks the launch.
        if let Err(e) = self
            .docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    v: true,
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            debug!(container = %name, error = %e, "no previous container to remove");
        }

        let mut env = jaypore_env(std::env::vars());
        env.insert("REPO_SHA".to_string(), self.sha.clone());
        if let Ok(value) = std::env::var("ENV") {
            env.insert("ENV".to_string(), value);
        }
        env.extend(job.env.clone());
        env.extend(job.exec.env.clone());

        let mut binds = vec![format!("{}:{}", self.workspace().display(), WORKSPACE_MOUNT)];
        for volume in &job.exec.volumes {
            let mode = if volume.read_only { "ro" } else { "rw" };
            binds.push(format!("{}:{}:{}", volume.source, volume.target, mode));
        }

        let config = Config {
            image: Some(job.image.clone()),
            cmd: job.command.as_ref().map(|c| {
                vec!["/bin/sh".to_string(), "-c".to_string(), c.clone()]
            }),
            env: Some(env.iter().map(|(k, v)| format_env_var(k, v)).collect()),
            working_dir: (!job.is_service).then(|| WORKSPACE_MOUNT.to_string()),
            host_config: Some(HostConfig {
                binds: Some(binds),
                network_mode: Some(self.network_name()),
                ..Default::default()
            }),
            ..Default::default()
        };

        info!(container = %name, image = %job.image, "starting container");
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::TriggerFailed(e.to_string()))?;

        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::TriggerFailed(e.to_string()))?;

        self.launched.lock().unwrap().push(created.id.clone());
        Ok(created.id)
    }

    async fn get_status(&self, run_id: &str) -> Result<ContainerProbe> {
        let inspect = self
            .docker
            .inspect_container(run_id, None)
            .await
            .map_err(|e| Error::InspectTransient(e.to_string()))?;
        let state = inspect
            .state
            .ok_or_else(|| Error::InspectTransient(format!("no state for {run_id}")))?;

        let logs = self.collect_logs(run_id).await;
        Ok(ContainerProbe {
            is_running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            logs,
            started_at: parse_docker_time(state.started_at.as_deref()),
            finished_at: parse_docker_time(state.finished_at.as_deref()),
        })
    }

    async fn stop(&self, run_id: &str) -> Result<()> {
        self.stop_with_grace(run_id)
            .await
            .map_err(|e| Error::InspectTransient(e.to_string()))
    }

    /// Stop every container this run launched (best-effort, two passes),
    /// then remove the run network. Safe to call more than once.
    async fn teardown(&self) {
        let ids: Vec<String> = self.launched.lock().unwrap().clone();
        let mut retry = Vec::new();
        for id in &ids {
            if let Err(e) = self.stop_with_grace(id).await {
                debug!(run_id = %id, error = %e, "first stop attempt failed");
                retry.push(id.clone());
            }
        }
        for id in retry {
            if let Err(e) = self.stop_with_grace(&id).await {
                warn!(run_id = %id, error = %e, "could not stop container");
            }
        }

        let network = self.network_name();
        if let Err(e) = self.docker.remove_network(&network).await {
            debug!(network = %network, error = %e, "could not remove network");
        }
        info!(containers = ids.len(), "executor teardown complete");
    }
}

fn format_env_var(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Process environment entries destined for job containers: everything
/// matching `JAYPORE_*`, with the prefix stripped.
fn jaypore_env(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter_map(|(key, value)| {
        key.strip_prefix("JAYPORE_")
            .map(|stripped| (stripped.to_string(), value))
    })
    .collect()
}

/// First name reported for a container, with the leading slash Docker adds
/// stripped, parsed against the naming scheme.
fn parse_container_name(names: Option<&[String]>) -> Option<Name> {
    let raw = names?.first()?;
    Name::parse(raw.strip_prefix('/').unwrap_or(raw))
}

/// Whether an artefact created at `created_secs` (unix time) has outlived
/// the retention window.
fn expired(created_secs: i64, now: DateTime<Utc>, retention: Duration) -> bool {
    now.timestamp() - created_secs >= retention.as_secs() as i64
}

/// Docker reports `0001-01-01T00:00:00Z` for times that have not happened.
fn parse_docker_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn strip_ansi(logs: &str) -> String {
    ANSI_ESCAPE.replace_all(logs, "").to_string()
}


/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use jaypore_core::pipeline::{JobOptions, Pipeline, PipelineConfig};
    use jaypore_core::repo::Repo;

    fn make_job(name: &str, command: &str) -> Job {
        let mut pipeline = Pipeline::new(Repo::fake("exectest"), PipelineConfig::default());
        pipeline
            .add_job(name, Some(command), JobOptions::new().image("alpine:latest"))
            .unwrap();
        pipeline.stages[0].jobs[0].clone()
    }

    #[tokio::test]
    #[ignore]
    async fn network_lifecycle_is_idempotent() {
        let executor = DockerExecutor::new("exectest").unwrap();
        executor.create_network().await.expect("create network");
        executor.create_network().await.expect("second create is a no-op");
        executor.teardown().await;
        executor.teardown().await;
    }

    #[tokio::test]
    #[ignore]
    async fn job_lifecycle() {
        let executor = DockerExecutor::new("exectest").unwrap();
        executor.create_network().await.expect("create network");

        let job = make_job("hello", "echo 'hello from docker'");
        let run_id = executor.run(&job).await.expect("run job");

        let probe = loop {
            let probe = executor.get_status(&run_id).await.expect("get status");
            if !probe.is_running {
                break probe;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        };

        assert_eq!(probe.exit_code, Some(0));
        assert!(probe.logs.contains("hello from docker"));
        assert!(probe.started_at.is_some());
        assert!(probe.finished_at.is_some());

        executor.teardown().await;
    }

    #[tokio::test]
    #[ignore]
    async fn failing_job_reports_exit_code() {
        let executor = DockerExecutor::new("exectest").unwrap();
        executor.create_network().await.expect("create network");

        let job = make_job("fails", "exit 42");
        let run_id = executor.run(&job).await.expect("run job");

        let probe = loop {
            let probe = executor.get_status(&run_id).await.expect("get status");
            if !probe.is_running {
                break probe;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        };

        assert_eq!(probe.exit_code, Some(42));
        executor.teardown().await;
    }
}
