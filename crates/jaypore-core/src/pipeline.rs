//! Pipeline, stage, job and edge definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::executor::ExecOptions;
use crate::name::sanitize;
use crate::platform::ReportStatus;
use crate::repo::Repo;
use crate::{Error, Result};

/// Name of the stage jobs land in when none was declared.
pub const DEFAULT_STAGE: &str = "JayporeCI";

/// Lifecycle status of a job, and the classification of a whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Running,
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl Status {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Passed | Status::Failed | Status::TimedOut | Status::Skipped
        )
    }

    /// Fixed symbol used by reporters.
    pub fn symbol(&self) -> &'static str {
        match self {
            Status::Passed => "🟢",
            Status::Failed | Status::TimedOut => "🔴",
            Status::Running => "🔵",
            Status::Skipped => "⚪",
            Status::Pending => "🟡",
        }
    }

    /// Lowercase label used in graph reports.
    pub fn label(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::TimedOut => "timeout",
            Status::Skipped => "skipped",
        }
    }
}

/// Mutable run information attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: Status,
    /// Backend identifier of the running container, if any.
    pub run_id: Option<String>,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub logs: String,
}

impl JobState {
    /// Move to a new status. Transitions out of a terminal state are
    /// ignored, which keeps the terminal set monotonic.
    pub fn advance(&mut self, status: Status) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState {
            status: Status::Pending,
            run_id: None,
            exit_code: None,
            started_at: None,
            finished_at: None,
            logs: String::new(),
        }
    }
}

/// How an edge gates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// The target may start only once every source is terminal-success.
    AllSuccess,
}

/// A declared dependency between two jobs of the same stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub from: String,
    pub to: String,
}

/// A unit of work realised as one container execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    /// Shell command. `None` only for service jobs.
    pub command: Option<String>,
    pub image: String,
    pub is_service: bool,
    pub timeout: Duration,
    /// Resolved environment: pipeline defaults, stage overrides, then the
    /// job's own overrides.
    pub env: HashMap<String, String>,
    pub exec: ExecOptions,
    pub state: JobState,
}

/// Optional settings accepted when declaring a job.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub image: Option<String>,
    pub timeout: Option<Duration>,
    pub env: HashMap<String, String>,
    pub is_service: bool,
    pub after: Vec<String>,
    pub exec: ExecOptions,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare dependencies on previously declared jobs of the same stage.
    pub fn after<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn service(mut self) -> Self {
        self.is_service = true;
        self
    }

    pub fn exec(mut self, exec: ExecOptions) -> Self {
        self.exec = exec;
        self
    }
}

/// A named, ordered group of jobs executed in sequence relative to other
/// stages. Edges only ever connect jobs of the same stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<Job>,
    pub edges: Vec<Edge>,
    pub env: HashMap<String, String>,
}

impl Stage {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn job_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.name == name)
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.job(name).is_some()
    }

    /// Names of the declared parents of a job. Derived from the edges; only
    /// the declared direction is stored.
    pub fn parents_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == name)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Names of the jobs gated on the given one.
    pub fn children_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == name)
            .map(|e| e.to.as_str())
            .collect()
    }
}

/// Defaults shared by every job of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Image used by jobs that do not name one.
    pub image: String,
    /// Delay between scheduler ticks.
    pub poll_interval: Duration,
    /// Wall-clock timeout for jobs that do not set one.
    pub timeout: Duration,
    /// Environment passed to every job.
    pub env: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            image: "alpine".to_string(),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(15 * 60),
            env: HashMap::new(),
        }
    }
}

/// A declarative pipeline: an ordered sequence of stages over one repository
/// checkout.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub repo: Repo,
    pub stages: Vec<Stage>,
    pub config: PipelineConfig,
}

impl Pipeline {
    pub fn new(repo: Repo, config: PipelineConfig) -> Pipeline {
        Pipeline {
            repo,
            stages: Vec::new(),
            config,
        }
    }

    /// Open a new stage. Stage names share one namespace with job names.
    pub fn add_stage(&mut self, name: &str, env: HashMap<String, String>) -> Result<()> {
        let name = sanitize(name);
        self.ensure_unique(&name)?;
        self.stages.push(Stage {
            name,
            jobs: Vec::new(),
            edges: Vec::new(),
            env,
        });
        Ok(())
    }

    /// Declare a job in the newest stage, creating a default stage if none
    /// has been opened yet.
    ///
    /// Enforced here, before any container runs: globally unique names,
    /// dependencies declared before their dependents and within the same
    /// stage, and a non-empty command for anything that is not a service.
    pub fn add_job(&mut self, name: &str, command: Option<&str>, opts: JobOptions) -> Result<()> {
        let name = sanitize(name);
        self.ensure_unique(&name)?;
        if self.stages.is_empty() {
            self.add_stage(DEFAULT_STAGE, HashMap::new())?;
        }

        let command = command.map(str::to_string).filter(|c| !c.trim().is_empty());
        if !opts.is_service && command.is_none() {
            return Err(Error::Config(format!(
                "job '{name}' is not a service and has no command"
            )));
        }

        let image = opts.image.unwrap_or_else(|| self.config.image.clone());
        let timeout = opts.timeout.unwrap_or(self.config.timeout);

        let mut env = self.config.env.clone();
        let stage = self.stages.last_mut().unwrap();
        env.extend(stage.env.clone());
        env.extend(opts.env);

        let mut edges = Vec::new();
        for parent in &opts.after {
            let parent = sanitize(parent);
            if !stage.has_job(&parent) {
                return Err(Error::Config(format!(
                    "job '{name}' depends on '{parent}' which is not declared in stage '{}'",
                    stage.name
                )));
            }
            edges.push(Edge {
                kind: EdgeKind::AllSuccess,
                from: parent,
                to: name.clone(),
            });
        }

        stage.jobs.push(Job {
            name,
            command,
            image,
            is_service: opts.is_service,
            timeout,
            env,
            exec: opts.exec,
            state: JobState::default(),
        });
        stage.edges.extend(edges);
        Ok(())
    }

    /// Every job of every stage, in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.stages.iter().find_map(|s| s.job(name))
    }

    /// Aggregate status of the whole pipeline:
    /// any job RUNNING wins, else any FAILED/TIMEOUT makes it FAILED, else
    /// any PENDING keeps it PENDING, else PASSED.
    pub fn status(&self) -> Status {
        let mut saw_failed = false;
        let mut saw_pending = false;
        for job in self.jobs() {
            match job.state.status {
                Status::Running => return Status::Running,
                Status::Failed | Status::TimedOut => saw_failed = true,
                Status::Pending => saw_pending = true,
                Status::Passed | Status::Skipped => {}
            }
        }
        if saw_failed {
            Status::Failed
        } else if saw_pending {
            Status::Pending
        } else {
            Status::Passed
        }
    }

    /// Status handed to platforms alongside a rendered report.
    pub fn external_status(&self) -> ReportStatus {
        match self.status() {
            Status::Pending | Status::Running => ReportStatus::Pending,
            Status::Passed => ReportStatus::Success,
            Status::Failed => ReportStatus::Failure,
            Status::TimedOut | Status::Skipped => ReportStatus::Warning,
        }
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        for stage in &self.stages {
            if stage.name == name {
                return Err(Error::Config(format!("stage name taken: {name}")));
            }
            if stage.has_job(name) {
                return Err(Error::Config(format!("job name taken: {name}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(Repo::fake("a1b2c3d4e5f6"), PipelineConfig::default())
    }

    fn add(p: &mut Pipeline, name: &str) {
        p.add_job(name, Some("ok"), JobOptions::new()).unwrap();
    }

    #[test]
    fn duplicate_job_names_are_rejected() {
        let mut p = pipeline();
        add(&mut p, "lint");
        let err = p.add_job("lint", Some("ok"), JobOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let mut p = pipeline();
        p.add_stage("build", HashMap::new()).unwrap();
        assert!(p.add_stage("build", HashMap::new()).is_err());
    }

    #[test]
    fn stage_and_job_share_one_namespace() {
        let mut p = pipeline();
        p.add_stage("x", HashMap::new()).unwrap();
        assert!(p.add_job("x", Some("ok"), JobOptions::new()).is_err());
    }

    #[test]
    fn dependency_must_be_declared_first() {
        let mut p = pipeline();
        let err = p
            .add_job("x", Some("ok"), JobOptions::new().after(["y"]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn dependencies_cannot_cross_stages() {
        let mut p = pipeline();
        p.add_stage("stage1", HashMap::new()).unwrap();
        add(&mut p, "y");
        p.add_stage("stage2", HashMap::new()).unwrap();
        let err = p
            .add_job("x", Some("ok"), JobOptions::new().after(["y"]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn non_service_jobs_need_a_command() {
        let mut p = pipeline();
        assert!(p.add_job("x", None, JobOptions::new()).is_err());
        assert!(p.add_job("x", Some("  "), JobOptions::new()).is_err());
        assert!(p.add_job("db", None, JobOptions::new().service()).is_ok());
    }

    #[test]
    fn names_are_sanitised_on_registration() {
        let mut p = pipeline();
        p.add_job("Unit Tests!", Some("ok"), JobOptions::new()).unwrap();
        assert!(p.job("Unit-Tests-").is_some());
    }

    #[test]
    fn job_env_layers_pipeline_stage_and_job() {
        let mut config = PipelineConfig::default();
        config.env.insert("A".into(), "pipeline".into());
        config.env.insert("B".into(), "pipeline".into());
        let mut p = Pipeline::new(Repo::fake("sha"), config);
        let mut stage_env = HashMap::new();
        stage_env.insert("B".into(), "stage".into());
        p.add_stage("s", stage_env).unwrap();
        p.add_job("j", Some("ok"), JobOptions::new().env("C", "job"))
            .unwrap();
        let job = p.job("j").unwrap();
        assert_eq!(job.env["A"], "pipeline");
        assert_eq!(job.env["B"], "stage");
        assert_eq!(job.env["C"], "job");
    }

    #[test]
    fn aggregate_status_follows_the_rule() {
        let mut p = pipeline();
        add(&mut p, "a");
        add(&mut p, "b");
        assert_eq!(p.status(), Status::Pending);

        p.stages[0].job_mut("a").unwrap().state.advance(Status::Running);
        assert_eq!(p.status(), Status::Running);

        p.stages[0].job_mut("a").unwrap().state.advance(Status::Failed);
        assert_eq!(p.status(), Status::Failed);

        p.stages[0].job_mut("b").unwrap().state.advance(Status::Skipped);
        assert_eq!(p.status(), Status::Failed);
        assert_eq!(p.external_status(), ReportStatus::Failure);
    }

    #[test]
    fn running_beats_everything_and_passed_needs_all_done() {
        let mut p = pipeline();
        add(&mut p, "a");
        add(&mut p, "b");
        p.stages[0].job_mut("a").unwrap().state.advance(Status::Passed);
        assert_eq!(p.status(), Status::Pending);
        p.stages[0].job_mut("b").unwrap().state.advance(Status::Passed);
        assert_eq!(p.status(), Status::Passed);
        assert_eq!(p.external_status(), ReportStatus::Success);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut state = JobState::default();
        state.advance(Status::Running);
        state.advance(Status::TimedOut);
        state.advance(Status::Passed);
        assert_eq!(state.status, Status::TimedOut);
    }

    #[test]
    fn parents_are_derived_from_edges() {
        let mut p = pipeline();
        add(&mut p, "a");
        add(&mut p, "b");
        p.add_job("d", Some("ok"), JobOptions::new().after(["a", "b"]))
            .unwrap();
        let stage = &p.stages[0];
        assert_eq!(stage.parents_of("d"), vec!["a", "b"]);
        assert_eq!(stage.children_of("a"), vec!["d"]);
        assert!(stage.parents_of("a").is_empty());
    }
}
