//! The control loop: declaration DSL, the stage walk, and teardown.

use chrono::{DateTime, Utc};
use jaypore_core::executor::{ContainerProbe, Executor};
use jaypore_core::pipeline::{Job, JobOptions, Pipeline, Status};
use jaypore_core::platform::Platform;
use jaypore_core::reporter::Reporter;
use jaypore_core::{Clock, Result, SystemClock, STATUS_FILE};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A flag that stops the walk: no new jobs are triggered once it is set,
/// while teardown and the final report still happen.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a pipeline run, returned after teardown completed.
#[derive(Debug)]
pub struct PipelineResult {
    pub status: Status,
    pub pipeline: Pipeline,
}

impl PipelineResult {
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// Process exit code: zero only for a passed pipeline.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

enum PendingDecision {
    Trigger,
    Skip,
}

/// Walks a pipeline using an executor, publishing snapshots to a platform.
///
/// Single-owner and cooperative: every externally visible effect happens
/// from the tick loop in [`Scheduler::run`].
pub struct Scheduler {
    pipeline: Pipeline,
    executor: Arc<dyn Executor>,
    platform: Box<dyn Platform>,
    reporter: Box<dyn Reporter>,
    clock: Arc<dyn Clock>,
    status_dir: Option<PathBuf>,
    cancel: CancelHandle,
}

impl Scheduler {
    pub fn new(
        pipeline: Pipeline,
        executor: Arc<dyn Executor>,
        platform: Box<dyn Platform>,
        reporter: Box<dyn Reporter>,
    ) -> Scheduler {
        Scheduler {
            pipeline,
            executor,
            platform,
            reporter,
            clock: Arc::new(SystemClock),
            status_dir: None,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Directory the rendered report is mirrored into as
    /// `jaypore_ci.status.txt`, for out-of-band consumers.
    pub fn with_status_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.status_dir = Some(dir.into());
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    // ---- declaration DSL

    /// Open a new stage. Jobs declared afterwards belong to it.
    pub fn stage(&mut self, name: &str) -> Result<()> {
        self.pipeline.add_stage(name, HashMap::new())
    }

    /// Open a new stage with environment overrides for its jobs.
    pub fn stage_with(&mut self, name: &str, env: HashMap<String, String>) -> Result<()> {
        self.pipeline.add_stage(name, env)
    }

    /// Declare a job in the current stage.
    pub fn job(&mut self, name: &str, command: &str) -> Result<()> {
        self.job_with(name, command, JobOptions::new())
    }

    pub fn job_with(&mut self, name: &str, command: &str, opts: JobOptions) -> Result<()> {
        self.pipeline.add_job(name, Some(command), opts)
    }

    /// Declare a long-lived service job. It counts as passed once its
    /// container is observed running and is stopped at pipeline exit.
    pub fn service(&mut self, name: &str, opts: JobOptions) -> Result<()> {
        let mut opts = opts;
        opts.is_service = true;
        self.pipeline.add_job(name, None, opts)
    }

    // ---- execution

    /// Run the walk to completion and tear everything down, whatever the
    /// exit path was.
    pub async fn run(mut self) -> Result<PipelineResult> {
        let prepared = match self.executor.setup().await {
            Ok(()) => self.executor.create_network().await,
            Err(e) => Err(e),
        };

        if prepared.is_ok() {
            if let Err(e) = self.platform.setup().await {
                warn!(error = %e, "platform setup failed; reports may not publish");
            }
            self.walk().await;
        }

        self.publish_snapshot().await;
        self.executor.teardown().await;
        if let Err(e) = self.platform.teardown().await {
            warn!(error = %e, "platform teardown failed");
        }

        prepared?;
        let status = self.pipeline.status();
        info!(status = ?status, "pipeline finished");
        Ok(PipelineResult {
            status,
            pipeline: self.pipeline,
        })
    }

    async fn walk(&mut self) {
        'stages: for si in 0..self.pipeline.stages.len() {
            debug!(stage = %self.pipeline.stages[si].name, "entering stage");
            loop {
                if self.cancel.is_cancelled() {
                    info!("cancelled; no new jobs will be triggered");
                    break 'stages;
                }
                self.tick(si).await;
                self.publish_snapshot().await;
                if self.stage_done(si) {
                    break;
                }
                tokio::time::sleep(self.pipeline.config.poll_interval).await;
            }
            if !self.stage_passed(si) {
                warn!(
                    stage = %self.pipeline.stages[si].name,
                    "stage did not pass; halting subsequent stages"
                );
                break 'stages;
            }
        }
    }

    /// One pass over a stage: refresh what is running, time out what has
    /// overstayed, then start or skip what is still pending. Refreshing
    /// first means a parent's terminal state is seen by every child within
    /// the same tick.
    async fn tick(&mut self, si: usize) {
        let now = self.clock.now();
        let job_count = self.pipeline.stages[si].jobs.len();

        for ji in 0..job_count {
            let (status, run_id) = {
                let job = &self.pipeline.stages[si].jobs[ji];
                (job.state.status, job.state.run_id.clone())
            };
            if status != Status::Running {
                continue;
            }
            let Some(run_id) = run_id else { continue };

            match self.executor.get_status(&run_id).await {
                Ok(probe) => {
                    apply_probe(&mut self.pipeline.stages[si].jobs[ji], probe);
                }
                Err(e) => {
                    let job = &self.pipeline.stages[si].jobs[ji];
                    debug!(job = %job.name, error = %e, "inspect failed; retrying next tick");
                }
            }

            let timed_out = {
                let job = &self.pipeline.stages[si].jobs[ji];
                job.state.status == Status::Running
                    && job.state.started_at.is_some_and(|started| {
                        (now - started).to_std().map(|e| e > job.timeout).unwrap_or(false)
                    })
            };
            if timed_out {
                let name = self.pipeline.stages[si].jobs[ji].name.clone();
                warn!(job = %name, "job exceeded its timeout; stopping container");
                if let Err(e) = self.executor.stop(&run_id).await {
                    warn!(job = %name, error = %e, "could not stop timed out container");
                }
                let job = &mut self.pipeline.stages[si].jobs[ji];
                job.state.advance(Status::TimedOut);
                job.state.finished_at = Some(now);
            }
        }

        for ji in 0..job_count {
            let decision = {
                let stage = &self.pipeline.stages[si];
                let job = &stage.jobs[ji];
                if job.state.status != Status::Pending {
                    None
                } else {
                    let parent_states: Vec<Status> = stage
                        .parents_of(&job.name)
                        .iter()
                        .filter_map(|p| stage.job(p))
                        .map(|j| j.state.status)
                        .collect();
                    if parent_states
                        .iter()
                        .any(|s| s.is_terminal() && *s != Status::Passed)
                    {
                        Some(PendingDecision::Skip)
                    } else if parent_states.iter().all(|s| *s == Status::Passed) {
                        Some(PendingDecision::Trigger)
                    } else {
                        None
                    }
                }
            };
            match decision {
                Some(PendingDecision::Trigger) => self.trigger(si, ji, now).await,
                Some(PendingDecision::Skip) => {
                    let job = &mut self.pipeline.stages[si].jobs[ji];
                    info!(job = %job.name, "skipping job; a dependency did not pass");
                    job.state.advance(Status::Skipped);
                }
                None => {}
            }
        }
    }

    async fn trigger(&mut self, si: usize, ji: usize, now: DateTime<Utc>) {
        let job = self.pipeline.stages[si].jobs[ji].clone();
        if job.state.status != Status::Pending {
            return;
        }
        info!(job = %job.name, image = %job.image, "triggering job");
        match self.executor.run(&job).await {
            Ok(run_id) => {
                let job = &mut self.pipeline.stages[si].jobs[ji];
                job.state.run_id = Some(run_id);
                job.state.started_at = Some(now);
                job.state.advance(Status::Running);
            }
            Err(e) => {
                warn!(job = %job.name, error = %e, "trigger failed");
                let job = &mut self.pipeline.stages[si].jobs[ji];
                job.state.logs = e.to_string();
                job.state.finished_at = Some(now);
                job.state.advance(Status::Failed);
            }
        }
    }

    async fn publish_snapshot(&mut self) {
        let now = self.clock.now();
        let report = self.reporter.render(&self.pipeline, now);
        let status = self.pipeline.external_status();
        if let Err(e) = self.platform.publish(&report, status).await {
            warn!(error = %e, "could not publish report");
        }
        if let Some(dir) = &self.status_dir {
            if let Err(e) = std::fs::write(dir.join(STATUS_FILE), &report) {
                debug!(error = %e, "could not write status file");
            }
        }
    }

    fn stage_done(&self, si: usize) -> bool {
        self.pipeline.stages[si]
            .jobs
            .iter()
            .all(|j| j.state.status.is_terminal())
    }

    fn stage_passed(&self, si: usize) -> bool {
        self.pipeline.stages[si]
            .jobs
            .iter()
            .all(|j| j.state.status == Status::Passed)
    }
}

/// Derive a job status from a raw container observation: running means
/// RUNNING (PASSED for services), exited means PASSED on a zero exit code
/// and FAILED otherwise.
fn apply_probe(job: &mut Job, probe: ContainerProbe) {
    if !probe.logs.is_empty() {
        job.state.logs = probe.logs;
    }
    if let Some(started) = probe.started_at {
        job.state.started_at = Some(started);
    }
    if probe.is_running {
        if job.is_service {
            info!(job = %job.name, "service observed running");
            job.state.advance(Status::Passed);
        }
        return;
    }
    job.state.exit_code = probe.exit_code;
    if probe.finished_at.is_some() {
        job.state.finished_at = probe.finished_at;
    }
    job.state.advance(if probe.exit_code == Some(0) {
        Status::Passed
    } else {
        Status::Failed
    });
}

/// Scoped pipeline execution: build a scheduler, let the callback declare
/// the pipeline, then run it. Setup happens before the walk and teardown is
/// guaranteed afterwards; Ctrl-C cancels the walk without skipping
/// teardown.
pub async fn run_ci<F>(
    pipeline: Pipeline,
    executor: Arc<dyn Executor>,
    platform: Box<dyn Platform>,
    reporter: Box<dyn Reporter>,
    define: F,
) -> Result<PipelineResult>
where
    F: FnOnce(&mut Scheduler) -> Result<()>,
{
    let mut scheduler = Scheduler::new(pipeline, executor, platform, reporter);
    let cancel = scheduler.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    define(&mut scheduler)?;
    scheduler.run().await
}
