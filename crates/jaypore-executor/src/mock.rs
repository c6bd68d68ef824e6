//! A mock executor that runs nothing.
//!
//! Jobs "complete" instantly with a scripted exit code, which is all the
//! scheduler needs to be exercised without a container backend. Service
//! jobs and explicitly hung jobs stay in the running state until stopped.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jaypore_core::executor::{ContainerProbe, Executor};
use jaypore_core::pipeline::Job;
use jaypore_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MockRun {
    job_name: String,
    running: bool,
    exit_code: i64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MockState {
    order: Vec<String>,
    runs: HashMap<String, MockRun>,
    teardown_calls: u32,
}

#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
    fail: HashSet<String>,
    hang: HashSet<String>,
    refuse: HashSet<String>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs that exit non-zero.
    pub fn failing<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail.extend(jobs.into_iter().map(Into::into));
        self
    }

    /// Jobs that keep running until stopped.
    pub fn hanging<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hang.extend(jobs.into_iter().map(Into::into));
        self
    }

    /// Jobs whose launch the backend rejects.
    pub fn refusing<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refuse.extend(jobs.into_iter().map(Into::into));
        self
    }

    /// Job names in the order they were triggered.
    pub fn execution_order(&self) -> Vec<String> {
        self.state.lock().unwrap().order.clone()
    }

    pub fn teardown_calls(&self) -> u32 {
        self.state.lock().unwrap().teardown_calls
    }

    /// Containers still observed running.
    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| r.running)
            .count()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn create_network(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, job: &Job) -> Result<String> {
        if self.refuse.contains(&job.name) {
            return Err(Error::TriggerFailed(format!(
                "backend refused job {}",
                job.name
            )));
        }
        let run_id = Uuid::new_v4().simple().to_string();
        let mut state = self.state.lock().unwrap();
        state.order.push(job.name.clone());
        state.runs.insert(
            run_id.clone(),
            MockRun {
                job_name: job.name.clone(),
                running: job.is_service || self.hang.contains(&job.name),
                exit_code: if self.fail.contains(&job.name) { 1 } else { 0 },
                started_at: Utc::now(),
            },
        );
        Ok(run_id)
    }

    async fn get_status(&self, run_id: &str) -> Result<ContainerProbe> {
        let state = self.state.lock().unwrap();
        let run = state
            .runs
            .get(run_id)
            .ok_or_else(|| Error::InspectTransient(format!("unknown run {run_id}")))?;
        Ok(ContainerProbe {
            is_running: run.running,
            exit_code: if run.running { None } else { Some(run.exit_code) },
            logs: format!("fake logs for {}", run.job_name),
            started_at: Some(run.started_at),
            finished_at: if run.running {
                None
            } else {
                Some(run.started_at + ChronoDuration::seconds(1))
            },
        })
    }

    async fn stop(&self, run_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(run) = state.runs.get_mut(run_id) {
            run.running = false;
            run.exit_code = 137;
        }
        Ok(())
    }

    async fn teardown(&self) {
        let mut state = self.state.lock().unwrap();
        for run in state.runs.values_mut() {
            if run.running {
                run.running = false;
                run.exit_code = 137;
            }
        }
        state.teardown_calls += 1;
    }
}
