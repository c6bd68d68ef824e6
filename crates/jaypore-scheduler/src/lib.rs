//! Pipeline scheduling for Jaypore CI.
//!
//! The scheduler owns the event loop: it declares the pipeline through a
//! small DSL, walks it stage by stage, drives the executor, and hands
//! rendered reports to the platform.
//!
//! ```no_run
//! use std::sync::Arc;
//! use jaypore_core::{JobOptions, Pipeline, PipelineConfig, Repo};
//! use jaypore_executor::DockerExecutor;
//! use jaypore_platform::ConsolePlatform;
//! use jaypore_reporter::TextReporter;
//! use jaypore_scheduler::run_ci;
//!
//! # async fn pipeline() -> jaypore_core::Result<()> {
//! let repo = Repo::from_env()?;
//! let executor = Arc::new(DockerExecutor::new(repo.sha.clone())?);
//! let pipeline = Pipeline::new(repo, PipelineConfig::default());
//!
//! let result = run_ci(
//!     pipeline,
//!     executor,
//!     Box::new(ConsolePlatform::new()),
//!     Box::new(TextReporter::new()),
//!     |sched| {
//!         sched.job("lint", "cargo clippy")?;
//!         sched.stage("Testing")?;
//!         sched.job("unit", "cargo test")?;
//!         sched.job_with("integration", "bash ci/integration.sh",
//!             JobOptions::new().after(["unit"]))?;
//!         Ok(())
//!     },
//! )
//! .await?;
//! std::process::exit(result.exit_code());
//! # }
//! ```

pub mod scheduler;

pub use scheduler::{run_ci, CancelHandle, PipelineResult, Scheduler};
