//! Jaypore CI maintenance CLI.
//!
//! Pipelines themselves are Rust programs built on `jaypore-scheduler`;
//! this binary only covers the host-side chores around them.

use anyhow::Context;
use clap::{Parser, Subcommand};
use jaypore_core::name::{workspace_dir, DEFAULT_WORKSPACE_ROOT};
use jaypore_core::repo::Repo;
use jaypore_core::{Executor, STATUS_FILE};
use jaypore_executor::DockerExecutor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jaypore")]
#[command(about = "Jaypore CI maintenance commands", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove expired containers and networks left behind by old runs
    Clean {
        /// Sha of the run to protect; detected from the repository if omitted
        #[arg(long, env = "REPO_SHA")]
        sha: Option<String>,
        /// Retention window in days
        #[arg(long, default_value = "7")]
        retain_days: u64,
    },
    /// Print the latest status report written by a pipeline run
    Status {
        #[arg(long, env = "REPO_SHA")]
        sha: Option<String>,
        /// Root directory holding per-run workspaces
        #[arg(long, default_value = DEFAULT_WORKSPACE_ROOT)]
        workspace_root: PathBuf,
    },
}

fn current_sha(sha: Option<String>) -> anyhow::Result<String> {
    match sha {
        Some(sha) => Ok(sha),
        None => Ok(Repo::from_path(Path::new("."))
            .context("no sha given and the current directory is not a git repository")?
            .sha),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Clean { sha, retain_days } => {
            let sha = current_sha(sha)?;
            info!(sha = %sha, retain_days, "sweeping expired artefacts");
            let executor = DockerExecutor::new(sha)?
                .with_retention(Duration::from_secs(retain_days * 24 * 60 * 60));
            executor.setup().await?;
        }
        Commands::Status {
            sha,
            workspace_root,
        } => {
            let sha = current_sha(sha)?;
            let path = workspace_dir(&workspace_root, &sha).join(STATUS_FILE);
            match std::fs::read_to_string(&path) {
                Ok(report) => println!("{report}"),
                Err(_) => println!("No status report at {}", path.display()),
            }
        }
    }
    Ok(())
}
