//! Platform trait: where rendered reports are published.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The closed set of statuses a platform understands. This is the dot next
/// to a commit on a VCS host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Pending,
    Success,
    Failure,
    Warning,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Success => "success",
            ReportStatus::Failure => "failure",
            ReportStatus::Warning => "warning",
            ReportStatus::Error => "error",
        }
    }

    /// Everything except `pending` reflects a settled pipeline and must
    /// always be published, throttling notwithstanding.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Pending)
    }
}

/// A sink for CI reports: a VCS host, an email thread, a terminal.
///
/// Publish failures are logged by the scheduler and never abort the
/// pipeline. Implementations may throttle, but must let terminal statuses
/// through.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Work to do before the pipeline runs, e.g. ensuring a PR exists.
    async fn setup(&mut self) -> Result<()>;

    /// Publish a rendered report with the pipeline's external status.
    async fn publish(&mut self, report: &str, status: ReportStatus) -> Result<()>;

    /// Called once the pipeline is finished.
    async fn teardown(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ReportStatus::Pending.is_terminal());
        for s in [
            ReportStatus::Success,
            ReportStatus::Failure,
            ReportStatus::Warning,
            ReportStatus::Error,
        ] {
            assert!(s.is_terminal());
        }
    }
}
