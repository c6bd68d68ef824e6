//! Publish-cadence decorator.
//!
//! The scheduler publishes on every tick; this wrapper decides what
//! actually goes out. Pending updates are rate limited, identical reports
//! are dropped, and terminal statuses always pass through.

use async_trait::async_trait;
use jaypore_core::platform::{Platform, ReportStatus};
use jaypore_core::Result;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

pub struct Throttled<P> {
    inner: P,
    interval: Duration,
    last_published: Option<Instant>,
    last_report: Option<String>,
}

impl<P: Platform> Throttled<P> {
    pub fn new(inner: P) -> Self {
        Self::with_interval(inner, DEFAULT_INTERVAL)
    }

    pub fn with_interval(inner: P, interval: Duration) -> Self {
        Throttled {
            inner,
            interval,
            last_published: None,
            last_report: None,
        }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    fn should_skip(&self, report: &str, status: ReportStatus) -> bool {
        if self.last_report.as_deref() == Some(report) {
            return true;
        }
        if status.is_terminal() {
            return false;
        }
        match self.last_published {
            Some(at) => at.elapsed() < self.interval,
            None => false,
        }
    }
}

#[async_trait]
impl<P: Platform> Platform for Throttled<P> {
    async fn setup(&mut self) -> Result<()> {
        self.inner.setup().await
    }

    async fn publish(&mut self, report: &str, status: ReportStatus) -> Result<()> {
        if self.should_skip(report, status) {
            debug!(status = status.as_str(), "publish throttled");
            return Ok(());
        }
        self.inner.publish(report, status).await?;
        self.last_published = Some(Instant::now());
        self.last_report = Some(report.to_string());
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.inner.teardown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recording {
        published: Arc<Mutex<Vec<(String, ReportStatus)>>>,
    }

    #[async_trait]
    impl Platform for Recording {
        async fn setup(&mut self) -> Result<()> {
            Ok(())
        }

        async fn publish(&mut self, report: &str, status: ReportStatus) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((report.to_string(), status));
            Ok(())
        }

        async fn teardown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pending_publishes_are_rate_limited() {
        let recording = Recording::default();
        let log = recording.published.clone();
        let mut platform = Throttled::with_interval(recording, Duration::from_secs(3600));

        platform.publish("r1", ReportStatus::Pending).await.unwrap();
        platform.publish("r2", ReportStatus::Pending).await.unwrap();
        platform.publish("r3", ReportStatus::Pending).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_statuses_always_pass_through() {
        let recording = Recording::default();
        let log = recording.published.clone();
        let mut platform = Throttled::with_interval(recording, Duration::from_secs(3600));

        platform.publish("r1", ReportStatus::Pending).await.unwrap();
        platform.publish("r2", ReportStatus::Success).await.unwrap();

        let published = log.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].1, ReportStatus::Success);
    }

    #[tokio::test]
    async fn identical_reports_are_deduplicated() {
        let recording = Recording::default();
        let log = recording.published.clone();
        let mut platform = Throttled::with_interval(recording, Duration::ZERO);

        platform.publish("same", ReportStatus::Success).await.unwrap();
        platform.publish("same", ReportStatus::Success).await.unwrap();
        platform.publish("other", ReportStatus::Success).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
