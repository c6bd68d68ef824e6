//! A platform that prints reports to the terminal.

use async_trait::async_trait;
use jaypore_core::platform::{Platform, ReportStatus};
use jaypore_core::Result;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePlatform;

impl ConsolePlatform {
    pub fn new() -> Self {
        ConsolePlatform
    }
}

#[async_trait]
impl Platform for ConsolePlatform {
    async fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    async fn publish(&mut self, report: &str, status: ReportStatus) -> Result<()> {
        println!("[{}]\n{report}", status.as_str());
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}
