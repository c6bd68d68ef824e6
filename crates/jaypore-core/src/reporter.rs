//! Reporter trait: pipeline state to text, no side effects.

use chrono::{DateTime, Utc};

use crate::pipeline::Pipeline;

/// Renders a snapshot of a pipeline into a textual report. Pure: the
/// current time is passed in so running-job durations stay deterministic
/// under test.
pub trait Reporter: Send + Sync {
    fn render(&self, pipeline: &Pipeline, now: DateTime<Utc>) -> String;
}
