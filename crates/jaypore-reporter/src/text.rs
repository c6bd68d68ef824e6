//! Plaintext box-drawing report.

use chrono::{DateTime, Utc};
use jaypore_core::pipeline::{Job, Pipeline};
use jaypore_core::reporter::Reporter;

const TITLE: &str = "JayporeCI";

/// Renders one block per stage with a status symbol, short run id and
/// duration per job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextReporter;

impl TextReporter {
    pub fn new() -> Self {
        TextReporter
    }
}

impl Reporter for TextReporter {
    fn render(&self, pipeline: &Pipeline, now: DateTime<Utc>) -> String {
        let max_name = pipeline
            .jobs()
            .map(|j| j.name.len())
            .chain([TITLE.len()])
            .max()
            .unwrap_or(TITLE.len());

        let mut lines = vec![
            String::new(),
            "```jayporeci".to_string(),
            format!(
                "╔ {} : {:<width$} [sha {}]",
                pipeline.status().symbol(),
                TITLE,
                pipeline.repo.short_sha(),
                width = max_name
            ),
        ];
        let closer = format!("┗{}┛", "━".repeat(5 + max_name + 12 + 8));

        for stage in &pipeline.stages {
            if stage.jobs.is_empty() {
                continue;
            }
            lines.push(format!("┏━ {}", stage.name));
            lines.push("┃".to_string());
            for job in &stage.jobs {
                let run_id = job
                    .state
                    .run_id
                    .as_deref()
                    .map(|id| &id[..id.len().min(8)])
                    .unwrap_or("");
                let mut line = format!(
                    "┃ {} : {:<width$} [{:<8}] {}",
                    job.state.status.symbol(),
                    job.name,
                    run_id,
                    duration(job, now),
                    width = max_name
                );
                let parents = stage.parents_of(&job.name);
                if !parents.is_empty() {
                    line.push_str(&format!(" ❮-- {}", parents.join(", ")));
                }
                lines.push(line);
            }
            lines.push(closer.clone());
        }
        lines.push("```".to_string());
        lines.join("\n")
    }
}

/// `finished − started` once done, `now − started` while running, and a
/// blank marker before the job ever started.
fn duration(job: &Job, now: DateTime<Utc>) -> String {
    let elapsed = match (job.state.started_at, job.state.finished_at) {
        (Some(start), Some(end)) => (end - start).num_seconds().max(0),
        (Some(start), None) => (now - start).num_seconds().max(0),
        _ => return " --:--".to_string(),
    };
    format!("{:>3}:{:02}", elapsed / 60, elapsed % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jaypore_core::pipeline::{JobOptions, PipelineConfig, Status};
    use jaypore_core::repo::Repo;
    use std::collections::HashMap;

    fn sample_pipeline() -> Pipeline {
        let mut p = Pipeline::new(Repo::fake("a1b2c3d4e5f678"), PipelineConfig::default());
        p.add_stage("Testing", HashMap::new()).unwrap();
        p.add_job("lint", Some("ok"), JobOptions::new()).unwrap();
        p.add_job("test", Some("ok"), JobOptions::new().after(["lint"]))
            .unwrap();
        p
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn report_lists_stages_jobs_and_sha() {
        let p = sample_pipeline();
        let report = TextReporter::new().render(&p, at(0));
        assert!(report.contains("┏━ Testing"));
        assert!(report.contains("lint"));
        assert!(report.contains("sha a1b2c3d4e5"));
        assert!(report.contains("```jayporeci"));
    }

    #[test]
    fn dependencies_are_marked_on_the_job_line() {
        let p = sample_pipeline();
        let report = TextReporter::new().render(&p, at(0));
        let test_line = report.lines().find(|l| l.contains("test")).unwrap();
        assert!(test_line.contains("❮-- lint"));
    }

    #[test]
    fn durations_cover_the_three_cases() {
        let mut p = sample_pipeline();
        {
            let job = p.stages[0].job_mut("lint").unwrap();
            job.state.status = Status::Passed;
            job.state.started_at = Some(at(0));
            job.state.finished_at = Some(at(83));
            job.state.run_id = Some("abcdef0123456789".to_string());
        }
        {
            let job = p.stages[0].job_mut("test").unwrap();
            job.state.status = Status::Running;
            job.state.started_at = Some(at(60));
        }
        let report = TextReporter::new().render(&p, at(90));
        let lint_line = report.lines().find(|l| l.contains("lint")).unwrap();
        assert!(lint_line.contains("1:23"), "finished duration: {lint_line}");
        assert!(lint_line.contains("abcdef01"), "short run id: {lint_line}");
        let test_line = report.lines().find(|l| l.contains("test")).unwrap();
        assert!(test_line.contains("0:30"), "running duration: {test_line}");
    }

    #[test]
    fn unstarted_jobs_show_a_blank_duration() {
        let p = sample_pipeline();
        let report = TextReporter::new().render(&p, at(0));
        assert!(report.contains("--:--"));
    }
}
