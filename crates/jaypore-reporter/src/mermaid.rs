//! Mermaid graph report, suitable for markdown surfaces that render it.

use chrono::{DateTime, Utc};
use jaypore_core::pipeline::Pipeline;
use jaypore_core::reporter::Reporter;
use std::collections::HashMap;

const CLASS_DEFS: &str = "\
        classDef pending fill:#aaa, color:black, stroke:black,stroke-width:2px,stroke-dasharray: 5 5;
        classDef skipped fill:#aaa, color:black, stroke:black,stroke-width:2px;
        classDef running fill:#bae1ff,color:black,stroke:black,stroke-width:2px,stroke-dasharray: 5 5;
        classDef passed fill:#88d8b0, color:black, stroke:black;
        classDef failed fill:#ff6f69, color:black, stroke:black;
        classDef timeout fill:#ffda9e, color:black, stroke:black;";

/// Renders one `graph` block per stage, nodes styled by job status.
#[derive(Debug, Clone)]
pub struct MermaidReporter {
    /// `TB` or `LR`.
    pub direction: &'static str,
}

impl Default for MermaidReporter {
    fn default() -> Self {
        MermaidReporter { direction: "TB" }
    }
}

impl MermaidReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for MermaidReporter {
    fn render(&self, pipeline: &Pipeline, _now: DateTime<Utc>) -> String {
        let mut out = String::new();
        for stage in &pipeline.stages {
            if stage.jobs.is_empty() {
                continue;
            }
            out.push_str(&format!("\n```mermaid\ngraph {}\n", self.direction));
            let refs: HashMap<&str, String> = stage
                .jobs
                .iter()
                .enumerate()
                .map(|(i, j)| (j.name.as_str(), format!("N{i}")))
                .collect();
            for job in &stage.jobs {
                out.push_str(&format!(
                    "        {}({}):::{}\n",
                    refs[job.name.as_str()],
                    job.name,
                    job.state.status.label()
                ));
            }
            for edge in &stage.edges {
                out.push_str(&format!(
                    "        {} --> {}\n",
                    refs[edge.from.as_str()], refs[edge.to.as_str()]
                ));
            }
            out.push_str(CLASS_DEFS);
            out.push_str("\n```\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jaypore_core::pipeline::{JobOptions, PipelineConfig, Status};
    use jaypore_core::repo::Repo;

    #[test]
    fn renders_nodes_edges_and_classes() {
        let mut p = Pipeline::new(Repo::fake("sha"), PipelineConfig::default());
        p.add_job("a", Some("ok"), JobOptions::new()).unwrap();
        p.add_job("b", Some("ok"), JobOptions::new().after(["a"]))
            .unwrap();
        p.stages[0].job_mut("a").unwrap().state.status = Status::Passed;

        let out = MermaidReporter::new().render(&p, Utc::now());
        assert!(out.contains("graph TB"));
        assert!(out.contains("N0(a):::passed"));
        assert!(out.contains("N1(b):::pending"));
        assert!(out.contains("N0 --> N1"));
        assert!(out.contains("classDef failed"));
    }

    #[test]
    fn one_graph_block_per_stage() {
        let mut p = Pipeline::new(Repo::fake("sha"), PipelineConfig::default());
        p.add_stage("s1", Default::default()).unwrap();
        p.add_job("a", Some("ok"), JobOptions::new()).unwrap();
        p.add_stage("s2", Default::default()).unwrap();
        p.add_job("b", Some("ok"), JobOptions::new()).unwrap();

        let out = MermaidReporter::new().render(&p, Utc::now());
        assert_eq!(out.matches("```mermaid").count(), 2);
    }
}
