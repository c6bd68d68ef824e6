//! Gitea platform: publishes the report into a pull request body and sets
//! the commit status dot.

use async_trait::async_trait;
use jaypore_core::platform::{Platform, ReportStatus};
use jaypore_core::repo::{RemoteInfo, Repo};
use jaypore_core::{Error, Result};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const STATUS_CONTEXT: &str = "JayporeCi";
const REPORT_MARKER: &str = "```jayporeci";
const PR_ATTEMPTS: u32 = 5;

pub struct GiteaPlatform {
    client: reqwest::Client,
    root: String,
    api: String,
    owner: String,
    repo: String,
    token: String,
    branch: String,
    sha: String,
    base_branch: String,
    pr_id: Option<u64>,
    last_report: Option<String>,
}

impl GiteaPlatform {
    /// Build a platform from the repo's push remote and the
    /// `JAYPORE_GITEA_TOKEN` environment variable.
    pub fn from_env(repo: &Repo) -> Result<GiteaPlatform> {
        let info = RemoteInfo::parse(&repo.remote)?;
        let token = std::env::var("JAYPORE_GITEA_TOKEN")
            .map_err(|_| Error::Platform("JAYPORE_GITEA_TOKEN is not set".to_string()))?;
        let scheme = if repo.remote.starts_with("http://") {
            "http"
        } else {
            "https"
        };
        let root = format!("{scheme}://{}", info.netloc);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Platform(e.to_string()))?;
        Ok(GiteaPlatform {
            client,
            api: format!("{root}/api/v1"),
            root,
            owner: info.owner,
            repo: info.repo,
            token,
            branch: repo.branch.clone(),
            sha: repo.sha.clone(),
            base_branch: "main".to_string(),
            pr_id: None,
            last_report: None,
        })
    }

    /// Find or create the pull request for the current branch.
    async fn ensure_pr(&mut self) -> Result<u64> {
        if let Some(id) = self.pr_id {
            return Ok(id);
        }
        for _ in 0..PR_ATTEMPTS {
            let response = self
                .client
                .post(format!("{}/repos/{}/{}/pulls", self.api, self.owner, self.repo))
                .query(&[("access_token", &self.token)])
                .json(&json!({
                    "base": self.base_branch,
                    "body": "Pull request created by Jaypore CI",
                    "head": self.branch,
                    "title": self.branch,
                }))
                .send()
                .await
                .map_err(|e| Error::Platform(e.to_string()))?;
            let status = response.status().as_u16();
            debug!(status, "ensure pull request");
            match status {
                // Already exists; the conflict message carries the issue id.
                409 => {
                    let text = response.text().await.map_err(|e| Error::Platform(e.to_string()))?;
                    if let Some(id) = parse_issue_id(&text) {
                        self.pr_id = Some(id);
                        return Ok(id);
                    }
                    return Err(Error::Platform(format!("cannot find issue id in: {text}")));
                }
                // Freshly created; loop once more to read its id.
                201 => continue,
                404 => {
                    let text = response.text().await.map_err(|e| Error::Platform(e.to_string()))?;
                    if text.contains("IsBranchExist") && self.base_branch == "main" {
                        self.base_branch = "develop".to_string();
                        continue;
                    }
                    return Err(Error::Platform(format!("cannot create pull request: {text}")));
                }
                _ => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(Error::Platform(format!(
                        "unexpected response {status} creating pull request: {text}"
                    )));
                }
            }
        }
        Err(Error::Platform("could not locate pull request".to_string()))
    }

    async fn pr_body(&self, pr_id: u64) -> Result<String> {
        let response = self
            .client
            .get(format!(
                "{}/repos/{}/{}/pulls/{pr_id}",
                self.api, self.owner, self.repo
            ))
            .query(&[("access_token", &self.token)])
            .send()
            .await
            .map_err(|e| Error::Platform(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Platform(format!(
                "cannot read pull request: {}",
                response.status()
            )));
        }
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Platform(e.to_string()))?;
        Ok(value["body"].as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl Platform for GiteaPlatform {
    async fn setup(&mut self) -> Result<()> {
        self.ensure_pr().await.map(|_| ())
    }

    async fn publish(&mut self, report: &str, status: ReportStatus) -> Result<()> {
        if self.last_report.as_deref() == Some(report) {
            return Ok(());
        }
        let pr_id = self.ensure_pr().await?;

        let body = self.pr_body(pr_id).await?;
        let new_body = splice_report(&body, report);
        let response = self
            .client
            .patch(format!(
                "{}/repos/{}/{}/pulls/{pr_id}",
                self.api, self.owner, self.repo
            ))
            .query(&[("access_token", &self.token)])
            .json(&json!({ "body": new_body }))
            .send()
            .await
            .map_err(|e| Error::Platform(e.to_string()))?;
        debug!(status = response.status().as_u16(), "published report");

        let response = self
            .client
            .post(format!(
                "{}/repos/{}/{}/statuses/{}",
                self.api, self.owner, self.repo, self.sha
            ))
            .query(&[("access_token", &self.token)])
            .json(&json!({
                "context": STATUS_CONTEXT,
                "description": format!("Pipeline status is: {}", status.as_str()),
                "state": status.as_str(),
                "target_url": format!("{}/{}/{}/pulls/{pr_id}", self.root, self.owner, self.repo),
            }))
            .send()
            .await
            .map_err(|e| Error::Platform(e.to_string()))?;
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "commit status not accepted");
        }

        self.last_report = Some(report.to_string());
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pull the issue id out of Gitea's 409 conflict message
/// (`... issue_id: 42, ...`).
fn parse_issue_id(text: &str) -> Option<u64> {
    let (_, rest) = text.split_once("issue_id:")?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Keep whatever the PR author wrote above the report marker and append the
/// fresh report below it.
fn splice_report(body: &str, report: &str) -> String {
    let mut prefix: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.contains(REPORT_MARKER) {
            prefix.pop();
            break;
        }
        prefix.push(line);
    }
    while prefix.last().is_some_and(|l| l.trim().is_empty()) {
        prefix.pop();
    }
    prefix.push("");
    format!("{}\n{report}", prefix.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_id_is_parsed_from_conflict_text() {
        assert_eq!(parse_issue_id("pull request exists, issue_id: 42, head:x"), Some(42));
        assert_eq!(parse_issue_id("issue_id: 7"), Some(7));
        assert_eq!(parse_issue_id("no id here"), None);
    }

    #[test]
    fn splice_keeps_the_user_prefix() {
        let body = "My description\n\n```jayporeci\nold report\n```";
        let spliced = splice_report(body, "```jayporeci\nnew report\n```");
        assert!(spliced.starts_with("My description\n"));
        assert!(spliced.contains("new report"));
        assert!(!spliced.contains("old report"));
    }

    #[test]
    fn splice_on_a_body_without_report() {
        let spliced = splice_report("Just a description", "REPORT");
        assert_eq!(spliced, "Just a description\n\nREPORT");
    }

    #[test]
    fn splice_on_an_empty_body() {
        let spliced = splice_report("", "REPORT");
        assert_eq!(spliced, "\nREPORT");
    }
}
