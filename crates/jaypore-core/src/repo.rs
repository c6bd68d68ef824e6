//! Repository introspection.
//!
//! Reads run identity out of the working copy by shelling out to git. These
//! calls happen once, at setup; failures are setup errors and are not
//! retried.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use url::Url;

use crate::{Error, Result};

/// Information about the current VCS checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub sha: String,
    pub branch: String,
    /// URL of the push remote.
    pub remote: String,
    pub commit_message: String,
}

impl Repo {
    /// Read commit hash, branch, push remote and commit message from the
    /// working copy at `dir`.
    pub fn from_path(dir: &Path) -> Result<Repo> {
        let sha = run_git(dir, &["rev-parse", "HEAD"])?;
        let branch = run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let remote_name = run_git(dir, &["remote"])?
            .lines()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::Fatal("repository has no remote".to_string()))?;
        let remote = run_git(dir, &["remote", "get-url", "--push", &remote_name])?;
        let commit_message = run_git(dir, &["log", "-1", "--pretty=%B"])?;
        Ok(Repo {
            sha,
            branch,
            remote,
            commit_message,
        })
    }

    /// Like [`Repo::from_path`], anchored at `REPO_ROOT` when set and the
    /// current directory otherwise. `REPO_SHA` overrides the detected sha.
    pub fn from_env() -> Result<Repo> {
        let root = std::env::var("REPO_ROOT").unwrap_or_else(|_| ".".to_string());
        let mut repo = Repo::from_path(Path::new(&root))?;
        if let Ok(sha) = std::env::var("REPO_SHA") {
            repo.sha = sha;
        }
        Ok(repo)
    }

    /// Paths that changed between `target` and the current sha.
    pub fn files_changed(&self, target: &str) -> Result<Vec<String>> {
        let out = run_git(
            Path::new("."),
            &["diff", "--name-only", target, &self.sha],
        )?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(10)]
    }

    /// A repo handle with made-up values, for tests.
    pub fn fake(sha: impl Into<String>) -> Repo {
        Repo {
            sha: sha.into(),
            branch: "main".to_string(),
            remote: "https://git.example.com/owner/project.git".to_string(),
            commit_message: "test commit".to_string(),
        }
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Fatal(format!("could not run git: {e}")))?;
    if !out.status.success() {
        return Err(Error::Fatal(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Pieces of a git remote URL that platforms care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    pub netloc: String,
    pub owner: String,
    pub repo: String,
}

impl RemoteInfo {
    /// Decompose a remote URL. Handles scp-like ssh remotes
    /// (`git@host:owner/repo.git`) as well as ssh:// and http(s):// forms.
    pub fn parse(remote: &str) -> Result<RemoteInfo> {
        let bad = |why: &str| Error::Config(format!("cannot parse remote '{remote}': {why}"));

        if !remote.contains("://") && remote.contains('@') {
            let (_, rest) = remote.split_once('@').ok_or_else(|| bad("missing @"))?;
            let (netloc, path) = rest.split_once(':').ok_or_else(|| bad("missing :"))?;
            let (owner, repo) = path
                .trim_matches('/')
                .split_once('/')
                .ok_or_else(|| bad("missing owner/repo"))?;
            return Ok(RemoteInfo {
                netloc: netloc.to_string(),
                owner: owner.to_string(),
                repo: repo.trim_end_matches(".git").to_string(),
            });
        }

        let url = Url::parse(remote).map_err(|e| bad(&e.to_string()))?;
        let netloc = url.host_str().ok_or_else(|| bad("missing host"))?.to_string();
        let mut segments = url
            .path_segments()
            .ok_or_else(|| bad("missing path"))?
            .filter(|s| !s.is_empty());
        let owner = segments.next().ok_or_else(|| bad("missing owner"))?;
        let repo = segments.next().ok_or_else(|| bad("missing repo"))?;
        Ok(RemoteInfo {
            netloc,
            owner: owner.to_string(),
            repo: repo.trim_end_matches(".git").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_remotes() {
        let info = RemoteInfo::parse("https://gitea.example.com/midpath/jaypore_ci.git").unwrap();
        assert_eq!(info.netloc, "gitea.example.com");
        assert_eq!(info.owner, "midpath");
        assert_eq!(info.repo, "jaypore_ci");
    }

    #[test]
    fn parses_scp_like_ssh_remotes() {
        let info = RemoteInfo::parse("git@gitea.example.com:arjoonn/jaypore_ci.git").unwrap();
        assert_eq!(info.netloc, "gitea.example.com");
        assert_eq!(info.owner, "arjoonn");
        assert_eq!(info.repo, "jaypore_ci");
    }

    #[test]
    fn parses_ssh_scheme_remotes() {
        let info = RemoteInfo::parse("ssh://git@gitea.example.com/owner/repo.git").unwrap();
        assert_eq!(info.netloc, "gitea.example.com");
        assert_eq!(info.owner, "owner");
        assert_eq!(info.repo, "repo");
    }

    #[test]
    fn rejects_unparseable_remotes() {
        assert!(RemoteInfo::parse("not a remote").is_err());
        assert!(RemoteInfo::parse("https://example.com/").is_err());
    }

    #[test]
    fn short_sha_is_ten_chars() {
        let repo = Repo::fake("0123456789abcdef");
        assert_eq!(repo.short_sha(), "0123456789");
        let tiny = Repo::fake("abc");
        assert_eq!(tiny.short_sha(), "abc");
    }
}
