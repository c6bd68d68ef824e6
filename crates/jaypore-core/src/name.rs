//! Run identity and artefact naming.
//!
//! Every container and network created by Jaypore CI carries a name of the
//! form `jayporeci__<kind>__<sha>[__<job>]`. The scheme is total and
//! injective for sanitised inputs, which lets the executor recognise its own
//! artefacts on a shared host and partition them by run.

use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix that marks an artefact as belonging to Jaypore CI.
pub const PREFIX: &str = "jayporeci";

/// Default host directory under which per-run workspaces are created.
pub const DEFAULT_WORKSPACE_ROOT: &str = "/tmp";

/// Path at which the shared workspace is mounted inside job containers.
pub const WORKSPACE_MOUNT: &str = "/jayporeci/run";

const SEP: &str = "__";

/// The kind of artefact a [`Name`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// The per-run bridge network.
    Net,
    /// A per-job container.
    Job,
    /// The per-run outer container.
    Pipe,
}

impl NameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameKind::Net => "net",
            NameKind::Job => "job",
            NameKind::Pipe => "pipe",
        }
    }

    fn parse(kind: &str) -> Option<NameKind> {
        match kind {
            "net" => Some(NameKind::Net),
            "job" => Some(NameKind::Job),
            "pipe" => Some(NameKind::Pipe),
            _ => None,
        }
    }
}

/// A parsed or constructed artefact name.
///
/// `Name::parse(name.to_string())` round-trips for every constructed name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    kind: NameKind,
    sha: String,
    job_name: Option<String>,
}

impl Name {
    /// Name of the per-run network.
    pub fn net(sha: impl Into<String>) -> Name {
        Name {
            kind: NameKind::Net,
            sha: sha.into(),
            job_name: None,
        }
    }

    /// Name of a job container. The job name is sanitised so the result
    /// always parses back to the same parts.
    pub fn job(sha: impl Into<String>, job_name: &str) -> Name {
        Name {
            kind: NameKind::Job,
            sha: sha.into(),
            job_name: Some(sanitize(job_name)),
        }
    }

    /// Name of the per-run outer container.
    pub fn pipe(sha: impl Into<String>) -> Name {
        Name {
            kind: NameKind::Pipe,
            sha: sha.into(),
            job_name: None,
        }
    }

    /// Parse a raw container or network name. Returns `None` for anything
    /// that does not belong to Jaypore CI.
    pub fn parse(raw: &str) -> Option<Name> {
        let mut parts = raw.split(SEP);
        if parts.next() != Some(PREFIX) {
            return None;
        }
        let kind = NameKind::parse(parts.next()?)?;
        let sha = parts.next()?.to_string();
        if sha.is_empty() {
            return None;
        }
        let job_name = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return None;
        }
        match (kind, &job_name) {
            (NameKind::Job, Some(_)) => Some(Name { kind, sha, job_name }),
            (NameKind::Net | NameKind::Pipe, None) => Some(Name { kind, sha, job_name }),
            _ => None,
        }
    }

    /// The sibling artefact of a different kind for the same run.
    pub fn related(&self, kind: NameKind) -> Name {
        match kind {
            NameKind::Net => Name::net(self.sha.clone()),
            NameKind::Pipe => Name::pipe(self.sha.clone()),
            NameKind::Job => Name {
                kind: NameKind::Job,
                sha: self.sha.clone(),
                job_name: self.job_name.clone(),
            },
        }
    }

    pub fn kind(&self) -> NameKind {
        self.kind
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}{}", PREFIX, SEP, self.kind.as_str(), SEP, self.sha)?;
        if let Some(job) = &self.job_name {
            write!(f, "{}{}", SEP, job)?;
        }
        Ok(())
    }
}

/// Collapse every non-alphanumeric character in a user-provided name to `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Host directory holding the shared workspace for a run.
pub fn workspace_dir(root: &Path, sha: &str) -> PathBuf {
    root.join(format!("{PREFIX}{SEP}src{SEP}{sha}"))
}
