use serde::{Deserialize, Serialize};

/// Classified failure kinds, as they appear in plans, state files and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed configuration.
    Config,
    /// Production/peer cycle in the dependency graph.
    GraphCycle,
    /// Topological sort could not proceed.
    Sort,
    /// One or more pre-flight checks failed.
    Preflight,
    Build,
    Publish,
    RegistryTimeout,
    Install,
    Git,
    Manifest,
    /// Caller-initiated abort.
    Cancelled,
    /// Persisted state did not match the current package set; recoverable.
    ResumeMismatch,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::GraphCycle => "graph_cycle",
            ErrorKind::Sort => "sort",
            ErrorKind::Preflight => "preflight",
            ErrorKind::Build => "build",
            ErrorKind::Publish => "publish",
            ErrorKind::RegistryTimeout => "registry_timeout",
            ErrorKind::Install => "install",
            ErrorKind::Git => "git",
            ErrorKind::Manifest => "manifest",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ResumeMismatch => "resume_mismatch",
        }
    }
}

/// A classified per-package step failure. Caught at the orchestrator boundary
/// and turned into a `failed` entry; never unwinds past it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", kind.as_str())]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an arbitrary capability error, preserving its context chain.
    pub fn wrap(kind: ErrorKind, err: &anyhow::Error) -> Self {
        Self {
            kind,
            message: format!("{err:#}"),
        }
    }
}

/// Whether registry client output describes an ETARGET-style "no matching
/// version" response. The registry monitor treats this as "not yet
/// available", and the orchestrator answers the next install with a
/// best-effort cache clean.
pub fn is_etarget(haystack: &str) -> bool {
    let hay = haystack.to_lowercase();
    hay.contains("etarget") || hay.contains("no matching version")
}

/// Whether registry client output describes a transient condition worth
/// retrying rather than a hard failure.
pub fn is_transient_registry_failure(haystack: &str) -> bool {
    let hay = haystack.to_lowercase();

    let transient_patterns = [
        "too many requests",
        "429",
        "timeout",
        "timed out",
        "econnreset",
        "econnrefused",
        "eai_again",
        "socket hang up",
        "network",
        "temporarily unavailable",
        "502",
        "503",
        "504",
    ];

    transient_patterns.iter().any(|p| hay.contains(p))
}
