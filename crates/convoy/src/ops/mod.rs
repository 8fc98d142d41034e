//! Capability interfaces.
//!
//! Git, registry and build operations are abstract traits passed into the
//! pre-flight, updater and orchestrator; tests substitute in-memory
//! implementations, production uses the subprocess-backed ones below.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use semver::Version;

mod git;
mod process;
mod registry;

pub use git::SystemGit;
pub use registry::NpmRegistry;

pub(crate) use process::{CommandOutput, run_command_with_timeout};

/// Git operations against one repository working tree. The orchestrator owns
/// a repository exclusively for the duration of a step; implementations may
/// assume calls for a given repo never interleave.
pub trait GitOps {
    fn current_branch(&self, repo: &Path) -> Result<String>;
    fn head_commit(&self, repo: &Path) -> Result<String>;
    fn is_clean(&self, repo: &Path) -> Result<bool>;
    fn changed_files(&self, repo: &Path) -> Result<Vec<String>>;
    fn checkout(&self, repo: &Path, branch: &str) -> Result<()>;
    fn add(&self, repo: &Path, paths: &[&Path]) -> Result<()>;
    fn commit(&self, repo: &Path, message: &str) -> Result<()>;
    fn tag(&self, repo: &Path, tag: &str) -> Result<()>;
    fn push_tag(&self, repo: &Path, tag: &str) -> Result<()>;
    /// Whether the repo's default remote answers; used by pre-flight on one
    /// sampled repository.
    fn remote_reachable(&self, repo: &Path) -> Result<bool>;
}

/// Package registry operations. Authentication is the implementation's
/// concern; the core only asks for an identity.
pub trait RegistryOps {
    fn publish(&self, package_dir: &Path, timeout: Duration) -> Result<()>;
    /// Whether `name@version` is visible. ETARGET-style "no matching
    /// version" responses and stale caches read as `false`, not as errors.
    fn is_available(&self, name: &str, version: &Version) -> Result<bool>;
    /// The authenticated identity, when credentials are valid.
    fn check_auth(&self) -> Result<Option<String>>;
    fn check_reachable(&self) -> Result<()>;
    fn install(&self, repo_dir: &Path, timeout: Duration) -> Result<()>;
    fn cache_clean(&self) -> Result<()>;
}

/// Build capability, used by pre-flight (fail fast) and before each publish.
pub trait BuildOps {
    fn build(&self, repo_dir: &Path, timeout: Duration) -> Result<()>;
}

/// Subprocess-backed build: runs the repository's build script through the
/// package manager.
#[derive(Debug, Clone)]
pub struct CommandBuild {
    program: String,
}

impl CommandBuild {
    pub fn new() -> Self {
        Self {
            program: std::env::var("CONVOY_NPM_BIN").unwrap_or_else(|_| "npm".to_string()),
        }
    }

    /// Use an explicit program instead of the environment lookup.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandBuild {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildOps for CommandBuild {
    fn build(&self, repo_dir: &Path, timeout: Duration) -> Result<()> {
        let out = run_command_with_timeout(
            &self.program,
            &["run", "build", "--if-present"],
            repo_dir,
            Some(timeout),
        )?;
        if out.exit_code != 0 {
            anyhow::bail!(
                "build failed in {} (exit={}): {}",
                repo_dir.display(),
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(())
    }
}
