//! Configuration file support (`convoy.toml`).
//!
//! The configuration declares the sibling repositories that make up a release
//! wave, plus the runtime defaults the CLI can override per invocation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::types::{
    MonitorOptions, PreflightOptions, PublishOptions, RangeStrategy, deserialize_duration,
    serialize_duration,
};

/// One sibling repository declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Canonical repository URL; also the source of the default directory name.
    pub url: String,
    /// Local directory under `repos_dir`, when it differs from the URL tail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Branch publishes must run from; falls back to `default_branch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl RepoConfig {
    /// The directory name this repo is expected under: the explicit `dir`
    /// override, or the last path segment of the URL with any `.git` suffix
    /// stripped.
    pub fn dir_name(&self) -> String {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        let tail = self
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(self.url.as_str());
        tail.trim_end_matches(".git").to_string()
    }
}

/// Nested publish defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default)]
    pub range_strategy: RangeStrategy,

    #[serde(default)]
    pub wildcard_strategy: RangeStrategy,

    #[serde(default)]
    pub skip_build: bool,

    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_capability_timeout")]
    pub build_timeout: Duration,

    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_capability_timeout")]
    pub publish_timeout: Duration,

    /// Resolved against the project root when relative.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            range_strategy: RangeStrategy::default(),
            wildcard_strategy: RangeStrategy::default(),
            skip_build: false,
            build_timeout: default_capability_timeout(),
            publish_timeout: default_capability_timeout(),
            state_dir: default_state_dir(),
        }
    }
}

/// Nested pre-flight defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    #[serde(default = "default_true")]
    pub check_build: bool,
    #[serde(default = "default_true")]
    pub sample_remote: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            check_build: true,
            sample_remote: true,
        }
    }
}

fn default_capability_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".convoy")
}

fn default_true() -> bool {
    true
}

fn default_registry_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    repos_dir: Option<PathBuf>,
    #[serde(default = "default_registry_url")]
    registry_url: String,
    #[serde(default = "default_branch")]
    default_branch: String,
    #[serde(default)]
    repos: Vec<RepoConfig>,
    #[serde(default)]
    monitor: MonitorOptions,
    #[serde(default)]
    publish: PublishConfig,
    #[serde(default)]
    preflight: PreflightConfig,
}

/// A loaded configuration, with every path resolved.
#[derive(Debug, Clone)]
pub struct Config {
    /// The configuration file itself.
    pub path: PathBuf,
    /// The directory the configuration file lives in (the "project").
    pub project_dir: PathBuf,
    /// Where sibling repositories are located; defaults to the project's
    /// parent directory.
    pub repos_dir: PathBuf,
    pub registry_url: String,
    pub default_branch: String,
    pub repos: Vec<RepoConfig>,
    pub monitor: MonitorOptions,
    pub publish: PublishConfig,
    pub preflight: PreflightConfig,
}

impl Config {
    /// The branch a given repo publishes from.
    pub fn branch_for<'a>(&'a self, repo: &'a RepoConfig) -> &'a str {
        repo.branch.as_deref().unwrap_or(&self.default_branch)
    }

    /// Publish options seeded from the file's `[publish]`/`[monitor]`
    /// sections; CLI flags layer on top of this.
    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            continue_on_error: self.publish.continue_on_error,
            range_strategy: self.publish.range_strategy,
            wildcard_strategy: self.publish.wildcard_strategy,
            skip_build: self.publish.skip_build,
            build_timeout: self.publish.build_timeout,
            publish_timeout: self.publish.publish_timeout,
            state_dir: self.publish.state_dir.clone(),
            monitor: self.monitor.clone(),
            preflight: PreflightOptions {
                check_build: self.preflight.check_build && !self.publish.skip_build,
                sample_remote: self.preflight.sample_remote,
                build_timeout: self.publish.build_timeout,
            },
            ..PublishOptions::default()
        }
    }
}

/// Load and validate `convoy.toml`. A missing or malformed file is an error;
/// there is no implicit empty configuration.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        bail!("configuration file not found: {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("malformed configuration file {}", path.display()))?;

    if file.repos.is_empty() {
        bail!(
            "configuration file {} declares no repositories",
            path.display()
        );
    }

    let project_dir = path
        .parent()
        .map(Path::to_path_buf)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));

    let repos_dir = match file.repos_dir {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => project_dir.join(dir),
        // Default: the directory holding the configuration file.
        None => project_dir.clone(),
    };

    Ok(Config {
        path: path.to_path_buf(),
        project_dir,
        repos_dir,
        registry_url: file.registry_url,
        default_branch: file.default_branch,
        repos: file.repos,
        monitor: file.monitor,
        publish: file.publish,
        preflight: file.preflight,
    })
}
