use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use convoy_ranges::{BumpKind, RangeStrategy};

use crate::error::ErrorKind;

/// Duration fields accept either a humantime string (`"30s"`) or a bare
/// millisecond count, and always serialize back as milliseconds.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// How a dependency is declared in a manifest.
///
/// Production and peer dependencies participate in the publishing order and
/// propagate breaking changes; development dependencies do neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Production,
    Peer,
    Development,
}

impl DependencyType {
    pub fn participates_in_publishing(self) -> bool {
        !matches!(self, DependencyType::Development)
    }

    /// The manifest table this dependency type lives in.
    pub fn manifest_table(self) -> &'static str {
        match self {
            DependencyType::Production => "dependencies",
            DependencyType::Development => "devDependencies",
            DependencyType::Peer => "peerDependencies",
        }
    }
}

/// A declared dependency: range text plus the table it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub range: String,
    pub kind: DependencyType,
}

/// A sibling package loaded from a repository manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: Version,
    /// False when the manifest is marked private; private packages stay in
    /// the graph and the order but are never handed to the registry.
    pub publishable: bool,
    /// Every declared dependency, sibling or not, keyed by name.
    pub dependencies: BTreeMap<String, DependencySpec>,
    pub repo_dir: PathBuf,
}

/// Why a package's version changes in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// The package had explicit changesets.
    Explicit,
    /// No changesets of its own; a changeset will be generated because its
    /// dependencies changed.
    Auto,
    /// Had explicit changesets, but dependency updates demanded a larger
    /// bump than they declared.
    Escalated {
        existing_bump: BumpKind,
        required_bump: BumpKind,
    },
}

/// One package's planned version transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub from: Version,
    pub to: Version,
    pub bump_type: BumpKind,
    pub breaking: bool,
    #[serde(flatten)]
    pub origin: ChangeOrigin,
}

impl VersionChange {
    pub fn has_changesets(&self) -> bool {
        matches!(
            self.origin,
            ChangeOrigin::Explicit | ChangeOrigin::Escalated { .. }
        )
    }

    pub fn will_generate_changeset(&self) -> bool {
        matches!(self.origin, ChangeOrigin::Auto)
    }

    pub fn needs_bump_escalation(&self) -> bool {
        matches!(self.origin, ChangeOrigin::Escalated { .. })
    }
}

/// One rewrite of a dependent's declared range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyUpdate {
    pub dependency: String,
    pub new_version: Version,
    pub kind: DependencyType,
    /// True for production and peer dependencies: the dependent must itself
    /// be republished after this rewrite.
    pub causes_republish: bool,
}

/// A planner-level diagnostic that blocks execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanError {
    pub kind: ErrorKind,
    pub message: String,
}

/// The planner's output: everything the orchestrator needs to execute a wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishingPlan {
    /// Deterministic publication sequence (prod/peer topological order,
    /// lexicographic tie-breaking).
    pub publishing_order: Vec<String>,
    pub version_changes: BTreeMap<String, VersionChange>,
    /// Keyed by dependent; rows ordered by dependency name.
    pub dependency_updates: BTreeMap<String, Vec<DependencyUpdate>>,
    /// Breaking package -> direct prod/peer dependents forced to republish.
    pub breaking_cascades: BTreeMap<String, Vec<String>>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    pub errors: Vec<PlanError>,
}

impl PublishingPlan {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Dependents that carry an update row for `dependency`.
    pub fn dependents_to_update(&self, dependency: &str) -> Vec<&str> {
        self.dependency_updates
            .iter()
            .filter(|(_, rows)| rows.iter().any(|r| r.dependency == dependency))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A package successfully processed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPackage {
    pub name: String,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

/// A package the orchestrator gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPackage {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable orchestrator state, flushed after every per-package transition.
///
/// `completed`, `failed`, `remaining` and `current` partition the initial
/// package set at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishingState {
    pub state_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
    pub completed: Vec<CompletedPackage>,
    pub failed: Vec<FailedPackage>,
    pub remaining: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

impl PublishingState {
    /// Every package name this state knows about, across all four partitions.
    pub fn universe(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = BTreeSet::new();
        set.extend(self.completed.iter().map(|c| c.name.clone()));
        set.extend(self.failed.iter().map(|f| f.name.clone()));
        set.extend(self.remaining.iter().cloned());
        if let Some(current) = &self.current {
            set.insert(current.clone());
        }
        set
    }
}

/// A package the orchestrator deliberately did not publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPackage {
    pub name: String,
    pub reason: String,
}

/// Global and per-repo pre-flight assessment. `ok` iff `errors` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub repos_with_changesets: Vec<String>,
    pub repos_without_changesets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_identity: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Final outcome of a publish run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingResult {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub preflight: PreflightReport,
    pub published: Vec<CompletedPackage>,
    pub failed: Vec<FailedPackage>,
    pub skipped: Vec<SkippedPackage>,
    pub warnings: Vec<String>,
}

impl PublishingResult {
    pub fn ok(&self) -> bool {
        self.preflight.ok && self.failed.is_empty()
    }
}

/// Summary row for the `analyze` entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSummary {
    pub name: String,
    pub version: Version,
    pub publishable: bool,
    pub has_changesets: bool,
    pub dependency_count: usize,
    pub dependent_count: usize,
}

/// Output of the `analyze` entry point: the graph plus its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceAnalysis {
    pub packages: Vec<PackageSummary>,
    /// Configured repositories that could not be found on disk.
    pub unresolved: Vec<String>,
    /// Empty when the prod/peer subgraph is cyclic.
    pub publishing_order: Vec<String>,
    pub production_cycles: Vec<Vec<String>>,
    pub development_cycles: Vec<Vec<String>>,
    pub warnings: Vec<String>,
    pub errors: Vec<PlanError>,
}

/// Registry propagation polling knobs (§4.7 defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorOptions {
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub initial_delay: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_delay: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(300),
            max_attempts: 30,
        }
    }
}

/// Cooperative cancellation flag, checked between suspension points.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// All runtime knobs for a publish run, with explicit defaults.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Skip every side-effecting capability call and report the plan as if
    /// executed.
    pub dry_run: bool,
    /// Require an existing state file and continue from it.
    pub resume: bool,
    /// Keep publishing the rest of the queue after a package fails.
    pub continue_on_error: bool,
    /// Prefix applied where the existing range carries none.
    pub range_strategy: RangeStrategy,
    /// Prefix used when pinning a wildcard range.
    pub wildcard_strategy: RangeStrategy,
    pub skip_build: bool,
    pub build_timeout: Duration,
    pub publish_timeout: Duration,
    /// State directory, resolved against the project root when relative.
    pub state_dir: PathBuf,
    pub monitor: MonitorOptions,
    pub preflight: PreflightOptions,
    pub cancel: CancelToken,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            resume: false,
            continue_on_error: false,
            range_strategy: RangeStrategy::Caret,
            wildcard_strategy: RangeStrategy::Caret,
            skip_build: false,
            build_timeout: Duration::from_secs(600),
            publish_timeout: Duration::from_secs(600),
            state_dir: PathBuf::from(".convoy"),
            monitor: MonitorOptions::default(),
            preflight: PreflightOptions::default(),
            cancel: CancelToken::new(),
        }
    }
}

/// Pre-flight knobs.
#[derive(Debug, Clone)]
pub struct PreflightOptions {
    /// Run the build capability per repo before anything is published.
    pub check_build: bool,
    /// Probe one repo's git remote for reachability.
    pub sample_remote: bool,
    pub build_timeout: Duration,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            check_build: true,
            sample_remote: true,
            build_timeout: Duration::from_secs(600),
        }
    }
}
