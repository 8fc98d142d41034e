//! The dependency updater: rewriting a dependent's manifest after its
//! dependencies were published.
//!
//! Range prefixes are preserved per table (`^` stays `^`, `~` stays `~`,
//! `>=` stays `>=`); wildcards are pinned using the configured strategy. When
//! the dependent will republish without changesets of its own, a changeset
//! record describing the updates is synthesized next to the manifest. Staging
//! and committing the touched files is the only git mutation this module
//! performs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use convoy_ranges::rewritten_range;
use semver::Version;

use crate::changeset;
use crate::error::{ErrorKind, StepError};
use crate::manifest::{MANIFEST_FILE, Manifest, TABLE_ORDER};
use crate::ops::GitOps;
use crate::types::{BumpKind, RangeStrategy};

/// The fixed commit message for dependency-update commits.
pub const UPDATE_COMMIT_MESSAGE: &str = "update dependencies after publishing";

/// What the updater did to one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub changed: bool,
    /// dependency name -> new range text, across all tables it appears in.
    pub rewritten: BTreeMap<String, String>,
    pub changeset_path: Option<PathBuf>,
}

/// Rewrite `repo_dir`'s manifest against the published versions in
/// `updates`, synthesize an auto-changeset when `auto_bump` is given, and
/// commit whatever changed.
pub fn apply_updates(
    repo_dir: &Path,
    package_name: &str,
    updates: &BTreeMap<String, Version>,
    strategy: RangeStrategy,
    wildcard_strategy: RangeStrategy,
    auto_bump: Option<BumpKind>,
    git: &dyn GitOps,
) -> Result<UpdateOutcome, StepError> {
    let mut manifest = Manifest::load(repo_dir)
        .map_err(|e| StepError::wrap(ErrorKind::Manifest, &e))?;

    let mut outcome = UpdateOutcome::default();
    for kind in TABLE_ORDER {
        let table = manifest.dependency_table(kind);
        for (dep, new_version) in updates {
            let Some(existing) = table.get(dep) else {
                continue;
            };
            let new_range = rewritten_range(existing, new_version, strategy, wildcard_strategy);
            if manifest.set_dependency_range(kind, dep, &new_range) {
                outcome.changed = true;
                outcome.rewritten.insert(dep.clone(), new_range);
            }
        }
    }

    if outcome.changed {
        manifest
            .write()
            .map_err(|e| StepError::wrap(ErrorKind::Manifest, &e))?;
    }

    if let Some(bump) = auto_bump {
        let path = changeset::synthesize_record(repo_dir, package_name, bump, updates)
            .map_err(|e| StepError::wrap(ErrorKind::Manifest, &e))?;
        outcome.changeset_path = Some(path);
    }

    if outcome.changed || outcome.changeset_path.is_some() {
        let mut to_stage: Vec<PathBuf> = Vec::new();
        if outcome.changed {
            to_stage.push(PathBuf::from(MANIFEST_FILE));
        }
        if let Some(path) = &outcome.changeset_path {
            // Stage relative to the repo root, the way the manifest is.
            let rel = path.strip_prefix(repo_dir).unwrap_or(path);
            to_stage.push(rel.to_path_buf());
        }
        let staged: Vec<&Path> = to_stage.iter().map(PathBuf::as_path).collect();
        git.add(repo_dir, &staged)
            .map_err(|e| StepError::wrap(ErrorKind::Git, &e))?;
        git.commit(repo_dir, UPDATE_COMMIT_MESSAGE)
            .map_err(|e| StepError::wrap(ErrorKind::Git, &e))?;
    }

    Ok(outcome)
}
