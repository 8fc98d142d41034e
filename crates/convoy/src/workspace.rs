//! Resolving configured repositories against the local filesystem.
//!
//! Each declared repository either resolves to a directory with a readable
//! manifest or stays unresolved; the two states are explicit variants so
//! callers cannot forget to handle a missing sibling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::changeset::{self, ChangesetAnalysis};
use crate::config::Config;
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::types::{BumpKind, Package};

/// A repository found on disk, fully loaded.
#[derive(Debug, Clone)]
pub struct ResolvedRepo {
    pub url: String,
    pub dir: PathBuf,
    pub branch: String,
    pub package: Package,
    pub changesets: ChangesetAnalysis,
}

/// A configured repository, resolved or not.
#[derive(Debug, Clone)]
pub enum LocalRepo {
    Resolved(Box<ResolvedRepo>),
    Unresolved { url: String, expected_dir: PathBuf },
}

/// The loaded sibling set.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub repos: Vec<LocalRepo>,
}

impl Workspace {
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedRepo> {
        self.repos.iter().filter_map(|repo| match repo {
            LocalRepo::Resolved(resolved) => Some(resolved.as_ref()),
            LocalRepo::Unresolved { .. } => None,
        })
    }

    pub fn unresolved_urls(&self) -> Vec<String> {
        self.repos
            .iter()
            .filter_map(|repo| match repo {
                LocalRepo::Resolved(_) => None,
                LocalRepo::Unresolved { url, .. } => Some(url.clone()),
            })
            .collect()
    }

    pub fn packages(&self) -> Vec<Package> {
        self.resolved().map(|r| r.package.clone()).collect()
    }

    /// Pending bumps aggregated across every resolved repository; when
    /// several repositories declare a bump for the same package, the highest
    /// wins, matching per-record aggregation.
    pub fn aggregated_bumps(&self) -> BTreeMap<String, BumpKind> {
        let mut bumps: BTreeMap<String, BumpKind> = BTreeMap::new();
        for repo in self.resolved() {
            for (name, kind) in &repo.changesets.bumps {
                bumps
                    .entry(name.clone())
                    .and_modify(|existing| *existing = (*existing).max(*kind))
                    .or_insert(*kind);
            }
        }
        bumps
    }

    pub fn repo_for_package(&self, name: &str) -> Option<&ResolvedRepo> {
        self.resolved().find(|r| r.package.name == name)
    }
}

/// Resolve every configured repository under `repos_dir` and load manifests
/// and changesets for the ones that exist. A directory without a manifest is
/// unresolved, not an error; a manifest that fails to parse is.
pub fn load_workspace(config: &Config) -> Result<Workspace> {
    let mut repos = Vec::with_capacity(config.repos.len());

    for repo in &config.repos {
        let dir = config.repos_dir.join(repo.dir_name());
        if !dir.join(MANIFEST_FILE).exists() {
            repos.push(LocalRepo::Unresolved {
                url: repo.url.clone(),
                expected_dir: dir,
            });
            continue;
        }

        let manifest = Manifest::load(&dir)
            .with_context(|| format!("failed to load repository at {}", dir.display()))?;
        let package = manifest.to_package(&dir)?;
        let changesets = changeset::read_changesets(&dir)?;

        repos.push(LocalRepo::Resolved(Box::new(ResolvedRepo {
            url: repo.url.clone(),
            dir,
            branch: config.branch_for(repo).to_string(),
            package,
            changesets,
        })));
    }

    Ok(Workspace { repos })
}
