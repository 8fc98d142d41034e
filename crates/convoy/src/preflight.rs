//! Pre-flight validation: everything that can fail is checked before a
//! single package is touched.
//!
//! Per repository: clean working tree, the configured branch checked out,
//! changeset presence, and optionally a build. Globally: registry
//! reachability, valid publish credentials (capturing the authenticated
//! identity), and one sampled git remote. The report is `ok` exactly when no
//! errors were collected.

use chrono::Utc;

use crate::engine::Reporter;
use crate::ops::{BuildOps, GitOps, RegistryOps};
use crate::types::{PreflightOptions, PreflightReport};
use crate::workspace::{LocalRepo, Workspace};

/// Rough per-package wall-clock estimate used for the operator-facing
/// duration hint: publish plus registry propagation.
const ESTIMATED_SECONDS_PER_PACKAGE: u64 = 90;

pub fn run_preflight(
    workspace: &Workspace,
    git: &dyn GitOps,
    registry: &dyn RegistryOps,
    build: &dyn BuildOps,
    opts: &PreflightOptions,
    reporter: &mut dyn Reporter,
) -> PreflightReport {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut repos_with_changesets: Vec<String> = Vec::new();
    let mut repos_without_changesets: Vec<String> = Vec::new();

    for repo in &workspace.repos {
        let repo = match repo {
            LocalRepo::Resolved(repo) => repo,
            LocalRepo::Unresolved { url, expected_dir } => {
                errors.push(format!(
                    "{url}: repository not found at {}",
                    expected_dir.display()
                ));
                continue;
            }
        };
        let name = repo.package.name.as_str();
        reporter.info(&format!("{name}: checking workspace..."));

        match git.is_clean(&repo.dir) {
            Ok(true) => {}
            Ok(false) => errors.push(format!("{name}: working tree is not clean")),
            Err(e) => errors.push(format!("{name}: git status failed: {e:#}")),
        }

        match git.current_branch(&repo.dir) {
            Ok(branch) if branch == repo.branch => {}
            Ok(branch) => errors.push(format!(
                "{name}: on branch {branch}, expected {}",
                repo.branch
            )),
            Err(e) => errors.push(format!("{name}: branch check failed: {e:#}")),
        }

        if repo.changesets.has_changesets {
            repos_with_changesets.push(name.to_string());
        } else {
            repos_without_changesets.push(name.to_string());
        }

        if opts.check_build {
            reporter.info(&format!("{name}: verifying build..."));
            if let Err(e) = build.build(&repo.dir, opts.build_timeout) {
                errors.push(format!("{name}: build failed: {e:#}"));
            }
        }
    }

    reporter.info("checking registry reachability...");
    if let Err(e) = registry.check_reachable() {
        errors.push(format!("registry unreachable: {e:#}"));
    }

    reporter.info("checking registry credentials...");
    let auth_identity = match registry.check_auth() {
        Ok(identity) => {
            if let Some(identity) = &identity {
                reporter.info(&format!("authenticated as {identity}"));
            }
            identity
        }
        Err(e) => {
            errors.push(format!("registry authentication failed: {e:#}"));
            None
        }
    };

    if opts.sample_remote {
        // One sampled repository stands in for all of them; if its remote
        // answers, pushes are assumed to work.
        if let Some(repo) = workspace.resolved().next() {
            reporter.info(&format!(
                "{}: probing git remote...",
                repo.package.name
            ));
            match git.remote_reachable(&repo.dir) {
                Ok(true) => {}
                Ok(false) => errors.push(format!(
                    "{}: git remote is not reachable",
                    repo.package.name
                )),
                Err(e) => warnings.push(format!(
                    "{}: could not probe git remote: {e:#}",
                    repo.package.name
                )),
            }
        }
    }

    let estimated_duration_seconds = if repos_with_changesets.is_empty() {
        None
    } else {
        Some(repos_with_changesets.len() as u64 * ESTIMATED_SECONDS_PER_PACKAGE)
    };

    PreflightReport {
        ok: errors.is_empty(),
        errors,
        warnings,
        repos_with_changesets,
        repos_without_changesets,
        estimated_duration_seconds,
        auth_identity,
        timestamp: Utc::now(),
    }
}
