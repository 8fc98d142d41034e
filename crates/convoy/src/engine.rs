//! The publishing orchestrator.
//!
//! Executes a plan in topological order, one package at a time:
//!
//! ```text
//! pending -> selected -> built -> published -> awaited -> cascaded -> done
//!                                        \-> failed
//! ```
//!
//! Every transition is flushed to the durable state file before the next
//! step begins, so an interrupted wave resumes exactly where it stopped.
//! Failures are caught at this boundary, classified, and recorded; they
//! never unwind past the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use semver::Version;

use crate::error::{ErrorKind, StepError, is_etarget, is_transient_registry_failure};
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::monitor;
use crate::ops::{BuildOps, GitOps, RegistryOps};
use crate::preflight;
use crate::state;
use crate::types::{
    CompletedPackage, FailedPackage, PublishOptions, PublishingPlan, PublishingResult,
    SkippedPackage,
};
use crate::updater;
use crate::workspace::Workspace;

/// Narration channel for long-running operations. The CLI renders these to
/// the console; tests collect them.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// The external capabilities the orchestrator drives. Tests substitute
/// in-memory implementations.
pub struct Capabilities<'a> {
    pub git: &'a dyn GitOps,
    pub registry: &'a dyn RegistryOps,
    pub build: &'a dyn BuildOps,
}

enum StepOutcome {
    Published { version: Version },
    NothingToPublish,
    Private,
}

/// Execute a publishing plan.
///
/// Pre-flight failures halt before any per-package work and are surfaced in
/// the result. Per-package failures become `failed` entries; depending on
/// `continue_on_error` the wave either stops (state left on disk for resume)
/// or moves on. In dry mode every side-effecting capability call is skipped
/// and nothing is persisted.
pub fn run_publish(
    workspace: &Workspace,
    plan: &PublishingPlan,
    opts: &PublishOptions,
    caps: &Capabilities<'_>,
    project_dir: &Path,
    reporter: &mut dyn Reporter,
) -> Result<PublishingResult> {
    if plan.has_errors() {
        bail!(
            "cannot publish: the plan carries {} error(s); inspect the plan output",
            plan.errors.len()
        );
    }

    let started_at = Utc::now();
    let state_dir = resolve_state_dir(project_dir, &opts.state_dir);

    let preflight = preflight::run_preflight(
        workspace,
        caps.git,
        caps.registry,
        caps.build,
        &opts.preflight,
        reporter,
    );
    let mut warnings: Vec<String> = preflight.warnings.clone();
    if !preflight.ok {
        for error in &preflight.errors {
            reporter.error(error);
        }
        return Ok(PublishingResult {
            dry_run: opts.dry_run,
            started_at,
            finished_at: Utc::now(),
            preflight,
            published: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            warnings,
        });
    }

    // Load or initialize durable state. Dry mode keeps state in memory only.
    let existing = if opts.dry_run {
        None
    } else {
        state::load_state(&state_dir)?
    };
    if opts.resume && existing.is_none() {
        bail!(
            "no existing state found in {}; run publish first",
            state_dir.display()
        );
    }

    let universe: BTreeSet<String> = plan.publishing_order.iter().cloned().collect();
    let mut st = match existing {
        Some(mut prior) if prior.universe() == universe => {
            prior.resumed_at = Some(Utc::now());
            if let Some(current) = prior.current.take() {
                // Interrupted mid-package: that package is attempted first.
                prior.remaining.insert(0, current);
            }
            reporter.info(&format!(
                "resuming: {} completed, {} failed, {} remaining",
                prior.completed.len(),
                prior.failed.len(),
                prior.remaining.len()
            ));
            for done in &prior.completed {
                reporter.info(&format!(
                    "{}@{}: already complete (skipping)",
                    done.name, done.version
                ));
            }
            for failure in &prior.failed {
                reporter.warn(&format!(
                    "{}: failed previously ({}); not re-attempting",
                    failure.name,
                    failure.kind.as_str()
                ));
            }
            prior
        }
        Some(_) => {
            let msg =
                "persisted state does not match the current package set; discarding and starting fresh";
            reporter.warn(msg);
            warnings.push(format!("resume mismatch: {msg}"));
            state::new_state(&plan.publishing_order)
        }
        None => state::new_state(&plan.publishing_order),
    };
    persist(&state_dir, &st, opts.dry_run)?;

    // Published versions accumulated across the wave, seeded from prior
    // completions on resume. Owned exclusively here; everything else sees
    // snapshots.
    let mut published: BTreeMap<String, Version> = st
        .completed
        .iter()
        .map(|c| (c.name.clone(), c.version.clone()))
        .collect();

    let mut result_published: Vec<CompletedPackage> = Vec::new();
    let mut skipped: Vec<SkippedPackage> = Vec::new();
    let mut etarget_flag = false;

    while let Some(name) = st.remaining.first().cloned() {
        if opts.cancel.is_cancelled() {
            let msg = "cancelled; remaining packages were not attempted".to_string();
            reporter.warn(&msg);
            warnings.push(msg);
            break;
        }

        // pending -> selected
        st.remaining.remove(0);
        st.current = Some(name.clone());
        persist(&state_dir, &st, opts.dry_run)?;

        let outcome = publish_package(
            &name,
            workspace,
            plan,
            opts,
            caps,
            &mut published,
            &mut warnings,
            &mut etarget_flag,
            reporter,
        );

        let timestamp = Utc::now();
        match outcome {
            Ok(step) => {
                let version = match &step {
                    StepOutcome::Published { version } => {
                        result_published.push(CompletedPackage {
                            name: name.clone(),
                            version: version.clone(),
                            timestamp,
                        });
                        version.clone()
                    }
                    StepOutcome::NothingToPublish => {
                        skipped.push(SkippedPackage {
                            name: name.clone(),
                            reason: "nothing to publish".to_string(),
                        });
                        current_version(workspace, &name)
                    }
                    StepOutcome::Private => {
                        skipped.push(SkippedPackage {
                            name: name.clone(),
                            reason: "private package".to_string(),
                        });
                        current_version(workspace, &name)
                    }
                };
                // cascaded -> done
                st.completed.push(CompletedPackage {
                    name: name.clone(),
                    version,
                    timestamp,
                });
                st.current = None;
                persist(&state_dir, &st, opts.dry_run)?;
            }
            Err(step_err) => {
                reporter.error(&format!("{name}: {step_err}"));
                let cancelled = step_err.kind == ErrorKind::Cancelled;
                st.failed.push(FailedPackage {
                    name: name.clone(),
                    kind: step_err.kind,
                    message: step_err.message,
                    timestamp,
                });
                st.current = None;
                persist(&state_dir, &st, opts.dry_run)?;

                if cancelled || !opts.continue_on_error {
                    break;
                }
            }
        }
    }

    let finished_at = Utc::now();
    let clean = st.failed.is_empty() && st.remaining.is_empty() && st.current.is_none();
    if clean {
        if !opts.dry_run {
            state::clear_state(&state_dir)?;
        }
        reporter.info("publish wave complete");
    } else if !opts.dry_run {
        reporter.warn(&format!(
            "state left at {} for resume",
            state::state_path(&state_dir).display()
        ));
    }

    Ok(PublishingResult {
        dry_run: opts.dry_run,
        started_at,
        finished_at,
        preflight,
        published: result_published,
        failed: st.failed.clone(),
        skipped,
        warnings,
    })
}

/// One package's walk through the state machine. Every failure is returned
/// as a classified `StepError` for the caller to record.
#[allow(clippy::too_many_arguments)]
fn publish_package(
    name: &str,
    workspace: &Workspace,
    plan: &PublishingPlan,
    opts: &PublishOptions,
    caps: &Capabilities<'_>,
    published: &mut BTreeMap<String, Version>,
    warnings: &mut Vec<String>,
    etarget_flag: &mut bool,
    reporter: &mut dyn Reporter,
) -> Result<StepOutcome, StepError> {
    let repo = workspace.repo_for_package(name).ok_or_else(|| {
        StepError::new(
            ErrorKind::Manifest,
            format!("{name}: repository is not resolved"),
        )
    })?;

    if !repo.package.publishable {
        reporter.info(&format!("{name}: private package; skipping publish"));
        return Ok(StepOutcome::Private);
    }

    let Some(change) = plan.version_changes.get(name) else {
        reporter.info(&format!("{name}: nothing to publish"));
        return Ok(StepOutcome::NothingToPublish);
    };

    reporter.info(&format!(
        "{name}: {} -> {} ({} bump{})",
        change.from,
        change.to,
        change.bump_type,
        if change.breaking { ", breaking" } else { "" }
    ));

    // selected -> built
    if !opts.skip_build {
        reporter.info(&format!("{name}: building..."));
        if !opts.dry_run {
            caps.build
                .build(&repo.dir, opts.build_timeout)
                .map_err(|e| StepError::wrap(ErrorKind::Build, &e))?;
        }
    }

    // built -> published: commit the version bump, hand the tree to the
    // registry, then tag best-effort.
    if !opts.dry_run {
        let mut manifest =
            Manifest::load(&repo.dir).map_err(|e| StepError::wrap(ErrorKind::Manifest, &e))?;
        manifest.set_version(&change.to);
        manifest
            .write()
            .map_err(|e| StepError::wrap(ErrorKind::Manifest, &e))?;
        caps.git
            .add(&repo.dir, &[Path::new(MANIFEST_FILE)])
            .map_err(|e| StepError::wrap(ErrorKind::Git, &e))?;
        caps.git
            .commit(&repo.dir, &format!("publish {name}@{}", change.to))
            .map_err(|e| StepError::wrap(ErrorKind::Git, &e))?;

        reporter.info(&format!("{name}: publishing to registry..."));
        caps.registry
            .publish(&repo.dir, opts.publish_timeout)
            .map_err(|e| StepError::wrap(ErrorKind::Publish, &e))?;

        let tag = format!("v{}", change.to);
        let tagged = caps
            .git
            .tag(&repo.dir, &tag)
            .and_then(|()| caps.git.push_tag(&repo.dir, &tag));
        if let Err(e) = tagged {
            let msg = format!("{name}: tagging {tag} failed (continuing): {e:#}");
            reporter.warn(&msg);
            warnings.push(msg);
        }
    }
    published.insert(name.to_string(), change.to.clone());

    // published -> awaited
    if !opts.dry_run {
        monitor::wait_for(
            caps.registry,
            name,
            &change.to,
            &opts.monitor,
            &opts.cancel,
            reporter,
        )?;
    }

    // awaited -> cascaded: rewrite every dependent that carries an update
    // row for this package, with the accumulated published map. The
    // dependents stay in the queue and publish when reached.
    for dependent in &plan.publishing_order {
        let Some(rows) = plan.dependency_updates.get(dependent) else {
            continue;
        };
        if !rows.iter().any(|r| r.dependency == name) {
            continue;
        }

        let updates: BTreeMap<String, Version> = rows
            .iter()
            .filter_map(|r| {
                published
                    .get(&r.dependency)
                    .map(|v| (r.dependency.clone(), v.clone()))
            })
            .collect();
        if updates.is_empty() {
            continue;
        }

        let Some(dep_repo) = workspace.repo_for_package(dependent) else {
            return Err(StepError::new(
                ErrorKind::Manifest,
                format!("{dependent}: repository is not resolved"),
            ));
        };

        reporter.info(&format!(
            "{dependent}: updating dependencies after {name}@{}",
            change.to
        ));
        if opts.dry_run {
            continue;
        }

        // The auto-changeset is synthesized once, when the last republishing
        // dependency of this dependent has published.
        let all_republishing_published = rows
            .iter()
            .filter(|r| r.causes_republish)
            .all(|r| published.contains_key(&r.dependency));
        let auto_bump = if all_republishing_published {
            plan.version_changes
                .get(dependent)
                .filter(|c| c.will_generate_changeset())
                .map(|c| c.bump_type)
        } else {
            None
        };

        let outcome = updater::apply_updates(
            &dep_repo.dir,
            dependent,
            &updates,
            opts.range_strategy,
            opts.wildcard_strategy,
            auto_bump,
            caps.git,
        )?;

        if outcome.changed || outcome.changeset_path.is_some() {
            install_refresh(caps, &dep_repo.dir, opts, etarget_flag, warnings, reporter)?;
        }
    }

    Ok(StepOutcome::Published {
        version: change.to.clone(),
    })
}

/// Refresh a dependent's install after its manifest changed. An
/// ETARGET-classified failure is registry propagation lag: clean the cache,
/// retry once, and tolerate a second lag rather than failing the package.
/// The flag also forces a best-effort cache clean ahead of the next install.
fn install_refresh(
    caps: &Capabilities<'_>,
    repo_dir: &Path,
    opts: &PublishOptions,
    etarget_flag: &mut bool,
    warnings: &mut Vec<String>,
    reporter: &mut dyn Reporter,
) -> Result<(), StepError> {
    if *etarget_flag {
        reporter.info("cleaning registry cache before install...");
        if let Err(e) = caps.registry.cache_clean() {
            reporter.warn(&format!("cache clean failed (continuing): {e:#}"));
        }
        *etarget_flag = false;
    }

    match caps.registry.install(repo_dir, opts.publish_timeout) {
        Ok(()) => Ok(()),
        Err(first) => {
            let rendered = format!("{first:#}");
            if is_etarget(&rendered) {
                *etarget_flag = true;
                if let Err(e) = caps.registry.cache_clean() {
                    reporter.warn(&format!("cache clean failed (continuing): {e:#}"));
                }
                match caps.registry.install(repo_dir, opts.publish_timeout) {
                    Ok(()) => {
                        *etarget_flag = false;
                        Ok(())
                    }
                    Err(second) if is_etarget(&format!("{second:#}")) => {
                        let msg = format!(
                            "{}: install lagging behind the registry (ETARGET); continuing",
                            repo_dir.display()
                        );
                        reporter.warn(&msg);
                        warnings.push(msg);
                        Ok(())
                    }
                    Err(second) => Err(StepError::wrap(ErrorKind::Install, &second)),
                }
            } else if is_transient_registry_failure(&rendered) {
                // Backpressure or a flaky connection: one immediate retry,
                // then the failure counts.
                reporter.warn(&format!(
                    "{}: install failed transiently; retrying once",
                    repo_dir.display()
                ));
                caps.registry
                    .install(repo_dir, opts.publish_timeout)
                    .map_err(|e| StepError::wrap(ErrorKind::Install, &e))
            } else {
                Err(StepError::wrap(ErrorKind::Install, &first))
            }
        }
    }
}

fn current_version(workspace: &Workspace, name: &str) -> Version {
    workspace
        .repo_for_package(name)
        .map(|r| r.package.version.clone())
        .unwrap_or_else(|| Version::new(0, 0, 0))
}

pub(crate) fn resolve_state_dir(project_dir: &Path, state_dir: &Path) -> PathBuf {
    if state_dir.is_absolute() {
        state_dir.to_path_buf()
    } else {
        project_dir.join(state_dir)
    }
}

fn persist(
    state_dir: &Path,
    st: &crate::types::PublishingState,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        return Ok(());
    }
    state::save_state(state_dir, st).context("failed to persist publishing state")
}
