//! # Convoy
//!
//! A coordinated release orchestrator for sibling package repositories.
//!
//! Convoy takes a set of repositories that live next to each other on disk
//! and depend on each other through a shared registry, and republishes them
//! as one consistent wave: pending changesets decide who bumps, breaking
//! changes cascade through dependents, every dependent's manifest is
//! rewritten against the freshly published versions, and durable state makes
//! an interrupted wave resumable.
//!
//! ## Pipeline
//!
//! The core flow is **load → graph → plan → preflight → publish**:
//!
//! 1. [`workspace::load_workspace`] resolves the configured repositories and
//!    loads manifests and changesets.
//! 2. [`graph::DependencyGraph::build`] links sibling packages with typed
//!    edges and classifies cycles.
//! 3. [`planner::build_plan`] combines changesets, dependency propagation,
//!    breaking cascades and bump escalation into a [`types::PublishingPlan`].
//! 4. [`preflight::run_preflight`] validates workspaces, branches, registry
//!    reachability and credentials before anything is touched.
//! 5. [`engine::run_publish`] executes the plan in topological order,
//!    waiting out registry propagation and updating dependents, with state
//!    persisted after every transition.
//!
//! ## Key types
//!
//! - `PublishingPlan` — deterministic plan: order, version changes, updates,
//!   cascades, diagnostics
//! - `PublishingState` — durable, resumable orchestrator state
//! - `PublishOptions` — every runtime knob, with explicit defaults
//! - `PublishingResult` — the final outcome, preflight report included
//!
//! ## Modules
//!
//! - [`config`] — `convoy.toml` loading
//! - [`workspace`] — repository resolution and loading
//! - [`manifest`] — order-preserving manifest read/rewrite
//! - [`changeset`] — pending-bump records
//! - [`graph`] — typed dependency graph, topological sort, cycles
//! - [`planner`] — the version-change planner
//! - [`preflight`] — pre-publish validation
//! - [`engine`] — the publishing orchestrator
//! - [`monitor`] — registry propagation waits
//! - [`updater`] — dependent manifest rewriting
//! - [`state`] — durable state persistence
//! - [`ops`] — git/registry/build capability interfaces
//! - [`error`] — classified error kinds
//!
//! The semver bump rules and the dependency-range grammar live in the
//! [`ranges`] microcrate.

pub mod changeset;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod monitor;
pub mod ops;
pub mod planner;
pub mod preflight;
pub mod state;
pub mod types;
pub mod updater;
pub mod workspace;

/// Semver bump classification and the dependency-range grammar.
/// Re-exported from the convoy-ranges microcrate.
pub use convoy_ranges as ranges;

/// Cross-module property tests for planner and graph invariants.
#[cfg(test)]
mod property_tests;

use anyhow::Result;

use crate::config::Config;
use crate::engine::{Capabilities, Reporter};
use crate::graph::DependencyGraph;
use crate::ops::{CommandBuild, NpmRegistry, SystemGit};
use crate::types::{
    PackageSummary, PlanError, PublishOptions, PublishingPlan, PublishingResult,
    WorkspaceAnalysis,
};

/// Load the workspace and describe its dependency graph: packages, order,
/// classified cycles. Cycles are reported, not thrown.
pub fn analyze(config: &Config) -> Result<WorkspaceAnalysis> {
    let ws = workspace::load_workspace(config)?;
    let packages = ws.packages();
    let graph = DependencyGraph::build(&packages);
    let cycles = graph.cycles();

    let mut warnings: Vec<String> = Vec::new();
    let mut errors: Vec<PlanError> = Vec::new();

    for url in ws.unresolved_urls() {
        warnings.push(format!("{url}: repository not found on disk"));
    }
    for cycle in &cycles.development {
        warnings.push(format!(
            "development dependency cycle: {}",
            graph::format_cycle(cycle)
        ));
    }

    let publishing_order = match graph.topological_sort(true) {
        Ok(order) => order,
        Err(failure) => {
            for cycle in &cycles.production {
                errors.push(PlanError {
                    kind: error::ErrorKind::GraphCycle,
                    message: format!(
                        "production dependency cycle: {}",
                        graph::format_cycle(cycle)
                    ),
                });
            }
            errors.push(PlanError {
                kind: error::ErrorKind::Sort,
                message: format!(
                    "topological sort could not proceed; unsorted packages: {}",
                    failure.unsorted.join(", ")
                ),
            });
            Vec::new()
        }
    };

    let summaries: Vec<PackageSummary> = graph
        .nodes()
        .map(|node| PackageSummary {
            name: node.name.clone(),
            version: node.version.clone(),
            publishable: node.publishable,
            has_changesets: ws
                .repo_for_package(&node.name)
                .map(|r| r.changesets.has_changesets)
                .unwrap_or(false),
            dependency_count: node.dependencies.len(),
            dependent_count: node.dependents.len(),
        })
        .collect();

    Ok(WorkspaceAnalysis {
        packages: summaries,
        unresolved: ws.unresolved_urls(),
        publishing_order,
        production_cycles: cycles.production,
        development_cycles: cycles.development,
        warnings,
        errors,
    })
}

/// Load the workspace and compute the publishing plan. Planner diagnostics
/// (cycles, sort failures) are part of the returned plan.
pub fn plan(config: &Config) -> Result<PublishingPlan> {
    let ws = workspace::load_workspace(config)?;
    let graph = DependencyGraph::build(&ws.packages());
    Ok(planner::build_plan(&graph, &ws.aggregated_bumps()))
}

/// Plan and execute a publish wave with the production capabilities
/// (subprocess git, npm-compatible registry, package-manager build).
pub fn publish(
    config: &Config,
    opts: &PublishOptions,
    reporter: &mut dyn Reporter,
) -> Result<PublishingResult> {
    let ws = workspace::load_workspace(config)?;
    let graph = DependencyGraph::build(&ws.packages());
    let plan = planner::build_plan(&graph, &ws.aggregated_bumps());

    let git = SystemGit::new();
    let registry = NpmRegistry::new(&config.registry_url)?;
    let build = CommandBuild::new();
    let caps = Capabilities {
        git: &git,
        registry: &registry,
        build: &build,
    };

    engine::run_publish(&ws, &plan, opts, &caps, &config.project_dir, reporter)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::config::load_config;

    fn write_repo(repos_dir: &Path, name: &str, manifest: &str) {
        let dir = repos_dir.join(name);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("package.json"), manifest).expect("manifest");
    }

    fn setup() -> (tempfile::TempDir, Config) {
        let td = tempdir().expect("tempdir");
        let project = td.path().join("gitops");
        fs::create_dir_all(&project).expect("mkdir");
        fs::write(
            project.join("convoy.toml"),
            r#"
repos_dir = ".."

[[repos]]
url = "https://github.com/acme/lib"

[[repos]]
url = "https://github.com/acme/app"
"#,
        )
        .expect("config");

        write_repo(
            td.path(),
            "lib",
            "{\n\t\"name\": \"lib\",\n\t\"version\": \"0.1.0\"\n}\n",
        );
        write_repo(
            td.path(),
            "app",
            "{\n\t\"name\": \"app\",\n\t\"version\": \"0.1.0\",\n\t\"dependencies\": {\n\t\t\"lib\": \"^0.1.0\"\n\t}\n}\n",
        );

        let config = load_config(&project.join("convoy.toml")).expect("config");
        (td, config)
    }

    #[test]
    fn analyze_reports_graph_shape() {
        let (_td, config) = setup();
        let analysis = analyze(&config).expect("analysis");

        assert_eq!(analysis.publishing_order, vec!["lib", "app"]);
        assert!(analysis.errors.is_empty());
        assert!(analysis.production_cycles.is_empty());

        let app = analysis
            .packages
            .iter()
            .find(|p| p.name == "app")
            .expect("app");
        assert_eq!(app.dependency_count, 1);
        let lib = analysis
            .packages
            .iter()
            .find(|p| p.name == "lib")
            .expect("lib");
        assert_eq!(lib.dependent_count, 1);
    }

    #[test]
    fn plan_without_changesets_has_only_info() {
        let (_td, config) = setup();
        let plan = plan(&config).expect("plan");
        assert!(plan.version_changes.is_empty());
        assert_eq!(plan.info.len(), 2);
        assert!(plan.errors.is_empty());
    }

    #[test]
    fn plan_picks_up_changesets_from_disk() {
        let (td, config) = setup();
        let cs_dir = td.path().join("lib").join(".changeset");
        fs::create_dir_all(&cs_dir).expect("mkdir");
        fs::write(cs_dir.join("one.md"), "---\n\"lib\": minor\n---\nfeat").expect("changeset");

        let plan = plan(&config).expect("plan");
        let lib = &plan.version_changes["lib"];
        assert_eq!(lib.to.to_string(), "0.2.0");
        // 0.x minor is breaking, so app follows.
        assert!(plan.version_changes.contains_key("app"));
        assert_eq!(plan.breaking_cascades["lib"], vec!["app"]);
    }
}
