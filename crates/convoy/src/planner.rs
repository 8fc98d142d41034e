//! The version-change planner.
//!
//! One topological pass over the prod/peer subgraph combines explicit
//! changesets, dependency-update propagation, breaking cascades and bump
//! escalation into a single plan. Processing packages in dependency order is
//! what makes a single pass sufficient: by the time a package is visited,
//! every version its dependencies will publish — including versions raised by
//! escalation — is already known.

use std::collections::{BTreeMap, BTreeSet};

use convoy_ranges::{bump, is_breaking, needs_update};
use semver::Version;

use crate::error::ErrorKind;
use crate::graph::{DependencyGraph, format_cycle};
use crate::types::{
    BumpKind, ChangeOrigin, DependencyUpdate, PlanError, PublishingPlan, VersionChange,
};

/// Build the publishing plan for a graph and its aggregated pending bumps.
///
/// Planner diagnostics are part of the plan, never thrown: production cycles
/// and sort failures land in `errors`, development cycles in `warnings`,
/// packages with nothing to do in `info`.
pub fn build_plan(
    graph: &DependencyGraph,
    bumps: &BTreeMap<String, BumpKind>,
) -> PublishingPlan {
    let mut plan = PublishingPlan {
        publishing_order: Vec::new(),
        version_changes: BTreeMap::new(),
        dependency_updates: BTreeMap::new(),
        breaking_cascades: BTreeMap::new(),
        warnings: Vec::new(),
        info: Vec::new(),
        errors: Vec::new(),
    };

    let cycles = graph.cycles();
    for cycle in &cycles.development {
        plan.warnings
            .push(format!("development dependency cycle: {}", format_cycle(cycle)));
    }

    let order = match graph.topological_sort(true) {
        Ok(order) => order,
        Err(failure) => {
            for cycle in &cycles.production {
                plan.errors.push(PlanError {
                    kind: ErrorKind::GraphCycle,
                    message: format!("production dependency cycle: {}", format_cycle(cycle)),
                });
            }
            plan.errors.push(PlanError {
                kind: ErrorKind::Sort,
                message: format!(
                    "topological sort could not proceed; unsorted packages: {}",
                    failure.unsorted.join(", ")
                ),
            });
            return plan;
        }
    };

    let mut predicted: BTreeMap<String, Version> = BTreeMap::new();
    let mut breaking_packages: BTreeSet<String> = BTreeSet::new();

    for name in &order {
        let node = graph.node(name).expect("ordered vertex exists");

        // Explicit changesets predict a version before anything else.
        if let Some(&kind) = bumps.get(name) {
            let to = bump(&node.version, kind);
            let breaking = is_breaking(&node.version, kind);
            plan.version_changes.insert(
                name.clone(),
                VersionChange {
                    from: node.version.clone(),
                    to: to.clone(),
                    bump_type: kind,
                    breaking,
                    origin: ChangeOrigin::Explicit,
                },
            );
            predicted.insert(name.clone(), to);
            if breaking {
                breaking_packages.insert(name.clone());
            }
        }

        // Dependency updates against the versions predicted so far. Every
        // dependency precedes this package in the order, so its final
        // version is already settled.
        let mut updates: Vec<DependencyUpdate> = Vec::new();
        for (dep, spec) in &node.dependencies {
            let Some(new_version) = predicted.get(dep) else {
                continue;
            };
            if !needs_update(&spec.range, new_version) {
                continue;
            }
            let causes_republish = spec.kind.participates_in_publishing();
            updates.push(DependencyUpdate {
                dependency: dep.clone(),
                new_version: new_version.clone(),
                kind: spec.kind,
                causes_republish,
            });
            if causes_republish && breaking_packages.contains(dep) {
                plan.breaking_cascades
                    .entry(dep.clone())
                    .or_default()
                    .push(name.clone());
            }
        }

        // Escalation and auto-changesets.
        let required = required_bump_for_deps(&updates, &breaking_packages, &node.version);
        match (plan.version_changes.get(name), required) {
            (Some(existing), Some(required)) if required > existing.bump_type => {
                let to = bump(&node.version, required);
                let breaking = is_breaking(&node.version, required);
                let escalated = VersionChange {
                    from: node.version.clone(),
                    to: to.clone(),
                    bump_type: required,
                    breaking,
                    origin: ChangeOrigin::Escalated {
                        existing_bump: existing.bump_type,
                        required_bump: required,
                    },
                };
                plan.version_changes.insert(name.clone(), escalated);
                predicted.insert(name.clone(), to);
                if breaking {
                    breaking_packages.insert(name.clone());
                }
            }
            (Some(_), _) => {}
            (None, Some(required)) => {
                let to = bump(&node.version, required);
                let breaking = is_breaking(&node.version, required);
                plan.version_changes.insert(
                    name.clone(),
                    VersionChange {
                        from: node.version.clone(),
                        to: to.clone(),
                        bump_type: required,
                        breaking,
                        origin: ChangeOrigin::Auto,
                    },
                );
                predicted.insert(name.clone(), to);
                if breaking {
                    breaking_packages.insert(name.clone());
                }
            }
            (None, None) => {
                plan.info.push(format!("{name}: nothing to publish"));
            }
        }

        if !updates.is_empty() {
            plan.dependency_updates.insert(name.clone(), updates);
        }
    }

    for dependents in plan.breaking_cascades.values_mut() {
        dependents.sort();
    }

    plan.publishing_order = order;
    plan
}

/// The bump a package's own dependency updates demand: none without prod/peer
/// updates; minor (0.x) or major (>=1.0) when a breaking dependency is among
/// them; patch otherwise.
fn required_bump_for_deps(
    updates: &[DependencyUpdate],
    breaking_packages: &BTreeSet<String>,
    current: &Version,
) -> Option<BumpKind> {
    let republishing: Vec<&DependencyUpdate> =
        updates.iter().filter(|u| u.causes_republish).collect();
    if republishing.is_empty() {
        return None;
    }

    let any_breaking = republishing
        .iter()
        .any(|u| breaking_packages.contains(&u.dependency));
    if any_breaking {
        if current.major == 0 {
            Some(BumpKind::Minor)
        } else {
            Some(BumpKind::Major)
        }
    } else {
        Some(BumpKind::Patch)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use semver::Version;

    use super::*;
    use crate::types::{DependencySpec, DependencyType, Package};

    fn pkg(name: &str, version: &str, deps: &[(&str, &str, DependencyType)]) -> Package {
        Package {
            name: name.to_string(),
            version: version.parse().expect("version"),
            publishable: true,
            dependencies: deps
                .iter()
                .map(|(dep, range, kind)| {
                    (
                        (*dep).to_string(),
                        DependencySpec {
                            range: (*range).to_string(),
                            kind: *kind,
                        },
                    )
                })
                .collect(),
            repo_dir: PathBuf::from(name),
        }
    }

    fn private(mut package: Package) -> Package {
        package.publishable = false;
        package
    }

    fn bumps(entries: &[(&str, BumpKind)]) -> BTreeMap<String, BumpKind> {
        entries
            .iter()
            .map(|(name, kind)| ((*name).to_string(), *kind))
            .collect()
    }

    #[test]
    fn basic_wave_orders_bumps_and_cascades() {
        // S1: a has a minor changeset, b prod-depends on a, c peer-depends on
        // b with its own patch changeset, d is standalone, e dev-depends on a.
        let packages = vec![
            pkg("a", "0.1.0", &[]),
            pkg("b", "0.1.0", &[("a", "^0.1.0", DependencyType::Production)]),
            pkg("c", "0.1.0", &[("b", "^0.1.0", DependencyType::Peer)]),
            pkg("d", "0.1.0", &[]),
            pkg("e", "0.1.0", &[("a", "^0.1.0", DependencyType::Development)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("a", BumpKind::Minor), ("c", BumpKind::Patch)]));

        assert!(plan.errors.is_empty());
        assert_eq!(plan.publishing_order, vec!["a", "d", "e", "b", "c"]);

        let a = &plan.version_changes["a"];
        assert_eq!(a.to, Version::new(0, 2, 0));
        assert!(a.breaking);
        assert_eq!(a.origin, ChangeOrigin::Explicit);

        let b = &plan.version_changes["b"];
        assert_eq!(b.to, Version::new(0, 2, 0));
        assert_eq!(b.origin, ChangeOrigin::Auto);
        assert!(b.will_generate_changeset());

        let c = &plan.version_changes["c"];
        assert_eq!(c.to, Version::new(0, 2, 0));
        assert_eq!(
            c.origin,
            ChangeOrigin::Escalated {
                existing_bump: BumpKind::Patch,
                required_bump: BumpKind::Minor,
            }
        );
        assert!(c.needs_bump_escalation());

        assert_eq!(plan.breaking_cascades["a"], vec!["b"]);
        assert_eq!(plan.breaking_cascades["b"], vec!["c"]);
        assert_eq!(
            plan.info,
            vec![
                "d: nothing to publish".to_string(),
                "e: nothing to publish".to_string()
            ]
        );

        // e's dev edge is rewritten but never forces a republish.
        let e_updates = &plan.dependency_updates["e"];
        assert_eq!(e_updates.len(), 1);
        assert!(!e_updates[0].causes_republish);
    }

    #[test]
    fn deep_cascade_escalates_every_link() {
        // S2: leaf -> branch -> trunk -> root, minor changeset on leaf and a
        // patch changeset on trunk; every 0.x minor is breaking.
        let packages = vec![
            pkg("leaf", "0.1.0", &[]),
            pkg("branch", "0.1.0", &[("leaf", "^0.1.0", DependencyType::Production)]),
            pkg("trunk", "0.1.0", &[("branch", "^0.1.0", DependencyType::Production)]),
            pkg("root", "0.1.0", &[("trunk", "^0.1.0", DependencyType::Production)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(
            &graph,
            &bumps(&[("leaf", BumpKind::Minor), ("trunk", BumpKind::Patch)]),
        );

        for name in ["leaf", "branch", "trunk", "root"] {
            let change = &plan.version_changes[name];
            assert_eq!(change.bump_type, BumpKind::Minor, "{name}");
            assert_eq!(change.to, Version::new(0, 2, 0), "{name}");
            assert!(change.breaking, "{name}");
        }
        assert_eq!(plan.version_changes["branch"].origin, ChangeOrigin::Auto);
        assert_eq!(
            plan.version_changes["trunk"].origin,
            ChangeOrigin::Escalated {
                existing_bump: BumpKind::Patch,
                required_bump: BumpKind::Minor,
            }
        );

        // Each link cascades to its direct successor only.
        assert_eq!(plan.breaking_cascades["leaf"], vec!["branch"]);
        assert_eq!(plan.breaking_cascades["branch"], vec!["trunk"]);
        assert_eq!(plan.breaking_cascades["trunk"], vec!["root"]);
        assert!(!plan.breaking_cascades.contains_key("root"));
    }

    #[test]
    fn dev_cycle_warns_without_blocking() {
        // S3: tool_a <-> tool_b as development deps; consumer prod-depends on
        // both.
        let packages = vec![
            pkg("consumer", "0.1.0", &[
                ("tool_a", "^0.1.0", DependencyType::Production),
                ("tool_b", "^0.1.0", DependencyType::Production),
            ]),
            pkg("tool_a", "0.1.0", &[("tool_b", "^0.1.0", DependencyType::Development)]),
            pkg("tool_b", "0.1.0", &[("tool_a", "^0.1.0", DependencyType::Development)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("tool_a", BumpKind::Patch)]));

        assert!(plan.errors.is_empty());
        assert_eq!(plan.publishing_order, vec!["tool_a", "tool_b", "consumer"]);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("development dependency cycle"));
        assert!(plan.warnings[0].contains("tool_a -> tool_b -> tool_a"));
    }

    #[test]
    fn production_cycle_produces_errors_and_empty_order() {
        // S4: pkg_a peer-depends on pkg_b; pkg_b prod-depends on pkg_a.
        let packages = vec![
            pkg("pkg_a", "0.1.0", &[("pkg_b", "^0.1.0", DependencyType::Peer)]),
            pkg("pkg_b", "0.1.0", &[("pkg_a", "^0.1.0", DependencyType::Production)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("pkg_a", BumpKind::Patch)]));

        assert!(plan.publishing_order.is_empty());
        assert_eq!(plan.errors.len(), 2);
        assert_eq!(plan.errors[0].kind, ErrorKind::GraphCycle);
        assert!(plan.errors[0].message.contains("pkg_a -> pkg_b -> pkg_a"));
        assert_eq!(plan.errors[1].kind, ErrorKind::Sort);
        assert!(plan.version_changes.is_empty());
    }

    #[test]
    fn non_breaking_minor_causes_patch_followup() {
        // S5: public_lib 1.0.0 takes a minor bump; consumer follows with a
        // patch. The private tool stays in the order for the publisher to
        // skip.
        let packages = vec![
            pkg("public_lib", "1.0.0", &[]),
            private(pkg("private_tool", "1.0.0", &[])),
            pkg("consumer", "1.0.0", &[("public_lib", "^1.0.0", DependencyType::Production)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("public_lib", BumpKind::Minor)]));

        assert!(plan.publishing_order.contains(&"private_tool".to_string()));

        let lib = &plan.version_changes["public_lib"];
        assert_eq!(lib.to, Version::new(1, 1, 0));
        assert!(!lib.breaking);

        let consumer = &plan.version_changes["consumer"];
        assert_eq!(consumer.bump_type, BumpKind::Patch);
        assert_eq!(consumer.to, Version::new(1, 0, 1));
        assert_eq!(consumer.origin, ChangeOrigin::Auto);

        assert!(plan.breaking_cascades.is_empty());
    }

    #[test]
    fn major_graduation_escalates_dependents_to_major() {
        // S6: unstable 0.9.5 graduates to 1.0.0; a dependent pinned to ^0.9
        // escalates its own patch changeset to a major.
        let packages = vec![
            pkg("unstable", "0.9.5", &[]),
            pkg("app", "1.2.3", &[("unstable", "^0.9", DependencyType::Production)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(
            &graph,
            &bumps(&[("unstable", BumpKind::Major), ("app", BumpKind::Patch)]),
        );

        let unstable = &plan.version_changes["unstable"];
        assert_eq!(unstable.to, Version::new(1, 0, 0));
        assert!(unstable.breaking);

        let app = &plan.version_changes["app"];
        assert_eq!(app.bump_type, BumpKind::Major);
        assert_eq!(app.to, Version::new(2, 0, 0));
        assert_eq!(
            app.origin,
            ChangeOrigin::Escalated {
                existing_bump: BumpKind::Patch,
                required_bump: BumpKind::Major,
            }
        );
        assert_eq!(plan.breaking_cascades["unstable"], vec!["app"]);
    }

    #[test]
    fn satisfied_ranges_are_left_alone() {
        // dep already covers the predicted version exactly: no update row.
        let packages = vec![
            pkg("lib", "1.0.0", &[]),
            pkg("app", "1.0.0", &[("lib", "^1.1.0", DependencyType::Production)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("lib", BumpKind::Minor)]));

        assert!(!plan.dependency_updates.contains_key("app"));
        assert!(!plan.version_changes.contains_key("app"));
        assert_eq!(plan.info, vec!["app: nothing to publish".to_string()]);
    }

    #[test]
    fn wildcard_ranges_always_update() {
        let packages = vec![
            pkg("lib", "1.0.0", &[]),
            pkg("app", "1.0.0", &[("lib", "*", DependencyType::Production)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("lib", BumpKind::Patch)]));

        let updates = &plan.dependency_updates["app"];
        assert_eq!(updates[0].dependency, "lib");
        assert_eq!(updates[0].new_version, Version::new(1, 0, 1));
        assert_eq!(plan.version_changes["app"].bump_type, BumpKind::Patch);
    }

    #[test]
    fn plan_is_deterministic() {
        let packages = vec![
            pkg("a", "0.1.0", &[]),
            pkg("b", "0.1.0", &[("a", "^0.1.0", DependencyType::Production)]),
            pkg("c", "0.1.0", &[("b", "^0.1.0", DependencyType::Peer)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let wanted = bumps(&[("a", BumpKind::Minor)]);
        let first = build_plan(&graph, &wanted);
        let second = build_plan(&graph, &wanted);
        assert_eq!(first, second);
    }

    #[test]
    fn every_change_is_a_bump_of_its_from_version() {
        // Property 4: to == bump(from, bump_type) for every entry.
        let packages = vec![
            pkg("a", "0.1.0", &[]),
            pkg("b", "1.4.2", &[("a", "^0.1.0", DependencyType::Production)]),
            pkg("c", "2.0.0", &[("b", "~1.4.2", DependencyType::Peer)]),
        ];
        let graph = DependencyGraph::build(&packages);
        let plan = build_plan(&graph, &bumps(&[("a", BumpKind::Major), ("c", BumpKind::Patch)]));

        for (name, change) in &plan.version_changes {
            assert_eq!(
                change.to,
                bump(&change.from, change.bump_type),
                "entry for {name}"
            );
        }
    }
}
