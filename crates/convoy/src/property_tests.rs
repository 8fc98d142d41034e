//! Property tests spanning the graph and the planner.

use std::collections::BTreeMap;
use std::path::PathBuf;

use proptest::prelude::*;
use semver::Version;

use convoy_ranges::{Range, bump};

use crate::graph::DependencyGraph;
use crate::planner::build_plan;
use crate::types::{BumpKind, DependencySpec, DependencyType, Package};

const N: usize = 7;

#[derive(Debug, Clone)]
struct Scenario {
    packages: Vec<Package>,
    bumps: BTreeMap<String, BumpKind>,
}

fn pkg_name(i: usize) -> String {
    format!("pkg{i:02}")
}

fn kind_from(idx: u8) -> DependencyType {
    match idx % 3 {
        0 => DependencyType::Production,
        1 => DependencyType::Peer,
        _ => DependencyType::Development,
    }
}

fn bump_from(idx: u8) -> BumpKind {
    match idx % 3 {
        0 => BumpKind::Patch,
        1 => BumpKind::Minor,
        _ => BumpKind::Major,
    }
}

/// Random acyclic sibling sets: edges only point from higher to lower
/// indices, versions span 0.x and >=1.0, ranges pin the dependency's actual
/// version with a random prefix, and a random subset carries changesets.
fn arb_scenario() -> impl Strategy<Value = Scenario> {
    let versions = prop::collection::vec((0u64..3, 0u64..4, 0u64..4), N);
    let edges = prop::collection::vec(prop::collection::vec(any::<Option<u8>>(), N), N);
    let changesets = prop::collection::vec(any::<Option<u8>>(), N);
    let prefixes = prop::collection::vec(0u8..3, N);

    (versions, edges, changesets, prefixes).prop_map(|(versions, edges, changesets, prefixes)| {
        let parsed: Vec<Version> = versions
            .iter()
            .map(|(maj, min, patch)| Version::new(*maj, *min, *patch))
            .collect();

        let packages: Vec<Package> = (0..N)
            .map(|i| {
                let mut dependencies = BTreeMap::new();
                for j in 0..i {
                    if let Some(kind_idx) = edges[i][j] {
                        let prefix = match prefixes[j] {
                            0 => "^",
                            1 => "~",
                            _ => ">=",
                        };
                        dependencies.insert(
                            pkg_name(j),
                            DependencySpec {
                                range: format!("{prefix}{}", parsed[j]),
                                kind: kind_from(kind_idx),
                            },
                        );
                    }
                }
                Package {
                    name: pkg_name(i),
                    version: parsed[i].clone(),
                    publishable: true,
                    dependencies,
                    repo_dir: PathBuf::from(pkg_name(i)),
                }
            })
            .collect();

        let bumps: BTreeMap<String, BumpKind> = changesets
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|idx| (pkg_name(i), bump_from(idx))))
            .collect();

        Scenario { packages, bumps }
    })
}

proptest! {
    // Property 1: in the published order, every prod/peer dependency
    // precedes its dependent.
    #[test]
    fn order_respects_production_and_peer_edges(scenario in arb_scenario()) {
        let graph = DependencyGraph::build(&scenario.packages);
        let plan = build_plan(&graph, &scenario.bumps);
        prop_assert!(plan.errors.is_empty());

        let index: BTreeMap<&str, usize> = plan
            .publishing_order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        for package in &scenario.packages {
            for (dep, spec) in &package.dependencies {
                if spec.kind.participates_in_publishing() {
                    prop_assert!(index[dep.as_str()] < index[package.name.as_str()]);
                }
            }
        }
    }

    // Property 2: a breaking change cascades to every prod/peer dependent
    // whose declared range no longer covers the new version, and that
    // dependent's own entry is escalated or auto-generated.
    #[test]
    fn breaking_changes_cascade_to_unsatisfied_dependents(scenario in arb_scenario()) {
        let graph = DependencyGraph::build(&scenario.packages);
        let plan = build_plan(&graph, &scenario.bumps);

        for (name, change) in &plan.version_changes {
            if !change.breaking {
                continue;
            }
            for package in &scenario.packages {
                let Some(spec) = package.dependencies.get(name) else {
                    continue;
                };
                if !spec.kind.participates_in_publishing() {
                    continue;
                }
                if Range::parse(&spec.range).satisfies(&change.to) {
                    continue;
                }

                let cascaded = plan
                    .breaking_cascades
                    .get(name)
                    .map(|deps| deps.contains(&package.name))
                    .unwrap_or(false);
                prop_assert!(
                    cascaded,
                    "{} breaks {} but no cascade is recorded",
                    name,
                    package.name
                );

                let entry = plan
                    .version_changes
                    .get(&package.name)
                    .expect("cascaded dependent must have a version change");
                if !scenario.bumps.contains_key(&package.name) {
                    prop_assert!(
                        entry.will_generate_changeset(),
                        "{} has no changesets; its entry must be auto-generated",
                        package.name
                    );
                }
            }
        }
    }

    // Property 4: every planned transition is exactly one bump away.
    #[test]
    fn every_version_change_is_a_single_bump(scenario in arb_scenario()) {
        let graph = DependencyGraph::build(&scenario.packages);
        let plan = build_plan(&graph, &scenario.bumps);

        for change in plan.version_changes.values() {
            prop_assert_eq!(&change.to, &bump(&change.from, change.bump_type));
        }
    }

    // Running the planner twice on identical inputs yields deep-equal plans.
    #[test]
    fn planning_is_deterministic(scenario in arb_scenario()) {
        let graph = DependencyGraph::build(&scenario.packages);
        let first = build_plan(&graph, &scenario.bumps);
        let second = build_plan(&graph, &scenario.bumps);
        prop_assert_eq!(first, second);
    }

    // Escalated entries always escalate upward and stay consistent with
    // their recorded bumps.
    #[test]
    fn escalations_only_raise_bumps(scenario in arb_scenario()) {
        let graph = DependencyGraph::build(&scenario.packages);
        let plan = build_plan(&graph, &scenario.bumps);

        for (name, change) in &plan.version_changes {
            if let crate::types::ChangeOrigin::Escalated {
                existing_bump,
                required_bump,
            } = &change.origin
            {
                prop_assert!(required_bump > existing_bump, "escalation for {}", name);
                prop_assert_eq!(change.bump_type, *required_bump);
                prop_assert_eq!(
                    *existing_bump,
                    scenario.bumps[name],
                    "existing bump must match the declared changeset"
                );
            }
        }
    }
}
