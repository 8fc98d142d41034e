//! The sibling dependency graph.
//!
//! Vertices are stored by name in a map and reference each other by name
//! only; reverse `dependents` edges are computed when the graph is built.
//! Every order-producing operation breaks ties lexicographically so plans
//! and diagnostics are reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use semver::Version;

use crate::types::{DependencySpec, DependencyType, Package};

/// A graph vertex. Sibling dependencies are the edges; declared dependencies
/// that do not match a sibling are retained on the vertex but create none.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub name: String,
    pub version: Version,
    pub publishable: bool,
    /// Outgoing sibling edges, keyed by target name.
    pub dependencies: BTreeMap<String, DependencySpec>,
    /// Declared dependencies outside the sibling set.
    pub external: BTreeMap<String, DependencySpec>,
    /// Incoming edges, keyed by dependent name.
    pub dependents: BTreeMap<String, DependencyType>,
}

/// Topological sort failure: the vertices that could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortFailure {
    pub unsorted: Vec<String>,
}

/// Cycles classified by the edge set that sustains them.
///
/// Production cycles survive on prod/peer edges alone and are fatal for
/// planning. Development cycles disappear once development edges are removed
/// and only warrant a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleAnalysis {
    pub production: Vec<Vec<String>>,
    pub development: Vec<Vec<String>>,
}

impl CycleAnalysis {
    pub fn has_production_cycles(&self) -> bool {
        !self.production.is_empty()
    }
}

/// Render a closed cycle sequence for diagnostics.
pub fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    /// Build the graph from loaded package descriptors. Dependencies whose
    /// name matches a sibling become edges labelled with their declared type;
    /// everything else lands in `external`.
    pub fn build(packages: &[Package]) -> Self {
        let names: BTreeSet<&str> = packages.iter().map(|p| p.name.as_str()).collect();

        let mut nodes: BTreeMap<String, DependencyNode> = BTreeMap::new();
        for pkg in packages {
            let mut dependencies = BTreeMap::new();
            let mut external = BTreeMap::new();
            for (dep_name, spec) in &pkg.dependencies {
                if names.contains(dep_name.as_str()) && dep_name != &pkg.name {
                    dependencies.insert(dep_name.clone(), spec.clone());
                } else {
                    external.insert(dep_name.clone(), spec.clone());
                }
            }
            nodes.insert(
                pkg.name.clone(),
                DependencyNode {
                    name: pkg.name.clone(),
                    version: pkg.version.clone(),
                    publishable: pkg.publishable,
                    dependencies,
                    external,
                    dependents: BTreeMap::new(),
                },
            );
        }

        // Reverse edges in a second pass; vertices only ever name each other.
        let edges: Vec<(String, String, DependencyType)> = nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .map(|(dep, spec)| (dep.clone(), node.name.clone(), spec.kind))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (target, dependent, kind) in edges {
            if let Some(node) = nodes.get_mut(&target) {
                node.dependents.insert(dependent, kind);
            }
        }

        Self { nodes }
    }

    pub fn node(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm. Ready vertices drain in lexicographic order: the
    /// seed set is sorted, and vertices freed by the same removal join the
    /// queue in sorted batches.
    ///
    /// With `exclude_development` the development edges are removed before
    /// sorting, which is how legitimate dev cycles are tolerated.
    pub fn topological_sort(
        &self,
        exclude_development: bool,
    ) -> Result<Vec<String>, SortFailure> {
        let considered =
            |kind: DependencyType| !exclude_development || kind.participates_in_publishing();

        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        for node in self.nodes.values() {
            let count = node
                .dependencies
                .values()
                .filter(|spec| considered(spec.kind))
                .count();
            indegree.insert(node.name.as_str(), count);
        }

        // BTreeMap iteration yields the seed already sorted by name.
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut out: Vec<String> = Vec::with_capacity(self.nodes.len());
        while let Some(name) = queue.pop_front() {
            out.push(name.to_string());
            let node = &self.nodes[name];
            // Dependents iterate in name order, so each freed batch is
            // appended lexicographically.
            for (dependent, kind) in &node.dependents {
                if !considered(*kind) {
                    continue;
                }
                let deg = indegree
                    .get_mut(dependent.as_str())
                    .expect("dependent must be a vertex");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent.as_str());
                }
            }
        }

        if out.len() != self.nodes.len() {
            let unsorted = indegree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(name, _)| (*name).to_string())
                .collect();
            return Err(SortFailure { unsorted });
        }

        Ok(out)
    }

    /// Detect and classify cycles: once over the full edge set, once
    /// restricted to prod/peer edges. Cycles found only in the full set are
    /// development cycles.
    pub fn cycles(&self) -> CycleAnalysis {
        let raw = self.find_cycles(|_| true);
        let production = self.find_cycles(DependencyType::participates_in_publishing);

        let production_set: BTreeSet<&Vec<String>> = production.iter().collect();
        let development = raw
            .iter()
            .filter(|cycle| !production_set.contains(cycle))
            .cloned()
            .collect();

        CycleAnalysis {
            production,
            development,
        }
    }

    /// Iterative DFS with colouring over the filtered edge set. Every back
    /// edge yields a closed cycle, normalised so the lexicographically
    /// smallest vertex comes first with rotation preserved.
    fn find_cycles<F>(&self, include: F) -> Vec<Vec<String>>
    where
        F: Fn(DependencyType) -> bool,
    {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let neighbors = |name: &str| -> Vec<String> {
            self.nodes[name]
                .dependencies
                .iter()
                .filter(|(_, spec)| include(spec.kind))
                .map(|(dep, _)| dep.clone())
                .collect()
        };

        let mut color: BTreeMap<&str, u8> =
            self.nodes.keys().map(|n| (n.as_str(), WHITE)).collect();
        let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();

        for start in self.nodes.keys() {
            if color[start.as_str()] != WHITE {
                continue;
            }

            let mut stack: Vec<(String, Vec<String>, usize)> =
                vec![(start.clone(), neighbors(start), 0)];
            let mut path: Vec<String> = vec![start.clone()];
            color.insert(self.key(start), GRAY);

            loop {
                let next = {
                    let Some((_, succ, idx)) = stack.last_mut() else {
                        break;
                    };
                    if *idx < succ.len() {
                        let next = succ[*idx].clone();
                        *idx += 1;
                        Some(next)
                    } else {
                        None
                    }
                };

                match next {
                    Some(next) => match color[next.as_str()] {
                        WHITE => {
                            color.insert(self.key(&next), GRAY);
                            path.push(next.clone());
                            let next_succ = neighbors(&next);
                            stack.push((next, next_succ, 0));
                        }
                        GRAY => {
                            let pos = path
                                .iter()
                                .position(|n| n == &next)
                                .expect("gray vertex must be on the path");
                            let mut cycle: Vec<String> = path[pos..].to_vec();
                            cycle.push(next);
                            cycles.insert(normalize_cycle(cycle));
                        }
                        _ => {}
                    },
                    None => {
                        let (finished, _, _) = stack.pop().expect("frame exists");
                        color.insert(self.key(&finished), BLACK);
                        path.pop();
                    }
                }
            }
        }

        cycles.into_iter().collect()
    }

    /// Borrow the canonical key string owned by the node map, so the colour
    /// map never outlives its vertices.
    fn key(&self, name: &str) -> &str {
        self.nodes
            .get_key_value(name)
            .map(|(k, _)| k.as_str())
            .expect("vertex must exist")
    }
}

/// Rotate a closed cycle so the smallest vertex leads, preserving rotation.
fn normalize_cycle(mut cycle: Vec<String>) -> Vec<String> {
    cycle.pop();
    let min_idx = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle.rotate_left(min_idx);
    let first = cycle[0].clone();
    cycle.push(first);
    cycle
}
