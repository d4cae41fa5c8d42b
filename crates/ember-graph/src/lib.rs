// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content hashing and the reverse-dependency DAG.
//!
//! Answers "what needs to rebuild?" for a changed path: [`DependencyGraph`]
//! tracks modules and source units as nodes, [`DependencyGraph::add_module`]
//! rejects additions that would close a cycle, and
//! [`DependencyGraph::compute_rebuild_set`] expands a changed path through
//! reverse edges into a topologically ordered (leaves-first) rebuild plan.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::multiple_crate_versions
)]

mod hashing;

pub use hashing::hash_file;

use std::path::PathBuf;

use ember_core::ModuleId;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Errors raised by [`DependencyGraph`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Adding this module/dependency edge would close a cycle.
    #[error("module {module} would close a dependency cycle")]
    CircularDependency {
        /// The module whose addition was rejected.
        module: ModuleId,
    },
    /// A referenced dependency id has no corresponding node.
    #[error("unknown module {0}")]
    UnknownModule(ModuleId),
    /// The on-disk dependency-graph snapshot could not be encoded or decoded.
    #[error("graph snapshot codec error: {0}")]
    Snapshot(String),
}

/// One node in the dependency graph: a module plus the source paths whose
/// content contributes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphNode {
    sources: Vec<PathBuf>,
    deps: Vec<ModuleId>,
    content_hash: ember_core::Hash32,
}

/// Directed acyclic graph on modules and the source paths that feed them.
///
/// Invariant: `compute_rebuild_set` is transitively closed under
/// reverse edges; `dependency_hash` is deterministic and position-independent
/// across runs given identical inputs.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: FxHashMap<ModuleId, GraphNode>,
    /// Reverse index: source path -> modules whose `sources` contain it.
    by_source: FxHashMap<PathBuf, Vec<ModuleId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `module`, depending on `deps`, built from `sources`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CircularDependency`] if any edge `module -> dep`
    /// would create a cycle (checked before any mutation, via DFS
    /// white/grey/black coloring over the graph as it would look after the
    /// insertion).
    pub fn add_module(
        &mut self,
        module: ModuleId,
        sources: Vec<PathBuf>,
        deps: Vec<ModuleId>,
        content_hash: ember_core::Hash32,
    ) -> Result<(), GraphError> {
        self.check_no_cycle(module, &deps)?;

        for src in &sources {
            self.by_source.entry(src.clone()).or_default().push(module);
        }
        self.nodes.insert(
            module,
            GraphNode {
                sources,
                deps,
                content_hash,
            },
        );
        Ok(())
    }

    /// DFS white/grey/black coloring: would adding edges `module -> deps[..]`
    /// close a cycle, considering the graph as it stands today (module's
    /// previous entry, if any, is treated as absent for this check so
    /// re-registering a module with new deps is checked against the fresh
    /// edge set, not stale ones).
    fn check_no_cycle(&self, module: ModuleId, deps: &[ModuleId]) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Grey,
            Black,
        }

        let mut color: FxHashMap<ModuleId, Color> = FxHashMap::default();

        fn visit(
            node: ModuleId,
            module: ModuleId,
            deps_override: &[ModuleId],
            graph: &FxHashMap<ModuleId, GraphNode>,
            color: &mut FxHashMap<ModuleId, Color>,
        ) -> bool {
            match color.get(&node) {
                Some(Color::Black) => return false,
                Some(Color::Grey) => return true,
                _ => {}
            }
            color.insert(node, Color::Grey);

            let children: Vec<ModuleId> = if node == module {
                deps_override.to_vec()
            } else {
                graph
                    .get(&node)
                    .map(|n| n.deps.clone())
                    .unwrap_or_default()
            };

            for child in children {
                if visit(child, module, deps_override, graph, color) {
                    return true;
                }
            }
            color.insert(node, Color::Black);
            false
        }

        if visit(module, module, deps, &self.nodes, &mut color) {
            return Err(GraphError::CircularDependency { module });
        }
        Ok(())
    }

    /// Computes the minimum rebuild set triggered by a change to `changed_path`.
    ///
    /// Seeds are modules whose `sources` contain `changed_path`; the set is
    /// expanded via reverse edges (a module depending on a seed must also
    /// rebuild) and returned in topological order, leaves first.
    #[must_use]
    pub fn compute_rebuild_set(&self, changed_path: &std::path::Path) -> Vec<ModuleId> {
        let mut seeds: Vec<ModuleId> = self
            .by_source
            .get(changed_path)
            .cloned()
            .unwrap_or_default();
        seeds.sort_unstable_by_key(|m| m.0);
        seeds.dedup();

        let mut affected: FxHashSet<ModuleId> = seeds.iter().copied().collect();
        let mut frontier = seeds;
        while let Some(m) = frontier.pop() {
            for (&candidate, node) in &self.nodes {
                if node.deps.contains(&m) && affected.insert(candidate) {
                    frontier.push(candidate);
                }
            }
        }

        self.topological_order(&affected)
    }

    /// Topologically sorts `subset` (leaves first) via iterative DFS
    /// post-order, restricted to edges whose target is also in `subset`.
    fn topological_order(&self, subset: &FxHashSet<ModuleId>) -> Vec<ModuleId> {
        let mut visited: FxHashSet<ModuleId> = FxHashSet::default();
        let mut order: Vec<ModuleId> = Vec::with_capacity(subset.len());

        let mut ids: Vec<ModuleId> = subset.iter().copied().collect();
        ids.sort_unstable_by_key(|m| m.0);

        for start in ids {
            if visited.contains(&start) {
                continue;
            }
            // Iterative post-order DFS: (node, child-iter-index).
            let mut stack: Vec<(ModuleId, usize)> = vec![(start, 0)];
            visited.insert(start);
            while let Some(&mut (node, ref mut idx)) = stack.last_mut() {
                let children: Vec<ModuleId> = self
                    .nodes
                    .get(&node)
                    .map(|n| n.deps.iter().copied().filter(|d| subset.contains(d)).collect())
                    .unwrap_or_default();
                if *idx < children.len() {
                    let child = children[*idx];
                    *idx += 1;
                    if visited.insert(child) {
                        stack.push((child, 0));
                    }
                } else {
                    order.push(node);
                    stack.pop();
                }
            }
        }
        order
    }

    /// The dependencies registered for `module`, or an empty slice if it is
    /// unknown (a rebuild set produced by [`Self::compute_rebuild_set`]
    /// never names a module that wasn't added).
    #[must_use]
    pub fn deps_of(&self, module: ModuleId) -> &[ModuleId] {
        self.nodes.get(&module).map_or(&[], |node| node.deps.as_slice())
    }

    /// Deterministic hash of `(content_hash(module)) || sorted(dependency_hash(children))`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownModule`] if `module` was never added.
    pub fn dependency_hash(&self, module: ModuleId) -> Result<ember_core::Hash32, GraphError> {
        let mut cache = FxHashMap::default();
        self.dependency_hash_inner(module, &mut cache)
    }

    fn dependency_hash_inner(
        &self,
        module: ModuleId,
        cache: &mut FxHashMap<ModuleId, ember_core::Hash32>,
    ) -> Result<ember_core::Hash32, GraphError> {
        if let Some(h) = cache.get(&module) {
            return Ok(*h);
        }
        let node = self.nodes.get(&module).ok_or(GraphError::UnknownModule(module))?;

        let mut child_hashes = Vec::with_capacity(node.deps.len());
        for &dep in &node.deps {
            child_hashes.push(self.dependency_hash_inner(dep, cache)?);
        }
        child_hashes.sort_unstable();

        let mut buf = Vec::with_capacity(32 + child_hashes.len() * 32);
        buf.extend_from_slice(node.content_hash.as_bytes());
        for h in &child_hashes {
            buf.extend_from_slice(h.as_bytes());
        }
        let hash = ember_core::Hash32::of(&buf);
        cache.insert(module, hash);
        Ok(hash)
    }

    /// Encodes the graph to its canonical on-disk snapshot form: nodes sorted
    /// by id, CBOR-packed, for the dependency-graph cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Snapshot`] if CBOR encoding fails.
    pub fn to_snapshot_bytes(&self) -> Result<Vec<u8>, GraphError> {
        let mut entries: Vec<(ModuleId, &GraphNode)> =
            self.nodes.iter().map(|(m, n)| (*m, n)).collect();
        entries.sort_unstable_by_key(|(module, _)| module.0);

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&entries, &mut bytes)
            .map_err(|err| GraphError::Snapshot(err.to_string()))?;
        Ok(bytes)
    }

    /// Rebuilds a graph from bytes produced by [`Self::to_snapshot_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Snapshot`] if CBOR decoding fails.
    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        let entries: Vec<(ModuleId, GraphNode)> =
            ciborium::de::from_reader(bytes).map_err(|err| GraphError::Snapshot(err.to_string()))?;

        let mut nodes = FxHashMap::default();
        let mut by_source: FxHashMap<PathBuf, Vec<ModuleId>> = FxHashMap::default();
        for (module, node) in entries {
            for src in &node.sources {
                by_source.entry(src.clone()).or_default().push(module);
            }
            nodes.insert(module, node);
        }
        Ok(Self { nodes, by_source })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn h(byte: u8) -> ember_core::Hash32 {
        let mut bytes = [0u8; 32];
        bytes[0] = byte;
        ember_core::Hash32(bytes)
    }

    #[test]
    fn rejects_direct_cycle() {
        let mut g = DependencyGraph::new();
        g.add_module(ModuleId(1), vec![], vec![], h(1)).unwrap();
        let err = g.add_module(ModuleId(1), vec![], vec![ModuleId(1)], h(1));
        assert!(matches!(err, Err(GraphError::CircularDependency { .. })));
    }

    #[test]
    fn rejects_transitive_cycle() {
        let mut g = DependencyGraph::new();
        g.add_module(ModuleId(1), vec![], vec![ModuleId(2)], h(1)).unwrap();
        g.add_module(ModuleId(2), vec![], vec![ModuleId(3)], h(2)).unwrap();
        let err = g.add_module(ModuleId(3), vec![], vec![ModuleId(1)], h(3));
        assert!(matches!(err, Err(GraphError::CircularDependency { .. })));
    }

    #[test]
    fn rebuild_set_expands_through_reverse_edges_leaves_first() {
        let mut g = DependencyGraph::new();
        let path_a = PathBuf::from("a.src");
        // renderer depends on core; core's source is a.src.
        g.add_module(ModuleId(1), vec![path_a.clone()], vec![], h(1)).unwrap();
        g.add_module(ModuleId(2), vec![], vec![ModuleId(1)], h(2)).unwrap();
        g.add_module(ModuleId(3), vec![], vec![ModuleId(2)], h(3)).unwrap();

        let set = g.compute_rebuild_set(&path_a);
        assert_eq!(set, vec![ModuleId(1), ModuleId(2), ModuleId(3)]);
    }

    #[test]
    fn rebuild_set_is_empty_for_untouched_path() {
        let mut g = DependencyGraph::new();
        g.add_module(ModuleId(1), vec![PathBuf::from("a.src")], vec![], h(1)).unwrap();
        assert!(g.compute_rebuild_set(&PathBuf::from("b.src")).is_empty());
    }

    #[test]
    fn rebuild_set_has_no_repeats_under_diamond_dependency() {
        let mut g = DependencyGraph::new();
        let path_a = PathBuf::from("a.src");
        g.add_module(ModuleId(1), vec![path_a.clone()], vec![], h(1)).unwrap();
        g.add_module(ModuleId(2), vec![], vec![ModuleId(1)], h(2)).unwrap();
        g.add_module(ModuleId(3), vec![], vec![ModuleId(1)], h(3)).unwrap();
        g.add_module(ModuleId(4), vec![], vec![ModuleId(2), ModuleId(3)], h(4)).unwrap();

        let set = g.compute_rebuild_set(&path_a);
        let mut sorted = set.clone();
        sorted.sort_unstable_by_key(|m| m.0);
        sorted.dedup();
        assert_eq!(set.len(), sorted.len(), "no repeats allowed");
        // module 1 (the leaf/seed) must precede its dependents.
        let pos = |id: u32| set.iter().position(|m| m.0 == id).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(4));
        assert!(pos(3) < pos(4));
    }

    #[test]
    fn dependency_hash_is_deterministic_and_order_independent() {
        let mut g1 = DependencyGraph::new();
        g1.add_module(ModuleId(1), vec![], vec![], h(10)).unwrap();
        g1.add_module(ModuleId(2), vec![], vec![], h(20)).unwrap();
        g1.add_module(ModuleId(3), vec![], vec![ModuleId(1), ModuleId(2)], h(30)).unwrap();

        let mut g2 = DependencyGraph::new();
        g2.add_module(ModuleId(2), vec![], vec![], h(20)).unwrap();
        g2.add_module(ModuleId(1), vec![], vec![], h(10)).unwrap();
        g2.add_module(ModuleId(3), vec![], vec![ModuleId(2), ModuleId(1)], h(30)).unwrap();

        assert_eq!(
            g1.dependency_hash(ModuleId(3)).unwrap(),
            g2.dependency_hash(ModuleId(3)).unwrap(),
            "dependency_hash must not depend on child insertion/listing order"
        );
    }

    #[test]
    fn dependency_hash_changes_when_content_changes() {
        let mut g = DependencyGraph::new();
        g.add_module(ModuleId(1), vec![], vec![], h(1)).unwrap();
        let before = g.dependency_hash(ModuleId(1)).unwrap();
        g.add_module(ModuleId(1), vec![], vec![], h(2)).unwrap();
        let after = g.dependency_hash(ModuleId(1)).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn unknown_module_hash_is_an_error() {
        let g = DependencyGraph::new();
        assert_eq!(
            g.dependency_hash(ModuleId(99)),
            Err(GraphError::UnknownModule(ModuleId(99)))
        );
    }

    #[test]
    fn deps_of_reports_registered_dependencies() {
        let mut g = DependencyGraph::new();
        g.add_module(ModuleId(1), vec![], vec![], h(1)).unwrap();
        g.add_module(ModuleId(2), vec![], vec![ModuleId(1)], h(2)).unwrap();
        assert_eq!(g.deps_of(ModuleId(2)), &[ModuleId(1)]);
    }

    #[test]
    fn deps_of_unknown_module_is_empty() {
        let g = DependencyGraph::new();
        assert!(g.deps_of(ModuleId(99)).is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_cbor() {
        let mut g = DependencyGraph::new();
        let path_a = PathBuf::from("a.src");
        g.add_module(ModuleId(1), vec![path_a.clone()], vec![], h(1)).unwrap();
        g.add_module(ModuleId(2), vec![], vec![ModuleId(1)], h(2)).unwrap();

        let bytes = g.to_snapshot_bytes().unwrap();
        let restored = DependencyGraph::from_snapshot_bytes(&bytes).unwrap();

        assert_eq!(restored.deps_of(ModuleId(2)), &[ModuleId(1)]);
        assert_eq!(restored.compute_rebuild_set(&path_a), vec![ModuleId(1), ModuleId(2)]);
        assert_eq!(
            restored.dependency_hash(ModuleId(2)).unwrap(),
            g.dependency_hash(ModuleId(2)).unwrap()
        );
    }

    #[test]
    fn snapshot_bytes_reject_garbage() {
        assert!(matches!(
            DependencyGraph::from_snapshot_bytes(b"not cbor"),
            Err(GraphError::Snapshot(_))
        ));
    }

    proptest! {
        #[test]
        fn dependency_hash_ignores_leaf_insertion_order(
            leaf_seeds in prop::collection::vec(any::<u8>(), 3),
            parent_seed in any::<u8>(),
            permutation in prop::sample::select(vec![
                [0usize, 1, 2],
                [2, 1, 0],
                [1, 2, 0],
                [2, 0, 1],
            ]),
        ) {
            let leaves = [ModuleId(1), ModuleId(2), ModuleId(3)];

            let mut forward = DependencyGraph::new();
            for (i, &leaf) in leaves.iter().enumerate() {
                forward.add_module(leaf, vec![], vec![], h(leaf_seeds[i])).unwrap();
            }
            forward
                .add_module(ModuleId(4), vec![], leaves.to_vec(), h(parent_seed))
                .unwrap();

            let mut shuffled = DependencyGraph::new();
            for &i in &permutation {
                shuffled.add_module(leaves[i], vec![], vec![], h(leaf_seeds[i])).unwrap();
            }
            shuffled
                .add_module(
                    ModuleId(4),
                    vec![],
                    permutation.iter().map(|&i| leaves[i]).collect(),
                    h(parent_seed),
                )
                .unwrap();

            prop_assert_eq!(
                forward.dependency_hash(ModuleId(4)).unwrap(),
                shuffled.dependency_hash(ModuleId(4)).unwrap()
            );
        }
    }
}
