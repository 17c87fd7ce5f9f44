//! Dependency graph and static priority assignment
//!
//! A `DependencyGraph` maps every node to the set of nodes it depends on.
//! It backs three different analyses:
//! - the global precedence graph whose topological order becomes reaction priorities
//! - the per-reactor local graph used to validate connections made at runtime
//! - causality interfaces (which inputs of a reactor reach which outputs)
//!
//! All maps are `IndexMap`/`IndexSet` so iteration order follows insertion
//! order, which keeps priority assignment reproducible across runs.

use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::hash::Hash;

/// Default distance between consecutive priorities
pub const DEFAULT_PRIORITY_SPACING: u64 = 100;

/// Why `DependencyGraph::update_priorities` could not order every node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityError {
    /// Some nodes lie on or behind a cycle
    Cycle,
    /// Spacing the nodes apart would exceed `u64::MAX`
    Overflow,
}

/// Directed graph of "depends on" edges
#[derive(Debug, Clone)]
pub struct DependencyGraph<N> {
    adjacency: IndexMap<N, IndexSet<N>>,
}

impl<N> Default for DependencyGraph<N> {
    fn default() -> Self {
        Self {
            adjacency: IndexMap::new(),
        }
    }
}

impl<N: Copy + Eq + Hash> DependencyGraph<N> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node without dependencies (no-op if it exists)
    pub fn add_node(&mut self, node: N) {
        self.adjacency.entry(node).or_default();
    }

    /// Record that `dependent` depends on `dependency`
    ///
    /// Both endpoints become nodes of the graph.
    pub fn add_edge(&mut self, dependent: N, dependency: N) {
        self.add_node(dependency);
        self.adjacency.entry(dependent).or_default().insert(dependency);
    }

    /// Record that `dependent` depends on every node in `dependencies`
    pub fn add_edges(&mut self, dependent: N, dependencies: impl IntoIterator<Item = N>) {
        self.add_node(dependent);
        for dependency in dependencies {
            self.add_edge(dependent, dependency);
        }
    }

    /// Record that every node in `dependents` depends on `dependency`
    pub fn add_back_edges(&mut self, dependency: N, dependents: impl IntoIterator<Item = N>) {
        self.add_node(dependency);
        for dependent in dependents {
            self.add_edge(dependent, dependency);
        }
    }

    /// Remove a single edge, keeping both nodes
    pub fn remove_edge(&mut self, dependent: N, dependency: N) {
        if let Some(deps) = self.adjacency.get_mut(&dependent) {
            deps.shift_remove(&dependency);
        }
    }

    /// Remove a node and every edge that points to it
    pub fn remove_node(&mut self, node: N) {
        self.adjacency.shift_remove(&node);
        for deps in self.adjacency.values_mut() {
            deps.shift_remove(&node);
        }
    }

    /// Union the nodes and edges of `other` into this graph
    pub fn merge(&mut self, other: &DependencyGraph<N>) {
        for (node, deps) in &other.adjacency {
            self.add_edges(*node, deps.iter().copied());
        }
    }

    /// Check if the graph contains `node`
    pub fn contains(&self, node: N) -> bool {
        self.adjacency.contains_key(&node)
    }

    /// Check if `dependent` directly depends on `dependency`
    pub fn has_edge(&self, dependent: N, dependency: N) -> bool {
        self.adjacency
            .get(&dependent)
            .is_some_and(|deps| deps.contains(&dependency))
    }

    /// Direct dependencies of `node`
    pub fn dependencies(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.adjacency
            .get(&node)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.adjacency.keys().copied()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(IndexSet::len).sum()
    }

    /// Nodes that depend on nothing
    pub fn root_nodes(&self) -> IndexSet<N> {
        self.adjacency
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(node, _)| *node)
            .collect()
    }

    /// Nodes that nothing depends on
    pub fn leaf_nodes(&self) -> IndexSet<N> {
        let depended_on: HashSet<N> = self
            .adjacency
            .values()
            .flat_map(|deps| deps.iter().copied())
            .collect();
        self.adjacency
            .keys()
            .filter(|node| !depended_on.contains(node))
            .copied()
            .collect()
    }

    /// Check whether following dependencies can lead back to a visited node
    pub fn has_cycle(&self) -> bool {
        let mut done: HashSet<N> = HashSet::new();
        let mut on_path: HashSet<N> = HashSet::new();

        for &start in self.adjacency.keys() {
            if done.contains(&start) {
                continue;
            }
            // Explicit stack of (node, index of the next dependency to visit)
            let mut stack: Vec<(N, usize)> = vec![(start, 0)];
            on_path.insert(start);

            while let Some((node, next)) = stack.last_mut() {
                let deps = &self.adjacency[&*node];
                if let Some(&dep) = deps.get_index(*next) {
                    *next += 1;
                    if on_path.contains(&dep) {
                        return true;
                    }
                    if !done.contains(&dep) {
                        on_path.insert(dep);
                        stack.push((dep, 0));
                    }
                } else {
                    let finished = *node;
                    on_path.remove(&finished);
                    done.insert(finished);
                    stack.pop();
                }
            }
        }
        false
    }

    /// Members of `origins` reachable from `effect` by following dependencies
    ///
    /// `effect` itself is never part of the result.
    pub fn reachable_origins(&self, effect: N, origins: &IndexSet<N>) -> IndexSet<N> {
        let mut visited: HashSet<N> = HashSet::new();
        let mut found = IndexSet::new();
        let mut stack = vec![effect];
        visited.insert(effect);

        while let Some(node) = stack.pop() {
            for dep in self.dependencies(node) {
                if visited.insert(dep) {
                    if origins.contains(&dep) {
                        found.insert(dep);
                    }
                    stack.push(dep);
                }
            }
        }
        found
    }

    /// Collapse the graph onto the nodes selected by `keep`
    ///
    /// A kept node depends on another kept node if the latter is reachable
    /// through a chain of dropped nodes.
    pub fn collapse(&self, keep: impl Fn(&N) -> bool) -> DependencyGraph<N> {
        let mut collapsed = DependencyGraph::new();
        for &node in self.adjacency.keys().filter(|n| keep(n)) {
            collapsed.add_node(node);
            let mut visited: HashSet<N> = HashSet::new();
            let mut stack: Vec<N> = self.dependencies(node).collect();
            stack.reverse();
            while let Some(dep) = stack.pop() {
                if !visited.insert(dep) {
                    continue;
                }
                if keep(&dep) {
                    collapsed.add_edge(node, dep);
                } else {
                    let before = stack.len();
                    stack.extend(self.dependencies(dep));
                    stack[before..].reverse();
                }
            }
        }
        collapsed
    }

    /// Assign priorities with Kahn's algorithm
    ///
    /// Nodes without remaining dependencies are removed one at a time and
    /// handed to `assign` with priorities `0, spacing, 2 * spacing, ...`.
    /// Fails with `PriorityError::Cycle` if some nodes could not be removed
    /// and with `PriorityError::Overflow` if a priority would exceed
    /// `u64::MAX`. When `destructive` is set the sorted nodes are removed
    /// from the graph; after a cycle the nodes left behind are exactly those
    /// on or behind it.
    pub fn update_priorities(
        &mut self,
        destructive: bool,
        spacing: u64,
        mut assign: impl FnMut(N, u64),
    ) -> Result<(), PriorityError> {
        let mut remaining: HashMap<N, usize> = HashMap::with_capacity(self.adjacency.len());
        let mut dependents: HashMap<N, Vec<N>> = HashMap::new();
        let mut ready: VecDeque<N> = VecDeque::new();
        for (&node, deps) in &self.adjacency {
            if deps.is_empty() {
                ready.push_back(node);
            }
            remaining.insert(node, deps.len());
            for &dep in deps {
                dependents.entry(dep).or_default().push(node);
            }
        }

        let mut sorted: HashSet<N> = HashSet::with_capacity(self.adjacency.len());
        let mut next = Some(0u64);
        let mut overflow = false;
        while let Some(node) = ready.pop_front() {
            let Some(priority) = next else {
                overflow = true;
                break;
            };
            assign(node, priority);
            sorted.insert(node);
            next = priority.checked_add(spacing);
            for dependent in dependents.get(&node).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }

        let complete = sorted.len() == self.adjacency.len();
        if destructive {
            self.adjacency.retain(|node, _| !sorted.contains(node));
            for deps in self.adjacency.values_mut() {
                deps.retain(|dep| !sorted.contains(dep));
            }
        }
        if overflow {
            Err(PriorityError::Overflow)
        } else if complete {
            Ok(())
        } else {
            Err(PriorityError::Cycle)
        }
    }

    /// Render the graph in DOT format; edges point from dependency to dependent
    pub fn to_dot(&self, label: impl Fn(&N) -> String) -> String {
        let index: IndexMap<N, usize> = self
            .adjacency
            .keys()
            .enumerate()
            .map(|(i, n)| (*n, i))
            .collect();
        let mut out = String::from("digraph G {\n");
        for (node, i) in &index {
            let _ = writeln!(out, "    n{} [label=\"{}\"];", i, label(node).replace('"', "\\\""));
        }
        for (node, deps) in &self.adjacency {
            for dep in deps {
                let _ = writeln!(out, "    n{} -> n{};", index[dep], index[node]);
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(len: u32) -> DependencyGraph<u32> {
        let mut graph = DependencyGraph::new();
        graph.add_node(0);
        for i in 1..len {
            graph.add_edge(i, i - 1);
        }
        graph
    }

    #[test]
    fn test_add_edge_creates_both_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(1u32, 2);
        assert!(graph.contains(1));
        assert!(graph.contains(2));
        assert!(graph.has_edge(1, 2));
        assert!(!graph.has_edge(2, 1));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_roots_and_leaves() {
        let graph = chain(3);
        assert_eq!(graph.root_nodes().into_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.leaf_nodes().into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_remove_node_drops_incoming_edges() {
        let mut graph = chain(3);
        graph.remove_node(1);
        assert!(!graph.contains(1));
        assert_eq!(graph.dependencies(2).count(), 0);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_merge_unions_edges() {
        let mut a = DependencyGraph::new();
        a.add_edge(1u32, 0);
        let mut b = DependencyGraph::new();
        b.add_edge(1u32, 2);
        b.add_edge(3, 1);
        a.merge(&b);
        assert!(a.has_edge(1, 0));
        assert!(a.has_edge(1, 2));
        assert!(a.has_edge(3, 1));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_has_cycle() {
        let mut graph = chain(4);
        assert!(!graph.has_cycle());
        graph.add_edge(0, 3);
        assert!(graph.has_cycle());

        let mut self_loop = DependencyGraph::new();
        self_loop.add_edge(7u32, 7);
        assert!(self_loop.has_cycle());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(3u32, 1);
        graph.add_edge(3, 2);
        graph.add_edge(1, 0);
        graph.add_edge(2, 0);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_reachable_origins_excludes_start() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(10u32, 5);
        graph.add_edge(5, 1);
        graph.add_edge(5, 2);
        graph.add_edge(1, 10);
        let origins: IndexSet<u32> = [1, 2, 10].into_iter().collect();
        let found = graph.reachable_origins(10, &origins);
        assert!(found.contains(&1));
        assert!(found.contains(&2));
        assert!(!found.contains(&10));
    }

    #[test]
    fn test_update_priorities_spacing() {
        let mut graph = chain(3);
        let mut priorities = Vec::new();
        let sorted = graph.update_priorities(false, DEFAULT_PRIORITY_SPACING, |n, p| {
            priorities.push((n, p))
        });
        assert_eq!(sorted, Ok(()));
        assert_eq!(priorities, vec![(0, 0), (1, 100), (2, 200)]);
        // Non-destructive sorting keeps the graph
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_update_priorities_detects_cycle() {
        let mut graph = chain(3);
        graph.add_edge(1, 2);
        let mut assigned = Vec::new();
        let sorted = graph.update_priorities(true, 10, |n, _| assigned.push(n));
        assert_eq!(sorted, Err(PriorityError::Cycle));
        assert_eq!(assigned, vec![0]);
        // Destructive sorting leaves only the unsortable remainder
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_update_priorities_rejects_overflowing_spacing() {
        let spacing = u64::MAX / 2 + 1;
        let mut priorities = Vec::new();
        let sorted = chain(2).update_priorities(false, spacing, |n, p| priorities.push((n, p)));
        assert_eq!(sorted, Ok(()));
        assert_eq!(priorities, vec![(0, 0), (1, spacing)]);

        let mut graph = chain(4);
        let mut priorities = Vec::new();
        let sorted = graph.update_priorities(false, spacing, |n, p| priorities.push((n, p)));
        assert_eq!(sorted, Err(PriorityError::Overflow));
        // Every priority handed out is still strictly increasing
        assert_eq!(priorities, vec![(0, 0), (1, spacing)]);

        assert_eq!(chain(2).update_priorities(false, u64::MAX, |_, _| {}), Ok(()));
        assert_eq!(
            chain(3).update_priorities(false, u64::MAX, |_, _| {}),
            Err(PriorityError::Overflow)
        );
    }

    #[test]
    fn test_update_priorities_keeps_insertion_order_among_ready_nodes() {
        // 3 and 1 both wait on 0; 3 was inserted first
        let mut graph = DependencyGraph::new();
        graph.add_node(0u32);
        graph.add_edge(3, 0);
        graph.add_edge(1, 0);
        graph.add_edge(2, 1);
        graph.add_edge(2, 3);
        let mut order = Vec::new();
        let sorted = graph.update_priorities(true, 1, |n, _| order.push(n));
        assert_eq!(sorted, Ok(()));
        assert_eq!(order, vec![0, 3, 1, 2]);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_collapse_skips_intermediate_nodes() {
        // Even numbers are reactions, odd numbers are ports
        let mut graph = DependencyGraph::new();
        graph.add_edge(1u32, 0); // port 1 written by reaction 0
        graph.add_edge(3, 1); // port 3 receives from port 1
        graph.add_edge(4, 3); // reaction 4 reads port 3
        graph.add_edge(6, 4);
        let collapsed = graph.collapse(|n| n % 2 == 0);
        assert_eq!(collapsed.len(), 3);
        assert!(collapsed.has_edge(4, 0));
        assert!(collapsed.has_edge(6, 4));
        assert!(!collapsed.has_edge(6, 0));
    }

    #[test]
    fn test_to_dot() {
        let dot = chain(2).to_dot(|n| format!("r{}", n));
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("n0 [label=\"r0\"];"));
        assert!(dot.contains("n0 -> n1;"));
    }

    proptest! {
        #[test]
        fn prop_priorities_respect_edges_and_repeat(edges in prop::collection::vec((0u32..20, 0u32..20), 0..60)) {
            // Orient every edge from higher to lower id so the graph is acyclic
            let mut graph = DependencyGraph::new();
            for (a, b) in edges {
                if a > b {
                    graph.add_edge(a, b);
                } else if b > a {
                    graph.add_edge(b, a);
                }
            }
            let mut first = IndexMap::new();
            let sorted = graph.update_priorities(false, 100, |n, p| {
                first.insert(n, p);
            });
            prop_assert_eq!(sorted, Ok(()));
            let mut second = IndexMap::new();
            let sorted = graph.update_priorities(false, 100, |n, p| {
                second.insert(n, p);
            });
            prop_assert_eq!(sorted, Ok(()));
            prop_assert_eq!(&first, &second);
            for node in graph.nodes() {
                for dep in graph.dependencies(node) {
                    prop_assert!(first[&dep] < first[&node]);
                }
            }
        }
    }
}
