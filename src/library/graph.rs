//! Dependency graph over library assets.
//!
//! Tracks which assets depend on which other assets so bundles can pull in
//! what their roots reference and the grouper can walk reachable payloads.

use std::collections::{HashMap, HashSet, VecDeque};

/// A dependency graph keyed by asset uuid.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Adjacency list: asset -> assets it depends on, in declaration order.
    dependencies: HashMap<String, Vec<String>>,

    /// Reverse adjacency list: asset -> assets that depend on it.
    dependents: HashMap<String, HashSet<String>>,

    /// All known assets (including those with no dependencies).
    assets: HashSet<String>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset in the graph (even if it has no dependencies).
    pub fn register(&mut self, uuid: impl Into<String>) {
        self.assets.insert(uuid.into());
    }

    /// Add a dependency: `from` depends on `to`.
    ///
    /// Only `from` is registered; `to` may be missing from the library.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.assets.insert(from.to_string());

        let deps = self.dependencies.entry(from.to_string()).or_default();
        if !deps.iter().any(|d| d == to) {
            deps.push(to.to_string());
        }

        self.dependents
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    /// Get all assets that `uuid` depends on (direct dependencies).
    pub fn dependencies_of(&self, uuid: &str) -> impl Iterator<Item = &String> {
        self.dependencies.get(uuid).into_iter().flatten()
    }

    /// Get all assets that depend on `uuid` (direct dependents).
    pub fn dependents_of(&self, uuid: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(uuid).into_iter().flatten()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.assets.contains(uuid)
    }

    /// Get the total number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Breadth-first walk from `root` over dependencies.
    ///
    /// Every node is visited once, `root` first. A node failing `filter`
    /// is neither returned nor expanded (the root is always expanded).
    pub fn reachable_from<F>(&self, root: &str, mut filter: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut result = Vec::new();

        visited.insert(root);
        queue.push_back(root);

        while let Some(uuid) = queue.pop_front() {
            let keep = filter(uuid);
            if !keep && uuid != root {
                continue;
            }
            if keep {
                result.push(uuid.to_string());
            }

            for dep in self.dependencies_of(uuid) {
                if visited.insert(dep.as_str()) {
                    queue.push_back(dep.as_str());
                }
            }
        }

        result
    }

    /// Dependencies that point at assets the graph does not know.
    pub fn missing_dependencies(&self) -> Vec<(String, String)> {
        let mut missing: Vec<(String, String)> = self
            .dependencies
            .iter()
            .flat_map(|(from, deps)| {
                deps.iter()
                    .filter(|d| !self.assets.contains(*d))
                    .map(move |d| (from.clone(), d.clone()))
            })
            .collect();
        missing.sort();
        missing
    }
}
