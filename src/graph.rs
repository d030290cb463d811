//! Dependency graph diagnostics and export.
//!
//! A read-only snapshot of the registered services' dependency edges, both
//! directions, for status pages and debugging. Exports to JSON and Graphviz
//! DOT, plus YAML for config-style dumps.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{LifecycleError, LifecycleResult};
use crate::resolver::ServiceNode;

/// Adjacency (service -> its dependencies) and reverse adjacency
/// (service -> services that depend on it).
///
/// Dependencies on unregistered names are kept in `missing` rather than in
/// the adjacency maps.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{DependencyGraph, ServiceNode};
///
/// let graph = DependencyGraph::from_nodes(&[
///     ServiceNode::new("db", Vec::<String>::new()),
///     ServiceNode::new("permits", ["db"]),
///     ServiceNode::new("api", ["permits"]),
/// ]);
///
/// assert_eq!(graph.roots(), vec!["db"]);
/// assert_eq!(graph.transitive_dependents("db"), vec!["api", "permits"]);
/// assert!(graph.to_dot().contains("\"api\" -> \"permits\""));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyGraph {
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    pub dependents: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn from_nodes(nodes: &[ServiceNode]) -> Self {
        let mut graph = DependencyGraph::default();
        for node in nodes {
            graph.dependencies.entry(node.name.clone()).or_default();
            graph.dependents.entry(node.name.clone()).or_default();
        }
        for node in nodes {
            for dep in &node.dependencies {
                if graph.dependencies.contains_key(dep) {
                    graph
                        .dependencies
                        .entry(node.name.clone())
                        .or_default()
                        .insert(dep.clone());
                    graph
                        .dependents
                        .entry(dep.clone())
                        .or_default()
                        .insert(node.name.clone());
                } else {
                    graph
                        .missing
                        .entry(node.name.clone())
                        .or_default()
                        .insert(dep.clone());
                }
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Services with no dependencies.
    pub fn roots(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Services nothing depends on.
    pub fn leaves(&self) -> Vec<&str> {
        self.dependents
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Every service that depends on `name`, directly or not, sorted.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            if let Some(direct) = self.dependents.get(current) {
                for dependent in direct {
                    if dependent != name && seen.insert(dependent.as_str()) {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    pub fn to_json(&self) -> LifecycleResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LifecycleError::Config(format!("graph serialization failed: {}", e)))
    }

    pub fn to_yaml(&self) -> LifecycleResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LifecycleError::Config(format!("graph serialization failed: {}", e)))
    }

    /// Graphviz DOT, edges pointing from a service to its dependencies.
    /// Missing dependencies are drawn dashed in red.
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph ServiceDependencies {\n");
        output.push_str("  rankdir=BT;\n");
        output.push_str("  node [shape=box];\n\n");

        for name in self.dependencies.keys() {
            output.push_str(&format!("  \"{}\";\n", name));
        }
        output.push('\n');

        for (name, deps) in &self.dependencies {
            for dep in deps {
                output.push_str(&format!("  \"{}\" -> \"{}\";\n", name, dep));
            }
        }
        for (name, deps) in &self.missing {
            for dep in deps {
                output.push_str(&format!(
                    "  \"{}\" -> \"{}\" [style=dashed, color=red];\n",
                    name, dep
                ));
            }
        }

        output.push_str("}\n");
        output
    }
}
