//! Dependency ordering for service initialization.
//!
//! Produces a linear initialization order from named services and their
//! declared dependencies using a depth-first topological sort. Services are
//! pre-sorted by priority (stable, so registration order breaks ties), which
//! makes the resulting order deterministic across runs.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::definition::DEFAULT_PRIORITY;
use crate::error::{LifecycleError, LifecycleResult};
use crate::graph::DependencyGraph;

/// Maximum dependency chain depth accepted at registration.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// The resolver's view of a service: its name, dependencies and priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub name: String,
    pub dependencies: Vec<String>,
    pub priority: i32,
}

impl ServiceNode {
    pub fn new<I, S>(name: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Topological sort and validation over service dependency graphs.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{DependencyResolver, ServiceNode};
///
/// let nodes = vec![
///     ServiceNode::new("api", ["db", "cache"]),
///     ServiceNode::new("cache", Vec::<String>::new()),
///     ServiceNode::new("db", Vec::<String>::new()),
/// ];
///
/// let order = DependencyResolver::new().resolve_initialization_order(&nodes).unwrap();
/// assert_eq!(order.last().map(String::as_str), Some("api"));
/// ```
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    max_depth: usize,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Orders services so that each appears after all of its dependencies.
    ///
    /// `nodes` is expected in registration order. Dependencies on names that
    /// are not in `nodes` are logged and skipped; wiring them fails later at
    /// initialization time.
    ///
    /// # Errors
    ///
    /// Returns `CircularDependency` with the cycle's path if the graph is not
    /// acyclic. No partial order is returned in that case.
    pub fn resolve_initialization_order(&self, nodes: &[ServiceNode]) -> LifecycleResult<Vec<String>> {
        let index: HashMap<&str, &ServiceNode> =
            nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut sorted: Vec<&ServiceNode> = nodes.iter().collect();
        sorted.sort_by_key(|n| n.priority);

        let mut walk = Walk {
            index: &index,
            visiting: Vec::new(),
            visited: HashSet::with_capacity(nodes.len()),
            order: Vec::with_capacity(nodes.len()),
        };

        for node in sorted {
            walk.visit(node.name.as_str())?;
        }

        Ok(walk.order)
    }

    /// Validates the dependency list of `name` before it is registered.
    ///
    /// `known` holds the services registered so far; the depth check follows
    /// chains through them.
    ///
    /// # Errors
    ///
    /// `SelfDependency` if `name` lists itself, `DepthExceeded` if the longest
    /// chain below `name` is deeper than the configured maximum.
    pub fn validate_dependencies(
        &self,
        name: &str,
        dependencies: &[String],
        known: &[ServiceNode],
    ) -> LifecycleResult<()> {
        if dependencies.iter().any(|d| d == name) {
            return Err(LifecycleError::SelfDependency(name.to_string()));
        }

        let index: HashMap<&str, &ServiceNode> =
            known.iter().map(|n| (n.name.as_str(), n)).collect();
        let mut seen = HashSet::new();
        seen.insert(name);
        let mut memo = HashMap::new();

        let depth = dependencies
            .iter()
            .map(|d| 1 + chain_depth(d, &index, &mut seen, &mut memo))
            .max()
            .unwrap_or(0);

        if depth > self.max_depth {
            return Err(LifecycleError::DepthExceeded {
                service: name.to_string(),
                depth,
                max: self.max_depth,
            });
        }
        Ok(())
    }

    /// Adjacency and reverse-adjacency view for diagnostics.
    pub fn dependency_graph(&self, nodes: &[ServiceNode]) -> DependencyGraph {
        DependencyGraph::from_nodes(nodes)
    }
}

struct Walk<'a> {
    index: &'a HashMap<&'a str, &'a ServiceNode>,
    visiting: Vec<&'a str>,
    visited: HashSet<&'a str>,
    order: Vec<String>,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, name: &'a str) -> LifecycleResult<()> {
        if self.visited.contains(name) {
            return Ok(());
        }

        if let Some(pos) = self.visiting.iter().position(|n| *n == name) {
            let mut path: Vec<String> = self.visiting[pos..].iter().map(|s| s.to_string()).collect();
            path.push(name.to_string());
            return Err(LifecycleError::CircularDependency(path));
        }

        let Some(node) = self.index.get(name).copied() else {
            return Ok(());
        };

        self.visiting.push(name);
        for dep in &node.dependencies {
            if !self.index.contains_key(dep.as_str()) {
                warn!(service = %name, dependency = %dep, "dependency is not registered");
                continue;
            }
            self.visit(dep.as_str())?;
        }
        self.visiting.pop();

        self.visited.insert(name);
        self.order.push(name.to_string());
        Ok(())
    }
}

/// Longest edge count below `name`, memoized per node. Revisits along the
/// current path count as zero; cycles are reported by the sort, not here.
fn chain_depth<'a>(
    name: &'a str,
    index: &HashMap<&'a str, &'a ServiceNode>,
    path: &mut HashSet<&'a str>,
    memo: &mut HashMap<&'a str, usize>,
) -> usize {
    if let Some(&depth) = memo.get(name) {
        return depth;
    }
    if !path.insert(name) {
        return 0;
    }
    let depth = match index.get(name).copied() {
        Some(node) => node
            .dependencies
            .iter()
            .map(|d| 1 + chain_depth(d.as_str(), index, path, memo))
            .max()
            .unwrap_or(0),
        None => 0,
    };
    path.remove(name);
    memo.insert(name, depth);
    depth
}
