//! Dependency graph construction and ordering.
//!
//! Builds the graph implied by instance references and orders it with
//! Kahn's algorithm. Ties between ready instances are broken by declaration
//! order so that the same topology always yields the same order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use tracing::debug;

use crate::error::ConfigError;

use super::instance::DeploymentInstance;

/// An ordered dependency graph over declared nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Node names in declaration order.
    names: Vec<String>,
    /// For each node, the indices of the nodes it depends on.
    dependencies: Vec<Vec<usize>>,
    /// Topological order as node indices.
    order: Vec<usize>,
    /// Nodes grouped by depth; every dependency lies in an earlier wave.
    waves: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph for a set of instances.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unknown references or cycles.
    pub fn build(instances: &[DeploymentInstance]) -> Result<Self, ConfigError> {
        let nodes: Vec<(&str, Vec<&str>)> = instances
            .iter()
            .map(|i| (i.name.as_str(), i.dependencies()))
            .collect();
        Self::from_edges(&nodes)
    }

    /// Builds the graph from `(name, dependencies)` pairs in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unknown references or cycles.
    pub fn from_edges<S: AsRef<str>>(nodes: &[(S, Vec<S>)]) -> Result<Self, ConfigError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, (name, _)) in nodes.iter().enumerate() {
            if index.insert(name.as_ref(), i).is_some() {
                return Err(ConfigError::DuplicateInstance {
                    name: name.as_ref().to_string(),
                });
            }
        }

        let mut dependencies = Vec::with_capacity(nodes.len());
        for (name, deps) in nodes {
            let mut resolved = Vec::with_capacity(deps.len());
            for dep in deps {
                let Some(&target) = index.get(dep.as_ref()) else {
                    return Err(ConfigError::UnknownReference {
                        instance: name.as_ref().to_string(),
                        target: dep.as_ref().to_string(),
                    });
                };
                if !resolved.contains(&target) {
                    resolved.push(target);
                }
            }
            dependencies.push(resolved);
        }

        let names: Vec<String> = nodes.iter().map(|(n, _)| n.as_ref().to_string()).collect();
        let order = topological_order(&names, &dependencies)?;
        let waves = compute_waves(&order, &dependencies);

        debug!(
            "Dependency graph: {} nodes, {} waves",
            names.len(),
            waves.len()
        );

        Ok(Self {
            names,
            dependencies,
            order,
            waves,
        })
    }

    /// Returns node names in topological order.
    #[must_use]
    pub fn ordered_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Returns the topological order as declaration indices.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Returns the waves as declaration indices.
    #[must_use]
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// Returns the name of a node by declaration index.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Returns the names of the nodes a node depends on.
    #[must_use]
    pub fn dependencies_of(&self, index: usize) -> Vec<&str> {
        self.dependencies[index]
            .iter()
            .map(|&d| self.names[d].as_str())
            .collect()
    }

    /// Returns the indices of the nodes that depend on a node.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.dependencies
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&index))
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Kahn's algorithm with a min-heap over declaration index.
fn topological_order(names: &[String], dependencies: &[Vec<usize>]) -> Result<Vec<usize>, ConfigError> {
    let n = names.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < n {
        let cyclic: BTreeSet<usize> = (0..n).filter(|i| in_degree[*i] > 0).collect();
        let cycle = cyclic
            .iter()
            .map(|&i| names[i].as_str())
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(ConfigError::CircularDependency { cycle });
    }

    Ok(order)
}

/// Groups nodes by longest dependency chain length.
fn compute_waves(order: &[usize], dependencies: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut depth = vec![0usize; dependencies.len()];
    let mut waves: Vec<Vec<usize>> = Vec::new();

    for &node in order {
        let level = dependencies[node]
            .iter()
            .map(|&d| depth[d] + 1)
            .max()
            .unwrap_or(0);
        depth[node] = level;
        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(node);
    }

    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[(&str, &[&str])]) -> Result<DependencyGraph, ConfigError> {
        let owned: Vec<(&str, Vec<&str>)> = nodes.iter().map(|(n, d)| (*n, d.to_vec())).collect();
        DependencyGraph::from_edges(&owned)
    }

    fn position(order: &[&str], name: &str) -> usize {
        order.iter().position(|n| *n == name).expect("node should be ordered")
    }

    #[test]
    fn test_fixed_topology_order() {
        let g = graph(&[
            ("bucket", &[]),
            ("role", &[]),
            ("function", &["role", "bucket"]),
            ("table", &[]),
            ("subscription", &["function"]),
        ])
        .expect("graph should build");

        assert_eq!(
            g.ordered_names(),
            vec!["bucket", "role", "function", "table", "subscription"]
        );
        assert_eq!(g.waves(), &[vec![0, 1, 3], vec![2], vec![4]]);
    }

    #[test]
    fn test_every_node_after_its_dependencies() {
        let nodes: &[(&str, &[&str])] = &[
            ("e", &["d", "b"]),
            ("a", &[]),
            ("d", &["c"]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("f", &[]),
        ];
        let g = graph(nodes).expect("graph should build");
        let order = g.ordered_names();

        for (name, deps) in nodes {
            for dep in *deps {
                assert!(position(&order, dep) < position(&order, name), "{dep} before {name}");
            }
        }
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let g = graph(&[("z", &[]), ("y", &[]), ("x", &[])]).expect("graph should build");
        assert_eq!(g.ordered_names(), vec!["z", "y", "x"]);
        assert_eq!(g.waves().len(), 1);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]).unwrap_err();
        match err {
            ConfigError::CircularDependency { cycle } => {
                assert!(cycle.contains('a') && cycle.contains('b') && cycle.contains('c'));
                assert!(!cycle.contains('d'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = graph(&[("a", &["a"])]).unwrap_err();
        assert!(matches!(err, ConfigError::CircularDependency { .. }));
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let err = graph(&[("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownReference { ref target, .. } if target == "ghost"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let err = graph(&[("a", &[]), ("a", &[])]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateInstance { .. }));
    }

    #[test]
    fn test_dependents_of() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"])]).expect("graph should build");
        assert_eq!(g.dependents_of(0), vec![1, 2]);
        assert_eq!(g.dependencies_of(1), vec!["a"]);
    }
}
