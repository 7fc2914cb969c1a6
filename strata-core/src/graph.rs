//! Graph - Dependency analysis between declared resources
//!
//! A resource depends on every resource it references. The graph is derived
//! from the construct tree on demand and never stored.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use thiserror::Error;

use crate::tree::{ConstructTree, NodeId};

/// Errors raised while building the dependency graph
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Resources reference each other in a loop. `path` lists every resource
    /// in the loop once, each one referencing the next.
    #[error("Cyclic dependency: {}", format_cycle(.path))]
    Cycle { path: Vec<String> },

    #[error("Resource '{from}' references '{target}' in attribute '{attribute}', but no such resource is declared")]
    DanglingReference {
        from: String,
        attribute: String,
        target: String,
    },

    #[error("Resource '{from}' references attribute '{attribute}' of '{target}' ({resource_type}), which does not exist")]
    UnknownAttribute {
        from: String,
        target: String,
        resource_type: String,
        attribute: String,
    },
}

fn format_cycle(path: &[String]) -> String {
    let mut parts: Vec<&str> = path.iter().map(String::as_str).collect();
    if let Some(first) = path.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

/// Dependency between resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Path of the referenced resource
    pub target: String,
    /// Referenced attribute (e.g., "arn")
    pub attribute: String,
    /// Attribute of the dependent resource holding the reference
    pub used_in: String,
}

/// Dependency graph over the live resources of a construct tree
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Every resource path, including those without edges
    nodes: BTreeMap<String, NodeId>,
    /// Resource path -> what it references
    edges: BTreeMap<String, Vec<Dependency>>,
    /// Referenced path -> resources referencing it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph for every live resource in `tree`
    ///
    /// Fails on references to resources that are not in the tree, on
    /// references to attributes the target's schema does not declare, and on
    /// cycles.
    pub fn build(tree: &ConstructTree) -> Result<Self, GraphError> {
        let mut graph = Self::default();

        for (id, _) in tree.nodes() {
            if let Some(path) = tree.path(id) {
                graph.nodes.insert(path, id);
            }
        }

        for (path, id) in &graph.nodes.clone() {
            let Some(resource) = tree.resource(*id) else {
                continue;
            };

            for (used_in, reference) in resource.references() {
                let target = graph.nodes.get(&reference.target).and_then(|t| tree.resource(*t));
                let Some(target_resource) = target else {
                    return Err(GraphError::DanglingReference {
                        from: path.clone(),
                        attribute: used_in.to_string(),
                        target: reference.target.clone(),
                    });
                };

                if let Some(schema) = tree.schemas().get(&target_resource.resource_type)
                    && !schema.is_referenceable(&reference.attribute)
                {
                    return Err(GraphError::UnknownAttribute {
                        from: path.clone(),
                        target: reference.target.clone(),
                        resource_type: target_resource.resource_type.clone(),
                        attribute: reference.attribute.clone(),
                    });
                }

                graph.add_edge(
                    path.clone(),
                    Dependency {
                        target: reference.target.clone(),
                        attribute: reference.attribute.clone(),
                        used_in: used_in.to_string(),
                    },
                );
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::Cycle { path: cycle });
        }

        log::debug!(
            "Built dependency graph: {} resources, {} edges",
            graph.nodes.len(),
            graph.edges.values().map(Vec::len).sum::<usize>()
        );
        Ok(graph)
    }

    /// Add a dependency edge
    pub fn add_edge(&mut self, from: String, dependency: Dependency) {
        let target = dependency.target.clone();
        let deps = self.edges.entry(from.clone()).or_default();
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
        self.reverse_edges.entry(target).or_default().insert(from);
    }

    /// All resource paths in ascending order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn node_id(&self, path: &str) -> Option<NodeId> {
        self.nodes.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, resource: &str) -> &[Dependency] {
        self.edges.get(resource).map_or(&[], |v| v.as_slice())
    }

    /// Distinct resources a resource references, in ascending order
    pub fn dependency_targets(&self, resource: &str) -> BTreeSet<&str> {
        self.dependencies_of(resource)
            .iter()
            .map(|d| d.target.as_str())
            .collect()
    }

    /// Get resources that depend on this resource
    pub fn dependents_of(&self, resource: &str) -> impl Iterator<Item = &str> {
        self.reverse_edges
            .get(resource)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Resources that reference nothing
    pub fn roots(&self) -> Vec<&str> {
        self.paths()
            .filter(|p| self.dependencies_of(p).is_empty())
            .collect()
    }

    /// Find a cycle, returning the resources on it
    ///
    /// Depth-first search from every resource in path order. A reference to a
    /// resource still in progress closes a loop; the loop is the tail of the
    /// current trail starting at that resource.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();
        let mut trail = Vec::new();

        for node in self.nodes.keys() {
            if let Some(cycle) =
                self.find_cycle_from(node, &mut visited, &mut in_progress, &mut trail)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_from<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
        trail: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if in_progress.contains(node) {
            let start = trail.iter().position(|n| *n == node).unwrap_or(0);
            return Some(trail[start..].iter().map(|n| n.to_string()).collect());
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node);
        in_progress.insert(node);
        trail.push(node);

        for dep in self.dependencies_of(node) {
            if let Some(cycle) = self.find_cycle_from(&dep.target, visited, in_progress, trail) {
                return Some(cycle);
            }
        }

        trail.pop();
        in_progress.remove(node);
        None
    }
}
