//! Synth - Order a construct tree and emit the configuration document
//!
//! Resources are ordered with Kahn's algorithm. Among resources that become
//! ready at the same time the smallest path goes first, so synthesizing an
//! unchanged tree always yields the same document.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use serde::Serialize;
use thiserror::Error;

use crate::graph::{DependencyGraph, GraphError};
use crate::tree::ConstructTree;
use crate::value::{Outputs, ResolveError, Value, resolve};

/// Errors raised during synthesis
#[derive(Debug, Error)]
pub enum SynthError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One resource in the configuration document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRecord {
    pub path: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Attributes with deferred values kept symbolic
    pub attributes: BTreeMap<String, Value>,
    /// Resources this one references, all earlier in the document
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceRecord {
    /// Resolve every attribute against outputs recorded so far
    pub fn resolve_attributes(
        &self,
        outputs: &Outputs,
    ) -> Result<BTreeMap<String, serde_json::Value>, ResolveError> {
        self.attributes
            .iter()
            .map(|(name, value)| Ok((name.clone(), resolve(value, outputs)?)))
            .collect()
    }
}

/// Remote state backend block of the document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendBlock {
    #[serde(rename = "type")]
    pub backend_type: String,
    pub config: BTreeMap<String, Value>,
}

/// Configuration document consumed by the apply engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub version: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub provider: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendBlock>,
    pub resources: Vec<ResourceRecord>,
}

impl Document {
    /// Current document format version
    pub const CURRENT_VERSION: u32 = 1;

    pub fn find(&self, path: &str) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| r.path == path)
    }

    /// Paths in document order
    pub fn paths(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.path.as_str()).collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, SynthError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Order resources so that every resource follows all resources it references
pub fn topological_order(graph: &DependencyGraph) -> Result<Vec<String>, GraphError> {
    let mut in_degree: BTreeMap<&str, usize> = graph
        .paths()
        .map(|path| (path, graph.dependency_targets(path).len()))
        .collect();

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(path, _)| Reverse(*path))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(path)) = ready.pop() {
        order.push(path.to_string());
        for dependent in graph.dependents_of(path) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        // Only reachable with a graph that skipped cycle detection
        let remaining = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(path, _)| path.to_string())
            .collect();
        return Err(GraphError::Cycle { path: remaining });
    }

    Ok(order)
}

/// Synthesize the configuration document for `tree`
pub fn synthesize(tree: &ConstructTree) -> Result<Document, SynthError> {
    let graph = DependencyGraph::build(tree)?;
    let order = topological_order(&graph)?;

    let mut resources = Vec::with_capacity(order.len());
    for path in order {
        let Some(resource) = graph.node_id(&path).and_then(|id| tree.resource(id)) else {
            continue;
        };
        let depends_on = graph
            .dependency_targets(&path)
            .into_iter()
            .map(str::to_string)
            .collect();
        resources.push(ResourceRecord {
            path,
            resource_type: resource.resource_type.clone(),
            attributes: resource.attributes.clone(),
            depends_on,
        });
    }

    log::debug!("Synthesized {} resources", resources.len());

    Ok(Document {
        version: Document::CURRENT_VERSION,
        provider: tree.providers().clone(),
        backend: tree.backend().map(|b| BackendBlock {
            backend_type: b.backend_type.clone(),
            config: b.attributes.clone(),
        }),
        resources,
    })
}
