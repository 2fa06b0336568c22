//! Resolved dependency units.

use serde::{Deserialize, Serialize};

use super::spec::{PipelineSpec, SourceRef};

/// A resolved spec plus its position in the resolution graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyUnit {
    /// Where the spec was fetched from (identity)
    pub source: SourceRef,

    /// The fetched spec
    pub spec: PipelineSpec,

    /// Distance from the root spec (direct dependencies are depth 1)
    pub depth: usize,
}

impl DependencyUnit {
    pub fn new(source: SourceRef, spec: PipelineSpec, depth: usize) -> Self {
        Self {
            source,
            spec,
            depth,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Output of graph resolution: the two ordered unit lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGraph {
    /// Peer dependencies, deduplicated across the whole graph
    pub peers: Vec<DependencyUnit>,

    /// Dependencies in depth-first discovery order
    pub dependencies: Vec<DependencyUnit>,
}

impl ResolvedGraph {
    /// All units in startup order (peers first)
    pub fn startup_order(&self) -> impl Iterator<Item = &DependencyUnit> {
        self.peers.iter().chain(self.dependencies.iter())
    }
}
