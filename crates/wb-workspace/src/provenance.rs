//! Provenance graph of workspace artifacts
//!
//! Edges run parent -> child. Heads are artifacts nothing derives from yet.

use crate::error::WorkspaceError;
use parking_lot::RwLock;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use wb_artifact::{ArtifactHandle, ContentHash};

/// Directed acyclic graph over artifact hashes
#[derive(Debug, Default)]
pub struct ProvenanceGraph {
    inner: RwLock<DiGraphMap<ContentHash, ()>>,
}

impl ProvenanceGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored artifacts in any order
    ///
    /// # Errors
    /// `Cycle` if the handles' parent edges are cyclic
    pub fn from_handles<'a>(
        handles: impl IntoIterator<Item = &'a ArtifactHandle>,
    ) -> Result<Self, WorkspaceError> {
        let mut g = DiGraphMap::new();
        for handle in handles {
            g.add_node(handle.hash);
            for parent in &handle.parents {
                g.add_edge(*parent, handle.hash, ());
            }
        }
        if let Err(cycle) = toposort(&g, None) {
            return Err(WorkspaceError::Cycle(cycle.node_id()));
        }
        Ok(Self {
            inner: RwLock::new(g),
        })
    }

    /// Insert an artifact with edges from each parent
    ///
    /// A node seen for the first time cannot close a cycle, so the reachability
    /// check only runs when `hash` is already present.
    ///
    /// # Errors
    /// `Cycle` if any parent is reachable from `hash`; the graph is unchanged
    pub fn add_artifact(&self, hash: ContentHash, parents: &[ContentHash]) -> Result<(), WorkspaceError> {
        let mut g = self.inner.write();
        if parents.contains(&hash) {
            return Err(WorkspaceError::Cycle(hash));
        }
        if g.contains_node(hash) {
            for parent in parents {
                if g.contains_node(*parent) && has_path_connecting(&*g, hash, *parent, None) {
                    return Err(WorkspaceError::Cycle(hash));
                }
            }
        }
        g.add_node(hash);
        for parent in parents {
            g.add_edge(*parent, hash, ());
        }
        Ok(())
    }

    /// Merge stored artifacts the graph has not seen, returning how many
    /// nodes were added
    ///
    /// # Errors
    /// `Cycle` if the merged edges would be cyclic; the graph is unchanged
    pub fn absorb<'a>(
        &self,
        handles: impl IntoIterator<Item = &'a ArtifactHandle>,
    ) -> Result<usize, WorkspaceError> {
        let mut g = self.inner.write();
        let mut merged = g.clone();
        let mut added = 0;
        for handle in handles {
            if merged.contains_node(handle.hash) {
                continue;
            }
            added += 1;
            merged.add_node(handle.hash);
            for parent in &handle.parents {
                merged.add_edge(*parent, handle.hash, ());
            }
        }
        if added == 0 {
            return Ok(0);
        }
        if let Err(cycle) = toposort(&merged, None) {
            return Err(WorkspaceError::Cycle(cycle.node_id()));
        }
        *g = merged;
        Ok(added)
    }

    /// Drop an artifact and its edges
    pub fn remove(&self, hash: &ContentHash) -> bool {
        self.inner.write().remove_node(*hash)
    }

    #[must_use]
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.inner.read().contains_node(*hash)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_count()
    }

    /// Artifacts with no children, sorted
    #[must_use]
    pub fn heads(&self) -> Vec<ContentHash> {
        self.boundary(Direction::Outgoing)
    }

    /// Artifacts with no parents, sorted
    #[must_use]
    pub fn roots(&self) -> Vec<ContentHash> {
        self.boundary(Direction::Incoming)
    }

    fn boundary(&self, dir: Direction) -> Vec<ContentHash> {
        let g = self.inner.read();
        let mut out: Vec<_> = g
            .nodes()
            .filter(|n| g.neighbors_directed(*n, dir).next().is_none())
            .collect();
        out.sort();
        out
    }

    #[must_use]
    pub fn parents(&self, hash: &ContentHash) -> Vec<ContentHash> {
        self.inner
            .read()
            .neighbors_directed(*hash, Direction::Incoming)
            .collect()
    }

    #[must_use]
    pub fn children(&self, hash: &ContentHash) -> Vec<ContentHash> {
        self.inner
            .read()
            .neighbors_directed(*hash, Direction::Outgoing)
            .collect()
    }

    /// Parents before children
    ///
    /// # Errors
    /// `Cycle` if the graph is cyclic, which insertion prevents
    pub fn topological_order(&self) -> Result<Vec<ContentHash>, WorkspaceError> {
        let g = self.inner.read();
        toposort(&*g, None).map_err(|cycle| WorkspaceError::Cycle(cycle.node_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> ContentHash {
        ContentHash::compute(s.as_bytes())
    }

    #[test]
    fn heads_and_roots() {
        let g = ProvenanceGraph::new();
        g.add_artifact(h("a"), &[]).unwrap();
        g.add_artifact(h("b"), &[h("a")]).unwrap();
        g.add_artifact(h("c"), &[h("a")]).unwrap();

        let mut heads = vec![h("b"), h("c")];
        heads.sort();
        assert_eq!(g.heads(), heads);
        assert_eq!(g.roots(), vec![h("a")]);
        assert_eq!(g.children(&h("a")).len(), 2);

        let order = g.topological_order().unwrap();
        assert_eq!(order[0], h("a"));
    }

    #[test]
    fn cycle_is_rejected_and_rolled_back() {
        let g = ProvenanceGraph::new();
        g.add_artifact(h("a"), &[]).unwrap();
        g.add_artifact(h("b"), &[h("a")]).unwrap();

        assert!(matches!(
            g.add_artifact(h("a"), &[h("b")]),
            Err(WorkspaceError::Cycle(_))
        ));
        assert!(matches!(
            g.add_artifact(h("a"), &[h("a")]),
            Err(WorkspaceError::Cycle(_))
        ));
        assert_eq!(g.edge_count(), 1);
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn removal_promotes_parents_to_heads() {
        let g = ProvenanceGraph::new();
        g.add_artifact(h("a"), &[]).unwrap();
        g.add_artifact(h("b"), &[h("a")]).unwrap();
        assert!(g.remove(&h("b")));
        assert_eq!(g.heads(), vec![h("a")]);
    }
}
