//! Pointer-flow graph.
//!
//! A directed graph over canonical pointers. An edge `s -> t` asserts that
//! everything `s` may point to also flows into `t`. Edge insertion is
//! idempotent and reports newness; the solver enqueues a snapshot of the
//! source's points-to set exactly when an edge is new.

use rustc_hash::{FxHashMap, FxHashSet};

use super::elements::PointerId;

/// Directed graph over pointers.
#[derive(Debug, Default)]
pub struct PointerFlowGraph {
    edges: FxHashSet<(PointerId, PointerId)>,
    succs: FxHashMap<PointerId, Vec<PointerId>>,
}

impl PointerFlowGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edge `source -> target`. Returns `true` iff the edge is new.
    pub fn add_edge(&mut self, source: PointerId, target: PointerId) -> bool {
        if self.edges.insert((source, target)) {
            self.succs.entry(source).or_default().push(target);
            true
        } else {
            false
        }
    }

    /// Successors of a pointer, in insertion order.
    #[must_use]
    pub fn succs_of(&self, pointer: PointerId) -> &[PointerId] {
        self.succs.get(&pointer).map_or(&[], Vec::as_slice)
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All edges.
    pub fn edges(&self) -> impl Iterator<Item = (PointerId, PointerId)> + '_ {
        self.edges.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_idempotent() {
        let mut pfg = PointerFlowGraph::new();
        assert!(pfg.add_edge(PointerId(0), PointerId(1)));
        assert!(!pfg.add_edge(PointerId(0), PointerId(1)));
        assert!(pfg.add_edge(PointerId(1), PointerId(0)));
        assert_eq!(pfg.edge_count(), 2);
        assert_eq!(pfg.succs_of(PointerId(0)), &[PointerId(1)]);
        assert!(pfg.succs_of(PointerId(2)).is_empty());
    }
}
