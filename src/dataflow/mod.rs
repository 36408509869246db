//! Dataflow analyses over method CFGs and the whole-program ICFG.
//!
//! [`DataflowResult`] stores one in-fact and one out-fact per CFG node. The
//! intra-procedural solvers here drive any analysis expressed as a node
//! transfer plus a meet; constant propagation and live variables provide the
//! two instantiations the engine ships.

pub mod constant_propagation;
pub mod dead_code;
pub mod inter;
pub mod live_variables;

use crate::cfg::{Cfg, NodeIdx};

/// In/out facts per node of one graph.
#[derive(Debug, Clone)]
pub struct DataflowResult<F> {
    in_facts: Vec<F>,
    out_facts: Vec<F>,
}

impl<F: Clone> DataflowResult<F> {
    /// Create a result with every fact initialized to `initial`.
    #[must_use]
    pub fn new(node_count: usize, initial: F) -> Self {
        Self {
            in_facts: vec![initial.clone(); node_count],
            out_facts: vec![initial; node_count],
        }
    }

    /// In-fact of a node.
    #[inline]
    #[must_use]
    pub fn in_fact(&self, node: NodeIdx) -> &F {
        &self.in_facts[node]
    }

    /// Out-fact of a node.
    #[inline]
    #[must_use]
    pub fn out_fact(&self, node: NodeIdx) -> &F {
        &self.out_facts[node]
    }

    /// Replace the in-fact of a node.
    pub fn set_in_fact(&mut self, node: NodeIdx, fact: F) {
        self.in_facts[node] = fact;
    }

    /// Replace the out-fact of a node.
    pub fn set_out_fact(&mut self, node: NodeIdx, fact: F) {
        self.out_facts[node] = fact;
    }

    /// Mutable out-fact of a node.
    pub fn out_fact_mut(&mut self, node: NodeIdx) -> &mut F {
        &mut self.out_facts[node]
    }

    /// Number of nodes covered.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.in_facts.len()
    }
}

/// A forward intra-procedural analysis: boundary fact at the entry, meet
/// over predecessor out-facts, then a node transfer that reports change.
pub trait ForwardAnalysis {
    /// The fact lattice element.
    type Fact: Clone + PartialEq;

    /// Fact holding at the method entry.
    fn boundary_fact(&self, cfg: &Cfg) -> Self::Fact;

    /// The initial (bottom) fact for every other node.
    fn initial_fact(&self) -> Self::Fact;

    /// Meet `fact` into `target`.
    fn meet_into(&self, fact: &Self::Fact, target: &mut Self::Fact);

    /// Apply the node transfer; returns `true` iff `out` changed.
    fn transfer_node(&mut self, cfg: &Cfg, node: NodeIdx, input: &Self::Fact, out: &mut Self::Fact)
        -> bool;
}

/// Run a forward analysis over a CFG with a FIFO work list.
pub fn solve_forward<A: ForwardAnalysis>(analysis: &mut A, cfg: &Cfg) -> DataflowResult<A::Fact> {
    let mut result = DataflowResult::new(cfg.node_count(), analysis.initial_fact());
    result.set_out_fact(crate::cfg::ENTRY, analysis.boundary_fact(cfg));

    let mut worklist: std::collections::VecDeque<NodeIdx> =
        cfg.node_indices().filter(|&n| n != crate::cfg::ENTRY).collect();

    while let Some(node) = worklist.pop_front() {
        let mut input = result.in_fact(node).clone();
        for pred in cfg.preds_of(node) {
            analysis.meet_into(result.out_fact(pred), &mut input);
        }
        result.set_in_fact(node, input.clone());

        let mut out = result.out_fact(node).clone();
        if analysis.transfer_node(cfg, node, &input, &mut out) {
            result.set_out_fact(node, out);
            for succ in cfg.succs_of(node) {
                if !worklist.contains(&succ) {
                    worklist.push_back(succ);
                }
            }
        }
    }
    result
}

/// A backward intra-procedural analysis: facts flow from successors' in-facts
/// into a node's out-fact, then through the node transfer.
pub trait BackwardAnalysis {
    /// The fact lattice element.
    type Fact: Clone + PartialEq;

    /// Fact holding at the method exit.
    fn boundary_fact(&self, cfg: &Cfg) -> Self::Fact;

    /// The initial (bottom) fact for every other node.
    fn initial_fact(&self) -> Self::Fact;

    /// Meet `fact` into `target`.
    fn meet_into(&self, fact: &Self::Fact, target: &mut Self::Fact);

    /// Apply the node transfer; returns `true` iff `input` changed.
    fn transfer_node(
        &mut self,
        cfg: &Cfg,
        node: NodeIdx,
        out: &Self::Fact,
        input: &mut Self::Fact,
    ) -> bool;
}

/// Run a backward analysis over a CFG with a FIFO work list.
pub fn solve_backward<A: BackwardAnalysis>(analysis: &mut A, cfg: &Cfg) -> DataflowResult<A::Fact> {
    let mut result = DataflowResult::new(cfg.node_count(), analysis.initial_fact());
    result.set_in_fact(crate::cfg::EXIT, analysis.boundary_fact(cfg));

    let mut worklist: std::collections::VecDeque<NodeIdx> =
        cfg.node_indices().filter(|&n| n != crate::cfg::EXIT).collect();

    while let Some(node) = worklist.pop_front() {
        let mut out = result.out_fact(node).clone();
        for succ in cfg.succs_of(node) {
            analysis.meet_into(result.in_fact(succ), &mut out);
        }
        result.set_out_fact(node, out.clone());

        let mut input = result.in_fact(node).clone();
        if analysis.transfer_node(cfg, node, &out, &mut input) {
            result.set_in_fact(node, input);
            for pred in cfg.preds_of(node) {
                if !worklist.contains(&pred) {
                    worklist.push_back(pred);
                }
            }
        }
    }
    result
}
