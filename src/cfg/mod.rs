//! Per-method control-flow graphs.
//!
//! Nodes are the method's statements plus synthetic entry and exit markers.
//! Edges carry the classification the dead-code detector relies on: branch
//! edges are labelled taken/not-taken, switch edges carry their case value,
//! and fall-through/jump/return edges are distinguished from each other.
//!
//! Since control transfers in the IR reference explicit statement positions,
//! the CFG is derived from the statement list alone; unreachable statements
//! still receive nodes (the dead-code analysis depends on seeing them).

use serde::{Deserialize, Serialize};

use crate::ir::{MethodId, Program, Stmt, StmtId};

/// Index of a node within one method's CFG.
pub type NodeIdx = usize;

/// A node in a method CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfgNode {
    /// Synthetic method entry.
    Entry,
    /// Synthetic method exit.
    Exit,
    /// A statement of the method body.
    Stmt(StmtId),
}

/// Classification of a CFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfgEdgeKind {
    /// Entry marker to the first statement.
    Entry,
    /// Sequential flow to the next statement.
    Fallthrough,
    /// Unconditional jump.
    Goto,
    /// Branch taken (condition non-zero).
    IfTrue,
    /// Branch not taken (condition zero).
    IfFalse,
    /// Switch edge for the given case value.
    SwitchCase(i32),
    /// Switch edge taken when no case matches.
    SwitchDefault,
    /// Return to the synthetic exit.
    Return,
}

/// A directed, classified CFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub source: NodeIdx,
    pub target: NodeIdx,
    pub kind: CfgEdgeKind,
}

/// Control-flow graph of one method.
#[derive(Debug)]
pub struct Cfg {
    /// The method this graph belongs to.
    pub method: MethodId,
    nodes: Vec<CfgNode>,
    out_edges: Vec<Vec<CfgEdge>>,
    in_edges: Vec<Vec<CfgEdge>>,
}

/// Node index of the synthetic entry.
pub const ENTRY: NodeIdx = 0;
/// Node index of the synthetic exit.
pub const EXIT: NodeIdx = 1;

impl Cfg {
    /// Build the CFG of a method.
    #[must_use]
    pub fn build(program: &Program, method: MethodId) -> Self {
        let stmts = &program.method(method).stmts;
        let n = stmts.len();
        let mut nodes = Vec::with_capacity(n + 2);
        nodes.push(CfgNode::Entry);
        nodes.push(CfgNode::Exit);
        nodes.extend(stmts.iter().map(|&s| CfgNode::Stmt(s)));

        let stmt_node = |index: usize| -> NodeIdx { index + 2 };
        let next_node = |index: usize| -> NodeIdx {
            if index + 1 < n {
                stmt_node(index + 1)
            } else {
                EXIT
            }
        };

        let mut cfg = Self {
            method,
            nodes,
            out_edges: vec![Vec::new(); n + 2],
            in_edges: vec![Vec::new(); n + 2],
        };

        let first = if n > 0 { stmt_node(0) } else { EXIT };
        cfg.add_edge(ENTRY, first, CfgEdgeKind::Entry);

        for (index, &stmt) in stmts.iter().enumerate() {
            let source = stmt_node(index);
            // Clone the statement kind to release the borrow on the program.
            match program.stmt(stmt).kind.clone() {
                Stmt::Goto { target } => cfg.add_edge(source, stmt_node(target), CfgEdgeKind::Goto),
                Stmt::If { target, .. } => {
                    cfg.add_edge(source, stmt_node(target), CfgEdgeKind::IfTrue);
                    cfg.add_edge(source, next_node(index), CfgEdgeKind::IfFalse);
                }
                Stmt::Switch { cases, default, .. } => {
                    for (value, target) in cases {
                        cfg.add_edge(source, stmt_node(target), CfgEdgeKind::SwitchCase(value));
                    }
                    cfg.add_edge(source, stmt_node(default), CfgEdgeKind::SwitchDefault);
                }
                Stmt::Return { .. } => cfg.add_edge(source, EXIT, CfgEdgeKind::Return),
                _ => cfg.add_edge(source, next_node(index), CfgEdgeKind::Fallthrough),
            }
        }

        cfg
    }

    fn add_edge(&mut self, source: NodeIdx, target: NodeIdx, kind: CfgEdgeKind) {
        let edge = CfgEdge {
            source,
            target,
            kind,
        };
        self.out_edges[source].push(edge);
        self.in_edges[target].push(edge);
    }

    /// Number of nodes, including entry and exit.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node payload by index.
    #[inline]
    #[must_use]
    pub fn node(&self, idx: NodeIdx) -> CfgNode {
        self.nodes[idx]
    }

    /// CFG node index of the statement at the given position in the method.
    #[inline]
    #[must_use]
    pub fn node_of_index(&self, stmt_index: usize) -> NodeIdx {
        stmt_index + 2
    }

    /// Outgoing edges of a node.
    #[must_use]
    pub fn out_edges_of(&self, idx: NodeIdx) -> &[CfgEdge] {
        &self.out_edges[idx]
    }

    /// Incoming edges of a node.
    #[must_use]
    pub fn in_edges_of(&self, idx: NodeIdx) -> &[CfgEdge] {
        &self.in_edges[idx]
    }

    /// Successor node indexes of a node.
    pub fn succs_of(&self, idx: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        self.out_edges[idx].iter().map(|e| e.target)
    }

    /// Predecessor node indexes of a node.
    pub fn preds_of(&self, idx: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        self.in_edges[idx].iter().map(|e| e.source)
    }

    /// All node indexes.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIdx> {
        0..self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;
    use crate::ir::{Exp, PrimType};

    #[test]
    fn test_linear_flow() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.const_assign(x, 1);
        m.const_assign(x, 2);
        m.ret(None);
        let main = m.build();
        let program = b.entry(main).build();

        let cfg = Cfg::build(&program, main);
        assert_eq!(cfg.node_count(), 5);
        assert_eq!(cfg.succs_of(ENTRY).collect::<Vec<_>>(), vec![2]);
        assert_eq!(cfg.succs_of(2).collect::<Vec<_>>(), vec![3]);
        // Return flows to exit.
        assert_eq!(cfg.succs_of(4).collect::<Vec<_>>(), vec![EXIT]);
        assert!(cfg.succs_of(EXIT).next().is_none());
    }

    #[test]
    fn test_branch_edges_classified() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.const_assign(x, 1);
        let branch = m.if_(Exp::Var(x));
        m.const_assign(x, 2); // not taken
        let taken = m.const_assign(x, 3);
        m.patch_if(branch, taken);
        m.ret(None);
        let main = m.build();
        let program = b.entry(main).build();

        let cfg = Cfg::build(&program, main);
        let branch_node = cfg.node_of_index(program.stmt(branch).index);
        let kinds: Vec<CfgEdgeKind> = cfg
            .out_edges_of(branch_node)
            .iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&CfgEdgeKind::IfTrue));
        assert!(kinds.contains(&CfgEdgeKind::IfFalse));
    }

    #[test]
    fn test_empty_method_entry_to_exit() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let mut m = b.method(object, "empty", "void empty()");
        m.set_static();
        let main = m.build();
        let program = b.entry(main).build();

        let cfg = Cfg::build(&program, main);
        assert_eq!(cfg.node_count(), 2);
        assert_eq!(cfg.succs_of(ENTRY).collect::<Vec<_>>(), vec![EXIT]);
    }

    #[test]
    fn test_switch_edges_carry_case_values() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.const_assign(x, 1);
        let sw = m.switch(x);
        let case1 = m.const_assign(x, 10);
        let case2 = m.const_assign(x, 20);
        let dflt = m.const_assign(x, 30);
        m.patch_switch(sw, vec![(1, case1), (2, case2)], dflt);
        m.ret(None);
        let main = m.build();
        let program = b.entry(main).build();

        let cfg = Cfg::build(&program, main);
        let sw_node = cfg.node_of_index(program.stmt(sw).index);
        let kinds: Vec<CfgEdgeKind> = cfg.out_edges_of(sw_node).iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&CfgEdgeKind::SwitchCase(1)));
        assert!(kinds.contains(&CfgEdgeKind::SwitchCase(2)));
        assert!(kinds.contains(&CfgEdgeKind::SwitchDefault));
    }
}
