//! Dead-code detection.
//!
//! Three passes over each method CFG, all driven by explicit-stack DFS:
//!
//! 1. **Unreachable code**: anything not visited from the entry.
//! 2. **Unreachable branches**: the DFS honors statically decided
//!    conditions: a constant `if` condition follows only the matching edge,
//!    a constant `switch` subject follows the matching case edges (or the
//!    default when none match). Nodes left unvisited are dead.
//! 3. **Dead assignments**: assignments whose right-hand side has no side
//!    effect and whose target is not live on out.
//!
//! Entry and exit are never reported. The result is ordered by statement
//! handle, which within a method is statement order.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;

use crate::cfg::{Cfg, CfgEdgeKind, CfgNode, ENTRY, EXIT};
use crate::ir::{MethodId, Program, Stmt, StmtId};

use super::constant_propagation::{evaluate, CPFact, ConstantPropagation};
use super::live_variables::{LiveFact, LiveVariables};
use super::DataflowResult;

/// Detect dead code in one method, running constant propagation and
/// liveness internally.
#[must_use]
pub fn analyze(program: &Program, method: MethodId) -> BTreeSet<StmtId> {
    let cfg = Cfg::build(program, method);
    let constants = ConstantPropagation::analyze(program, &cfg);
    let live = LiveVariables::analyze(program, &cfg);
    detect(program, &cfg, &constants, &live)
}

/// Detect dead code from precomputed analysis results.
#[must_use]
pub fn detect(
    program: &Program,
    cfg: &Cfg,
    constants: &DataflowResult<CPFact>,
    live: &DataflowResult<LiveFact>,
) -> BTreeSet<StmtId> {
    let mut dead = BTreeSet::new();

    // Pass 1: plain reachability.
    let reached = reachable_plain(cfg);
    collect_unvisited(cfg, &reached, &mut dead);

    // Pass 2: reachability honoring constant branch conditions.
    let reached = reachable_with_constants(program, cfg, constants);
    collect_unvisited(cfg, &reached, &mut dead);

    // Pass 3: dead assignments.
    for node in cfg.node_indices() {
        let CfgNode::Stmt(stmt) = cfg.node(node) else {
            continue;
        };
        let kind = &program.stmt(stmt).kind;
        let Some(lhs) = kind.def_var() else { continue };
        if !kind.has_no_side_effect() {
            continue;
        }
        if !LiveVariables::contains(program, live.out_fact(node), lhs) {
            dead.insert(stmt);
        }
    }

    dead
}

fn collect_unvisited(cfg: &Cfg, reached: &FxHashSet<usize>, dead: &mut BTreeSet<StmtId>) {
    for node in cfg.node_indices() {
        if node == ENTRY || node == EXIT || reached.contains(&node) {
            continue;
        }
        if let CfgNode::Stmt(stmt) = cfg.node(node) {
            dead.insert(stmt);
        }
    }
}

fn reachable_plain(cfg: &Cfg) -> FxHashSet<usize> {
    let mut visited = FxHashSet::default();
    let mut stack = vec![ENTRY];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        stack.extend(cfg.succs_of(node));
    }
    visited
}

fn reachable_with_constants(
    program: &Program,
    cfg: &Cfg,
    constants: &DataflowResult<CPFact>,
) -> FxHashSet<usize> {
    let mut visited = FxHashSet::default();
    let mut stack = vec![ENTRY];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        let CfgNode::Stmt(stmt) = cfg.node(node) else {
            stack.extend(cfg.succs_of(node));
            continue;
        };
        match &program.stmt(stmt).kind {
            Stmt::If { cond, .. } => {
                match evaluate(program, cond, constants.in_fact(node)).as_const() {
                    Some(c) => {
                        let wanted = if c != 0 {
                            CfgEdgeKind::IfTrue
                        } else {
                            CfgEdgeKind::IfFalse
                        };
                        for edge in cfg.out_edges_of(node) {
                            if edge.kind == wanted {
                                stack.push(edge.target);
                                break;
                            }
                        }
                    }
                    None => stack.extend(cfg.succs_of(node)),
                }
            }
            Stmt::Switch { var, .. } => {
                match constants.in_fact(node).get(*var).as_const() {
                    Some(c) => {
                        let mut matched = false;
                        for edge in cfg.out_edges_of(node) {
                            if edge.kind == CfgEdgeKind::SwitchCase(c) {
                                matched = true;
                                stack.push(edge.target);
                            }
                        }
                        if !matched {
                            for edge in cfg.out_edges_of(node) {
                                if edge.kind == CfgEdgeKind::SwitchDefault {
                                    stack.push(edge.target);
                                }
                            }
                        }
                    }
                    None => stack.extend(cfg.succs_of(node)),
                }
            }
            _ => stack.extend(cfg.succs_of(node)),
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;
    use crate::ir::{BinaryOp, Exp, PrimType};

    /// if (1 < 0) dead(); else live(); : the taken-branch statements die.
    #[test]
    fn test_constant_false_branch_is_dead() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        let one = m.var("one", int_ty);
        let zero = m.var("zero", int_ty);
        let x = m.var("x", int_ty);
        let y = m.var("y", int_ty);
        m.const_assign(one, 1);
        m.const_assign(zero, 0);
        let branch = m.if_(Exp::Binary {
            op: BinaryOp::Lt,
            lhs: one,
            rhs: zero,
        });
        let live_stmt = m.binary(x, BinaryOp::Add, one, zero); // else side
        let skip = m.goto();
        let dead_stmt = m.binary(y, BinaryOp::Add, one, one); // then side
        m.patch_if(branch, dead_stmt);
        let ret = m.ret(Some(x));
        m.patch_goto(skip, ret);
        let f = m.build();
        let program = b.entry(f).build();

        let dead = analyze(&program, f);
        assert!(dead.contains(&dead_stmt));
        assert!(!dead.contains(&live_stmt));
        assert!(!dead.contains(&branch));
    }

    /// Code after an unconditional return is unreachable.
    #[test]
    fn test_unreachable_after_return() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.ret(None);
        let orphan = m.const_assign(x, 1);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let dead = analyze(&program, f);
        assert!(dead.contains(&orphan));
    }

    /// An assignment whose value is never read and whose RHS is pure.
    #[test]
    fn test_dead_assignment() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "int f()");
        m.set_static();
        let x = m.var("x", int_ty);
        let y = m.var("y", int_ty);
        let dead_store = m.const_assign(x, 1);
        m.const_assign(y, 2);
        m.ret(Some(y));
        let f = m.build();
        let program = b.entry(f).build();

        let dead = analyze(&program, f);
        assert!(dead.contains(&dead_store));
    }

    /// x = a / b is kept even if x is dead: division may throw.
    #[test]
    fn test_division_kept_despite_dead_target() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f(int)");
        m.set_static();
        let p = m.param("p", int_ty);
        let x = m.var("x", int_ty);
        let one = m.var("one", int_ty);
        m.const_assign(one, 1);
        let division = m.binary(x, BinaryOp::Div, one, p);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let dead = analyze(&program, f);
        assert!(!dead.contains(&division));
    }

    /// switch on a constant subject: only the matching case survives.
    #[test]
    fn test_constant_switch_prunes_cases() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "int f()");
        m.set_static();
        let s = m.var("s", int_ty);
        let x = m.var("x", int_ty);
        m.const_assign(s, 2);
        let sw = m.switch(s);
        let case1 = m.const_assign(x, 10);
        let g1 = m.goto();
        let case2 = m.const_assign(x, 20);
        let g2 = m.goto();
        let dflt = m.const_assign(x, 30);
        let ret = m.ret(Some(x));
        m.patch_switch(sw, vec![(1, case1), (2, case2)], dflt);
        m.patch_goto(g1, ret);
        m.patch_goto(g2, ret);
        let f = m.build();
        let program = b.entry(f).build();

        let dead = analyze(&program, f);
        assert!(dead.contains(&case1), "case 1 cannot match");
        assert!(dead.contains(&dflt), "default unreachable: case 2 matches");
        assert!(!dead.contains(&case2));
    }

    /// switch where no case matches falls to the default.
    #[test]
    fn test_constant_switch_default() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "int f()");
        m.set_static();
        let s = m.var("s", int_ty);
        let x = m.var("x", int_ty);
        m.const_assign(s, 9);
        let sw = m.switch(s);
        let case1 = m.const_assign(x, 10);
        let g1 = m.goto();
        let dflt = m.const_assign(x, 30);
        let ret = m.ret(Some(x));
        m.patch_switch(sw, vec![(1, case1)], dflt);
        m.patch_goto(g1, ret);
        let f = m.build();
        let program = b.entry(f).build();

        let dead = analyze(&program, f);
        assert!(dead.contains(&case1));
        assert!(!dead.contains(&dflt));
    }
}
