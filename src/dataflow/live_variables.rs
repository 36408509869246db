//! Live-variable analysis: backward dataflow.
//!
//! A variable is live at a program point if its current value may be read
//! before being redefined. Facts are dense bitsets over the method's
//! variable universe (`Method::vars` order):
//!
//! ```text
//! IN[s]  = USE[s] ∪ (OUT[s] − DEF[s])
//! OUT[s] = ∪ IN[succ]
//! ```
//!
//! The dead-code detector consumes the out-facts to find assignments whose
//! target is never read.

use fixedbitset::FixedBitSet;

use crate::cfg::{Cfg, CfgNode, NodeIdx};
use crate::ir::{MethodId, Program, VarId};

use super::{solve_backward, BackwardAnalysis, DataflowResult};

/// A liveness fact: one bit per method-local variable.
pub type LiveFact = FixedBitSet;

/// The backward live-variable analysis for one method.
#[derive(Debug)]
pub struct LiveVariables<'p> {
    program: &'p Program,
    method: MethodId,
    var_count: usize,
}

impl<'p> LiveVariables<'p> {
    /// Create the analysis for a method.
    #[must_use]
    pub fn new(program: &'p Program, method: MethodId) -> Self {
        let var_count = program.method(method).vars.len();
        Self {
            program,
            method,
            var_count,
        }
    }

    /// Run the analysis over the method's CFG.
    #[must_use]
    pub fn analyze(program: &'p Program, cfg: &Cfg) -> DataflowResult<LiveFact> {
        let mut analysis = Self::new(program, cfg.method);
        solve_backward(&mut analysis, cfg)
    }

    /// Whether a variable is set in a fact.
    #[must_use]
    pub fn contains(program: &Program, fact: &LiveFact, var: VarId) -> bool {
        fact.contains(program.var(var).local_index as usize)
    }
}

impl BackwardAnalysis for LiveVariables<'_> {
    type Fact = LiveFact;

    fn boundary_fact(&self, _cfg: &Cfg) -> LiveFact {
        FixedBitSet::with_capacity(self.var_count)
    }

    fn initial_fact(&self) -> LiveFact {
        FixedBitSet::with_capacity(self.var_count)
    }

    fn meet_into(&self, fact: &LiveFact, target: &mut LiveFact) {
        target.union_with(fact);
    }

    fn transfer_node(
        &mut self,
        cfg: &Cfg,
        node: NodeIdx,
        out: &LiveFact,
        input: &mut LiveFact,
    ) -> bool {
        let mut new_in = out.clone();
        if let CfgNode::Stmt(stmt) = cfg.node(node) {
            let stmt = &self.program.stmt(stmt).kind;
            if let Some(def) = stmt.def_var() {
                debug_assert_eq!(self.program.var(def).method, self.method);
                new_in.set(self.program.var(def).local_index as usize, false);
            }
            let mut uses = Vec::new();
            stmt.uses(&mut uses);
            for var in uses {
                new_in.set(self.program.var(var).local_index as usize, true);
            }
        }
        if *input == new_in {
            false
        } else {
            *input = new_in;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::ENTRY;
    use crate::ir::builder::ProgramBuilder;
    use crate::ir::{BinaryOp, Exp, PrimType};

    /// x = 1; y = x + x; return y : x and y are both read.
    #[test]
    fn test_used_variables_are_live() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "int f()");
        m.set_static();
        let x = m.var("x", int_ty);
        let y = m.var("y", int_ty);
        let assign_x = m.const_assign(x, 1);
        m.binary(y, BinaryOp::Add, x, x);
        m.ret(Some(y));
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let live = LiveVariables::analyze(&program, &cfg);

        // x is live right after its assignment.
        let node = cfg.node_of_index(program.stmt(assign_x).index);
        assert!(LiveVariables::contains(&program, live.out_fact(node), x));
        assert!(!LiveVariables::contains(&program, live.out_fact(node), y));
    }

    /// x = 1; x never read again: dead on out.
    #[test]
    fn test_unused_assignment_not_live() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        let x = m.var("x", int_ty);
        let assign = m.const_assign(x, 1);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let live = LiveVariables::analyze(&program, &cfg);
        let node = cfg.node_of_index(program.stmt(assign).index);
        assert!(!LiveVariables::contains(&program, live.out_fact(node), x));
    }

    /// A loop keeps its induction variable live at the method entry edge.
    #[test]
    fn test_loop_liveness() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f(int)");
        m.set_static();
        let n = m.param("n", int_ty);
        let i = m.var("i", int_ty);
        let one = m.var("one", int_ty);
        let init = m.const_assign(i, 0);
        m.const_assign(one, 1);
        let head = m.binary(i, BinaryOp::Add, i, one);
        let cond = m.var("c", int_ty);
        m.binary(cond, BinaryOp::Lt, i, n);
        let back = m.if_(Exp::Var(cond));
        m.patch_if(back, head);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let live = LiveVariables::analyze(&program, &cfg);
        // The back edge keeps i live past its initialization.
        let init_node = cfg.node_of_index(program.stmt(init).index);
        assert!(LiveVariables::contains(&program, live.out_fact(init_node), i));
        // i is dead before it is first defined.
        assert!(!LiveVariables::contains(&program, live.out_fact(ENTRY), i));
    }
}
