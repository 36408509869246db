//! Integer constant propagation.
//!
//! # Lattice
//!
//! Each variable carries one of three values:
//!
//! ```text
//!        NAC  (not a constant)
//!       /  |  \
//!   ...  CONST(v)  ...
//!       \  |  /
//!       UNDEF  (no information)
//! ```
//!
//! The meet is total, commutative and associative: `NAC ⊓ x = NAC`,
//! `UNDEF ⊓ x = x`, `c ⊓ c = c`, and `c ⊓ c' = NAC` for distinct constants.
//!
//! # Fact maps
//!
//! A [`CPFact`] maps variables to values with the invariant that an absent
//! key means `UNDEF`; updates to `UNDEF` remove the key, so fact equality is
//! map equality.
//!
//! # Evaluation
//!
//! [`evaluate`] folds expressions over the lattice with signed 32-bit
//! wrap-around arithmetic. Division and remainder by a constant zero yield
//! `UNDEF` for any dividend, including `NAC`: the strongest rule wins over
//! the usual NAC absorption. Expression kinds the lattice cannot track
//! (casts, and field/array reads when no alias information is wired in)
//! evaluate to `NAC`.
//!
//! The intra-procedural analysis seeds every int-capable parameter with
//! `NAC` at the method boundary; the inter-procedural variant
//! ([`super::inter`]) instead feeds parameters through call edges.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cfg::{Cfg, CfgNode, NodeIdx};
use crate::ir::{BinaryOp, Exp, Program, Stmt, VarId};

use super::ForwardAnalysis;

// =============================================================================
// Lattice values
// =============================================================================

/// A value of the three-point constant lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// No information yet.
    Undef,
    /// A single concrete integer.
    Const(i32),
    /// Not a constant.
    Nac,
}

impl Value {
    /// Whether this is a known constant.
    #[must_use]
    pub fn is_const(self) -> bool {
        matches!(self, Value::Const(_))
    }

    /// Whether this is `UNDEF`.
    #[must_use]
    pub fn is_undef(self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Whether this is `NAC`.
    #[must_use]
    pub fn is_nac(self) -> bool {
        matches!(self, Value::Nac)
    }

    /// The constant payload, if any.
    #[must_use]
    pub fn as_const(self) -> Option<i32> {
        match self {
            Value::Const(c) => Some(c),
            _ => None,
        }
    }

    /// Lattice meet.
    #[must_use]
    pub fn meet(self, other: Value) -> Value {
        match (self, other) {
            (Value::Nac, _) | (_, Value::Nac) => Value::Nac,
            (Value::Undef, v) | (v, Value::Undef) => v,
            (Value::Const(a), Value::Const(b)) => {
                if a == b {
                    Value::Const(a)
                } else {
                    Value::Nac
                }
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undef => write!(f, "undef"),
            Value::Const(c) => write!(f, "{c}"),
            Value::Nac => write!(f, "nac"),
        }
    }
}

// =============================================================================
// Fact maps
// =============================================================================

/// Map from variables to lattice values; absent means `UNDEF`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPFact {
    values: FxHashMap<VarId, Value>,
}

impl CPFact {
    /// Create an empty fact (everything `UNDEF`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a variable.
    #[must_use]
    pub fn get(&self, var: VarId) -> Value {
        self.values.get(&var).copied().unwrap_or(Value::Undef)
    }

    /// Bind a variable. Binding `UNDEF` removes the key, preserving the
    /// absent-means-undef invariant.
    pub fn update(&mut self, var: VarId, value: Value) {
        match value {
            Value::Undef => {
                self.values.remove(&var);
            }
            _ => {
                self.values.insert(var, value);
            }
        }
    }

    /// Meet another fact into this one, pointwise over the union of keys.
    pub fn meet_into(&mut self, fact: &CPFact) {
        for (&var, &value) in &fact.values {
            let merged = self.get(var).meet(value);
            self.update(var, merged);
        }
        // Keys only present in `self` meet with UNDEF, which is identity.
    }

    /// Iterate over the bound (non-`UNDEF`) entries.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, Value)> + '_ {
        self.values.iter().map(|(&v, &val)| (v, val))
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no variable is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Fold a binary operator over two constants. Signed 32-bit wrap-around;
/// relational operators yield 1/0; shift counts are masked like the JVM
/// masks them.
fn fold(op: BinaryOp, a: i32, b: i32) -> Value {
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        // Zero divisors are filtered before folding.
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::Eq => i32::from(a == b),
        BinaryOp::Ne => i32::from(a != b),
        BinaryOp::Lt => i32::from(a < b),
        BinaryOp::Gt => i32::from(a > b),
        BinaryOp::Le => i32::from(a <= b),
        BinaryOp::Ge => i32::from(a >= b),
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Ushr => ((a as u32).wrapping_shr(b as u32)) as i32,
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
    };
    Value::Const(result)
}

/// Evaluate an expression in the lattice under the given in-fact. Pure: the
/// result depends only on the expression and the fact.
#[must_use]
pub fn evaluate(_program: &Program, exp: &Exp, input: &CPFact) -> Value {
    match exp {
        Exp::Var(v) => input.get(*v),
        Exp::IntLiteral(c) => Value::Const(*c),
        Exp::Binary { op, lhs, rhs } => {
            let a = input.get(*lhs);
            let b = input.get(*rhs);
            // Division or remainder by a constant zero is UNDEF for any
            // dividend, including NAC.
            if op.may_throw() && b == Value::Const(0) {
                return Value::Undef;
            }
            if a.is_nac() || b.is_nac() {
                return Value::Nac;
            }
            match (a, b) {
                (Value::Const(a), Value::Const(b)) => fold(*op, a, b),
                _ => Value::Undef,
            }
        }
        // Casts are never tracked constants.
        Exp::Cast { .. } => Value::Nac,
    }
}

// =============================================================================
// Intra-procedural analysis
// =============================================================================

/// The intra-procedural constant-propagation analysis.
///
/// Field and array loads, allocations and call results evaluate to `NAC`;
/// the alias-aware treatment of loads lives in the inter-procedural variant.
#[derive(Debug)]
pub struct ConstantPropagation<'p> {
    program: &'p Program,
}

impl<'p> ConstantPropagation<'p> {
    /// Create the analysis for a program.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self { program }
    }

    /// Run the analysis over one method CFG.
    #[must_use]
    pub fn analyze(program: &'p Program, cfg: &Cfg) -> super::DataflowResult<CPFact> {
        let mut analysis = Self::new(program);
        super::solve_forward(&mut analysis, cfg)
    }

    /// Transfer one statement: rebind the defined variable if it can hold an
    /// integer, clear it otherwise, and leave everything else untouched.
    /// Shared with the inter-procedural analysis for non-call nodes.
    pub(crate) fn transfer_stmt(
        program: &Program,
        stmt: &Stmt,
        input: &CPFact,
        out: &mut CPFact,
        load_value: impl Fn(&Stmt, &CPFact) -> Value,
    ) -> bool {
        let mut new_out = input.clone();
        if let Some(lhs) = stmt.def_var() {
            let value = if program.can_hold_int(lhs) {
                match stmt {
                    Stmt::Assign { rhs, .. } => evaluate(program, rhs, input),
                    Stmt::LoadField { .. } | Stmt::LoadArray { .. } => load_value(stmt, input),
                    // Allocations and call results are untracked.
                    _ => Value::Nac,
                }
            } else {
                Value::Undef
            };
            new_out.update(lhs, value);
        }
        if *out == new_out {
            false
        } else {
            *out = new_out;
            true
        }
    }
}

impl ForwardAnalysis for ConstantPropagation<'_> {
    type Fact = CPFact;

    /// Parameters that can hold an integer are pessimized to `NAC`: without
    /// inter-procedural reasoning every caller could pass anything.
    fn boundary_fact(&self, cfg: &Cfg) -> CPFact {
        let mut fact = CPFact::new();
        for &param in &self.program.method(cfg.method).params {
            if self.program.can_hold_int(param) {
                fact.update(param, Value::Nac);
            }
        }
        fact
    }

    fn initial_fact(&self) -> CPFact {
        CPFact::new()
    }

    fn meet_into(&self, fact: &CPFact, target: &mut CPFact) {
        target.meet_into(fact);
    }

    fn transfer_node(
        &mut self,
        cfg: &Cfg,
        node: NodeIdx,
        input: &CPFact,
        out: &mut CPFact,
    ) -> bool {
        match cfg.node(node) {
            CfgNode::Entry | CfgNode::Exit => {
                if out == input {
                    false
                } else {
                    *out = input.clone();
                    true
                }
            }
            CfgNode::Stmt(stmt) => Self::transfer_stmt(
                self.program,
                &self.program.stmt(stmt).kind,
                input,
                out,
                // Loads have no alias information intra-procedurally.
                |_, _| Value::Nac,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{Cfg, EXIT};
    use crate::ir::builder::ProgramBuilder;
    use crate::ir::PrimType;

    #[test]
    fn test_meet_laws() {
        let values = [Value::Undef, Value::Const(1), Value::Const(2), Value::Nac];
        for a in values {
            // Idempotence.
            assert_eq!(a.meet(a), a);
            assert_eq!(Value::Nac.meet(a), Value::Nac);
            assert_eq!(Value::Undef.meet(a), a);
            for b in values {
                // Commutativity.
                assert_eq!(a.meet(b), b.meet(a));
                for c in values {
                    // Associativity.
                    assert_eq!(a.meet(b.meet(c)), a.meet(b).meet(c));
                }
            }
        }
        assert_eq!(Value::Const(1).meet(Value::Const(2)), Value::Nac);
        assert_eq!(Value::Const(1).meet(Value::Const(1)), Value::Const(1));
    }

    #[test]
    fn test_fact_absent_is_undef() {
        let mut fact = CPFact::new();
        assert_eq!(fact.get(VarId(0)), Value::Undef);
        fact.update(VarId(0), Value::Const(3));
        assert_eq!(fact.get(VarId(0)), Value::Const(3));
        fact.update(VarId(0), Value::Undef);
        assert!(fact.is_empty());
    }

    #[test]
    fn test_fact_meet_into() {
        let mut a = CPFact::new();
        a.update(VarId(0), Value::Const(1));
        a.update(VarId(1), Value::Const(2));
        let mut b = CPFact::new();
        b.update(VarId(0), Value::Const(1));
        b.update(VarId(1), Value::Const(3));
        b.update(VarId(2), Value::Nac);

        a.meet_into(&b);
        assert_eq!(a.get(VarId(0)), Value::Const(1));
        assert_eq!(a.get(VarId(1)), Value::Nac);
        assert_eq!(a.get(VarId(2)), Value::Nac);
    }

    fn eval_fixture() -> (Program, VarId, VarId) {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        let x = m.var("x", int_ty);
        let y = m.var("y", int_ty);
        m.ret(None);
        let f = m.build();
        (b.entry(f).build(), x, y)
    }

    #[test]
    fn test_evaluate_folding() {
        let (program, x, y) = eval_fixture();
        let mut input = CPFact::new();
        input.update(x, Value::Const(10));
        input.update(y, Value::Const(3));

        let cases = [
            (BinaryOp::Add, 13),
            (BinaryOp::Sub, 7),
            (BinaryOp::Mul, 30),
            (BinaryOp::Div, 3),
            (BinaryOp::Rem, 1),
            (BinaryOp::Lt, 0),
            (BinaryOp::Gt, 1),
            (BinaryOp::Shl, 80),
            (BinaryOp::BitXor, 9),
        ];
        for (op, expected) in cases {
            let exp = Exp::Binary { op, lhs: x, rhs: y };
            assert_eq!(
                evaluate(&program, &exp, &input),
                Value::Const(expected),
                "{op:?}"
            );
        }
    }

    #[test]
    fn test_evaluate_wrapping() {
        let (program, x, y) = eval_fixture();
        let mut input = CPFact::new();
        input.update(x, Value::Const(i32::MAX));
        input.update(y, Value::Const(1));
        let exp = Exp::Binary {
            op: BinaryOp::Add,
            lhs: x,
            rhs: y,
        };
        assert_eq!(evaluate(&program, &exp, &input), Value::Const(i32::MIN));

        input.update(x, Value::Const(i32::MIN));
        input.update(y, Value::Const(-1));
        let exp = Exp::Binary {
            op: BinaryOp::Div,
            lhs: x,
            rhs: y,
        };
        assert_eq!(evaluate(&program, &exp, &input), Value::Const(i32::MIN));
    }

    #[test]
    fn test_divide_by_constant_zero_is_undef_even_for_nac() {
        let (program, x, y) = eval_fixture();
        let mut input = CPFact::new();
        input.update(x, Value::Nac);
        input.update(y, Value::Const(0));
        for op in [BinaryOp::Div, BinaryOp::Rem] {
            let exp = Exp::Binary { op, lhs: x, rhs: y };
            assert_eq!(evaluate(&program, &exp, &input), Value::Undef, "{op:?}");
        }
        // A non-throwing operator still sees NAC absorption.
        let exp = Exp::Binary {
            op: BinaryOp::Add,
            lhs: x,
            rhs: y,
        };
        assert_eq!(evaluate(&program, &exp, &input), Value::Nac);
    }

    #[test]
    fn test_evaluate_undef_operand() {
        let (program, x, y) = eval_fixture();
        let mut input = CPFact::new();
        input.update(x, Value::Const(4));
        // y is absent, hence UNDEF.
        let exp = Exp::Binary {
            op: BinaryOp::Add,
            lhs: x,
            rhs: y,
        };
        assert_eq!(evaluate(&program, &exp, &input), Value::Undef);
    }

    /// x = 5; y = x + 3; out(exit) has x = 5, y = 8.
    #[test]
    fn test_linear_constant_flow() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        let x = m.var("x", int_ty);
        let y = m.var("y", int_ty);
        let three = m.var("t", int_ty);
        m.const_assign(x, 5);
        m.const_assign(three, 3);
        m.binary(y, BinaryOp::Add, x, three);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let result = ConstantPropagation::analyze(&program, &cfg);
        let exit_in = result.in_fact(EXIT);
        assert_eq!(exit_in.get(x), Value::Const(5));
        assert_eq!(exit_in.get(y), Value::Const(8));
    }

    /// Parameters are NAC at the intra boundary.
    #[test]
    fn test_params_are_nac() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f(int)");
        m.set_static();
        let p = m.param("p", int_ty);
        let x = m.var("x", int_ty);
        m.copy(x, p);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let result = ConstantPropagation::analyze(&program, &cfg);
        assert_eq!(result.in_fact(EXIT).get(x), Value::Nac);
    }

    /// Branch merge of different constants is NAC; same constant stays.
    #[test]
    fn test_merge_at_join() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f(int)");
        m.set_static();
        let c = m.param("c", int_ty);
        let x = m.var("x", int_ty);
        let branch = m.if_(Exp::Var(c));
        m.const_assign(x, 1);
        let skip = m.goto();
        let taken = m.const_assign(x, 2);
        m.patch_if(branch, taken);
        let join = m.ret(None);
        m.patch_goto(skip, join);
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let result = ConstantPropagation::analyze(&program, &cfg);
        let ret_node = cfg.node_of_index(program.stmt(join).index);
        assert_eq!(result.in_fact(ret_node).get(x), Value::Nac);
    }

    /// Running the transfer on its own output changes nothing (fixed point).
    #[test]
    fn test_transfer_idempotent_at_fixed_point() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.const_assign(x, 7);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();

        let cfg = Cfg::build(&program, f);
        let result = ConstantPropagation::analyze(&program, &cfg);
        let mut analysis = ConstantPropagation::new(&program);
        for node in cfg.node_indices() {
            let mut out = result.out_fact(node).clone();
            let changed = analysis.transfer_node(&cfg, node, result.in_fact(node), &mut out);
            assert!(!changed, "node {node} not at fixed point");
        }
    }
}
