//! Inter-procedural constant propagation over the ICFG.
//!
//! # Edge transfers
//!
//! - `Normal`: identity.
//! - `CallToReturn`: drops the call site's result variable (the `Return`
//!   edge reintroduces it).
//! - `Call`: a fresh fact binding each callee parameter to the argument's
//!   value at the call site.
//! - `Return`: a fresh fact binding the call site's result to the meet of
//!   the callee's return variables.
//!
//! Call nodes themselves transfer identically; parameter passing lives
//! entirely on the edges.
//!
//! # Alias-aware field and array values
//!
//! Backed by the context-collapsed points-to result, stores publish values
//! into per-object cells and wake up the loads that may observe them:
//!
//! - instance store `x.f = y`: for every object `o` the base may point to,
//!   the cell `(o, f)` meets in the stored value; every load `z = v.f` with
//!   `v` aliasing `o` has its per-load cell updated and is re-queued.
//! - static store `T.f = y`: the same with the static cell `(–, f)` and the
//!   static load index.
//! - array store `x[i] = y`: cells are keyed by the index's lattice value.
//!   A store with an unknown (`UNDEF`) index publishes nothing. A store
//!   with a constant index also meets its value into the `(o, UNDEF)`
//!   wildcard cell so that reads with a `NAC` index observe it; reads
//!   combine the `NAC` cell with the wildcard or constant cell.
//!
//! Two array indices may alias unless either is `UNDEF`; two constants
//! alias exactly when equal; `NAC` aliases anything defined.

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::cfg::CfgNode;
use crate::error::Result;
use crate::icfg::{Icfg, IcfgEdge, IcfgEdgeKind, IcfgNodeId};
use crate::ir::{FieldId, MethodId, Program, Stmt, StmtId, VarId};
use crate::options::{AnalysisOptions, AnalysisRegistry};
use crate::pta::heap::ObjId;
use crate::pta::PointerAnalysisResult;

use super::constant_propagation::{evaluate, CPFact, ConstantPropagation, Value};
use super::DataflowResult;

/// ID under which the inter-procedural result is conventionally stored.
pub const INTER_CONSTPROP_ID: &str = "inter-constprop";

/// Whether two array-index lattice values may refer to the same element.
#[must_use]
pub fn index_may_alias(a: Value, b: Value) -> bool {
    if a.is_undef() || b.is_undef() {
        return false;
    }
    if let (Value::Const(a), Value::Const(b)) = (a, b) {
        return a == b;
    }
    // At least one side is NAC and neither is UNDEF.
    true
}

/// The inter-procedural constant-propagation analysis.
pub struct InterConstantPropagation<'p> {
    program: &'p Program,
    pta: &'p PointerAnalysisResult,
    /// Reverse points-to map over the context-collapsed result.
    r_pts: FxHashMap<ObjId, Vec<VarId>>,
    /// Per-object field cells; `None` is the static sentinel.
    obj_field_const: FxHashMap<(Option<ObjId>, FieldId), Value>,
    /// Per-load-statement value of instance field reads.
    field_access_const: FxHashMap<StmtId, Value>,
    /// Static stores wake up these loads, per field.
    static_store_to_load: FxHashMap<FieldId, Vec<StmtId>>,
    /// Per-object array element cells, keyed by index lattice value.
    obj_elem_const: FxHashMap<(ObjId, Value), Value>,
    /// `(object, index value)` pairs each array load has been shown.
    load_array_observed: FxHashMap<StmtId, Vec<(ObjId, Value)>>,
    /// Load statements to re-queue, drained by the solver.
    pending: Vec<StmtId>,
}

impl<'p> InterConstantPropagation<'p> {
    /// Create the analysis from a pointer-analysis result.
    #[must_use]
    pub fn new(program: &'p Program, icfg: &Icfg, pta: &'p PointerAnalysisResult) -> Self {
        let mut r_pts: FxHashMap<ObjId, Vec<VarId>> = FxHashMap::default();
        for &var in pta.vars() {
            for &obj in pta.pts(var) {
                let vars = r_pts.entry(obj).or_default();
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }

        // Index static stores to the loads of the same field.
        let mut static_loads: FxHashMap<FieldId, Vec<StmtId>> = FxHashMap::default();
        let mut static_store_fields: Vec<FieldId> = Vec::new();
        for &method in icfg.methods() {
            for &stmt in &program.method(method).stmts {
                match &program.stmt(stmt).kind {
                    Stmt::LoadField {
                        base: None, field, ..
                    } => static_loads.entry(*field).or_default().push(stmt),
                    Stmt::StoreField {
                        base: None, field, ..
                    } => {
                        if !static_store_fields.contains(field) {
                            static_store_fields.push(*field);
                        }
                    }
                    _ => {}
                }
            }
        }
        let mut static_store_to_load: FxHashMap<FieldId, Vec<StmtId>> = FxHashMap::default();
        for field in static_store_fields {
            static_store_to_load
                .insert(field, static_loads.get(&field).cloned().unwrap_or_default());
        }

        Self {
            program,
            pta,
            r_pts,
            obj_field_const: FxHashMap::default(),
            field_access_const: FxHashMap::default(),
            static_store_to_load,
            obj_elem_const: FxHashMap::default(),
            load_array_observed: FxHashMap::default(),
            pending: Vec::new(),
        }
    }

    /// Boundary fact of an entry method: int-capable parameters are NAC.
    #[must_use]
    pub fn boundary_fact(&self, method: MethodId) -> CPFact {
        let mut fact = CPFact::new();
        for &param in &self.program.method(method).params {
            if self.program.can_hold_int(param) {
                fact.update(param, Value::Nac);
            }
        }
        fact
    }

    /// Load statements that must be revisited; drained by the solver after
    /// each node transfer.
    pub fn take_pending(&mut self) -> Vec<StmtId> {
        std::mem::take(&mut self.pending)
    }

    /// Transfer one ICFG node. Returns `true` iff the out-fact changed.
    pub fn transfer_node(
        &mut self,
        icfg: &Icfg,
        node: IcfgNodeId,
        input: &CPFact,
        out: &mut CPFact,
    ) -> bool {
        let (_, payload) = icfg.node(node);
        let stmt_id = match payload {
            CfgNode::Entry | CfgNode::Exit => return identity(input, out),
            CfgNode::Stmt(s) => s,
        };
        let program = self.program;
        match &program.stmt(stmt_id).kind {
            // Parameter passing and result binding live on the edges.
            Stmt::Invoke(_) => identity(input, out),
            stmt @ Stmt::StoreField { .. } => {
                self.process_store_field(stmt_id, stmt, input);
                identity(input, out)
            }
            stmt @ Stmt::StoreArray { .. } => {
                self.process_store_array(stmt, input);
                identity(input, out)
            }
            stmt => ConstantPropagation::transfer_stmt(program, stmt, input, out, |s, f| {
                self.load_value(stmt_id, s, f)
            }),
        }
    }

    /// Value of an instance/static field or array load under the alias maps.
    fn load_value(&self, stmt_id: StmtId, stmt: &Stmt, input: &CPFact) -> Value {
        match stmt {
            Stmt::LoadField {
                base: Some(_), ..
            } => self
                .field_access_const
                .get(&stmt_id)
                .copied()
                .unwrap_or(Value::Undef),
            Stmt::LoadField {
                base: None, field, ..
            } => self
                .obj_field_const
                .get(&(None, *field))
                .copied()
                .unwrap_or(Value::Undef),
            Stmt::LoadArray { index, .. } => {
                let iv = input.get(*index);
                if iv.is_undef() {
                    return Value::Undef;
                }
                let mut value = Value::Undef;
                if let Some(observed) = self.load_array_observed.get(&stmt_id) {
                    for &(obj, observed_iv) in observed {
                        if index_may_alias(iv, observed_iv) {
                            value = value.meet(self.get_elem(obj, iv));
                        }
                    }
                }
                value
            }
            _ => unreachable!("load_value on non-load statement"),
        }
    }

    /// Element value an array read observes: the `NAC` cell combined with
    /// the wildcard cell (unknown index) or the matching constant cell.
    fn get_elem(&self, obj: ObjId, index: Value) -> Value {
        let cell = |iv: Value| {
            self.obj_elem_const
                .get(&(obj, iv))
                .copied()
                .unwrap_or(Value::Undef)
        };
        match index {
            Value::Undef => Value::Undef,
            Value::Nac => cell(Value::Nac).meet(cell(Value::Undef)),
            Value::Const(_) => cell(Value::Nac).meet(cell(index)),
        }
    }

    fn process_store_field(&mut self, _stmt_id: StmtId, stmt: &Stmt, input: &CPFact) {
        let Stmt::StoreField { base, field, rhs } = stmt else {
            unreachable!();
        };
        if !self.program.can_hold_int(*rhs) {
            return;
        }
        let stored = evaluate(self.program, &crate::ir::Exp::Var(*rhs), input);
        match base {
            Some(base) => {
                let objs: Vec<ObjId> = self.pta.pts(*base).iter().copied().collect();
                for obj in objs {
                    let cell = self
                        .obj_field_const
                        .entry((Some(obj), *field))
                        .or_insert(Value::Undef);
                    let new_value = cell.meet(stored);
                    if *cell == new_value {
                        continue;
                    }
                    *cell = new_value;
                    // Wake every load that may read this cell through an
                    // alias of the base.
                    let alias_vars = self.r_pts.get(&obj).cloned().unwrap_or_default();
                    for alias in alias_vars {
                        for &load in &self.program.var(alias).load_fields {
                            let Stmt::LoadField {
                                field: load_field, ..
                            } = &self.program.stmt(load).kind
                            else {
                                unreachable!("load_fields index out of sync");
                            };
                            if load_field == field {
                                let load_cell = self
                                    .field_access_const
                                    .entry(load)
                                    .or_insert(Value::Undef);
                                *load_cell = load_cell.meet(new_value);
                                self.pending.push(load);
                            }
                        }
                    }
                }
            }
            None => {
                let cell = self
                    .obj_field_const
                    .entry((None, *field))
                    .or_insert(Value::Undef);
                let new_value = cell.meet(stored);
                if *cell == new_value {
                    return;
                }
                *cell = new_value;
                if let Some(loads) = self.static_store_to_load.get(field) {
                    self.pending.extend(loads.iter().copied());
                }
            }
        }
    }

    fn process_store_array(&mut self, stmt: &Stmt, input: &CPFact) {
        let Stmt::StoreArray { base, index, rhs } = stmt else {
            unreachable!();
        };
        if !self.program.can_hold_int(*rhs) {
            return;
        }
        let iv = input.get(*index);
        // A store whose index is completely unknown publishes nothing.
        if iv.is_undef() {
            return;
        }
        let stored = evaluate(self.program, &crate::ir::Exp::Var(*rhs), input);
        let objs: Vec<ObjId> = self.pta.pts(*base).iter().copied().collect();
        for obj in objs {
            let cell = self
                .obj_elem_const
                .entry((obj, iv))
                .or_insert(Value::Undef);
            let new_value = cell.meet(stored);
            if *cell == new_value {
                continue;
            }
            *cell = new_value;
            // A constant-index store also feeds the wildcard cell so reads
            // with a NAC index observe it.
            if iv.is_const() {
                let wildcard = self
                    .obj_elem_const
                    .entry((obj, Value::Undef))
                    .or_insert(Value::Undef);
                *wildcard = wildcard.meet(stored);
            }
            let alias_vars = self.r_pts.get(&obj).cloned().unwrap_or_default();
            for alias in alias_vars {
                for &load in &self.program.var(alias).load_arrays {
                    let observed = self.load_array_observed.entry(load).or_default();
                    if !observed.contains(&(obj, iv)) {
                        observed.push((obj, iv));
                    }
                    self.pending.push(load);
                }
            }
        }
    }

    /// Transfer a fact across an ICFG edge (applied to the source's out).
    #[must_use]
    pub fn transfer_edge(&self, edge: &IcfgEdge, out: &CPFact) -> CPFact {
        let program = self.program;
        match edge.kind {
            IcfgEdgeKind::Normal => out.clone(),
            IcfgEdgeKind::CallToReturn { call_site } => {
                let invoke = program
                    .invoke_at(call_site)
                    .expect("call-to-return edge from non-invoke");
                let mut fact = out.clone();
                if let Some(result) = invoke.result {
                    fact.update(result, Value::Undef);
                }
                fact
            }
            IcfgEdgeKind::Call { call_site, callee } => {
                let invoke = program
                    .invoke_at(call_site)
                    .expect("call edge from non-invoke");
                let params = &program.method(callee).params;
                assert_eq!(
                    invoke.args.len(),
                    params.len(),
                    "argument count does not match parameter count at call site {call_site:?}"
                );
                let mut fact = CPFact::new();
                for (&arg, &param) in invoke.args.iter().zip(params) {
                    fact.update(param, out.get(arg));
                }
                fact
            }
            IcfgEdgeKind::Return { call_site, callee } => {
                let invoke = program
                    .invoke_at(call_site)
                    .expect("return edge to non-invoke site");
                let mut fact = CPFact::new();
                if let Some(result) = invoke.result {
                    let mut value = Value::Undef;
                    for &ret in &program.method(callee).ret_vars {
                        value = value.meet(out.get(ret));
                    }
                    fact.update(result, value);
                }
                fact
            }
        }
    }
}

fn identity(input: &CPFact, out: &mut CPFact) -> bool {
    if out == input {
        false
    } else {
        *out = input.clone();
        true
    }
}

/// Drive the inter-procedural analysis to its fixed point.
#[must_use]
pub fn solve(
    icfg: &Icfg,
    analysis: &mut InterConstantPropagation<'_>,
) -> DataflowResult<CPFact> {
    let mut result = DataflowResult::new(icfg.node_count(), CPFact::new());

    // Entry methods start from the boundary fact; those nodes stay out of
    // the work list so the boundary is preserved.
    let mut boundary_nodes = Vec::new();
    for &method in icfg.entry_methods() {
        if let Some(entry) = icfg.entry_node_of(method) {
            result.set_out_fact(entry, analysis.boundary_fact(method));
            boundary_nodes.push(entry);
        }
    }

    let mut worklist: std::collections::VecDeque<IcfgNodeId> = icfg
        .node_ids()
        .filter(|n| !boundary_nodes.contains(n))
        .collect();

    let mut iterations = 0usize;
    while let Some(node) = worklist.pop_front() {
        iterations += 1;
        let mut input = result.in_fact(node).clone();
        for edge in icfg.in_edges_of(node) {
            let transferred = analysis.transfer_edge(edge, result.out_fact(edge.source));
            input.meet_into(&transferred);
        }
        result.set_in_fact(node, input.clone());

        let mut out = result.out_fact(node).clone();
        let changed = analysis.transfer_node(icfg, node, &input, &mut out);
        if changed {
            result.set_out_fact(node, out);
            for succ in icfg.succs_of(node) {
                if !worklist.contains(&succ) {
                    worklist.push_back(succ);
                }
            }
        }
        // Loads whose backing cells changed must be revisited even when
        // this node's own out-fact did not change.
        for load in analysis.take_pending() {
            if let Some(load_node) = icfg.node_of_stmt(analysis.program, load) {
                if !worklist.contains(&load_node) {
                    worklist.push_back(load_node);
                }
            }
        }
    }
    debug!(iterations, "inter constant propagation fixed point");
    result
}

/// Run inter-procedural constant propagation, reading the pointer-analysis
/// result named by the `pta` option from the registry. Missing `pta` is a
/// configuration error.
pub fn analyze(
    program: &Program,
    icfg: &Icfg,
    options: &AnalysisOptions,
    registry: &AnalysisRegistry,
) -> Result<DataflowResult<CPFact>> {
    let pta_id = options.require_str("pta")?;
    let pta: &PointerAnalysisResult = registry.require(pta_id)?;
    let mut analysis = InterConstantPropagation::new(program, icfg, pta);
    let result = solve(icfg, &mut analysis);
    info!(nodes = icfg.node_count(), "inter constant propagation finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_alias_predicate() {
        let c1 = Value::Const(1);
        let c2 = Value::Const(2);
        assert!(!index_may_alias(Value::Undef, Value::Nac));
        assert!(!index_may_alias(c1, Value::Undef));
        assert!(index_may_alias(Value::Nac, c1));
        assert!(index_may_alias(Value::Nac, Value::Nac));
        assert!(index_may_alias(c1, c1));
        assert!(!index_may_alias(c1, c2));
        // Commutative.
        assert_eq!(
            index_may_alias(Value::Nac, c1),
            index_may_alias(c1, Value::Nac)
        );
    }
}
