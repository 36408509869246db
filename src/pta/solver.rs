//! Context-sensitive pointer-analysis solver.
//!
//! A monotone fixed-point iteration over the pointer-flow graph that
//! discovers callees, newly reachable methods and new points-to facts
//! mutually:
//!
//! 1. Marking a method reachable applies the context-free statement rules
//!    (allocations, copies, static field accesses, static calls) once.
//! 2. Instance field/array accesses and dynamic calls are deferred until the
//!    receiver variable's points-to set grows; each delta object links the
//!    deferred edges and dispatches the deferred calls.
//! 3. Propagation is delta-driven: a work-list entry carries exactly the
//!    objects its pointer has not absorbed yet, and only a non-empty delta
//!    fans out to successors.
//!
//! Termination follows from monotonicity: every set (PFG edges, reachable
//! methods, call edges, points-to sets) only grows and is bounded by program
//! size times the context universe.
//!
//! When a taint configuration is present the taint pipeline runs inside the
//! same loop: source and transfer rules fire at every processed call site,
//! and transfer rules re-fire when the points-to set of an involved variable
//! grows.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::callgraph::{resolve_callee, CallGraph, Edge};
use crate::error::Result;
use crate::ir::hierarchy::ClassHierarchy;
use crate::ir::{Exp, Program, Stmt, StmtId, VarId};
use crate::options::AnalysisOptions;
use crate::taint::{TaintAnalysis, TaintConfig, TAINT_FLOWS_ID};

use super::context::{ContextId, ContextSelector};
use super::elements::{CSCallSiteId, CSManager, CSMethodId, CSObjId, PointerId, PointerKind};
use super::heap::HeapModel;
use super::pfg::PointerFlowGraph;
use super::points_to::PointsToSet;
use super::PointerAnalysisResult;

/// FIFO work list of `(pointer, points-to delta)` entries.
#[derive(Debug, Default)]
pub struct WorkList {
    entries: VecDeque<(PointerId, PointsToSet)>,
}

impl WorkList {
    /// Append an entry.
    pub fn add(&mut self, pointer: PointerId, pts: PointsToSet) {
        self.entries.push_back((pointer, pts));
    }

    /// Remove and return the oldest entry.
    pub fn poll(&mut self) -> Option<(PointerId, PointsToSet)> {
        self.entries.pop_front()
    }

    /// Whether no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The context-sensitive solver. Construct with [`Solver::new`], then call
/// [`Solver::solve`].
pub struct Solver<'p> {
    program: &'p Program,
    hierarchy: &'p ClassHierarchy,
    selector: Box<dyn ContextSelector>,
    heap: HeapModel,
    cs: CSManager,
    pfg: PointerFlowGraph,
    call_graph: CallGraph<CSCallSiteId, CSMethodId>,
    worklist: WorkList,
    taint: Option<TaintAnalysis>,
    /// Call sites using a variable as an argument; feeds taint re-runs.
    arg_invokes: FxHashMap<VarId, Vec<StmtId>>,
    /// Receiver variables observed per call site; feeds taint re-runs.
    invoke_base_vars: FxHashMap<StmtId, Vec<VarId>>,
}

impl<'p> Solver<'p> {
    /// Create a solver. If the options name a `taint-config` path, the taint
    /// pipeline is loaded and co-iterated; a missing or malformed file is a
    /// fatal configuration error.
    pub fn new(
        program: &'p Program,
        hierarchy: &'p ClassHierarchy,
        selector: Box<dyn ContextSelector>,
        options: &AnalysisOptions,
    ) -> Result<Self> {
        let taint = match options.get_str("taint-config") {
            Some(path) => Some(TaintAnalysis::new(TaintConfig::load(path, program)?)),
            None => None,
        };
        Ok(Self::with_taint(program, hierarchy, selector, taint))
    }

    /// Create a solver with an already-resolved taint pipeline (or none).
    #[must_use]
    pub fn with_taint(
        program: &'p Program,
        hierarchy: &'p ClassHierarchy,
        selector: Box<dyn ContextSelector>,
        taint: Option<TaintAnalysis>,
    ) -> Self {
        Self {
            program,
            hierarchy,
            selector,
            heap: HeapModel::new(),
            cs: CSManager::new(),
            pfg: PointerFlowGraph::new(),
            call_graph: CallGraph::new(),
            worklist: WorkList::default(),
            taint,
            arg_invokes: FxHashMap::default(),
            invoke_base_vars: FxHashMap::default(),
        }
    }

    /// Run the analysis to its fixed point and return the result.
    #[must_use]
    pub fn solve(mut self) -> PointerAnalysisResult {
        self.initialize();
        self.analyze();

        let flows = self
            .taint
            .as_ref()
            .map(|t| t.collect_flows(self.program, &self.cs, &self.heap, &self.call_graph));

        info!(
            pointers = self.cs.pointer_count(),
            pfg_edges = self.pfg.edge_count(),
            call_edges = self.call_graph.edge_count(),
            reachable = self.call_graph.reachable_methods().len(),
            "pointer analysis finished"
        );

        let mut result = PointerAnalysisResult::new(
            self.cs,
            self.heap,
            self.pfg,
            self.call_graph,
        );
        if let Some(flows) = flows {
            result.store_aux(TAINT_FLOWS_ID, flows);
        }
        result
    }

    fn initialize(&mut self) {
        let entry = self.program.entry_method();
        let ctx = self.selector.empty_context();
        let cs_entry = self.cs.cs_method(ctx, entry);
        self.call_graph.add_entry_method(cs_entry);
        self.add_reachable(cs_entry);
    }

    /// Process a newly reachable context-sensitive method: visit each of its
    /// statements once, applying the context-free rules.
    fn add_reachable(&mut self, cs_method: CSMethodId) {
        if !self.call_graph.add_reachable_method(cs_method) {
            return;
        }
        let program = self.program;
        let (ctx, method) = self.cs.cs_method_data(cs_method);
        debug!(?cs_method, method = %program.method(method).name, "reachable");
        for &stmt in &program.method(method).stmts {
            match &program.stmt(stmt).kind {
                Stmt::New { lhs, .. } => {
                    let obj = self.heap.obj_of_alloc(program, stmt);
                    let heap_ctx =
                        self.selector
                            .select_heap_context(&mut self.cs.contexts, ctx, obj);
                    let cs_obj = self.cs.cs_obj(heap_ctx, obj);
                    let ptr = self.cs.cs_var(ctx, *lhs);
                    self.worklist.add(ptr, PointsToSet::singleton(cs_obj));
                }
                Stmt::Assign {
                    lhs,
                    rhs: Exp::Var(rhs),
                } => {
                    let source = self.cs.cs_var(ctx, *rhs);
                    let target = self.cs.cs_var(ctx, *lhs);
                    self.add_pfg_edge(source, target);
                }
                Stmt::LoadField {
                    lhs,
                    base: None,
                    field,
                } => {
                    let source = self.cs.static_field(*field);
                    let target = self.cs.cs_var(ctx, *lhs);
                    self.add_pfg_edge(source, target);
                }
                Stmt::StoreField {
                    base: None,
                    field,
                    rhs,
                } => {
                    let source = self.cs.cs_var(ctx, *rhs);
                    let target = self.cs.static_field(*field);
                    self.add_pfg_edge(source, target);
                }
                Stmt::Invoke(invoke) => {
                    for &arg in &invoke.args {
                        let sites = self.arg_invokes.entry(arg).or_default();
                        if !sites.contains(&stmt) {
                            sites.push(stmt);
                        }
                    }
                    if invoke.base.is_none() {
                        self.process_single_call(ctx, stmt, None, None);
                    }
                }
                // Instance field/array accesses and dynamic calls are
                // deferred until the receiver's points-to set grows.
                _ => {}
            }
        }
    }

    /// Add a PFG edge; on a genuinely new edge, enqueue a snapshot of the
    /// source's current points-to set at the target.
    fn add_pfg_edge(&mut self, source: PointerId, target: PointerId) {
        if !self.pfg.add_edge(source, target) {
            return;
        }
        let pts = self.cs.points_to(source);
        if !pts.is_empty() {
            let snapshot = pts.clone();
            self.worklist.add(target, snapshot);
        }
    }

    /// Drain the work list to the fixed point.
    fn analyze(&mut self) {
        let program = self.program;
        while let Some((pointer, pts)) = self.worklist.poll() {
            let delta = self.propagate(pointer, &pts);
            let PointerKind::Var(ctx, var) = self.cs.pointer_kind(pointer) else {
                continue;
            };
            for cs_obj in delta.iter() {
                let var_data = program.var(var);
                for &store in &var_data.store_fields {
                    let Stmt::StoreField { field, rhs, .. } = &program.stmt(store).kind else {
                        unreachable!("store_fields index out of sync");
                    };
                    let source = self.cs.cs_var(ctx, *rhs);
                    let target = self.cs.instance_field(cs_obj, *field);
                    self.add_pfg_edge(source, target);
                }
                for &load in &var_data.load_fields {
                    let Stmt::LoadField { lhs, field, .. } = &program.stmt(load).kind else {
                        unreachable!("load_fields index out of sync");
                    };
                    let source = self.cs.instance_field(cs_obj, *field);
                    let target = self.cs.cs_var(ctx, *lhs);
                    self.add_pfg_edge(source, target);
                }
                for &store in &var_data.store_arrays {
                    let Stmt::StoreArray { rhs, .. } = &program.stmt(store).kind else {
                        unreachable!("store_arrays index out of sync");
                    };
                    let source = self.cs.cs_var(ctx, *rhs);
                    let target = self.cs.array_index(cs_obj);
                    self.add_pfg_edge(source, target);
                }
                for &load in &var_data.load_arrays {
                    let Stmt::LoadArray { lhs, .. } = &program.stmt(load).kind else {
                        unreachable!("load_arrays index out of sync");
                    };
                    let source = self.cs.array_index(cs_obj);
                    let target = self.cs.cs_var(ctx, *lhs);
                    self.add_pfg_edge(source, target);
                }
                self.process_call(ctx, var, cs_obj);
            }
            // Re-run taint transfers for call sites whose argument or base
            // is this variable.
            if self.taint.is_some() {
                let sites = self.arg_invokes.get(&var).cloned().unwrap_or_default();
                for site in sites {
                    let result = program
                        .invoke_at(site)
                        .expect("arg_invokes entry for non-invoke")
                        .result;
                    let recvs = self.invoke_base_vars.get(&site).cloned().unwrap_or_default();
                    for recv in recvs {
                        self.run_taint_transfer(ctx, Some(recv), result, site);
                    }
                    self.run_taint_transfer(ctx, None, result, site);
                }
            }
        }
    }

    /// Absorb a points-to delta into a pointer and fan the true delta out to
    /// its PFG successors. Returns the delta.
    fn propagate(&mut self, pointer: PointerId, pts: &PointsToSet) -> PointsToSet {
        let delta = pts.difference(self.cs.points_to(pointer));
        if !delta.is_empty() {
            let target = self.cs.points_to_mut(pointer);
            for obj in delta.iter() {
                target.add(obj);
            }
            for &succ in self.pfg.succs_of(pointer) {
                self.worklist.add(succ, delta.clone());
            }
        }
        delta
    }

    /// Dispatch every deferred call on `recv_var` for a newly discovered
    /// receiver object.
    fn process_call(&mut self, ctx: ContextId, recv_var: VarId, recv_obj: CSObjId) {
        let sites = self.program.var(recv_var).invokes.clone();
        for site in sites {
            let observed = self.invoke_base_vars.entry(site).or_default();
            if !observed.contains(&recv_var) {
                observed.push(recv_var);
            }
            self.process_single_call(ctx, site, Some(recv_obj), Some(recv_var));
        }
    }

    /// Process one call site in one context, with an optional receiver
    /// object. Applies taint source/transfer rules, resolves the callee, and
    /// wires parameters and returns when the call edge is new. A dispatch
    /// miss adds no edge and is not an error.
    fn process_single_call(
        &mut self,
        caller_ctx: ContextId,
        site: StmtId,
        recv: Option<CSObjId>,
        recv_var: Option<VarId>,
    ) {
        let program = self.program;
        let invoke = program
            .invoke_at(site)
            .expect("process_single_call on non-invoke")
            .clone();

        // Taint rules match on the declared target, independent of whether
        // dispatch finds a concrete method.
        if self.taint.is_some() {
            if let Some(taint) = &self.taint {
                let objs = taint.process_source(
                    program,
                    self.hierarchy,
                    &mut self.heap,
                    &mut self.cs,
                    site,
                );
                if let Some(result) = invoke.result {
                    let result_ptr = self.cs.cs_var(caller_ctx, result);
                    for obj in objs {
                        self.worklist.add(result_ptr, PointsToSet::singleton(obj));
                    }
                }
            }
            self.run_taint_transfer(caller_ctx, recv_var, invoke.result, site);
        }

        let recv_class = recv.and_then(|cs_obj| {
            let (_, obj) = self.cs.cs_obj_data(cs_obj);
            program.class_of_type(self.heap.obj(obj).ty)
        });
        let Some(callee) = resolve_callee(program, self.hierarchy, recv_class, &invoke) else {
            return;
        };

        let cs_call_site = self.cs.cs_call_site(caller_ctx, site);
        let target_ctx = match recv {
            Some(recv_obj) => self.selector.select_context_with_recv(
                &mut self.cs.contexts,
                caller_ctx,
                site,
                recv_obj,
                callee,
            ),
            None => {
                self.selector
                    .select_context(&mut self.cs.contexts, caller_ctx, site, callee)
            }
        };
        let cs_callee = self.cs.cs_method(target_ctx, callee);

        if let Some(recv_obj) = recv {
            let this = program
                .method(callee)
                .this
                .expect("dispatch target of a dynamic call has no `this`");
            let this_ptr = self.cs.cs_var(target_ctx, this);
            self.worklist.add(this_ptr, PointsToSet::singleton(recv_obj));
        }

        let edge_is_new = self.call_graph.add_edge(Edge {
            kind: invoke.kind.into(),
            call_site: cs_call_site,
            callee: cs_callee,
        });
        if edge_is_new {
            self.add_reachable(cs_callee);
            let params = program.method(callee).params.clone();
            assert_eq!(
                invoke.args.len(),
                params.len(),
                "argument count does not match parameter count at call site {site:?}"
            );
            for (&arg, &param) in invoke.args.iter().zip(&params) {
                let source = self.cs.cs_var(caller_ctx, arg);
                let target = self.cs.cs_var(target_ctx, param);
                self.add_pfg_edge(source, target);
            }
            if let Some(result) = invoke.result {
                for ret in program.method(callee).ret_vars.clone() {
                    let source = self.cs.cs_var(target_ctx, ret);
                    let target = self.cs.cs_var(caller_ctx, result);
                    self.add_pfg_edge(source, target);
                }
            }
        }
    }

    /// Apply the taint transfer rules for one call site and enqueue the
    /// resulting entries.
    fn run_taint_transfer(
        &mut self,
        ctx: ContextId,
        recv_var: Option<VarId>,
        result_var: Option<VarId>,
        site: StmtId,
    ) {
        let Some(taint) = &self.taint else { return };
        let entries = taint.process_transfer(
            self.program,
            self.hierarchy,
            &mut self.heap,
            &mut self.cs,
            ctx,
            recv_var,
            result_var,
            site,
        );
        for (pointer, obj) in entries {
            self.worklist.add(pointer, PointsToSet::singleton(obj));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;
    use crate::pta::context::ContextInsensitiveSelector;

    #[test]
    fn test_worklist_fifo() {
        let mut wl = WorkList::default();
        wl.add(PointerId(0), PointsToSet::new());
        wl.add(PointerId(1), PointsToSet::new());
        assert_eq!(wl.poll().unwrap().0, PointerId(0));
        assert_eq!(wl.poll().unwrap().0, PointerId(1));
        assert!(wl.is_empty());
    }

    #[test]
    fn test_empty_entry_method() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let main = m.build();
        let program = b.entry(main).build();
        let hierarchy = ClassHierarchy::build(&program);

        let solver = Solver::with_taint(
            &program,
            &hierarchy,
            Box::new(ContextInsensitiveSelector),
            None,
        );
        let result = solver.solve();
        assert_eq!(result.call_graph().reachable_methods().len(), 1);
        assert_eq!(result.call_graph().edge_count(), 0);
    }
}
