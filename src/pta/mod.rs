//! Whole-program pointer analysis.
//!
//! The solver ([`solver::Solver`]) runs a monotone fixed-point iteration
//! over a pointer-flow graph, discovering reachable methods, call edges and
//! points-to facts mutually. Context sensitivity is pluggable through
//! [`context::ContextSelector`]; the context-insensitive analysis
//! ([`ci::solve_ci`]) is the same algorithm run with the singleton context
//! universe.

pub mod ci;
pub mod context;
pub mod elements;
pub mod heap;
pub mod pfg;
pub mod points_to;
pub mod solver;

use std::any::Any;
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::callgraph::CallGraph;
use crate::ir::VarId;

use self::context::ContextId;
use self::elements::{CSCallSiteId, CSManager, CSMethodId, PointerKind};
use self::heap::{HeapModel, ObjId};
use self::pfg::PointerFlowGraph;
use self::points_to::PointsToSet;

/// Result of a context-sensitive pointer analysis: the canonical element
/// tables, the pointer-flow graph, the call graph, the context-collapsed
/// points-to view, and a typed key-value store for co-computed results
/// (e.g. taint flows).
pub struct PointerAnalysisResult {
    cs: CSManager,
    heap: HeapModel,
    pfg: PointerFlowGraph,
    call_graph: CallGraph<CSCallSiteId, CSMethodId>,
    ci_pts: FxHashMap<VarId, BTreeSet<ObjId>>,
    vars: Vec<VarId>,
    empty: BTreeSet<ObjId>,
    aux: FxHashMap<String, Box<dyn Any>>,
}

impl PointerAnalysisResult {
    pub(crate) fn new(
        cs: CSManager,
        heap: HeapModel,
        pfg: PointerFlowGraph,
        call_graph: CallGraph<CSCallSiteId, CSMethodId>,
    ) -> Self {
        let mut ci_pts: FxHashMap<VarId, BTreeSet<ObjId>> = FxHashMap::default();
        for pointer in cs.pointer_ids() {
            if let PointerKind::Var(_, var) = cs.pointer_kind(pointer) {
                let entry = ci_pts.entry(var).or_default();
                for cs_obj in cs.points_to(pointer).iter() {
                    let (_, obj) = cs.cs_obj_data(cs_obj);
                    entry.insert(obj);
                }
            }
        }
        let mut vars: Vec<VarId> = ci_pts.keys().copied().collect();
        vars.sort_unstable();
        Self {
            cs,
            heap,
            pfg,
            call_graph,
            ci_pts,
            vars,
            empty: BTreeSet::new(),
            aux: FxHashMap::default(),
        }
    }

    /// Context-collapsed points-to set of a variable.
    #[must_use]
    pub fn pts(&self, var: VarId) -> &BTreeSet<ObjId> {
        self.ci_pts.get(&var).unwrap_or(&self.empty)
    }

    /// Points-to set of a context-qualified variable, if the solver ever
    /// created its pointer.
    #[must_use]
    pub fn cs_pts(&self, ctx: ContextId, var: VarId) -> Option<&PointsToSet> {
        self.cs.find_var(ctx, var).map(|p| self.cs.points_to(p))
    }

    /// Variables with a points-to pointer, in handle order.
    #[must_use]
    pub fn vars(&self) -> &[VarId] {
        &self.vars
    }

    /// The canonical element tables.
    #[must_use]
    pub fn cs_manager(&self) -> &CSManager {
        &self.cs
    }

    /// The heap model, including any taint objects.
    #[must_use]
    pub fn heap(&self) -> &HeapModel {
        &self.heap
    }

    /// The pointer-flow graph at the fixed point.
    #[must_use]
    pub fn pfg(&self) -> &PointerFlowGraph {
        &self.pfg
    }

    /// The context-sensitive call graph.
    #[must_use]
    pub fn call_graph(&self) -> &CallGraph<CSCallSiteId, CSMethodId> {
        &self.call_graph
    }

    /// Store an auxiliary result under an ID.
    pub fn store_aux<T: Any>(&mut self, id: impl Into<String>, value: T) {
        self.aux.insert(id.into(), Box::new(value));
    }

    /// Fetch an auxiliary result by ID.
    #[must_use]
    pub fn aux<T: Any>(&self, id: &str) -> Option<&T> {
        self.aux.get(id).and_then(|v| v.downcast_ref::<T>())
    }
}
