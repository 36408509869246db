//! Call graphs and class-hierarchy-analysis construction.
//!
//! [`CallGraph`] is generic over its call-site and method handle types so the
//! same structure serves both the context-insensitive graph (`StmtId` sites,
//! `MethodId` nodes) and the context-sensitive graph built during pointer
//! analysis (context-qualified handles). Insertions are idempotent and report
//! newness, which the solvers use to gate further processing.
//!
//! [`build_cha`] constructs a whole-program graph by class-hierarchy
//! analysis: a breadth-first walk over reachable methods, resolving every
//! call site against the static type information alone. Virtual and
//! interface sites resolve against the entire subtype set of the declared
//! class; dispatch misses (e.g. an interface method with no concrete
//! implementor below some subtype) are silently skipped.

use std::collections::VecDeque;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ir::hierarchy::ClassHierarchy;
use crate::ir::{Invoke, InvokeKind, MethodId, Program, Stmt, StmtId};

/// Classification of a call edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Static,
    Special,
    Virtual,
    Interface,
}

impl From<InvokeKind> for CallKind {
    fn from(kind: InvokeKind) -> Self {
        match kind {
            InvokeKind::Static => CallKind::Static,
            InvokeKind::Special => CallKind::Special,
            InvokeKind::Virtual => CallKind::Virtual,
            InvokeKind::Interface => CallKind::Interface,
        }
    }
}

/// A call-graph edge from a call site to a resolved callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge<S, M> {
    pub kind: CallKind,
    pub call_site: S,
    pub callee: M,
}

/// A call graph over arbitrary call-site and method handles.
#[derive(Debug)]
pub struct CallGraph<S, M> {
    entry_methods: Vec<M>,
    reachable: FxHashSet<M>,
    reachable_order: Vec<M>,
    edges: Vec<Edge<S, M>>,
    edge_set: FxHashSet<(S, M)>,
    callees: FxHashMap<S, Vec<M>>,
}

impl<S, M> Default for CallGraph<S, M> {
    fn default() -> Self {
        Self {
            entry_methods: Vec::new(),
            reachable: FxHashSet::default(),
            reachable_order: Vec::new(),
            edges: Vec::new(),
            edge_set: FxHashSet::default(),
            callees: FxHashMap::default(),
        }
    }
}

impl<S, M> CallGraph<S, M>
where
    S: Copy + Eq + Hash,
    M: Copy + Eq + Hash,
{
    /// Create an empty call graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry method. Reachability is recorded separately by the
    /// builder or solver via [`Self::add_reachable_method`].
    pub fn add_entry_method(&mut self, method: M) {
        self.entry_methods.push(method);
    }

    /// Mark a method reachable. Returns `true` iff it was not reachable
    /// before.
    pub fn add_reachable_method(&mut self, method: M) -> bool {
        if self.reachable.insert(method) {
            self.reachable_order.push(method);
            true
        } else {
            false
        }
    }

    /// Whether a method is reachable.
    #[must_use]
    pub fn is_reachable(&self, method: M) -> bool {
        self.reachable.contains(&method)
    }

    /// Add a call edge. Returns `true` iff the edge is new.
    pub fn add_edge(&mut self, edge: Edge<S, M>) -> bool {
        if self.edge_set.insert((edge.call_site, edge.callee)) {
            self.callees
                .entry(edge.call_site)
                .or_default()
                .push(edge.callee);
            self.edges.push(edge);
            true
        } else {
            false
        }
    }

    /// Entry methods in registration order.
    #[must_use]
    pub fn entry_methods(&self) -> &[M] {
        &self.entry_methods
    }

    /// Reachable methods in discovery order.
    #[must_use]
    pub fn reachable_methods(&self) -> &[M] {
        &self.reachable_order
    }

    /// All edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge<S, M>] {
        &self.edges
    }

    /// Callees resolved at a call site, in discovery order.
    #[must_use]
    pub fn callees_of(&self, call_site: S) -> &[M] {
        self.callees.get(&call_site).map_or(&[], Vec::as_slice)
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve the callee of a call site given the runtime class of the
/// receiver (absent for static calls). Used by the pointer-analysis solvers
/// for on-the-fly call-graph construction. `None` means dispatch miss: no
/// call edge is added.
#[must_use]
pub fn resolve_callee(
    program: &Program,
    hierarchy: &ClassHierarchy,
    recv_class: Option<crate::ir::ClassId>,
    invoke: &Invoke,
) -> Option<MethodId> {
    match invoke.kind {
        InvokeKind::Static => program
            .class(invoke.callee.class)
            .declared_method(invoke.callee.subsig),
        InvokeKind::Special => {
            hierarchy.dispatch(program, invoke.callee.class, invoke.callee.subsig)
        }
        InvokeKind::Virtual | InvokeKind::Interface => {
            let class = recv_class?;
            hierarchy.dispatch(program, class, invoke.callee.subsig)
        }
    }
}

/// Resolve the statically declared target of a call site, ignoring receiver
/// objects: the declared method for static calls, the dispatch result from
/// the declared class otherwise. Used by the taint pipeline to match rule
/// signatures against call sites.
#[must_use]
pub fn resolve_declared_target(
    program: &Program,
    hierarchy: &ClassHierarchy,
    invoke: &Invoke,
) -> Option<MethodId> {
    match invoke.kind {
        InvokeKind::Static => program
            .class(invoke.callee.class)
            .declared_method(invoke.callee.subsig),
        _ => hierarchy.dispatch(program, invoke.callee.class, invoke.callee.subsig),
    }
}

/// Resolve all possible callees of a call site by class-hierarchy analysis.
fn resolve_cha(
    program: &Program,
    hierarchy: &ClassHierarchy,
    invoke: &Invoke,
) -> Vec<MethodId> {
    match invoke.kind {
        InvokeKind::Static => program
            .class(invoke.callee.class)
            .declared_method(invoke.callee.subsig)
            .into_iter()
            .collect(),
        InvokeKind::Special => {
            hierarchy
                .dispatch(program, invoke.callee.class, invoke.callee.subsig)
                .into_iter()
                .collect()
        }
        InvokeKind::Virtual | InvokeKind::Interface => {
            let mut seen = FxHashSet::default();
            let mut targets = Vec::new();
            for subtype in hierarchy.all_subtypes_of(invoke.callee.class) {
                // Abstract subtypes (interfaces in particular) may have no
                // concrete target; such misses are skipped, not reported.
                if let Some(m) = hierarchy.dispatch(program, subtype, invoke.callee.subsig) {
                    if seen.insert(m) {
                        targets.push(m);
                    }
                }
            }
            targets
        }
    }
}

/// Build a whole-program call graph from the entry method by class-hierarchy
/// analysis.
#[must_use]
pub fn build_cha(program: &Program, hierarchy: &ClassHierarchy) -> CallGraph<StmtId, MethodId> {
    let entry = program.entry_method();
    let mut call_graph = CallGraph::new();
    call_graph.add_entry_method(entry);

    let mut worklist: VecDeque<MethodId> = VecDeque::new();
    worklist.push_back(entry);

    while let Some(method) = worklist.pop_front() {
        if !call_graph.add_reachable_method(method) {
            continue;
        }
        for &stmt in &program.method(method).stmts {
            let Stmt::Invoke(invoke) = &program.stmt(stmt).kind else {
                continue;
            };
            for callee in resolve_cha(program, hierarchy, invoke) {
                call_graph.add_edge(Edge {
                    kind: invoke.kind.into(),
                    call_site: stmt,
                    callee,
                });
                worklist.push_back(callee);
            }
        }
    }

    debug!(
        methods = call_graph.reachable_methods().len(),
        edges = call_graph.edge_count(),
        "CHA call graph built"
    );
    call_graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;
    use crate::ir::PrimType;

    /// main() { A x = ...; x.m(); } with A <- {B, C} both overriding m().
    fn virtual_program() -> (Program, StmtId) {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let a = b.class("A").superclass(object).abstract_class().build();
        let cls_b = b.class("B").superclass(a).build();
        let cls_c = b.class("C").superclass(a).build();
        let int_ty = b.prim_ty(PrimType::Int);
        let a_ty = b.reference_ty(a);

        let mut m = b.method(a, "m", "int m()");
        m.set_abstract();
        m.build();
        for class in [cls_b, cls_c] {
            let mut m = b.method(class, "m", "int m()");
            let r = m.var("r", int_ty);
            m.const_assign(r, 1);
            m.ret(Some(r));
            m.build();
        }

        let b_ty = b.reference_ty(cls_b);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", a_ty);
        m.new_object(x, b_ty);
        let call = m.invoke_virtual(None, x, a, "int m()", vec![]);
        m.ret(None);
        let main = m.build();
        (b.entry(main).build(), call)
    }

    #[test]
    fn test_cha_resolves_all_overrides() {
        let (program, call) = virtual_program();
        let hierarchy = ClassHierarchy::build(&program);
        let cg = build_cha(&program, &hierarchy);

        let callees = cg.callees_of(call);
        assert_eq!(callees.len(), 2, "both overrides are CHA targets");
        for &callee in callees {
            assert!(cg.is_reachable(callee));
        }
    }

    #[test]
    fn test_add_edge_idempotent() {
        let mut cg: CallGraph<u32, u32> = CallGraph::new();
        let edge = Edge {
            kind: CallKind::Static,
            call_site: 1,
            callee: 2,
        };
        assert!(cg.add_edge(edge));
        assert!(!cg.add_edge(edge));
        assert_eq!(cg.edge_count(), 1);
    }

    #[test]
    fn test_reachable_idempotent() {
        let mut cg: CallGraph<u32, u32> = CallGraph::new();
        assert!(cg.add_reachable_method(7));
        assert!(!cg.add_reachable_method(7));
        assert_eq!(cg.reachable_methods(), &[7]);
    }

    #[test]
    fn test_abstract_without_implementor_is_skipped() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let i = b.class("I").interface().build();
        let i_ty = b.reference_ty(i);
        let mut m = b.method(i, "m", "int m()");
        m.set_abstract();
        m.build();

        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", i_ty);
        let call = m.invoke_interface(None, x, i, "int m()", vec![]);
        m.ret(None);
        let main = m.build();
        let program = b.entry(main).build();
        let hierarchy = ClassHierarchy::build(&program);

        let cg = build_cha(&program, &hierarchy);
        assert!(cg.callees_of(call).is_empty(), "no concrete target exists");
    }
}
