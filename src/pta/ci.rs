//! Context-insensitive pointer analysis.
//!
//! The CI analysis is the CS solver run with the singleton context universe:
//! every method, object and call site lives in the empty context, so the
//! canonicalization collapses and the algorithm degenerates to the classic
//! Andersen-style whole-program analysis. The result additionally projects
//! the call graph down to plain statement/method handles.

use tracing::info;

use crate::callgraph::{CallGraph, Edge};
use crate::ir::hierarchy::ClassHierarchy;
use crate::ir::{MethodId, Program, StmtId};

use super::context::ContextInsensitiveSelector;
use super::solver::Solver;
use super::PointerAnalysisResult;

/// Result of the context-insensitive analysis: the full pointer-analysis
/// result plus the call graph over plain handles.
pub struct CIPTAResult {
    result: PointerAnalysisResult,
    call_graph: CallGraph<StmtId, MethodId>,
}

impl CIPTAResult {
    /// The underlying pointer-analysis result (points-to sets, PFG).
    #[must_use]
    pub fn result(&self) -> &PointerAnalysisResult {
        &self.result
    }

    /// The context-insensitive call graph.
    #[must_use]
    pub fn call_graph(&self) -> &CallGraph<StmtId, MethodId> {
        &self.call_graph
    }

    /// Split into the pointer-analysis result and the call graph, e.g. to
    /// store the former in an [`crate::options::AnalysisRegistry`].
    #[must_use]
    pub fn into_parts(self) -> (PointerAnalysisResult, CallGraph<StmtId, MethodId>) {
        (self.result, self.call_graph)
    }
}

/// Run the context-insensitive pointer analysis from the program entry.
#[must_use]
pub fn solve_ci(program: &Program, hierarchy: &ClassHierarchy) -> CIPTAResult {
    let solver = Solver::with_taint(
        program,
        hierarchy,
        Box::new(ContextInsensitiveSelector),
        None,
    );
    let result = solver.solve();
    let call_graph = project_call_graph(&result);
    info!(
        reachable = call_graph.reachable_methods().len(),
        edges = call_graph.edge_count(),
        "context-insensitive pointer analysis finished"
    );
    CIPTAResult { result, call_graph }
}

/// Project the context-sensitive call graph down to plain handles. With the
/// singleton context universe this is a bijection; with a real selector it
/// merges contexts.
#[must_use]
pub fn project_call_graph(result: &PointerAnalysisResult) -> CallGraph<StmtId, MethodId> {
    let cs = result.cs_manager();
    let cs_graph = result.call_graph();
    let mut call_graph: CallGraph<StmtId, MethodId> = CallGraph::new();
    for &cs_method in cs_graph.entry_methods() {
        let (_, method) = cs.cs_method_data(cs_method);
        call_graph.add_entry_method(method);
    }
    for &cs_method in cs_graph.reachable_methods() {
        let (_, method) = cs.cs_method_data(cs_method);
        call_graph.add_reachable_method(method);
    }
    for edge in cs_graph.edges() {
        let (_, site) = cs.cs_call_site_data(edge.call_site);
        let (_, callee) = cs.cs_method_data(edge.callee);
        call_graph.add_edge(Edge {
            kind: edge.kind,
            call_site: site,
            callee,
        });
    }
    call_graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;

    /// main() { A a1 = new A(); A a2 = a1; }
    #[test]
    fn test_copy_aliases_point_to_same_object() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let a = b.class("A").superclass(object).build();
        let a_ty = b.reference_ty(a);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let a1 = m.var("a1", a_ty);
        let a2 = m.var("a2", a_ty);
        m.new_object(a1, a_ty);
        m.copy(a2, a1);
        m.ret(None);
        let main = m.build();
        let program = b.entry(main).build();
        let hierarchy = ClassHierarchy::build(&program);

        let pta = solve_ci(&program, &hierarchy);
        assert_eq!(pta.result().pts(a1).len(), 1);
        assert_eq!(pta.result().pts(a1), pta.result().pts(a2));
    }

    /// Recursion terminates: f() calls f().
    #[test]
    fn test_direct_recursion_terminates() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        m.invoke_static(None, object, "void f()", vec![]);
        m.ret(None);
        let f = m.build();
        let program = b.entry(f).build();
        let hierarchy = ClassHierarchy::build(&program);

        let pta = solve_ci(&program, &hierarchy);
        assert_eq!(pta.call_graph().reachable_methods(), &[f]);
        assert_eq!(pta.call_graph().edge_count(), 1);
    }

    /// Mutual recursion terminates: f() calls g(), g() calls f().
    #[test]
    fn test_mutual_recursion_terminates() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();

        let mut m = b.method(object, "f", "void f()");
        m.set_static();
        m.invoke_static(None, object, "void g()", vec![]);
        m.ret(None);
        let f = m.build();

        let mut m = b.method(object, "g", "void g()");
        m.set_static();
        m.invoke_static(None, object, "void f()", vec![]);
        m.ret(None);
        let g = m.build();

        let program = b.entry(f).build();
        let hierarchy = ClassHierarchy::build(&program);

        let pta = solve_ci(&program, &hierarchy);
        assert!(pta.call_graph().is_reachable(f));
        assert!(pta.call_graph().is_reachable(g));
        assert_eq!(pta.call_graph().edge_count(), 2);
    }
}
