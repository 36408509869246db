//! Taint tracking co-iterated with the context-sensitive pointer analysis.
//!
//! Sources mint synthetic taint objects at matching call results; transfers
//! re-mint taint across calls (base to result, argument to base, argument to
//! result); sinks are checked once the solve finishes by scanning the
//! context-sensitive call graph. Taint objects live in the ordinary heap
//! arena under the empty heap context, so pointer propagation moves them
//! like any allocation.
//!
//! The hooks return work-list entries instead of touching the solver's queue
//! directly; the solver applies them, which keeps the co-iteration free of
//! shared mutable state.

pub mod config;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::callgraph::{resolve_declared_target, CallGraph};
use crate::ir::hierarchy::ClassHierarchy;
use crate::ir::{Program, StmtId, VarId};
use crate::pta::context::ContextId;
use crate::pta::elements::{CSCallSiteId, CSManager, CSMethodId, CSObjId, PointerId};
use crate::pta::heap::HeapModel;

pub use config::{Sink, Source, TaintConfig, TaintTransfer, BASE, RESULT};

/// A reported taint flow: a source call whose taint reaches the given
/// argument of a sink call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaintFlow {
    /// The call site that produced the taint object.
    pub source_call: StmtId,
    /// The call site whose argument the taint reached.
    pub sink_call: StmtId,
    /// The tainted argument's position.
    pub index: usize,
}

/// ID under which the flow set is stored in the pointer-analysis result.
pub const TAINT_FLOWS_ID: &str = "taint-flows";

/// The taint pipeline state carried by the context-sensitive solver.
#[derive(Debug)]
pub struct TaintAnalysis {
    config: TaintConfig,
}

impl TaintAnalysis {
    /// Create the pipeline from a resolved configuration.
    #[must_use]
    pub fn new(config: TaintConfig) -> Self {
        Self { config }
    }

    /// Apply source rules at a processed call site. Returns the
    /// context-sensitive taint objects to enqueue at the call's result.
    pub fn process_source(
        &self,
        program: &Program,
        hierarchy: &ClassHierarchy,
        heap: &mut HeapModel,
        cs: &mut CSManager,
        invoke_stmt: StmtId,
    ) -> Vec<CSObjId> {
        let Some(invoke) = program.invoke_at(invoke_stmt) else {
            return Vec::new();
        };
        let Some(target) = resolve_declared_target(program, hierarchy, invoke) else {
            return Vec::new();
        };
        let mut objs = Vec::new();
        for source in &self.config.sources {
            if source.method == target && source.ty == program.method(target).ret_ty {
                let taint = heap.taint_obj(invoke_stmt, source.ty);
                objs.push(cs.cs_obj(ContextId::EMPTY, taint));
            }
        }
        objs
    }

    /// Apply transfer rules at a call site. `recv_var` is the receiver
    /// observed for the call (absent for static calls); `result_var` is the
    /// call's left-hand side. Returns `(pointer, taint object)` entries for
    /// the solver's work list.
    #[allow(clippy::too_many_arguments)]
    pub fn process_transfer(
        &self,
        program: &Program,
        hierarchy: &ClassHierarchy,
        heap: &mut HeapModel,
        cs: &mut CSManager,
        invoke_ctx: ContextId,
        recv_var: Option<VarId>,
        result_var: Option<VarId>,
        invoke_stmt: StmtId,
    ) -> Vec<(PointerId, CSObjId)> {
        let Some(invoke) = program.invoke_at(invoke_stmt) else {
            return Vec::new();
        };
        let Some(target) = resolve_declared_target(program, hierarchy, invoke) else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        for transfer in &self.config.transfers {
            if transfer.method != target {
                continue;
            }
            match (transfer.from, transfer.to) {
                (BASE, RESULT) => {
                    let Some(recv) = recv_var else { continue };
                    let tainted = self.tainted_sources_of(cs, heap, invoke_ctx, recv);
                    if let Some(result) = result_var {
                        let result_ptr = cs.cs_var(invoke_ctx, result);
                        for source in tainted {
                            let taint = heap.taint_obj(source, transfer.ty);
                            entries.push((result_ptr, cs.cs_obj(ContextId::EMPTY, taint)));
                        }
                    }
                }
                (from, BASE) if from >= 0 => {
                    let Some(recv) = recv_var else { continue };
                    let arg = invoke.args[from as usize];
                    let tainted = self.tainted_sources_of(cs, heap, invoke_ctx, arg);
                    let recv_ptr = cs.cs_var(invoke_ctx, recv);
                    for source in tainted {
                        let taint = heap.taint_obj(source, transfer.ty);
                        entries.push((recv_ptr, cs.cs_obj(ContextId::EMPTY, taint)));
                    }
                }
                (from, RESULT) if from >= 0 => {
                    let arg = invoke.args[from as usize];
                    let tainted = self.tainted_sources_of(cs, heap, invoke_ctx, arg);
                    if let Some(result) = result_var {
                        let result_ptr = cs.cs_var(invoke_ctx, result);
                        for source in tainted {
                            let taint = heap.taint_obj(source, transfer.ty);
                            entries.push((result_ptr, cs.cs_obj(ContextId::EMPTY, taint)));
                        }
                    }
                }
                // Shapes are validated at configuration load.
                _ => unreachable!("invalid transfer shape"),
            }
        }
        entries
    }

    /// Source calls of the taint objects currently pointed to by a variable.
    fn tainted_sources_of(
        &self,
        cs: &mut CSManager,
        heap: &HeapModel,
        ctx: ContextId,
        var: VarId,
    ) -> Vec<StmtId> {
        let ptr = cs.cs_var(ctx, var);
        cs.points_to(ptr)
            .iter()
            .filter_map(|cs_obj| {
                let (_, obj) = cs.cs_obj_data(cs_obj);
                heap.taint_source(obj)
            })
            .collect()
    }

    /// Collect all source-to-sink flows after the solve has finished.
    pub fn collect_flows(
        &self,
        program: &Program,
        cs: &CSManager,
        heap: &HeapModel,
        call_graph: &CallGraph<CSCallSiteId, CSMethodId>,
    ) -> BTreeSet<TaintFlow> {
        let mut flows = BTreeSet::new();
        for edge in call_graph.edges() {
            let (_, callee) = cs.cs_method_data(edge.callee);
            for sink in &self.config.sinks {
                if sink.method != callee {
                    continue;
                }
                let (ctx, sink_call) = cs.cs_call_site_data(edge.call_site);
                let invoke = program
                    .invoke_at(sink_call)
                    .expect("call-graph edge from non-invoke statement");
                let arg = invoke.args[sink.index];
                let Some(arg_ptr) = cs.find_var(ctx, arg) else {
                    continue;
                };
                for cs_obj in cs.points_to(arg_ptr).iter() {
                    let (_, obj) = cs.cs_obj_data(cs_obj);
                    if let Some(source_call) = heap.taint_source(obj) {
                        flows.insert(TaintFlow {
                            source_call,
                            sink_call,
                            index: sink.index,
                        });
                    }
                }
            }
        }
        debug!(flows = flows.len(), "taint flows collected");
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taint_flow_ordering() {
        let a = TaintFlow {
            source_call: StmtId(1),
            sink_call: StmtId(5),
            index: 0,
        };
        let b = TaintFlow {
            source_call: StmtId(1),
            sink_call: StmtId(5),
            index: 1,
        };
        let c = TaintFlow {
            source_call: StmtId(2),
            sink_call: StmtId(3),
            index: 0,
        };
        let set: BTreeSet<TaintFlow> = [c, b, a].into_iter().collect();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![a, b, c]);
    }
}
