//! Inter-procedural control-flow graph.
//!
//! The ICFG stitches the per-method CFGs of all reachable methods together
//! using a call graph. Nodes get dense global indexes (each method's CFG
//! occupies a contiguous block); edges are classified into the four kinds
//! the inter-procedural solver transfers over:
//!
//! - `Normal`: intra-procedural flow not involving a call site,
//! - `Call`: call site to callee entry,
//! - `CallToReturn`: call site to its intra-procedural successor,
//! - `Return`: callee exit to the call site's successor.

use rustc_hash::FxHashMap;

use crate::callgraph::CallGraph;
use crate::cfg::{Cfg, CfgNode, ENTRY, EXIT};
use crate::ir::{MethodId, Program, Stmt, StmtId};

/// Global index of an ICFG node.
pub type IcfgNodeId = usize;

/// Classification of an ICFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcfgEdgeKind {
    /// Intra-procedural flow not leaving a call site.
    Normal,
    /// Caller call site to callee entry.
    Call {
        call_site: StmtId,
        callee: MethodId,
    },
    /// Call site to its intra-procedural successor.
    CallToReturn { call_site: StmtId },
    /// Callee exit back to the call site's successor.
    Return {
        call_site: StmtId,
        callee: MethodId,
    },
}

/// A classified ICFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcfgEdge {
    pub source: IcfgNodeId,
    pub target: IcfgNodeId,
    pub kind: IcfgEdgeKind,
}

/// The whole-program graph.
#[derive(Debug)]
pub struct Icfg {
    methods: Vec<MethodId>,
    cfgs: FxHashMap<MethodId, Cfg>,
    node_base: FxHashMap<MethodId, usize>,
    nodes: Vec<(MethodId, CfgNode)>,
    in_edges: Vec<Vec<IcfgEdge>>,
    out_edges: Vec<Vec<IcfgEdge>>,
    entry_methods: Vec<MethodId>,
}

impl Icfg {
    /// Build the ICFG over all methods reachable in the call graph.
    #[must_use]
    pub fn build(program: &Program, call_graph: &CallGraph<StmtId, MethodId>) -> Self {
        let methods: Vec<MethodId> = call_graph.reachable_methods().to_vec();
        let mut cfgs = FxHashMap::default();
        let mut node_base = FxHashMap::default();
        let mut nodes = Vec::new();
        for &method in &methods {
            let cfg = Cfg::build(program, method);
            node_base.insert(method, nodes.len());
            for idx in cfg.node_indices() {
                nodes.push((method, cfg.node(idx)));
            }
            cfgs.insert(method, cfg);
        }

        let mut icfg = Self {
            methods,
            cfgs,
            node_base,
            nodes,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            entry_methods: call_graph.entry_methods().to_vec(),
        };
        icfg.in_edges = vec![Vec::new(); icfg.nodes.len()];
        icfg.out_edges = vec![Vec::new(); icfg.nodes.len()];

        // Intra-procedural edges. Out-edges of a call site become
        // call-to-return edges.
        for &method in &icfg.methods.clone() {
            let base = icfg.node_base[&method];
            let cfg = &icfg.cfgs[&method];
            let mut edges = Vec::new();
            for idx in cfg.node_indices() {
                for edge in cfg.out_edges_of(idx) {
                    let kind = match cfg.node(idx) {
                        CfgNode::Stmt(stmt)
                            if matches!(program.stmt(stmt).kind, Stmt::Invoke(_)) =>
                        {
                            IcfgEdgeKind::CallToReturn { call_site: stmt }
                        }
                        _ => IcfgEdgeKind::Normal,
                    };
                    edges.push(IcfgEdge {
                        source: base + edge.source,
                        target: base + edge.target,
                        kind,
                    });
                }
            }
            for edge in edges {
                icfg.add_edge(edge);
            }
        }

        // Call and return edges.
        for edge in call_graph.edges() {
            let call_site = edge.call_site;
            let callee = edge.callee;
            let caller = program.stmt(call_site).method;
            let (Some(&caller_base), Some(&callee_base)) =
                (icfg.node_base.get(&caller), icfg.node_base.get(&callee))
            else {
                continue;
            };
            let caller_cfg = &icfg.cfgs[&caller];
            let site_node = caller_base + caller_cfg.node_of_index(program.stmt(call_site).index);
            let callee_entry = callee_base + ENTRY;
            let callee_exit = callee_base + EXIT;

            let mut edges = vec![IcfgEdge {
                source: site_node,
                target: callee_entry,
                kind: IcfgEdgeKind::Call { call_site, callee },
            }];
            let site_idx = caller_cfg.node_of_index(program.stmt(call_site).index);
            for succ in caller_cfg.succs_of(site_idx) {
                edges.push(IcfgEdge {
                    source: callee_exit,
                    target: caller_base + succ,
                    kind: IcfgEdgeKind::Return { call_site, callee },
                });
            }
            for edge in edges {
                icfg.add_edge(edge);
            }
        }

        icfg
    }

    fn add_edge(&mut self, edge: IcfgEdge) {
        self.out_edges[edge.source].push(edge);
        self.in_edges[edge.target].push(edge);
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Owning method and CFG payload of a node.
    #[inline]
    #[must_use]
    pub fn node(&self, id: IcfgNodeId) -> (MethodId, CfgNode) {
        self.nodes[id]
    }

    /// The method containing a node.
    #[inline]
    #[must_use]
    pub fn containing_method(&self, id: IcfgNodeId) -> MethodId {
        self.nodes[id].0
    }

    /// The methods included in the graph.
    #[must_use]
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    /// The entry methods of the program.
    #[must_use]
    pub fn entry_methods(&self) -> &[MethodId] {
        &self.entry_methods
    }

    /// The entry node of a method, if the method is in the graph.
    #[must_use]
    pub fn entry_node_of(&self, method: MethodId) -> Option<IcfgNodeId> {
        self.node_base.get(&method).map(|&base| base + ENTRY)
    }

    /// The global node of a statement, if its method is in the graph.
    #[must_use]
    pub fn node_of_stmt(&self, program: &Program, stmt: StmtId) -> Option<IcfgNodeId> {
        let data = program.stmt(stmt);
        let base = self.node_base.get(&data.method)?;
        Some(base + self.cfgs[&data.method].node_of_index(data.index))
    }

    /// Incoming edges of a node.
    #[must_use]
    pub fn in_edges_of(&self, id: IcfgNodeId) -> &[IcfgEdge] {
        &self.in_edges[id]
    }

    /// Outgoing edges of a node.
    #[must_use]
    pub fn out_edges_of(&self, id: IcfgNodeId) -> &[IcfgEdge] {
        &self.out_edges[id]
    }

    /// Successor nodes of a node.
    pub fn succs_of(&self, id: IcfgNodeId) -> impl Iterator<Item = IcfgNodeId> + '_ {
        self.out_edges[id].iter().map(|e| e.target)
    }

    /// All node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = IcfgNodeId> {
        0..self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callgraph::build_cha;
    use crate::ir::builder::ProgramBuilder;
    use crate::ir::hierarchy::ClassHierarchy;
    use crate::ir::PrimType;

    /// main() { r = id(7); }  with id(p) { return p; }
    fn call_program() -> (Program, StmtId) {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);

        let mut m = b.method(object, "id", "int id(int)");
        m.set_static();
        let p = m.param("p", int_ty);
        m.ret(Some(p));
        m.build();

        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", int_ty);
        let r = m.var("r", int_ty);
        m.const_assign(x, 7);
        let call = m.invoke_static(Some(r), object, "int id(int)", vec![x]);
        m.ret(None);
        let main = m.build();

        (b.entry(main).build(), call)
    }

    #[test]
    fn test_edges_classified() {
        let (program, call) = call_program();
        let hierarchy = ClassHierarchy::build(&program);
        let cg = build_cha(&program, &hierarchy);
        let icfg = Icfg::build(&program, &cg);

        let call_node = icfg.node_of_stmt(&program, call).unwrap();
        let kinds: Vec<_> = icfg.out_edges_of(call_node).iter().map(|e| e.kind).collect();
        assert!(kinds
            .iter()
            .any(|k| matches!(k, IcfgEdgeKind::Call { .. })));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, IcfgEdgeKind::CallToReturn { .. })));

        // The call site's successor receives a return edge from the callee.
        let return_target = icfg
            .out_edges_of(call_node)
            .iter()
            .find_map(|e| match e.kind {
                IcfgEdgeKind::CallToReturn { .. } => Some(e.target),
                _ => None,
            })
            .unwrap();
        assert!(icfg
            .in_edges_of(return_target)
            .iter()
            .any(|e| matches!(e.kind, IcfgEdgeKind::Return { .. })));
    }

    #[test]
    fn test_entry_node_exists_per_method() {
        let (program, _) = call_program();
        let hierarchy = ClassHierarchy::build(&program);
        let cg = build_cha(&program, &hierarchy);
        let icfg = Icfg::build(&program, &cg);

        for &method in icfg.methods() {
            let entry = icfg.entry_node_of(method).unwrap();
            assert_eq!(icfg.node(entry).1, CfgNode::Entry);
            assert_eq!(icfg.containing_method(entry), method);
        }
    }
}
