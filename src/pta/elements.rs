//! Canonical context-sensitive elements.
//!
//! The [`CSManager`] hash-conses every context-qualified element the solver
//! touches: objects, methods, call sites, and the four pointer variants.
//! Equality on the returned handles is identity; each pointer owns the
//! points-to set the solver grows.

use rustc_hash::FxHashMap;

use crate::ir::{FieldId, MethodId, StmtId, VarId};

use super::context::{ContextId, ContextTable};
use super::heap::ObjId;
use super::points_to::PointsToSet;

/// Handle of a canonical context-sensitive object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CSObjId(pub u32);

/// Handle of a canonical context-sensitive method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CSMethodId(pub u32);

/// Handle of a canonical context-sensitive call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CSCallSiteId(pub u32);

/// Handle of a canonical pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointerId(pub u32);

impl PointerId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// A context-qualified variable.
    Var(ContextId, VarId),
    /// A field of a context-sensitive object.
    InstanceField(CSObjId, FieldId),
    /// The single abstract cell shared by all indices of an array object.
    ArrayIndex(CSObjId),
    /// A static field.
    StaticField(FieldId),
}

#[derive(Debug)]
struct PointerData {
    kind: PointerKind,
    pts: PointsToSet,
}

/// Canonicalization tables for all context-sensitive elements.
#[derive(Debug, Default)]
pub struct CSManager {
    /// Interned calling contexts; selectors append through this table.
    pub contexts: ContextTable,

    pointers: Vec<PointerData>,
    pointer_map: FxHashMap<PointerKind, PointerId>,

    cs_objs: Vec<(ContextId, ObjId)>,
    cs_obj_map: FxHashMap<(ContextId, ObjId), CSObjId>,

    cs_methods: Vec<(ContextId, MethodId)>,
    cs_method_map: FxHashMap<(ContextId, MethodId), CSMethodId>,

    cs_call_sites: Vec<(ContextId, StmtId)>,
    cs_call_site_map: FxHashMap<(ContextId, StmtId), CSCallSiteId>,
}

impl CSManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pointer(&mut self, kind: PointerKind) -> PointerId {
        if let Some(id) = self.pointer_map.get(&kind) {
            return *id;
        }
        let id = PointerId(self.pointers.len() as u32);
        self.pointers.push(PointerData {
            kind,
            pts: PointsToSet::new(),
        });
        self.pointer_map.insert(kind, id);
        id
    }

    /// Canonical pointer of a context-qualified variable.
    pub fn cs_var(&mut self, ctx: ContextId, var: VarId) -> PointerId {
        self.pointer(PointerKind::Var(ctx, var))
    }

    /// Canonical pointer of an instance field.
    pub fn instance_field(&mut self, obj: CSObjId, field: FieldId) -> PointerId {
        self.pointer(PointerKind::InstanceField(obj, field))
    }

    /// Canonical pointer of an array object's element cell.
    pub fn array_index(&mut self, obj: CSObjId) -> PointerId {
        self.pointer(PointerKind::ArrayIndex(obj))
    }

    /// Canonical pointer of a static field.
    pub fn static_field(&mut self, field: FieldId) -> PointerId {
        self.pointer(PointerKind::StaticField(field))
    }

    /// Canonical context-sensitive object.
    pub fn cs_obj(&mut self, heap_ctx: ContextId, obj: ObjId) -> CSObjId {
        if let Some(id) = self.cs_obj_map.get(&(heap_ctx, obj)) {
            return *id;
        }
        let id = CSObjId(self.cs_objs.len() as u32);
        self.cs_objs.push((heap_ctx, obj));
        self.cs_obj_map.insert((heap_ctx, obj), id);
        id
    }

    /// Canonical context-sensitive method.
    pub fn cs_method(&mut self, ctx: ContextId, method: MethodId) -> CSMethodId {
        if let Some(id) = self.cs_method_map.get(&(ctx, method)) {
            return *id;
        }
        let id = CSMethodId(self.cs_methods.len() as u32);
        self.cs_methods.push((ctx, method));
        self.cs_method_map.insert((ctx, method), id);
        id
    }

    /// Canonical context-sensitive call site.
    pub fn cs_call_site(&mut self, ctx: ContextId, site: StmtId) -> CSCallSiteId {
        if let Some(id) = self.cs_call_site_map.get(&(ctx, site)) {
            return *id;
        }
        let id = CSCallSiteId(self.cs_call_sites.len() as u32);
        self.cs_call_sites.push((ctx, site));
        self.cs_call_site_map.insert((ctx, site), id);
        id
    }

    /// Existing pointer of a context-qualified variable, without creating it.
    #[must_use]
    pub fn find_var(&self, ctx: ContextId, var: VarId) -> Option<PointerId> {
        self.pointer_map.get(&PointerKind::Var(ctx, var)).copied()
    }

    /// Identity of a pointer.
    #[must_use]
    pub fn pointer_kind(&self, id: PointerId) -> PointerKind {
        self.pointers[id.index()].kind
    }

    /// Points-to set of a pointer.
    #[must_use]
    pub fn points_to(&self, id: PointerId) -> &PointsToSet {
        &self.pointers[id.index()].pts
    }

    /// Mutable points-to set of a pointer.
    pub fn points_to_mut(&mut self, id: PointerId) -> &mut PointsToSet {
        &mut self.pointers[id.index()].pts
    }

    /// Heap context and object of a context-sensitive object.
    #[must_use]
    pub fn cs_obj_data(&self, id: CSObjId) -> (ContextId, ObjId) {
        self.cs_objs[id.0 as usize]
    }

    /// Context and method of a context-sensitive method.
    #[must_use]
    pub fn cs_method_data(&self, id: CSMethodId) -> (ContextId, MethodId) {
        self.cs_methods[id.0 as usize]
    }

    /// Context and call site of a context-sensitive call site.
    #[must_use]
    pub fn cs_call_site_data(&self, id: CSCallSiteId) -> (ContextId, StmtId) {
        self.cs_call_sites[id.0 as usize]
    }

    /// All pointer handles created so far.
    pub fn pointer_ids(&self) -> impl Iterator<Item = PointerId> {
        (0..self.pointers.len() as u32).map(PointerId)
    }

    /// Number of canonical pointers.
    #[must_use]
    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }
}
