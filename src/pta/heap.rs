//! Heap abstraction.
//!
//! The heap model maps every allocation statement to one canonical abstract
//! object ([`ObjId`]). Taint objects are synthetic entries in the same arena,
//! keyed by their originating source call and taint type, so the rest of the
//! engine treats them like any other heap object.

use rustc_hash::FxHashMap;

use crate::ir::{Program, Stmt, StmtId, TypeId};

/// Handle of an abstract heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId(pub u32);

impl ObjId {
    /// Index into the owning arena.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What an abstract object stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    /// Objects allocated at a `new` statement.
    Alloc { site: StmtId },
    /// Synthetic taint object minted for a source or transfer rule.
    Taint { source: StmtId },
}

/// An abstract heap object.
#[derive(Debug, Clone, Copy)]
pub struct Obj {
    /// Provenance of the object.
    pub kind: ObjKind,
    /// Static type of the object.
    pub ty: TypeId,
}

/// Allocation-site heap model with canonical objects.
#[derive(Debug, Default)]
pub struct HeapModel {
    objs: Vec<Obj>,
    alloc_map: FxHashMap<StmtId, ObjId>,
    taint_map: FxHashMap<(StmtId, TypeId), ObjId>,
}

impl HeapModel {
    /// Create an empty heap model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Object data by handle.
    #[inline]
    #[must_use]
    pub fn obj(&self, id: ObjId) -> Obj {
        self.objs[id.index()]
    }

    /// The canonical object of an allocation statement.
    ///
    /// # Panics
    ///
    /// Panics if the statement is not a `new` statement; that is an IR
    /// producer bug.
    pub fn obj_of_alloc(&mut self, program: &Program, site: StmtId) -> ObjId {
        if let Some(id) = self.alloc_map.get(&site) {
            return *id;
        }
        let Stmt::New { ty, .. } = program.stmt(site).kind else {
            panic!("heap model queried with non-allocation statement {site:?}");
        };
        let id = ObjId(self.objs.len() as u32);
        self.objs.push(Obj {
            kind: ObjKind::Alloc { site },
            ty,
        });
        self.alloc_map.insert(site, id);
        id
    }

    /// The canonical taint object for a source call and taint type.
    pub fn taint_obj(&mut self, source: StmtId, ty: TypeId) -> ObjId {
        if let Some(id) = self.taint_map.get(&(source, ty)) {
            return *id;
        }
        let id = ObjId(self.objs.len() as u32);
        self.objs.push(Obj {
            kind: ObjKind::Taint { source },
            ty,
        });
        self.taint_map.insert((source, ty), id);
        id
    }

    /// Whether the object is a taint object.
    #[must_use]
    pub fn is_taint(&self, id: ObjId) -> bool {
        matches!(self.obj(id).kind, ObjKind::Taint { .. })
    }

    /// The source call a taint object was minted for.
    #[must_use]
    pub fn taint_source(&self, id: ObjId) -> Option<StmtId> {
        match self.obj(id).kind {
            ObjKind::Taint { source } => Some(source),
            ObjKind::Alloc { .. } => None,
        }
    }

    /// Number of abstract objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objs.len()
    }

    /// Whether no objects have been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;

    #[test]
    fn test_alloc_objects_are_canonical() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let a = b.class("A").superclass(object).build();
        let a_ty = b.reference_ty(a);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", a_ty);
        let s1 = m.new_object(x, a_ty);
        let s2 = m.new_object(x, a_ty);
        m.ret(None);
        let main = m.build();
        let program = b.entry(main).build();

        let mut heap = HeapModel::new();
        let o1 = heap.obj_of_alloc(&program, s1);
        let o2 = heap.obj_of_alloc(&program, s2);
        assert_ne!(o1, o2, "distinct sites yield distinct objects");
        assert_eq!(heap.obj_of_alloc(&program, s1), o1, "same site is canonical");
        assert!(!heap.is_taint(o1));
    }

    #[test]
    fn test_taint_objects_keyed_by_site_and_type() {
        let mut heap = HeapModel::new();
        let site = StmtId(3);
        let t1 = heap.taint_obj(site, TypeId(0));
        let t2 = heap.taint_obj(site, TypeId(1));
        assert_ne!(t1, t2);
        assert_eq!(heap.taint_obj(site, TypeId(0)), t1);
        assert!(heap.is_taint(t1));
        assert_eq!(heap.taint_source(t1), Some(site));
    }
}
