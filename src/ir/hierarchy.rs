//! Class-hierarchy queries.
//!
//! Built once from a [`Program`], the hierarchy answers the queries the
//! call-graph builders depend on: direct subclass/subinterface/implementor
//! enumeration, declared-method lookup, and method dispatch. Transitive
//! subtype enumeration and dispatch results are memoized; diamond-shaped
//! hierarchies are visited once per node.

use std::cell::RefCell;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{ClassId, MethodId, Program, SubsigId};

/// Subclass/subinterface/implementor indexes plus memoized dispatch.
#[derive(Debug)]
pub struct ClassHierarchy {
    direct_subclasses: FxHashMap<ClassId, Vec<ClassId>>,
    direct_subinterfaces: FxHashMap<ClassId, Vec<ClassId>>,
    direct_implementors: FxHashMap<ClassId, Vec<ClassId>>,
    subtype_cache: RefCell<FxHashMap<ClassId, Vec<ClassId>>>,
    dispatch_cache: RefCell<FxHashMap<(ClassId, SubsigId), Option<MethodId>>>,
}

impl ClassHierarchy {
    /// Index the hierarchy of a program.
    #[must_use]
    pub fn build(program: &Program) -> Self {
        let mut direct_subclasses: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        let mut direct_subinterfaces: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        let mut direct_implementors: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        for id in program.class_ids() {
            let class = program.class(id);
            if let Some(superclass) = class.superclass {
                if !class.is_interface {
                    direct_subclasses.entry(superclass).or_default().push(id);
                }
            }
            for &interface in &class.interfaces {
                if class.is_interface {
                    direct_subinterfaces.entry(interface).or_default().push(id);
                } else {
                    direct_implementors.entry(interface).or_default().push(id);
                }
            }
        }
        Self {
            direct_subclasses,
            direct_subinterfaces,
            direct_implementors,
            subtype_cache: RefCell::new(FxHashMap::default()),
            dispatch_cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Direct subclasses of a class.
    #[must_use]
    pub fn direct_subclasses_of(&self, class: ClassId) -> &[ClassId] {
        self.direct_subclasses
            .get(&class)
            .map_or(&[], Vec::as_slice)
    }

    /// Direct subinterfaces of an interface.
    #[must_use]
    pub fn direct_subinterfaces_of(&self, class: ClassId) -> &[ClassId] {
        self.direct_subinterfaces
            .get(&class)
            .map_or(&[], Vec::as_slice)
    }

    /// Direct implementors of an interface.
    #[must_use]
    pub fn direct_implementors_of(&self, class: ClassId) -> &[ClassId] {
        self.direct_implementors
            .get(&class)
            .map_or(&[], Vec::as_slice)
    }

    /// The transitive subtype set of a class, including the class itself,
    /// its subclasses, subinterfaces and implementors. The traversal is
    /// iterative and memoizes its result; each node is visited once even on
    /// diamond-shaped hierarchies.
    #[must_use]
    pub fn all_subtypes_of(&self, class: ClassId) -> Vec<ClassId> {
        if let Some(cached) = self.subtype_cache.borrow().get(&class) {
            return cached.clone();
        }
        let mut seen: FxHashSet<ClassId> = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            stack.extend_from_slice(self.direct_subclasses_of(current));
            stack.extend_from_slice(self.direct_subinterfaces_of(current));
            stack.extend_from_slice(self.direct_implementors_of(current));
        }
        order.sort_unstable();
        self.subtype_cache.borrow_mut().insert(class, order.clone());
        order
    }

    /// Dispatch a subsignature from the given class: the declared,
    /// non-abstract method in the class, otherwise the nearest such method
    /// up the superclass chain. `None` when no concrete method exists, which
    /// callers must treat as "no call edge", not as an error.
    #[must_use]
    pub fn dispatch(
        &self,
        program: &Program,
        class: ClassId,
        subsig: SubsigId,
    ) -> Option<MethodId> {
        if let Some(cached) = self.dispatch_cache.borrow().get(&(class, subsig)) {
            return *cached;
        }
        let mut current = Some(class);
        let mut resolved = None;
        while let Some(c) = current {
            if let Some(method) = program.class(c).declared_method(subsig) {
                if !program.method(method).is_abstract {
                    resolved = Some(method);
                    break;
                }
            }
            current = program.class(c).superclass;
        }
        self.dispatch_cache
            .borrow_mut()
            .insert((class, subsig), resolved);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;

    /// Object <- A <- {B, C}; I is an interface implemented by C.
    fn diamond_program() -> (Program, ClassHierarchy) {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let i = b.class("I").interface().build();
        let a = b.class("A").superclass(object).build();
        let bb = b.class("B").superclass(a).build();
        let c = b.class("C").superclass(a).implements(i).build();

        let mut m = b.method(a, "m", "int m()");
        m.ret(None);
        m.build();
        let mut m = b.method(c, "m", "int m()");
        m.ret(None);
        m.build();

        let _ = (object, bb);
        let program = b.build();
        let hierarchy = ClassHierarchy::build(&program);
        (program, hierarchy)
    }

    #[test]
    fn test_direct_queries() {
        let (program, hierarchy) = diamond_program();
        let a = program.class_by_name("A").unwrap();
        let i = program.class_by_name("I").unwrap();
        let c = program.class_by_name("C").unwrap();

        assert_eq!(hierarchy.direct_subclasses_of(a).len(), 2);
        assert_eq!(hierarchy.direct_implementors_of(i), &[c]);
        assert!(hierarchy.direct_subinterfaces_of(i).is_empty());
    }

    #[test]
    fn test_all_subtypes_includes_self_and_transitive() {
        let (program, hierarchy) = diamond_program();
        let a = program.class_by_name("A").unwrap();
        let b = program.class_by_name("B").unwrap();
        let c = program.class_by_name("C").unwrap();

        let subtypes = hierarchy.all_subtypes_of(a);
        assert!(subtypes.contains(&a));
        assert!(subtypes.contains(&b));
        assert!(subtypes.contains(&c));
        // Memoized second query returns the same set.
        assert_eq!(hierarchy.all_subtypes_of(a), subtypes);
    }

    #[test]
    fn test_dispatch_walks_superclasses() {
        let (program, hierarchy) = diamond_program();
        let a = program.class_by_name("A").unwrap();
        let b = program.class_by_name("B").unwrap();
        let c = program.class_by_name("C").unwrap();
        let subsig = program.subsig_by_text("int m()").unwrap();

        let on_a = hierarchy.dispatch(&program, a, subsig).unwrap();
        // B inherits A.m; C overrides it.
        assert_eq!(hierarchy.dispatch(&program, b, subsig), Some(on_a));
        let on_c = hierarchy.dispatch(&program, c, subsig).unwrap();
        assert_ne!(on_c, on_a);
    }

    #[test]
    fn test_dispatch_miss_is_none() {
        let (program, hierarchy) = diamond_program();
        let object = program.class_by_name("Object").unwrap();
        let subsig = program.subsig_by_text("int m()").unwrap();
        assert_eq!(hierarchy.dispatch(&program, object, subsig), None);
    }
}
