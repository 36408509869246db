//! Fluent construction of [`Program`]s.
//!
//! Handles are allocated eagerly: a method reserves its [`MethodId`] when the
//! builder is created and statements receive their global [`StmtId`] as they
//! are emitted, so allocation sites and call sites can be referenced (e.g. by
//! taint configurations or test assertions) before the program is finished.
//!
//! Forward branches are emitted with a placeholder target and patched once
//! the target statement exists:
//!
//! ```
//! use opal::ir::builder::ProgramBuilder;
//! use opal::ir::{Exp, PrimType};
//!
//! let mut b = ProgramBuilder::new();
//! let object = b.class("Object").build();
//! let main_class = b.class("Main").superclass(object).build();
//! let int_ty = b.prim_ty(PrimType::Int);
//!
//! let mut m = b.method(main_class, "main", "void main()");
//! m.set_static();
//! let x = m.var("x", int_ty);
//! let cond = m.const_assign(x, 1);
//! let branch = m.if_(Exp::Var(x));
//! let dead = m.const_assign(x, 2);
//! let live = m.const_assign(x, 3);
//! m.patch_if(branch, live);
//! m.ret(None);
//! let main = m.build();
//! let _program = b.entry(main).build();
//! # let _ = (cond, dead);
//! ```

use rustc_hash::FxHashMap;

use super::{
    Class, ClassId, Exp, Field, FieldId, Invoke, InvokeKind, Method, MethodId, MethodRef,
    PrimType, Program, Stmt, StmtData, StmtId, SubsigId, TypeId, TypeKind, Var, VarId,
};

/// Placeholder for a branch target that has not been patched yet.
const UNPATCHED: usize = usize::MAX;

/// Builder for a whole [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a primitive type.
    pub fn prim_ty(&mut self, prim: PrimType) -> TypeId {
        self.intern_type(TypeKind::Prim(prim))
    }

    /// Intern a reference type for the given class.
    pub fn reference_ty(&mut self, class: ClassId) -> TypeId {
        self.intern_type(TypeKind::Reference(class))
    }

    /// Intern an array type with the given element type.
    pub fn array_ty(&mut self, elem: TypeId) -> TypeId {
        self.intern_type(TypeKind::Array(elem))
    }

    fn intern_type(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.program.type_map.get(&kind) {
            return *id;
        }
        let id = TypeId(self.program.types.len() as u32);
        self.program.types.push(kind);
        self.program.type_map.insert(kind, id);
        id
    }

    /// Intern a method subsignature.
    pub fn intern_subsig(&mut self, text: &str) -> SubsigId {
        if let Some(id) = self.program.subsig_map.get(text) {
            return *id;
        }
        let id = SubsigId(self.program.subsigs.len() as u32);
        self.program.subsigs.push(text.to_string());
        self.program.subsig_map.insert(text.to_string(), id);
        id
    }

    /// Start declaring a class.
    pub fn class(&mut self, name: &str) -> ClassBuilder<'_> {
        ClassBuilder {
            pb: self,
            name: name.to_string(),
            superclass: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
        }
    }

    /// Declare a field on a class.
    pub fn field(&mut self, class: ClassId, name: &str, ty: TypeId, is_static: bool) -> FieldId {
        let id = FieldId(self.program.fields.len() as u32);
        self.program.fields.push(Field {
            class,
            name: name.to_string(),
            ty,
            is_static,
        });
        self.program.classes[class.index()].fields.push(id);
        id
    }

    /// Start declaring a method. The method handle is reserved immediately;
    /// the declaration is completed by [`MethodBuilder::build`].
    pub fn method(&mut self, class: ClassId, name: &str, subsig: &str) -> MethodBuilder<'_> {
        let subsig = self.intern_subsig(subsig);
        // Placeholder until the builder sets a return type.
        let ret_ty = self.prim_ty(PrimType::Int);
        let id = MethodId(self.program.methods.len() as u32);
        self.program.methods.push(Method {
            class,
            name: name.to_string(),
            subsig,
            is_static: false,
            is_abstract: false,
            ret_ty,
            params: Vec::new(),
            this: None,
            ret_vars: Vec::new(),
            vars: Vec::new(),
            stmts: Vec::new(),
        });
        self.program.classes[class.index()]
            .declared
            .insert(subsig, id);
        MethodBuilder {
            pb: self,
            id,
            is_static: false,
            is_abstract: false,
            ret_ty: None,
            params: Vec::new(),
            this: None,
            vars: Vec::new(),
            stmts: Vec::new(),
        }
    }

    /// Designate the program entry method.
    #[must_use]
    pub fn entry(mut self, method: MethodId) -> Self {
        self.program.entry = Some(method);
        self
    }

    /// Finish the program.
    #[must_use]
    pub fn build(self) -> Program {
        self.program
    }
}

/// Builder for a single class declaration.
#[derive(Debug)]
pub struct ClassBuilder<'a> {
    pb: &'a mut ProgramBuilder,
    name: String,
    superclass: Option<ClassId>,
    interfaces: Vec<ClassId>,
    is_interface: bool,
    is_abstract: bool,
}

impl ClassBuilder<'_> {
    /// Set the direct superclass.
    #[must_use]
    pub fn superclass(mut self, class: ClassId) -> Self {
        self.superclass = Some(class);
        self
    }

    /// Add a directly implemented or extended interface.
    #[must_use]
    pub fn implements(mut self, interface: ClassId) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Mark the declaration as an interface.
    #[must_use]
    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self.is_abstract = true;
        self
    }

    /// Mark the declaration as abstract.
    #[must_use]
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Finish the declaration.
    pub fn build(self) -> ClassId {
        let id = ClassId(self.pb.program.classes.len() as u32);
        self.pb.program.classes.push(Class {
            name: self.name.clone(),
            superclass: self.superclass,
            interfaces: self.interfaces,
            is_interface: self.is_interface,
            is_abstract: self.is_abstract,
            declared: FxHashMap::default(),
            fields: Vec::new(),
        });
        self.pb.program.class_map.insert(self.name, id);
        id
    }
}

/// Builder for a single method body.
#[derive(Debug)]
pub struct MethodBuilder<'a> {
    pb: &'a mut ProgramBuilder,
    id: MethodId,
    is_static: bool,
    is_abstract: bool,
    ret_ty: Option<TypeId>,
    params: Vec<VarId>,
    this: Option<VarId>,
    vars: Vec<VarId>,
    stmts: Vec<StmtId>,
}

impl MethodBuilder<'_> {
    /// The reserved handle of the method being built.
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Mark the method static. Must precede any use of [`Self::this_var`].
    pub fn set_static(&mut self) {
        assert!(self.this.is_none(), "static method cannot have `this`");
        self.is_static = true;
    }

    /// Mark the method abstract. Abstract methods have no body and are never
    /// dispatch targets.
    pub fn set_abstract(&mut self) {
        self.is_abstract = true;
    }

    /// Set the return type.
    pub fn set_ret_ty(&mut self, ty: TypeId) {
        self.ret_ty = Some(ty);
    }

    /// Declare a local variable.
    pub fn var(&mut self, name: &str, ty: TypeId) -> VarId {
        let id = VarId(self.pb.program.vars.len() as u32);
        self.pb.program.vars.push(Var {
            method: self.id,
            name: name.to_string(),
            ty,
            local_index: self.vars.len() as u32,
            store_fields: Vec::new(),
            load_fields: Vec::new(),
            store_arrays: Vec::new(),
            load_arrays: Vec::new(),
            invokes: Vec::new(),
        });
        self.vars.push(id);
        id
    }

    /// Declare a parameter (a variable listed in the method signature).
    pub fn param(&mut self, name: &str, ty: TypeId) -> VarId {
        let id = self.var(name, ty);
        self.params.push(id);
        id
    }

    /// The `this` variable, created on first use. Not available for static
    /// methods.
    pub fn this_var(&mut self) -> VarId {
        assert!(!self.is_static, "static method has no `this`");
        if let Some(this) = self.this {
            return this;
        }
        let class = self.pb.program.methods[self.id.index()].class;
        let ty = self.pb.reference_ty(class);
        let this = self.var("this", ty);
        self.this = Some(this);
        this
    }

    fn emit(&mut self, kind: Stmt) -> StmtId {
        let id = StmtId(self.pb.program.stmts.len() as u32);
        self.pb.program.stmts.push(StmtData {
            method: self.id,
            index: self.stmts.len(),
            kind,
        });
        self.stmts.push(id);
        id
    }

    /// Emit a no-op.
    pub fn nop(&mut self) -> StmtId {
        self.emit(Stmt::Nop)
    }

    /// Emit `lhs = new ty()`.
    pub fn new_object(&mut self, lhs: VarId, ty: TypeId) -> StmtId {
        self.emit(Stmt::New { lhs, ty })
    }

    /// Emit `lhs = rhs` for an arbitrary expression.
    pub fn assign(&mut self, lhs: VarId, rhs: Exp) -> StmtId {
        self.emit(Stmt::Assign { lhs, rhs })
    }

    /// Emit the variable copy `lhs = rhs`.
    pub fn copy(&mut self, lhs: VarId, rhs: VarId) -> StmtId {
        self.assign(lhs, Exp::Var(rhs))
    }

    /// Emit `lhs = literal`.
    pub fn const_assign(&mut self, lhs: VarId, literal: i32) -> StmtId {
        self.assign(lhs, Exp::IntLiteral(literal))
    }

    /// Emit `lhs = a op b`.
    pub fn binary(&mut self, lhs: VarId, op: super::BinaryOp, a: VarId, b: VarId) -> StmtId {
        self.assign(lhs, Exp::Binary { op, lhs: a, rhs: b })
    }

    /// Emit `lhs = base.field`.
    pub fn load_field(&mut self, lhs: VarId, base: VarId, field: FieldId) -> StmtId {
        self.emit(Stmt::LoadField {
            lhs,
            base: Some(base),
            field,
        })
    }

    /// Emit `lhs = T.field` for a static field.
    pub fn load_static(&mut self, lhs: VarId, field: FieldId) -> StmtId {
        self.emit(Stmt::LoadField {
            lhs,
            base: None,
            field,
        })
    }

    /// Emit `base.field = rhs`.
    pub fn store_field(&mut self, base: VarId, field: FieldId, rhs: VarId) -> StmtId {
        self.emit(Stmt::StoreField {
            base: Some(base),
            field,
            rhs,
        })
    }

    /// Emit `T.field = rhs` for a static field.
    pub fn store_static(&mut self, field: FieldId, rhs: VarId) -> StmtId {
        self.emit(Stmt::StoreField {
            base: None,
            field,
            rhs,
        })
    }

    /// Emit `lhs = base[index]`.
    pub fn load_array(&mut self, lhs: VarId, base: VarId, index: VarId) -> StmtId {
        self.emit(Stmt::LoadArray { lhs, base, index })
    }

    /// Emit `base[index] = rhs`.
    pub fn store_array(&mut self, base: VarId, index: VarId, rhs: VarId) -> StmtId {
        self.emit(Stmt::StoreArray { base, index, rhs })
    }

    /// Emit an invocation.
    pub fn invoke(
        &mut self,
        kind: InvokeKind,
        result: Option<VarId>,
        class: ClassId,
        subsig: &str,
        base: Option<VarId>,
        args: Vec<VarId>,
    ) -> StmtId {
        assert_eq!(
            kind == InvokeKind::Static,
            base.is_none(),
            "receiver presence must match dispatch kind"
        );
        let subsig = self.pb.intern_subsig(subsig);
        self.emit(Stmt::Invoke(Invoke {
            kind,
            result,
            callee: MethodRef { class, subsig },
            base,
            args,
        }))
    }

    /// Emit a static call `result = class.m(args)`.
    pub fn invoke_static(
        &mut self,
        result: Option<VarId>,
        class: ClassId,
        subsig: &str,
        args: Vec<VarId>,
    ) -> StmtId {
        self.invoke(InvokeKind::Static, result, class, subsig, None, args)
    }

    /// Emit a virtual call `result = base.m(args)` declared on `class`.
    pub fn invoke_virtual(
        &mut self,
        result: Option<VarId>,
        base: VarId,
        class: ClassId,
        subsig: &str,
        args: Vec<VarId>,
    ) -> StmtId {
        self.invoke(InvokeKind::Virtual, result, class, subsig, Some(base), args)
    }

    /// Emit an interface call `result = base.m(args)` declared on `class`.
    pub fn invoke_interface(
        &mut self,
        result: Option<VarId>,
        base: VarId,
        class: ClassId,
        subsig: &str,
        args: Vec<VarId>,
    ) -> StmtId {
        self.invoke(
            InvokeKind::Interface,
            result,
            class,
            subsig,
            Some(base),
            args,
        )
    }

    /// Emit a conditional branch with an unpatched target; taken when `cond`
    /// is non-zero. Patch with [`Self::patch_if`].
    pub fn if_(&mut self, cond: Exp) -> StmtId {
        self.emit(Stmt::If {
            cond,
            target: UNPATCHED,
        })
    }

    /// Point a previously emitted `if` at its taken target.
    pub fn patch_if(&mut self, branch: StmtId, target: StmtId) {
        let target = self.index_of(target);
        match &mut self.pb.program.stmts[branch.index()].kind {
            Stmt::If { target: t, .. } => *t = target,
            other => panic!("patch_if on non-if statement {other:?}"),
        }
    }

    /// Emit an unconditional jump with an unpatched target. Patch with
    /// [`Self::patch_goto`].
    pub fn goto(&mut self) -> StmtId {
        self.emit(Stmt::Goto { target: UNPATCHED })
    }

    /// Point a previously emitted `goto` at its target.
    pub fn patch_goto(&mut self, jump: StmtId, target: StmtId) {
        let target = self.index_of(target);
        match &mut self.pb.program.stmts[jump.index()].kind {
            Stmt::Goto { target: t } => *t = target,
            other => panic!("patch_goto on non-goto statement {other:?}"),
        }
    }

    /// Emit a switch with no cases and an unpatched default. Patch with
    /// [`Self::patch_switch`].
    pub fn switch(&mut self, var: VarId) -> StmtId {
        self.emit(Stmt::Switch {
            var,
            cases: Vec::new(),
            default: UNPATCHED,
        })
    }

    /// Fill in the cases and default target of a previously emitted switch.
    pub fn patch_switch(&mut self, switch: StmtId, cases: Vec<(i32, StmtId)>, default: StmtId) {
        let cases: Vec<(i32, usize)> = cases
            .into_iter()
            .map(|(value, target)| (value, self.index_of(target)))
            .collect();
        let default = self.index_of(default);
        match &mut self.pb.program.stmts[switch.index()].kind {
            Stmt::Switch {
                cases: c,
                default: d,
                ..
            } => {
                *c = cases;
                *d = default;
            }
            other => panic!("patch_switch on non-switch statement {other:?}"),
        }
    }

    /// Emit `return` or `return value`.
    pub fn ret(&mut self, value: Option<VarId>) -> StmtId {
        self.emit(Stmt::Return { value })
    }

    fn index_of(&self, stmt: StmtId) -> usize {
        let data = &self.pb.program.stmts[stmt.index()];
        assert_eq!(data.method, self.id, "branch target from another method");
        data.index
    }

    /// Finish the method: compute return variables and the per-variable
    /// statement indexes, then fill in the reserved declaration.
    pub fn build(mut self) -> MethodId {
        if !self.is_static && !self.is_abstract && self.this.is_none() {
            self.this_var();
        }
        let mut ret_vars = Vec::new();
        for &stmt in &self.stmts {
            let data = &self.pb.program.stmts[stmt.index()];
            match &data.kind {
                Stmt::Return { value: Some(v) } => {
                    if !ret_vars.contains(v) {
                        ret_vars.push(*v);
                    }
                }
                Stmt::If { target, .. } | Stmt::Goto { target } => {
                    assert_ne!(*target, UNPATCHED, "unpatched branch in {stmt:?}");
                }
                Stmt::Switch { cases, default, .. } => {
                    assert_ne!(*default, UNPATCHED, "unpatched switch in {stmt:?}");
                    for (_, t) in cases {
                        assert_ne!(*t, UNPATCHED, "unpatched case in {stmt:?}");
                    }
                }
                _ => {}
            }
            // Per-variable statement indexes consumed by the pointer analysis.
            match self.pb.program.stmts[stmt.index()].kind.clone() {
                Stmt::StoreField {
                    base: Some(base), ..
                } => self.pb.program.vars[base.index()].store_fields.push(stmt),
                Stmt::LoadField {
                    base: Some(base), ..
                } => self.pb.program.vars[base.index()].load_fields.push(stmt),
                Stmt::StoreArray { base, .. } => {
                    self.pb.program.vars[base.index()].store_arrays.push(stmt);
                }
                Stmt::LoadArray { base, .. } => {
                    self.pb.program.vars[base.index()].load_arrays.push(stmt);
                }
                Stmt::Invoke(Invoke {
                    base: Some(base), ..
                }) => self.pb.program.vars[base.index()].invokes.push(stmt),
                _ => {}
            }
        }
        let method = &mut self.pb.program.methods[self.id.index()];
        method.is_static = self.is_static;
        method.is_abstract = self.is_abstract;
        if let Some(ty) = self.ret_ty {
            method.ret_ty = ty;
        }
        method.params = self.params;
        method.this = self.this;
        method.ret_vars = ret_vars;
        method.vars = self.vars;
        method.stmts = self.stmts;
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_this_created_for_instance_methods() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let a = b.class("A").superclass(object).build();
        let int_ty = b.prim_ty(PrimType::Int);

        let mut m = b.method(a, "m", "int m()");
        let r = m.var("r", int_ty);
        m.const_assign(r, 1);
        m.ret(Some(r));
        let mid = m.build();

        let program = b.entry(mid).build();
        let method = program.method(mid);
        assert!(method.this.is_some());
        assert_eq!(method.ret_vars, vec![r]);
        assert_eq!(program.var(method.this.unwrap()).name, "this");
    }

    #[test]
    fn test_branch_patching() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);

        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.const_assign(x, 0);
        let branch = m.if_(Exp::Var(x));
        m.const_assign(x, 1);
        let join = m.const_assign(x, 2);
        m.patch_if(branch, join);
        m.ret(None);
        let main = m.build();

        let program = b.entry(main).build();
        let branch_data = program.stmt(branch);
        match &branch_data.kind {
            Stmt::If { target, .. } => assert_eq!(*target, program.stmt(join).index),
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "unpatched branch")]
    fn test_unpatched_branch_panics() {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let int_ty = b.prim_ty(PrimType::Int);
        let mut m = b.method(object, "main", "void main()");
        m.set_static();
        let x = m.var("x", int_ty);
        m.if_(Exp::Var(x));
        m.build();
    }
}
