//! Intermediate representation of the program under analysis.
//!
//! The IR is a flat, arena-based model: classes, fields, methods, variables
//! and statements live in vectors owned by [`Program`] and are referenced by
//! small integer handles. Handles are cheap to copy, hash and order, which
//! makes them the natural keys for points-to sets, fact maps and the
//! canonicalization tables of the pointer analysis.
//!
//! Statements form a closed sum ([`Stmt`]) matched exhaustively by every
//! analysis; there is no open visitor hierarchy. Control transfers reference
//! statement positions within the owning method, so a CFG can be derived
//! from the statement list alone.
//!
//! Programs are assembled through [`builder::ProgramBuilder`], which also
//! precomputes the per-variable statement indexes (`store_fields`,
//! `load_fields`, `store_arrays`, `load_arrays`, `invokes`) that the
//! pointer-analysis solver consults when a receiver's points-to set grows.

pub mod builder;
pub mod hierarchy;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Handles
// =============================================================================

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// Index into the owning arena.
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// Handle of a class in [`Program::classes`].
    ClassId
);
handle!(
    /// Handle of a field in [`Program::fields`].
    FieldId
);
handle!(
    /// Handle of a method in [`Program::methods`].
    MethodId
);
handle!(
    /// Handle of a variable in [`Program::vars`].
    VarId
);
handle!(
    /// Handle of a statement in [`Program::stmts`]. Statement handles are
    /// global; the per-method position is available via [`Program::stmt`].
    StmtId
);
handle!(
    /// Handle of an interned type in [`Program::types`].
    TypeId
);
handle!(
    /// Handle of an interned method subsignature (name plus descriptor).
    SubsigId
);

// =============================================================================
// Types
// =============================================================================

/// Primitive value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimType {
    Byte,
    Short,
    Int,
    Char,
    Boolean,
    Long,
    Float,
    Double,
}

impl PrimType {
    /// Whether values of this type are tracked by integer constant
    /// propagation.
    #[must_use]
    pub fn holds_int(self) -> bool {
        matches!(
            self,
            PrimType::Byte | PrimType::Short | PrimType::Int | PrimType::Char | PrimType::Boolean
        )
    }
}

/// A type in the analyzed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Primitive type.
    Prim(PrimType),
    /// Reference to a class or interface.
    Reference(ClassId),
    /// Array with the given element type. All indices of an array object
    /// share one abstract cell in the pointer analysis.
    Array(TypeId),
}

// =============================================================================
// Declarations
// =============================================================================

/// A class or interface declaration.
#[derive(Debug)]
pub struct Class {
    /// Fully qualified name.
    pub name: String,
    /// Direct superclass, absent only for the hierarchy root.
    pub superclass: Option<ClassId>,
    /// Directly implemented (class) or extended (interface) interfaces.
    pub interfaces: Vec<ClassId>,
    /// Whether this declaration is an interface.
    pub is_interface: bool,
    /// Whether this declaration is abstract.
    pub is_abstract: bool,
    /// Declared methods by subsignature.
    pub(crate) declared: FxHashMap<SubsigId, MethodId>,
    /// Declared fields.
    pub fields: Vec<FieldId>,
}

impl Class {
    /// Declared method with the given subsignature, not considering
    /// inheritance.
    #[must_use]
    pub fn declared_method(&self, subsig: SubsigId) -> Option<MethodId> {
        self.declared.get(&subsig).copied()
    }
}

/// A field declaration.
#[derive(Debug)]
pub struct Field {
    /// Declaring class.
    pub class: ClassId,
    /// Field name.
    pub name: String,
    /// Declared type.
    pub ty: TypeId,
    /// Whether the field is static.
    pub is_static: bool,
}

/// A method declaration together with its body.
#[derive(Debug)]
pub struct Method {
    /// Declaring class.
    pub class: ClassId,
    /// Method name.
    pub name: String,
    /// Interned subsignature used for dispatch.
    pub subsig: SubsigId,
    /// Whether the method is static.
    pub is_static: bool,
    /// Whether the method is abstract (no body; never a dispatch target).
    pub is_abstract: bool,
    /// Return type.
    pub ret_ty: TypeId,
    /// Parameter variables, in declaration order.
    pub params: Vec<VarId>,
    /// The `this` variable; absent for static methods.
    pub this: Option<VarId>,
    /// Variables returned by `return` statements in the body.
    pub ret_vars: Vec<VarId>,
    /// All variables of the method (parameters, `this`, locals). The position
    /// of a variable in this list is its dense per-method index, used by
    /// bitset-based analyses.
    pub vars: Vec<VarId>,
    /// Ordered statements of the body.
    pub stmts: Vec<StmtId>,
}

/// A local variable or parameter.
#[derive(Debug)]
pub struct Var {
    /// Owning method.
    pub method: MethodId,
    /// Variable name, unique within the method.
    pub name: String,
    /// Declared type.
    pub ty: TypeId,
    /// Dense index within [`Method::vars`].
    pub local_index: u32,
    /// Statements `v.f = y` with this variable as the base.
    pub store_fields: Vec<StmtId>,
    /// Statements `y = v.f` with this variable as the base.
    pub load_fields: Vec<StmtId>,
    /// Statements `v[i] = y` with this variable as the base.
    pub store_arrays: Vec<StmtId>,
    /// Statements `y = v[i]` with this variable as the base.
    pub load_arrays: Vec<StmtId>,
    /// Invocations with this variable as the receiver.
    pub invokes: Vec<StmtId>,
}

// =============================================================================
// Statements and expressions
// =============================================================================

/// Binary operators. Relational operators yield `1`/`0`; all arithmetic is
/// signed 32-bit two's-complement with wrap-around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Ushr,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    /// Whether this operator belongs to the arithmetic family (`+ - * / %`).
    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    /// Whether this operator can raise at runtime (division or remainder by
    /// zero).
    #[must_use]
    pub fn may_throw(self) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::Rem)
    }
}

/// Right-hand sides of plain assignments and branch conditions.
///
/// The IR is three-address: binary operands are always variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exp {
    /// Variable read.
    Var(VarId),
    /// Integer literal.
    IntLiteral(i32),
    /// Binary operation over two variables.
    Binary { op: BinaryOp, lhs: VarId, rhs: VarId },
    /// Checked cast. May throw, and its value is never a tracked constant.
    Cast { var: VarId, ty: TypeId },
}

impl Exp {
    /// Variables read by this expression.
    pub fn uses(&self, out: &mut Vec<VarId>) {
        match *self {
            Exp::Var(v) => out.push(v),
            Exp::IntLiteral(_) => {}
            Exp::Binary { lhs, rhs, .. } => {
                out.push(lhs);
                out.push(rhs);
            }
            Exp::Cast { var, .. } => out.push(var),
        }
    }
}

/// How a call site dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    /// Static call: resolved on the declaring class.
    Static,
    /// Special call (constructors, private and super calls): dispatched from
    /// the declaring class.
    Special,
    /// Virtual call: dispatched from the runtime receiver type.
    Virtual,
    /// Interface call: dispatched from the runtime receiver type.
    Interface,
}

/// Static reference to a callee, as written at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Class named at the call site.
    pub class: ClassId,
    /// Subsignature named at the call site.
    pub subsig: SubsigId,
}

/// An invocation statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoke {
    /// Dispatch kind.
    pub kind: InvokeKind,
    /// Result variable, if the call's value is used.
    pub result: Option<VarId>,
    /// Declared target.
    pub callee: MethodRef,
    /// Receiver variable; absent for static calls.
    pub base: Option<VarId>,
    /// Argument variables in positional order.
    pub args: Vec<VarId>,
}

/// A statement. Control transfers (`If`, `Switch`, `Goto`) reference the
/// target statement's position within the owning method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// No operation.
    Nop,
    /// `lhs = new T()`: allocation site.
    New { lhs: VarId, ty: TypeId },
    /// `lhs = exp` for the expression kinds of [`Exp`].
    Assign { lhs: VarId, rhs: Exp },
    /// `lhs = base.field` (instance) or `lhs = T.field` (static, no base).
    LoadField {
        lhs: VarId,
        base: Option<VarId>,
        field: FieldId,
    },
    /// `base.field = rhs` (instance) or `T.field = rhs` (static, no base).
    StoreField {
        base: Option<VarId>,
        field: FieldId,
        rhs: VarId,
    },
    /// `lhs = base[index]`.
    LoadArray {
        lhs: VarId,
        base: VarId,
        index: VarId,
    },
    /// `base[index] = rhs`.
    StoreArray {
        base: VarId,
        index: VarId,
        rhs: VarId,
    },
    /// Method invocation.
    Invoke(Invoke),
    /// Conditional branch: taken when `cond` evaluates non-zero.
    If { cond: Exp, target: usize },
    /// Table switch over an integer variable.
    Switch {
        var: VarId,
        cases: Vec<(i32, usize)>,
        default: usize,
    },
    /// Unconditional jump.
    Goto { target: usize },
    /// Method return, optionally carrying a value.
    Return { value: Option<VarId> },
}

impl Stmt {
    /// The variable defined by this statement, if any.
    #[must_use]
    pub fn def_var(&self) -> Option<VarId> {
        match self {
            Stmt::New { lhs, .. }
            | Stmt::Assign { lhs, .. }
            | Stmt::LoadField { lhs, .. }
            | Stmt::LoadArray { lhs, .. } => Some(*lhs),
            Stmt::Invoke(invoke) => invoke.result,
            _ => None,
        }
    }

    /// Variables read by this statement.
    pub fn uses(&self, out: &mut Vec<VarId>) {
        match self {
            Stmt::Nop | Stmt::New { .. } | Stmt::Goto { .. } => {}
            Stmt::Assign { rhs, .. } => rhs.uses(out),
            Stmt::LoadField { base, .. } => out.extend(base.iter().copied()),
            Stmt::StoreField { base, rhs, .. } => {
                out.extend(base.iter().copied());
                out.push(*rhs);
            }
            Stmt::LoadArray { base, index, .. } => {
                out.push(*base);
                out.push(*index);
            }
            Stmt::StoreArray { base, index, rhs } => {
                out.push(*base);
                out.push(*index);
                out.push(*rhs);
            }
            Stmt::Invoke(invoke) => {
                out.extend(invoke.base.iter().copied());
                out.extend(invoke.args.iter().copied());
            }
            Stmt::If { cond, .. } => cond.uses(out),
            Stmt::Switch { var, .. } => out.push(*var),
            Stmt::Return { value } => out.extend(value.iter().copied()),
        }
    }

    /// Whether evaluating this statement's right-hand side can have an
    /// observable effect. Allocation modifies the heap, casts can throw,
    /// field and array accesses can throw or trigger initialization, and
    /// division and remainder can throw.
    #[must_use]
    pub fn has_no_side_effect(&self) -> bool {
        match self {
            Stmt::Assign { rhs, .. } => match rhs {
                Exp::Cast { .. } => false,
                Exp::Binary { op, .. } => !op.may_throw(),
                Exp::Var(_) | Exp::IntLiteral(_) => true,
            },
            Stmt::New { .. }
            | Stmt::LoadField { .. }
            | Stmt::LoadArray { .. }
            | Stmt::StoreField { .. }
            | Stmt::StoreArray { .. }
            | Stmt::Invoke(_) => false,
            _ => true,
        }
    }
}

/// A statement together with its position in the owning method.
#[derive(Debug)]
pub struct StmtData {
    /// Owning method.
    pub method: MethodId,
    /// Position within [`Method::stmts`].
    pub index: usize,
    /// The statement itself.
    pub kind: Stmt,
}

// =============================================================================
// Program
// =============================================================================

/// A whole program: arenas for every declaration kind plus interning tables.
#[derive(Debug, Default)]
pub struct Program {
    pub(crate) classes: Vec<Class>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    pub(crate) vars: Vec<Var>,
    pub(crate) stmts: Vec<StmtData>,
    pub(crate) types: Vec<TypeKind>,
    pub(crate) type_map: FxHashMap<TypeKind, TypeId>,
    pub(crate) subsigs: Vec<String>,
    pub(crate) subsig_map: FxHashMap<String, SubsigId>,
    pub(crate) class_map: FxHashMap<String, ClassId>,
    /// The designated entry method, set by the builder.
    pub(crate) entry: Option<MethodId>,
}

impl Program {
    /// The designated entry method.
    ///
    /// # Panics
    ///
    /// Panics if the program was built without an entry method.
    #[must_use]
    pub fn entry_method(&self) -> MethodId {
        self.entry.expect("program has no entry method")
    }

    /// Class by handle.
    #[inline]
    #[must_use]
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    /// Field by handle.
    #[inline]
    #[must_use]
    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.index()]
    }

    /// Method by handle.
    #[inline]
    #[must_use]
    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    /// Variable by handle.
    #[inline]
    #[must_use]
    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.index()]
    }

    /// Statement by handle.
    #[inline]
    #[must_use]
    pub fn stmt(&self, id: StmtId) -> &StmtData {
        &self.stmts[id.index()]
    }

    /// Interned type by handle.
    #[inline]
    #[must_use]
    pub fn type_kind(&self, id: TypeId) -> TypeKind {
        self.types[id.index()]
    }

    /// Interned subsignature text.
    #[inline]
    #[must_use]
    pub fn subsig(&self, id: SubsigId) -> &str {
        &self.subsigs[id.index()]
    }

    /// Look up a class by name.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.class_map.get(name).copied()
    }

    /// Look up an interned subsignature by text.
    #[must_use]
    pub fn subsig_by_text(&self, text: &str) -> Option<SubsigId> {
        self.subsig_map.get(text).copied()
    }

    /// All method handles.
    pub fn method_ids(&self) -> impl Iterator<Item = MethodId> {
        (0..self.methods.len() as u32).map(MethodId)
    }

    /// All class handles.
    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.classes.len() as u32).map(ClassId)
    }

    /// All variable handles.
    pub fn var_ids(&self) -> impl Iterator<Item = VarId> {
        (0..self.vars.len() as u32).map(VarId)
    }

    /// Whether the variable's declared type is tracked by integer constant
    /// propagation.
    #[must_use]
    pub fn can_hold_int(&self, var: VarId) -> bool {
        matches!(self.type_kind(self.var(var).ty), TypeKind::Prim(p) if p.holds_int())
    }

    /// The class of a reference type, if it is one.
    #[must_use]
    pub fn class_of_type(&self, ty: TypeId) -> Option<ClassId> {
        match self.type_kind(ty) {
            TypeKind::Reference(class) => Some(class),
            _ => None,
        }
    }

    /// The invocation at a statement, if the statement is a call site.
    #[must_use]
    pub fn invoke_at(&self, stmt: StmtId) -> Option<&Invoke> {
        match &self.stmt(stmt).kind {
            Stmt::Invoke(invoke) => Some(invoke),
            _ => None,
        }
    }
}
