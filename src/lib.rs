//! opal: whole-program static analysis over a class-based IR.
//!
//! The engine computes, over a [`ir::Program`] starting from its designated
//! entry method:
//!
//! - **Pointer analysis** ([`pta`]): a monotone fixed-point iteration over a
//!   pointer-flow graph, in context-insensitive ([`pta::ci::solve_ci`]) and
//!   context-sensitive ([`pta::solver::Solver`]) variants with pluggable
//!   [`pta::context::ContextSelector`]s.
//! - **Call graphs** ([`callgraph`]): standalone class-hierarchy analysis
//!   and on-the-fly resolution inside the pointer analysis.
//! - **Constant propagation** ([`dataflow::constant_propagation`]): a
//!   three-point integer lattice solved intra-procedurally over method CFGs
//!   and inter-procedurally over the whole-program ICFG with alias-aware
//!   field and array values ([`dataflow::inter`]).
//! - **Taint tracking** ([`taint`]): configurable sources, transfers and
//!   sinks co-iterated with the context-sensitive pointer analysis.
//! - **Dead-code detection** ([`dataflow::dead_code`]): unreachable code,
//!   statically decided branches, and dead assignments.
//!
//! Programs are assembled with [`ir::builder::ProgramBuilder`]; analyses
//! exchange results through an [`options::AnalysisRegistry`] keyed by
//! analysis ID. The engine is single-threaded and deterministic: running
//! any analysis twice over the same program yields identical results.
//!
//! # Example
//!
//! ```
//! use opal::ir::builder::ProgramBuilder;
//! use opal::ir::hierarchy::ClassHierarchy;
//! use opal::pta::ci::solve_ci;
//!
//! let mut b = ProgramBuilder::new();
//! let object = b.class("Object").build();
//! let a = b.class("A").superclass(object).build();
//! let a_ty = b.reference_ty(a);
//!
//! let mut m = b.method(object, "main", "void main()");
//! m.set_static();
//! let x = m.var("x", a_ty);
//! let y = m.var("y", a_ty);
//! m.new_object(x, a_ty);
//! m.copy(y, x);
//! m.ret(None);
//! let main = m.build();
//!
//! let program = b.entry(main).build();
//! let hierarchy = ClassHierarchy::build(&program);
//! let pta = solve_ci(&program, &hierarchy);
//! assert_eq!(pta.result().pts(x), pta.result().pts(y));
//! ```

pub mod callgraph;
pub mod cfg;
pub mod dataflow;
pub mod error;
pub mod icfg;
pub mod ir;
pub mod options;
pub mod pta;
pub mod taint;

pub use error::{Error, Result};
pub use options::{AnalysisOptions, AnalysisRegistry};
