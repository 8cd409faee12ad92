//! AST to IR lowering.
//!
//! `context` holds the module and per-function state, `stmt` lowers
//! declarations and control flow into basic blocks, `expr` lowers
//! expressions (including short-circuit conditions) and `creator` lowers
//! object and array allocation.

pub mod context;
pub mod creator;
pub mod expr;
pub mod stmt;

pub use context::{FnGen, Gen};
pub use stmt::{function_label, method_label};

use crate::ast::Program;
use crate::ir::IrRoot;
use crate::scope::GlobalScope;
use crate::CompileError;

/// Build the IR of a whole program: one function per source function and
/// method, plus the `__init` entry that runs global initializers and `main`.
pub fn build(program: &Program, scope: &GlobalScope) -> Result<IrRoot, CompileError> {
    let mut g = Gen::new(scope);
    g.lower_program(program)?;
    Ok(g.finish())
}
