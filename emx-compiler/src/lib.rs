pub mod ast;
pub mod backend;
pub mod ir;
pub mod scope;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use ast::Location;

/// Fatal conditions that abort the compilation unit.
///
/// Apart from `AllocationExhausted` and `Internal`, these mean the front end
/// handed over a tree or scope that breaks its contract with the core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("unresolved {kind} `{name}` at {location}")]
    Unresolved {
        kind: SymbolKind,
        name: String,
        location: Location,
    },

    #[error("`{keyword}` outside of a loop at {location}")]
    JumpOutsideLoop {
        keyword: &'static str,
        location: Location,
    },

    #[error("{kind} `{name}` is declared more than once")]
    Redefinition { kind: SymbolKind, name: String },

    #[error("program has no `main` function")]
    MissingEntry,

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("register allocation of `{function}` did not converge after {rounds} rounds")]
    AllocationExhausted { function: String, rounds: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
    Class,
    Field,
    Method,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolKind::Variable => "variable",
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Field => "field",
            SymbolKind::Method => "method",
        };
        write!(f, "{s}")
    }
}

/// Options recognized by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Replace small non-recursive calls with copies of the callee.
    pub inline: bool,
}

/// Build the IR of `program` and run the IR-level passes.
pub fn compile_to_ir(
    program: &ast::Program,
    scope: &scope::GlobalScope,
    options: &CompileOptions,
) -> Result<ir::IrRoot, CompileError> {
    let mut root = ir::ir_builder::build(program, scope)?;
    ir::opt::optimize(&mut root, options);
    Ok(root)
}

/// Compile a validated program to x86-64 NASM assembly.
pub fn compile_to_nasm(
    program: &ast::Program,
    scope: &scope::GlobalScope,
    options: &CompileOptions,
) -> Result<String, CompileError> {
    let mut root = compile_to_ir(program, scope, options)?;
    Ok(backend::compile_ir_to_nasm(&mut root)?.join())
}

/// Like [`compile_to_nasm`], collecting the global scope from the program itself.
pub fn compile_program(program: &ast::Program, options: &CompileOptions) -> Result<String, CompileError> {
    let scope = scope::GlobalScope::from_program(program)?;
    compile_to_nasm(program, &scope, options)
}
