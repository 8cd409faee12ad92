//! Intermediate representation.
//!
//! This module contains the IR definitions, the AST-to-IR builder, the
//! IR-level passes that run before register allocation and a reference
//! interpreter for the virtual-register form.

pub mod ir;
pub use ir::*;
pub mod interp;
pub mod ir_builder;
pub mod opt;
