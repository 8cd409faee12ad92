//! x86-64 backend: lowers optimized IR to NASM assembly.
//!
//! Module layout:
//! - `abi`        : register definitions and System V constants
//! - `preprocess` : calling-convention pinning and operand legalization
//! - `liveness`   : dataflow liveness over the block CFG
//! - `regalloc`   : graph-coloring register allocation with spilling
//! - `instruction`: typed machine instructions and assembly output items
//! - `codegen`    : code generation driver (allocated IR → assembly)
//! - `optimize`   : assembly-level peephole passes

pub mod abi;
pub mod instruction;
pub mod liveness;
mod optimize;
pub mod preprocess;
pub mod regalloc;
mod codegen;

pub use codegen::Codegen;
pub use instruction::NasmAsm;

use crate::ir::IrRoot;
use crate::CompileError;
use regalloc::RegisterAllocator;

/// Preprocess, allocate and emit `root`. The IR is rewritten in place and
/// is fully register-allocated afterwards.
pub fn compile_ir_to_nasm(root: &mut IrRoot) -> Result<NasmAsm, CompileError> {
    compile_ir_to_nasm_with(root, &RegisterAllocator::new())
}

/// Like [`compile_ir_to_nasm`] with a caller-chosen allocator.
pub fn compile_ir_to_nasm_with(root: &mut IrRoot, allocator: &RegisterAllocator) -> Result<NasmAsm, CompileError> {
    preprocess::preprocess(root)?;
    allocator.run(root)?;
    let mut cg = Codegen::new();
    cg.emit_program(root)?;
    Ok(cg.finish_codegen())
}
