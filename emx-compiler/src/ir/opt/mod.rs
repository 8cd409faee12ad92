//! IR-level passes.
//!
//! Every pass implements [`IrPass`] and rewrites the IR in place. They run in
//! a fixed order: two-operand rewriting, optional inlining, then static data
//! layout.

use crate::ir::IrRoot;
use crate::CompileOptions;

pub mod inline;
pub mod static_data;
pub mod two_operand;

pub use inline::FunctionInliner;
pub use static_data::StaticDataProcessor;
pub use two_operand::TwoOperandTransformer;

/// A trait for an IR transformation pass.
pub trait IrPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, root: &mut IrRoot);
}

/// Manages and executes a sequence of IR passes.
pub struct PassManager {
    passes: Vec<Box<dyn IrPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add_pass(&mut self, pass: Box<dyn IrPass>) {
        self.passes.push(pass);
    }

    pub fn run_passes(&mut self, root: &mut IrRoot) {
        for pass in &mut self.passes {
            tracing::trace!(pass = pass.name(), "running IR pass");
            pass.run(root);
        }
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn optimize(root: &mut IrRoot, options: &CompileOptions) {
    let mut pm = PassManager::new();
    pm.add_pass(Box::new(TwoOperandTransformer));
    if options.inline {
        pm.add_pass(Box::new(FunctionInliner::default()));
    }
    pm.add_pass(Box::new(StaticDataProcessor));
    pm.run_passes(root);
}
