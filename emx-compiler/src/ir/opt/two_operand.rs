use super::IrPass;
use crate::ir::*;
use tracing::debug;

/// Rewrites `d = a op b` (with `d` distinct from both sources) into
/// `d = a; d = d op b`, matching x86's destructive two-operand encoding.
///
/// Operand order is preserved, so non-commutative operators keep their
/// meaning. Instructions where `d` already equals a source are left alone;
/// lowering handles the `d = a op d` shape directly.
pub struct TwoOperandTransformer;

impl TwoOperandTransformer {
    pub fn rewrite_function(func: &mut IrFunction) -> usize {
        let mut rewritten = 0;
        for block in &mut func.blocks {
            let mut out = Vec::with_capacity(block.instrs.len());
            for instr in block.instrs.drain(..) {
                match instr {
                    Instr::Binary { dst, op, lhs, rhs } if dst != lhs && dst != rhs => {
                        out.push(Instr::Move { dst, src: lhs });
                        out.push(Instr::Binary { dst, op, lhs: dst, rhs });
                        rewritten += 1;
                    }
                    other => out.push(other),
                }
            }
            block.instrs = out;
        }
        rewritten
    }
}

impl IrPass for TwoOperandTransformer {
    fn name(&self) -> &'static str {
        "two-operand"
    }

    fn run(&mut self, root: &mut IrRoot) {
        for func in &mut root.functions {
            let n = Self::rewrite_function(func);
            debug!(function = %func.name, rewritten = n, "two-operand form");
        }
    }
}
