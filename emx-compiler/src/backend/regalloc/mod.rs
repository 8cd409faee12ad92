//! Graph-coloring register allocation.
//!
//! Each function goes through rounds of
//! liveness → interference graph → coloring → (spill and retry)
//! until every virtual register has a physical one, then every operand is
//! rewritten in place.
//!
//! - [`interference`]: conflict edges and physical-register exclusions.
//! - [`coloring`]: simplify/select with optimistic spilling.
//! - [`spill`]: frame slots and load/store insertion.

pub mod coloring;
pub mod interference;
pub mod spill;

pub use interference::InterferenceGraph;

use super::abi::PhysReg;
use super::liveness::Liveness;
use crate::ir::{IrFunction, IrRoot, RegValue};
use crate::CompileError;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub rounds: usize,
    pub spilled: usize,
    pub slots: usize,
}

pub struct RegisterAllocator {
    palette: Vec<PhysReg>,
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self { palette: PhysReg::ALLOCATABLE.to_vec() }
    }

    /// Restrict allocation to `palette`, in preference order.
    pub fn with_palette(palette: &[PhysReg]) -> Self {
        Self { palette: palette.to_vec() }
    }

    pub fn run(&self, root: &mut IrRoot) -> Result<(), CompileError> {
        for func in &mut root.functions {
            let stats = self.allocate(func)?;
            debug!(
                function = %func.name,
                rounds = stats.rounds,
                spilled = stats.spilled,
                slots = stats.slots,
                "registers allocated"
            );
        }
        Ok(())
    }

    /// Allocate registers for one preprocessed function.
    ///
    /// Every round that fails spills at least one register that existed
    /// before allocation, so the number of rounds is bounded by the initial
    /// register count.
    pub fn allocate(&self, func: &mut IrFunction) -> Result<AllocationStats, CompileError> {
        let max_rounds = func.vreg_count() + 1;
        let mut unspillable = BTreeSet::new();
        let mut stats = AllocationStats::default();

        while stats.rounds < max_rounds {
            stats.rounds += 1;
            let live = Liveness::analyze(func);
            let graph = InterferenceGraph::build(func, &live);
            match coloring::color(&graph, &self.palette, &unspillable) {
                Ok(colors) => {
                    let mut missing = None;
                    let layout = func.layout.clone();
                    for bb in layout {
                        for instr in &mut func.block_mut(bb).instrs {
                            instr.for_each_operand_mut(|v| {
                                if let RegValue::Vreg(r) = v {
                                    match colors.get(r) {
                                        Some(p) => *v = RegValue::Phys(*p),
                                        None => missing = Some(*r),
                                    }
                                }
                            });
                        }
                    }
                    if let Some(r) = missing {
                        return Err(CompileError::Internal(format!(
                            "{r} in `{}` was never colored",
                            func.name
                        )));
                    }
                    stats.slots = func.slot_count;
                    return Ok(stats);
                }
                Err(spills) if spills.is_empty() => break,
                Err(spills) => {
                    stats.spilled += spills.len();
                    spill::spill_vregs(func, &spills, &mut unspillable);
                }
            }
        }

        Err(CompileError::AllocationExhausted { function: func.name.clone(), rounds: stats.rounds })
    }
}
