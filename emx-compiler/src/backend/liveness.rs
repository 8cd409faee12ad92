//! Liveness analysis over the block CFG.
//!
//! Computes per-block live-in/live-out sets of registers (virtual and
//! physical) with a backward worklist dataflow, and expands them to
//! per-instruction live-after sets on demand. Used by interference-graph
//! construction and by tests that check what survives a loop.

use super::abi::PhysReg;
use crate::ir::{BinOp, BlockId, Instr, IrFunction, Reg, VReg};
use std::collections::{BTreeSet, VecDeque};
use tracing::trace;

pub type RegSet = BTreeSet<Reg>;

// ── Instruction-level use/def extraction ────────────────────────────────

/// Registers written by `instr`.
///
/// A call clobbers every caller-saved register; `idiv` writes both rax and
/// rdx whichever of them carries the result.
pub(crate) fn defs(instr: &Instr) -> Vec<Reg> {
    let mut out: Vec<Reg> = instr.dst().and_then(|d| d.reg()).into_iter().collect();
    match instr {
        Instr::Call { .. } => {
            out.extend(PhysReg::CALLER_SAVED.iter().map(|r| Reg::Phys(*r)));
        }
        Instr::Binary { op: BinOp::Div | BinOp::Mod, .. } => {
            out.push(Reg::Phys(PhysReg::Rax));
            out.push(Reg::Phys(PhysReg::Rdx));
        }
        _ => {}
    }
    out.sort();
    out.dedup();
    out
}

/// Registers read by `instr`.
pub(crate) fn uses(instr: &Instr) -> Vec<Reg> {
    let mut out: Vec<Reg> = instr.sources().iter().filter_map(|v| v.reg()).collect();
    out.sort();
    out.dedup();
    out
}

// ── Analysis ────────────────────────────────────────────────────────────

/// Block-level liveness of one function, indexed by `BlockId`.
pub struct Liveness {
    pub live_in: Vec<RegSet>,
    pub live_out: Vec<RegSet>,
}

impl Liveness {
    pub fn analyze(func: &IrFunction) -> Self {
        let n = func.blocks.len();

        // gen = read before any write in the block, kill = written in the block
        let mut gen_sets = vec![RegSet::new(); n];
        let mut kill = vec![RegSet::new(); n];
        for &bb in &func.layout {
            for instr in &func.block(bb).instrs {
                for r in uses(instr) {
                    if !kill[bb.0].contains(&r) {
                        gen_sets[bb.0].insert(r);
                    }
                }
                kill[bb.0].extend(defs(instr));
            }
        }

        let mut live_in = vec![RegSet::new(); n];
        let mut live_out = vec![RegSet::new(); n];
        let mut queued = vec![false; n];
        let mut worklist: VecDeque<BlockId> = func.layout.iter().rev().copied().collect();
        for bb in &worklist {
            queued[bb.0] = true;
        }

        let mut visits = 0usize;
        while let Some(bb) = worklist.pop_front() {
            queued[bb.0] = false;
            visits += 1;
            let block = func.block(bb);

            let mut out = RegSet::new();
            for s in &block.succs {
                out.extend(live_in[s.0].iter().copied());
            }
            let mut inn = gen_sets[bb.0].clone();
            inn.extend(out.difference(&kill[bb.0]).copied());
            live_out[bb.0] = out;

            if inn != live_in[bb.0] {
                live_in[bb.0] = inn;
                for p in &block.preds {
                    if !queued[p.0] {
                        queued[p.0] = true;
                        worklist.push_back(*p);
                    }
                }
            }
        }

        trace!(function = %func.name, blocks = func.layout.len(), visits, "liveness converged");
        Self { live_in, live_out }
    }

    /// Live set after each instruction of `bb`, in instruction order.
    pub fn live_after(&self, func: &IrFunction, bb: BlockId) -> Vec<RegSet> {
        let instrs = &func.block(bb).instrs;
        let mut out = vec![RegSet::new(); instrs.len()];
        let mut live = self.live_out[bb.0].clone();
        for (i, instr) in instrs.iter().enumerate().rev() {
            out[i] = live.clone();
            for d in defs(instr) {
                live.remove(&d);
            }
            live.extend(uses(instr));
        }
        out
    }

    pub fn is_live_out(&self, bb: BlockId, v: VReg) -> bool {
        self.live_out[bb.0].contains(&Reg::Virt(v))
    }

    pub fn is_live_in(&self, bb: BlockId, v: VReg) -> bool {
        self.live_in[bb.0].contains(&Reg::Virt(v))
    }
}
