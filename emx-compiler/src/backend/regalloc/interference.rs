//! Interference graph over virtual registers.
//!
//! Virtual-virtual conflicts are ordinary edges; a conflict with a physical
//! register (a call clobber, a pinned argument, the `idiv` pair) is recorded
//! as a color the node may not take.

use crate::backend::abi::PhysReg;
use crate::backend::liveness::{defs, Liveness};
use crate::ir::{BinOp, Instr, IrFunction, Reg, RegValue, VReg};
use std::collections::BTreeSet;

pub struct InterferenceGraph {
    adj: Vec<BTreeSet<VReg>>,
    forbidden: Vec<BTreeSet<PhysReg>>,
    present: Vec<bool>,
    /// Register pairs joined by a move; coloring tries to give both ends the same register.
    pub moves: Vec<(VReg, Reg)>,
}

impl InterferenceGraph {
    pub fn build(func: &IrFunction, live: &Liveness) -> Self {
        let n = func.vreg_count();
        let mut g = Self {
            adj: vec![BTreeSet::new(); n],
            forbidden: vec![BTreeSet::new(); n],
            present: vec![false; n],
            moves: Vec::new(),
        };

        for &bb in &func.layout {
            let after = live.live_after(func, bb);
            for (instr, live_after) in func.block(bb).instrs.iter().zip(&after) {
                for v in instr.sources().iter().chain(instr.dst()) {
                    if let RegValue::Vreg(r) = v {
                        g.present[r.0 as usize] = true;
                    }
                }

                // A move's destination may share a register with its source.
                let move_src = match instr {
                    Instr::Move { dst, src } => {
                        if let (Some(d), Some(s)) = (dst.reg(), src.reg()) {
                            match (d, s) {
                                (Reg::Virt(a), b) | (b, Reg::Virt(a)) => g.moves.push((a, b)),
                                _ => {}
                            }
                        }
                        src.reg()
                    }
                    _ => None,
                };

                for d in defs(instr) {
                    for &l in live_after {
                        if Some(l) != move_src {
                            g.add_edge(d, l);
                        }
                    }
                }

                match instr {
                    // The divisor must survive `cqo` and may not alias the dividend.
                    Instr::Binary { op: BinOp::Div | BinOp::Mod, rhs, .. } => {
                        if let Some(r) = rhs.reg() {
                            g.add_edge(r, Reg::Phys(PhysReg::Rax));
                            g.add_edge(r, Reg::Phys(PhysReg::Rdx));
                        }
                    }
                    // Three-address shapes lower to `mov dst, lhs; op dst, rhs`.
                    Instr::Binary { dst, lhs, rhs, .. } if dst != lhs => {
                        if let (Some(d), Some(r)) = (dst.reg(), rhs.reg()) {
                            if d != r {
                                g.add_edge(d, r);
                            }
                        }
                        if dst == rhs {
                            if let (Some(d), Some(l)) = (dst.reg(), lhs.reg()) {
                                g.add_edge(d, l);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        g
    }

    fn add_edge(&mut self, a: Reg, b: Reg) {
        match (a, b) {
            (Reg::Virt(x), Reg::Virt(y)) if x != y => {
                self.adj[x.0 as usize].insert(y);
                self.adj[y.0 as usize].insert(x);
            }
            (Reg::Virt(v), Reg::Phys(p)) | (Reg::Phys(p), Reg::Virt(v)) => {
                self.forbidden[v.0 as usize].insert(p);
            }
            _ => {}
        }
    }

    /// Virtual registers that occur in the function.
    pub fn nodes(&self) -> impl Iterator<Item = VReg> + '_ {
        (0..self.adj.len()).filter(|&i| self.present[i]).map(|i| VReg(i as u32))
    }

    pub fn neighbors(&self, v: VReg) -> &BTreeSet<VReg> {
        &self.adj[v.0 as usize]
    }

    pub fn forbidden(&self, v: VReg) -> &BTreeSet<PhysReg> {
        &self.forbidden[v.0 as usize]
    }

    pub fn interferes(&self, a: VReg, b: VReg) -> bool {
        self.adj[a.0 as usize].contains(&b)
    }

    pub fn conflicts_with_phys(&self, v: VReg, p: PhysReg) -> bool {
        self.forbidden[v.0 as usize].contains(&p)
    }
}
