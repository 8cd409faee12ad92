//! Spill-code insertion.
//!
//! Each spilled register gets one frame slot. Moves touching a spilled
//! register become direct loads or stores; any other instruction reads a
//! spilled operand through a fresh short-lived temporary loaded right before
//! it and writes one back right after it. Those temporaries are never
//! spilled again.

use crate::backend::abi::fits_imm32;
use crate::ir::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

pub fn spill_vregs(func: &mut IrFunction, spilled: &BTreeSet<VReg>, unspillable: &mut BTreeSet<VReg>) {
    let slots: BTreeMap<VReg, SlotId> = spilled.iter().map(|&v| (v, func.new_slot())).collect();
    let slot_of = |v: &RegValue| v.vreg().and_then(|r| slots.get(&r).copied());

    let layout = func.layout.clone();
    for bb in layout {
        let instrs = std::mem::take(&mut func.block_mut(bb).instrs);
        let mut out = Vec::with_capacity(instrs.len() * 2);
        for instr in instrs {
            match instr {
                Instr::Move { dst, src } if slot_of(&dst).is_some() && storable(&src, &slot_of) => {
                    if let Some(s) = slot_of(&dst) {
                        out.push(Instr::Store { addr: Address::Slot(s), src });
                    }
                }
                Instr::Move { dst, src } if slot_of(&src).is_some() && slot_of(&dst).is_none() => {
                    if let Some(s) = slot_of(&src) {
                        out.push(Instr::Load { dst, addr: Address::Slot(s) });
                    }
                }
                mut instr => {
                    let read: BTreeSet<VReg> = instr.sources().iter().filter_map(RegValue::vreg).collect();
                    let written = instr.dst().and_then(RegValue::vreg);

                    let mut temps: BTreeMap<VReg, VReg> = BTreeMap::new();
                    instr.for_each_operand_mut(|v| {
                        if let RegValue::Vreg(r) = v {
                            if slots.contains_key(r) {
                                let t = *temps.entry(*r).or_insert_with(|| func.new_vreg("spill"));
                                *v = RegValue::Vreg(t);
                            }
                        }
                    });

                    for (orig, t) in &temps {
                        unspillable.insert(*t);
                        if read.contains(orig) {
                            out.push(Instr::Load { dst: (*t).into(), addr: Address::Slot(slots[orig]) });
                        }
                    }
                    out.push(instr);
                    for (orig, t) in &temps {
                        if written == Some(*orig) {
                            out.push(Instr::Store { addr: Address::Slot(slots[orig]), src: (*t).into() });
                        }
                    }
                }
            }
        }
        func.block_mut(bb).instrs = out;
    }
    trace!(function = %func.name, spilled = spilled.len(), slots = func.slot_count, "inserted spill code");
}

/// Whether `src` can be written to a frame slot by a single store.
fn storable(src: &RegValue, slot_of: &impl Fn(&RegValue) -> Option<SlotId>) -> bool {
    match src {
        RegValue::Vreg(_) => slot_of(src).is_none(),
        RegValue::Phys(_) => true,
        RegValue::Imm(i) => fits_imm32(*i),
        RegValue::Static(_) => false,
    }
}
