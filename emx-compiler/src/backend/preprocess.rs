//! Register preprocessing: the last IR rewrite before liveness.
//!
//! - builds the CFG (dropping unreachable blocks);
//! - pins calling-convention registers with explicit moves at function
//!   entry, around every call and at every return;
//! - routes `idiv` through rax/rdx and variable shift counts through rcx;
//! - legalizes operands x86 cannot encode (64-bit immediates outside mov,
//!   static addresses as arithmetic operands, immediate left-hand compares).
//!
//! After this pass every remaining constraint is expressed as a physical
//! register operand, so the allocator needs no target knowledge beyond the
//! palette and the clobber sets in `liveness`.

use super::abi::{fits_imm32, PhysReg};
use crate::ir::*;
use crate::CompileError;
use tracing::debug;

pub fn preprocess(root: &mut IrRoot) -> Result<(), CompileError> {
    for func in &mut root.functions {
        preprocess_function(func)?;
    }
    Ok(())
}

pub fn preprocess_function(func: &mut IrFunction) -> Result<(), CompileError> {
    func.compute_cfg()?;

    let layout = func.layout.clone();
    for bb in layout {
        let instrs = std::mem::take(&mut func.block_mut(bb).instrs);
        let mut out = Vec::with_capacity(instrs.len() + 4);
        for instr in instrs {
            let mut lw = Legalizer { func: &mut *func, out: &mut out };
            lw.lower(instr);
        }
        func.block_mut(bb).instrs = out;
    }

    bind_params(func);
    func.compute_cfg()?;
    debug!(function = %func.name, vregs = func.vreg_count(), "preprocessed");
    Ok(())
}

/// Move incoming arguments out of their ABI locations in a fresh entry block.
fn bind_params(func: &mut IrFunction) {
    let old_entry = func.entry;
    let entry = func.new_block("params");
    let params = func.params.clone();
    for (i, p) in params.into_iter().enumerate() {
        let instr = match PhysReg::PARAM_REGS.get(i) {
            Some(r) => Instr::Move { dst: p.into(), src: (*r).into() },
            None => Instr::Load { dst: p.into(), addr: Address::Incoming(i - PhysReg::PARAM_REGS.len()) },
        };
        func.block_mut(entry).instrs.push(instr);
    }
    func.block_mut(entry).instrs.push(Instr::Jump { target: old_entry });
    func.entry = entry;
    func.layout.retain(|b| *b != entry);
    func.layout.insert(0, entry);
}

struct Legalizer<'f> {
    func: &'f mut IrFunction,
    out: &'f mut Vec<Instr>,
}

impl Legalizer<'_> {
    fn temp(&mut self, v: RegValue) -> RegValue {
        let t = self.func.new_vreg("tmp");
        self.out.push(Instr::Move { dst: t.into(), src: v });
        t.into()
    }

    /// Any value that is not a register goes through one.
    fn reg(&mut self, v: RegValue) -> RegValue {
        if v.is_reg() {
            v
        } else {
            self.temp(v)
        }
    }

    /// A source operand of an ALU instruction: register or 32-bit immediate.
    fn src(&mut self, v: RegValue) -> RegValue {
        match v {
            RegValue::Imm(i) if fits_imm32(i) => v,
            RegValue::Vreg(_) | RegValue::Phys(_) => v,
            _ => self.temp(v),
        }
    }

    fn addr(&mut self, a: Address) -> Address {
        match a {
            Address::Base { base, offset } if !fits_imm32(offset) => {
                let t = self.func.new_vreg("addr");
                self.out.push(Instr::Move { dst: t.into(), src: RegValue::Imm(offset) });
                let base = self.reg(base);
                self.out.push(Instr::Binary { dst: t.into(), op: BinOp::Add, lhs: t.into(), rhs: base });
                Address::Base { base: t.into(), offset: 0 }
            }
            Address::Base { base, offset } => Address::Base { base: self.reg(base), offset },
            other => other,
        }
    }

    /// Put a compare's register operand on the left.
    fn compare_operands(&mut self, cond: CmpOp, lhs: RegValue, rhs: RegValue) -> (CmpOp, RegValue, RegValue) {
        let (cond, lhs, rhs) = if !lhs.is_reg() && rhs.is_reg() {
            (cond.mirror(), rhs, lhs)
        } else {
            (cond, lhs, rhs)
        };
        let lhs = self.reg(lhs);
        let rhs = self.src(rhs);
        (cond, lhs, rhs)
    }

    fn lower(&mut self, instr: Instr) {
        match instr {
            Instr::Binary { dst, op: op @ (BinOp::Div | BinOp::Mod), lhs, rhs } => {
                let divisor = self.reg(rhs);
                let result = if op == BinOp::Div { PhysReg::Rax } else { PhysReg::Rdx };
                self.out.push(Instr::Move { dst: PhysReg::Rax.into(), src: lhs });
                self.out.push(Instr::Binary { dst: result.into(), op, lhs: PhysReg::Rax.into(), rhs: divisor });
                self.out.push(Instr::Move { dst, src: result.into() });
            }
            Instr::Binary { dst, op: op @ (BinOp::Shl | BinOp::Shr), lhs, rhs } => {
                let count = match rhs {
                    RegValue::Imm(k) => RegValue::Imm(k & 63),
                    other => {
                        self.out.push(Instr::Move { dst: PhysReg::SHIFT_REG.into(), src: other });
                        PhysReg::SHIFT_REG.into()
                    }
                };
                if dst != lhs {
                    self.out.push(Instr::Move { dst, src: lhs });
                }
                self.out.push(Instr::Binary { dst, op, lhs: dst, rhs: count });
            }
            Instr::Binary { dst, op, lhs, rhs } => {
                let lhs = if lhs == dst { lhs } else { self.src(lhs) };
                let rhs = if rhs == dst { rhs } else { self.src(rhs) };
                self.out.push(Instr::Binary { dst, op, lhs, rhs });
            }
            Instr::Unary { dst, op, src } => {
                let src = self.src(src);
                self.out.push(Instr::Unary { dst, op, src });
            }
            Instr::Compare { dst, cond, lhs, rhs } => {
                let (cond, lhs, rhs) = self.compare_operands(cond, lhs, rhs);
                self.out.push(Instr::Compare { dst, cond, lhs, rhs });
            }
            Instr::Branch { cond, lhs, rhs, then_bb, else_bb } => {
                let (cond, lhs, rhs) = self.compare_operands(cond, lhs, rhs);
                self.out.push(Instr::Branch { cond, lhs, rhs, then_bb, else_bb });
            }
            Instr::Load { dst, addr } => {
                let addr = self.addr(addr);
                self.out.push(Instr::Load { dst, addr });
            }
            Instr::Store { addr, src } => {
                let src = self.src(src);
                let addr = self.addr(addr);
                self.out.push(Instr::Store { addr, src });
            }
            Instr::Call { dst, callee, args, .. } => self.lower_call(dst, callee, args),
            Instr::Return { value: Some(v) } => {
                self.out.push(Instr::Move { dst: PhysReg::RETURN_REG.into(), src: v });
                self.out.push(Instr::Return { value: Some(PhysReg::RETURN_REG.into()) });
            }
            other => self.out.push(other),
        }
    }

    /// Arguments past the sixth are pushed right to left, with one padding
    /// word when their count is odd so `rsp` stays 16-byte aligned at the call.
    fn lower_call(&mut self, dst: Option<RegValue>, callee: Callee, args: Vec<RegValue>) {
        let n_regs = args.len().min(PhysReg::PARAM_REGS.len());
        let stack = &args[n_regs..];
        let pad = stack.len() % 2;
        if pad == 1 {
            self.out.push(Instr::Push { src: RegValue::Imm(0) });
        }
        for a in stack.iter().rev() {
            let src = self.src(*a);
            self.out.push(Instr::Push { src });
        }
        let mut regs = Vec::with_capacity(n_regs);
        for (a, r) in args[..n_regs].iter().zip(PhysReg::PARAM_REGS) {
            self.out.push(Instr::Move { dst: r.into(), src: *a });
            regs.push(RegValue::Phys(r));
        }
        self.out.push(Instr::Call { dst: None, callee, args: regs, stack_args: stack.len() + pad });
        if let Some(d) = dst {
            self.out.push(Instr::Move { dst: d, src: PhysReg::RETURN_REG.into() });
        }
    }
}
