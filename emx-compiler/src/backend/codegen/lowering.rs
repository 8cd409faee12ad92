//! Instruction-level lowering: one allocated IR instruction at a time.
//!
//! By the time an instruction reaches this module every operand is a
//! physical register, an immediate or a static address, and every
//! x86 encoding constraint has been made explicit by the preprocessor; an
//! operand that is still virtual is an internal error.

use super::{Codegen, BLOCK_LABEL_PREFIX, EPILOGUE_LABEL};
use crate::backend::abi::{PhysReg, INCOMING_ARG_BASE, WORD};
use crate::backend::instruction::{AluOp, Cond, Mem, Operand, ShiftOp, X86Instr};
use crate::ir::*;
use crate::CompileError;

/// Local assembly label of block `bb`.
pub(crate) fn block_label(func: &IrFunction, bb: BlockId) -> String {
    let hint: String = func
        .block(bb)
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{BLOCK_LABEL_PREFIX}{}_{hint}", bb.0)
}

fn unallocated(v: impl std::fmt::Display) -> CompileError {
    CompileError::Internal(format!("operand {v} reached code generation without a register"))
}

impl Codegen {
    // ── Operand conversion ──────────────────────────────────────────────

    fn phys(&self, v: &RegValue) -> Result<PhysReg, CompileError> {
        match v {
            RegValue::Phys(p) => Ok(*p),
            other => Err(unallocated(other)),
        }
    }

    fn operand(&self, v: &RegValue) -> Result<Operand, CompileError> {
        match v {
            RegValue::Phys(p) => Ok(Operand::Reg(*p)),
            RegValue::Imm(i) => Ok(Operand::Imm(*i)),
            other => Err(unallocated(other)),
        }
    }

    fn static_label(&self, s: StaticId) -> Result<String, CompileError> {
        self.static_labels
            .get(s.0)
            .cloned()
            .ok_or_else(|| CompileError::Internal(format!("no label for static {}", s.0)))
    }

    fn mem(&self, addr: &Address) -> Result<Mem, CompileError> {
        Ok(match addr {
            Address::Base { base, offset } => Mem::base(self.phys(base)?, *offset),
            Address::Static(s) => Mem::label(self.static_label(*s)?),
            Address::Slot(k) => Mem::base(PhysReg::FRAME_PTR, -((k.0 as i64) + 1) * WORD),
            Address::Incoming(k) => Mem::base(PhysReg::FRAME_PTR, INCOMING_ARG_BASE + (*k as i64) * WORD),
        })
    }

    fn callee_symbol(&mut self, callee: &Callee) -> Result<String, CompileError> {
        match callee {
            Callee::Function(id) => self
                .func_labels
                .get(id.0)
                .cloned()
                .ok_or_else(|| CompileError::Internal(format!("call to unknown function #{}", id.0))),
            Callee::Builtin(b) => {
                self.externs.insert(b.symbol());
                Ok(b.symbol().to_string())
            }
        }
    }

    // ── Lowering ────────────────────────────────────────────────────────

    /// Lower one instruction of `func`; `next` is the block laid out after
    /// the current one, if any.
    pub(crate) fn lower_instr(
        &mut self,
        func: &IrFunction,
        instr: &Instr,
        next: Option<BlockId>,
    ) -> Result<(), CompileError> {
        match instr {
            Instr::Move { dst, src } => {
                let d = self.phys(dst)?;
                match src {
                    RegValue::Static(s) => {
                        let label = self.static_label(*s)?;
                        self.push_asm(X86Instr::Lea { dst: d, mem: Mem::label(label) });
                    }
                    other => {
                        let src = self.operand(other)?;
                        self.push_asm(X86Instr::Mov { dst: d.into(), src });
                    }
                }
            }

            Instr::Binary { op: BinOp::Div | BinOp::Mod, rhs, .. } => {
                let divisor = self.phys(rhs)?;
                self.push_asm(X86Instr::Cqo);
                self.push_asm(X86Instr::Idiv(divisor));
            }

            Instr::Binary { dst, op: op @ (BinOp::Shl | BinOp::Shr), lhs, rhs } => {
                let d = self.phys(dst)?;
                if lhs != dst {
                    let src = self.operand(lhs)?;
                    self.push_asm(X86Instr::Mov { dst: d.into(), src });
                }
                let count = match rhs {
                    RegValue::Imm(k) => Some((k & 63) as u8),
                    RegValue::Phys(PhysReg::Rcx) => None,
                    other => return Err(unallocated(other)),
                };
                let op = if *op == BinOp::Shl { ShiftOp::Sal } else { ShiftOp::Sar };
                self.push_asm(X86Instr::Shift { op, dst: d, count });
            }

            Instr::Binary { dst, op, lhs, rhs } => {
                let d = self.phys(dst)?;
                let alu = alu_op(*op)?;
                if lhs == dst {
                    let src = self.operand(rhs)?;
                    self.push_asm(X86Instr::Alu { op: alu, dst: d, src });
                } else if rhs == dst && op.is_commutative() {
                    let src = self.operand(lhs)?;
                    self.push_asm(X86Instr::Alu { op: alu, dst: d, src });
                } else if rhs == dst && *op == BinOp::Sub {
                    // d = lhs - d
                    let src = self.operand(lhs)?;
                    self.push_asm(X86Instr::Neg(d));
                    self.push_asm(X86Instr::Alu { op: AluOp::Add, dst: d, src });
                } else {
                    let l = self.operand(lhs)?;
                    let r = self.operand(rhs)?;
                    self.push_asm(X86Instr::Mov { dst: d.into(), src: l });
                    self.push_asm(X86Instr::Alu { op: alu, dst: d, src: r });
                }
            }

            Instr::Unary { dst, op, src } => {
                let d = self.phys(dst)?;
                if src != dst {
                    let s = self.operand(src)?;
                    self.push_asm(X86Instr::Mov { dst: d.into(), src: s });
                }
                self.push_asm(match op {
                    UnOp::Neg => X86Instr::Neg(d),
                    UnOp::Not => X86Instr::Not(d),
                });
            }

            Instr::Compare { dst, cond, lhs, rhs } => {
                let d = self.phys(dst)?;
                let lhs = self.phys(lhs)?;
                let rhs = self.operand(rhs)?;
                self.push_asm(X86Instr::Cmp { lhs, rhs });
                self.push_asm(X86Instr::Set { cond: (*cond).into(), dst: d });
                self.push_asm(X86Instr::Movzx { dst: d, src: d });
            }

            Instr::Branch { cond, lhs, rhs, then_bb, else_bb } => {
                let lhs = self.phys(lhs)?;
                let rhs = self.operand(rhs)?;
                self.push_asm(X86Instr::Cmp { lhs, rhs });
                // Prefer falling through into whichever successor comes next.
                let (cond, taken, other) = if next == Some(*then_bb) {
                    (cond.negate(), *else_bb, *then_bb)
                } else {
                    (*cond, *then_bb, *else_bb)
                };
                self.push_asm(X86Instr::Jcc { cond: Cond::from(cond), target: block_label(func, taken) });
                self.push_asm(X86Instr::jmp(block_label(func, other)));
            }

            Instr::Load { dst, addr } => {
                let d = self.phys(dst)?;
                let mem = self.mem(addr)?;
                match addr {
                    Address::Slot(k) => self.push_commented(X86Instr::load(d, mem), format!("reload slot {}", k.0)),
                    _ => self.push_asm(X86Instr::load(d, mem)),
                }
            }

            Instr::Store { addr, src } => {
                let mem = self.mem(addr)?;
                let src = self.operand(src)?;
                match addr {
                    Address::Slot(k) => self.push_commented(X86Instr::store(mem, src), format!("spill slot {}", k.0)),
                    _ => self.push_asm(X86Instr::store(mem, src)),
                }
            }

            Instr::Call { callee, stack_args, .. } => {
                let sym = self.callee_symbol(callee)?;
                self.push_asm(X86Instr::Call(sym));
                if *stack_args > 0 {
                    let bytes = Operand::Imm(*stack_args as i64 * WORD);
                    self.push_commented(X86Instr::alu(AluOp::Add, PhysReg::STACK_PTR, bytes), "pop stack arguments");
                }
            }

            Instr::Push { src } => {
                let src = self.operand(src)?;
                self.push_asm(X86Instr::Push(src));
            }

            Instr::Jump { target } => self.push_asm(X86Instr::jmp(block_label(func, *target))),

            Instr::Return { .. } => self.push_asm(X86Instr::jmp(EPILOGUE_LABEL)),
        }
        Ok(())
    }
}

fn alu_op(op: BinOp) -> Result<AluOp, CompileError> {
    Ok(match op {
        BinOp::Add => AluOp::Add,
        BinOp::Sub => AluOp::Sub,
        BinOp::Mul => AluOp::Imul,
        BinOp::And => AluOp::And,
        BinOp::Or => AluOp::Or,
        BinOp::Xor => AluOp::Xor,
        BinOp::Div | BinOp::Mod | BinOp::Shl | BinOp::Shr => {
            return Err(CompileError::Internal(format!("`{}` needs dedicated lowering", op.mnemonic())))
        }
    })
}
