//! x86-64 machine-instruction types and assembly output items.
//!
//! This module defines the typed instruction subset the backend emits
//! (`X86Instr`), memory and general operands (`Mem`, `Operand`), condition
//! codes (`Cond`), and the structured assembly output type (`AsmItem`)
//! shared by code generation and the peephole passes.

use super::abi::PhysReg;
use crate::ir::CmpOp;
use std::fmt;

// ============================================================================
// Operands
// ============================================================================

/// A memory operand. Every access is one quadword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mem {
    /// `[base + disp]`
    Base { base: PhysReg, disp: i64 },
    /// `[rel label]`
    Label(String),
}

impl Mem {
    pub fn base(base: PhysReg, disp: i64) -> Self {
        Mem::Base { base, disp }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Mem::Label(label.into())
    }

    pub fn uses_register(&self, reg: PhysReg) -> bool {
        matches!(self, Mem::Base { base, .. } if *base == reg)
    }
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mem::Base { base, disp: 0 } => write!(f, "[{base}]"),
            Mem::Base { base, disp } if *disp < 0 => write!(f, "[{base} - {}]", -disp),
            Mem::Base { base, disp } => write!(f, "[{base} + {disp}]"),
            Mem::Label(l) => write!(f, "[rel {l}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(PhysReg),
    Imm(i64),
    Mem(Mem),
}

impl Operand {
    pub fn uses_register(&self, reg: PhysReg) -> bool {
        match self {
            Operand::Reg(r) => *r == reg,
            Operand::Mem(m) => m.uses_register(reg),
            Operand::Imm(_) => false,
        }
    }
}

impl From<PhysReg> for Operand {
    fn from(r: PhysReg) -> Self {
        Operand::Reg(r)
    }
}

impl From<Mem> for Operand {
    fn from(m: Mem) -> Self {
        Operand::Mem(m)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(i) => write!(f, "{i}"),
            Operand::Mem(m) => write!(f, "{m}"),
        }
    }
}

// ============================================================================
// Condition codes
// ============================================================================

/// Signed condition code shared by `jcc` and `setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
}

impl Cond {
    pub fn suffix(&self) -> &'static str {
        match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::L => "l",
            Cond::Le => "le",
            Cond::G => "g",
            Cond::Ge => "ge",
        }
    }
}

impl From<CmpOp> for Cond {
    fn from(op: CmpOp) -> Self {
        match op {
            CmpOp::Eq => Cond::E,
            CmpOp::Ne => Cond::Ne,
            CmpOp::Lt => Cond::L,
            CmpOp::Le => Cond::Le,
            CmpOp::Gt => Cond::G,
            CmpOp::Ge => Cond::Ge,
        }
    }
}

// ============================================================================
// Typed x86-64 instruction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Imul,
    And,
    Or,
    Xor,
}

impl AluOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Imul => "imul",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Sal,
    Sar,
}

/// The subset of x86-64 the backend emits, in Intel syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum X86Instr {
    // ── Data movement ───────────────────────────────────────────────────
    /// `mov dst, src`; never memory to memory.
    Mov { dst: Operand, src: Operand },
    /// `lea dst, [mem]`
    Lea { dst: PhysReg, mem: Mem },
    /// `movzx dst, src8`
    Movzx { dst: PhysReg, src: PhysReg },
    Push(Operand),
    Pop(PhysReg),

    // ── Arithmetic ──────────────────────────────────────────────────────
    /// `op dst, src`
    Alu { op: AluOp, dst: PhysReg, src: Operand },
    /// `sal|sar dst, imm` or `sal|sar dst, cl` when `count` is `None`.
    Shift { op: ShiftOp, dst: PhysReg, count: Option<u8> },
    Neg(PhysReg),
    Not(PhysReg),
    /// Sign-extend rax into rdx:rax.
    Cqo,
    /// Signed divide rdx:rax; quotient in rax, remainder in rdx.
    Idiv(PhysReg),
    Cmp { lhs: PhysReg, rhs: Operand },
    /// `setcc dst8`
    Set { cond: Cond, dst: PhysReg },

    // ── Control flow ────────────────────────────────────────────────────
    Jmp(String),
    Jcc { cond: Cond, target: String },
    Call(String),
    Ret,
}

// ── Convenience constructors ────────────────────────────────────────────

impl X86Instr {
    /// Register-to-register move.
    pub fn mov(dst: PhysReg, src: PhysReg) -> Self {
        X86Instr::Mov { dst: dst.into(), src: src.into() }
    }

    pub fn mov_imm(dst: PhysReg, imm: i64) -> Self {
        X86Instr::Mov { dst: dst.into(), src: Operand::Imm(imm) }
    }

    pub fn load(dst: PhysReg, mem: Mem) -> Self {
        X86Instr::Mov { dst: dst.into(), src: mem.into() }
    }

    pub fn store(mem: Mem, src: Operand) -> Self {
        X86Instr::Mov { dst: mem.into(), src }
    }

    pub fn alu(op: AluOp, dst: PhysReg, src: impl Into<Operand>) -> Self {
        X86Instr::Alu { op, dst, src: src.into() }
    }

    pub fn jmp(label: impl Into<String>) -> Self {
        X86Instr::Jmp(label.into())
    }

    /// Returns `true` if the instruction references `reg` in any operand position.
    pub fn uses_register(&self, reg: PhysReg) -> bool {
        match self {
            X86Instr::Mov { dst, src } => dst.uses_register(reg) || src.uses_register(reg),
            X86Instr::Lea { dst, mem } => *dst == reg || mem.uses_register(reg),
            X86Instr::Movzx { dst, src } => *dst == reg || *src == reg,
            X86Instr::Push(op) => op.uses_register(reg),
            X86Instr::Pop(r) | X86Instr::Neg(r) | X86Instr::Not(r) | X86Instr::Idiv(r) => *r == reg,
            X86Instr::Alu { dst, src, .. } => *dst == reg || src.uses_register(reg),
            X86Instr::Shift { dst, count, .. } => *dst == reg || (count.is_none() && reg == PhysReg::Rcx),
            X86Instr::Cqo => matches!(reg, PhysReg::Rax | PhysReg::Rdx),
            X86Instr::Cmp { lhs, rhs } => *lhs == reg || rhs.uses_register(reg),
            X86Instr::Set { dst, .. } => *dst == reg,
            X86Instr::Jmp(_) | X86Instr::Jcc { .. } | X86Instr::Call(_) | X86Instr::Ret => false,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, X86Instr::Call(_))
    }

    /// Target of an unconditional jump.
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            X86Instr::Jmp(t) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Target of any jump, conditional or not.
    pub fn branch_target(&self) -> Option<&str> {
        match self {
            X86Instr::Jmp(t) | X86Instr::Jcc { target: t, .. } => Some(t.as_str()),
            _ => None,
        }
    }
}

// ── Display: lower to NASM text ─────────────────────────────────────────

impl fmt::Display for X86Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X86Instr::Mov { dst: dst @ Operand::Mem(_), src: src @ Operand::Imm(_) } => {
                write!(f, "    mov qword {dst}, {src}")
            }
            X86Instr::Mov { dst, src } => write!(f, "    mov {dst}, {src}"),
            X86Instr::Lea { dst, mem } => write!(f, "    lea {dst}, {mem}"),
            X86Instr::Movzx { dst, src } => write!(f, "    movzx {dst}, {}", src.low_byte()),
            X86Instr::Push(op @ Operand::Mem(_)) => write!(f, "    push qword {op}"),
            X86Instr::Push(op) => write!(f, "    push {op}"),
            X86Instr::Pop(r) => write!(f, "    pop {r}"),

            X86Instr::Alu { op, dst, src } => write!(f, "    {} {dst}, {src}", op.mnemonic()),
            X86Instr::Shift { op, dst, count } => {
                let m = match op {
                    ShiftOp::Sal => "sal",
                    ShiftOp::Sar => "sar",
                };
                match count {
                    Some(n) => write!(f, "    {m} {dst}, {n}"),
                    None => write!(f, "    {m} {dst}, cl"),
                }
            }
            X86Instr::Neg(r) => write!(f, "    neg {r}"),
            X86Instr::Not(r) => write!(f, "    not {r}"),
            X86Instr::Cqo => write!(f, "    cqo"),
            X86Instr::Idiv(r) => write!(f, "    idiv {r}"),
            X86Instr::Cmp { lhs, rhs } => write!(f, "    cmp {lhs}, {rhs}"),
            X86Instr::Set { cond, dst } => write!(f, "    set{} {}", cond.suffix(), dst.low_byte()),

            X86Instr::Jmp(t) => write!(f, "    jmp {t}"),
            X86Instr::Jcc { cond, target } => write!(f, "    j{} {target}", cond.suffix()),
            X86Instr::Call(t) => write!(f, "    call {t}"),
            X86Instr::Ret => write!(f, "    ret"),
        }
    }
}

// ============================================================================
// Data directives
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    /// `dq value`
    Quad(i64),
    /// `db b0, b1, ...`
    Bytes(Vec<u8>),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Quad(v) => write!(f, "dq {v}"),
            DataValue::Bytes(bytes) => {
                let list = bytes.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", ");
                write!(f, "db {list}")
            }
        }
    }
}

// ============================================================================
// AsmItem: top-level assembly output element
// ============================================================================

/// A structured assembly output element.
///
/// Code generation emits a tree of `AsmItem`s; the peephole passes in
/// `optimize.rs` rewrite it before it is flattened to text.
#[derive(Debug, Clone)]
pub enum AsmItem {
    /// A label on its own line.
    Label(String),
    Instr {
        instr: X86Instr,
        comment: Option<String>,
    },
    /// A function, kept structured so passes can inspect its frame.
    Function {
        name: String,
        prologue: Vec<AsmItem>,
        body: Vec<AsmItem>,
        epilogue: Vec<AsmItem>,
        /// Bytes of spill slots below the saved registers.
        frame_size: usize,
        used_callee: Vec<PhysReg>,
        is_leaf: bool,
    },
    /// Data directive, with an optional label on the same line.
    Data {
        label: Option<String>,
        value: DataValue,
    },
    /// Section switch, symbol visibility and similar assembler directives.
    Directive(String),
    Blank,
}

impl AsmItem {
    pub fn instr(instr: X86Instr) -> Self {
        AsmItem::Instr { instr, comment: None }
    }

    pub fn as_instr(&self) -> Option<&X86Instr> {
        match self {
            AsmItem::Instr { instr, .. } => Some(instr),
            _ => None,
        }
    }
}

/// Final NASM listing.
#[derive(Debug, Clone, Default)]
pub struct NasmAsm {
    pub lines: Vec<String>,
}

impl NasmAsm {
    pub fn join(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}
