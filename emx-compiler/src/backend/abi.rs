//! x86-64 registers and System V calling-convention constants.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhysReg {
    Rax, Rbx, Rcx, Rdx, Rsi, Rdi, Rbp, Rsp,
    R8, R9, R10, R11, R12, R13, R14, R15,
}

impl PhysReg {
    /// Registers the allocator may hand out: everything but the stack and frame pointers.
    /// Caller-saved registers come first so short-lived values avoid prologue saves.
    pub const ALLOCATABLE: [PhysReg; 14] = [
        PhysReg::Rax, PhysReg::Rcx, PhysReg::Rdx, PhysReg::Rsi,
        PhysReg::Rdi, PhysReg::R8, PhysReg::R9, PhysReg::R10,
        PhysReg::R11, PhysReg::Rbx, PhysReg::R12, PhysReg::R13,
        PhysReg::R14, PhysReg::R15,
    ];

    pub const CALLER_SAVED: [PhysReg; 9] = [
        PhysReg::Rax, PhysReg::Rcx, PhysReg::Rdx, PhysReg::Rsi,
        PhysReg::Rdi, PhysReg::R8, PhysReg::R9, PhysReg::R10,
        PhysReg::R11,
    ];

    /// Callee-saved registers the prologue may have to preserve (rbp is handled
    /// by the frame setup itself).
    pub const CALLEE_SAVED: [PhysReg; 5] = [
        PhysReg::Rbx, PhysReg::R12, PhysReg::R13, PhysReg::R14, PhysReg::R15,
    ];

    pub const PARAM_REGS: [PhysReg; 6] = [
        PhysReg::Rdi, PhysReg::Rsi, PhysReg::Rdx, PhysReg::Rcx, PhysReg::R8, PhysReg::R9,
    ];

    pub const RETURN_REG: PhysReg = PhysReg::Rax;
    pub const STACK_PTR: PhysReg = PhysReg::Rsp;
    pub const FRAME_PTR: PhysReg = PhysReg::Rbp;
    /// Variable shift counts must sit in `cl`.
    pub const SHIFT_REG: PhysReg = PhysReg::Rcx;

    pub fn is_callee_saved(self) -> bool {
        Self::CALLEE_SAVED.contains(&self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhysReg::Rax => "rax",
            PhysReg::Rbx => "rbx",
            PhysReg::Rcx => "rcx",
            PhysReg::Rdx => "rdx",
            PhysReg::Rsi => "rsi",
            PhysReg::Rdi => "rdi",
            PhysReg::Rbp => "rbp",
            PhysReg::Rsp => "rsp",
            PhysReg::R8 => "r8",
            PhysReg::R9 => "r9",
            PhysReg::R10 => "r10",
            PhysReg::R11 => "r11",
            PhysReg::R12 => "r12",
            PhysReg::R13 => "r13",
            PhysReg::R14 => "r14",
            PhysReg::R15 => "r15",
        }
    }

    /// Low-byte alias, used as the `setcc` destination.
    pub fn low_byte(&self) -> &'static str {
        match self {
            PhysReg::Rax => "al",
            PhysReg::Rbx => "bl",
            PhysReg::Rcx => "cl",
            PhysReg::Rdx => "dl",
            PhysReg::Rsi => "sil",
            PhysReg::Rdi => "dil",
            PhysReg::Rbp => "bpl",
            PhysReg::Rsp => "spl",
            PhysReg::R8 => "r8b",
            PhysReg::R9 => "r9b",
            PhysReg::R10 => "r10b",
            PhysReg::R11 => "r11b",
            PhysReg::R12 => "r12b",
            PhysReg::R13 => "r13b",
            PhysReg::R14 => "r14b",
            PhysReg::R15 => "r15b",
        }
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bytes per machine word; every IR value occupies exactly one.
pub const WORD: i64 = 8;

/// Offset of the first stack-passed argument from `rbp` (saved rbp + return address).
pub const INCOMING_ARG_BASE: i64 = 16;

/// Whether `v` can be encoded as a sign-extended 32-bit immediate.
pub fn fits_imm32(v: i64) -> bool {
    i32::try_from(v).is_ok()
}
