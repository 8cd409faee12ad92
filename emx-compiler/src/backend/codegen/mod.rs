//! Code generation driver and assembly output.
//!
//! Contains the [`Codegen`] struct, buffer management helpers, frame
//! construction and the final flattening of `AsmItem`s into NASM text.
//!
//! Frame layout (rbp-based):
//!
//! ```text
//! [rbp + 16 + 8k]   k-th stack-passed argument
//! [rbp + 8]         return address
//! [rbp]             saved rbp
//! [rbp - 8(k+1)]    spill slot k (padded to keep rsp 16-byte aligned)
//! below             saved callee-saved registers
//! ```

mod lowering;
mod program;

use super::abi::{PhysReg, WORD};
use super::instruction::{AluOp, AsmItem, Mem, NasmAsm, Operand, X86Instr};
use std::collections::BTreeSet;

/// Local label every `return` jumps to.
pub(crate) const EPILOGUE_LABEL: &str = ".epilogue";
pub(crate) const BLOCK_LABEL_PREFIX: &str = ".bb";

// ============================================================================
// Codegen state
// ============================================================================

/// Central code-generation driver.
///
/// Walks allocated IR functions, accumulates their assembly in structured
/// form, and produces the final `NasmAsm`.
pub struct Codegen {
    pub(crate) out: Vec<AsmItem>,
    pub(crate) data: Vec<AsmItem>,
    pub(crate) func_buf: Option<Vec<AsmItem>>,
    pub(crate) current_func_name: Option<String>,
    pub(crate) current_slots: usize,
    pub(crate) static_labels: Vec<String>,
    pub(crate) func_labels: Vec<String>,
    pub(crate) externs: BTreeSet<&'static str>,
    pub(crate) entry_label: Option<String>,
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            data: Vec::new(),
            func_buf: None,
            current_func_name: None,
            current_slots: 0,
            static_labels: Vec::new(),
            func_labels: Vec::new(),
            externs: BTreeSet::new(),
            entry_label: None,
        }
    }

    // ── Item emission helpers ───────────────────────────────────────────

    pub(crate) fn push_asm(&mut self, instr: X86Instr) {
        self.push_item(AsmItem::Instr { instr, comment: None });
    }

    pub(crate) fn push_commented(&mut self, instr: X86Instr, comment: impl Into<String>) {
        self.push_item(AsmItem::Instr { instr, comment: Some(comment.into()) });
    }

    pub(crate) fn push_label(&mut self, name: String) {
        self.push_item(AsmItem::Label(name));
    }

    fn push_item(&mut self, item: AsmItem) {
        match &mut self.func_buf {
            Some(buf) => buf.push(item),
            None => self.out.push(item),
        }
    }

    // ── Function management ─────────────────────────────────────────────

    pub(crate) fn start_function(&mut self, name: String, slots: usize) {
        self.func_buf = Some(Vec::new());
        self.current_func_name = Some(name);
        self.current_slots = slots;
    }

    fn detect_used_callee_saved(body: &[AsmItem]) -> Vec<PhysReg> {
        PhysReg::CALLEE_SAVED
            .into_iter()
            .filter(|reg| body.iter().filter_map(AsmItem::as_instr).any(|i| i.uses_register(*reg)))
            .collect()
    }

    fn is_leaf(body: &[AsmItem]) -> bool {
        !body.iter().filter_map(AsmItem::as_instr).any(X86Instr::is_call)
    }

    /// Wrap the buffered body in a prologue and epilogue.
    pub(crate) fn flush_function(&mut self) {
        let body = self.func_buf.take().unwrap_or_default();
        let name = self.current_func_name.take().unwrap_or_else(|| "__anon".to_string());
        let used_callee = Self::detect_used_callee_saved(&body);
        let saved = used_callee.len();
        let is_leaf = Self::is_leaf(&body);

        // rsp is 16-byte aligned after `push rbp`; keep it so below the frame.
        let slots = self.current_slots + (self.current_slots + saved) % 2;
        let frame_size = slots * WORD as usize;

        let mut prologue = vec![
            AsmItem::instr(X86Instr::Push(PhysReg::FRAME_PTR.into())),
            AsmItem::instr(X86Instr::mov(PhysReg::FRAME_PTR, PhysReg::STACK_PTR)),
        ];
        if frame_size > 0 {
            prologue.push(AsmItem::Instr {
                instr: X86Instr::alu(AluOp::Sub, PhysReg::STACK_PTR, Operand::Imm(frame_size as i64)),
                comment: Some(format!("{} spill slot(s)", self.current_slots)),
            });
        }
        for &reg in &used_callee {
            prologue.push(AsmItem::Instr { instr: X86Instr::Push(reg.into()), comment: Some(format!("save {reg}")) });
        }

        let mut epilogue = vec![AsmItem::Label(EPILOGUE_LABEL.to_string())];
        if saved > 0 {
            let below = -((slots + saved) as i64) * WORD;
            epilogue.push(AsmItem::instr(X86Instr::Lea {
                dst: PhysReg::STACK_PTR,
                mem: Mem::base(PhysReg::FRAME_PTR, below),
            }));
            for &reg in used_callee.iter().rev() {
                epilogue.push(AsmItem::Instr { instr: X86Instr::Pop(reg), comment: Some(format!("restore {reg}")) });
            }
        }
        if frame_size > 0 {
            epilogue.push(AsmItem::instr(X86Instr::mov(PhysReg::STACK_PTR, PhysReg::FRAME_PTR)));
        }
        epilogue.push(AsmItem::instr(X86Instr::Pop(PhysReg::FRAME_PTR)));
        epilogue.push(AsmItem::instr(X86Instr::Ret));

        self.out.push(AsmItem::Function {
            name,
            prologue,
            body,
            epilogue,
            frame_size,
            used_callee,
            is_leaf,
        });
    }

    // ── Final output ────────────────────────────────────────────────────

    pub fn finish_codegen(mut self) -> NasmAsm {
        let mut items = vec![AsmItem::Directive("default rel".to_string())];
        if let Some(entry) = &self.entry_label {
            items.push(AsmItem::Directive(format!("global {entry}")));
        }
        for sym in &self.externs {
            items.push(AsmItem::Directive(format!("extern {sym}")));
        }
        items.push(AsmItem::Blank);
        items.push(AsmItem::Directive("section .text".to_string()));
        for f in std::mem::take(&mut self.out) {
            items.push(AsmItem::Blank);
            items.push(f);
        }
        if !self.data.is_empty() {
            items.push(AsmItem::Blank);
            items.push(AsmItem::Directive("section .data".to_string()));
            items.append(&mut self.data);
        }

        super::optimize::optimize(&mut items);

        let mut lines = Vec::new();
        Self::flatten_items(&items, &mut lines);
        NasmAsm { lines }
    }

    fn flatten_items(items: &[AsmItem], lines: &mut Vec<String>) {
        for item in items {
            match item {
                AsmItem::Label(name) => lines.push(format!("{name}:")),
                AsmItem::Instr { instr, comment } => {
                    let base = instr.to_string();
                    let line = match comment {
                        Some(c) => {
                            const COMMENT_COL: usize = 36;
                            let pad = COMMENT_COL.saturating_sub(base.len()).max(2);
                            format!("{base}{}; {c}", " ".repeat(pad))
                        }
                        None => base,
                    };
                    lines.push(line);
                }
                AsmItem::Function { name, prologue, body, epilogue, .. } => {
                    lines.push(format!("{name}:"));
                    Self::flatten_items(prologue, lines);
                    Self::flatten_items(body, lines);
                    Self::flatten_items(epilogue, lines);
                }
                AsmItem::Data { label: Some(l), value } => lines.push(format!("{l}: {value}")),
                AsmItem::Data { label: None, value } => lines.push(format!("    {value}")),
                AsmItem::Directive(d) => lines.push(d.clone()),
                AsmItem::Blank => lines.push(String::new()),
            }
        }
    }
}
