use crate::ast::Location;
use crate::ir::*;
use crate::scope::{ClassEntity, GlobalScope};
use crate::{CompileError, SymbolKind};
use std::collections::HashMap;

/// Module-level lowering state: the IR under construction and the symbol
/// maps every function body resolves against.
pub struct Gen<'a> {
    pub(crate) scope: &'a GlobalScope,
    pub(crate) root: IrRoot,
    /// Keyed by function name, or `Class.method` for methods.
    pub(crate) funcs: HashMap<String, FuncId>,
    pub(crate) globals: HashMap<String, StaticId>,
}

impl<'a> Gen<'a> {
    pub fn new(scope: &'a GlobalScope) -> Self {
        Self { scope, root: IrRoot::new(), funcs: HashMap::new(), globals: HashMap::new() }
    }

    pub fn finish(self) -> IrRoot {
        self.root
    }

    pub(crate) fn func_id(&self, key: &str, location: Location) -> Result<FuncId, CompileError> {
        self.funcs.get(key).copied().ok_or_else(|| CompileError::Unresolved {
            kind: SymbolKind::Function,
            name: key.to_string(),
            location,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTargets {
    pub break_bb: BlockId,
    pub continue_bb: BlockId,
}

/// Where an assignable expression lives.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LValue {
    Local(VReg),
    Mem(Address),
}

/// Per-function lowering state.
pub struct FnGen<'g, 'a> {
    pub(crate) g: &'g mut Gen<'a>,
    pub(crate) func: IrFunction,
    pub(crate) current: BlockId,
    pub(crate) scopes: Vec<HashMap<String, VReg>>,
    pub(crate) loops: Vec<LoopTargets>,
    pub(crate) class: Option<&'a ClassEntity>,
    pub(crate) this: Option<VReg>,
}

impl<'g, 'a> FnGen<'g, 'a> {
    pub fn new(g: &'g mut Gen<'a>, func: IrFunction, class: Option<&'a ClassEntity>) -> Self {
        let current = func.entry;
        Self { g, func, current, scopes: vec![HashMap::new()], loops: Vec::new(), class, this: None }
    }

    /// Close the last block (falling off the end returns) and hand back the function.
    pub fn finish(mut self, returns_value: bool) -> IrFunction {
        if !self.func.block(self.current).is_terminated() {
            let value = returns_value.then_some(RegValue::Imm(0));
            self.emit(Instr::Return { value });
        }
        self.func
    }

    // ── Emission ─────────────────────────────────────────────────────────

    pub(crate) fn emit(&mut self, instr: Instr) {
        let block = self.func.block_mut(self.current);
        debug_assert!(!block.is_terminated(), "emitting into a terminated block");
        block.instrs.push(instr);
    }

    pub(crate) fn new_vreg(&mut self, hint: &str) -> VReg {
        self.func.new_vreg(hint)
    }

    pub(crate) fn new_block(&mut self, name: &str) -> BlockId {
        self.func.new_block(name)
    }

    pub(crate) fn switch_to(&mut self, bb: BlockId) {
        self.current = bb;
    }

    pub(crate) fn jump(&mut self, target: BlockId) {
        self.emit(Instr::Jump { target });
    }

    /// Code after `return`/`break`/`continue` still gets built, into a block
    /// nothing jumps to.
    pub(crate) fn start_unreachable(&mut self) {
        let bb = self.new_block("dead");
        self.switch_to(bb);
    }

    /// Copy `v` into a fresh register unless it already is one.
    pub(crate) fn into_vreg(&mut self, v: RegValue, hint: &str) -> VReg {
        match v {
            RegValue::Vreg(r) => r,
            other => {
                let r = self.new_vreg(hint);
                self.emit(Instr::Move { dst: r.into(), src: other });
                r
            }
        }
    }

    // ── Scopes ───────────────────────────────────────────────────────────

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare_local(&mut self, name: &str, v: VReg) {
        if let Some(top) = self.scopes.last_mut() {
            top.insert(name.to_string(), v);
        }
    }

    /// Whether `v` is the register of a declared local or parameter.
    pub(crate) fn is_local(&self, v: VReg) -> bool {
        self.scopes.iter().any(|s| s.values().any(|r| *r == v))
    }

    /// Locals first (innermost scope outward), then fields of the enclosing
    /// class through `this`, then globals.
    pub(crate) fn resolve(&self, name: &str, location: Location) -> Result<LValue, CompileError> {
        if let Some(v) = self.scopes.iter().rev().find_map(|s| s.get(name)) {
            return Ok(LValue::Local(*v));
        }
        if let (Some(class), Some(this)) = (self.class, self.this) {
            if let Some(offset) = class.field_offset(name) {
                return Ok(LValue::Mem(Address::Base { base: this.into(), offset }));
            }
        }
        if let Some(id) = self.g.globals.get(name) {
            return Ok(LValue::Mem(Address::Static(*id)));
        }
        Err(CompileError::Unresolved { kind: SymbolKind::Variable, name: name.to_string(), location })
    }

    pub(crate) fn read_lvalue(&mut self, lv: LValue, hint: &str) -> RegValue {
        match lv {
            LValue::Local(v) => v.into(),
            LValue::Mem(addr) => {
                let dst = self.new_vreg(hint);
                self.emit(Instr::Load { dst: dst.into(), addr });
                dst.into()
            }
        }
    }

    pub(crate) fn write_lvalue(&mut self, lv: LValue, value: RegValue) {
        match lv {
            LValue::Local(v) => self.emit(Instr::Move { dst: v.into(), src: value }),
            LValue::Mem(addr) => self.emit(Instr::Store { addr, src: value }),
        }
    }
}
