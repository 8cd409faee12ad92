// Block-structured, register-machine IR.
//
// Functions own their blocks in a flat vector addressed by `BlockId`; the
// emission order lives separately in `layout`. Instructions are addressed by
// (block, index) pairs, so passes rewrite the graph in place without holding
// references into it.

use crate::backend::abi::PhysReg;
use crate::CompileError;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Virtual register, numbered per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticId(pub usize);

/// Stack slot in the current frame, created by the spiller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

// ============================================================================
// Operands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegValue {
    Vreg(VReg),
    /// Only after the preprocessor pins calling-convention registers, and
    /// everywhere once allocation has run.
    Phys(PhysReg),
    Imm(i64),
    /// Address of a static symbol.
    Static(StaticId),
}

/// Register identity used as the key of dataflow sets and the interference graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    Virt(VReg),
    Phys(PhysReg),
}

impl RegValue {
    pub fn reg(&self) -> Option<Reg> {
        match self {
            RegValue::Vreg(v) => Some(Reg::Virt(*v)),
            RegValue::Phys(p) => Some(Reg::Phys(*p)),
            _ => None,
        }
    }

    pub fn vreg(&self) -> Option<VReg> {
        match self {
            RegValue::Vreg(v) => Some(*v),
            _ => None,
        }
    }

    pub fn imm(&self) -> Option<i64> {
        match self {
            RegValue::Imm(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_reg(&self) -> bool {
        self.reg().is_some()
    }
}

impl From<VReg> for RegValue {
    fn from(v: VReg) -> Self {
        RegValue::Vreg(v)
    }
}

impl From<PhysReg> for RegValue {
    fn from(p: PhysReg) -> Self {
        RegValue::Phys(p)
    }
}

impl From<Reg> for RegValue {
    fn from(r: Reg) -> Self {
        match r {
            Reg::Virt(v) => RegValue::Vreg(v),
            Reg::Phys(p) => RegValue::Phys(p),
        }
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::Vreg(v) => write!(f, "{v}"),
            RegValue::Phys(p) => write!(f, "${p}"),
            RegValue::Imm(i) => write!(f, "{i}"),
            RegValue::Static(s) => write!(f, "@static{}", s.0),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RegValue::from(*self).fmt(f)
    }
}

/// Memory operand of a load or store. Every access moves one 8-byte word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    Base { base: RegValue, offset: i64 },
    Static(StaticId),
    Slot(SlotId),
    /// The `k`-th stack-passed argument of the current function.
    Incoming(usize),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Base { base, offset: 0 } => write!(f, "[{base}]"),
            Address::Base { base, offset } if *offset < 0 => write!(f, "[{base}-{}]", -offset),
            Address::Base { base, offset } => write!(f, "[{base}+{offset}]"),
            Address::Static(s) => write!(f, "[@static{}]", s.0),
            Address::Slot(s) => write!(f, "[slot{}]", s.0),
            Address::Incoming(k) => write!(f, "[arg{k}]"),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp { Add, Sub, Mul, Div, Mod, Shl, Shr, And, Or, Xor }

impl BinOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor)
    }

    /// Evaluate with 64-bit two's-complement semantics; `None` on division by zero.
    pub fn eval(self, l: i64, r: i64) -> Option<i64> {
        Some(match self {
            BinOp::Add => l.wrapping_add(r),
            BinOp::Sub => l.wrapping_sub(r),
            BinOp::Mul => l.wrapping_mul(r),
            BinOp::Div if r == 0 => return None,
            BinOp::Div => l.wrapping_div(r),
            BinOp::Mod if r == 0 => return None,
            BinOp::Mod => l.wrapping_rem(r),
            BinOp::Shl => l.wrapping_shl((r & 63) as u32),
            BinOp::Shr => l.wrapping_shr((r & 63) as u32),
            BinOp::And => l & r,
            BinOp::Or => l | r,
            BinOp::Xor => l ^ r,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp { Neg, Not }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp { Eq, Ne, Lt, Le, Gt, Ge }

impl CmpOp {
    /// Condition that holds exactly when `self` does not.
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// Condition to use once the operands are swapped.
    pub fn mirror(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    pub fn eval(self, l: i64, r: i64) -> bool {
        match self {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

// ============================================================================
// Calls
// ============================================================================

/// Runtime entry points the generated code calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Malloc,
    Print,
    Println,
    PrintInt,
    PrintlnInt,
    GetString,
    GetInt,
    ToString,
    StringConcat,
    StringCompare,
    StringSubstring,
    StringParseInt,
    StringOrd,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::Malloc, Builtin::Print, Builtin::Println, Builtin::PrintInt,
        Builtin::PrintlnInt, Builtin::GetString, Builtin::GetInt, Builtin::ToString,
        Builtin::StringConcat, Builtin::StringCompare, Builtin::StringSubstring,
        Builtin::StringParseInt, Builtin::StringOrd,
    ];

    /// Assembly symbol of the runtime routine.
    pub fn symbol(self) -> &'static str {
        match self {
            Builtin::Malloc => "malloc",
            Builtin::Print => "__builtin_print",
            Builtin::Println => "__builtin_println",
            Builtin::PrintInt => "__builtin_printInt",
            Builtin::PrintlnInt => "__builtin_printlnInt",
            Builtin::GetString => "__builtin_getString",
            Builtin::GetInt => "__builtin_getInt",
            Builtin::ToString => "__builtin_toString",
            Builtin::StringConcat => "__builtin_string_concat",
            Builtin::StringCompare => "__builtin_string_compare",
            Builtin::StringSubstring => "__builtin_string_substring",
            Builtin::StringParseInt => "__builtin_string_parseInt",
            Builtin::StringOrd => "__builtin_string_ord",
        }
    }

    /// String methods callable as `s.method(..)`; `length` is a plain load.
    pub fn string_method(name: &str) -> Option<Self> {
        match name {
            "substring" => Some(Builtin::StringSubstring),
            "parseInt" => Some(Builtin::StringParseInt),
            "ord" => Some(Builtin::StringOrd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callee {
    Function(FuncId),
    Builtin(Builtin),
}

// ============================================================================
// Instructions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `dst = lhs op rhs`
    Binary { dst: RegValue, op: BinOp, lhs: RegValue, rhs: RegValue },
    /// `dst = op src`
    Unary { dst: RegValue, op: UnOp, src: RegValue },
    /// `dst = (lhs cond rhs) ? 1 : 0`
    Compare { dst: RegValue, cond: CmpOp, lhs: RegValue, rhs: RegValue },
    /// `dst = src`
    Move { dst: RegValue, src: RegValue },
    /// `dst = *addr`
    Load { dst: RegValue, addr: Address },
    /// `*addr = src`
    Store { addr: Address, src: RegValue },
    /// Call with already-evaluated arguments. After preprocessing `args` holds
    /// the argument registers and `stack_args` the number of words pushed
    /// before the call (padding included).
    Call { dst: Option<RegValue>, callee: Callee, args: Vec<RegValue>, stack_args: usize },
    /// Push one outgoing stack argument.
    Push { src: RegValue },
    Jump { target: BlockId },
    /// `if lhs cond rhs goto then_bb else goto else_bb`
    Branch { cond: CmpOp, lhs: RegValue, rhs: RegValue, then_bb: BlockId, else_bb: BlockId },
    Return { value: Option<RegValue> },
}

impl Instr {
    pub fn call(dst: Option<RegValue>, callee: Callee, args: Vec<RegValue>) -> Self {
        Instr::Call { dst, callee, args, stack_args: 0 }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Jump { .. } | Instr::Branch { .. } | Instr::Return { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Instr::Call { .. })
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instr::Jump { target } => vec![*target],
            Instr::Branch { then_bb, else_bb, .. } if then_bb == else_bb => vec![*then_bb],
            Instr::Branch { then_bb, else_bb, .. } => vec![*then_bb, *else_bb],
            _ => Vec::new(),
        }
    }

    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Instr::Jump { target } => *target = f(*target),
            Instr::Branch { then_bb, else_bb, .. } => {
                *then_bb = f(*then_bb);
                *else_bb = f(*else_bb);
            }
            _ => {}
        }
    }

    /// Destination operand written by this instruction, if any.
    pub fn dst(&self) -> Option<&RegValue> {
        match self {
            Instr::Binary { dst, .. }
            | Instr::Unary { dst, .. }
            | Instr::Compare { dst, .. }
            | Instr::Move { dst, .. }
            | Instr::Load { dst, .. } => Some(dst),
            Instr::Call { dst, .. } => dst.as_ref(),
            _ => None,
        }
    }

    /// Visit every register-valued operand, destinations and address bases included.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut RegValue)) {
        fn addr(a: &mut Address, f: &mut impl FnMut(&mut RegValue)) {
            if let Address::Base { base, .. } = a {
                f(base);
            }
        }
        match self {
            Instr::Binary { dst, lhs, rhs, .. } | Instr::Compare { dst, lhs, rhs, .. } => {
                f(dst);
                f(lhs);
                f(rhs);
            }
            Instr::Unary { dst, src, .. } | Instr::Move { dst, src } => {
                f(dst);
                f(src);
            }
            Instr::Load { dst, addr: a } => {
                f(dst);
                addr(a, &mut f);
            }
            Instr::Store { addr: a, src } => {
                addr(a, &mut f);
                f(src);
            }
            Instr::Call { dst, args, .. } => {
                if let Some(d) = dst {
                    f(d);
                }
                args.iter_mut().for_each(&mut f);
            }
            Instr::Push { src } => f(src),
            Instr::Branch { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instr::Return { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            Instr::Jump { .. } => {}
        }
    }

    /// Operands read by this instruction, address bases included.
    pub fn sources(&self) -> Vec<RegValue> {
        let base = |a: &Address| match a {
            Address::Base { base, .. } => Some(*base),
            _ => None,
        };
        match self {
            Instr::Binary { lhs, rhs, .. } | Instr::Compare { lhs, rhs, .. } | Instr::Branch { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instr::Unary { src, .. } | Instr::Move { src, .. } | Instr::Push { src } => vec![*src],
            Instr::Load { addr, .. } => base(addr).into_iter().collect(),
            Instr::Store { addr, src } => base(addr).into_iter().chain(Some(*src)).collect(),
            Instr::Call { args, .. } => args.clone(),
            Instr::Return { value } => value.iter().copied().collect(),
            Instr::Jump { .. } => Vec::new(),
        }
    }

    /// Visit every static symbol reference, whether as a value or a memory operand.
    pub fn for_each_static_mut(&mut self, mut f: impl FnMut(&mut StaticId)) {
        match self {
            Instr::Load { addr: Address::Static(s), .. } | Instr::Store { addr: Address::Static(s), .. } => f(s),
            _ => {}
        }
        self.for_each_operand_mut(|v| {
            if let RegValue::Static(s) = v {
                f(s);
            }
        });
    }
}

fn join_values(values: &[RegValue]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Binary { dst, op, lhs, rhs } => write!(f, "{dst} = {} {lhs}, {rhs}", op.mnemonic()),
            Instr::Unary { dst, op: UnOp::Neg, src } => write!(f, "{dst} = neg {src}"),
            Instr::Unary { dst, op: UnOp::Not, src } => write!(f, "{dst} = not {src}"),
            Instr::Compare { dst, cond, lhs, rhs } => {
                write!(f, "{dst} = cmp {} {lhs}, {rhs}", cond.mnemonic())
            }
            Instr::Move { dst, src } => write!(f, "{dst} = {src}"),
            Instr::Load { dst, addr } => write!(f, "{dst} = load {addr}"),
            Instr::Store { addr, src } => write!(f, "store {addr}, {src}"),
            Instr::Call { dst, callee, args, .. } => {
                let target = match callee {
                    Callee::Function(id) => format!("fn{}", id.0),
                    Callee::Builtin(b) => b.symbol().to_string(),
                };
                match dst {
                    Some(d) => write!(f, "{d} = call {target}({})", join_values(args)),
                    None => write!(f, "call {target}({})", join_values(args)),
                }
            }
            Instr::Push { src } => write!(f, "push {src}"),
            Instr::Jump { target } => write!(f, "jump {target}"),
            Instr::Branch { cond, lhs, rhs, then_bb, else_bb } => {
                write!(f, "br {} {lhs}, {rhs} ? {then_bb} : {else_bb}", cond.mnemonic())
            }
            Instr::Return { value: Some(v) } => write!(f, "ret {v}"),
            Instr::Return { value: None } => write!(f, "ret"),
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Readable hint (`while_cond`, `if_end`, ...); not required to be unique.
    pub name: String,
    pub instrs: Vec<Instr>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct IrFunction {
    /// Source-level name (`Class.method` for methods).
    pub name: String,
    /// Assembly symbol.
    pub label: String,
    pub params: Vec<VReg>,
    pub entry: BlockId,
    pub blocks: Vec<BasicBlock>,
    /// Emission order of the live blocks, entry first.
    pub layout: Vec<BlockId>,
    pub slot_count: usize,
    vreg_hints: Vec<String>,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        let mut f = Self {
            name: name.into(),
            label: label.into(),
            params: Vec::new(),
            entry: BlockId(0),
            blocks: Vec::new(),
            layout: Vec::new(),
            slot_count: 0,
            vreg_hints: Vec::new(),
        };
        f.entry = f.new_block("entry");
        f
    }

    pub fn new_vreg(&mut self, hint: &str) -> VReg {
        let v = VReg(self.vreg_hints.len() as u32);
        self.vreg_hints.push(hint.to_string());
        v
    }

    pub fn add_param(&mut self, hint: &str) -> VReg {
        let v = self.new_vreg(hint);
        self.params.push(v);
        v
    }

    pub fn vreg_count(&self) -> usize {
        self.vreg_hints.len()
    }

    pub fn vreg_hint(&self, v: VReg) -> &str {
        self.vreg_hints.get(v.0 as usize).map(String::as_str).unwrap_or("")
    }

    /// Append a new empty block to both the block table and the layout.
    pub fn new_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock { name: name.to_string(), ..Default::default() });
        self.layout.push(id);
        id
    }

    pub fn new_slot(&mut self) -> SlotId {
        let s = SlotId(self.slot_count);
        self.slot_count += 1;
        s
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    /// Live instructions, in layout order.
    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.layout.iter().flat_map(move |b| self.blocks[b.0].instrs.iter())
    }

    pub fn instr_count(&self) -> usize {
        self.layout.iter().map(|b| self.blocks[b.0].instrs.len()).sum()
    }

    pub fn has_calls(&self) -> bool {
        self.instrs().any(Instr::is_call)
    }

    /// Rebuild successor/predecessor edges from the terminators and drop
    /// blocks unreachable from the entry from the layout.
    ///
    /// A block without a terminator falls through to the next block in the
    /// layout; the fallthrough is made explicit with a `Jump`.
    pub fn compute_cfg(&mut self) -> Result<(), CompileError> {
        for i in 0..self.layout.len() {
            let id = self.layout[i];
            if self.blocks[id.0].is_terminated() {
                continue;
            }
            match self.layout.get(i + 1) {
                Some(&next) => self.blocks[id.0].instrs.push(Instr::Jump { target: next }),
                None => {
                    return Err(CompileError::ContractViolation(format!(
                        "block {id} of `{}` falls off the end of the function",
                        self.name
                    )))
                }
            }
        }

        for block in &mut self.blocks {
            block.succs.clear();
            block.preds.clear();
        }

        let mut reachable = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        reachable[self.entry.0] = true;
        while let Some(id) = stack.pop() {
            let succs = self.blocks[id.0].terminator().map(Instr::successors).unwrap_or_default();
            for s in &succs {
                if s.0 >= self.blocks.len() {
                    return Err(CompileError::ContractViolation(format!(
                        "block {id} of `{}` jumps to missing block {s}",
                        self.name
                    )));
                }
                if !reachable[s.0] {
                    reachable[s.0] = true;
                    stack.push(*s);
                }
            }
            self.blocks[id.0].succs = succs;
        }

        self.layout.retain(|b| reachable[b.0]);
        if self.layout.first() != Some(&self.entry) {
            self.layout.retain(|b| *b != self.entry);
            self.layout.insert(0, self.entry);
        }
        for i in 0..self.layout.len() {
            let id = self.layout[i];
            for s in self.blocks[id.0].succs.clone() {
                self.blocks[s.0].preds.push(id);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticInit {
    /// One zero-initialized word (global variable).
    Word,
    /// String literal: length word, bytes, NUL.
    Str(String),
}

#[derive(Debug, Clone)]
pub struct StaticData {
    pub name: String,
    pub init: StaticInit,
    /// Assembly label, assigned by the static data processor.
    pub label: String,
}

impl StaticData {
    pub fn size(&self) -> usize {
        match &self.init {
            StaticInit::Word => 8,
            StaticInit::Str(s) => 8 + s.len() + 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IrRoot {
    pub functions: Vec<IrFunction>,
    pub statics: Vec<StaticData>,
    /// Program entry point (the synthesized initializer that calls `main`).
    pub entry: Option<FuncId>,
}

impl IrRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, f: IrFunction) -> FuncId {
        self.functions.push(f);
        FuncId(self.functions.len() - 1)
    }

    pub fn add_static(&mut self, name: &str, init: StaticInit) -> StaticId {
        self.statics.push(StaticData { name: name.to_string(), init, label: String::new() });
        StaticId(self.statics.len() - 1)
    }

    pub fn function(&self, id: FuncId) -> &IrFunction {
        &self.functions[id.0]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name).map(FuncId)
    }

    /// Human-readable dump of the whole unit.
    pub fn to_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (i, s) in self.statics.iter().enumerate() {
            let init = match &s.init {
                StaticInit::Word => "word".to_string(),
                StaticInit::Str(v) => format!("str {v:?}"),
            };
            let label = if s.label.is_empty() { &s.name } else { &s.label };
            out.push(format!("@static{i} {label} = {init}"));
        }
        for f in &self.functions {
            if !out.is_empty() {
                out.push(String::new());
            }
            let params = f.params.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ");
            out.push(format!("func {}({params}) [{}]", f.name, f.label));
            for &b in &f.layout {
                let block = f.block(b);
                out.push(format!("{b}.{}:", block.name));
                for instr in &block.instrs {
                    let line = match instr {
                        Instr::Call { callee: Callee::Function(id), .. } => {
                            let callee = self.functions.get(id.0).map(|c| c.name.as_str()).unwrap_or("?");
                            instr.to_string().replacen(&format!("fn{}", id.0), callee, 1)
                        }
                        _ => instr.to_string(),
                    };
                    out.push(format!("  {line}"));
                }
            }
        }
        out
    }
}

impl fmt::Display for IrRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.to_lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
