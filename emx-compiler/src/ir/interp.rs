//! Reference interpreter for the IR.
//!
//! Runs the IR at any stage of the pipeline: straight from the builder and
//! the IR-level passes, or after preprocessing and register allocation, when
//! operands are physical registers, spill slots and pushed arguments. The
//! runtime conventions are the ones the generated assembly assumes:
//! byte-addressed memory, a bump allocator standing in for `malloc`,
//! length-prefixed NUL-terminated strings and arrays whose first word is
//! their length.
//!
//! Physical registers form one file shared by every frame, as on the
//! machine. A call leaves the caller-saved registers undefined (apart from
//! the result in rax) and the callee-saved ones as they were, so a value the
//! allocator wrongly keeps in a clobbered register shows up as a read of an
//! undefined register.

use crate::backend::abi::PhysReg;
use crate::ir::*;
use std::collections::VecDeque;
use thiserror::Error;

/// Maximum nesting of IR calls before execution is abandoned.
pub const MAX_CALL_DEPTH: usize = 1000;
/// Default number of instructions a run may execute.
pub const DEFAULT_FUEL: u64 = 50_000_000;

const PHYS_COUNT: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("read of undefined register {reg} in `{function}`")]
    UndefinedRegister { reg: RegValue, function: String },
    #[error("read of uninitialized slot {slot} in `{function}`")]
    UndefinedSlot { slot: usize, function: String },
    #[error("memory access out of bounds at address {0}")]
    OutOfBounds(i64),
    #[error("division by zero")]
    DivisionByZero,
    #[error("call depth limit ({MAX_CALL_DEPTH}) exceeded")]
    StackOverflow,
    #[error("instruction budget exhausted")]
    OutOfFuel,
    #[error("cannot interpret `{0}`")]
    Unsupported(String),
    #[error("program has no entry function")]
    NoEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Value returned by the function that was run.
    pub value: i64,
    /// Everything the program printed.
    pub output: String,
}

pub struct Interpreter<'a> {
    root: &'a IrRoot,
    memory: Vec<u8>,
    static_addr: Vec<i64>,
    phys: [Option<i64>; PHYS_COUNT],
    input: VecDeque<String>,
    output: String,
    fuel: u64,
    depth: usize,
}

/// Per-call state of one function.
struct Frame<'f> {
    func: &'f IrFunction,
    regs: Vec<Option<i64>>,
    slots: Vec<Option<i64>>,
    /// Stack-passed arguments, `Incoming(0)` first.
    incoming: Vec<i64>,
    /// Words pushed for the next call, in push order.
    pushed: Vec<i64>,
}

impl<'a> Interpreter<'a> {
    pub fn new(root: &'a IrRoot) -> Self {
        let mut it = Self {
            root,
            // Word 0 stays unmapped so null dereferences fault.
            memory: vec![0; 8],
            static_addr: Vec::with_capacity(root.statics.len()),
            phys: [None; PHYS_COUNT],
            input: VecDeque::new(),
            output: String::new(),
            fuel: DEFAULT_FUEL,
            depth: 0,
        };
        for s in &root.statics {
            let addr = match &s.init {
                StaticInit::Word => it.alloc(8),
                StaticInit::Str(text) => it.alloc_string(text.as_bytes()),
            };
            it.static_addr.push(addr);
        }
        it
    }

    /// Whitespace-separated tokens served to `getInt`/`getString`.
    pub fn with_input(mut self, input: &str) -> Self {
        self.input = input.split_whitespace().map(str::to_string).collect();
        self
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Run the program entry point.
    pub fn run(self) -> Result<ExecResult, InterpError> {
        let entry = self.root.entry.ok_or(InterpError::NoEntry)?;
        self.call(entry, &[])
    }

    /// Run a single function with the given arguments.
    pub fn call(mut self, f: FuncId, args: &[i64]) -> Result<ExecResult, InterpError> {
        let value = self.exec(f, args)?;
        Ok(ExecResult { value, output: self.output })
    }

    fn exec(&mut self, fid: FuncId, args: &[i64]) -> Result<i64, InterpError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(InterpError::StackOverflow);
        }
        let saved = PhysReg::CALLEE_SAVED.map(|r| self.phys[r as usize]);
        self.depth += 1;
        let result = self.exec_body(fid, args);
        self.depth -= 1;
        for (r, v) in PhysReg::CALLEE_SAVED.iter().zip(saved) {
            self.phys[*r as usize] = v;
        }
        result
    }

    fn exec_body(&mut self, fid: FuncId, args: &[i64]) -> Result<i64, InterpError> {
        let root = self.root;
        let func = root.function(fid);
        let mut frame = Frame {
            func,
            regs: vec![None; func.vreg_count()],
            slots: vec![None; func.slot_count],
            incoming: args.iter().skip(PhysReg::PARAM_REGS.len()).copied().collect(),
            pushed: Vec::new(),
        };
        for (i, p) in func.params.iter().enumerate() {
            frame.regs[p.0 as usize] = Some(args.get(i).copied().unwrap_or(0));
        }
        for (r, v) in PhysReg::PARAM_REGS.iter().zip(args) {
            self.phys[*r as usize] = Some(*v);
        }

        let mut bb = func.entry;
        loop {
            let mut next = None;
            for instr in &func.block(bb).instrs {
                if self.fuel == 0 {
                    return Err(InterpError::OutOfFuel);
                }
                self.fuel -= 1;

                match instr {
                    Instr::Binary { dst, op: op @ (BinOp::Div | BinOp::Mod), lhs, rhs } => {
                        let (l, r) = (self.value(&frame, lhs)?, self.value(&frame, rhs)?);
                        let quot = BinOp::Div.eval(l, r).ok_or(InterpError::DivisionByZero)?;
                        let rem = BinOp::Mod.eval(l, r).ok_or(InterpError::DivisionByZero)?;
                        if let RegValue::Phys(_) = dst {
                            // idiv writes both halves whichever one is wanted
                            self.phys[PhysReg::Rax as usize] = Some(quot);
                            self.phys[PhysReg::Rdx as usize] = Some(rem);
                        }
                        self.set(&mut frame, dst, if *op == BinOp::Div { quot } else { rem })?;
                    }
                    Instr::Binary { dst, op, lhs, rhs } => {
                        let (l, r) = (self.value(&frame, lhs)?, self.value(&frame, rhs)?);
                        let v = op.eval(l, r).ok_or(InterpError::DivisionByZero)?;
                        self.set(&mut frame, dst, v)?;
                    }
                    Instr::Unary { dst, op, src } => {
                        let s = self.value(&frame, src)?;
                        let v = match op {
                            UnOp::Neg => s.wrapping_neg(),
                            UnOp::Not => !s,
                        };
                        self.set(&mut frame, dst, v)?;
                    }
                    Instr::Compare { dst, cond, lhs, rhs } => {
                        let (l, r) = (self.value(&frame, lhs)?, self.value(&frame, rhs)?);
                        self.set(&mut frame, dst, cond.eval(l, r) as i64)?;
                    }
                    Instr::Move { dst, src } => {
                        let v = self.value(&frame, src)?;
                        self.set(&mut frame, dst, v)?;
                    }
                    Instr::Load { dst, addr } => {
                        let v = self.load(&frame, addr)?;
                        self.set(&mut frame, dst, v)?;
                    }
                    Instr::Store { addr, src } => {
                        let v = self.value(&frame, src)?;
                        self.store(&mut frame, addr, v)?;
                    }
                    Instr::Push { src } => {
                        let v = self.value(&frame, src)?;
                        frame.pushed.push(v);
                    }
                    Instr::Call { dst, callee, args, .. } => {
                        let mut vals = args.iter().map(|a| self.value(&frame, a)).collect::<Result<Vec<_>, _>>()?;
                        // The last word pushed is the first stack argument.
                        vals.extend(frame.pushed.drain(..).rev());
                        let v = match callee {
                            Callee::Function(id) => self.exec(*id, &vals)?,
                            Callee::Builtin(b) => self.builtin(*b, &vals)?,
                        };
                        for r in PhysReg::CALLER_SAVED {
                            self.phys[r as usize] = None;
                        }
                        self.phys[PhysReg::RETURN_REG as usize] = Some(v);
                        if let Some(d) = dst {
                            self.set(&mut frame, d, v)?;
                        }
                    }
                    Instr::Jump { target } => {
                        next = Some(*target);
                        break;
                    }
                    Instr::Branch { cond, lhs, rhs, then_bb, else_bb } => {
                        let (l, r) = (self.value(&frame, lhs)?, self.value(&frame, rhs)?);
                        next = Some(if cond.eval(l, r) { *then_bb } else { *else_bb });
                        break;
                    }
                    Instr::Return { value } => {
                        return match value {
                            Some(v) => self.value(&frame, v),
                            None => Ok(0),
                        };
                    }
                }
            }
            bb = next.ok_or_else(|| InterpError::Unsupported(format!("block {bb} has no terminator")))?;
        }
    }

    fn value(&self, frame: &Frame, v: &RegValue) -> Result<i64, InterpError> {
        let undefined = || InterpError::UndefinedRegister { reg: *v, function: frame.func.name.clone() };
        match v {
            RegValue::Vreg(r) => frame.regs.get(r.0 as usize).copied().flatten().ok_or_else(undefined),
            RegValue::Phys(p) => self.phys[*p as usize].ok_or_else(undefined),
            RegValue::Imm(i) => Ok(*i),
            RegValue::Static(s) => self.static_address(*s),
        }
    }

    fn set(&mut self, frame: &mut Frame, dst: &RegValue, v: i64) -> Result<(), InterpError> {
        match dst {
            RegValue::Vreg(r) => {
                let slot = frame
                    .regs
                    .get_mut(r.0 as usize)
                    .ok_or_else(|| InterpError::Unsupported(format!("register {r} out of range")))?;
                *slot = Some(v);
                Ok(())
            }
            RegValue::Phys(p) => {
                self.phys[*p as usize] = Some(v);
                Ok(())
            }
            other => Err(InterpError::Unsupported(format!("write to {other}"))),
        }
    }

    fn load(&self, frame: &Frame, addr: &Address) -> Result<i64, InterpError> {
        match addr {
            Address::Slot(s) => frame
                .slots
                .get(s.0)
                .copied()
                .flatten()
                .ok_or_else(|| InterpError::UndefinedSlot { slot: s.0, function: frame.func.name.clone() }),
            Address::Incoming(k) => frame
                .incoming
                .get(*k)
                .copied()
                .ok_or_else(|| InterpError::Unsupported(format!("missing stack argument {k}"))),
            other => {
                let a = self.address(frame, other)?;
                self.read_word(a)
            }
        }
    }

    fn store(&mut self, frame: &mut Frame, addr: &Address, v: i64) -> Result<(), InterpError> {
        match addr {
            Address::Slot(s) => {
                let slot = frame
                    .slots
                    .get_mut(s.0)
                    .ok_or_else(|| InterpError::Unsupported(format!("slot {} out of range", s.0)))?;
                *slot = Some(v);
                Ok(())
            }
            other => {
                let a = self.address(frame, other)?;
                self.write_word(a, v)
            }
        }
    }

    fn address(&self, frame: &Frame, addr: &Address) -> Result<i64, InterpError> {
        match addr {
            Address::Base { base, offset } => Ok(self.value(frame, base)?.wrapping_add(*offset)),
            Address::Static(s) => self.static_address(*s),
            other => Err(InterpError::Unsupported(other.to_string())),
        }
    }

    fn static_address(&self, s: StaticId) -> Result<i64, InterpError> {
        self.static_addr.get(s.0).copied().ok_or_else(|| InterpError::Unsupported(format!("static {}", s.0)))
    }

    // ── Memory ───────────────────────────────────────────────────────────

    fn alloc(&mut self, bytes: usize) -> i64 {
        let addr = (self.memory.len() + 7) & !7;
        self.memory.resize(addr + bytes.max(8), 0);
        addr as i64
    }

    fn alloc_string(&mut self, bytes: &[u8]) -> i64 {
        let addr = self.alloc(8 + bytes.len() + 1);
        let start = addr as usize;
        self.memory[start..start + 8].copy_from_slice(&(bytes.len() as i64).to_le_bytes());
        self.memory[start + 8..start + 8 + bytes.len()].copy_from_slice(bytes);
        addr
    }

    fn range(&self, addr: i64, len: usize) -> Result<std::ops::Range<usize>, InterpError> {
        let start = usize::try_from(addr).map_err(|_| InterpError::OutOfBounds(addr))?;
        if start < 8 || start + len > self.memory.len() {
            return Err(InterpError::OutOfBounds(addr));
        }
        Ok(start..start + len)
    }

    fn read_word(&self, addr: i64) -> Result<i64, InterpError> {
        let r = self.range(addr, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.memory[r]);
        Ok(i64::from_le_bytes(buf))
    }

    fn write_word(&mut self, addr: i64, v: i64) -> Result<(), InterpError> {
        let r = self.range(addr, 8)?;
        self.memory[r].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn read_string(&self, addr: i64) -> Result<Vec<u8>, InterpError> {
        let len = self.read_word(addr)?;
        let len = usize::try_from(len).map_err(|_| InterpError::OutOfBounds(addr))?;
        let r = self.range(addr + 8, len)?;
        Ok(self.memory[r].to_vec())
    }

    // ── Runtime ──────────────────────────────────────────────────────────

    fn builtin(&mut self, b: Builtin, args: &[i64]) -> Result<i64, InterpError> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);
        match b {
            Builtin::Malloc => {
                let n = usize::try_from(arg(0)).map_err(|_| InterpError::OutOfBounds(arg(0)))?;
                Ok(self.alloc(n))
            }
            Builtin::Print | Builtin::Println => {
                let s = self.read_string(arg(0))?;
                self.output.push_str(&String::from_utf8_lossy(&s));
                if b == Builtin::Println {
                    self.output.push('\n');
                }
                Ok(0)
            }
            Builtin::PrintInt => {
                self.output.push_str(&arg(0).to_string());
                Ok(0)
            }
            Builtin::PrintlnInt => {
                self.output.push_str(&format!("{}\n", arg(0)));
                Ok(0)
            }
            Builtin::GetString => {
                let token = self.input.pop_front().unwrap_or_default();
                Ok(self.alloc_string(token.as_bytes()))
            }
            Builtin::GetInt => Ok(self.input.pop_front().and_then(|t| t.parse().ok()).unwrap_or(0)),
            Builtin::ToString => Ok(self.alloc_string(arg(0).to_string().as_bytes())),
            Builtin::StringConcat => {
                let mut s = self.read_string(arg(0))?;
                s.extend(self.read_string(arg(1))?);
                Ok(self.alloc_string(&s))
            }
            Builtin::StringCompare => {
                let (l, r) = (self.read_string(arg(0))?, self.read_string(arg(1))?);
                Ok(l.cmp(&r) as i64)
            }
            Builtin::StringSubstring => {
                let s = self.read_string(arg(0))?;
                let (lo, hi) = (arg(1), arg(2));
                if lo < 0 || hi < lo || hi as usize > s.len() {
                    return Err(InterpError::OutOfBounds(arg(0) + 8 + hi));
                }
                Ok(self.alloc_string(&s[lo as usize..hi as usize]))
            }
            Builtin::StringParseInt => {
                let s = self.read_string(arg(0))?;
                Ok(parse_leading_int(&s))
            }
            Builtin::StringOrd => {
                let s = self.read_string(arg(0))?;
                usize::try_from(arg(1))
                    .ok()
                    .and_then(|i| s.get(i))
                    .map(|c| *c as i64)
                    .ok_or(InterpError::OutOfBounds(arg(0) + 8 + arg(1)))
            }
        }
    }
}

/// Optional sign followed by digits; anything after the digits is ignored.
fn parse_leading_int(s: &[u8]) -> i64 {
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        _ => (false, s),
    };
    let mut v: i64 = 0;
    for c in digits.iter().take_while(|c| c.is_ascii_digit()) {
        v = v.wrapping_mul(10).wrapping_add((c - b'0') as i64);
    }
    if neg {
        -v
    } else {
        v
    }
}
