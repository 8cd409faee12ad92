use super::context::FnGen;
use super::stmt::method_key;
use crate::ast::{Expr, Location, Type};
use crate::ir::*;
use crate::{CompileError, SymbolKind};

impl<'g, 'a> FnGen<'g, 'a> {
    /// `new C`, `new C()` and `new T[n]...`.
    pub(crate) fn lower_new(&mut self, e: &Expr, dims: &[Expr]) -> Result<RegValue, CompileError> {
        if !dims.is_empty() {
            let sizes = self.lower_operands(&dims.iter().collect::<Vec<_>>())?;
            return Ok(self.lower_new_array(&sizes, e.loc)?.into());
        }

        let name = match &e.ty {
            Type::Class(c) => c,
            other => {
                return Err(CompileError::ContractViolation(format!(
                    "`new {other}` without dimensions at {}",
                    e.loc
                )))
            }
        };
        let scope = self.g.scope;
        let class = scope.class(name).ok_or_else(|| CompileError::Unresolved {
            kind: SymbolKind::Class,
            name: name.clone(),
            location: e.loc,
        })?;

        let obj = self.new_vreg("obj");
        self.emit(Instr::call(Some(obj.into()), Callee::Builtin(Builtin::Malloc), vec![RegValue::Imm(class.size())]));
        if class.constructor().is_some() {
            let ctor = self.g.func_id(&method_key(name, name), e.loc)?;
            self.emit(Instr::call(None, Callee::Function(ctor), vec![obj.into()]));
        }
        Ok(obj.into())
    }

    /// Allocate one array level: a length word followed by `len` elements.
    /// With more dimensions left, every element is filled by a nested
    /// allocation inside an explicit loop.
    fn lower_new_array(&mut self, dims: &[RegValue], loc: Location) -> Result<VReg, CompileError> {
        let len = dims[0];
        let bytes = match len {
            RegValue::Imm(n) => {
                let bytes = n.checked_mul(8).and_then(|b| b.checked_add(8)).ok_or_else(|| {
                    CompileError::ContractViolation(format!("array length {n} is too large at {loc}"))
                })?;
                RegValue::Imm(bytes)
            }
            _ => {
                let scaled = self.new_vreg("bytes");
                self.emit(Instr::Binary { dst: scaled.into(), op: BinOp::Shl, lhs: len, rhs: RegValue::Imm(3) });
                let total = self.new_vreg("bytes");
                self.emit(Instr::Binary { dst: total.into(), op: BinOp::Add, lhs: scaled.into(), rhs: RegValue::Imm(8) });
                total.into()
            }
        };
        let arr = self.new_vreg("array");
        self.emit(Instr::call(Some(arr.into()), Callee::Builtin(Builtin::Malloc), vec![bytes]));
        self.emit(Instr::Store { addr: Address::Base { base: arr.into(), offset: 0 }, src: len });

        if dims.len() > 1 {
            let i = self.new_vreg("i");
            self.emit(Instr::Move { dst: i.into(), src: RegValue::Imm(0) });
            let cond_bb = self.new_block("new_cond");
            let body_bb = self.new_block("new_body");
            let end_bb = self.new_block("new_end");

            self.jump(cond_bb);
            self.switch_to(cond_bb);
            self.emit(Instr::Branch { cond: CmpOp::Lt, lhs: i.into(), rhs: len, then_bb: body_bb, else_bb: end_bb });

            self.switch_to(body_bb);
            let sub = self.lower_new_array(&dims[1..], loc)?;
            let off = self.new_vreg("off");
            self.emit(Instr::Binary { dst: off.into(), op: BinOp::Shl, lhs: i.into(), rhs: RegValue::Imm(3) });
            let slot = self.new_vreg("elem");
            self.emit(Instr::Binary { dst: slot.into(), op: BinOp::Add, lhs: arr.into(), rhs: off.into() });
            self.emit(Instr::Store { addr: Address::Base { base: slot.into(), offset: 8 }, src: sub.into() });
            self.emit(Instr::Binary { dst: i.into(), op: BinOp::Add, lhs: i.into(), rhs: RegValue::Imm(1) });
            self.jump(cond_bb);

            self.switch_to(end_bb);
        }
        Ok(arr)
    }
}
