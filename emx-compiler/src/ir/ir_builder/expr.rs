use super::context::{FnGen, LValue};
use super::stmt::method_key;
use crate::ast::{BinaryOp, Expr, ExprKind, Type, UnaryOp};
use crate::ir::*;
use crate::scope::FuncKind;
use crate::{CompileError, SymbolKind};

impl<'g, 'a> FnGen<'g, 'a> {
    /// Evaluate `e` and return the operand holding its value.
    ///
    /// Reading a local yields the local's own register; callers that go on
    /// to evaluate something with side effects must copy it first (see
    /// [`Self::lower_operands`]).
    pub(crate) fn lower_expr(&mut self, e: &Expr) -> Result<RegValue, CompileError> {
        match &e.kind {
            ExprKind::IntLit(v) => Ok(RegValue::Imm(*v)),
            ExprKind::BoolLit(b) => Ok(RegValue::Imm(*b as i64)),
            ExprKind::Null => Ok(RegValue::Imm(0)),
            ExprKind::StrLit(s) => Ok(RegValue::Static(self.g.root.add_static("str", StaticInit::Str(s.clone())))),
            ExprKind::This => self
                .this
                .map(RegValue::Vreg)
                .ok_or_else(|| CompileError::ContractViolation(format!("`this` outside of a method at {}", e.loc))),
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {
                let lv = self.lower_lvalue(e)?;
                Ok(self.read_lvalue(lv, "load"))
            }
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
            ExprKind::Binary { op, .. } if op.is_logical() => self.lower_bool_value(e),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs),
            ExprKind::Assign { target, value } => {
                let lv = self.lower_lvalue(target)?;
                let v = self.lower_expr(value)?;
                self.write_lvalue(lv, v);
                Ok(match lv {
                    LValue::Local(r) => r.into(),
                    LValue::Mem(_) => v,
                })
            }
            ExprKind::Call { name, args } => self.lower_call(e, name, args),
            ExprKind::MethodCall { receiver, method, args } => self.lower_method_call(e, receiver, method, args),
            ExprKind::New { dims } => self.lower_new(e, dims),
        }
    }

    /// Evaluate a list of operands left to right. An operand whose value is
    /// a local's register (`i`, `a = 1`, `++i`) is copied when a later
    /// operand could overwrite that local (`f(i, i++)`, `++i + ++i`).
    pub(crate) fn lower_operands(&mut self, exprs: &[&Expr]) -> Result<Vec<RegValue>, CompileError> {
        let mut out = Vec::with_capacity(exprs.len());
        for (i, e) in exprs.iter().enumerate() {
            let mut v = self.lower_expr(e)?;
            let later_writes = exprs[i + 1..].iter().any(|x| has_side_effects(x));
            if let (true, RegValue::Vreg(r)) = (later_writes, v) {
                if self.is_local(r) {
                    let hint = self.func.vreg_hint(r).to_string();
                    let copy = self.new_vreg(&hint);
                    self.emit(Instr::Move { dst: copy.into(), src: r.into() });
                    v = copy.into();
                }
            }
            out.push(v);
        }
        Ok(out)
    }

    // ── Unary / binary ───────────────────────────────────────────────────

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<RegValue, CompileError> {
        match op {
            UnaryOp::Pos => self.lower_expr(operand),
            UnaryOp::Neg | UnaryOp::BitNot => {
                let src = self.lower_expr(operand)?;
                let dst = self.new_vreg("un");
                let op = if op == UnaryOp::Neg { UnOp::Neg } else { UnOp::Not };
                self.emit(Instr::Unary { dst: dst.into(), op, src });
                Ok(dst.into())
            }
            UnaryOp::LogicNot => {
                let src = self.lower_expr(operand)?;
                let dst = self.new_vreg("not");
                self.emit(Instr::Binary { dst: dst.into(), op: BinOp::Xor, lhs: src, rhs: RegValue::Imm(1) });
                Ok(dst.into())
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                self.lower_inc_dec(op, operand)
            }
        }
    }

    fn lower_inc_dec(&mut self, op: UnaryOp, operand: &Expr) -> Result<RegValue, CompileError> {
        let bin = if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) { BinOp::Add } else { BinOp::Sub };
        let is_post = matches!(op, UnaryOp::PostInc | UnaryOp::PostDec);
        let one = RegValue::Imm(1);
        match self.lower_lvalue(operand)? {
            LValue::Local(r) => {
                let old = if is_post {
                    let copy = self.new_vreg("old");
                    self.emit(Instr::Move { dst: copy.into(), src: r.into() });
                    Some(copy)
                } else {
                    None
                };
                self.emit(Instr::Binary { dst: r.into(), op: bin, lhs: r.into(), rhs: one });
                Ok(old.unwrap_or(r).into())
            }
            lv @ LValue::Mem(_) => {
                let old = self.read_lvalue(lv, "old");
                let new = self.new_vreg("new");
                self.emit(Instr::Binary { dst: new.into(), op: bin, lhs: old, rhs: one });
                self.write_lvalue(lv, new.into());
                Ok(if is_post { old } else { new.into() })
            }
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<RegValue, CompileError> {
        let strings = lhs.ty.is_string() && rhs.ty.is_string();
        let ops = self.lower_operands(&[lhs, rhs])?;
        let (l, r) = (ops[0], ops[1]);

        if let Some(cond) = map_rel(op) {
            let (l, r) = if strings { (self.string_compare(l, r), RegValue::Imm(0)) } else { (l, r) };
            let dst = self.new_vreg("cmp");
            self.emit(Instr::Compare { dst: dst.into(), cond, lhs: l, rhs: r });
            return Ok(dst.into());
        }

        if strings && op == BinaryOp::Add {
            let dst = self.new_vreg("concat");
            self.emit(Instr::call(Some(dst.into()), Callee::Builtin(Builtin::StringConcat), vec![l, r]));
            return Ok(dst.into());
        }

        let op = map_arith(op)
            .ok_or_else(|| CompileError::Internal(format!("operator {op:?} is not arithmetic")))?;
        let dst = self.new_vreg(op.mnemonic());
        self.emit(Instr::Binary { dst: dst.into(), op, lhs: l, rhs: r });
        Ok(dst.into())
    }

    fn string_compare(&mut self, l: RegValue, r: RegValue) -> RegValue {
        let dst = self.new_vreg("strcmp");
        self.emit(Instr::call(Some(dst.into()), Callee::Builtin(Builtin::StringCompare), vec![l, r]));
        dst.into()
    }

    // ── Short-circuit booleans ───────────────────────────────────────────

    /// Materialize a boolean expression as 0/1 through explicit control flow.
    fn lower_bool_value(&mut self, e: &Expr) -> Result<RegValue, CompileError> {
        let result = self.new_vreg("bool");
        let true_bb = self.new_block("bool_true");
        let false_bb = self.new_block("bool_false");
        let end_bb = self.new_block("bool_end");

        self.lower_cond(e, true_bb, false_bb)?;

        self.switch_to(true_bb);
        self.emit(Instr::Move { dst: result.into(), src: RegValue::Imm(1) });
        self.jump(end_bb);

        self.switch_to(false_bb);
        self.emit(Instr::Move { dst: result.into(), src: RegValue::Imm(0) });
        self.jump(end_bb);

        self.switch_to(end_bb);
        Ok(result.into())
    }

    /// Branch to `true_bb` when `e` holds and to `false_bb` otherwise. Ends
    /// the current block.
    pub(crate) fn lower_cond(&mut self, e: &Expr, true_bb: BlockId, false_bb: BlockId) -> Result<(), CompileError> {
        match &e.kind {
            ExprKind::Binary { op: BinaryOp::LogicAnd, lhs, rhs } => {
                let rhs_bb = self.new_block("and_rhs");
                self.lower_cond(lhs, rhs_bb, false_bb)?;
                self.switch_to(rhs_bb);
                self.lower_cond(rhs, true_bb, false_bb)
            }
            ExprKind::Binary { op: BinaryOp::LogicOr, lhs, rhs } => {
                let rhs_bb = self.new_block("or_rhs");
                self.lower_cond(lhs, true_bb, rhs_bb)?;
                self.switch_to(rhs_bb);
                self.lower_cond(rhs, true_bb, false_bb)
            }
            ExprKind::Unary { op: UnaryOp::LogicNot, operand } => self.lower_cond(operand, false_bb, true_bb),
            ExprKind::BoolLit(b) => {
                self.jump(if *b { true_bb } else { false_bb });
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_relational() => {
                let cond = map_rel(*op).ok_or_else(|| CompileError::Internal(format!("{op:?}")))?;
                let strings = lhs.ty.is_string() && rhs.ty.is_string();
                let ops = self.lower_operands(&[lhs.as_ref(), rhs.as_ref()])?;
                let (l, r) = if strings {
                    (self.string_compare(ops[0], ops[1]), RegValue::Imm(0))
                } else {
                    (ops[0], ops[1])
                };
                self.emit(Instr::Branch { cond, lhs: l, rhs: r, then_bb: true_bb, else_bb: false_bb });
                Ok(())
            }
            _ => {
                let v = self.lower_expr(e)?;
                self.emit(Instr::Branch {
                    cond: CmpOp::Ne,
                    lhs: v,
                    rhs: RegValue::Imm(0),
                    then_bb: true_bb,
                    else_bb: false_bb,
                });
                Ok(())
            }
        }
    }

    // ── Places ───────────────────────────────────────────────────────────

    pub(crate) fn lower_lvalue(&mut self, e: &Expr) -> Result<LValue, CompileError> {
        match &e.kind {
            ExprKind::Ident(name) => self.resolve(name, e.loc),
            ExprKind::Member { object, field } => {
                let class_name = match &object.ty {
                    Type::Class(c) => c.as_str(),
                    other => {
                        return Err(CompileError::ContractViolation(format!(
                            "member `{field}` accessed on {other} at {}",
                            e.loc
                        )))
                    }
                };
                let scope = self.g.scope;
                let offset = scope
                    .class(class_name)
                    .and_then(|c| c.field_offset(field))
                    .ok_or_else(|| CompileError::Unresolved {
                        kind: SymbolKind::Field,
                        name: format!("{class_name}.{field}"),
                        location: e.loc,
                    })?;
                let obj = self.lower_expr(object)?;
                let base = self.into_vreg(obj, "obj");
                Ok(LValue::Mem(Address::Base { base: base.into(), offset }))
            }
            ExprKind::Index { array, index } => {
                let ops = self.lower_operands(&[array.as_ref(), index.as_ref()])?;
                let base = self.into_vreg(ops[0], "arr");
                match ops[1] {
                    RegValue::Imm(k) => {
                        let offset = k.checked_mul(8).and_then(|o| o.checked_add(8)).ok_or_else(|| {
                            CompileError::ContractViolation(format!("constant index {k} out of range at {}", e.loc))
                        })?;
                        Ok(LValue::Mem(Address::Base { base: base.into(), offset }))
                    }
                    idx => {
                        let scaled = self.new_vreg("off");
                        self.emit(Instr::Binary { dst: scaled.into(), op: BinOp::Shl, lhs: idx, rhs: RegValue::Imm(3) });
                        let addr = self.new_vreg("elem");
                        self.emit(Instr::Binary { dst: addr.into(), op: BinOp::Add, lhs: base.into(), rhs: scaled.into() });
                        Ok(LValue::Mem(Address::Base { base: addr.into(), offset: 8 }))
                    }
                }
            }
            _ => Err(CompileError::ContractViolation(format!("expression at {} is not assignable", e.loc))),
        }
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn emit_call(&mut self, e: &Expr, callee: Callee, args: Vec<RegValue>) -> RegValue {
        if e.ty.is_void() {
            self.emit(Instr::call(None, callee, args));
            RegValue::Imm(0)
        } else {
            let dst = self.new_vreg("call");
            self.emit(Instr::call(Some(dst.into()), callee, args));
            dst.into()
        }
    }

    fn lower_call(&mut self, e: &Expr, name: &str, args: &[Expr]) -> Result<RegValue, CompileError> {
        // Inside a class an unqualified call may name a method of `this`.
        if let (Some(class), Some(this)) = (self.class, self.this) {
            if class.method(name).is_some() {
                let id = self.g.func_id(&method_key(&class.name, name), e.loc)?;
                let mut values = vec![RegValue::Vreg(this)];
                values.extend(self.lower_operands(&args.iter().collect::<Vec<_>>())?);
                return Ok(self.emit_call(e, Callee::Function(id), values));
            }
        }

        let scope = self.g.scope;
        let entity = scope.function(name).ok_or_else(|| CompileError::Unresolved {
            kind: SymbolKind::Function,
            name: name.to_string(),
            location: e.loc,
        })?;
        let callee = match &entity.kind {
            FuncKind::Builtin(b) => Callee::Builtin(*b),
            FuncKind::User => Callee::Function(self.g.func_id(name, e.loc)?),
            FuncKind::Method { class } => {
                return Err(CompileError::ContractViolation(format!(
                    "method `{class}.{name}` called without a receiver at {}",
                    e.loc
                )))
            }
        };
        let values = self.lower_operands(&args.iter().collect::<Vec<_>>())?;
        Ok(self.emit_call(e, callee, values))
    }

    fn lower_method_call(
        &mut self,
        e: &Expr,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<RegValue, CompileError> {
        let mut operands: Vec<&Expr> = vec![receiver];
        operands.extend(args.iter());
        let values = self.lower_operands(&operands)?;

        let unresolved = || CompileError::Unresolved {
            kind: SymbolKind::Method,
            name: format!("{}.{method}", receiver.ty),
            location: e.loc,
        };
        match (&receiver.ty, method) {
            // Arrays and strings both keep their length in the first word.
            (Type::Array(_), "size") | (Type::String, "length") => {
                let base = self.into_vreg(values[0], "len_of");
                let dst = self.new_vreg("len");
                self.emit(Instr::Load { dst: dst.into(), addr: Address::Base { base: base.into(), offset: 0 } });
                Ok(dst.into())
            }
            (Type::String, m) => {
                let b = Builtin::string_method(m).ok_or_else(unresolved)?;
                Ok(self.emit_call(e, Callee::Builtin(b), values))
            }
            (Type::Class(c), m) => {
                let id = self.g.func_id(&method_key(c, m), e.loc).map_err(|_| unresolved())?;
                Ok(self.emit_call(e, Callee::Function(id), values))
            }
            _ => Err(unresolved()),
        }
    }
}

/// Whether evaluating `e` may write a variable or memory.
pub(crate) fn has_side_effects(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::IntLit(_) | ExprKind::BoolLit(_) | ExprKind::StrLit(_) | ExprKind::Null | ExprKind::This => false,
        ExprKind::Ident(_) => false,
        ExprKind::Assign { .. } | ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::New { .. } => true,
        ExprKind::Unary { op, operand } => {
            matches!(op, UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec)
                || has_side_effects(operand)
        }
        ExprKind::Binary { lhs, rhs, .. } => has_side_effects(lhs) || has_side_effects(rhs),
        ExprKind::Member { object, .. } => has_side_effects(object),
        ExprKind::Index { array, index } => has_side_effects(array) || has_side_effects(index),
    }
}

pub fn map_arith(op: BinaryOp) -> Option<BinOp> {
    Some(match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Mod,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
        BinaryOp::BitAnd => BinOp::And,
        BinaryOp::BitOr => BinOp::Or,
        BinaryOp::BitXor => BinOp::Xor,
        _ => return None,
    })
}

pub fn map_rel(op: BinaryOp) -> Option<CmpOp> {
    Some(match op {
        BinaryOp::Eq => CmpOp::Eq,
        BinaryOp::Ne => CmpOp::Ne,
        BinaryOp::Lt => CmpOp::Lt,
        BinaryOp::Le => CmpOp::Le,
        BinaryOp::Gt => CmpOp::Gt,
        BinaryOp::Ge => CmpOp::Ge,
        _ => return None,
    })
}
