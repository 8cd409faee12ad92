use super::context::{FnGen, Gen, LoopTargets};
use crate::ast::{ClassDecl, Decl, Expr, ForInit, FuncDecl, Program, Stmt};
use crate::ir::*;
use crate::scope::ClassEntity;
use crate::{CompileError, SymbolKind};
use tracing::debug;

/// Assembly symbol of a free function.
pub fn function_label(name: &str) -> String {
    format!("f_{name}")
}

/// Assembly symbol of a method.
pub fn method_label(class: &str, method: &str) -> String {
    format!("m_{class}_{method}")
}

pub fn method_key(class: &str, method: &str) -> String {
    format!("{class}.{method}")
}

impl<'a> Gen<'a> {
    pub fn lower_program(&mut self, p: &Program) -> Result<(), CompileError> {
        // First pass: give every global, function and method an id so bodies
        // can reference declarations that appear later.
        for decl in &p.decls {
            match decl {
                Decl::Var(v) => {
                    let id = self.root.add_static(&v.name, StaticInit::Word);
                    self.globals.insert(v.name.clone(), id);
                }
                Decl::Func(f) => {
                    let id = self.root.add_function(IrFunction::new(&f.name, function_label(&f.name)));
                    self.funcs.insert(f.name.clone(), id);
                }
                Decl::Class(c) => {
                    for m in &c.methods {
                        let key = method_key(&c.name, &m.name);
                        let id = self.root.add_function(IrFunction::new(&key, method_label(&c.name, &m.name)));
                        self.funcs.insert(key, id);
                    }
                }
            }
        }

        for decl in &p.decls {
            match decl {
                Decl::Func(f) => self.lower_function(f, None)?,
                Decl::Class(c) => self.lower_class(c)?,
                Decl::Var(_) => {}
            }
        }

        let init = self.lower_init(p)?;
        self.root.entry = Some(init);
        debug!(functions = self.root.functions.len(), statics = self.root.statics.len(), "built IR");
        Ok(())
    }

    fn lower_class(&mut self, c: &ClassDecl) -> Result<(), CompileError> {
        let scope = self.scope;
        let class = scope.class(&c.name).ok_or_else(|| CompileError::Unresolved {
            kind: SymbolKind::Class,
            name: c.name.clone(),
            location: c.loc,
        })?;
        for m in &c.methods {
            self.lower_function(m, Some(class))?;
        }
        Ok(())
    }

    fn lower_function(&mut self, decl: &FuncDecl, class: Option<&'a ClassEntity>) -> Result<(), CompileError> {
        let (key, label) = match class {
            Some(c) => (method_key(&c.name, &decl.name), method_label(&c.name, &decl.name)),
            None => (decl.name.clone(), function_label(&decl.name)),
        };
        let id = self.func_id(&key, decl.loc)?;

        let mut fx = FnGen::new(self, IrFunction::new(&key, label), class);
        if class.is_some() {
            fx.this = Some(fx.func.add_param("this"));
        }
        for p in &decl.params {
            let v = fx.func.add_param(&p.name);
            fx.declare_local(&p.name, v);
        }
        fx.lower_stmts(&decl.body)?;
        let func = fx.finish(!decl.ret.is_void());

        self.root.functions[id.0] = func;
        Ok(())
    }

    /// The program entry: store every global initializer, then run `main`.
    fn lower_init(&mut self, p: &Program) -> Result<FuncId, CompileError> {
        let main = self.funcs.get("main").copied().ok_or(CompileError::MissingEntry)?;
        let main_returns = self.scope.function("main").map_or(true, |f| !f.ret.is_void());

        let mut fx = FnGen::new(self, IrFunction::new("__init", "main"), None);
        for decl in &p.decls {
            if let Decl::Var(v) = decl {
                if let Some(init) = &v.init {
                    let value = fx.lower_expr(init)?;
                    let id = fx.g.globals[&v.name];
                    fx.emit(Instr::Store { addr: Address::Static(id), src: value });
                }
            }
        }
        let value = if main_returns {
            let r = fx.new_vreg("exit");
            fx.emit(Instr::call(Some(r.into()), Callee::Function(main), Vec::new()));
            RegValue::Vreg(r)
        } else {
            fx.emit(Instr::call(None, Callee::Function(main), Vec::new()));
            RegValue::Imm(0)
        };
        fx.emit(Instr::Return { value: Some(value) });
        let func = fx.finish(true);
        Ok(self.root.add_function(func))
    }
}

impl<'g, 'a> FnGen<'g, 'a> {
    pub(crate) fn lower_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for s in stmts {
            self.lower_stmt(s)?;
        }
        Ok(())
    }

    pub(crate) fn lower_stmt(&mut self, s: &Stmt) -> Result<(), CompileError> {
        match s {
            Stmt::Block(stmts) => {
                self.push_scope();
                let res = self.lower_stmts(stmts);
                self.pop_scope();
                res
            }
            Stmt::VarDecl(v) => {
                let value = match &v.init {
                    Some(init) => self.lower_expr(init)?,
                    None => RegValue::Imm(0),
                };
                let local = self.new_vreg(&v.name);
                self.emit(Instr::Move { dst: local.into(), src: value });
                self.declare_local(&v.name, local);
                Ok(())
            }
            Stmt::Expr(e) => self.lower_expr(e).map(|_| ()),
            Stmt::If { cond, then_branch, else_branch } => {
                self.lower_if(cond, then_branch, else_branch.as_deref())
            }
            Stmt::While { cond, body } => self.lower_while(cond, body),
            Stmt::For { init, cond, step, body } => {
                self.lower_for(init.as_ref(), cond.as_ref(), step.as_ref(), body)
            }
            Stmt::Break(location) => {
                let target = self.loops.last().ok_or(CompileError::JumpOutsideLoop {
                    keyword: "break",
                    location: *location,
                })?;
                let bb = target.break_bb;
                self.jump(bb);
                self.start_unreachable();
                Ok(())
            }
            Stmt::Continue(location) => {
                let target = self.loops.last().ok_or(CompileError::JumpOutsideLoop {
                    keyword: "continue",
                    location: *location,
                })?;
                let bb = target.continue_bb;
                self.jump(bb);
                self.start_unreachable();
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(e) if !e.ty.is_void() => Some(self.lower_expr(e)?),
                    Some(e) => {
                        self.lower_expr(e)?;
                        None
                    }
                    None => None,
                };
                self.emit(Instr::Return { value });
                self.start_unreachable();
                Ok(())
            }
            Stmt::Empty => Ok(()),
        }
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), CompileError> {
        let then_bb = self.new_block("if_then");
        let else_bb = else_branch.map(|_| self.new_block("if_else"));
        let end_bb = self.new_block("if_end");

        self.lower_cond(cond, then_bb, else_bb.unwrap_or(end_bb))?;

        self.switch_to(then_bb);
        self.push_scope();
        self.lower_stmt(then_branch)?;
        self.pop_scope();
        self.jump(end_bb);

        if let (Some(bb), Some(stmt)) = (else_bb, else_branch) {
            self.switch_to(bb);
            self.push_scope();
            self.lower_stmt(stmt)?;
            self.pop_scope();
            self.jump(end_bb);
        }

        self.switch_to(end_bb);
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &Stmt) -> Result<(), CompileError> {
        let cond_bb = self.new_block("while_cond");
        let body_bb = self.new_block("while_body");
        let end_bb = self.new_block("while_end");

        self.jump(cond_bb);
        self.switch_to(cond_bb);
        self.lower_cond(cond, body_bb, end_bb)?;

        self.switch_to(body_bb);
        self.lower_loop_body(body, LoopTargets { break_bb: end_bb, continue_bb: cond_bb })?;
        self.jump(cond_bb);

        self.switch_to(end_bb);
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&ForInit>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        self.push_scope();
        match init {
            Some(ForInit::Decls(decls)) => {
                for d in decls {
                    self.lower_stmt(&Stmt::VarDecl(d.clone()))?;
                }
            }
            Some(ForInit::Expr(e)) => {
                self.lower_expr(e)?;
            }
            None => {}
        }

        let cond_bb = self.new_block("for_cond");
        let body_bb = self.new_block("for_body");
        let step_bb = self.new_block("for_step");
        let end_bb = self.new_block("for_end");

        self.jump(cond_bb);
        self.switch_to(cond_bb);
        match cond {
            Some(c) => self.lower_cond(c, body_bb, end_bb)?,
            None => self.jump(body_bb),
        }

        self.switch_to(body_bb);
        self.lower_loop_body(body, LoopTargets { break_bb: end_bb, continue_bb: step_bb })?;
        self.jump(step_bb);

        self.switch_to(step_bb);
        if let Some(s) = step {
            self.lower_expr(s)?;
        }
        self.jump(cond_bb);

        self.switch_to(end_bb);
        self.pop_scope();
        Ok(())
    }

    fn lower_loop_body(&mut self, body: &Stmt, targets: LoopTargets) -> Result<(), CompileError> {
        self.loops.push(targets);
        self.push_scope();
        let res = self.lower_stmt(body);
        self.pop_scope();
        self.loops.pop();
        res
    }
}

