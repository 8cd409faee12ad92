//! Global scope: the resolved symbol table handed to the IR builder.
//!
//! Semantic analysis proper lives in the front end. [`GlobalScope::from_program`]
//! only collects declarations so that a validated tree can be compiled without
//! a separate symbol-table producer.

use crate::ast::{ClassDecl, Decl, FuncDecl, Param, Program, Type};
use crate::ir::Builtin;
use crate::{CompileError, SymbolKind};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum FuncKind {
    User,
    Method { class: String },
    Builtin(Builtin),
}

#[derive(Debug, Clone)]
pub struct FuncEntity {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub kind: FuncKind,
}

impl FuncEntity {
    fn from_decl(decl: &FuncDecl, kind: FuncKind) -> Self {
        Self { name: decl.name.clone(), params: decl.params.clone(), ret: decl.ret.clone(), kind }
    }

    fn builtin(name: &str, params: &[Type], ret: Type, b: Builtin) -> Self {
        let params = params
            .iter()
            .enumerate()
            .map(|(i, ty)| Param::new(&format!("a{i}"), ty.clone()))
            .collect();
        Self { name: name.to_string(), params, ret, kind: FuncKind::Builtin(b) }
    }
}

#[derive(Debug, Clone)]
pub struct VarEntity {
    pub name: String,
    pub ty: Type,
}

/// A class with its fields in declaration order; field `k` lives at byte `8*k`.
#[derive(Debug, Clone)]
pub struct ClassEntity {
    pub name: String,
    pub fields: Vec<VarEntity>,
    pub methods: HashMap<String, FuncEntity>,
}

impl ClassEntity {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_offset(&self, name: &str) -> Option<i64> {
        self.field_index(name).map(|i| 8 * i as i64)
    }

    /// Allocation size in bytes. Empty classes still get one word so every
    /// object has a distinct address.
    pub fn size(&self) -> i64 {
        8 * self.fields.len().max(1) as i64
    }

    pub fn constructor(&self) -> Option<&FuncEntity> {
        self.methods.get(&self.name)
    }

    pub fn method(&self, name: &str) -> Option<&FuncEntity> {
        self.methods.get(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    functions: HashMap<String, FuncEntity>,
    classes: HashMap<String, ClassEntity>,
    globals: HashMap<String, VarEntity>,
}

impl GlobalScope {
    /// Scope pre-populated with the builtin free functions.
    pub fn new() -> Self {
        let mut scope = Self::default();
        let builtins = [
            FuncEntity::builtin("print", &[Type::String], Type::Void, Builtin::Print),
            FuncEntity::builtin("println", &[Type::String], Type::Void, Builtin::Println),
            FuncEntity::builtin("printInt", &[Type::Int], Type::Void, Builtin::PrintInt),
            FuncEntity::builtin("printlnInt", &[Type::Int], Type::Void, Builtin::PrintlnInt),
            FuncEntity::builtin("getString", &[], Type::String, Builtin::GetString),
            FuncEntity::builtin("getInt", &[], Type::Int, Builtin::GetInt),
            FuncEntity::builtin("toString", &[Type::Int], Type::String, Builtin::ToString),
        ];
        for f in builtins {
            scope.functions.insert(f.name.clone(), f);
        }
        scope
    }

    /// Collect every top-level declaration of `program`.
    pub fn from_program(program: &Program) -> Result<Self, CompileError> {
        let mut scope = Self::new();
        for decl in &program.decls {
            match decl {
                Decl::Var(v) => scope.declare_global(&v.name, v.ty.clone())?,
                Decl::Func(f) => scope.declare_function(FuncEntity::from_decl(f, FuncKind::User))?,
                Decl::Class(c) => scope.declare_class(c)?,
            }
        }
        Ok(scope)
    }

    pub fn declare_global(&mut self, name: &str, ty: Type) -> Result<(), CompileError> {
        if self.globals.contains_key(name) {
            return Err(CompileError::Redefinition { kind: SymbolKind::Variable, name: name.to_string() });
        }
        self.globals.insert(name.to_string(), VarEntity { name: name.to_string(), ty });
        Ok(())
    }

    pub fn declare_function(&mut self, func: FuncEntity) -> Result<(), CompileError> {
        if let Some(existing) = self.functions.get(&func.name) {
            return Err(CompileError::Redefinition {
                kind: SymbolKind::Function,
                name: existing.name.clone(),
            });
        }
        self.functions.insert(func.name.clone(), func);
        Ok(())
    }

    pub fn declare_class(&mut self, decl: &ClassDecl) -> Result<(), CompileError> {
        if self.classes.contains_key(&decl.name) {
            return Err(CompileError::Redefinition { kind: SymbolKind::Class, name: decl.name.clone() });
        }
        let mut fields: Vec<VarEntity> = Vec::with_capacity(decl.fields.len());
        for f in &decl.fields {
            if fields.iter().any(|e| e.name == f.name) {
                return Err(CompileError::Redefinition {
                    kind: SymbolKind::Field,
                    name: format!("{}.{}", decl.name, f.name),
                });
            }
            fields.push(VarEntity { name: f.name.clone(), ty: f.ty.clone() });
        }
        let mut methods = HashMap::new();
        for m in &decl.methods {
            let entity = FuncEntity::from_decl(m, FuncKind::Method { class: decl.name.clone() });
            if methods.insert(m.name.clone(), entity).is_some() {
                return Err(CompileError::Redefinition {
                    kind: SymbolKind::Method,
                    name: format!("{}.{}", decl.name, m.name),
                });
            }
        }
        self.classes.insert(decl.name.clone(), ClassEntity { name: decl.name.clone(), fields, methods });
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&FuncEntity> {
        self.functions.get(name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassEntity> {
        self.classes.get(name)
    }

    pub fn global(&self, name: &str) -> Option<&VarEntity> {
        self.globals.get(name)
    }
}

