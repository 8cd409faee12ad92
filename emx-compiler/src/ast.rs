//! Typed syntax tree handed over by the front end.
//!
//! The tree is already validated and every expression carries its resolved
//! [`Type`]. The core never type-checks; it trusts these annotations when it
//! picks runtime entry points (string comparison, concatenation) and object
//! layouts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position of a node, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Int,
    Bool,
    String,
    Void,
    Null,
    Class(String),
    Array(Box<Type>),
}

impl Type {
    pub fn array_of(elem: Type) -> Self {
        Type::Array(Box::new(elem))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::String)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Class(name) => write!(f, "{name}"),
            Type::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Var(VarDecl),
    Func(FuncDecl),
    Class(ClassDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub init: Option<Expr>,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A free function, a method, or a constructor (a method named like its class).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<VarDecl>,
    pub methods: Vec<FuncDecl>,
    #[serde(default)]
    pub loc: Location,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Block(Vec<Stmt>),
    VarDecl(VarDecl),
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        #[serde(default)]
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        #[serde(default)]
        init: Option<ForInit>,
        #[serde(default)]
        cond: Option<Expr>,
        #[serde(default)]
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Break(Location),
    Continue(Location),
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        loc: Location,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    Decls(Vec<VarDecl>),
    Expr(Expr),
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    BoolLit(bool),
    StrLit(String),
    Null,
    This,
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// `new C`, `new C()` or `new T[d0][d1]...[]`; the created type is the
    /// expression's own `ty`, `dims` holds the explicit leading dimensions.
    New {
        #[serde(default)]
        dims: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    LogicNot,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogicAnd,
    LogicOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicAnd | BinaryOp::LogicOr)
    }
}

// ── Construction helpers ────────────────────────────────────────────────
// Front ends and tests build trees with these instead of spelling out
// every `Expr { .. }` literal.

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self { kind, ty, loc: Location::default() }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.loc = Location { line, column };
        self
    }

    pub fn int(v: i64) -> Self {
        Self::new(ExprKind::IntLit(v), Type::Int)
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ExprKind::BoolLit(v), Type::Bool)
    }

    pub fn str(s: &str) -> Self {
        Self::new(ExprKind::StrLit(s.to_string()), Type::String)
    }

    pub fn null() -> Self {
        Self::new(ExprKind::Null, Type::Null)
    }

    pub fn ident(name: &str, ty: Type) -> Self {
        Self::new(ExprKind::Ident(name.to_string()), ty)
    }

    pub fn this(class: &str) -> Self {
        Self::new(ExprKind::This, Type::Class(class.to_string()))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let ty = match op {
            UnaryOp::LogicNot => Type::Bool,
            _ => operand.ty.clone(),
        };
        Self::new(ExprKind::Unary { op, operand: Box::new(operand) }, ty)
    }

    /// Binary expression; the result type follows the operator (and the
    /// left operand for arithmetic, so `string + string` stays a string).
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let ty = if op.is_relational() || op.is_logical() { Type::Bool } else { lhs.ty.clone() };
        Self::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty)
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        let ty = target.ty.clone();
        Self::new(ExprKind::Assign { target: Box::new(target), value: Box::new(value) }, ty)
    }

    pub fn call(name: &str, args: Vec<Expr>, ty: Type) -> Self {
        Self::new(ExprKind::Call { name: name.to_string(), args }, ty)
    }

    pub fn method(receiver: Expr, method: &str, args: Vec<Expr>, ty: Type) -> Self {
        Self::new(
            ExprKind::MethodCall { receiver: Box::new(receiver), method: method.to_string(), args },
            ty,
        )
    }

    pub fn member(object: Expr, field: &str, ty: Type) -> Self {
        Self::new(ExprKind::Member { object: Box::new(object), field: field.to_string() }, ty)
    }

    pub fn index(array: Expr, index: Expr) -> Self {
        let ty = match &array.ty {
            Type::Array(elem) => (**elem).clone(),
            other => other.clone(),
        };
        Self::new(ExprKind::Index { array: Box::new(array), index: Box::new(index) }, ty)
    }

    pub fn new_object(class: &str) -> Self {
        Self::new(ExprKind::New { dims: Vec::new() }, Type::Class(class.to_string()))
    }

    pub fn new_array(ty: Type, dims: Vec<Expr>) -> Self {
        Self::new(ExprKind::New { dims }, ty)
    }
}

impl VarDecl {
    pub fn new(name: &str, ty: Type, init: Option<Expr>) -> Self {
        Self { name: name.to_string(), ty, init, loc: Location::default() }
    }
}

impl Param {
    pub fn new(name: &str, ty: Type) -> Self {
        Self { name: name.to_string(), ty }
    }
}

impl FuncDecl {
    pub fn new(name: &str, ret: Type, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self { name: name.to_string(), ret, params, body, loc: Location::default() }
    }
}

impl Stmt {
    pub fn expr(e: Expr) -> Self {
        Stmt::Expr(e)
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::Return { value, loc: Location::default() }
    }

    pub fn var(name: &str, ty: Type, init: Option<Expr>) -> Self {
        Stmt::VarDecl(VarDecl::new(name, ty, init))
    }
}
