#![allow(dead_code)]

use emx_compiler::ast::{BinaryOp, Decl, Expr, FuncDecl, Param, Program, Stmt, Type};
use emx_compiler::backend::preprocess::preprocess;
use emx_compiler::backend::regalloc::RegisterAllocator;
use emx_compiler::ir::interp::Interpreter;
use emx_compiler::ir::IrRoot;
use emx_compiler::scope::GlobalScope;
use emx_compiler::{compile_to_ir, CompileOptions};

pub fn int_var(name: &str) -> Expr {
    Expr::ident(name, Type::Int)
}

pub fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(op, lhs, rhs)
}

pub fn int_fn(name: &str, params: &[&str], body: Vec<Stmt>) -> Decl {
    let params = params.iter().map(|p| Param::new(p, Type::Int)).collect();
    Decl::Func(FuncDecl::new(name, Type::Int, params, body))
}

pub fn call_int(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(name, args, Type::Int)
}

pub fn print_int(e: Expr) -> Stmt {
    Stmt::expr(Expr::call("printlnInt", vec![e], Type::Void))
}

/// `int main() { <body> }`
pub fn main_fn(body: Vec<Stmt>) -> Decl {
    int_fn("main", &[], body)
}

pub fn program(decls: Vec<Decl>) -> Program {
    Program { decls }
}

pub fn build_ir(p: &Program, options: &CompileOptions) -> IrRoot {
    let scope = GlobalScope::from_program(p).expect("declarations should collect");
    compile_to_ir(p, &scope, options).expect("program should lower")
}

/// Raw builder output, no IR passes.
pub fn build_raw(p: &Program) -> IrRoot {
    let scope = GlobalScope::from_program(p).expect("declarations should collect");
    emx_compiler::ir::ir_builder::build(p, &scope).expect("program should lower")
}

/// Interpret `root` from its entry, returning (exit value, printed output).
pub fn run(root: &IrRoot) -> (i64, String) {
    let r = Interpreter::new(root).run().expect("program should run");
    (r.value, r.output)
}

/// Preprocess and register-allocate a copy of `root`.
pub fn allocated(root: &IrRoot) -> IrRoot {
    let mut root = root.clone();
    preprocess(&mut root).expect("preprocess should succeed");
    RegisterAllocator::default().run(&mut root).expect("allocation should succeed");
    root
}

/// Run `p` before and after register allocation, checking both agree.
pub fn run_both(p: &Program, options: &CompileOptions) -> (i64, String) {
    let root = build_ir(p, options);
    let before = run(&root);
    let after = run(&allocated(&root));
    assert_eq!(before, after, "allocated code computes something else");
    before
}

pub fn load_sample(name: &str) -> Program {
    let path = format!("../samples/{name}");
    let text = std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to read {path}"));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("{path} should parse: {e}"))
}

pub fn compile_asm(p: &Program, options: &CompileOptions) -> String {
    emx_compiler::compile_program(p, options).expect("program should compile")
}

/// `int sum(int n) { int s = 0; for (int i = 1; i <= n; ++i) s = s + i; return s; }`
pub fn sum_fn() -> Decl {
    use emx_compiler::ast::{ForInit, UnaryOp, VarDecl};
    let s = || int_var("s");
    let i = || int_var("i");
    int_fn(
        "sum",
        &["n"],
        vec![
            Stmt::var("s", Type::Int, Some(Expr::int(0))),
            Stmt::For {
                init: Some(ForInit::Decls(vec![VarDecl::new("i", Type::Int, Some(Expr::int(1)))])),
                cond: Some(bin(BinaryOp::Le, i(), int_var("n"))),
                step: Some(Expr::unary(UnaryOp::PreInc, i())),
                body: Box::new(Stmt::expr(Expr::assign(s(), bin(BinaryOp::Add, s(), i())))),
            },
            Stmt::ret(Some(s())),
        ],
    )
}

/// `int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }`
pub fn fib_fn() -> Decl {
    let n = || int_var("n");
    int_fn(
        "fib",
        &["n"],
        vec![
            Stmt::If {
                cond: bin(BinaryOp::Lt, n(), Expr::int(2)),
                then_branch: Box::new(Stmt::ret(Some(n()))),
                else_branch: None,
            },
            Stmt::ret(Some(bin(
                BinaryOp::Add,
                call_int("fib", vec![bin(BinaryOp::Sub, n(), Expr::int(1))]),
                call_int("fib", vec![bin(BinaryOp::Sub, n(), Expr::int(2))]),
            ))),
        ],
    )
}
