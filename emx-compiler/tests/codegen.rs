mod common;

use common::*;
use emx_compiler::ast::{BinaryOp, Expr, Program, Stmt};
use emx_compiler::{compile_program, CompileOptions};

/// Lines of the function labeled `label`, up to the next blank line.
fn function_lines<'a>(asm: &'a str, label: &str) -> Vec<&'a str> {
    let header = format!("{label}:");
    asm.lines()
        .skip_while(|l| *l != header)
        .skip(1)
        .take_while(|l| !l.is_empty())
        .collect()
}

fn self_moves(asm: &str) -> Vec<&str> {
    asm.lines()
        .filter(|l| {
            let Some(ops) = l.trim().strip_prefix("mov ") else { return false };
            let ops = ops.split(';').next().unwrap_or("");
            match ops.split_once(',') {
                Some((d, s)) => d.trim() == s.trim(),
                None => false,
            }
        })
        .collect()
}

/// int many(int p1, ..., int pN) { return pN-1 + pN; }
fn many_params(n: usize) -> emx_compiler::ast::Decl {
    let names: Vec<String> = (1..=n).map(|i| format!("p{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    int_fn(
        "many",
        &refs,
        vec![Stmt::ret(Some(bin(BinaryOp::Add, int_var(&names[n - 2]), int_var(&names[n - 1]))))],
    )
}

fn call_many(n: usize) -> Program {
    let args = (1..=n as i64).map(Expr::int).collect();
    program(vec![many_params(n), main_fn(vec![Stmt::ret(Some(call_int("many", args)))])])
}

// ── Sample programs ──────────────────────────────────────────────────────

#[test]
fn compile_add_sample() {
    let asm = compile_program(&load_sample("add.json"), &CompileOptions::default()).expect("add.json should compile");
    assert!(asm.starts_with("default rel\n"));
    assert!(asm.contains("global main"));
    assert!(asm.contains("extern __builtin_printlnInt"));
    assert!(asm.contains("section .text"));
    assert!(asm.contains("\nmain:\n"), "the entry should be labeled main");
    assert!(asm.contains("f_add:"));
    assert!(asm.contains("call f_add"));
    assert!(asm.contains("mov rdi, 2"), "first argument goes in rdi");
    assert!(asm.contains("mov rsi, 3"), "second argument goes in rsi");
    assert!(self_moves(&asm).is_empty(), "self moves should be removed: {:?}", self_moves(&asm));
    assert!(!asm.contains("section .data"), "nothing static to emit");
}

#[test]
fn leaf_without_frame_skips_prologue() {
    let asm = compile_program(&load_sample("add.json"), &CompileOptions::default()).expect("add.json should compile");
    let add = function_lines(&asm, "f_add");
    assert!(!add.is_empty());
    assert!(!add.iter().any(|l| l.contains("rbp")), "f_add needs no frame: {add:#?}");
    assert_eq!(add.last().map(|l| l.trim()), Some("ret"));
    assert!(!add.iter().any(|l| l.contains(".epilogue")), "a bare ret replaces the epilogue jump");

    let main = function_lines(&asm, "f_main");
    assert_eq!(main.first().map(|l| l.trim()), Some("push rbp"), "callers keep their frame");
    assert!(main.iter().any(|l| l.trim() == "pop rbp"));
}

#[test]
fn compile_countdown_sample() {
    let asm = compile_program(&load_sample("countdown.json"), &CompileOptions::default())
        .expect("countdown.json should compile");
    assert!(asm.contains("section .data"));
    assert!(asm.contains("__static_var_0_greeting: dq 0"));
    assert!(asm.contains("__static_str_1: dq 7"), "strings start with their length");
    let liftoff: Vec<String> = b"liftoff\0".iter().map(|b| b.to_string()).collect();
    assert!(asm.contains(&format!("db {}", liftoff.join(", "))), "string bytes end with NUL");
    assert!(asm.contains("align 8"));
    assert!(asm.contains("lea "), "the literal's address is taken with lea");
    assert!(asm.contains("extern __builtin_println"));
    assert!(asm.contains("while_cond"), "loop blocks get labels");
}

#[test]
fn every_block_label_is_a_branch_target() {
    let p = program(vec![fib_fn(), sum_fn(), main_fn(vec![Stmt::ret(Some(call_int("sum", vec![Expr::int(3)])))])]);
    for asm in [compile_asm(&p, &CompileOptions::default()), compile_asm(&load_sample("countdown.json"), &CompileOptions::default())] {
        let targets: Vec<&str> = asm
            .lines()
            .filter_map(|l| l.trim().strip_prefix('j'))
            .filter_map(|l| l.split_whitespace().nth(1))
            .collect();
        for label in asm.lines().filter_map(|l| l.strip_suffix(':')).filter(|l| l.starts_with(".bb")) {
            assert!(targets.contains(&label), "nothing branches to {label}");
        }
        assert!(!asm.contains(".bb0_entry:"), "the entry block is only ever fallen into");
    }
}

#[test]
fn inlining_removes_calls_from_output() {
    let p = load_sample("add.json");
    let asm = compile_program(&p, &CompileOptions { inline: true }).expect("should compile");
    assert!(!asm.contains("call f_add"));
    assert!(asm.contains("call __builtin_printlnInt"));
    assert!(asm.contains("f_add:"), "the out-of-line copy is still emitted");
}

// ── Instruction selection ────────────────────────────────────────────────

#[test]
fn division_uses_cqo_idiv() {
    let a = || int_var("a");
    let b = || int_var("b");
    let p = program(vec![
        int_fn("div", &["a", "b"], vec![Stmt::ret(Some(bin(BinaryOp::Div, a(), b())))]),
        int_fn("rem", &["a", "b"], vec![Stmt::ret(Some(bin(BinaryOp::Mod, a(), b())))]),
        main_fn(vec![Stmt::ret(Some(bin(
            BinaryOp::Add,
            call_int("div", vec![Expr::int(7), Expr::int(2)]),
            call_int("rem", vec![Expr::int(7), Expr::int(2)]),
        )))]),
    ]);
    let asm = compile_asm(&p, &CompileOptions::default());
    for f in ["f_div", "f_rem"] {
        let body = function_lines(&asm, f);
        let cqo = body.iter().position(|l| l.trim() == "cqo").unwrap_or_else(|| panic!("{f} needs cqo"));
        assert!(body[cqo + 1].trim().starts_with("idiv "), "{f}: idiv must follow cqo");
        assert!(!body[cqo + 1].contains("rax") && !body[cqo + 1].contains("rdx"));
    }
    let rem = function_lines(&asm, "f_rem");
    assert!(rem.iter().any(|l| l.trim() == "mov rax, rdx"), "the remainder comes out of rdx");
}

#[test]
fn comparisons_materialize_with_setcc() {
    let p = program(vec![
        emx_compiler::ast::Decl::Func(emx_compiler::ast::FuncDecl::new(
            "less",
            emx_compiler::ast::Type::Bool,
            vec![
                emx_compiler::ast::Param::new("a", emx_compiler::ast::Type::Int),
                emx_compiler::ast::Param::new("b", emx_compiler::ast::Type::Int),
            ],
            vec![Stmt::ret(Some(bin(BinaryOp::Lt, int_var("a"), int_var("b"))))],
        )),
        main_fn(vec![Stmt::ret(Some(Expr::int(0)))]),
    ]);
    let asm = compile_asm(&p, &CompileOptions::default());
    let less = function_lines(&asm, "f_less");
    assert!(less.iter().any(|l| l.trim().starts_with("cmp ")));
    assert!(less.iter().any(|l| l.trim().starts_with("setl ")));
    assert!(less.iter().any(|l| l.trim().starts_with("movzx ")));
}

#[test]
fn branches_fall_through_to_the_next_block() {
    let p = program(vec![sum_fn(), main_fn(vec![Stmt::ret(Some(call_int("sum", vec![Expr::int(10)])))])]);
    let asm = compile_asm(&p, &CompileOptions::default());
    let sum = function_lines(&asm, "f_sum");
    for (i, line) in sum.iter().enumerate() {
        if let Some(target) = line.trim().strip_prefix("jmp ") {
            let next = sum.get(i + 1).map(|l| l.trim_end_matches(':'));
            assert_ne!(next, Some(target), "jump to the very next line survived in f_sum");
        }
    }
    assert!(sum.iter().any(|l| l.trim().starts_with("jg ") || l.trim().starts_with("jle ")));
}

// ── Calling convention and frames ────────────────────────────────────────

#[test]
fn stack_arguments_are_pushed_and_popped() {
    let asm = compile_asm(&call_many(8), &CompileOptions::default());
    let caller = function_lines(&asm, "f_main");
    let push8 = caller.iter().position(|l| l.trim() == "push 8").expect("eighth argument is pushed");
    let push7 = caller.iter().position(|l| l.trim() == "push 7").expect("seventh argument is pushed");
    assert!(push8 < push7, "stack arguments are pushed right to left");
    assert!(caller.iter().any(|l| l.trim() == "mov r9, 6"), "sixth argument goes in r9");
    assert!(caller.iter().any(|l| l.trim().starts_with("add rsp, 16")));

    let callee = function_lines(&asm, "f_many");
    assert!(callee.iter().any(|l| l.contains("[rbp + 16]")), "seventh argument sits above the return address");
    assert!(callee.iter().any(|l| l.contains("[rbp + 24]")));
}

#[test]
fn odd_stack_argument_count_is_padded() {
    let asm = compile_asm(&call_many(7), &CompileOptions::default());
    let caller = function_lines(&asm, "f_main");
    let pad = caller.iter().position(|l| l.trim() == "push 0").expect("padding word is pushed");
    let arg = caller.iter().position(|l| l.trim() == "push 7").expect("seventh argument is pushed");
    assert!(pad < arg, "padding goes below the arguments");
    assert!(caller.iter().any(|l| l.trim().starts_with("add rsp, 16")));
}

#[test]
fn callee_saved_registers_are_preserved() {
    let p = program(vec![fib_fn(), main_fn(vec![Stmt::ret(Some(call_int("fib", vec![Expr::int(10)])))])]);
    let asm = compile_asm(&p, &CompileOptions::default());
    let fib = function_lines(&asm, "f_fib");
    let saved: Vec<&str> = fib
        .iter()
        .filter_map(|l| l.trim().split(';').next())
        .map(str::trim)
        .filter_map(|l| l.strip_prefix("push "))
        .filter(|r| *r != "rbp")
        .collect();
    assert!(!saved.is_empty(), "a value lives across the recursive calls");
    for reg in &saved {
        assert!(["rbx", "r12", "r13", "r14", "r15"].contains(reg), "only callee-saved registers are saved");
        assert!(fib.iter().any(|l| l.trim().starts_with(&format!("pop {reg}"))), "{reg} is restored");
    }
}

#[test]
fn spills_use_frame_slots() {
    // int wide(int a) { int v0 = a + 1; ... ; return v0 + ... + v19; }
    let mut body = Vec::new();
    for k in 0..20 {
        body.push(Stmt::var(
            &format!("v{k}"),
            emx_compiler::ast::Type::Int,
            Some(bin(BinaryOp::Add, int_var("a"), Expr::int(k + 1))),
        ));
    }
    let total = (1..20).fold(int_var("v0"), |acc, k| bin(BinaryOp::Add, acc, int_var(&format!("v{k}"))));
    body.push(Stmt::ret(Some(total)));
    let p = program(vec![
        int_fn("wide", &["a"], body),
        main_fn(vec![Stmt::ret(Some(call_int("wide", vec![Expr::int(0)])))]),
    ]);
    let asm = compile_asm(&p, &CompileOptions::default());
    let wide = function_lines(&asm, "f_wide");
    let sub = wide
        .iter()
        .find_map(|l| l.trim().strip_prefix("sub rsp, "))
        .expect("spill slots need a frame");
    let bytes: usize = sub.split(';').next().unwrap_or("").trim().parse().expect("frame size");
    assert_eq!(bytes % 8, 0);
    assert!(wide.iter().any(|l| l.contains("[rbp - 8]")), "slot 0 sits right below rbp");
    assert!(wide.iter().any(|l| l.contains("spill slot")));
}

#[test]
fn output_is_deterministic() {
    let p = program(vec![fib_fn(), sum_fn(), main_fn(vec![print_int(call_int("fib", vec![Expr::int(5)])), Stmt::ret(Some(Expr::int(0)))])]);
    let first = compile_asm(&p, &CompileOptions::default());
    let second = compile_asm(&p, &CompileOptions::default());
    assert_eq!(first, second);
}
