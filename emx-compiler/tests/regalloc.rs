mod common;

use common::*;
use emx_compiler::ast::{BinaryOp, Expr, Program, Stmt, Type};
use emx_compiler::backend::abi::PhysReg;
use emx_compiler::backend::liveness::Liveness;
use emx_compiler::backend::preprocess::preprocess_function;
use emx_compiler::backend::regalloc::coloring::color;
use emx_compiler::backend::regalloc::{InterferenceGraph, RegisterAllocator};
use emx_compiler::ir::{Address, BinOp, Instr, IrFunction, RegValue};
use emx_compiler::CompileOptions;
use std::collections::BTreeSet;

fn preprocessed(p: &Program, name: &str) -> IrFunction {
    let root = build_ir(p, &CompileOptions::default());
    let mut func = root.function(root.find_function(name).expect("function should exist")).clone();
    preprocess_function(&mut func).expect("preprocess should succeed");
    func
}

fn assert_fully_allocated(func: &IrFunction) {
    for instr in func.instrs() {
        let mut operands: Vec<RegValue> = instr.sources();
        operands.extend(instr.dst().copied());
        assert!(
            operands.iter().all(|v| !matches!(v, RegValue::Vreg(_))),
            "`{instr}` in {} still has a virtual register",
            func.name
        );
    }
}

/// int wide(int a) { int v0 = a + 1; ... int vN = a + N + 1; return v0 + ... + vN; }
fn wide_fn(width: usize) -> emx_compiler::ast::Decl {
    let mut body = Vec::new();
    for k in 0..width {
        body.push(Stmt::var(
            &format!("v{k}"),
            Type::Int,
            Some(bin(BinaryOp::Add, int_var("a"), Expr::int(k as i64 + 1))),
        ));
    }
    let total = (1..width).fold(int_var("v0"), |acc, k| bin(BinaryOp::Add, acc, int_var(&format!("v{k}"))));
    body.push(Stmt::ret(Some(total)));
    int_fn("wide", &["a"], body)
}

fn wide_program(width: usize) -> Program {
    program(vec![wide_fn(width), main_fn(vec![Stmt::ret(Some(call_int("wide", vec![Expr::int(0)])))])])
}

// ── Coloring ─────────────────────────────────────────────────────────────

#[test]
fn coloring_respects_interference() {
    let p = program(vec![fib_fn(), sum_fn(), main_fn(vec![Stmt::ret(Some(Expr::int(0)))])]);
    for name in ["fib", "sum"] {
        let func = preprocessed(&p, name);
        let live = Liveness::analyze(&func);
        let graph = InterferenceGraph::build(&func, &live);
        let colors = color(&graph, &PhysReg::ALLOCATABLE, &BTreeSet::new()).expect("small functions should color");

        for v in graph.nodes() {
            let c = colors[&v];
            for n in graph.neighbors(v) {
                assert_ne!(c, colors[n], "{v} and {n} interfere in {name} but share {c}");
            }
            assert!(!graph.forbidden(v).contains(&c), "{v} got forbidden register {c} in {name}");
        }
    }
}

#[test]
fn values_live_across_calls_avoid_caller_saved_registers() {
    let p = program(vec![fib_fn(), main_fn(vec![Stmt::ret(Some(Expr::int(0)))])]);
    let func = preprocessed(&p, "fib");
    let live = Liveness::analyze(&func);
    let graph = InterferenceGraph::build(&func, &live);

    let mut crossing = BTreeSet::new();
    for &bb in &func.layout {
        let after = live.live_after(&func, bb);
        for (idx, instr) in func.block(bb).instrs.iter().enumerate() {
            if instr.is_call() {
                crossing.extend(after[idx].iter().filter_map(|r| RegValue::from(*r).vreg()));
            }
        }
    }
    assert!(!crossing.is_empty());
    for v in crossing {
        for p in PhysReg::CALLER_SAVED {
            assert!(graph.conflicts_with_phys(v, p), "{v} is live across a call but may take {p}");
        }
    }
}

#[test]
fn divisor_stays_out_of_rax_and_rdx() {
    let a = || int_var("a");
    let b = || int_var("b");
    let p = program(vec![
        int_fn("divmod", &["a", "b"], vec![Stmt::ret(Some(bin(BinaryOp::Add, bin(BinaryOp::Div, a(), b()), bin(BinaryOp::Mod, a(), b()))))]),
        main_fn(vec![Stmt::ret(Some(Expr::int(0)))]),
    ]);
    let mut func = preprocessed(&p, "divmod");
    RegisterAllocator::new().allocate(&mut func).expect("allocation should succeed");
    assert_fully_allocated(&func);

    let mut seen = 0;
    for instr in func.instrs() {
        if let Instr::Binary { op: BinOp::Div | BinOp::Mod, lhs, rhs, .. } = instr {
            seen += 1;
            assert_eq!(*lhs, RegValue::Phys(PhysReg::Rax), "dividend must be in rax");
            assert!(
                !matches!(rhs, RegValue::Phys(PhysReg::Rax | PhysReg::Rdx)),
                "divisor {rhs} would be clobbered by cqo/idiv"
            );
        }
    }
    assert_eq!(seen, 2);
}

#[test]
fn variable_shift_count_goes_through_rcx() {
    let p = program(vec![
        int_fn("shl", &["a", "b"], vec![Stmt::ret(Some(bin(BinaryOp::Shl, int_var("a"), int_var("b"))))]),
        main_fn(vec![Stmt::ret(Some(Expr::int(0)))]),
    ]);
    let mut func = preprocessed(&p, "shl");
    RegisterAllocator::new().allocate(&mut func).expect("allocation should succeed");
    let shift = func
        .instrs()
        .find_map(|i| match i {
            Instr::Binary { op: BinOp::Shl, dst, rhs, .. } => Some((*dst, *rhs)),
            _ => None,
        })
        .expect("shift should survive");
    assert_eq!(shift.1, RegValue::Phys(PhysReg::Rcx));
    assert_ne!(shift.0, RegValue::Phys(PhysReg::Rcx), "the shifted value cannot share cl");
}

// ── Spilling ─────────────────────────────────────────────────────────────

#[test]
fn pressure_beyond_palette_spills() {
    let mut func = preprocessed(&wide_program(20), "wide");
    let stats = RegisterAllocator::new().allocate(&mut func).expect("allocation should converge");
    assert!(stats.spilled > 0, "twenty simultaneously live values cannot fit in fourteen registers");
    assert!(stats.rounds > 1);
    assert_eq!(stats.slots, func.slot_count);
    assert!(func.slot_count > 0);
    assert_fully_allocated(&func);
    assert!(func.instrs().any(|i| matches!(i, Instr::Store { addr: Address::Slot(_), .. })));
    assert!(func.instrs().any(|i| matches!(i, Instr::Load { addr: Address::Slot(_), .. })));
}

#[test]
fn low_pressure_needs_no_slots() {
    let mut func = preprocessed(&wide_program(4), "wide");
    let stats = RegisterAllocator::new().allocate(&mut func).expect("allocation should succeed");
    assert_eq!(stats.rounds, 1);
    assert_eq!(stats.spilled, 0);
    assert_eq!(func.slot_count, 0);
    assert_fully_allocated(&func);
}

#[test]
fn tiny_palette_still_terminates() {
    let palette = [PhysReg::Rbx, PhysReg::R12, PhysReg::R13, PhysReg::R14];
    let allocator = RegisterAllocator::with_palette(&palette);
    let p = program(vec![fib_fn(), sum_fn(), wide_fn(10), main_fn(vec![Stmt::ret(Some(Expr::int(0)))])]);
    for name in ["fib", "sum", "wide"] {
        let mut func = preprocessed(&p, name);
        let stats = allocator.allocate(&mut func).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(stats.rounds <= func.vreg_count() + 1);
        assert_fully_allocated(&func);
        for instr in func.instrs() {
            for v in instr.sources().into_iter().chain(instr.dst().copied()) {
                if let RegValue::Phys(p) = v {
                    let pinned = PhysReg::CALLER_SAVED.contains(&p);
                    assert!(palette.contains(&p) || pinned, "{name} uses {p} outside the palette");
                }
            }
        }
    }
}

#[test]
fn whole_program_allocates() {
    let p = program(vec![fib_fn(), sum_fn(), wide_fn(18), main_fn(vec![Stmt::ret(Some(Expr::int(0)))])]);
    let mut root = build_ir(&p, &CompileOptions::default());
    emx_compiler::backend::preprocess::preprocess(&mut root).expect("preprocess");
    RegisterAllocator::default().run(&mut root).expect("allocate");
    for func in &root.functions {
        assert_fully_allocated(func);
    }
}

// ── Allocated code computes the same results ─────────────────────────────

/// `int helper(int a, int b) { return a * 7 - b; }`
fn helper_fn() -> emx_compiler::ast::Decl {
    int_fn("helper", &["a", "b"], vec![Stmt::ret(Some(bin(BinaryOp::Sub, bin(BinaryOp::Mul, int_var("a"), Expr::int(7)), int_var("b"))))])
}

/// Nine parameters, sixteen temporaries live across a call, and division,
/// remainder and variable shifts on both sides of it.
fn pressure_fn() -> emx_compiler::ast::Decl {
    let p = |k: usize| int_var(&format!("p{k}"));
    let t = |k: usize| int_var(&format!("t{k}"));
    let mut body = Vec::new();
    for k in 0..16 {
        let init = bin(BinaryOp::Add, bin(BinaryOp::Mul, p(k % 9 + 1), Expr::int(k as i64 + 2)), p((k + 4) % 9 + 1));
        body.push(Stmt::var(&format!("t{k}"), Type::Int, Some(init)));
    }
    body.push(Stmt::var("q", Type::Int, Some(bin(BinaryOp::Div, t(0), bin(BinaryOp::Add, p(2), Expr::int(1))))));
    body.push(Stmt::var("r", Type::Int, Some(bin(BinaryOp::Mod, t(1), bin(BinaryOp::Add, p(3), Expr::int(2))))));
    body.push(Stmt::var("s", Type::Int, Some(bin(BinaryOp::Shl, t(2), bin(BinaryOp::BitAnd, p(4), Expr::int(7))))));
    body.push(Stmt::var("c", Type::Int, Some(call_int("helper", vec![int_var("q"), int_var("r")]))));
    body.push(Stmt::var("u", Type::Int, Some(bin(BinaryOp::Div, t(3), bin(BinaryOp::Add, int_var("c"), Expr::int(1000))))));
    body.push(Stmt::var("v", Type::Int, Some(bin(BinaryOp::Shr, t(4), bin(BinaryOp::BitAnd, int_var("c"), Expr::int(3))))));
    body.push(Stmt::var("w", Type::Int, Some(bin(BinaryOp::Mod, t(5), p(9)))));
    let total = (0..16)
        .map(t)
        .chain(["q", "r", "s", "c", "u", "v", "w"].into_iter().map(int_var))
        .chain((1..=9).map(p))
        .reduce(|acc, x| bin(BinaryOp::Add, acc, x))
        .expect("non-empty");
    body.push(Stmt::ret(Some(total)));
    let names: Vec<String> = (1..=9).map(|k| format!("p{k}")).collect();
    let params: Vec<&str> = names.iter().map(String::as_str).collect();
    int_fn("pressure", &params, body)
}

fn pressure_program() -> Program {
    let args = |base: i64| (0..9).map(|k| Expr::int(base + 3 * k)).collect::<Vec<_>>();
    program(vec![
        helper_fn(),
        pressure_fn(),
        main_fn(vec![
            print_int(call_int("pressure", args(1))),
            print_int(call_int("pressure", args(-20))),
            Stmt::ret(Some(bin(BinaryOp::Mod, call_int("pressure", args(7)), Expr::int(251)))),
        ]),
    ])
}

#[test]
fn samples_run_the_same_after_allocation() {
    for name in ["add.json", "countdown.json"] {
        let p = load_sample(name);
        for options in [CompileOptions::default(), CompileOptions { inline: true }] {
            run_both(&p, &options);
        }
    }
    assert_eq!(run_both(&load_sample("add.json"), &CompileOptions::default()), (0, "5\n".to_string()));
    assert_eq!(run_both(&load_sample("countdown.json"), &CompileOptions::default()), (0, "3\n2\n1\nliftoff\n".to_string()));
}

#[test]
fn high_pressure_program_survives_allocation() {
    let p = pressure_program();
    let root = build_ir(&p, &CompileOptions::default());
    let mut func = root.function(root.find_function("pressure").expect("pressure")).clone();
    preprocess_function(&mut func).expect("preprocess");
    let stats = RegisterAllocator::new().allocate(&mut func).expect("allocation should converge");
    assert!(stats.spilled > 0, "more values are live than there are registers");

    let (_, output) = run_both(&p, &CompileOptions::default());
    assert_eq!(output.lines().count(), 2);
    run_both(&p, &CompileOptions { inline: true });
}

#[test]
fn small_palette_computes_the_same() {
    let palette = [PhysReg::Rbx, PhysReg::R12, PhysReg::R13, PhysReg::R14];
    let allocator = RegisterAllocator::with_palette(&palette);
    for p in [pressure_program(), wide_program(12), program(vec![fib_fn(), main_fn(vec![Stmt::ret(Some(call_int("fib", vec![Expr::int(12)])))])])] {
        let root = build_ir(&p, &CompileOptions::default());
        let mut machine = root.clone();
        emx_compiler::backend::preprocess::preprocess(&mut machine).expect("preprocess");
        allocator.run(&mut machine).expect("allocate");
        assert_eq!(run(&machine), run(&root));
    }
}
