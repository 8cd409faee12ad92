mod common;

use common::*;
use emx_compiler::ast::{BinaryOp, Decl, Expr, Stmt, Type, VarDecl};
use emx_compiler::ir::opt::inline::{CallGraph, FunctionInliner, CALLEE_INSTR_LIMIT};
use emx_compiler::ir::opt::static_data::cache_globals;
use emx_compiler::ir::opt::{IrPass, StaticDataProcessor, TwoOperandTransformer};
use emx_compiler::ir::{Address, Callee, Instr, IrRoot, StaticInit};
use emx_compiler::CompileOptions;

fn inlined() -> CompileOptions {
    CompileOptions { inline: true }
}

fn calls_to(root: &IrRoot, caller: &str, callee: &str) -> usize {
    let target = root.find_function(callee).expect("callee should exist");
    let f = root.function(root.find_function(caller).expect("caller should exist"));
    f.instrs()
        .filter(|i| matches!(i, Instr::Call { callee: Callee::Function(c), .. } if *c == target))
        .count()
}

/// int sq(int x) { return x * x; }
fn square_fn() -> Decl {
    int_fn("sq", &["x"], vec![Stmt::ret(Some(bin(BinaryOp::Mul, int_var("x"), int_var("x"))))])
}

// ── Two-operand form ─────────────────────────────────────────────────────

#[test]
fn two_operand_form_keeps_results() {
    // Non-commutative operators are the interesting case.
    let a = || int_var("a");
    let b = || int_var("b");
    let p = program(vec![
        int_fn(
            "mix",
            &["a", "b"],
            vec![Stmt::ret(Some(bin(
                BinaryOp::Sub,
                bin(BinaryOp::Div, bin(BinaryOp::Shl, a(), Expr::int(3)), b()),
                bin(BinaryOp::Mod, a(), b()),
            )))],
        ),
        main_fn(vec![Stmt::ret(Some(call_int("mix", vec![Expr::int(17), Expr::int(5)])))]),
    ]);
    let raw = build_raw(&p);
    let expected = run(&raw).0;
    assert_eq!(expected, (17 << 3) / 5 - 17 % 5);

    let mut root = raw.clone();
    let mix = root.find_function("mix").expect("mix");
    let n = TwoOperandTransformer::rewrite_function(&mut root.functions[mix.0]);
    assert!(n >= 4, "every three-address binary should be rewritten, got {n}");
    for instr in root.function(mix).instrs() {
        if let Instr::Binary { dst, lhs, .. } = instr {
            assert_eq!(dst, lhs, "`{instr}` should be destructive");
        }
    }
    assert_eq!(run(&root).0, expected);
}

#[test]
fn two_operand_rewrite_is_idempotent() {
    let p = program(vec![sum_fn(), main_fn(vec![Stmt::ret(Some(call_int("sum", vec![Expr::int(4)])))])]);
    let mut root = build_raw(&p);
    let sum = root.find_function("sum").expect("sum");
    TwoOperandTransformer::rewrite_function(&mut root.functions[sum.0]);
    let again = TwoOperandTransformer::rewrite_function(&mut root.functions[sum.0]);
    assert_eq!(again, 0);
}

// ── Inlining ─────────────────────────────────────────────────────────────

#[test]
fn small_leaf_is_inlined() {
    let p = program(vec![
        square_fn(),
        main_fn(vec![Stmt::ret(Some(bin(
            BinaryOp::Add,
            call_int("sq", vec![Expr::int(3)]),
            call_int("sq", vec![Expr::int(4)]),
        )))]),
    ]);
    let plain = build_ir(&p, &CompileOptions::default());
    let root = build_ir(&p, &inlined());
    assert_eq!(calls_to(&plain, "main", "sq"), 2);
    assert_eq!(calls_to(&root, "main", "sq"), 0, "both calls should be replaced");

    let main = root.function(root.find_function("main").expect("main"));
    let names: Vec<&str> = main.layout.iter().map(|b| main.block(*b).name.as_str()).collect();
    assert!(names.contains(&"inline_join"), "call site should be split: {names:?}");
    assert!(names.iter().any(|n| n.starts_with("sq_")), "callee blocks should be copied: {names:?}");

    assert_eq!(run(&root).0, 25);
    assert_eq!(run(&plain).0, 25);
}

#[test]
fn recursive_functions_are_not_inlined() {
    let p = program(vec![fib_fn(), main_fn(vec![Stmt::ret(Some(call_int("fib", vec![Expr::int(10)])))])]);
    let root = build_ir(&p, &inlined());
    assert_eq!(calls_to(&root, "main", "fib"), 1);
    assert_eq!(calls_to(&root, "fib", "fib"), 2);
    assert_eq!(run(&root).0, 55);
}

#[test]
fn mutual_recursion_is_detected() {
    // int even(int n) { if (n == 0) return 1; return odd(n - 1); }
    // int odd(int n)  { if (n == 0) return 0; return even(n - 1); }
    let n = || int_var("n");
    let parity = |name: &str, base: i64, other: &str| {
        int_fn(
            name,
            &["n"],
            vec![
                Stmt::If {
                    cond: bin(BinaryOp::Eq, n(), Expr::int(0)),
                    then_branch: Box::new(Stmt::ret(Some(Expr::int(base)))),
                    else_branch: None,
                },
                Stmt::ret(Some(call_int(other, vec![bin(BinaryOp::Sub, n(), Expr::int(1))]))),
            ],
        )
    };
    let p = program(vec![
        parity("even", 1, "odd"),
        parity("odd", 0, "even"),
        main_fn(vec![Stmt::ret(Some(call_int("even", vec![Expr::int(7)])))]),
    ]);
    let raw = build_raw(&p);
    let graph = CallGraph::build(&raw);
    let recursive = graph.recursive_functions();
    let even = raw.find_function("even").expect("even");
    let odd = raw.find_function("odd").expect("odd");
    let main = raw.find_function("main").expect("main");
    assert!(recursive.contains(&even) && recursive.contains(&odd));
    assert!(!recursive.contains(&main));
    assert!(graph.callees(main).any(|c| c == even));

    let root = build_ir(&p, &inlined());
    assert_eq!(calls_to(&root, "even", "odd"), 1);
    assert_eq!(calls_to(&root, "odd", "even"), 1);
    assert_eq!(run(&root).0, 0);
}

#[test]
fn sccs_list_callees_first() {
    let p = program(vec![
        square_fn(),
        int_fn("quad", &["x"], vec![Stmt::ret(Some(call_int("sq", vec![call_int("sq", vec![int_var("x")])])))]),
        main_fn(vec![Stmt::ret(Some(call_int("quad", vec![Expr::int(2)])))]),
    ]);
    let root = build_raw(&p);
    let order: Vec<_> = CallGraph::build(&root).sccs().into_iter().flatten().collect();
    let pos = |name: &str| {
        let id = root.find_function(name).expect("function");
        order.iter().position(|f| *f == id).expect("every function is in some component")
    };
    assert!(pos("sq") < pos("quad"));
    assert!(pos("quad") < pos("main"));
}

#[test]
fn nested_inlining_flattens_chain() {
    let p = program(vec![
        square_fn(),
        int_fn("quad", &["x"], vec![Stmt::ret(Some(call_int("sq", vec![call_int("sq", vec![int_var("x")])])))]),
        main_fn(vec![Stmt::ret(Some(call_int("quad", vec![Expr::int(2)])))]),
    ]);
    let root = build_ir(&p, &inlined());
    assert_eq!(calls_to(&root, "main", "quad"), 0);
    assert_eq!(calls_to(&root, "main", "sq"), 0);
    assert_eq!(run(&root).0, 16);
}

#[test]
fn oversized_callee_is_kept() {
    // A straight-line body longer than the inlining threshold.
    let mut body = vec![Stmt::var("acc", Type::Int, Some(int_var("x")))];
    for k in 0..CALLEE_INSTR_LIMIT {
        let acc = || int_var("acc");
        body.push(Stmt::expr(Expr::assign(acc(), bin(BinaryOp::Add, acc(), Expr::int(k as i64)))));
    }
    body.push(Stmt::ret(Some(int_var("acc"))));
    let p = program(vec![
        int_fn("big", &["x"], body),
        main_fn(vec![Stmt::ret(Some(call_int("big", vec![Expr::int(1)])))]),
    ]);
    let mut root = build_ir(&p, &CompileOptions::default());
    FunctionInliner::default().run(&mut root);
    assert_eq!(calls_to(&root, "main", "big"), 1);
}

// ── Static data ──────────────────────────────────────────────────────────

#[test]
fn identical_strings_share_one_symbol() {
    let say = |s: &str| Stmt::expr(Expr::call("print", vec![Expr::str(s)], Type::Void));
    let p = program(vec![main_fn(vec![say("hi"), say("there"), say("hi"), Stmt::ret(Some(Expr::int(0)))])]);
    let raw = build_raw(&p);
    let raw_strings = raw.statics.iter().filter(|s| matches!(s.init, StaticInit::Str(_))).count();
    assert_eq!(raw_strings, 3);

    let root = build_ir(&p, &CompileOptions::default());
    let strings: Vec<_> = root.statics.iter().filter(|s| matches!(s.init, StaticInit::Str(_))).collect();
    assert_eq!(strings.len(), 2, "the two \"hi\" literals should be coalesced");
    for s in &strings {
        assert!(s.label.starts_with("__static_str_"), "bad string label {}", s.label);
    }
    assert_eq!(run(&root).1, "hitherehi");
}

#[test]
fn unused_globals_are_dropped() {
    let p = program(vec![
        Decl::Var(VarDecl::new("unused", Type::Int, None)),
        Decl::Var(VarDecl::new("counter", Type::Int, Some(Expr::int(5)))),
        main_fn(vec![Stmt::ret(Some(int_var("counter")))]),
    ]);
    let root = build_ir(&p, &CompileOptions::default());
    assert_eq!(root.statics.len(), 1);
    assert_eq!(root.statics[0].label, "__static_var_0_counter");
    assert_eq!(run(&root).0, 5);
}

#[test]
fn globals_cached_in_call_free_function() {
    // int g; int bump() { g = g + 1; g = g + 1; return g; }
    let g = || int_var("g");
    let incr = || Stmt::expr(Expr::assign(g(), bin(BinaryOp::Add, g(), Expr::int(1))));
    let p = program(vec![
        Decl::Var(VarDecl::new("g", Type::Int, Some(Expr::int(10)))),
        int_fn("bump", &[], vec![incr(), incr(), Stmt::ret(Some(g()))]),
        main_fn(vec![
            Stmt::expr(call_int("bump", Vec::new())),
            Stmt::ret(Some(bin(BinaryOp::Add, call_int("bump", Vec::new()), g()))),
        ]),
    ]);
    let mut root = build_raw(&p);
    let bump = root.find_function("bump").expect("bump");
    root.functions[bump.0].compute_cfg().expect("cfg");
    let statics = root.statics.clone();
    cache_globals(&mut root.functions[bump.0], &statics);

    let f = root.function(bump);
    assert_eq!(f.block(f.entry).name, "global_cache");
    let loads = f.instrs().filter(|i| matches!(i, Instr::Load { addr: Address::Static(_), .. })).count();
    let stores = f.instrs().filter(|i| matches!(i, Instr::Store { addr: Address::Static(_), .. })).count();
    assert_eq!(loads, 1, "one load on entry");
    assert_eq!(stores, 1, "one write-back before the single return");
    assert_eq!(run(&root).0, 14 + 14);
}

#[test]
fn functions_with_calls_keep_memory_accesses() {
    let g = || int_var("g");
    let p = program(vec![
        Decl::Var(VarDecl::new("g", Type::Int, Some(Expr::int(1)))),
        main_fn(vec![
            Stmt::expr(Expr::assign(g(), Expr::int(2))),
            print_int(g()),
            Stmt::ret(Some(g())),
        ]),
    ]);
    let mut root = build_raw(&p);
    StaticDataProcessor.run(&mut root);
    let main = root.function(root.find_function("main").expect("main"));
    assert_ne!(main.block(main.entry).name, "global_cache");
    assert_eq!(run(&root), (2, "2\n".to_string()));
}
