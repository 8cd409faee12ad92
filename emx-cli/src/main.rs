use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use emx_compiler::ast::{BinaryOp, Decl, Expr, ForInit, FuncDecl, Param, Program, Stmt, Type, UnaryOp, VarDecl};
use emx_compiler::backend::compile_ir_to_nasm;
use emx_compiler::ir::interp::Interpreter;
use emx_compiler::scope::GlobalScope;
use emx_compiler::{compile_to_ir, CompileOptions};
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emxc")]
#[command(about = "Compile a typed Mx* syntax tree to x86-64 NASM assembly")]
struct Args {
    /// JSON-encoded syntax tree to compile (a built-in sample when omitted)
    file: Option<PathBuf>,

    /// Write the output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit IR after the IR-level passes. If neither --ir nor --asm is given, defaults to --asm.
    #[arg(long)]
    ir: bool,

    /// Emit NASM assembly
    #[arg(long)]
    asm: bool,

    /// Inline small non-recursive functions
    #[arg(long)]
    inline: bool,

    /// JSON file holding compile options; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interpret the IR instead of emitting code, printing the program output
    #[arg(long)]
    run: bool,

    /// Input served to getInt/getString under --run
    #[arg(long, default_value = "")]
    stdin: String,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG is used otherwise
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_options(args: &Args) -> Result<CompileOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config '{}'", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config '{}'", path.display()))?
        }
        None => CompileOptions::default(),
    };
    if args.inline {
        options.inline = true;
    }
    Ok(options)
}

fn load_program(path: Option<&Path>) -> Result<Program> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading '{}'", path.display()))?;
            parse_program(&text).with_context(|| format!("parsing syntax tree '{}'", path.display()))
        }
        None => Ok(default_sample()),
    }
}

/// Deserialize a syntax tree of any nesting depth, growing the stack on
/// the heap instead of stopping at serde_json's default limit.
fn parse_program(text: &str) -> serde_json::Result<Program> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let program = Program::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(program)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let options = load_options(&args)?;
    let program = load_program(args.file.as_deref())?;
    debug!(decls = program.decls.len(), ?options, "loaded program");

    let scope = GlobalScope::from_program(&program).context("collecting declarations")?;
    let mut ir = compile_to_ir(&program, &scope, &options).context("building IR")?;

    if args.run {
        let result = Interpreter::new(&ir).with_input(&args.stdin).run().context("interpreting IR")?;
        print!("{}", result.output);
        std::io::stdout().flush()?;
        info!(exit = result.value, "program finished");
        std::process::exit((result.value & 0xff) as i32);
    }

    let want_ir = args.ir;
    let want_asm = args.asm || !args.ir;

    let mut text = String::new();
    if want_ir {
        text.push_str(&ir.to_string());
        if want_asm {
            text.push('\n');
        }
    }
    if want_asm {
        let asm = compile_ir_to_nasm(&mut ir).context("generating assembly")?;
        text.push_str(&asm.join());
    }

    match &args.output {
        Some(path) => fs::write(path, text).with_context(|| format!("writing '{}'", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

/// `int sum(int n) { int s = 0; for (int i = 1; i <= n; ++i) s = s + i; return s; }`
/// `int main() { printlnInt(sum(10)); return 0; }`
fn default_sample() -> Program {
    let int = || Type::Int;
    let n = || Expr::ident("n", int());
    let s = || Expr::ident("s", int());
    let i = || Expr::ident("i", int());

    let sum = FuncDecl::new(
        "sum",
        int(),
        vec![Param::new("n", int())],
        vec![
            Stmt::var("s", int(), Some(Expr::int(0))),
            Stmt::For {
                init: Some(ForInit::Decls(vec![VarDecl::new("i", int(), Some(Expr::int(1)))])),
                cond: Some(Expr::binary(BinaryOp::Le, i(), n())),
                step: Some(Expr::unary(UnaryOp::PreInc, i())),
                body: Box::new(Stmt::expr(Expr::assign(s(), Expr::binary(BinaryOp::Add, s(), i())))),
            },
            Stmt::ret(Some(s())),
        ],
    );
    let main = FuncDecl::new(
        "main",
        int(),
        Vec::new(),
        vec![
            Stmt::expr(Expr::call(
                "printlnInt",
                vec![Expr::call("sum", vec![Expr::int(10)], int())],
                Type::Void,
            )),
            Stmt::ret(Some(Expr::int(0))),
        ],
    );
    Program { decls: vec![Decl::Func(sum), Decl::Func(main)] }
}
