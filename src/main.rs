//! Command-line driver: read a program, evaluate it, print the root
//! block's `result._inner`.

use clap::Parser;
use reflex::context::Context;
use reflex::evaluator::evaluate;
use reflex::gc::{CountingAlloc, Flattener};
use reflex::node::{Node, NodeKind};
use reflex::position::{GapStack, Pos};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc;

#[derive(Parser)]
#[command(name = "reflex")]
#[command(about = "Evaluate a Reflex program and print its result")]
struct Cli {
    /// Path to the program
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });
    match run(&cli.file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &PathBuf) -> Result<(), String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading {}: {e}", path.display()))?;
    let file_name = path.to_string_lossy().into_owned();

    let tokens = reflex::lexer::tokenize(&file_name, &source)
        .map_err(|e| format!("failed to tokenize: {e}"))?;
    let ast = reflex::parser::parse(tokens).map_err(|e| format!("failed to parse: {e}"))?;

    let ctx = Context::new();
    let _flattener = Flattener::spawn(ctx.flatten_flag());

    let root = ast
        .to_node(&ctx, &mut Vec::new())
        .map_err(|e| format!("failed to process nodes: {e}"))?;

    // The root stays alive for the whole run: values derived from it
    // reference its scopes through non-owning back edges.
    let driver_pos = Pos::new("<driver>", 0, 0);
    let mut trace = GapStack::new();
    let result_attr = ctx.attrs().get("result");
    let result = evaluate(
        &ctx,
        Node::access(driver_pos, root.clone(), result_attr),
        &mut trace,
    )
    .map_err(|e| format!("failed to evaluate: {e}"))?;

    // A maybe-shaped result reports through its own channel: failures go
    // to stderr, successes print their payload.
    let target = if defines(&ctx, &result, "success") {
        let success = eval_path(&ctx, &mut trace, &result, &["success", "_inner"])?;
        match success.kind() {
            NodeKind::IntLit(0) => {
                let msg = eval_path(&ctx, &mut trace, &result, &["error", "_inner"])?;
                let text = match msg.kind() {
                    NodeKind::StrLit(s) => s.to_string(),
                    _ => "unknown error".to_string(),
                };
                return Err(format!("error: {text}"));
            }
            _ => eval_path(&ctx, &mut trace, &result, &["result"])?,
        }
    } else {
        result
    };

    if !defines(&ctx, &target, "_inner") {
        // A successful maybe without a printable payload.
        return Ok(());
    }
    let inner = eval_path(&ctx, &mut trace, &target, &["_inner"])?;
    print_literal(&inner)
}

fn defines(ctx: &Context, node: &Rc<Node>, name: &str) -> bool {
    node.block_view()
        .map(|view| view.defines(ctx.attrs().get(name)))
        .unwrap_or(false)
}

fn eval_path(
    ctx: &Context,
    trace: &mut GapStack,
    base: &Rc<Node>,
    path: &[&str],
) -> Result<Rc<Node>, String> {
    let pos = Pos::new("<driver>", 0, 0);
    let mut node = base.clone();
    for part in path {
        node = Node::access(pos.clone(), node, ctx.attrs().get(part));
    }
    evaluate(ctx, node, trace).map_err(|e| format!("failed to evaluate: {e}"))
}

fn print_literal(node: &Rc<Node>) -> Result<(), String> {
    match node.kind() {
        NodeKind::IntLit(v) => println!("{v}"),
        NodeKind::FloatLit(v) => println!("{v}"),
        NodeKind::StrLit(s) => println!("{s}"),
        NodeKind::BytesLit(b) => {
            let mut out = std::io::stdout().lock();
            out.write_all(b).and_then(|()| out.write_all(b"\n"))
                .map_err(|e| format!("error writing output: {e}"))?;
        }
        _ => return Err(format!("unexpected result type: {}", node.kind_name())),
    }
    Ok(())
}
