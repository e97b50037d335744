//! Standard-library blocks.
//!
//! `errors` and `collections` are Reflex source blobs evaluated through
//! the ordinary pipeline at context construction. `io` is the same, plus
//! host-backed stream blocks grafted over its placeholders; every stream
//! operation reports through the `maybe` shape instead of failing the
//! program.

use crate::builtins::{named_lit, BuiltInOp};
use crate::context::Context;
use crate::node::{block_with_overrides, Node};
use crate::position::Pos;
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use std::rc::Rc;

const ERRORS_SRC: &str = include_str!("stdlib/errors.rfx");
const IO_SRC: &str = include_str!("stdlib/io.rfx");
const COLLECTIONS_SRC: &str = include_str!("stdlib/collections.rfx");

/// Build and register the three standard-library blocks. Called once
/// from `Context::new`; the embedded sources are part of the build, so a
/// failure here is a packaging defect, not user error.
pub(crate) fn install(ctx: &Context) {
    ctx.register_builtin("errors", source_block(ctx, "errors", ERRORS_SRC));
    ctx.register_builtin("collections", source_block(ctx, "collections", COLLECTIONS_SRC));
    ctx.register_builtin("io", io_block(ctx));
}

fn source_block(ctx: &Context, name: &str, src: &str) -> Rc<Node> {
    let file = format!("<stdlib/{name}>");
    let build = || -> Result<Rc<Node>, crate::Error> {
        let tokens = crate::lexer::tokenize(&file, src)?;
        let ast = crate::parser::parse(tokens)?;
        ast.to_node(ctx, &mut Vec::new())
    };
    build().unwrap_or_else(|e| panic!("embedded stdlib module {name:?} is broken: {e}"))
}

fn io_block(ctx: &Context) -> Rc<Node> {
    let base = source_block(ctx, "io", IO_SRC);
    let pos = Pos::builtin("builtin/io");
    let mut extra = FxHashMap::default();
    extra.insert(ctx.attrs().get("stdin"), stream_block(ctx, StdStream::In));
    extra.insert(ctx.attrs().get("stdout"), stream_block(ctx, StdStream::Out));
    extra.insert(ctx.attrs().get("stderr"), stream_block(ctx, StdStream::Err));
    block_with_overrides(ctx.edges(), &base, pos, extra)
}

#[derive(Clone, Copy)]
enum StdStream {
    In,
    Out,
    Err,
}

impl StdStream {
    fn write(self, bytes: &[u8]) -> std::io::Result<usize> {
        match self {
            StdStream::In => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "stdin is not writable",
            )),
            StdStream::Out => {
                let mut out = std::io::stdout().lock();
                out.write_all(bytes)?;
                Ok(bytes.len())
            }
            StdStream::Err => {
                let mut err = std::io::stderr().lock();
                err.write_all(bytes)?;
                Ok(bytes.len())
            }
        }
    }

    fn read(self, n: usize) -> std::io::Result<Vec<u8>> {
        match self {
            StdStream::In => {
                let mut buf = vec![0u8; n];
                let got = std::io::stdin().lock().read(&mut buf)?;
                buf.truncate(got);
                Ok(buf)
            }
            StdStream::Out | StdStream::Err => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "output streams are not readable",
            )),
        }
    }

    fn close(self) -> std::io::Result<()> {
        // Closing the process streams is a flush; the descriptors belong
        // to the host.
        match self {
            StdStream::In => Ok(()),
            StdStream::Out => std::io::stdout().lock().flush(),
            StdStream::Err => std::io::stderr().lock().flush(),
        }
    }
}

/// A stream block: `write(bytes=…)!`, `read(n=…)!`, and `close!`, each
/// producing a `maybe`.
fn stream_block(ctx: &Context, stream: StdStream) -> Rc<Node> {
    let reg = ctx.edges();
    let pos = Pos::builtin("builtin/io:file");

    Node::block(reg, pos.clone(), |_file| {
        let mut defs = FxHashMap::default();

        let write_pos = pos.clone();
        defs.insert(
            ctx.attrs().get("write"),
            op_sub_block(ctx, pos.clone(), move |op| {
                Node::builtin_op(
                    ctx.edges(),
                    write_pos.clone(),
                    op,
                    BuiltInOp::host(&["bytes._inner"], move |ctx, args| {
                        let bytes: Vec<u8> = named_lit("bytes", &args[0])?;
                        let at = args[0].pos().clone();
                        Ok(match stream.write(&bytes) {
                            Ok(n) => {
                                let count = ctx.int_node(at.clone(), n as i64);
                                ctx.maybe(at, Some(count), None)
                            }
                            Err(e) => ctx.maybe(at, None, Some(&e.to_string())),
                        })
                    }),
                )
            }),
        );

        let read_pos = pos.clone();
        defs.insert(
            ctx.attrs().get("read"),
            op_sub_block(ctx, pos.clone(), move |op| {
                Node::builtin_op(
                    ctx.edges(),
                    read_pos.clone(),
                    op,
                    BuiltInOp::host(&["n._inner"], move |ctx, args| {
                        let n: i64 = named_lit("n", &args[0])?;
                        let at = args[0].pos().clone();
                        Ok(match stream.read(n.max(0) as usize) {
                            Ok(buf) => {
                                let bytes = ctx.bytes_node(at.clone(), buf);
                                ctx.maybe(at, Some(bytes), None)
                            }
                            Err(e) => ctx.maybe(at, None, Some(&e.to_string())),
                        })
                    }),
                )
            }),
        );

        let close_pos = pos.clone();
        defs.insert(
            ctx.attrs().get("close"),
            op_sub_block(ctx, pos.clone(), move |op| {
                Node::builtin_op(
                    ctx.edges(),
                    close_pos.clone(),
                    op,
                    BuiltInOp::host(&[], move |ctx, _args| {
                        Ok(match stream.close() {
                            Ok(()) => ctx.maybe(Pos::builtin("builtin/io:file"), None, None),
                            Err(e) => ctx.maybe(
                                Pos::builtin("builtin/io:file"),
                                None,
                                Some(&e.to_string()),
                            ),
                        })
                    }),
                )
            }),
        );

        defs
    })
}

/// `{ result = <op> }` — the shape every stream operation shares.
fn op_sub_block(
    ctx: &Context,
    pos: Pos,
    make_op: impl FnOnce(&Rc<Node>) -> Rc<Node>,
) -> Rc<Node> {
    Node::block(ctx.edges(), pos, |scope| {
        let mut defs = FxHashMap::default();
        defs.insert(ctx.attrs().get("result"), make_op(scope));
        defs
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::evaluate;
    use crate::node::NodeKind;
    use crate::position::GapStack;

    fn pos() -> Pos {
        Pos::new("test", 1, 1)
    }

    fn run(code: &str) -> Rc<Node> {
        let ctx = Context::new();
        let toks = crate::lexer::tokenize("test", code).unwrap();
        let ast = crate::parser::parse(toks).unwrap();
        let root = ast.to_node(&ctx, &mut Vec::new()).unwrap();
        let access = Node::access(
            pos(),
            Node::access(pos(), root, ctx.attrs().get("result")),
            ctx.attrs().get("_inner"),
        );
        evaluate(&ctx, access, &mut GapStack::new()).unwrap()
    }

    fn expect_str(node: &Rc<Node>, want: &str) {
        match &node.kind {
            NodeKind::StrLit(s) => assert_eq!(&**s, want),
            _ => panic!("expected str, got {}", node.kind_name()),
        }
    }

    #[test]
    fn test_errors_module_shape() {
        let out = run(
            "maybe = \"stdlib/errors\".import!.maybe
             result = maybe.success",
        );
        assert!(matches!(out.kind, NodeKind::IntLit(1)));
    }

    #[test]
    fn test_list_fill_and_at() {
        let out = run(
            "List = \"stdlib/collections\".import!.List
             l = List(len=3 value=2)
             result = l.at(idx=1)!",
        );
        assert!(matches!(out.kind, NodeKind::IntLit(2)));
    }

    #[test]
    fn test_list_set_shadows_one_index() {
        let out = run(
            "List = \"stdlib/collections\".import!.List
             l = List(len=3 value=2).set(idx=1 value=9)!
             result = l.at(idx=1)!.str + \" \" + l.at(idx=0)!.str + l.at(idx=2)!.str",
        );
        expect_str(&out, "9 22");
    }

    #[test]
    fn test_list_map_and_sum() {
        let out = run(
            "List = \"stdlib/collections\".import!.List
             l = List(len=7 value=2)
               .set(idx=2 value=3)!
               .set(idx=5 value=8)!
               .set(idx=6 value=7)!
             result = l.map(fn={result = x.str + \" \"})!.sum!",
        );
        expect_str(&out, "2 2 3 2 2 8 7 ");
    }

    #[test]
    fn test_list_sum_of_ints() {
        let out = run(
            "List = \"stdlib/collections\".import!.List
             result = List(len=4 value=5).sum!",
        );
        assert!(matches!(out.kind, NodeKind::IntLit(20)));
    }

    #[test]
    fn test_stdout_write_returns_maybe() {
        // Writing an empty byte string exercises the plumbing without
        // polluting test output.
        let out = run(
            "io = \"stdlib/io\".import!
             result = io.stdout.write(bytes=\"\".bytes)!.success",
        );
        assert!(matches!(out.kind, NodeKind::IntLit(1)));
    }

    #[test]
    fn test_stdin_write_reports_failure() {
        let out = run(
            "io = \"stdlib/io\".import!
             result = io.stdin.write(bytes=\"x\".bytes)!.success",
        );
        assert!(matches!(out.kind, NodeKind::IntLit(0)));
    }

    #[test]
    fn test_close_flushes_and_succeeds() {
        let out = run(
            "io = \"stdlib/io\".import!
             result = io.stderr.close!.success",
        );
        assert!(matches!(out.kind, NodeKind::IntLit(1)));
    }
}
