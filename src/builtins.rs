//! Built-in operations and the literal prototype blocks.
//!
//! A built-in op is a small coroutine driven by the evaluator: `next`
//! either yields the final result or names a sub-expression to evaluate
//! first, and `tell` feeds the reduced sub-expression back, producing the
//! op's next state. Expressing ops as plain state values (instead of
//! suspended stack frames) keeps the evaluator a simple state machine and
//! makes every op trivially cloneable mid-flight.
//!
//! Three strategies cover everything:
//!
//! - [`HostOp`] fetches a list of attribute paths from its enclosing
//!   scope, then hands the resolved literals to a typed host function.
//!   All arithmetic, comparisons, conversions, indexing, `substr`,
//!   `slice`, `import`, and `panic` are host ops.
//! - The select op reads `cond._inner` and yields the `true` or `false`
//!   branch without ever touching the other one.
//! - The logic op implements `&&`/`||` over operand blocks, returning the
//!   last-evaluated operand rather than a normalized boolean.

use crate::attr::{Attr, AttrTable};
use crate::backedge::BackEdges;
use crate::context::Context;
use crate::node::{block_with_overrides, Node};
use crate::position::Pos;
use crate::Error;
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;

/// What the evaluator should do after a `next` call.
pub enum Step {
    /// Continue evaluating this node; it is the op's output and need not
    /// be terminal itself.
    Done(Rc<Node>),
    /// Fully evaluate this sub-expression, then `tell` the op about it.
    Eval(Rc<Node>),
}

type HostFn = dyn Fn(&Context, &[Rc<Node>]) -> Result<Rc<Node>, Error>;

#[derive(Clone)]
pub enum BuiltInOp {
    Host(HostOp),
    Select(SelectOp),
    Logic(LogicOp),
}

#[derive(Clone)]
pub struct HostOp {
    /// Dotted attribute paths resolved against the op's scope, e.g.
    /// `"x._inner"`.
    paths: Rc<[&'static str]>,
    found: Vec<Option<Rc<Node>>>,
    host: Rc<HostFn>,
}

#[derive(Clone)]
pub struct SelectOp {
    /// `None` until the condition has been supplied; then the branch
    /// attribute name.
    chosen: Option<&'static str>,
}

#[derive(Clone)]
pub struct LogicOp {
    is_and: bool,
    state: LogicState,
}

#[derive(Clone)]
enum LogicState {
    Start,
    HaveX(Rc<Node>),
    Final(Rc<Node>),
}

impl BuiltInOp {
    pub fn host(
        paths: &'static [&'static str],
        f: impl Fn(&Context, &[Rc<Node>]) -> Result<Rc<Node>, Error> + 'static,
    ) -> BuiltInOp {
        BuiltInOp::Host(HostOp {
            paths: paths.into(),
            found: vec![None; paths.len()],
            host: Rc::new(f),
        })
    }

    pub fn select() -> BuiltInOp {
        BuiltInOp::Select(SelectOp { chosen: None })
    }

    pub fn logic(is_and: bool) -> BuiltInOp {
        BuiltInOp::Logic(LogicOp {
            is_and,
            state: LogicState::Start,
        })
    }

    /// Advance the op. `scope` is the block the op is embedded in.
    pub fn next(&self, ctx: &Context, scope: &Rc<Node>) -> Result<Step, Error> {
        match self {
            BuiltInOp::Host(op) => {
                let mut args = Vec::with_capacity(op.paths.len());
                for (i, path) in op.paths.iter().enumerate() {
                    match &op.found[i] {
                        Some(v) => args.push(v.clone()),
                        None => return Ok(Step::Eval(access_path(ctx, scope, path))),
                    }
                }
                (op.host)(ctx, &args).map(Step::Done)
            }
            BuiltInOp::Select(op) => match op.chosen {
                Some(branch) => Ok(Step::Done(access_path(ctx, scope, branch))),
                None => Ok(Step::Eval(access_path(ctx, scope, "cond._inner"))),
            },
            BuiltInOp::Logic(op) => match &op.state {
                LogicState::Final(node) => Ok(Step::Done(node.clone())),
                LogicState::HaveX(x) => Ok(Step::Eval(access_path(ctx, x, "_inner"))),
                LogicState::Start => Ok(Step::Eval(access_path(ctx, scope, "x"))),
            },
        }
    }

    /// Feed the reduced sub-expression back, yielding the op's next state.
    pub fn tell(&self, ctx: &Context, scope: &Rc<Node>, value: Rc<Node>) -> Result<BuiltInOp, Error> {
        match self {
            BuiltInOp::Host(op) => {
                let mut next = op.clone();
                for slot in next.found.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(value);
                        break;
                    }
                }
                Ok(BuiltInOp::Host(next))
            }
            BuiltInOp::Select(_) => {
                let cond: i64 = named_lit("cond", &value)?;
                Ok(BuiltInOp::Select(SelectOp {
                    chosen: Some(if cond != 0 { "true" } else { "false" }),
                }))
            }
            BuiltInOp::Logic(op) => match &op.state {
                LogicState::Start => Ok(BuiltInOp::Logic(LogicOp {
                    is_and: op.is_and,
                    state: LogicState::HaveX(value),
                })),
                LogicState::HaveX(x) => {
                    let truth: i64 = named_lit("x", &value)?;
                    let keep_going =
                        (op.is_and && truth != 0) || (!op.is_and && truth == 0);
                    let final_node = if keep_going {
                        access_path(ctx, scope, "y")
                    } else {
                        x.clone()
                    };
                    Ok(BuiltInOp::Logic(LogicOp {
                        is_and: op.is_and,
                        state: LogicState::Final(final_node),
                    }))
                }
                LogicState::Final(_) => panic!("tell on a finished logic op"),
            },
        }
    }
}

impl fmt::Debug for BuiltInOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltInOp::Host(op) => write!(f, "Host({:?})", op.paths),
            BuiltInOp::Select(_) => write!(f, "Select"),
            BuiltInOp::Logic(op) => {
                write!(f, "Logic({})", if op.is_and { "and" } else { "or" })
            }
        }
    }
}

/// Build the access chain for a dotted path rooted at `base`.
fn access_path(ctx: &Context, base: &Rc<Node>, path: &str) -> Rc<Node> {
    let mut node = base.clone();
    for part in path.split('.') {
        node = Node::access(base.pos().clone(), node, ctx.attrs().get(part));
    }
    node
}

// ---------------------------------------------------------------------
// Typed literal extraction and construction
// ---------------------------------------------------------------------

/// Rust types that mirror a literal node kind. Host functions extract
/// their arguments and produce their results through this trait; type
/// mismatches surface as positioned errors.
pub(crate) trait Literal: Sized + 'static {
    /// "an int", for unnamed "value is not an int" messages.
    const BARE: &'static str;
    /// "an int value", for "x argument is not an int value" messages.
    const NAMED: &'static str;

    fn from_node(node: &Node) -> Option<Self>;
    fn into_node(self, ctx: &Context, pos: Pos) -> Rc<Node>;
}

impl Literal for i64 {
    const BARE: &'static str = "an int";
    const NAMED: &'static str = "an int value";

    fn from_node(node: &Node) -> Option<Self> {
        match node.kind {
            crate::node::NodeKind::IntLit(v) => Some(v),
            _ => None,
        }
    }

    fn into_node(self, ctx: &Context, pos: Pos) -> Rc<Node> {
        ctx.int_node(pos, self)
    }
}

impl Literal for f64 {
    const BARE: &'static str = "a float";
    const NAMED: &'static str = "a float value";

    fn from_node(node: &Node) -> Option<Self> {
        match node.kind {
            crate::node::NodeKind::FloatLit(v) => Some(v),
            _ => None,
        }
    }

    fn into_node(self, ctx: &Context, pos: Pos) -> Rc<Node> {
        ctx.float_node(pos, self)
    }
}

impl Literal for String {
    const BARE: &'static str = "a string";
    const NAMED: &'static str = "a str value";

    fn from_node(node: &Node) -> Option<Self> {
        match &node.kind {
            crate::node::NodeKind::StrLit(s) => Some(s.to_string()),
            _ => None,
        }
    }

    fn into_node(self, ctx: &Context, pos: Pos) -> Rc<Node> {
        ctx.str_node(pos, self)
    }
}

impl Literal for Vec<u8> {
    const BARE: &'static str = "bytes";
    const NAMED: &'static str = "a bytes value";

    fn from_node(node: &Node) -> Option<Self> {
        match &node.kind {
            crate::node::NodeKind::BytesLit(b) => Some(b.to_vec()),
            _ => None,
        }
    }

    fn into_node(self, ctx: &Context, pos: Pos) -> Rc<Node> {
        ctx.bytes_node(pos, self)
    }
}

/// Extract an unnamed literal argument ("value is not an int").
pub(crate) fn lit<T: Literal>(node: &Rc<Node>) -> Result<T, Error> {
    T::from_node(node)
        .ok_or_else(|| Error::op(format!("value is not {}", T::BARE), node.pos().clone()))
}

/// Extract a named literal argument ("x argument is not an int value").
pub(crate) fn named_lit<T: Literal>(name: &str, node: &Rc<Node>) -> Result<T, Error> {
    T::from_node(node).ok_or_else(|| {
        Error::op(
            format!("{name} argument is not {}", T::NAMED),
            node.pos().clone(),
        )
    })
}

// ---------------------------------------------------------------------
// Prototype construction
// ---------------------------------------------------------------------

/// The four literal prototypes, built once per context and structurally
/// shared by every literal value.
pub struct Protos {
    pub int: Rc<Node>,
    pub float: Rc<Node>,
    pub string: Rc<Node>,
    pub bytes: Rc<Node>,
}

/// Ambient handles used while assembling prototypes; the full `Context`
/// does not exist yet at that point.
struct ProtoBuilder<'a> {
    attrs: &'a AttrTable,
    reg: &'a BackEdges,
    pos: Pos,
}

impl<'a> ProtoBuilder<'a> {
    fn attr(&self, name: &str) -> Attr {
        self.attrs.get(name)
    }
}

pub fn build_protos(attrs: &AttrTable, reg: &BackEdges) -> Protos {
    // Order matters: the string prototype embeds an int literal.
    let int = int_proto(attrs, reg);
    let float = float_proto(attrs, reg);
    let string = str_proto(attrs, reg, &int);
    let bytes = bytes_proto(attrs, reg, &int);
    Protos {
        int,
        float,
        string,
        bytes,
    }
}

/// A binary operator sub-block: `{ x = <back edge to the receiver>,
/// result = <host op over x._inner and y._inner> }`. The caller supplies
/// `y` by overriding.
fn fallible_binary<T1, T2, R>(
    p: &ProtoBuilder<'_>,
    parent: &Rc<Node>,
    f: impl Fn(T1, T2) -> Result<R, Error> + 'static,
) -> Rc<Node>
where
    T1: Literal,
    T2: Literal,
    R: Literal,
{
    Node::block(p.reg, p.pos.clone(), |op| {
        let mut defs = FxHashMap::default();
        defs.insert(p.attr("x"), Node::back_edge(p.reg, p.pos.clone(), parent));
        defs.insert(
            p.attr("result"),
            Node::builtin_op(
                p.reg,
                p.pos.clone(),
                op,
                BuiltInOp::host(&["x._inner", "y._inner"], move |ctx, args| {
                    let x: T1 = named_lit("x", &args[0])?;
                    let y: T2 = named_lit("y", &args[1])?;
                    Ok(f(x, y)?.into_node(ctx, args[0].pos().clone()))
                }),
            ),
        );
        defs
    })
}

fn binary<T1, T2, R>(
    p: &ProtoBuilder<'_>,
    parent: &Rc<Node>,
    f: impl Fn(T1, T2) -> R + 'static,
) -> Rc<Node>
where
    T1: Literal,
    T2: Literal,
    R: Literal,
{
    fallible_binary(p, parent, move |x, y| Ok(f(x, y)))
}

/// A unary operator: a host op over the receiver's own `_inner`,
/// triggered directly by attribute access.
fn fallible_unary<T, R>(
    p: &ProtoBuilder<'_>,
    parent: &Rc<Node>,
    f: impl Fn(T) -> Result<R, Error> + 'static,
) -> Rc<Node>
where
    T: Literal,
    R: Literal,
{
    Node::builtin_op(
        p.reg,
        p.pos.clone(),
        parent,
        BuiltInOp::host(&["_inner"], move |ctx, args| {
            let x: T = lit(&args[0])?;
            Ok(f(x)?.into_node(ctx, args[0].pos().clone()))
        }),
    )
}

fn unary<T, R>(p: &ProtoBuilder<'_>, parent: &Rc<Node>, f: impl Fn(T) -> R + 'static) -> Rc<Node>
where
    T: Literal,
    R: Literal,
{
    fallible_unary(p, parent, move |x| Ok(f(x)))
}

/// Sub-block shape shared by `select`, `logical_and`, and `logical_or`:
/// one back edge to the receiver under `self_name`, plus a `result` op.
fn select_or_logic(
    p: &ProtoBuilder<'_>,
    parent: &Rc<Node>,
    self_name: &str,
    op: BuiltInOp,
) -> Rc<Node> {
    Node::block(p.reg, p.pos.clone(), |block| {
        let mut defs = FxHashMap::default();
        defs.insert(p.attr(self_name), Node::back_edge(p.reg, p.pos.clone(), parent));
        defs.insert(
            p.attr("result"),
            Node::builtin_op(p.reg, p.pos.clone(), block, op),
        );
        defs
    })
}

fn bool_int(b: bool) -> i64 {
    i64::from(b)
}

/// Clamp substr/slice indices the way the language defines them:
/// negative indices count from the end, everything clamps into the valid
/// window, and `start >= end` yields the empty result.
pub(crate) fn clamp_range(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let mut start = if start < 0 { start + len } else { start };
    let mut end = if end < 0 { end + len } else { end };
    end = end.clamp(0, len);
    start = start.clamp(0, len);
    if start >= end {
        (0, 0)
    } else {
        (start as usize, end as usize)
    }
}

/// Floored modulo: the sign of the result matches the divisor.
fn floored_mod_i64(x: i64, y: i64) -> Result<i64, Error> {
    if y == 0 {
        return Err(Error::eval("modulo by zero"));
    }
    let mut r = x.wrapping_rem(y);
    if r != 0 && (r < 0) != (y < 0) {
        r += y;
    }
    Ok(r)
}

fn floored_div_i64(x: i64, y: i64) -> Result<i64, Error> {
    if y == 0 {
        return Err(Error::eval("division by zero"));
    }
    let q = x.wrapping_div(y);
    if x.wrapping_rem(y) != 0 && (x < 0) != (y < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floored_mod_f64(x: f64, y: f64) -> f64 {
    let r = x % y;
    if r != 0.0 && (r < 0.0) != (y < 0.0) {
        r + y
    } else {
        r
    }
}

fn checked<T>(v: Option<T>, what: &str) -> Result<T, Error> {
    v.ok_or_else(|| Error::eval(format!("integer overflow in {what}")))
}

fn int_proto(attrs: &AttrTable, reg: &BackEdges) -> Rc<Node> {
    let p = ProtoBuilder {
        attrs,
        reg,
        pos: Pos::builtin("builtin/int"),
    };
    Node::block(reg, p.pos.clone(), |result| {
        let mut defs = FxHashMap::default();
        let mut def = |name: &str, node: Rc<Node>| {
            defs.insert(p.attr(name), node);
        };

        def("add", fallible_binary(&p, result, |x: i64, y: i64| {
            checked(x.checked_add(y), "addition")
        }));
        def("sub", fallible_binary(&p, result, |x: i64, y: i64| {
            checked(x.checked_sub(y), "subtraction")
        }));
        def("mul", fallible_binary(&p, result, |x: i64, y: i64| {
            checked(x.checked_mul(y), "multiplication")
        }));
        def("div", fallible_binary(&p, result, floored_div_i64));
        def("mod", fallible_binary(&p, result, floored_mod_i64));
        def("lt", binary(&p, result, |x: i64, y: i64| bool_int(x < y)));
        def("gt", binary(&p, result, |x: i64, y: i64| bool_int(x > y)));
        def("le", binary(&p, result, |x: i64, y: i64| bool_int(x <= y)));
        def("ge", binary(&p, result, |x: i64, y: i64| bool_int(x >= y)));
        def("eq", binary(&p, result, |x: i64, y: i64| bool_int(x == y)));
        def("ne", binary(&p, result, |x: i64, y: i64| bool_int(x != y)));
        def("neg", fallible_unary(&p, result, |x: i64| {
            checked(x.checked_neg(), "negation")
        }));
        def("chr", fallible_unary(&p, result, |x: i64| {
            u32::try_from(x)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .ok_or_else(|| Error::eval(format!("{x} is not a valid character code")))
        }));
        def("str", unary(&p, result, |x: i64| x.to_string()));
        def("byte", unary(&p, result, |x: i64| vec![x as u8]));
        def("float", unary(&p, result, |x: i64| x as f64));
        def(
            "select",
            select_or_logic(&p, result, "cond", BuiltInOp::select()),
        );
        def(
            "logical_and",
            select_or_logic(&p, result, "x", BuiltInOp::logic(true)),
        );
        def(
            "logical_or",
            select_or_logic(&p, result, "x", BuiltInOp::logic(false)),
        );
        defs
    })
}

fn float_proto(attrs: &AttrTable, reg: &BackEdges) -> Rc<Node> {
    let p = ProtoBuilder {
        attrs,
        reg,
        pos: Pos::builtin("builtin/float"),
    };
    Node::block(reg, p.pos.clone(), |result| {
        let mut defs = FxHashMap::default();
        let mut def = |name: &str, node: Rc<Node>| {
            defs.insert(p.attr(name), node);
        };

        def("add", binary(&p, result, |x: f64, y: f64| x + y));
        def("sub", binary(&p, result, |x: f64, y: f64| x - y));
        def("mul", binary(&p, result, |x: f64, y: f64| x * y));
        def("div", binary(&p, result, |x: f64, y: f64| x / y));
        def("mod", binary(&p, result, floored_mod_f64));
        def("lt", binary(&p, result, |x: f64, y: f64| bool_int(x < y)));
        def("gt", binary(&p, result, |x: f64, y: f64| bool_int(x > y)));
        def("le", binary(&p, result, |x: f64, y: f64| bool_int(x <= y)));
        def("ge", binary(&p, result, |x: f64, y: f64| bool_int(x >= y)));
        def("eq", binary(&p, result, |x: f64, y: f64| bool_int(x == y)));
        def("ne", binary(&p, result, |x: f64, y: f64| bool_int(x != y)));
        def("neg", unary(&p, result, |x: f64| -x));
        def("str", unary(&p, result, |x: f64| format_float(x)));
        def("int", unary(&p, result, |x: f64| x as i64));
        defs
    })
}

/// Decimal rendering with the shortest digit string that round-trips;
/// integral values keep a trailing `.0` marker so the kind stays visible.
fn format_float(x: f64) -> String {
    let s = format!("{x}");
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

/// The `substr`/`slice` sub-block: `x` is a back edge to the receiver,
/// `start` defaults to 0, `end` defaults to `x.len`, and `result` clamps
/// and cuts.
fn substr_or_slice(
    p: &ProtoBuilder<'_>,
    parent: &Rc<Node>,
    int_proto: &Rc<Node>,
    is_str: bool,
) -> Rc<Node> {
    Node::block(p.reg, p.pos.clone(), |block| {
        let mut defs = FxHashMap::default();
        defs.insert(p.attr("x"), Node::back_edge(p.reg, p.pos.clone(), parent));
        defs.insert(
            p.attr("start"),
            literal_from_proto(
                p.reg,
                int_proto,
                p.attr("_inner"),
                p.pos.clone(),
                Node::int_lit(p.reg, p.pos.clone(), 0),
            ),
        );
        // end = x.len, looked up through the sub-block so an overridden
        // x is honored.
        let end_chain = {
            let self_edge = Node::back_edge(p.reg, p.pos.clone(), block);
            let x_access = Node::access(p.pos.clone(), self_edge, p.attr("x"));
            Node::access(p.pos.clone(), x_access, p.attr("len"))
        };
        defs.insert(p.attr("end"), end_chain);
        defs.insert(
            p.attr("result"),
            Node::builtin_op(
                p.reg,
                p.pos.clone(),
                block,
                BuiltInOp::host(
                    &["x._inner", "start._inner", "end._inner"],
                    move |ctx, args| {
                        let start: i64 = named_lit("start", &args[1])?;
                        let end: i64 = named_lit("end", &args[2])?;
                        let pos = args[0].pos().clone();
                        if is_str {
                            let x: String = named_lit("x", &args[0])?;
                            let (lo, hi) = clamp_range(start, end, x.len());
                            // Byte-wise cut; a slice through a multi-byte
                            // character degrades instead of panicking.
                            let cut = String::from_utf8_lossy(&x.as_bytes()[lo..hi]).into_owned();
                            Ok(ctx.str_node(pos, cut))
                        } else {
                            let x: Vec<u8> = named_lit("x", &args[0])?;
                            let (lo, hi) = clamp_range(start, end, x.len());
                            Ok(ctx.bytes_node(pos, x[lo..hi].to_vec()))
                        }
                    },
                ),
            ),
        );
        defs
    })
}

fn str_proto(attrs: &AttrTable, reg: &BackEdges, int_proto: &Rc<Node>) -> Rc<Node> {
    let p = ProtoBuilder {
        attrs,
        reg,
        pos: Pos::builtin("builtin/str"),
    };
    Node::block(reg, p.pos.clone(), |result| {
        let mut defs = FxHashMap::default();
        let mut def = |name: &str, node: Rc<Node>| {
            defs.insert(p.attr(name), node);
        };

        def("add", binary(&p, result, |x: String, y: String| x + &y));
        def("eq", binary(&p, result, |x: String, y: String| bool_int(x == y)));
        def("ne", binary(&p, result, |x: String, y: String| bool_int(x != y)));
        def("len", unary(&p, result, |x: String| x.len() as i64));
        def("bytes", unary(&p, result, |x: String| x.into_bytes()));
        def("substr", substr_or_slice(&p, result, int_proto, true));
        def("import", import_block(&p, result));
        def(
            "panic",
            Node::builtin_op(
                p.reg,
                p.pos.clone(),
                result,
                BuiltInOp::host(&["_inner"], |_, args| {
                    let msg: String = lit(&args[0])?;
                    Err(Error::op(msg, args[0].pos().clone()))
                }),
            ),
        );
        defs
    })
}

/// The `import` sub-block: a host op that hands the path to the context.
fn import_block(p: &ProtoBuilder<'_>, parent: &Rc<Node>) -> Rc<Node> {
    Node::block(p.reg, p.pos.clone(), |block| {
        let mut defs = FxHashMap::default();
        defs.insert(p.attr("x"), Node::back_edge(p.reg, p.pos.clone(), parent));
        defs.insert(
            p.attr("result"),
            Node::builtin_op(
                p.reg,
                p.pos.clone(),
                block,
                BuiltInOp::host(&["x._inner"], |ctx, args| {
                    let path: String = named_lit("x", &args[0])?;
                    ctx.import(args[0].pos(), &path)
                }),
            ),
        );
        defs
    })
}

fn bytes_proto(attrs: &AttrTable, reg: &BackEdges, int_proto: &Rc<Node>) -> Rc<Node> {
    let p = ProtoBuilder {
        attrs,
        reg,
        pos: Pos::builtin("builtin/bytes"),
    };
    let at_pos = p.pos.clone();
    Node::block(reg, p.pos.clone(), |result| {
        let mut defs = FxHashMap::default();
        let mut def = |name: &str, node: Rc<Node>| {
            defs.insert(p.attr(name), node);
        };

        def("add", binary(&p, result, |mut x: Vec<u8>, y: Vec<u8>| {
            x.extend_from_slice(&y);
            x
        }));
        def(
            "at",
            fallible_binary(&p, result, move |x: Vec<u8>, y: i64| {
                let idx = if y < 0 { y + x.len() as i64 } else { y };
                if idx < 0 || idx >= x.len() as i64 {
                    return Err(Error::op(
                        format!("{y} is out of range [{}, {})", -(x.len() as i64), x.len()),
                        at_pos.clone(),
                    ));
                }
                Ok(x[idx as usize] as i64)
            }),
        );
        def("eq", binary(&p, result, |x: Vec<u8>, y: Vec<u8>| bool_int(x == y)));
        def("ne", binary(&p, result, |x: Vec<u8>, y: Vec<u8>| bool_int(x != y)));
        def("len", unary(&p, result, |x: Vec<u8>| x.len() as i64));
        def("str", unary(&p, result, |x: Vec<u8>| {
            String::from_utf8_lossy(&x).into_owned()
        }));
        def("slice", substr_or_slice(&p, result, int_proto, false));
        defs
    })
}

/// Mint a literal value block from a prototype: a new block sharing the
/// prototype's scope id whose `_inner` carries the raw literal, with the
/// prototype's operator table cloned lazily underneath.
pub(crate) fn literal_from_proto(
    reg: &BackEdges,
    proto: &Rc<Node>,
    inner_attr: Attr,
    pos: Pos,
    inner: Rc<Node>,
) -> Rc<Node> {
    let mut extra = FxHashMap::default();
    extra.insert(inner_attr, inner);
    block_with_overrides(reg, proto, pos, extra)
}
