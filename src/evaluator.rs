//! The iterative reducer.
//!
//! `evaluate` walks an expression down to a terminal form: a literal node
//! or a block. Blocks are never reduced further; their internals are only
//! evaluated when an attribute is accessed. The walk keeps an explicit
//! continuation stack instead of recursing, so a Reflex program that
//! recurses ten thousand deep costs heap, not Rust stack — and the
//! "loop-around" edge of attribute access is a genuine tail call that
//! leaves no frame behind.
//!
//! Every error leaving this module is decorated once with the position
//! trace accumulated so far.

use crate::attr::Attr;
use crate::backedge::BackEdges;
use crate::builtins::{BuiltInOp, Step};
use crate::context::Context;
use crate::defmap::DefMap;
use crate::node::{
    available_attrs, clone_node, flatten_node, sorted_entries, Node, NodeKind, Rewrite,
};
use crate::position::GapStack;
use crate::Error;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Pending work, applied to each terminal value as it is produced.
enum Frame {
    /// Fetch `attr` once the access base reduces to a block.
    Access { attr: Attr },
    /// Finish an override once its base reduces to a block. Holds the
    /// original override node.
    Override { node: Rc<Node> },
    /// An eager binding of an override is being evaluated.
    Eager { state: EagerState },
    /// A built-in op is waiting for a reduced sub-expression.
    OpResume { scope: Rc<Node>, op: BuiltInOp },
}

/// In-flight state of an override's eager bindings. Results are
/// installed together at the end, and references to the base block inside
/// eager expressions are frozen, so `@(i := i - 1, sum := sum + i)` reads
/// the previous generation's `i` and `sum` throughout.
struct EagerState {
    block: Rc<Node>,
    high: FxHashMap<Attr, Rc<Node>>,
    base_layer: Rc<DefMap>,
    current: Attr,
    /// Remaining (attr, cloned expression) pairs, last first.
    pending: Vec<(Attr, Rc<Node>)>,
    done: Vec<(Attr, Rc<Node>)>,
}

/// Reduce `root` to a literal or block, wrapping any failure with the
/// position trace.
pub fn evaluate(ctx: &Context, root: Rc<Node>, trace: &mut GapStack) -> Result<Rc<Node>, Error> {
    eval_loop(ctx, root, trace).map_err(|e| match e {
        wrapped @ Error::Interpreter { .. } => wrapped,
        inner => Error::interpreter(inner, trace.snapshot()),
    })
}

fn eval_loop(ctx: &Context, mut expr: Rc<Node>, trace: &mut GapStack) -> Result<Rc<Node>, Error> {
    let reg = ctx.edges();
    let mut frames: Vec<Frame> = Vec::new();
    // Blocks whose definitions have been handed out stay retained until
    // this call returns: the handed-out expressions reference them
    // through non-owning back edges.
    let mut retained: Vec<Rc<Node>> = Vec::new();

    'outer: loop {
        if ctx.take_flatten_signal() {
            tracing::trace!("flattening retained roots");
            flatten_roots(reg, &expr, &frames);
        }
        trace.push(expr.pos().clone());

        // One reduction step; either produces a terminal value or loops
        // around with a new expression.
        enum Outcome {
            Value(Rc<Node>),
            Next(Rc<Node>),
        }
        let outcome = match &expr.kind {
            NodeKind::IntLit(_)
            | NodeKind::FloatLit(_)
            | NodeKind::StrLit(_)
            | NodeKind::BytesLit(_)
            | NodeKind::Block(_)
            | NodeKind::FrozenBlock(_) => Outcome::Value(expr.clone()),

            NodeKind::Access { base, attr } => {
                frames.push(Frame::Access { attr: *attr });
                Outcome::Next(base.clone())
            }

            NodeKind::Override(data) => {
                let base = data.base.clone();
                frames.push(Frame::Override { node: expr.clone() });
                Outcome::Next(base)
            }

            NodeKind::BackEdge(edge) => Outcome::Value(deref_scope(edge.target())),
            NodeKind::FrozenBackEdge(frozen) => Outcome::Value(deref_scope(frozen.scope.clone())),

            NodeKind::BuiltInOp { scope, op } => {
                let scope_node = scope.target();
                match op.next(ctx, &scope_node)? {
                    Step::Done(next) => Outcome::Next(next),
                    Step::Eval(sub) => {
                        frames.push(Frame::OpResume {
                            scope: scope_node,
                            op: op.clone(),
                        });
                        Outcome::Next(sub)
                    }
                }
            }
        };
        let mut value = match outcome {
            Outcome::Next(next) => {
                expr = next;
                continue 'outer;
            }
            Outcome::Value(value) => value,
        };

        // Apply continuations until one hands back an expression.
        loop {
            let Some(frame) = frames.pop() else {
                return Ok(value);
            };
            match frame {
                Frame::Access { attr } => {
                    expr = lookup(ctx, reg, &value, attr)?;
                    retained.push(value);
                    continue 'outer;
                }

                Frame::Override { node } => match begin_override(reg, &node, retain(&mut retained, value))? {
                    Begun::Finished(block) => {
                        value = block;
                    }
                    Begun::NeedsEager(state, first) => {
                        frames.push(Frame::Eager { state });
                        expr = first;
                        continue 'outer;
                    }
                },

                Frame::Eager { mut state } => {
                    let frozen = freeze_eager_result(reg, value)?;
                    state.done.push((state.current, frozen));
                    match state.pending.pop() {
                        Some((attr, next_expr)) => {
                            state.current = attr;
                            frames.push(Frame::Eager { state });
                            expr = next_expr;
                            continue 'outer;
                        }
                        None => {
                            value = finish_eager(reg, state);
                        }
                    }
                }

                Frame::OpResume { scope, op } => {
                    let next_op = op.tell(ctx, &scope, value)?;
                    match next_op.next(ctx, &scope)? {
                        Step::Done(next) => {
                            expr = next;
                            continue 'outer;
                        }
                        Step::Eval(sub) => {
                            frames.push(Frame::OpResume { scope, op: next_op });
                            expr = sub;
                            continue 'outer;
                        }
                    }
                }
            }
        }
    }
}

fn retain(retained: &mut Vec<Rc<Node>>, value: Rc<Node>) -> Rc<Node> {
    retained.push(value.clone());
    value
}

/// A back edge always points at an already-evaluated scope; the clone
/// engine rewrites edges into override scopes before they can be
/// dereferenced.
fn deref_scope(target: Rc<Node>) -> Rc<Node> {
    if target.block_view().is_none() {
        panic!("back edge into an unevaluated scope");
    }
    target
}

/// Attribute lookup against a terminal value: direct definitions first,
/// then aliases resolved in the same (post-override) block.
fn lookup(ctx: &Context, reg: &BackEdges, value: &Rc<Node>, attr: Attr) -> Result<Rc<Node>, Error> {
    let Some(view) = value.block_view() else {
        return Err(Error::eval(format!(
            "unexpected type for access base: {}",
            value.kind_name()
        )));
    };
    let defs = view.data.defs();
    if let Some(node) = defs.get(reg, attr) {
        return Ok(node);
    }
    if let Some(&src) = view.data.aliases.get(&attr) {
        return defs.get(reg, src).ok_or_else(|| {
            Error::eval(format!(
                "alias source attribute does not exist: {}",
                ctx.attrs().name(src)
            ))
        });
    }
    Err(Error::eval(format!(
        "unable to access attribute: {} (available: {})",
        ctx.attrs().name(attr),
        available_attrs(ctx.attrs(), &view)
    )))
}

enum Begun {
    Finished(Rc<Node>),
    NeedsEager(EagerState, Rc<Node>),
}

/// Build the block an override reduces to. The new block shares the base
/// block's scope id; untouched base definitions are cloned lazily under a
/// rewrite of the base scope to the new block, overriding definitions are
/// cloned now under a rewrite of the override scope — with back edges to
/// the base block frozen, since those were meant to keep pointing at the
/// object being overridden.
fn begin_override(reg: &BackEdges, over: &Rc<Node>, base_value: Rc<Node>) -> Result<Begun, Error> {
    let NodeKind::Override(odata) = &over.kind else {
        panic!("override frame without an override node");
    };
    let Some(view) = base_value.block_view() else {
        return Err(Error::eval(format!(
            "unexpected type for override base: {}",
            base_value.kind_name()
        )));
    };
    let base_edge = view.data.edge_id;
    let base_backs = view.node.back_edges();
    let base_defs = view.data.defs();

    let mut aliases = view.data.aliases.clone();
    for (dst, src) in &odata.aliases {
        aliases.insert(*dst, *src);
    }

    let block = Node::block_skeleton(reg, over.pos().clone(), base_edge, aliases);
    let over_rewrite = Rewrite::single(odata.edge_id, &block);
    let freeze = reg.singleton(base_edge);

    let mut backs = base_backs;
    let mut high = FxHashMap::default();
    for (attr, def) in sorted_entries(odata.defs.borrow().clone()) {
        let cloned = clone_node(reg, &def, &over_rewrite, &freeze);
        backs = reg.merge(&backs, &cloned.back_edges());
        high.insert(attr, cloned);
    }
    let base_layer = Rc::new(DefMap::new_clone(
        base_defs,
        Rewrite::single(base_edge, &block),
    ));

    let eager = sorted_entries(odata.eager.borrow().clone());
    if eager.is_empty() {
        let defs = DefMap::maybe_flatten(
            reg,
            Rc::new(DefMap::new_override(
                Rc::new(DefMap::flat(high)),
                base_layer,
            )),
        );
        block.install_defs(defs, backs);
        return Ok(Begun::Finished(block));
    }

    // Install the pre-eager definitions; an eager slot that is read
    // before the results land falls through to the base's old value.
    block.install_defs(
        Rc::new(DefMap::new_override(
            Rc::new(DefMap::flat(high.clone())),
            base_layer.clone(),
        )),
        backs,
    );

    let mut cloned: Vec<(Attr, Rc<Node>)> = eager
        .into_iter()
        .map(|(attr, def)| (attr, clone_node(reg, &def, &over_rewrite, &freeze)))
        .collect();
    let (first_attr, first_expr) = cloned.remove(0);
    cloned.reverse();
    Ok(Begun::NeedsEager(
        EagerState {
            block,
            high,
            base_layer,
            current: first_attr,
            pending: cloned,
            done: Vec::new(),
        },
        first_expr,
    ))
}

/// An eager result must be a block; wrap it so later clones leave it
/// alone.
fn freeze_eager_result(reg: &BackEdges, value: Rc<Node>) -> Result<Rc<Node>, Error> {
    if value.block_view().is_none() {
        return Err(Error::eval(format!(
            "eager binding did not evaluate to a block: {}",
            value.kind_name()
        )));
    }
    Ok(Node::frozen_block(reg, value))
}

fn finish_eager(reg: &BackEdges, state: EagerState) -> Rc<Node> {
    let mut high = state.high;
    for (attr, frozen) in state.done {
        high.insert(attr, frozen);
    }
    let defs = DefMap::maybe_flatten(
        reg,
        Rc::new(DefMap::new_override(
            Rc::new(DefMap::flat(high)),
            state.base_layer,
        )),
    );
    // Frozen results advertise no back edges, so the set is unchanged.
    let backs = state.block.back_edges();
    state.block.install_defs(defs, backs);
    state.block
}

fn flatten_roots(reg: &BackEdges, expr: &Rc<Node>, frames: &[Frame]) {
    flatten_node(reg, expr);
    for frame in frames {
        match frame {
            Frame::Override { node } => flatten_node(reg, node),
            Frame::Eager { state } => flatten_node(reg, &state.block),
            Frame::OpResume { scope, .. } => flatten_node(reg, scope),
            Frame::Access { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::position::Pos;

    /// Expected outcome of evaluating a program's `result._inner`.
    enum Expected {
        Int(i64),
        Float(f64),
        Str(&'static str),
        Bytes(&'static [u8]),
        /// Evaluation fails with an error containing this text.
        ErrContains(&'static str),
    }
    use Expected::*;

    fn run(code: &str) -> Result<Rc<Node>, Error> {
        let ctx = Context::new();
        let toks = tokenize("test", code)?;
        let ast = parse(toks)?;
        let root = ast.to_node(&ctx, &mut Vec::new())?;
        let result = Node::access(
            Pos::new("test", 0, 0),
            Node::access(Pos::new("test", 0, 0), root, ctx.attrs().get("result")),
            ctx.attrs().get("_inner"),
        );
        evaluate(&ctx, result, &mut GapStack::new())
    }

    fn check(code: &str, expected: &Expected) {
        match (run(code), expected) {
            (Ok(node), Int(want)) => match node.kind {
                NodeKind::IntLit(got) => assert_eq!(got, *want, "program: {code}"),
                _ => panic!("expected int, got {} for {code}", node.kind_name()),
            },
            (Ok(node), Float(want)) => match node.kind {
                NodeKind::FloatLit(got) => {
                    assert!((got - want).abs() < 1e-12, "program: {code}: {got} != {want}")
                }
                _ => panic!("expected float, got {} for {code}", node.kind_name()),
            },
            (Ok(node), Str(want)) => match &node.kind {
                NodeKind::StrLit(got) => assert_eq!(&**got, *want, "program: {code}"),
                _ => panic!("expected str, got {} for {code}", node.kind_name()),
            },
            (Ok(node), Bytes(want)) => match &node.kind {
                NodeKind::BytesLit(got) => assert_eq!(&**got, *want, "program: {code}"),
                _ => panic!("expected bytes, got {} for {code}", node.kind_name()),
            },
            (Err(err), ErrContains(text)) => {
                let msg = err.to_string();
                assert!(
                    msg.contains(text),
                    "error for {code} should contain {text:?}, got: {msg}"
                );
            }
            (Ok(node), ErrContains(text)) => {
                panic!("expected error containing {text:?}, got {node:?} for {code}")
            }
            (Err(err), _) => panic!("unexpected error for {code}: {err}"),
        }
    }

    fn check_all(cases: &[(&str, Expected)]) {
        for (code, expected) in cases {
            check(code, expected);
        }
    }

    #[test]
    fn test_parent_and_ancestor_references() {
        check_all(&[
            ("x = 3  y = { z = ^.x }  result = y.z", Int(3)),
            (
                "a = {
                   b = {
                     c = {
                       d = ^^.x
                     }
                   }
                   x = ^^.y
                 }
                 y = 3
                 result = a.b.c.d",
                Int(3),
            ),
        ]);
    }

    #[test]
    fn test_arithmetic() {
        check_all(&[
            ("result = 3 + 5 + 2", Int(10)),
            ("x = 3  y = 5  result = x + y + 2", Int(10)),
            ("result = 2 * 3 + 4", Int(10)),
            ("result = 2 + 3 * 4", Int(14)),
            ("result = (2 + 3) * 4", Int(20)),
            // Floored division and modulo: sign follows the divisor.
            ("result = 7 / 2", Int(3)),
            ("result = -7 / 2", Int(-4)),
            ("result = -7 % 3", Int(2)),
            ("result = 7 % -3", Int(-2)),
            ("result = 1 / 0", ErrContains("division by zero")),
            ("result = 1 % 0", ErrContains("modulo by zero")),
        ]);
    }

    #[test]
    fn test_unary_negation() {
        check_all(&[
            ("result = -3", Int(-3)),
            ("a = 1+2  result = -a", Int(-3)),
            ("a = 1+2  result = -(a+2)", Int(-5)),
        ]);
    }

    #[test]
    fn test_comparisons_produce_ints() {
        check_all(&[
            ("result = 3 < 5", Int(1)),
            ("result = 5 < 3", Int(0)),
            ("result = 5 <= 5", Int(1)),
            ("result = 5 >= 6", Int(0)),
            ("result = 4 == 4", Int(1)),
            ("result = 4 != 4", Int(0)),
        ]);
    }

    #[test]
    fn test_overrides_and_calls() {
        check_all(&[
            // Override then access retrieves the new binding.
            ("y = { v = 1 }  result = y[v = 9].v", Int(9)),
            // An empty override behaves like the base.
            ("y = { v = 5 }  result = y().v", Int(5)),
            // Untouched attributes read through.
            ("y = { a = 1  b = 2 }  result = y[a = 10].b", Int(2)),
            // Call bindings feed the callee's expressions.
            (
                "x = 3  y = { result = a + b }  result = y(a=x, b:=4+5)!",
                Int(12),
            ),
        ]);
    }

    #[test]
    fn test_aliases_resolve_post_override() {
        check_all(&[
            (
                "x = 3  y = { result = a + b }  result = y(a=x)[b<-a]!",
                Int(6),
            ),
            // The alias follows a later override of its source.
            (
                "y = { result = a + b  a = 1 }  result = y[b<-a][a = 5]!",
                Int(10),
            ),
            (
                "y = { result = b  a = 1 }  result = y[b<-zzz]!",
                ErrContains("alias source attribute does not exist"),
            ),
        ]);
    }

    #[test]
    fn test_ternary_short_circuits() {
        check_all(&[
            ("result = 1 ? 3 : missing.x", Int(3)),
            ("result = 0 ? missing.x : 4", Int(4)),
            ("x = 5  result = x > 3 ? 10 : 20", Int(10)),
        ]);
    }

    #[test]
    fn test_logical_operators_return_operands() {
        check_all(&[
            ("result = 3 && 4", Int(4)),
            ("result = 0 && 4", Int(0)),
            ("result = 0 || 4", Int(4)),
            ("result = 3 || 4", Int(3)),
            ("result = 1 > 1 && 0", Int(0)),
            // Short circuit: the untaken operand is never evaluated.
            ("result = 0 && missing.x", Int(0)),
            ("result = 3 || missing.x", Int(3)),
        ]);
    }

    #[test]
    fn test_recursion_via_eager_bindings() {
        check_all(&[
            (
                "IntSum = {
                   i = 0
                   sum = 0
                   result = i ? @(i:=i-1, sum:=sum+i)! : sum
                 }
                 result = IntSum(i=10000)!",
                Int(50005000),
            ),
            (
                "factor = {
                   f = 2
                   next_result = @(f:=f+1)!
                   result = x % f ? next_result : f
                 }
                 result = factor[x=533]!",
                Int(13),
            ),
        ]);
    }

    #[test]
    fn test_string_operations() {
        check_all(&[
            ("x = \"hi\"  result = x.len", Int(2)),
            (
                "a = 7
                 y = \"hi\"
                 z = y + a.str
                 result = z + \" \" + z.len.str + z.substr(start=1)!",
                Str("hi7 3i7"),
            ),
            (
                "result = \"hi\" + 7.str + \" \" + (\"hi7\".len.str) + (\"test\".bytes.at(y=1)!.str)",
                Str("hi7 3101"),
            ),
            ("result = \"abc\" == \"abc\"", Int(1)),
            ("result = \"abc\" != \"abc\"", Int(0)),
            ("result = 65.chr", Str("A")),
        ]);
    }

    #[test]
    fn test_substr_clamping() {
        check_all(&[
            ("s = \"hello\"  result = s.substr(start=-1)!", Str("o")),
            ("s = \"hello\"  result = s.substr(end=-1)!", Str("hell")),
            (
                "s = \"hello\"  result = s.substr(start=0, end=s.len)!",
                Str("hello"),
            ),
            ("s = \"hello\"  result = s.substr(start=3, end=2)!", Str("")),
            (
                "s = \"hello\"  result = s.substr(start=-99, end=99)!",
                Str("hello"),
            ),
            ("s = \"hello\"  result = s.substr(start=2)!", Str("llo")),
        ]);
    }

    #[test]
    fn test_bytes_operations() {
        check_all(&[
            (
                "result = \"hi\".bytes + 32.byte + \"hey\".bytes + (\"test\".bytes.at(y=1)!.str.bytes)",
                Bytes(b"hi hey101"),
            ),
            ("result = \"abc\".bytes.len", Int(3)),
            ("result = \"abc\".bytes.at(y=-1)!", Int(99)),
            (
                "result = \"abc\".bytes.at(y=7)!",
                ErrContains("out of range"),
            ),
            ("result = \"abc\".bytes.slice(start=1)!.str", Str("bc")),
        ]);
    }

    #[test]
    fn test_floats() {
        check_all(&[
            ("result = -3.0 + 5.0", Float(2.0)),
            ("result = -3.float + 5.0", Float(2.0)),
            ("result = (-3.float + 5.5).int", Int(2)),
            ("result = 7.0 / 2.0", Float(3.5)),
            ("result = 2.5.str", Str("2.5")),
            ("result = 2.0.str", Str("2.0")),
            ("result = 1.5 < 2.5", Int(1)),
        ]);
    }

    #[test]
    fn test_evaluation_errors() {
        check_all(&[
            (
                "result = nothing_here",
                ErrContains("unable to access attribute: nothing_here"),
            ),
            ("y = { a = 1 }  result = y.b", ErrContains("available:")),
            (
                "result = 3._inner.x",
                ErrContains("unexpected type for access base"),
            ),
            ("result = \"boom\".panic", ErrContains("boom")),
        ]);
    }

    #[test]
    fn test_int_str_bytes_round_trip() {
        // The first byte of n.str matches the decimal rendering.
        for n in [
            -1_000_000_000i64,
            -533,
            -1,
            0,
            7,
            99,
            123_456_789,
            1_000_000_000,
        ] {
            let code = format!("result = {n}.str.bytes.at(y=0)!");
            let first = i64::from(n.to_string().into_bytes()[0]);
            check(&code, &Int(first));
        }
    }

    #[test]
    fn test_errors_carry_a_trace() {
        let err = run("result = \"boom\".panic").unwrap_err();
        match err {
            Error::Interpreter { trace, .. } => assert!(!trace.is_empty()),
            other => panic!("expected a traced interpreter error, got {other}"),
        }
    }

    #[test]
    fn test_literal_evaluates_to_itself() {
        let ctx = Context::new();
        let lit = ctx.int_node(Pos::new("test", 1, 1), 42);
        let out = evaluate(&ctx, lit.clone(), &mut GapStack::new()).unwrap();
        assert!(Rc::ptr_eq(&lit, &out));
    }

    #[test]
    fn test_deep_recursion_stays_iterative() {
        // Exhausts the Rust stack if any per-iteration frame is kept
        // across the loop-around edge.
        check(
            "Count = {
               i = 0
               result = i ? @(i:=i-1)! : 0
             }
             result = Count(i=30000)!",
            &Int(0),
        );
    }
}
