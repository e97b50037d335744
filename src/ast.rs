//! The abstract syntax tree and its lowering to the node graph.
//!
//! Lowering threads the ordered list of enclosing scopes (outermost
//! first); identifiers resolve as `self.name`, `^` walks a fixed number
//! of levels out, and `^^.name` searches outward for a scope declaring
//! `name`. Ternary and binary operators are pure sugar over override and
//! access, rewritten here before lowering.

use crate::attr::Attr;
use crate::context::Context;
use crate::node::Node;
use crate::position::Pos;
use crate::Error;
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Ast {
    Block {
        pos: Pos,
        defs: Vec<(String, Ast)>,
    },
    /// Bracket form: replacement definitions plus aliases.
    Override {
        pos: Pos,
        base: Box<Ast>,
        defs: Vec<(String, Ast)>,
        aliases: Vec<(String, String)>,
    },
    /// Paren form: replacement definitions plus eager (`:=`) bindings.
    Call {
        pos: Pos,
        base: Box<Ast>,
        defs: Vec<(String, Ast)>,
        eager: Vec<(String, Ast)>,
    },
    Access {
        pos: Pos,
        base: Box<Ast>,
        attr: String,
    },
    Ident {
        pos: Pos,
        name: String,
    },
    SelfRef {
        pos: Pos,
    },
    Parent {
        pos: Pos,
        depth: usize,
    },
    Ancestor {
        pos: Pos,
        name: String,
    },
    Int {
        pos: Pos,
        value: i64,
    },
    Float {
        pos: Pos,
        value: f64,
    },
    Str {
        pos: Pos,
        value: String,
    },
    Ternary {
        pos: Pos,
        cond: Box<Ast>,
        if_true: Box<Ast>,
        if_false: Box<Ast>,
    },
    Binary {
        pos: Pos,
        /// Operator method name (`add`, `lt`, `logical_or`, …).
        op: &'static str,
        x: Box<Ast>,
        y: Box<Ast>,
    },
}

/// An enclosing scope during lowering: the graph node plus the attribute
/// names it declares (needed for ancestor lookup while the scope's body
/// is still being built).
pub struct ScopeParent {
    node: Rc<Node>,
    declared: Rc<FxHashSet<Attr>>,
}

impl Ast {
    pub fn pos(&self) -> &Pos {
        match self {
            Ast::Block { pos, .. }
            | Ast::Override { pos, .. }
            | Ast::Call { pos, .. }
            | Ast::Access { pos, .. }
            | Ast::Ident { pos, .. }
            | Ast::SelfRef { pos }
            | Ast::Parent { pos, .. }
            | Ast::Ancestor { pos, .. }
            | Ast::Int { pos, .. }
            | Ast::Float { pos, .. }
            | Ast::Str { pos, .. }
            | Ast::Ternary { pos, .. }
            | Ast::Binary { pos, .. } => pos,
        }
    }

    /// Lower to a graph node. `parents` is the ordered list of enclosing
    /// scopes, outermost first; the module itself lowers with an empty
    /// list.
    pub fn to_node(&self, ctx: &Context, parents: &mut Vec<ScopeParent>) -> Result<Rc<Node>, Error> {
        let reg = ctx.edges();
        match self {
            Ast::Block { pos, defs } => {
                let declared = declared_set(ctx, defs.iter().map(|(n, _)| n.as_str()));
                Node::try_block(reg, pos.clone(), |scope| {
                    parents.push(ScopeParent {
                        node: scope.clone(),
                        declared,
                    });
                    let built = build_defs(ctx, parents, defs);
                    parents.pop();
                    built
                })
            }

            Ast::Override {
                pos,
                base,
                defs,
                aliases,
            } => {
                let base_node = base.to_node(ctx, parents)?;
                let declared = declared_set(
                    ctx,
                    defs.iter()
                        .map(|(n, _)| n.as_str())
                        .chain(aliases.iter().map(|(n, _)| n.as_str())),
                );
                let alias_map: FxHashMap<Attr, Attr> = aliases
                    .iter()
                    .map(|(dst, src)| (ctx.attrs().get(dst), ctx.attrs().get(src)))
                    .collect();
                Node::try_override(reg, pos.clone(), base_node, alias_map, |scope| {
                    parents.push(ScopeParent {
                        node: scope.clone(),
                        declared,
                    });
                    let built = build_defs(ctx, parents, defs);
                    parents.pop();
                    Ok((built?, FxHashMap::default()))
                })
            }

            Ast::Call {
                pos,
                base,
                defs,
                eager,
            } => {
                // Call bindings are arguments from the caller's side:
                // their expressions resolve in the enclosing scope, not
                // in the scope being called.
                let base_node = base.to_node(ctx, parents)?;
                Node::try_override(
                    reg,
                    pos.clone(),
                    base_node,
                    FxHashMap::default(),
                    |_scope| {
                        let built_defs = build_defs(ctx, parents, defs);
                        let built_eager = build_defs(ctx, parents, eager);
                        Ok((built_defs?, built_eager?))
                    },
                )
            }

            Ast::Access { pos, base, attr } => {
                let base_node = base.to_node(ctx, parents)?;
                Ok(Node::access(pos.clone(), base_node, ctx.attrs().get(attr)))
            }

            Ast::Ident { pos, name } => {
                let scope = innermost(parents, pos)?;
                let edge = Node::back_edge(reg, pos.clone(), &scope);
                Ok(Node::access(pos.clone(), edge, ctx.attrs().get(name)))
            }

            Ast::SelfRef { pos } => {
                let scope = innermost(parents, pos)?;
                Ok(Node::back_edge(reg, pos.clone(), &scope))
            }

            Ast::Parent { pos, depth } => {
                if depth + 1 > parents.len() {
                    return Err(Error::ast(
                        "parent access goes beyond top scope",
                        pos.clone(),
                    ));
                }
                let target = parents[parents.len() - (depth + 1)].node.clone();
                Ok(Node::back_edge(reg, pos.clone(), &target))
            }

            Ast::Ancestor { pos, name } => {
                let attr = ctx.attrs().get(name);
                for parent in parents.iter().rev().skip(1) {
                    if parent.declared.contains(&attr) {
                        let edge = Node::back_edge(reg, pos.clone(), &parent.node);
                        return Ok(Node::access(pos.clone(), edge, attr));
                    }
                }
                Err(Error::ast(
                    format!("no ancestor with attribute {name:?} found"),
                    pos.clone(),
                ))
            }

            Ast::Int { pos, value } => Ok(ctx.int_node(pos.clone(), *value)),
            Ast::Float { pos, value } => Ok(ctx.float_node(pos.clone(), *value)),
            Ast::Str { pos, value } => Ok(ctx.str_node(pos.clone(), value.as_str())),

            Ast::Ternary {
                pos,
                cond,
                if_true,
                if_false,
            } => {
                // cond.select(true = a, false = b).result
                let equiv = Ast::Access {
                    pos: pos.clone(),
                    base: Box::new(Ast::Call {
                        pos: pos.clone(),
                        base: Box::new(Ast::Access {
                            pos: pos.clone(),
                            base: cond.clone(),
                            attr: "select".into(),
                        }),
                        defs: vec![
                            ("true".into(), (**if_true).clone()),
                            ("false".into(), (**if_false).clone()),
                        ],
                        eager: Vec::new(),
                    }),
                    attr: "result".into(),
                };
                equiv.to_node(ctx, parents)
            }

            Ast::Binary { pos, op, x, y } => {
                // x.<op>(y = rhs).result
                let equiv = Ast::Access {
                    pos: pos.clone(),
                    base: Box::new(Ast::Call {
                        pos: pos.clone(),
                        base: Box::new(Ast::Access {
                            pos: pos.clone(),
                            base: x.clone(),
                            attr: (*op).into(),
                        }),
                        defs: vec![("y".into(), (**y).clone())],
                        eager: Vec::new(),
                    }),
                    attr: "result".into(),
                };
                equiv.to_node(ctx, parents)
            }
        }
    }
}

fn declared_set<'a>(
    ctx: &Context,
    names: impl Iterator<Item = &'a str>,
) -> Rc<FxHashSet<Attr>> {
    Rc::new(names.map(|n| ctx.attrs().get(n)).collect())
}

fn build_defs(
    ctx: &Context,
    parents: &mut Vec<ScopeParent>,
    defs: &[(String, Ast)],
) -> Result<FxHashMap<Attr, Rc<Node>>, Error> {
    let mut out = FxHashMap::default();
    for (name, expr) in defs {
        out.insert(ctx.attrs().get(name), expr.to_node(ctx, parents)?);
    }
    Ok(out)
}

fn innermost(parents: &[ScopeParent], pos: &Pos) -> Result<Rc<Node>, Error> {
    parents
        .last()
        .map(|p| p.node.clone())
        .ok_or_else(|| Error::ast("self reference outside any scope", pos.clone()))
}
