//! The program graph: node kinds, scope construction, and the cloning
//! engine.
//!
//! A block's body may reference the block itself through back edges, so the
//! graph is cyclic. Ownership stays acyclic: a scope owns its children
//! through `Rc`, and a back edge carries the target's [`BackEdgeId`] plus a
//! `Weak` pointer to the current scope object. Cloning replaces the pointer
//! but keeps the id space flat. The only strong reference a back edge ever
//! holds is the frozen form, which is detached from the scope graph and
//! therefore cannot close a cycle.
//!
//! Every node carries the set of back-edge ids appearing inside it. The
//! cloning engine consults that set first and returns shared sub-graphs
//! untouched when no rewrite or freeze can affect them; recursive programs
//! rely on this short-circuit to stay linear.

use crate::Error;
use crate::attr::{Attr, AttrTable};
use crate::backedge::{BackEdgeId, BackEdgeSet, BackEdges};
use crate::builtins::BuiltInOp;
use crate::defmap::DefMap;
use crate::position::Pos;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A node of the program graph. Logically immutable once its constructor
/// returns; the `RefCell`s exist for the one-shot body-binding step that
/// lets a scope's definitions reference the scope itself.
pub struct Node {
    pub(crate) pos: Pos,
    backs: RefCell<Rc<BackEdgeSet>>,
    pub(crate) kind: NodeKind,
}

pub enum NodeKind {
    /// Fetch an attribute from the value `base` reduces to.
    Access { base: Rc<Node>, attr: Attr },
    /// A scope: named lookup table of expressions.
    Block(BlockData),
    /// A scope extending `base` with replacements, aliases, and eager
    /// bindings. Reduces to a fresh `Block` when evaluated.
    Override(OverrideData),
    /// Reference to an enclosing scope.
    BackEdge(EdgeRef),
    /// A back edge detached from the scope graph; advertises an empty
    /// back-edge set so clones leave it alone.
    FrozenBackEdge(FrozenEdge),
    /// A block detached the same way; holds results of eager bindings.
    FrozenBlock(Rc<Node>),
    IntLit(i64),
    FloatLit(f64),
    StrLit(Rc<str>),
    BytesLit(Rc<[u8]>),
    /// A built-in operation embedded in `scope`, driven by the evaluator
    /// through the coroutine protocol in [`crate::builtins`].
    BuiltInOp { scope: EdgeRef, op: BuiltInOp },
}

pub struct BlockData {
    pub(crate) edge_id: BackEdgeId,
    pub(crate) defs: RefCell<Rc<DefMap>>,
    pub(crate) aliases: FxHashMap<Attr, Attr>,
}

pub struct OverrideData {
    pub(crate) edge_id: BackEdgeId,
    pub(crate) base: Rc<Node>,
    pub(crate) defs: RefCell<FxHashMap<Attr, Rc<Node>>>,
    pub(crate) eager: RefCell<FxHashMap<Attr, Rc<Node>>>,
    pub(crate) aliases: FxHashMap<Attr, Attr>,
}

/// Reference to a scope. Freshly built edges borrow (`Weak`): the target
/// owns the sub-tree the edge lives in, and a strong pointer would close
/// an ownership cycle. When the clone engine copies a structure and a
/// surviving edge points at a scope *outside* the copy, the copy pins the
/// target instead — the target predates the copy and cannot reach it, so
/// pinning stays acyclic while keeping the scope alive.
#[derive(Clone)]
pub struct EdgeRef {
    pub(crate) edge_id: BackEdgeId,
    pub(crate) scope: Weak<Node>,
    pin: Option<Rc<Node>>,
}

impl EdgeRef {
    pub(crate) fn new(scope: &Rc<Node>) -> Self {
        EdgeRef {
            edge_id: scope
                .scope_edge_id()
                .unwrap_or_else(|| panic!("back edge target is not a scope")),
            scope: Rc::downgrade(scope),
            pin: None,
        }
    }

    fn pinned(scope: Rc<Node>) -> Self {
        EdgeRef {
            edge_id: scope
                .scope_edge_id()
                .unwrap_or_else(|| panic!("back edge target is not a scope")),
            scope: Rc::downgrade(&scope),
            pin: Some(scope),
        }
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }

    pub(crate) fn target(&self) -> Rc<Node> {
        if let Some(pin) = &self.pin {
            return pin.clone();
        }
        self.scope
            .upgrade()
            .unwrap_or_else(|| panic!("back edge target scope dropped while still referenced"))
    }
}

/// A detached back edge. Unlike [`EdgeRef`] it owns its target: the target
/// cannot reach the frozen edge, so no ownership cycle can form.
#[derive(Clone)]
pub struct FrozenEdge {
    pub(crate) edge_id: BackEdgeId,
    pub(crate) scope: Rc<Node>,
}

/// A pending map from back-edge ids to replacement scopes. Values are
/// weak because stored rewrites live inside the scope they point at.
#[derive(Clone, Default)]
pub struct Rewrite {
    map: FxHashMap<BackEdgeId, Weak<Node>>,
}

impl Rewrite {
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn single(id: BackEdgeId, scope: &Rc<Node>) -> Self {
        let mut map = FxHashMap::default();
        map.insert(id, Rc::downgrade(scope));
        Rewrite { map }
    }

    /// Extend with one entry; an existing entry for `id` is shadowed, the
    /// way a nested scope with the same id shadows its outer copy.
    pub fn with_scope(&self, id: BackEdgeId, scope: &Rc<Node>) -> Self {
        let mut map = self.map.clone();
        map.insert(id, Rc::downgrade(scope));
        Rewrite { map }
    }

    pub fn get(&self, id: BackEdgeId) -> Option<Rc<Node>> {
        self.map.get(&id).map(|w| {
            w.upgrade()
                .unwrap_or_else(|| panic!("rewrite target scope dropped while still referenced"))
        })
    }

    /// Keep only the entries whose key occurs in `backs`.
    pub fn restrict(&self, backs: &BackEdgeSet) -> Rewrite {
        let map = self
            .map
            .iter()
            .filter(|(id, _)| backs.contains(**id))
            .map(|(id, w)| (*id, w.clone()))
            .collect();
        Rewrite { map }
    }

    /// Composition of two pending rewrites, `outer` winning on shared
    /// keys. Sound because every stored rewrite maps an id to a scope
    /// carrying that same id, so chaining through the intermediate scope
    /// and rewriting directly agree.
    pub fn compose(inner: &Rewrite, outer: &Rewrite) -> Rewrite {
        let mut map = inner.map.clone();
        for (id, w) in &outer.map {
            map.insert(*id, w.clone());
        }
        Rewrite { map }
    }
}

/// Borrowed view of a block, transparently unwrapping the frozen form.
pub struct BlockView<'a> {
    pub(crate) data: &'a BlockData,
    /// The actual block node (the inner one for a frozen wrapper).
    pub(crate) node: &'a Rc<Node>,
}

impl BlockView<'_> {
    /// Whether the block exposes `attr`, directly or through an alias.
    pub fn defines(&self, attr: Attr) -> bool {
        self.data.defines(attr)
    }
}

impl Node {
    pub fn pos(&self) -> &Pos {
        &self.pos
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn back_edges(&self) -> Rc<BackEdgeSet> {
        self.backs.borrow().clone()
    }

    fn set_back_edges(&self, set: Rc<BackEdgeSet>) {
        *self.backs.borrow_mut() = set;
    }

    /// Human-readable kind for error messages.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Access { .. } => "access",
            NodeKind::Block(_) => "block",
            NodeKind::Override(_) => "override",
            NodeKind::BackEdge(_) => "back edge",
            NodeKind::FrozenBackEdge(_) => "frozen back edge",
            NodeKind::FrozenBlock(_) => "frozen block",
            NodeKind::IntLit(_) => "int value",
            NodeKind::FloatLit(_) => "float value",
            NodeKind::StrLit(_) => "str value",
            NodeKind::BytesLit(_) => "bytes value",
            NodeKind::BuiltInOp { .. } => "built-in op",
        }
    }

    pub fn scope_edge_id(&self) -> Option<BackEdgeId> {
        match &self.kind {
            NodeKind::Block(b) => Some(b.edge_id),
            NodeKind::Override(o) => Some(o.edge_id),
            NodeKind::FrozenBlock(inner) => inner.scope_edge_id(),
            _ => None,
        }
    }

    /// View the node as a block, unwrapping a frozen wrapper.
    pub fn block_view(self: &Rc<Node>) -> Option<BlockView<'_>> {
        match &self.kind {
            NodeKind::Block(data) => Some(BlockView { data, node: self }),
            NodeKind::FrozenBlock(inner) => match &inner.kind {
                NodeKind::Block(data) => Some(BlockView { data, node: inner }),
                _ => panic!("frozen block does not wrap a block"),
            },
            _ => None,
        }
    }

    // ----- leaf constructors -----

    pub fn int_lit(reg: &BackEdges, pos: Pos, value: i64) -> Rc<Node> {
        Node::leaf(reg, pos, NodeKind::IntLit(value))
    }

    pub fn float_lit(reg: &BackEdges, pos: Pos, value: f64) -> Rc<Node> {
        Node::leaf(reg, pos, NodeKind::FloatLit(value))
    }

    pub fn str_lit(reg: &BackEdges, pos: Pos, value: impl Into<Rc<str>>) -> Rc<Node> {
        Node::leaf(reg, pos, NodeKind::StrLit(value.into()))
    }

    pub fn bytes_lit(reg: &BackEdges, pos: Pos, value: impl Into<Rc<[u8]>>) -> Rc<Node> {
        Node::leaf(reg, pos, NodeKind::BytesLit(value.into()))
    }

    fn leaf(reg: &BackEdges, pos: Pos, kind: NodeKind) -> Rc<Node> {
        Rc::new(Node {
            pos,
            backs: RefCell::new(reg.empty_set()),
            kind,
        })
    }

    pub fn access(pos: Pos, base: Rc<Node>, attr: Attr) -> Rc<Node> {
        let backs = base.back_edges();
        Rc::new(Node {
            pos,
            backs: RefCell::new(backs),
            kind: NodeKind::Access { base, attr },
        })
    }

    pub fn back_edge(reg: &BackEdges, pos: Pos, scope: &Rc<Node>) -> Rc<Node> {
        let edge = EdgeRef::new(scope);
        Rc::new(Node {
            pos,
            backs: RefCell::new(reg.singleton(edge.edge_id)),
            kind: NodeKind::BackEdge(edge),
        })
    }

    pub fn builtin_op(reg: &BackEdges, pos: Pos, scope: &Rc<Node>, op: BuiltInOp) -> Rc<Node> {
        let edge = EdgeRef::new(scope);
        Rc::new(Node {
            pos,
            backs: RefCell::new(reg.singleton(edge.edge_id)),
            kind: NodeKind::BuiltInOp { scope: edge, op },
        })
    }

    /// Wrap a block so later clones treat it as closed. Idempotent.
    pub fn frozen_block(reg: &BackEdges, block: Rc<Node>) -> Rc<Node> {
        if matches!(block.kind, NodeKind::FrozenBlock(_)) {
            return block;
        }
        let pos = block.pos.clone();
        Rc::new(Node {
            pos,
            backs: RefCell::new(reg.empty_set()),
            kind: NodeKind::FrozenBlock(block),
        })
    }

    // ----- scope constructors -----

    /// Build a block whose body may reference the block itself. The
    /// builder receives the allocated (still empty) scope; the node is
    /// frozen from the caller's point of view once this returns.
    pub fn try_block<F>(reg: &BackEdges, pos: Pos, build: F) -> Result<Rc<Node>, Error>
    where
        F: FnOnce(&Rc<Node>) -> Result<FxHashMap<Attr, Rc<Node>>, Error>,
    {
        let node = Node::block_skeleton(reg, pos, reg.make_edge_id(), FxHashMap::default());
        let defs = build(&node)?;
        node.finish_block(reg, defs);
        Ok(node)
    }

    /// Infallible variant of [`Node::try_block`] for host-built scopes.
    pub fn block<F>(reg: &BackEdges, pos: Pos, build: F) -> Rc<Node>
    where
        F: FnOnce(&Rc<Node>) -> FxHashMap<Attr, Rc<Node>>,
    {
        match Node::try_block(reg, pos, |scope| Ok(build(scope))) {
            Ok(node) => node,
            Err(_) => unreachable!("infallible block builder"),
        }
    }

    /// Allocate an empty block sharing `edge_id`. Used by the cloning
    /// engine and by override evaluation, which install the definitions
    /// afterwards.
    pub(crate) fn block_skeleton(
        reg: &BackEdges,
        pos: Pos,
        edge_id: BackEdgeId,
        aliases: FxHashMap<Attr, Attr>,
    ) -> Rc<Node> {
        Rc::new(Node {
            pos,
            backs: RefCell::new(reg.empty_set()),
            kind: NodeKind::Block(BlockData {
                edge_id,
                defs: RefCell::new(Rc::new(DefMap::flat_empty())),
                aliases,
            }),
        })
    }

    fn finish_block(self: &Rc<Node>, reg: &BackEdges, defs: FxHashMap<Attr, Rc<Node>>) {
        let backs = merge_backs(reg, defs.values());
        let NodeKind::Block(data) = &self.kind else {
            panic!("finish_block on a non-block");
        };
        *data.defs.borrow_mut() = Rc::new(DefMap::flat(defs));
        self.set_back_edges(backs);
    }

    /// Install a pre-assembled definition map and back-edge set on a
    /// skeleton block.
    pub(crate) fn install_defs(
        self: &Rc<Node>,
        defs: Rc<DefMap>,
        backs: Rc<BackEdgeSet>,
    ) {
        let NodeKind::Block(data) = &self.kind else {
            panic!("install_defs on a non-block");
        };
        *data.defs.borrow_mut() = defs;
        self.set_back_edges(backs);
    }

    /// Build an override scope; like [`Node::try_block`], the builder
    /// receives the allocated scope and returns the overriding and eager
    /// definition maps.
    #[allow(clippy::type_complexity)]
    pub fn try_override<F>(
        reg: &BackEdges,
        pos: Pos,
        base: Rc<Node>,
        aliases: FxHashMap<Attr, Attr>,
        build: F,
    ) -> Result<Rc<Node>, Error>
    where
        F: FnOnce(
            &Rc<Node>,
        ) -> Result<(FxHashMap<Attr, Rc<Node>>, FxHashMap<Attr, Rc<Node>>), Error>,
    {
        let base_backs = base.back_edges();
        let node = Rc::new(Node {
            pos,
            backs: RefCell::new(base_backs.clone()),
            kind: NodeKind::Override(OverrideData {
                edge_id: reg.make_edge_id(),
                base,
                defs: RefCell::new(FxHashMap::default()),
                eager: RefCell::new(FxHashMap::default()),
                aliases,
            }),
        });
        let (defs, eager) = build(&node)?;

        let mut backs = base_backs;
        for map in [&defs, &eager] {
            backs = reg.merge(&backs, &merge_backs(reg, map.values()));
        }
        let NodeKind::Override(data) = &node.kind else {
            unreachable!();
        };
        *data.defs.borrow_mut() = defs;
        *data.eager.borrow_mut() = eager;
        node.set_back_edges(backs);
        Ok(node)
    }
}

impl BlockData {
    pub(crate) fn defs(&self) -> Rc<DefMap> {
        self.defs.borrow().clone()
    }

    pub(crate) fn defines(&self, attr: Attr) -> bool {
        self.defs.borrow().has(attr) || self.aliases.contains_key(&attr)
    }
}

/// Merge back-edge sets of a collection of children, in sorted attribute
/// order so the memoized unions hit their cache.
fn merge_backs<'a>(
    reg: &BackEdges,
    children: impl Iterator<Item = &'a Rc<Node>>,
) -> Rc<BackEdgeSet> {
    let mut sets: Vec<Rc<BackEdgeSet>> = children.map(|c| c.back_edges()).collect();
    sets.sort_by_key(|s| Rc::as_ptr(s) as usize);
    let mut acc = reg.empty_set();
    for s in sets {
        acc = reg.merge(&acc, &s);
    }
    acc
}

/// Structurally copy `node`, rewriting back edges whose target id is in
/// `rewrite` and freezing those whose target id is in `freeze`. Returns
/// the node unchanged (shared) when neither can affect its interior.
pub fn clone_node(
    reg: &BackEdges,
    node: &Rc<Node>,
    rewrite: &Rewrite,
    freeze: &Rc<BackEdgeSet>,
) -> Rc<Node> {
    clone_rec(reg, node, rewrite, freeze, false)
}

fn clone_rec(
    reg: &BackEdges,
    node: &Rc<Node>,
    rewrite: &Rewrite,
    freeze: &Rc<BackEdgeSet>,
    inside: bool,
) -> Rc<Node> {
    let backs = node.back_edges();
    let relevant = rewrite.restrict(&backs);
    let frozen_hit = !freeze.is_empty() && backs.intersects(freeze);
    if relevant.is_empty() && !frozen_hit {
        // A reference to a foreign scope surviving inside a copied
        // structure must keep that scope alive on its own: the copy can
        // outlive the scope's original owner.
        if inside {
            match &node.kind {
                NodeKind::BackEdge(edge) if !edge.is_pinned() => {
                    return Rc::new(Node {
                        pos: node.pos.clone(),
                        backs: RefCell::new(reg.singleton(edge.edge_id)),
                        kind: NodeKind::BackEdge(EdgeRef::pinned(edge.target())),
                    });
                }
                NodeKind::BuiltInOp { scope, op } if !scope.is_pinned() => {
                    return Rc::new(Node {
                        pos: node.pos.clone(),
                        backs: RefCell::new(reg.singleton(scope.edge_id)),
                        kind: NodeKind::BuiltInOp {
                            scope: EdgeRef::pinned(scope.target()),
                            op: op.clone(),
                        },
                    });
                }
                _ => {}
            }
        }
        return node.clone();
    }

    match &node.kind {
        NodeKind::IntLit(_)
        | NodeKind::FloatLit(_)
        | NodeKind::StrLit(_)
        | NodeKind::BytesLit(_) => node.clone(),

        NodeKind::Access { base, attr } => {
            let base = clone_rec(reg, base, &relevant, freeze, true);
            Node::access(node.pos.clone(), base, *attr)
        }

        NodeKind::Block(data) => {
            let new = Node::block_skeleton(
                reg,
                node.pos.clone(),
                data.edge_id,
                data.aliases.clone(),
            );
            let ext = relevant.with_scope(data.edge_id, &new);
            let entries = data.defs().to_map(reg, &Default::default());
            let mut defs = FxHashMap::default();
            for (k, v) in sorted_entries(entries) {
                defs.insert(k, clone_rec(reg, &v, &ext, freeze, true));
            }
            new.finish_block(reg, defs);
            new
        }

        NodeKind::Override(data) => {
            let base = clone_rec(reg, &data.base, &relevant, freeze, true);
            let new = Rc::new(Node {
                pos: node.pos.clone(),
                backs: RefCell::new(base.back_edges()),
                kind: NodeKind::Override(OverrideData {
                    edge_id: data.edge_id,
                    base,
                    defs: RefCell::new(FxHashMap::default()),
                    eager: RefCell::new(FxHashMap::default()),
                    aliases: data.aliases.clone(),
                }),
            });
            let ext = relevant.with_scope(data.edge_id, &new);

            let mut backs = new.back_edges();
            let mut cloned_defs = FxHashMap::default();
            for (k, v) in sorted_entries(data.defs.borrow().clone()) {
                let c = clone_rec(reg, &v, &ext, freeze, true);
                backs = reg.merge(&backs, &c.back_edges());
                cloned_defs.insert(k, c);
            }
            let mut cloned_eager = FxHashMap::default();
            for (k, v) in sorted_entries(data.eager.borrow().clone()) {
                let c = clone_rec(reg, &v, &ext, freeze, true);
                backs = reg.merge(&backs, &c.back_edges());
                cloned_eager.insert(k, c);
            }

            let NodeKind::Override(new_data) = &new.kind else {
                unreachable!();
            };
            *new_data.defs.borrow_mut() = cloned_defs;
            *new_data.eager.borrow_mut() = cloned_eager;
            new.set_back_edges(backs);
            new
        }

        NodeKind::BackEdge(edge) => {
            if freeze.contains(edge.edge_id) {
                return Rc::new(Node {
                    pos: node.pos.clone(),
                    backs: RefCell::new(reg.empty_set()),
                    kind: NodeKind::FrozenBackEdge(FrozenEdge {
                        edge_id: edge.edge_id,
                        scope: edge.target(),
                    }),
                });
            }
            let target = relevant.get(edge.edge_id).unwrap_or_else(|| {
                panic!("cloned a back edge without a rewrite entry for its target")
            });
            Node::back_edge(reg, node.pos.clone(), &target)
        }

        NodeKind::BuiltInOp { scope, op } => {
            let target = relevant.get(scope.edge_id).unwrap_or_else(|| {
                panic!("cloned a built-in op without a rewrite entry for its scope")
            });
            Node::builtin_op(reg, node.pos.clone(), &target, op.clone())
        }

        NodeKind::FrozenBackEdge(_) | NodeKind::FrozenBlock(_) => {
            // Frozen nodes advertise an empty back-edge set, so the
            // short-circuit above must have taken.
            panic!("cannot clone a frozen node")
        }
    }
}

/// Build a new block extending `block` with `extra` definitions, sharing
/// the scope id: the base definitions are cloned lazily under a rewrite of
/// the old scope to the new one. This is how literal values are minted
/// from their prototype and how the host grafts streams onto `io`.
pub fn block_with_overrides(
    reg: &BackEdges,
    block: &Rc<Node>,
    pos: Pos,
    extra: FxHashMap<Attr, Rc<Node>>,
) -> Rc<Node> {
    let view = block
        .block_view()
        .unwrap_or_else(|| panic!("block_with_overrides on a non-block"));
    let edge_id = view.data.edge_id;
    let inner_backs = view.node.back_edges();
    let base_defs = view.data.defs();
    let aliases = view.data.aliases.clone();

    let new = Node::block_skeleton(reg, pos, edge_id, aliases);
    let base_layer = DefMap::new_clone(base_defs, Rewrite::single(edge_id, &new));
    let extras_backs = merge_backs(reg, extra.values());
    let defs = DefMap::maybe_flatten(
        reg,
        Rc::new(DefMap::new_override(
            Rc::new(DefMap::flat(extra)),
            Rc::new(base_layer),
        )),
    );
    new.install_defs(defs, reg.merge(&inner_backs, &extras_backs));
    new
}

pub(crate) fn sorted_entries(map: FxHashMap<Attr, Rc<Node>>) -> Vec<(Attr, Rc<Node>)> {
    let mut entries: Vec<(Attr, Rc<Node>)> = map.into_iter().collect();
    entries.sort_by_key(|(k, _)| *k);
    entries
}

/// Collapse the lazy structure under `node`: definition maps flatten to
/// their concrete form and children are visited once each. Back edges are
/// not followed, so the walk terminates on cyclic graphs. Purely an
/// optimization; observable semantics never change.
pub fn flatten_node(reg: &BackEdges, node: &Rc<Node>) {
    let mut visited = rustc_hash::FxHashSet::default();
    flatten_rec(reg, node, &mut visited);
}

fn flatten_rec(
    reg: &BackEdges,
    node: &Rc<Node>,
    visited: &mut rustc_hash::FxHashSet<*const Node>,
) {
    if !visited.insert(Rc::as_ptr(node)) {
        return;
    }
    match &node.kind {
        NodeKind::Access { base, .. } => flatten_rec(reg, base, visited),
        NodeKind::Block(data) => {
            let flat = data.defs().to_map(reg, &Default::default());
            *data.defs.borrow_mut() = Rc::new(DefMap::flat(flat.clone()));
            for child in flat.values() {
                flatten_rec(reg, child, visited);
            }
        }
        NodeKind::Override(data) => {
            flatten_rec(reg, &data.base, visited);
            let children: Vec<Rc<Node>> = data
                .defs
                .borrow()
                .values()
                .chain(data.eager.borrow().values())
                .cloned()
                .collect();
            for child in &children {
                flatten_rec(reg, child, visited);
            }
        }
        NodeKind::FrozenBlock(inner) => flatten_rec(reg, inner, visited),
        NodeKind::BackEdge(_)
        | NodeKind::FrozenBackEdge(_)
        | NodeKind::BuiltInOp { .. }
        | NodeKind::IntLit(_)
        | NodeKind::FloatLit(_)
        | NodeKind::StrLit(_)
        | NodeKind::BytesLit(_) => {}
    }
}

/// Render the attribute names a block exposes, for "unable to access"
/// diagnostics.
pub fn available_attrs(attrs: &AttrTable, view: &BlockView<'_>) -> String {
    let mut names: Vec<String> = view
        .data
        .defs()
        .keys()
        .into_iter()
        .chain(view.data.aliases.keys().copied())
        .map(|a| attrs.name(a).to_string())
        .collect();
    names.sort();
    names.dedup();
    names.join(", ")
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind_name(), self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (AttrTable, BackEdges) {
        (AttrTable::new(), BackEdges::new())
    }

    fn pos() -> Pos {
        Pos::new("test", 1, 1)
    }

    #[test]
    fn test_literals_have_empty_back_edges() {
        let (_, reg) = setup();
        let n = Node::int_lit(&reg, pos(), 7);
        assert!(n.back_edges().is_empty());
    }

    #[test]
    fn test_block_back_edges_include_self_edge() {
        let (attrs, reg) = setup();
        let x = attrs.get("x");
        let block = Node::block(&reg, pos(), |scope| {
            let mut defs = FxHashMap::default();
            defs.insert(x, Node::back_edge(&reg, pos(), scope));
            defs
        });
        let id = block.scope_edge_id().unwrap();
        assert!(block.back_edges().contains(id));
    }

    #[test]
    fn test_clone_with_empty_rewrite_shares() {
        let (attrs, reg) = setup();
        let x = attrs.get("x");
        let block = Node::block(&reg, pos(), |scope| {
            let mut defs = FxHashMap::default();
            defs.insert(x, Node::back_edge(&reg, pos(), scope));
            defs
        });
        let cloned = clone_node(&reg, &block, &Rewrite::default(), &reg.empty_set());
        assert!(Rc::ptr_eq(&block, &cloned));
    }

    #[test]
    fn test_clone_rewrites_back_edge_to_new_scope() {
        let (attrs, reg) = setup();
        let x = attrs.get("x");
        let block = Node::block(&reg, pos(), |scope| {
            let mut defs = FxHashMap::default();
            defs.insert(x, Node::back_edge(&reg, pos(), scope));
            defs
        });
        let id = block.scope_edge_id().unwrap();
        let cloned = clone_node(&reg, &block, &Rewrite::single(id, &block), &reg.empty_set());
        assert!(!Rc::ptr_eq(&block, &cloned));
        // The clone keeps the scope id and rebinds its interior edge.
        assert_eq!(cloned.scope_edge_id(), Some(id));
        let view = cloned.block_view().unwrap();
        let inner = view.data.defs().get(&reg, x).unwrap();
        match &inner.kind {
            NodeKind::BackEdge(e) => assert!(Rc::ptr_eq(&e.target(), &cloned)),
            _ => panic!("expected back edge, got {}", inner.kind_name()),
        }
    }

    #[test]
    fn test_clone_freezes_marked_edges() {
        let (_, reg) = setup();
        let outer = Node::block(&reg, pos(), |_| FxHashMap::default());
        let outer_id = outer.scope_edge_id().unwrap();
        let edge = Node::back_edge(&reg, pos(), &outer);
        let freeze = reg.singleton(outer_id);
        let frozen = clone_node(&reg, &edge, &Rewrite::default(), &freeze);
        match &frozen.kind {
            NodeKind::FrozenBackEdge(f) => {
                assert!(Rc::ptr_eq(&f.scope, &outer));
                assert!(frozen.back_edges().is_empty());
            }
            _ => panic!("expected frozen back edge, got {}", frozen.kind_name()),
        }
        // A frozen edge is inert under later clones.
        let again = clone_node(
            &reg,
            &frozen,
            &Rewrite::single(outer_id, &outer),
            &reg.empty_set(),
        );
        assert!(Rc::ptr_eq(&frozen, &again));
    }

    #[test]
    fn test_clone_back_edge_set_law() {
        // clone(n, r, f) back edges = (n.backs \ keys(r) \ f) ∪ ids kept by r.
        let (attrs, reg) = setup();
        let x = attrs.get("x");
        let y = attrs.get("y");
        let outer = Node::block(&reg, pos(), |_| FxHashMap::default());
        let outer_id = outer.scope_edge_id().unwrap();
        let block = Node::block(&reg, pos(), |scope| {
            let mut defs = FxHashMap::default();
            defs.insert(x, Node::back_edge(&reg, pos(), scope));
            defs.insert(y, Node::back_edge(&reg, pos(), &outer));
            defs
        });
        let self_id = block.scope_edge_id().unwrap();
        assert!(block.back_edges().contains(outer_id));

        // Freeze the outer edge while rewriting the self edge.
        let cloned = clone_node(
            &reg,
            &block,
            &Rewrite::single(self_id, &block),
            &reg.singleton(outer_id),
        );
        let backs = cloned.back_edges();
        assert!(backs.contains(self_id));
        assert!(!backs.contains(outer_id));
    }

    #[test]
    fn test_block_with_overrides_shadows_and_keeps_base() {
        let (attrs, reg) = setup();
        let a = attrs.get("a");
        let b = attrs.get("b");
        let base = Node::block(&reg, pos(), |_| {
            let mut defs = FxHashMap::default();
            defs.insert(a, Node::int_lit(&reg, pos(), 1));
            defs.insert(b, Node::int_lit(&reg, pos(), 2));
            defs
        });
        let mut extra = FxHashMap::default();
        extra.insert(a, Node::int_lit(&reg, pos(), 10));
        let derived = block_with_overrides(&reg, &base, pos(), extra);
        let view = derived.block_view().unwrap();
        let got_a = view.data.defs().get(&reg, a).unwrap();
        let got_b = view.data.defs().get(&reg, b).unwrap();
        assert!(matches!(got_a.kind, NodeKind::IntLit(10)));
        assert!(matches!(got_b.kind, NodeKind::IntLit(2)));
        assert_eq!(derived.scope_edge_id(), base.scope_edge_id());
    }
}
