//! Process-wide evaluation state.
//!
//! The context owns the attribute interner, the back-edge registry, the
//! four literal prototypes, the standard-library blocks, and the import
//! cache. All literal values are minted here by cloning a prototype and
//! grafting an `_inner` binding on top.

use crate::attr::AttrTable;
use crate::backedge::BackEdges;
use crate::builtins::{build_protos, literal_from_proto, Protos};
use crate::node::{block_with_overrides, Node};
use crate::position::Pos;
use crate::stdlib;
use crate::Error;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cached import: the module block plus the back-edge node handed to
/// programs. The cache holds the block strongly; the edge only borrows.
struct ImportEntry {
    #[allow(dead_code)] // keeps the imported block alive for the edge
    block: Rc<Node>,
    edge: Rc<Node>,
}

pub struct Context {
    attrs: AttrTable,
    edges: BackEdges,
    protos: Protos,
    builtins: RefCell<FxHashMap<&'static str, Rc<Node>>>,
    imports: RefCell<FxHashMap<PathBuf, ImportEntry>>,
    flatten_flag: Arc<AtomicBool>,
}

impl Context {
    pub fn new() -> Self {
        let attrs = AttrTable::new();
        let edges = BackEdges::new();
        let protos = build_protos(&attrs, &edges);
        let ctx = Context {
            attrs,
            edges,
            protos,
            builtins: RefCell::new(FxHashMap::default()),
            imports: RefCell::new(FxHashMap::default()),
            flatten_flag: Arc::new(AtomicBool::new(false)),
        };
        stdlib::install(&ctx);
        ctx
    }

    pub fn attrs(&self) -> &AttrTable {
        &self.attrs
    }

    pub fn edges(&self) -> &BackEdges {
        &self.edges
    }

    /// The flag the background flattener raises; the evaluator drains it
    /// at safe points.
    pub fn flatten_flag(&self) -> Arc<AtomicBool> {
        self.flatten_flag.clone()
    }

    pub(crate) fn take_flatten_signal(&self) -> bool {
        self.flatten_flag.swap(false, Ordering::Relaxed)
    }

    // ----- literal values -----

    pub fn int_node(&self, pos: Pos, value: i64) -> Rc<Node> {
        let inner = Node::int_lit(&self.edges, pos.clone(), value);
        self.literal(&self.protos.int, pos, inner)
    }

    pub fn float_node(&self, pos: Pos, value: f64) -> Rc<Node> {
        let inner = Node::float_lit(&self.edges, pos.clone(), value);
        self.literal(&self.protos.float, pos, inner)
    }

    pub fn str_node(&self, pos: Pos, value: impl Into<Rc<str>>) -> Rc<Node> {
        let inner = Node::str_lit(&self.edges, pos.clone(), value);
        self.literal(&self.protos.string, pos, inner)
    }

    pub fn bytes_node(&self, pos: Pos, value: impl Into<Rc<[u8]>>) -> Rc<Node> {
        let inner = Node::bytes_lit(&self.edges, pos.clone(), value);
        self.literal(&self.protos.bytes, pos, inner)
    }

    fn literal(&self, proto: &Rc<Node>, pos: Pos, inner: Rc<Node>) -> Rc<Node> {
        literal_from_proto(&self.edges, proto, self.attrs.get("_inner"), pos, inner)
    }

    /// An empty block; the `result` of a successful `maybe` with no
    /// payload.
    pub fn empty_block(&self, pos: Pos) -> Rc<Node> {
        Node::block(&self.edges, pos, |_| FxHashMap::default())
    }

    // ----- standard library -----

    pub(crate) fn register_builtin(&self, name: &'static str, block: Rc<Node>) {
        self.builtins.borrow_mut().insert(name, block);
    }

    pub(crate) fn builtin_block(&self, name: &str) -> Rc<Node> {
        self.builtins
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("standard-library block {name:?} is not registered"))
    }

    /// Build a `maybe`-shaped block: `success = 1` iff `err` is absent,
    /// `result` always present on success, `error` present on failure.
    pub fn maybe(&self, pos: Pos, result: Option<Rc<Node>>, err: Option<&str>) -> Rc<Node> {
        let errors_mod = self.builtin_block("errors");
        let proto = errors_mod
            .block_view()
            .and_then(|view| view.data.defs().get(&self.edges, self.attrs.get("maybe")))
            .unwrap_or_else(|| panic!("errors module does not define 'maybe'"));

        let mut extra = FxHashMap::default();
        extra.insert(
            self.attrs.get("success"),
            self.int_node(pos.clone(), i64::from(err.is_none())),
        );
        if let Some(msg) = err {
            extra.insert(self.attrs.get("error"), self.str_node(pos.clone(), msg));
        }
        match result {
            Some(node) => {
                extra.insert(self.attrs.get("result"), node);
            }
            None if err.is_none() => {
                // Keep the shape uniform even without a payload.
                extra.insert(self.attrs.get("result"), self.empty_block(pos.clone()));
            }
            None => {}
        }
        block_with_overrides(&self.edges, &proto, pos, extra)
    }

    // ----- import -----

    /// Resolve an import path. `stdlib/…` paths return back edges into
    /// the built-in blocks; anything else is resolved against the
    /// importing file's directory, evaluated, and cached by absolute
    /// path.
    pub fn import(&self, pos: &Pos, path: &str) -> Result<Rc<Node>, Error> {
        match path {
            "stdlib/io" | "stdlib/collections" | "stdlib/errors" => {
                let name = path.trim_start_matches("stdlib/");
                let block = self.builtin_block(name);
                tracing::debug!(path, "import resolved to built-in block");
                Ok(Node::back_edge(&self.edges, pos.clone(), &block))
            }
            _ => self.import_file(pos, path),
        }
    }

    fn import_file(&self, pos: &Pos, path: &str) -> Result<Rc<Node>, Error> {
        let base = Path::new(&*pos.file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let joined = base.join(path);
        let abs = joined.canonicalize().map_err(|e| {
            Error::op(
                format!("failed to resolve import {path:?}: {e}"),
                pos.clone(),
            )
        })?;

        if let Some(entry) = self.imports.borrow().get(&abs) {
            tracing::debug!(path = %abs.display(), "import cache hit");
            return Ok(entry.edge.clone());
        }

        let source = std::fs::read_to_string(&abs).map_err(|e| {
            Error::op(format!("failed to read import {path:?}: {e}"), pos.clone())
        })?;
        let file_name = abs.to_string_lossy().into_owned();
        tracing::debug!(path = %abs.display(), "loading import");

        let tokens = crate::lexer::tokenize(&file_name, &source)?;
        let ast = crate::parser::parse(tokens)?;
        let block = ast.to_node(self, &mut Vec::new())?;
        let edge = Node::back_edge(&self.edges, pos.clone(), &block);
        self.imports
            .borrow_mut()
            .insert(abs, ImportEntry { block, edge: edge.clone() });
        Ok(edge)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
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

    fn eval_attr(ctx: &Context, base: Rc<Node>, path: &[&str]) -> Rc<Node> {
        let mut node = base;
        for part in path {
            node = Node::access(pos(), node, ctx.attrs().get(part));
        }
        evaluate(ctx, node, &mut GapStack::new()).unwrap()
    }

    #[test]
    fn test_literal_values_expose_operators() {
        let ctx = Context::new();
        let five = ctx.int_node(pos(), 5);
        let inner = eval_attr(&ctx, five.clone(), &["_inner"]);
        assert!(matches!(inner.kind, NodeKind::IntLit(5)));
        // The prototype's operator table is reachable through the value.
        let view = five.block_view().unwrap();
        assert!(view.data.defines(ctx.attrs().get("add")));
        assert!(view.data.defines(ctx.attrs().get("select")));
    }

    #[test]
    fn test_stdlib_imports_return_same_block() {
        let ctx = Context::new();
        let a = ctx.import(&pos(), "stdlib/collections").unwrap();
        let b = ctx.import(&pos(), "stdlib/collections").unwrap();
        let block_a = evaluate(&ctx, a, &mut GapStack::new()).unwrap();
        let block_b = evaluate(&ctx, b, &mut GapStack::new()).unwrap();
        assert!(Rc::ptr_eq(&block_a, &block_b));
    }

    #[test]
    fn test_maybe_success_shape() {
        let ctx = Context::new();
        let payload = ctx.int_node(pos(), 9);
        let ok = ctx.maybe(pos(), Some(payload), None);
        let success = eval_attr(&ctx, ok.clone(), &["success", "_inner"]);
        assert!(matches!(success.kind, NodeKind::IntLit(1)));
        let result = eval_attr(&ctx, ok, &["result", "_inner"]);
        assert!(matches!(result.kind, NodeKind::IntLit(9)));
    }

    #[test]
    fn test_maybe_success_without_payload_keeps_shape() {
        let ctx = Context::new();
        let ok = ctx.maybe(pos(), None, None);
        let result = evaluate(
            &ctx,
            Node::access(pos(), ok, ctx.attrs().get("result")),
            &mut GapStack::new(),
        )
        .unwrap();
        assert!(result.block_view().is_some());
    }

    #[test]
    fn test_maybe_failure_shape() {
        let ctx = Context::new();
        let bad = ctx.maybe(pos(), None, Some("kaput"));
        let success = eval_attr(&ctx, bad.clone(), &["success", "_inner"]);
        assert!(matches!(success.kind, NodeKind::IntLit(0)));
        let msg = eval_attr(&ctx, bad, &["error", "_inner"]);
        match &msg.kind {
            NodeKind::StrLit(s) => assert_eq!(&**s, "kaput"),
            _ => panic!("expected str"),
        }
    }

    #[test]
    fn test_file_import_is_cached() {
        let ctx = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("mod.rfx");
        std::fs::write(&module, "x = 3\nresult = x + 1\n").unwrap();
        let importer = Pos::new(
            dir.path().join("main.rfx").to_string_lossy().into_owned(),
            1,
            1,
        );

        let first = ctx.import(&importer, "mod.rfx").unwrap();
        let second = ctx.import(&importer, "mod.rfx").unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        let inner = eval_attr(
            &ctx,
            evaluate(&ctx, first, &mut GapStack::new()).unwrap(),
            &["result", "_inner"],
        );
        assert!(matches!(inner.kind, NodeKind::IntLit(4)));
    }

    #[test]
    fn test_missing_import_reports_position() {
        let ctx = Context::new();
        let err = ctx.import(&pos(), "no/such/file.rfx").unwrap_err();
        assert!(err.to_string().contains("failed to resolve import"));
    }
}
