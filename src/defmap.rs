//! Lazy attribute-to-node mappings.
//!
//! A definition map is a thin tree of three layer kinds. `Flat` is a
//! concrete map. `Clone` wraps an inner map with a pending back-edge
//! rewrite and clones values on first lookup, caching the results — this
//! is what makes an override O(touched attributes) instead of O(block
//! size). `Override` shadows an inner map with a higher-precedence one.
//! Each layer reports a depth; once the tree is deeper than
//! [`FLATTEN_DEPTH`] it is collapsed to `Flat` before further use.

use crate::attr::Attr;
use crate::backedge::BackEdges;
use crate::node::{clone_node, Node, Rewrite};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;

/// Nesting depth beyond which a map is collapsed to flat form.
pub const FLATTEN_DEPTH: u32 = 8;

pub enum DefMap {
    Flat(FxHashMap<Attr, Rc<Node>>),
    Clone(CloneLayer),
    Override(OverrideLayer),
}

pub struct CloneLayer {
    inner: Rc<DefMap>,
    inner_depth: u32,
    rewrite: Rewrite,
    cache: RefCell<FxHashMap<Attr, Rc<Node>>>,
}

pub struct OverrideLayer {
    high: Rc<DefMap>,
    inner: Rc<DefMap>,
    max_depth: u32,
}

impl DefMap {
    pub fn flat(map: FxHashMap<Attr, Rc<Node>>) -> DefMap {
        DefMap::Flat(map)
    }

    pub fn flat_empty() -> DefMap {
        DefMap::Flat(FxHashMap::default())
    }

    /// Wrap `inner` with a pending rewrite. Wrapping a `Clone` layer
    /// composes the rewrites into a single layer instead of stacking, so
    /// tight override loops never allocate intermediate clones.
    pub fn new_clone(inner: Rc<DefMap>, rewrite: Rewrite) -> DefMap {
        if let DefMap::Clone(c) = &*inner {
            return DefMap::Clone(CloneLayer {
                inner: c.inner.clone(),
                inner_depth: c.inner_depth,
                rewrite: Rewrite::compose(&c.rewrite, &rewrite),
                cache: RefCell::new(FxHashMap::default()),
            });
        }
        let inner_depth = inner.depth();
        DefMap::Clone(CloneLayer {
            inner,
            inner_depth,
            rewrite,
            cache: RefCell::new(FxHashMap::default()),
        })
    }

    /// A map where `high` shadows `inner`.
    pub fn new_override(high: Rc<DefMap>, inner: Rc<DefMap>) -> DefMap {
        let max_depth = high.depth().max(inner.depth());
        DefMap::Override(OverrideLayer {
            high,
            inner,
            max_depth,
        })
    }

    /// How many levels of wrapping this map is; approximates lookup cost
    /// relative to a flat map.
    pub fn depth(&self) -> u32 {
        match self {
            DefMap::Flat(_) => 1,
            DefMap::Clone(c) => c.inner_depth + 1,
            DefMap::Override(o) => o.max_depth + 1,
        }
    }

    pub fn get(&self, reg: &BackEdges, k: Attr) -> Option<Rc<Node>> {
        match self {
            DefMap::Flat(m) => m.get(&k).cloned(),
            DefMap::Clone(c) => {
                if let Some(hit) = c.cache.borrow().get(&k) {
                    return Some(hit.clone());
                }
                let v = c.inner.get(reg, k)?;
                let cloned = clone_node(reg, &v, &c.rewrite, &reg.empty_set());
                c.cache.borrow_mut().insert(k, cloned.clone());
                Some(cloned)
            }
            DefMap::Override(o) => o.high.get(reg, k).or_else(|| o.inner.get(reg, k)),
        }
    }

    /// Whether `k` is defined, without forcing any pending clone.
    pub fn has(&self, k: Attr) -> bool {
        match self {
            DefMap::Flat(m) => m.contains_key(&k),
            DefMap::Clone(c) => c.inner.has(k),
            DefMap::Override(o) => o.high.has(k) || o.inner.has(k),
        }
    }

    /// All defined attributes, shadowed entries included once.
    pub fn keys(&self) -> Vec<Attr> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_keys(&self, out: &mut Vec<Attr>) {
        match self {
            DefMap::Flat(m) => out.extend(m.keys().copied()),
            DefMap::Clone(c) => c.inner.collect_keys(out),
            DefMap::Override(o) => {
                o.high.collect_keys(out);
                o.inner.collect_keys(out);
            }
        }
    }

    /// Materialize the full join, skipping `skip`. The result is owned by
    /// the caller. This forces every pending clone, so it is only used
    /// when flattening or deep-copying a scope.
    pub fn to_map(&self, reg: &BackEdges, skip: &FxHashSet<Attr>) -> FxHashMap<Attr, Rc<Node>> {
        match self {
            DefMap::Flat(m) => m
                .iter()
                .filter(|(k, _)| !skip.contains(k))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            DefMap::Clone(c) => {
                let mut out = FxHashMap::default();
                for k in c.inner.keys() {
                    if skip.contains(&k) {
                        continue;
                    }
                    if let Some(v) = self.get(reg, k) {
                        out.insert(k, v);
                    }
                }
                out
            }
            DefMap::Override(o) => {
                let mut out = o.high.to_map(reg, skip);
                let mut inner_skip = skip.clone();
                inner_skip.extend(out.keys().copied());
                for (k, v) in o.inner.to_map(reg, &inner_skip) {
                    out.insert(k, v);
                }
                out
            }
        }
    }

    /// Collapse to flat form when the tree is too deep.
    pub fn maybe_flatten(reg: &BackEdges, dm: Rc<DefMap>) -> Rc<DefMap> {
        if dm.depth() > FLATTEN_DEPTH {
            Rc::new(DefMap::flat(dm.to_map(reg, &FxHashSet::default())))
        } else {
            dm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrTable;
    use crate::node::NodeKind;
    use crate::position::Pos;

    fn pos() -> Pos {
        Pos::new("test", 1, 1)
    }

    fn lit(reg: &BackEdges, v: i64) -> Rc<Node> {
        Node::int_lit(reg, pos(), v)
    }

    fn int_of(n: &Rc<Node>) -> i64 {
        match n.kind {
            NodeKind::IntLit(v) => v,
            _ => panic!("expected int literal"),
        }
    }

    #[test]
    fn test_flat_get_and_has() {
        let attrs = AttrTable::new();
        let reg = BackEdges::new();
        let a = attrs.get("a");
        let b = attrs.get("b");
        let mut m = FxHashMap::default();
        m.insert(a, lit(&reg, 1));
        let dm = DefMap::flat(m);
        assert_eq!(int_of(&dm.get(&reg, a).unwrap()), 1);
        assert!(dm.get(&reg, b).is_none());
        assert!(dm.has(a));
        assert!(!dm.has(b));
        assert_eq!(dm.depth(), 1);
    }

    #[test]
    fn test_override_shadows_inner() {
        let attrs = AttrTable::new();
        let reg = BackEdges::new();
        let a = attrs.get("a");
        let b = attrs.get("b");
        let mut inner = FxHashMap::default();
        inner.insert(a, lit(&reg, 1));
        inner.insert(b, lit(&reg, 2));
        let mut high = FxHashMap::default();
        high.insert(a, lit(&reg, 10));
        let dm = DefMap::new_override(
            Rc::new(DefMap::flat(high)),
            Rc::new(DefMap::flat(inner)),
        );
        assert_eq!(int_of(&dm.get(&reg, a).unwrap()), 10);
        assert_eq!(int_of(&dm.get(&reg, b).unwrap()), 2);
        assert_eq!(dm.depth(), 2);
        let keys = dm.keys();
        assert_eq!(keys, vec![a, b]);
    }

    #[test]
    fn test_clone_layer_caches() {
        let attrs = AttrTable::new();
        let reg = BackEdges::new();
        let a = attrs.get("a");
        let mut inner = FxHashMap::default();
        inner.insert(a, lit(&reg, 5));
        let dm = DefMap::new_clone(Rc::new(DefMap::flat(inner)), Rewrite::default());
        let first = dm.get(&reg, a).unwrap();
        let second = dm.get(&reg, a).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_clone_of_clone_composes() {
        let attrs = AttrTable::new();
        let reg = BackEdges::new();
        let a = attrs.get("a");
        let mut inner = FxHashMap::default();
        inner.insert(a, lit(&reg, 5));
        let once = Rc::new(DefMap::new_clone(
            Rc::new(DefMap::flat(inner)),
            Rewrite::default(),
        ));
        let twice = DefMap::new_clone(once.clone(), Rewrite::default());
        // Composition keeps the depth of a single layer.
        assert_eq!(once.depth(), twice.depth());
    }

    #[test]
    fn test_to_map_joins_layers() {
        let attrs = AttrTable::new();
        let reg = BackEdges::new();
        let a = attrs.get("a");
        let b = attrs.get("b");
        let mut inner = FxHashMap::default();
        inner.insert(a, lit(&reg, 1));
        inner.insert(b, lit(&reg, 2));
        let mut high = FxHashMap::default();
        high.insert(a, lit(&reg, 10));
        let dm = DefMap::new_override(
            Rc::new(DefMap::flat(high)),
            Rc::new(DefMap::flat(inner)),
        );
        let map = dm.to_map(&reg, &FxHashSet::default());
        assert_eq!(map.len(), 2);
        assert_eq!(int_of(&map[&a]), 10);
        assert_eq!(int_of(&map[&b]), 2);
    }

    #[test]
    fn test_maybe_flatten_collapses_deep_trees() {
        let attrs = AttrTable::new();
        let reg = BackEdges::new();
        let a = attrs.get("a");
        let mut inner = FxHashMap::default();
        inner.insert(a, lit(&reg, 1));
        let mut dm: Rc<DefMap> = Rc::new(DefMap::flat(inner));
        for _ in 0..FLATTEN_DEPTH {
            dm = Rc::new(DefMap::new_override(
                Rc::new(DefMap::flat_empty()),
                dm,
            ));
        }
        assert!(dm.depth() > FLATTEN_DEPTH);
        let flattened = DefMap::maybe_flatten(&reg, dm);
        assert_eq!(flattened.depth(), 1);
        assert_eq!(int_of(&flattened.get(&reg, a).unwrap()), 1);
    }
}
