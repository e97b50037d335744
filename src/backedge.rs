//! Back-edge identifiers and hash-consed id sets.
//!
//! Every constructed scope gets a unique `BackEdgeId`, and every node
//! carries the set of ids reachable through back edges inside it. These
//! sets are compared on every clone, so the registry hash-conses them:
//! two sets with the same members are the same `Rc`, set equality is
//! pointer equality, and unions are memoized by pointer pair.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Unique id of a scope, allocated by [`BackEdges::make_edge_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackEdgeId(u64);

/// An immutable, hash-consed set of back-edge ids. Always obtained
/// through a [`BackEdges`] registry; never constructed directly.
#[derive(Debug, PartialEq, Eq)]
pub struct BackEdgeSet {
    ids: Box<[BackEdgeId]>, // sorted, deduplicated
}

impl BackEdgeSet {
    pub fn contains(&self, id: BackEdgeId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = BackEdgeId> + '_ {
        self.ids.iter().copied()
    }

    /// True when the two sets share at least one id.
    pub fn intersects(&self, other: &BackEdgeSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().any(|id| large.contains(id))
    }
}

/// Id space plus the set and union caches. One per `Context`.
pub struct BackEdges {
    counter: Cell<u64>,
    sets: RefCell<FxHashMap<Box<[BackEdgeId]>, Rc<BackEdgeSet>>>,
    merges: RefCell<FxHashMap<(usize, usize), Rc<BackEdgeSet>>>,
}

impl BackEdges {
    pub fn new() -> Self {
        BackEdges {
            counter: Cell::new(0),
            sets: RefCell::new(FxHashMap::default()),
            merges: RefCell::new(FxHashMap::default()),
        }
    }

    /// Allocate a fresh, never-before-seen id.
    pub fn make_edge_id(&self) -> BackEdgeId {
        let next = self.counter.get() + 1;
        self.counter.set(next);
        BackEdgeId(next)
    }

    /// The canonical empty set.
    pub fn empty_set(&self) -> Rc<BackEdgeSet> {
        self.make_set(&[])
    }

    /// The canonical singleton set.
    pub fn singleton(&self, id: BackEdgeId) -> Rc<BackEdgeSet> {
        self.make_set(&[id])
    }

    /// Canonicalize an arbitrary id list into a shared set handle.
    pub fn make_set(&self, ids: &[BackEdgeId]) -> Rc<BackEdgeSet> {
        let mut sorted: Vec<BackEdgeId> = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let key: Box<[BackEdgeId]> = sorted.into_boxed_slice();
        if let Some(existing) = self.sets.borrow().get(&key) {
            return existing.clone();
        }
        let set = Rc::new(BackEdgeSet { ids: key.clone() });
        self.sets.borrow_mut().insert(key, set.clone());
        set
    }

    /// Memoized union. Keys are canonicalized pointer pairs; the registry
    /// retains every set it hands out, so the pointers stay valid for the
    /// registry's lifetime.
    pub fn merge(&self, a: &Rc<BackEdgeSet>, b: &Rc<BackEdgeSet>) -> Rc<BackEdgeSet> {
        if Rc::ptr_eq(a, b) || b.is_empty() {
            return a.clone();
        }
        if a.is_empty() {
            return b.clone();
        }
        let pa = Rc::as_ptr(a) as usize;
        let pb = Rc::as_ptr(b) as usize;
        let key = (pa.min(pb), pa.max(pb));
        if let Some(existing) = self.merges.borrow().get(&key) {
            return existing.clone();
        }
        let mut ids: Vec<BackEdgeId> = a.iter().chain(b.iter()).collect();
        ids.sort_unstable();
        ids.dedup();
        let result = self.make_set(&ids);
        self.merges.borrow_mut().insert(key, result.clone());
        result
    }
}

impl Default for BackEdges {
    fn default() -> Self {
        BackEdges::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_ids_are_unique() {
        let reg = BackEdges::new();
        let a = reg.make_edge_id();
        let b = reg.make_edge_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sets_are_hash_consed() {
        let reg = BackEdges::new();
        let (a, b) = (reg.make_edge_id(), reg.make_edge_id());
        let s1 = reg.make_set(&[a, b]);
        let s2 = reg.make_set(&[b, a]);
        assert!(Rc::ptr_eq(&s1, &s2));
        assert!(Rc::ptr_eq(&reg.empty_set(), &reg.empty_set()));
        assert!(!Rc::ptr_eq(&s1, &reg.singleton(a)));
    }

    #[test]
    fn test_contains_and_intersects() {
        let reg = BackEdges::new();
        let (a, b, c) = (reg.make_edge_id(), reg.make_edge_id(), reg.make_edge_id());
        let s = reg.make_set(&[a, c]);
        assert!(s.contains(a));
        assert!(!s.contains(b));
        assert!(s.intersects(&reg.singleton(c)));
        assert!(!s.intersects(&reg.singleton(b)));
        assert!(!s.intersects(&reg.empty_set()));
    }

    #[test]
    fn test_merge_is_memoized_and_canonical() {
        let reg = BackEdges::new();
        let (a, b) = (reg.make_edge_id(), reg.make_edge_id());
        let sa = reg.singleton(a);
        let sb = reg.singleton(b);
        let m1 = reg.merge(&sa, &sb);
        let m2 = reg.merge(&sb, &sa);
        assert!(Rc::ptr_eq(&m1, &m2));
        assert!(Rc::ptr_eq(&m1, &reg.make_set(&[a, b])));
        // Union with the empty set is the identity.
        assert!(Rc::ptr_eq(&reg.merge(&sa, &reg.empty_set()), &sa));
    }
}
