//! Attribute name interner.
//!
//! Attribute names are interned to dense integer ids so that definition
//! maps, alias tables, and access nodes compare and hash on a `u32`. The
//! reverse mapping exists for diagnostics only.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// An interned attribute name. Ids are dense from 0 within one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attr(u32);

impl Attr {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interning table. Single-threaded; lives inside the `Context`.
#[derive(Debug, Default)]
pub struct AttrTable {
    ids: RefCell<FxHashMap<Rc<str>, Attr>>,
    names: RefCell<Vec<Rc<str>>>,
}

impl AttrTable {
    pub fn new() -> Self {
        AttrTable::default()
    }

    /// Intern `name`, allocating the next id on first use.
    pub fn get(&self, name: &str) -> Attr {
        if let Some(&id) = self.ids.borrow().get(name) {
            return id;
        }
        let mut names = self.names.borrow_mut();
        let id = Attr(names.len() as u32);
        let shared: Rc<str> = name.into();
        names.push(shared.clone());
        self.ids.borrow_mut().insert(shared, id);
        id
    }

    /// Name for an id. Only used when building error messages.
    pub fn name(&self, attr: Attr) -> Rc<str> {
        self.names.borrow()[attr.index()].clone()
    }

    pub fn len(&self) -> usize {
        self.names.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_lookup() {
        let table = AttrTable::new();
        let a = table.get("result");
        let b = table.get("_inner");
        let a2 = table.get("result");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(&*table.name(a), "result");
        assert_eq!(&*table.name(b), "_inner");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_ids_are_dense_from_zero() {
        let table = AttrTable::new();
        let ids: Vec<usize> = ["x", "y", "z"].iter().map(|n| table.get(n).index()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
