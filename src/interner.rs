//! String interning.
//!
//! Names, symbol paths, and param strings are interned into lightweight
//! `Atom` handles so that equality is a `u32` compare and names can be
//! stored inside interned type and signature keys.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// A lightweight handle to an interned string.
/// Equality check is O(1) - just compare the u32 values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
pub struct Atom(pub u32);

impl Atom {
    /// The empty string is always atom 0.
    pub const NONE: Atom = Atom(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

struct InternerInner {
    strings: Vec<Arc<str>>,
    map: FxHashMap<Arc<str>, Atom>,
}

/// Shared string interner.
///
/// Guarded by a single `RwLock`; interning is write-locked, resolution is
/// read-locked. The resolution core is single-threaded cooperative, so
/// contention is not a concern, but the table is shared with the rest of
/// the front-end.
pub struct StringInterner {
    inner: RwLock<InternerInner>,
}

impl StringInterner {
    pub fn new() -> Self {
        let empty: Arc<str> = Arc::from("");
        let mut map = FxHashMap::default();
        map.insert(empty.clone(), Atom::NONE);
        StringInterner {
            inner: RwLock::new(InternerInner {
                strings: vec![empty],
                map,
            }),
        }
    }

    pub fn intern(&self, s: &str) -> Atom {
        if s.is_empty() {
            return Atom::NONE;
        }

        {
            let inner = self.inner.read().expect("string interner lock poisoned");
            if let Some(&atom) = inner.map.get(s) {
                return atom;
            }
        }

        let mut inner = self.inner.write().expect("string interner lock poisoned");
        if let Some(&atom) = inner.map.get(s) {
            return atom;
        }
        let arc: Arc<str> = Arc::from(s);
        let atom = Atom(inner.strings.len() as u32);
        inner.strings.push(arc.clone());
        inner.map.insert(arc, atom);
        atom
    }

    /// Resolve an atom without allocating a new String.
    pub fn resolve(&self, atom: Atom) -> Arc<str> {
        let inner = self.inner.read().expect("string interner lock poisoned");
        inner
            .strings
            .get(atom.0 as usize)
            .cloned()
            .unwrap_or_else(|| inner.strings[0].clone())
    }

    pub fn try_resolve(&self, atom: Atom) -> Option<Arc<str>> {
        let inner = self.inner.read().expect("string interner lock poisoned");
        inner.strings.get(atom.0 as usize).cloned()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_basic() {
        let interner = StringInterner::new();
        let a1 = interner.intern("hello");
        let a2 = interner.intern("hello");
        let a3 = interner.intern("world");

        assert_eq!(a1, a2, "Same string should return same atom");
        assert_ne!(a1, a3, "Different strings should return different atoms");
        assert_eq!(interner.resolve(a1).as_ref(), "hello");
        assert_eq!(interner.resolve(a3).as_ref(), "world");
    }

    #[test]
    fn test_empty_string() {
        let interner = StringInterner::new();
        let empty = interner.intern("");
        assert_eq!(empty, Atom::NONE);
        assert!(empty.is_none());
        assert_eq!(interner.resolve(empty).as_ref(), "");
    }

    #[test]
    fn test_try_resolve_invalid() {
        let interner = StringInterner::new();
        assert!(interner.try_resolve(Atom(u32::MAX)).is_none());
    }
}
