//! Points of instantiation.
//!
//! A `PoiScope` identifies the lexical scope at the call site that
//! triggered an instantiation, chained through enclosing instantiations.
//! `PoiInfo` records what an instantiation actually consulted from POI;
//! two instantiations are interchangeable iff their POI footprints compare
//! equal, which is exactly how the function-resolution queries are keyed.

use crate::ast::AstId;
use crate::scope::ScopeId;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::RwLock;

use super::sig::SigId;

/// Handle to an interned `PoiScope`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoiScopeId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoiScope {
    /// The scope used when resolving the call that instantiated.
    pub in_scope: ScopeId,
    /// The POI scope the instantiating function itself was resolved under.
    pub in_fn_poi: Option<PoiScopeId>,
}

/// Interner for POI scopes.
pub struct PoiStore {
    table: RwLock<(FxHashMap<PoiScope, PoiScopeId>, Vec<PoiScope>)>,
}

impl PoiStore {
    pub fn new() -> Self {
        PoiStore {
            table: RwLock::new((FxHashMap::default(), Vec::new())),
        }
    }

    pub fn intern(&self, scope: PoiScope) -> PoiScopeId {
        {
            let table = self.table.read().expect("poi store lock poisoned");
            if let Some(&id) = table.0.get(&scope) {
                return id;
            }
        }
        let mut table = self.table.write().expect("poi store lock poisoned");
        if let Some(&id) = table.0.get(&scope) {
            return id;
        }
        let id = PoiScopeId(table.1.len() as u32);
        table.1.push(scope);
        table.0.insert(scope, id);
        id
    }

    pub fn get(&self, id: PoiScopeId) -> PoiScope {
        let table = self.table.read().expect("poi store lock poisoned");
        table.1[id.0 as usize]
    }
}

impl Default for PoiStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A recursive call encountered while an instantiation's body was already
/// being resolved.
pub type RecursiveCall = (SigId, Option<PoiScopeId>);

/// The POI footprint of a resolution: which `(call, callee)` pairs were
/// found through POI, which calls were recursive, and the POI scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoiInfo {
    poi_scope: Option<PoiScopeId>,
    poi_fn_ids_used: BTreeSet<(AstId, AstId)>,
    recursive_fns_used: BTreeSet<RecursiveCall>,
    resolved: bool,
}

impl PoiInfo {
    pub fn with_scope(poi_scope: Option<PoiScopeId>) -> Self {
        PoiInfo {
            poi_scope,
            ..PoiInfo::default()
        }
    }

    pub fn poi_scope(&self) -> Option<PoiScopeId> {
        self.poi_scope
    }

    pub fn set_poi_scope(&mut self, poi_scope: Option<PoiScopeId>) {
        self.poi_scope = poi_scope;
    }

    pub fn set_resolved(&mut self, resolved: bool) {
        self.resolved = resolved;
    }

    pub fn add_ids(&mut self, call: AstId, callee: AstId) {
        self.poi_fn_ids_used.insert((call, callee));
    }

    pub fn accumulate_recursive(&mut self, sig: SigId, poi: Option<PoiScopeId>) {
        self.recursive_fns_used.insert((sig, poi));
    }

    /// Merge another resolution's footprint into this one.
    pub fn accumulate(&mut self, other: &PoiInfo) {
        self.poi_fn_ids_used
            .extend(other.poi_fn_ids_used.iter().copied());
        self.recursive_fns_used
            .extend(other.recursive_fns_used.iter().copied());
    }

    pub fn poi_fn_ids_used(&self) -> Vec<(AstId, AstId)> {
        self.poi_fn_ids_used.iter().copied().collect()
    }

    pub fn recursive_fns_used(&self) -> Vec<RecursiveCall> {
        self.recursive_fns_used.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poi_scope_interning() {
        let store = PoiStore::new();
        let a = store.intern(PoiScope {
            in_scope: ScopeId(0),
            in_fn_poi: None,
        });
        let b = store.intern(PoiScope {
            in_scope: ScopeId(0),
            in_fn_poi: None,
        });
        let c = store.intern(PoiScope {
            in_scope: ScopeId(1),
            in_fn_poi: Some(a),
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.get(c).in_fn_poi, Some(a));
    }

    #[test]
    fn test_footprint_equality() {
        let strings = crate::interner::StringInterner::new();
        let sym = strings.intern("M");
        let call = AstId::new(sym, 3);
        let callee = AstId::new(sym, 7);

        let mut a = PoiInfo::default();
        a.add_ids(call, callee);
        let mut b = PoiInfo::default();
        b.add_ids(call, callee);
        assert_eq!(a.poi_fn_ids_used(), b.poi_fn_ids_used());

        b.add_ids(callee, call);
        assert_ne!(a.poi_fn_ids_used(), b.poi_fn_ids_used());
    }
}
