//! The resolution context.
//!
//! Owns the interners, the symbol-bound AST, the scope set, the diagnostic
//! channel, and one memo table per query. All resolution state flows
//! through a `&Context`; per-traversal state lives in explicit visitor
//! structs, never in globals.

use crate::ast::{AstId, Program};
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::interner::{Atom, StringInterner};
use crate::query::QueryCache;
use crate::resolve::poi::{PoiScopeId, PoiStore, RecursiveCall};
use crate::resolve::sig::{SigId, SigStore, UfsId};
use crate::resolve::{
    ApplicabilityResult, CallInfo, DefaultsPolicy, ResolutionResultByPostorderID, ResolvedFields,
    ResolvedFunction,
};
use crate::scope::ScopeSet;
use crate::types::{QualifiedType, TypeId, TypeInterner};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One memo table per query in the core.
pub struct Queries {
    pub resolve_module: QueryCache<AstId, Arc<ResolutionResultByPostorderID>>,
    pub resolve_module_stmt: QueryCache<AstId, Arc<ResolutionResultByPostorderID>>,
    pub scope_resolve_module: QueryCache<AstId, Arc<ResolutionResultByPostorderID>>,
    pub scope_resolve_module_stmt: QueryCache<AstId, Arc<ResolutionResultByPostorderID>>,
    pub scope_resolve_aggregate: QueryCache<AstId, Arc<ResolutionResultByPostorderID>>,
    pub scope_resolve_function: QueryCache<AstId, Arc<ResolvedFunction>>,
    pub type_for_module_level_symbol: QueryCache<AstId, QualifiedType>,
    pub initial_type_for_type_decl: QueryCache<AstId, TypeId>,
    pub typed_signature_initial: QueryCache<UfsId, Option<SigId>>,
    pub type_constructor_initial: QueryCache<TypeId, SigId>,
    pub fields_for_type_decl: QueryCache<(TypeId, DefaultsPolicy), Arc<ResolvedFields>>,
    pub resolve_forwarding_exprs: QueryCache<TypeId, Arc<ResolvedFields>>,
    pub forwarding_cycle_check: QueryCache<TypeId, bool>,
    pub type_with_defaults: QueryCache<TypeId, TypeId>,
    pub is_candidate_applicable_initial: QueryCache<(AstId, CallInfo), ApplicabilityResult>,
    pub resolve_function_by_info: QueryCache<(SigId, Option<PoiScopeId>), Arc<ResolvedFunction>>,
    #[allow(clippy::type_complexity)]
    pub resolve_function_by_pois:
        QueryCache<(SigId, Vec<(AstId, AstId)>, Vec<RecursiveCall>), Arc<ResolvedFunction>>,
    pub is_name_of_field: QueryCache<(Atom, TypeId), Option<TypeId>>,
    pub is_type_default_initializable: QueryCache<TypeId, bool>,
}

impl Queries {
    fn new() -> Self {
        Queries {
            resolve_module: QueryCache::new(),
            resolve_module_stmt: QueryCache::new(),
            scope_resolve_module: QueryCache::new(),
            scope_resolve_module_stmt: QueryCache::new(),
            scope_resolve_aggregate: QueryCache::new(),
            scope_resolve_function: QueryCache::new(),
            type_for_module_level_symbol: QueryCache::new(),
            initial_type_for_type_decl: QueryCache::new(),
            typed_signature_initial: QueryCache::new(),
            type_constructor_initial: QueryCache::new(),
            fields_for_type_decl: QueryCache::new(),
            resolve_forwarding_exprs: QueryCache::new(),
            forwarding_cycle_check: QueryCache::new(),
            type_with_defaults: QueryCache::new(),
            is_candidate_applicable_initial: QueryCache::new(),
            resolve_function_by_info: QueryCache::new(),
            resolve_function_by_pois: QueryCache::new(),
            is_name_of_field: QueryCache::new(),
            is_type_default_initializable: QueryCache::new(),
        }
    }
}

pub struct Context {
    pub strings: StringInterner,
    pub types: TypeInterner,
    pub sigs: SigStore,
    pub poi: PoiStore,
    pub queries: Queries,
    program: Program,
    scopes: ScopeSet,
    diagnostics: RwLock<DiagnosticBag>,
    revision: AtomicU64,
}

impl Context {
    /// Build a context over a program. `strings` must be the interner the
    /// program was lowered with.
    pub fn new(program: Program, strings: StringInterner) -> Self {
        let scopes = ScopeSet::build(&program);
        Context {
            strings,
            types: TypeInterner::new(),
            sigs: SigStore::new(),
            poi: PoiStore::new(),
            queries: Queries::new(),
            program,
            scopes,
            diagnostics: RwLock::new(DiagnosticBag::new()),
            revision: AtomicU64::new(1),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    /// Logically invalidates every memoized result.
    pub fn advance_revision(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn error(&self, anchor: AstId, message: impl Into<String>) {
        self.diagnostics
            .write()
            .expect("diagnostics lock poisoned")
            .error(anchor, message);
    }

    pub fn warning(&self, anchor: AstId, message: impl Into<String>) {
        self.diagnostics
            .write()
            .expect("diagnostics lock poisoned")
            .warning(anchor, message);
    }

    /// Acknowledged-incomplete language surface: report, never invent.
    pub fn unimplemented(&self, anchor: AstId, what: &str) {
        self.error(anchor, format!("unimplemented: {what}"));
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .read()
            .expect("diagnostics lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .read()
            .expect("diagnostics lock poisoned")
            .error_count()
    }

    // =========================================================================
    // Small conveniences
    // =========================================================================

    pub fn name(&self, s: &str) -> Atom {
        self.strings.intern(s)
    }

    pub fn name_of(&self, atom: Atom) -> String {
        self.strings.resolve(atom).to_string()
    }

    /// Qualified type of the erroneous sentinel.
    pub fn erroneous(&self) -> QualifiedType {
        QualifiedType::new(crate::types::Qualifier::Unknown, TypeId::ERRONEOUS)
    }

    /// Qualified type of the unknown sentinel.
    pub fn unknown_qt(&self) -> QualifiedType {
        QualifiedType::new(crate::types::Qualifier::Unknown, TypeId::UNKNOWN)
    }
}
