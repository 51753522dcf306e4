//! Lexical scope provider.
//!
//! Scopes are built once from the symbol-bound AST: one scope per module,
//! function, and aggregate, holding the names it declares. Lookup honors a
//! configuration bitset and a `CheckedScopes` value that deduplicates
//! visits across forwarding sweeps — successive calls thread the same
//! `CheckedScopes` through so a scope consulted once under a given
//! configuration is not consulted again.

use crate::ast::{AstId, AstKind, AstTag, Program};
use crate::interner::Atom;
use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

bitflags! {
    /// What a lookup should consider.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct LookupConfig: u32 {
        /// Declarations made directly in a scope.
        const DECLS = 1 << 0;
        /// Names made visible by use/import statements.
        const IMPORT_AND_USE = 1 << 1;
        /// Parent scopes.
        const PARENTS = 1 << 2;
        /// Stop at the innermost scope that produces a match.
        const INNERMOST = 1 << 3;
        /// Only methods and fields match.
        const ONLY_METHODS_FIELDS = 1 << 4;
        /// Methods match in addition to non-method declarations.
        const METHODS = 1 << 5;
    }
}

/// Scopes already consulted during a lookup sweep, per configuration.
#[derive(Clone, Debug, Default)]
pub struct CheckedScopes {
    visited: FxHashSet<(ScopeId, u32)>,
}

impl CheckedScopes {
    pub fn new() -> Self {
        CheckedScopes::default()
    }

    /// Returns false if the scope was already visited under `config`.
    fn mark(&mut self, scope: ScopeId, config: LookupConfig) -> bool {
        self.visited.insert((scope, config.bits()))
    }
}

#[derive(Debug)]
pub struct Scope {
    pub id: ScopeId,
    /// The symbol whose body this scope is.
    pub symbol: AstId,
    pub parent: Option<ScopeId>,
    pub tag: AstTag,
    decls: FxHashMap<Atom, SmallVec<[AstId; 2]>>,
}

impl Scope {
    pub fn declared(&self, name: Atom) -> &[AstId] {
        self.decls.get(&name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn declares(&self, name: Atom) -> bool {
        self.decls.contains_key(&name)
    }

    /// Names declared more than once in this scope.
    pub fn multiply_defined(&self) -> impl Iterator<Item = Atom> + '_ {
        self.decls
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, _)| *name)
    }
}

/// All scopes of a program.
pub struct ScopeSet {
    scopes: Vec<Scope>,
    by_symbol: FxHashMap<AstId, ScopeId>,
}

impl ScopeSet {
    pub fn build(program: &Program) -> Self {
        let mut set = ScopeSet {
            scopes: Vec::new(),
            by_symbol: FxHashMap::default(),
        };
        for &module_id in program.top_modules() {
            set.build_symbol_scope(program, module_id, None);
        }
        set
    }

    fn new_scope(&mut self, symbol: AstId, parent: Option<ScopeId>, tag: AstTag) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            id,
            symbol,
            parent,
            tag,
            decls: FxHashMap::default(),
        });
        self.by_symbol.insert(symbol, id);
        id
    }

    fn declare(&mut self, scope: ScopeId, name: Atom, id: AstId) {
        if name.is_none() {
            return;
        }
        self.scopes[scope.0 as usize]
            .decls
            .entry(name)
            .or_default()
            .push(id);
    }

    fn build_symbol_scope(&mut self, program: &Program, symbol: AstId, parent: Option<ScopeId>) {
        let Some(node) = program.id_to_ast(symbol) else {
            return;
        };
        let scope = self.new_scope(symbol, parent, node.tag());
        match &node.kind {
            AstKind::Module(m) => {
                for &stmt in &m.stmts {
                    if let Some(stmt_node) = program.id_to_ast(stmt) {
                        if let Some(name) = stmt_node.decl_name() {
                            self.declare(scope, name, stmt);
                        }
                        if stmt_node.tag().is_symbol_defining() {
                            self.build_symbol_scope(program, stmt, Some(scope));
                        }
                    }
                }
            }
            AstKind::Function(f) => {
                for &formal in &f.formals {
                    if let Some(name) = program.id_to_ast(formal).and_then(|n| n.decl_name()) {
                        self.declare(scope, name, formal);
                    }
                }
            }
            AstKind::Record(d) | AstKind::Class(d) | AstKind::Union(d) => {
                for &child in &d.children {
                    let Some(child_node) = program.id_to_ast(child) else {
                        continue;
                    };
                    match &child_node.kind {
                        AstKind::Variable(v) => self.declare(scope, v.name, child),
                        AstKind::Forwarding { expr, expr_is_decl: true } => {
                            if let Some(var) = program.id_to_ast(*expr).and_then(|n| n.as_variable()) {
                                self.declare(scope, var.name, *expr);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_for_symbol(&self, symbol: AstId) -> Option<ScopeId> {
        self.by_symbol.get(&symbol).copied()
    }

    /// The scope containing `id`: a symbol-defining node yields its own
    /// scope, anything else the scope of its enclosing symbol.
    pub fn scope_for_id(&self, id: AstId) -> Option<ScopeId> {
        if id.is_symbol_defining() {
            return self.scope_for_symbol(id);
        }
        self.by_symbol.get(&AstId::new(id.symbol, -1)).copied()
    }
}

/// Look up `name` starting at `scope`, consulting `receiver_scopes` first,
/// honoring `config`, and recording visits in `visited`. Returns the
/// matching declaration ids in scope order.
pub fn lookup_name_in_scope_with_set(
    program: &Program,
    scopes: &ScopeSet,
    scope: ScopeId,
    receiver_scopes: &[ScopeId],
    name: Atom,
    config: LookupConfig,
    visited: &mut CheckedScopes,
) -> Vec<AstId> {
    let mut out = Vec::new();

    for &recv in receiver_scopes {
        lookup_in_one(program, scopes, recv, name, config, visited, &mut out);
        if config.contains(LookupConfig::INNERMOST) && !out.is_empty() {
            return out;
        }
    }

    let mut cur = Some(scope);
    while let Some(s) = cur {
        lookup_in_one(program, scopes, s, name, config, visited, &mut out);
        if config.contains(LookupConfig::INNERMOST) && !out.is_empty() {
            break;
        }
        if !config.contains(LookupConfig::PARENTS) {
            break;
        }
        cur = scopes.scope(s).parent;
    }

    out
}

fn lookup_in_one(
    program: &Program,
    scopes: &ScopeSet,
    scope: ScopeId,
    name: Atom,
    config: LookupConfig,
    visited: &mut CheckedScopes,
    out: &mut Vec<AstId>,
) {
    if !visited.mark(scope, config) {
        return;
    }
    if !config.contains(LookupConfig::DECLS) {
        return;
    }
    for &id in scopes.scope(scope).declared(name) {
        if passes_filter(program, id, config) {
            out.push(id);
        }
    }
}

fn passes_filter(program: &Program, id: AstId, config: LookupConfig) -> bool {
    if !config.contains(LookupConfig::ONLY_METHODS_FIELDS) {
        return true;
    }
    match program.id_to_tag(id) {
        Some(AstTag::Function) => program
            .id_to_ast(id)
            .and_then(|n| n.as_function())
            .is_some_and(|f| f.is_method),
        Some(AstTag::Variable) => program.id_is_field(id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{FormalIntent, Program};
    use crate::interner::StringInterner;

    fn sample() -> (StringInterner, Program) {
        let strings = StringInterner::new();
        let mut program = Program::new();
        let mut lowering = Lowering::new(&strings, &mut program);
        lowering.module(
            "M",
            vec![
                var("x", Some(ident("int")), None),
                Decl::Fn(
                    FnSpec::proc("f")
                        .formal(FormalSpec::new("a", FormalIntent::Default, Some(ident("int")))),
                ),
                Decl::Fn(FnSpec::method("g", ident("R"))),
                Decl::Record {
                    name: "R".to_string(),
                    children: vec![var("field", Some(ident("int")), None)],
                },
            ],
        );
        (strings, program)
    }

    #[test]
    fn test_lookup_finds_decls() {
        let (strings, program) = sample();
        let scopes = ScopeSet::build(&program);
        let module_scope = scopes
            .scope_for_symbol(AstId::new(strings.intern("M"), -1))
            .unwrap();

        let mut visited = CheckedScopes::new();
        let found = lookup_name_in_scope_with_set(
            &program,
            &scopes,
            module_scope,
            &[],
            strings.intern("f"),
            LookupConfig::DECLS,
            &mut visited,
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_methods_only_filter() {
        let (strings, program) = sample();
        let scopes = ScopeSet::build(&program);
        let module_scope = scopes
            .scope_for_symbol(AstId::new(strings.intern("M"), -1))
            .unwrap();

        let config = LookupConfig::DECLS | LookupConfig::ONLY_METHODS_FIELDS;
        let mut visited = CheckedScopes::new();
        let f = lookup_name_in_scope_with_set(
            &program,
            &scopes,
            module_scope,
            &[],
            strings.intern("f"),
            config,
            &mut visited,
        );
        assert!(f.is_empty(), "non-method filtered out");

        let mut visited = CheckedScopes::new();
        let g = lookup_name_in_scope_with_set(
            &program,
            &scopes,
            module_scope,
            &[],
            strings.intern("g"),
            config,
            &mut visited,
        );
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_checked_scopes_deduplicate() {
        let (strings, program) = sample();
        let scopes = ScopeSet::build(&program);
        let module_scope = scopes
            .scope_for_symbol(AstId::new(strings.intern("M"), -1))
            .unwrap();

        let mut visited = CheckedScopes::new();
        let name = strings.intern("x");
        let first = lookup_name_in_scope_with_set(
            &program,
            &scopes,
            module_scope,
            &[],
            name,
            LookupConfig::DECLS,
            &mut visited,
        );
        assert_eq!(first.len(), 1);

        // a second sweep threading the same CheckedScopes finds nothing new
        let second = lookup_name_in_scope_with_set(
            &program,
            &scopes,
            module_scope,
            &[],
            name,
            LookupConfig::DECLS,
            &mut visited,
        );
        assert!(second.is_empty());
    }
}
