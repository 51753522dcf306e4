//! Module, function, and initializer resolution.
//!
//! Function bodies resolve on demand only: for initializer semantics, for
//! ref-maybe-const inference, and for POI footprint accumulation. The
//! function-resolution query is two-layered: `resolve_function_by_info`
//! is keyed by signature and POI scope, and stores its result under
//! `resolve_function_by_pois`, keyed by the POI footprint the resolution
//! actually used — two instantiations are interchangeable exactly when
//! those footprints agree.

use crate::ast::{AstId, AstKind, AstTag, ProcKind};
use crate::context::Context;
use crate::query::QueryStatus;
use crate::types::{
    ClassDecorator, ParamValue, QualifiedType, Qualifier, SubstitutionsMap, TypeId, TypeKey,
};
use std::sync::Arc;
use tracing::trace;

use super::fields::{fields_for_type_decl, instantiated_composite};
use super::instantiate::is_tfs_for_initializer;
use super::poi::{PoiInfo, PoiScopeId};
use super::resolver::Resolver;
use super::sig::{
    type_constructor_initial, typed_signature_initial, untyped_signature_for_function, Bitmap,
    FormalDetail, SigId, TypedFnSignature, UntypedFnSignature, WhereClauseResult,
};
use super::{DefaultsPolicy, ResolutionResultByPostorderID, ResolvedExpression, ResolvedFunction};

// =============================================================================
// Types for type declarations
// =============================================================================

/// The uninstantiated type for a composite or enum declaration. A class
/// declaration's name means the generic-management non-nil class.
pub fn initial_type_for_type_decl(ctx: &Context, decl: AstId) -> TypeId {
    let revision = ctx.revision();
    match ctx.queries.initial_type_for_type_decl.begin(revision, decl) {
        QueryStatus::Cached(t) => return t,
        QueryStatus::AlreadyRunning => return TypeId::UNKNOWN,
        QueryStatus::Started => {}
    }
    let result = initial_type_for_type_decl_impl(ctx, decl);
    ctx.queries
        .initial_type_for_type_decl
        .end(revision, decl, result)
}

fn initial_type_for_type_decl_impl(ctx: &Context, decl: AstId) -> TypeId {
    let Some(node) = ctx.program().id_to_ast(decl) else {
        return TypeId::UNKNOWN;
    };
    match &node.kind {
        AstKind::Record(d) | AstKind::Union(d) => {
            let kind = if node.tag() == AstTag::Record {
                crate::types::CompositeKind::Record
            } else {
                crate::types::CompositeKind::Union
            };
            ctx.types.composite_type(crate::types::CompositeShape {
                kind,
                decl_id: decl,
                name: d.name,
                parent: None,
                substitutions: SubstitutionsMap::new(),
                instantiated_from: None,
            })
        }
        AstKind::Class(d) => {
            let mut parent = None;
            if d.inherit_exprs.len() > 1 {
                ctx.error(decl, "invalid use of multiple inheritance");
            }
            if let Some(&inherit) = d.inherit_exprs.first() {
                let mut visitor = Resolver::new(ctx, decl);
                let qt = visitor.traverse(inherit);
                if qt.is_type() {
                    parent = ctx.types.get_composite_type(qt.type_id());
                }
            }
            let bct = ctx.types.composite_type(crate::types::CompositeShape {
                kind: crate::types::CompositeKind::Class,
                decl_id: decl,
                name: d.name,
                parent,
                substitutions: SubstitutionsMap::new(),
                instantiated_from: None,
            });
            // `class C` normally means a generic-management non-nil C
            ctx.types
                .class_type(bct, None, ClassDecorator::generic_nonnil())
        }
        AstKind::Enum(e) => ctx.types.enum_type(decl, e.name),
        _ => TypeId::UNKNOWN,
    }
}

// =============================================================================
// Module resolution
// =============================================================================

fn emit_multiply_defined_symbol_errors(ctx: &Context, module: AstId) {
    if let Some(scope_id) = ctx.scopes().scope_for_symbol(module) {
        let scope = ctx.scopes().scope(scope_id);
        for name in scope.multiply_defined() {
            // overloaded functions are legal; anything else is not
            let all_functions = scope
                .declared(name)
                .iter()
                .all(|&id| ctx.program().id_to_tag(id) == Some(AstTag::Function));
            if !all_functions {
                ctx.error(
                    module,
                    format!("'{}' has multiple definitions", ctx.name_of(name)),
                );
            }
        }
    }
}

/// Resolve one module-level statement.
pub fn resolve_module_stmt(ctx: &Context, stmt: AstId) -> Arc<ResolutionResultByPostorderID> {
    module_stmt_query(ctx, stmt, false)
}

pub fn scope_resolve_module_stmt(ctx: &Context, stmt: AstId) -> Arc<ResolutionResultByPostorderID> {
    module_stmt_query(ctx, stmt, true)
}

fn module_stmt_query(
    ctx: &Context,
    stmt: AstId,
    scope_only: bool,
) -> Arc<ResolutionResultByPostorderID> {
    debug_assert!(stmt.post_order >= 0);
    let revision = ctx.revision();
    let cache = if scope_only {
        &ctx.queries.scope_resolve_module_stmt
    } else {
        &ctx.queries.resolve_module_stmt
    };
    match cache.begin(revision, stmt) {
        QueryStatus::Cached(r) => return r,
        QueryStatus::AlreadyRunning => return Arc::new(ResolutionResultByPostorderID::new()),
        QueryStatus::Started => {}
    }

    let module_id = AstId::new(stmt.symbol, -1);
    let mut visitor = Resolver::new(ctx, module_id);
    if scope_only {
        visitor = visitor.scope_only();
    }
    visitor.traverse(stmt);

    cache.end(revision, stmt, Arc::new(visitor.by_postorder))
}

/// Resolve a whole module: every statement that is not itself a symbol
/// declaration, with per-statement results copied into one dense array.
pub fn resolve_module(ctx: &Context, module: AstId) -> Arc<ResolutionResultByPostorderID> {
    module_query(ctx, module, false)
}

pub fn scope_resolve_module(ctx: &Context, module: AstId) -> Arc<ResolutionResultByPostorderID> {
    module_query(ctx, module, true)
}

fn module_query(
    ctx: &Context,
    module: AstId,
    scope_only: bool,
) -> Arc<ResolutionResultByPostorderID> {
    let revision = ctx.revision();
    let cache = if scope_only {
        &ctx.queries.scope_resolve_module
    } else {
        &ctx.queries.resolve_module
    };
    match cache.begin(revision, module) {
        QueryStatus::Cached(r) => return r,
        QueryStatus::AlreadyRunning => return Arc::new(ResolutionResultByPostorderID::new()),
        QueryStatus::Started => {}
    }

    let mut result = ResolutionResultByPostorderID::new();
    if let Some(node) = ctx.program().id_to_ast(module) {
        if let AstKind::Module(m) = &node.kind {
            emit_multiply_defined_symbol_errors(ctx, module);
            result.setup_for_symbol(module, node.contained);
            for &stmt in &m.stmts {
                // type declarations, functions, and nested modules are
                // not part of module initialization
                if stmt.is_symbol_defining() {
                    continue;
                }
                let resolved = if scope_only {
                    scope_resolve_module_stmt(ctx, stmt)
                } else {
                    resolve_module_stmt(ctx, stmt)
                };
                // copy results for the statement and its children
                let Some(stmt_node) = ctx.program().id_to_ast(stmt) else {
                    continue;
                };
                let first = stmt.post_order - stmt_node.contained as i32;
                for i in first..=stmt.post_order {
                    let expr_id = AstId::new(stmt.symbol, i);
                    if let Some(to_copy) = resolved.by_id_or_null(expr_id) {
                        *result.by_id(expr_id) = to_copy.clone();
                    }
                }
            }
        }
    }

    cache.end(revision, module, Arc::new(result))
}

/// Scope-only resolution of an aggregate's field declarations.
pub fn scope_resolve_aggregate(ctx: &Context, decl: AstId) -> Arc<ResolutionResultByPostorderID> {
    let revision = ctx.revision();
    match ctx.queries.scope_resolve_aggregate.begin(revision, decl) {
        QueryStatus::Cached(r) => return r,
        QueryStatus::AlreadyRunning => return Arc::new(ResolutionResultByPostorderID::new()),
        QueryStatus::Started => {}
    }

    let mut visitor = Resolver::new(ctx, decl).scope_only();
    if let Some(agg) = ctx.program().id_to_ast(decl).and_then(|n| n.as_aggregate()) {
        for &child in agg.children.clone().iter() {
            visitor.traverse(child);
        }
    }

    ctx.queries
        .scope_resolve_aggregate
        .end(revision, decl, Arc::new(visitor.by_postorder))
}

/// Scope-only resolution of a function's contents.
pub fn scope_resolve_function(ctx: &Context, fn_id: AstId) -> Option<Arc<ResolvedFunction>> {
    let revision = ctx.revision();
    match ctx.queries.scope_resolve_function.begin(revision, fn_id) {
        QueryStatus::Cached(r) => return Some(r),
        QueryStatus::AlreadyRunning => return None,
        QueryStatus::Started => {}
    }

    let f = ctx.program().id_to_ast(fn_id)?.as_function()?.clone();
    let mut visitor = Resolver::new(ctx, fn_id).scope_only();
    for &formal in &f.formals {
        visitor.traverse(formal);
    }
    if let Some(w) = f.where_clause {
        visitor.traverse(w);
    }
    if let Some(r) = f.return_type {
        visitor.traverse(r);
    }
    for &stmt in &f.body {
        visitor.traverse(stmt);
    }

    let sig = untyped_signature_for_function(ctx, fn_id)
        .and_then(|ufs| typed_signature_initial(ctx, ufs))?;
    let result = Arc::new(ResolvedFunction {
        signature: sig,
        resolution_by_id: visitor.by_postorder,
        poi_info: PoiInfo::default(),
        return_type: QualifiedType::unknown(),
    });
    Some(
        ctx.queries
            .scope_resolve_function
            .end(revision, fn_id, result),
    )
}

// =============================================================================
// Function body resolution
// =============================================================================

fn body_resolver<'a>(ctx: &'a Context, sig: SigId, poi_scope: Option<PoiScopeId>) -> Resolver<'a> {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    let mut visitor = Resolver::new(ctx, untyped.id).with_poi(poi_scope);

    // seed the formal slots with the signature's formal types, and replay
    // type-query bindings so the body sees names bound by `?t`
    for (i, detail) in untyped.formals.iter().enumerate() {
        let qt = typed.formal_type(i);
        visitor.by_postorder.by_id(detail.decl).set_type(qt);
        visitor.substitutions.insert(detail.decl, qt);
        if let Some(te) = ctx
            .program()
            .id_to_ast(detail.decl)
            .and_then(|n| n.as_formal())
            .and_then(|fd| fd.type_expr)
        {
            visitor.resolve_type_queries(te, qt);
        }
    }

    if untyped.is_method {
        if let Some(receiver) = typed.formal_types.first() {
            if let Some(ct) = ctx.types.get_composite_type(receiver.type_id()) {
                visitor.composite_type = Some(ct);
            }
        }
    }
    visitor
}

/// Does a body statement mutate the declaration `target`?
fn stmt_mutates(ctx: &Context, by_postorder: &ResolutionResultByPostorderID, stmt: AstId, target: AstId) -> bool {
    let Some(node) = ctx.program().id_to_ast(stmt) else {
        return false;
    };
    let Some(c) = node.as_call() else {
        return false;
    };
    if node.tag() != AstTag::OpCall || c.op_name != ctx.name("=") {
        return false;
    }
    let Some(&lhs) = c.actuals.first() else {
        return false;
    };
    let Some(lhs_node) = ctx.program().id_to_ast(lhs) else {
        return false;
    };
    match &lhs_node.kind {
        AstKind::Identifier { .. } => by_postorder
            .by_id_or_null(lhs)
            .is_some_and(|re| re.to_id() == target),
        AstKind::Dot { receiver, .. } => by_postorder
            .by_id_or_null(*receiver)
            .is_some_and(|re| re.to_id() == target),
        _ => false,
    }
}

/// Infer the final intent of every ref-maybe-const formal from the body.
fn adjust_maybe_const_formals(
    ctx: &Context,
    untyped: &UntypedFnSignature,
    body: &[AstId],
    visitor: &mut Resolver<'_>,
) {
    for detail in &untyped.formals {
        let qt = visitor
            .by_postorder
            .by_id_or_null(detail.decl)
            .map(|re| re.type_())
            .unwrap_or_default();
        if qt.qualifier() != Qualifier::RefMaybeConst {
            continue;
        }
        let mutated = body
            .iter()
            .any(|&stmt| stmt_mutates(ctx, &visitor.by_postorder, stmt, detail.decl));
        let kind = if mutated { Qualifier::Ref } else { Qualifier::ConstRef };
        let adjusted = QualifiedType::with_param(kind, qt.type_id(), qt.param());
        visitor.by_postorder.by_id(detail.decl).set_type(adjusted);
    }
}

/// Resolve a function body for a signature and POI scope.
///
/// For initializers the final signature is only known after the body has
/// run; the provisional entry is completed through the query engine's
/// explicit store, so callers reading through either key see the final
/// value.
pub fn resolve_function_by_info(
    ctx: &Context,
    sig: SigId,
    poi_info: PoiInfo,
) -> Option<Arc<ResolvedFunction>> {
    let revision = ctx.revision();
    let key = (sig, poi_info.poi_scope());
    match ctx.queries.resolve_function_by_info.begin(revision, key) {
        QueryStatus::Cached(r) => return Some(r),
        QueryStatus::AlreadyRunning => return None,
        QueryStatus::Started => {}
    }

    let poi_scope = poi_info.poi_scope();
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    let f = ctx
        .program()
        .id_to_ast(untyped.id)
        .and_then(|n| n.as_function())
        .cloned();

    let mut visitor = body_resolver(ctx, sig, poi_scope);
    let mut final_sig = sig;
    let mut return_type = QualifiedType::unknown();

    if is_tfs_for_initializer(ctx, sig) {
        return_type = QualifiedType::var(TypeId::VOID);
        if let Some(f) = &f {
            for &stmt in &f.body {
                visitor.traverse(stmt);
            }
            adjust_maybe_const_formals(ctx, &untyped, &f.body, &mut visitor);
            final_sig = finalize_initializer(ctx, sig, &f.body, &mut visitor);
        }
    } else if let Some(f) = &f {
        for &stmt in &f.body {
            visitor.traverse(stmt);
        }
        return_type = compute_return_type(ctx, &untyped, f.return_type, &mut visitor);
        adjust_maybe_const_formals(ctx, &untyped, &f.body, &mut visitor);
    }

    let mut resolved_poi = std::mem::take(&mut visitor.poi_info);
    resolved_poi.set_resolved(true);
    resolved_poi.set_poi_scope(None);

    let resolved = Arc::new(ResolvedFunction {
        signature: final_sig,
        resolution_by_id: visitor.by_postorder,
        poi_info: resolved_poi.clone(),
        return_type,
    });

    // store under the POI footprint actually used
    let pois_key = (
        sig,
        resolved_poi.poi_fn_ids_used(),
        resolved_poi.recursive_fns_used(),
    );
    ctx.queries
        .resolve_function_by_pois
        .store(revision, pois_key, resolved.clone());

    // an initializer may have produced a new, fully-instantiated
    // signature; store the result under that key too so later lookups by
    // the final signature hit
    if final_sig != sig {
        let final_pois_key = (
            final_sig,
            resolved_poi.poi_fn_ids_used(),
            resolved_poi.recursive_fns_used(),
        );
        ctx.queries
            .resolve_function_by_pois
            .store(revision, final_pois_key, resolved.clone());
        ctx.queries.resolve_function_by_info.store(
            revision,
            (final_sig, poi_scope),
            resolved.clone(),
        );
    }

    trace!(?sig, ?final_sig, "resolved function body");
    Some(
        ctx.queries
            .resolve_function_by_info
            .end(revision, key, resolved),
    )
}

/// Compute the receiver type an initializer's body settled on, and intern
/// the final signature.
fn finalize_initializer(
    ctx: &Context,
    sig: SigId,
    body: &[AstId],
    visitor: &mut Resolver<'_>,
) -> SigId {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    let Some(receiver) = typed.formal_types.first() else {
        return sig;
    };
    let Some(ct) = ctx.types.get_composite_type(receiver.type_id()) else {
        return sig;
    };

    // generic fields settle to the types of the values assigned to them
    let generic_root = {
        let mut cur = ct;
        loop {
            match ctx.types.composite_shape(cur).and_then(|s| s.instantiated_from) {
                Some(from) => cur = from,
                None => break cur,
            }
        }
    };
    let ctor = type_constructor_initial(ctx, generic_root);
    let ctor_untyped = ctx.sigs.untyped(ctx.sigs.typed(ctor).untyped);
    if ctor_untyped.num_formals() == 0 {
        return sig;
    }

    let mut substitutions = ctx
        .types
        .composite_shape(ct)
        .map(|s| s.substitutions.clone())
        .unwrap_or_default();
    let this_name = ctx.name("this");
    for &stmt in body {
        let Some(node) = ctx.program().id_to_ast(stmt) else {
            continue;
        };
        let Some(c) = node.as_call() else { continue };
        if node.tag() != AstTag::OpCall || c.op_name != ctx.name("=") {
            continue;
        }
        let (Some(&lhs), Some(&rhs)) = (c.actuals.first(), c.actuals.get(1)) else {
            continue;
        };
        let Some(AstKind::Dot { receiver: recv, field }) =
            ctx.program().id_to_ast(lhs).map(|n| &n.kind)
        else {
            continue;
        };
        let is_this = matches!(
            ctx.program().id_to_ast(*recv).map(|n| &n.kind),
            Some(AstKind::Identifier { name }) if *name == this_name
        );
        if !is_this {
            continue;
        }
        // only fields that are type-constructor formals participate
        let Some(detail) = ctor_untyped.formals.iter().find(|d| d.name == *field) else {
            continue;
        };
        if substitutions.contains(detail.decl) {
            continue;
        }
        let rhs_qt = visitor
            .by_postorder
            .by_id_or_null(rhs)
            .map(|re| re.type_())
            .unwrap_or_default();
        if rhs_qt.is_unknown() {
            continue;
        }
        let field_formal = ctx.sigs.typed(ctor).formal_type(
            ctor_untyped
                .formals
                .iter()
                .position(|d| d.decl == detail.decl)
                .unwrap_or(0),
        );
        let settled = match field_formal.qualifier() {
            Qualifier::Type => QualifiedType::type_(rhs_qt.type_id()),
            Qualifier::Param => QualifiedType::with_param(
                Qualifier::Param,
                rhs_qt.type_id(),
                rhs_qt.param(),
            ),
            _ => QualifiedType::type_(rhs_qt.type_id()),
        };
        substitutions.insert(detail.decl, settled);
    }

    if substitutions.is_empty() {
        return sig;
    }

    let new_ct = instantiated_composite(ctx, generic_root, substitutions);
    let new_receiver_type = match ctx.types.key(receiver.type_id()) {
        TypeKey::Class(_) => {
            let shape = ctx.types.class_shape(receiver.type_id());
            match shape {
                Some(s) => ctx.types.class_type(new_ct, s.manager, s.decorator),
                None => new_ct,
            }
        }
        _ => new_ct,
    };
    let new_receiver = QualifiedType::with_param(
        receiver.qualifier(),
        new_receiver_type,
        receiver.param(),
    );

    let mut formal_types = typed.formal_types.clone();
    formal_types[0] = new_receiver;
    visitor
        .by_postorder
        .by_id(untyped.formal_decl(0))
        .set_type(new_receiver);

    let mut formals_instantiated = typed.formals_instantiated.clone();
    formals_instantiated.set_bit(0, true);

    ctx.sigs.intern_typed(TypedFnSignature {
        untyped: typed.untyped,
        formal_types,
        where_clause_result: typed.where_clause_result,
        needs_instantiation: false,
        instantiated_from: typed.instantiated_from.or(Some(sig)),
        inferred_from: None,
        parent_fn: typed.parent_fn,
        formals_instantiated,
    })
}

fn compute_return_type(
    ctx: &Context,
    untyped: &UntypedFnSignature,
    return_type_expr: Option<AstId>,
    visitor: &mut Resolver<'_>,
) -> QualifiedType {
    if let Some(rt) = return_type_expr {
        let qt = visitor.traverse(rt);
        if qt.is_type() {
            return QualifiedType::var(qt.type_id());
        }
        return qt;
    }
    if untyped.kind == ProcKind::Proc && untyped.name == ctx.name("deinit") {
        return QualifiedType::var(TypeId::VOID);
    }
    // return-type inference from the body happens elsewhere
    QualifiedType::unknown()
}

/// Resolve an initializer body; the result's signature is the final,
/// fully-instantiated one.
pub fn resolve_initializer(
    ctx: &Context,
    sig: SigId,
    poi_scope: Option<PoiScopeId>,
) -> Option<Arc<ResolvedFunction>> {
    debug_assert!(is_tfs_for_initializer(ctx, sig));
    resolve_function_by_info(ctx, sig, PoiInfo::with_scope(poi_scope))
}

fn help_resolve_function(
    ctx: &Context,
    sig: SigId,
    poi_scope: Option<PoiScopeId>,
    skip_if_running: bool,
) -> Option<Arc<ResolvedFunction>> {
    // forget about any inferred signature so the same function is not
    // resolved twice
    let typed = ctx.sigs.typed(sig);
    let sig = typed.inferred_from.unwrap_or(sig);
    debug_assert!(!ctx.sigs.typed(sig).needs_instantiation);

    if skip_if_running {
        let key = (sig, poi_scope);
        if ctx
            .queries
            .resolve_function_by_info
            .is_running(ctx.revision(), &key)
        {
            return None;
        }
    }

    resolve_function_by_info(ctx, sig, PoiInfo::with_scope(poi_scope))
}

pub fn resolve_function(
    ctx: &Context,
    sig: SigId,
    poi_scope: Option<PoiScopeId>,
) -> Option<Arc<ResolvedFunction>> {
    help_resolve_function(ctx, sig, poi_scope, false)
}

/// Resolve a concrete (non-generic) function by its declaration id.
pub fn resolve_concrete_function(ctx: &Context, fn_id: AstId) -> Option<Arc<ResolvedFunction>> {
    let ufs = untyped_signature_for_function(ctx, fn_id)?;
    let sig = typed_signature_initial(ctx, ufs)?;
    let typed = ctx.sigs.typed(sig);
    if typed.needs_instantiation {
        return None;
    }
    if typed.where_clause_result == WhereClauseResult::False {
        return None;
    }
    resolve_function(ctx, sig, None)
}

/// Resolve the body of the only selected candidate of a call.
pub fn resolve_only_candidate(
    ctx: &Context,
    re: &ResolvedExpression,
) -> Option<Arc<ResolvedFunction>> {
    let candidate = re.most_specific().only()?;
    resolve_function(ctx, candidate.sig, re.poi_scope())
}

/// Compute a signature with final intents for ref-maybe-const formals by
/// resolving the body. Returns `None` when that would recurse.
pub fn infer_ref_maybe_const_formals(
    ctx: &Context,
    sig: SigId,
    poi_scope: Option<PoiScopeId>,
) -> Option<SigId> {
    let typed = ctx.sigs.typed(sig);
    let any_maybe_const = typed
        .formal_types
        .iter()
        .any(|qt| qt.qualifier() == Qualifier::RefMaybeConst);
    if !any_maybe_const {
        return Some(sig);
    }

    let resolved = help_resolve_function(ctx, sig, poi_scope, true)?;

    let untyped = ctx.sigs.untyped(typed.untyped);
    let mut formal_types = Vec::with_capacity(typed.num_formals());
    for (i, qt) in typed.formal_types.iter().enumerate() {
        if qt.qualifier() == Qualifier::RefMaybeConst {
            let inferred = resolved
                .resolution_by_id
                .by_id_or_null(untyped.formal_decl(i))
                .map(|re| re.type_())
                .unwrap_or(*qt);
            formal_types.push(inferred);
        } else {
            formal_types.push(*qt);
        }
    }

    Some(ctx.sigs.intern_typed(TypedFnSignature {
        untyped: typed.untyped,
        formal_types,
        where_clause_result: typed.where_clause_result,
        needs_instantiation: typed.needs_instantiation,
        instantiated_from: typed.instantiated_from,
        inferred_from: Some(sig),
        parent_fn: typed.parent_fn,
        formals_instantiated: typed.formals_instantiated.clone(),
    }))
}

/// Gather the POI footprint of a selected instantiated candidate by
/// resolving its body, tracking recursive calls instead of recursing.
pub fn accumulate_pois_used_by_resolving_body(
    ctx: &Context,
    sig: SigId,
    poi_scope: Option<PoiScopeId>,
    poi_info: &mut PoiInfo,
) {
    let typed = ctx.sigs.typed(sig);
    if typed.instantiated_from.is_none() {
        // not an instantiation; no POIs to gather
        return;
    }
    if typed.needs_instantiation {
        return;
    }

    match help_resolve_function(ctx, sig, poi_scope, true) {
        None => poi_info.accumulate_recursive(sig, poi_scope),
        Some(r) => poi_info.accumulate(&r.poi_info),
    }
}

// =============================================================================
// Return types
// =============================================================================

/// The return type of a selected candidate: the constructed type for type
/// constructors, the field type for accessors, the declared return type
/// for ordinary functions.
pub fn return_type(ctx: &Context, sig: SigId, poi_scope: Option<PoiScopeId>) -> QualifiedType {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);

    if untyped.is_type_constructor {
        return type_ctor_result_type(ctx, sig);
    }

    if untyped.is_compiler_generated {
        // tuple size accessor
        if untyped.name == ctx.name("size") && untyped.id.is_none() {
            if let Some(receiver) = typed.formal_types.first() {
                if let Some(shape) = ctx.types.tuple_shape(receiver.type_id()) {
                    return QualifiedType::param_(
                        ctx.types.int_type(0),
                        ParamValue::Int(shape.num_elements() as i64),
                    );
                }
            }
            return QualifiedType::unknown();
        }
        // field accessor
        if ctx.program().id_is_field(untyped.id) {
            if let Some(receiver) = typed.formal_types.first() {
                if let Some(ct) = ctx.types.get_composite_type(receiver.type_id()) {
                    let fields = fields_for_type_decl(ctx, ct, DefaultsPolicy::UseDefaults);
                    if let Some(field) =
                        fields.fields().iter().find(|fld| fld.name == untyped.name)
                    {
                        return match field.qt.qualifier() {
                            Qualifier::Type | Qualifier::Param => field.qt,
                            _ => QualifiedType::with_param(
                                Qualifier::ConstRef,
                                field.qt.type_id(),
                                None,
                            ),
                        };
                    }
                }
            }
            return QualifiedType::unknown();
        }
    }

    if is_tfs_for_initializer(ctx, sig) {
        return QualifiedType::var(TypeId::VOID);
    }

    let Some(f) = ctx
        .program()
        .id_to_ast(untyped.id)
        .and_then(|n| n.as_function())
    else {
        return QualifiedType::unknown();
    };
    if f.return_type.is_none() && f.body.is_empty() {
        return QualifiedType::var(TypeId::VOID);
    }

    let mut visitor = body_resolver(ctx, sig, poi_scope);
    compute_return_type(ctx, &untyped, f.return_type, &mut visitor)
}

/// The composite type a type-constructor call produces.
fn type_ctor_result_type(ctx: &Context, sig: SigId) -> QualifiedType {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);

    let base = initial_type_for_type_decl(ctx, untyped.id);
    let Some(ct) = ctx.types.get_composite_type(base) else {
        return QualifiedType::type_(base);
    };

    let mut substitutions = SubstitutionsMap::new();
    for (i, detail) in untyped.formals.iter().enumerate() {
        if typed.formals_instantiated.bit(i) {
            substitutions.insert(detail.decl, typed.formal_type(i));
        }
    }

    let inst = instantiated_composite(ctx, ct, substitutions);

    // class declarations produce the decorated generic-management type
    match ctx.types.key(base) {
        TypeKey::Class(_) => {
            let decorated = ctx
                .types
                .class_type(inst, None, ClassDecorator::generic_nonnil());
            QualifiedType::type_(decorated)
        }
        _ => QualifiedType::type_(inst),
    }
}

/// The compiler-generated paren-less `size` accessor on tuple receivers.
pub fn tuple_size_accessor(ctx: &Context, tuple_type: TypeId) -> SigId {
    let untyped = ctx.sigs.intern_untyped(UntypedFnSignature {
        id: AstId::NONE,
        name: ctx.name("size"),
        is_method: true,
        is_type_constructor: false,
        is_compiler_generated: true,
        throws: false,
        tag: AstTag::Function,
        kind: ProcKind::Proc,
        formals: vec![FormalDetail {
            name: ctx.name("this"),
            has_default: false,
            decl: AstId::NONE,
            is_vararg: false,
        }],
        where_clause: None,
    });
    ctx.sigs.intern_typed(TypedFnSignature {
        untyped,
        formal_types: vec![QualifiedType::new(Qualifier::ConstRef, tuple_type)],
        where_clause_result: WhereClauseResult::None,
        needs_instantiation: false,
        instantiated_from: None,
        inferred_from: None,
        parent_fn: None,
        formals_instantiated: Bitmap::new(),
    })
}

/// The qualified type of a module-level declaration (re-exported from the
/// resolver for API symmetry).
pub use super::resolver::type_for_module_level_symbol;

#[cfg(test)]
#[path = "tests/functions_tests.rs"]
mod tests;
