//! Candidate gathering and filtering.
//!
//! Candidate sources, in search order: compiler-generated methods, the
//! lexical scope, the point-of-instantiation chain, and forwarding. The
//! sweep stops at the first source that produces candidates (forwarding
//! is only consulted when nothing else matched), and a single
//! `CheckedScopes` value threads through the whole sweep so no scope is
//! consulted twice under one configuration.

use crate::ast::{AstId, AstTag};
use crate::context::Context;
use crate::query::QueryStatus;
use crate::scope::{CheckedScopes, LookupConfig, ScopeId, lookup_name_in_scope_with_set};
use crate::types::{QualifiedType, TypeId, TypeKey};
use smallvec::SmallVec;
use tracing::trace;

use super::can_pass::can_pass;
use super::fields::{
    emit_error_for_forwarding_cycles, fields_for_type_decl, is_name_of_field,
    resolve_forwarding_exprs, type_uses_forwarding,
};
use super::instantiate::{
    instantiate_signature, vararg_tuple_elem_type, FormalActualMap,
};
use super::poi::{PoiScope, PoiScopeId};
use super::sig::{
    field_accessor, type_constructor_initial, typed_signature_initial,
    untyped_signature_for_function, SigId, UntypedFnSignature, WhereClauseResult,
};
use super::{
    ApplicabilityResult, CallInfo, CallInfoActual, CandidateFailureReason, DefaultsPolicy,
};

/// Candidates found for one call, with the receiver type actually passed
/// for candidates reached through forwarding (parallel vector, empty when
/// forwarding was not used).
#[derive(Clone, Debug, Default)]
pub struct GatheredCandidates {
    pub candidates: Vec<SigId>,
    pub forwarding_info: Vec<QualifiedType>,
    pub first_poi_candidate: usize,
}

/// The POI scope to resolve an instantiation under: the call's scope
/// chained to the POI scope the caller itself was resolved under.
///
/// When the parent POI already refers to the same scope, it is reused;
/// this is what keeps recursive instantiation from growing the POI chain
/// without bound.
pub fn point_of_instantiation_scope(
    ctx: &Context,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
) -> PoiScopeId {
    if let Some(parent) = in_poi_scope {
        if ctx.poi.get(parent).in_scope == in_scope {
            return parent;
        }
    }
    ctx.poi.intern(PoiScope {
        in_scope,
        in_fn_poi: in_poi_scope,
    })
}

/// Receiver scopes for a method call: the composite's own scope followed
/// by its superclass scopes.
fn gather_receiver_scopes(ctx: &Context, receiver_type: TypeId) -> SmallVec<[ScopeId; 3]> {
    let mut out = SmallVec::new();
    let mut cur = ctx.types.get_composite_type(receiver_type);
    while let Some(ct) = cur {
        let Some(shape) = ctx.types.composite_shape(ct) else {
            break;
        };
        if let Some(scope) = ctx.scopes().scope_for_symbol(shape.decl_id) {
            out.push(scope);
        }
        cur = shape.parent;
    }
    out
}

/// Look up the called name, honoring method/op/parenless configuration.
fn lookup_called_expr(
    ctx: &Context,
    scope: ScopeId,
    ci: &CallInfo,
    visited: &mut CheckedScopes,
) -> Vec<AstId> {
    let mut receiver_scopes = SmallVec::new();
    if ci.is_method_call || ci.is_op_call {
        if let Some(receiver) = ci.actuals.first() {
            receiver_scopes = gather_receiver_scopes(ctx, receiver.qt.type_id());
        }
    }

    let mut config = LookupConfig::DECLS | LookupConfig::IMPORT_AND_USE | LookupConfig::PARENTS;
    if ci.is_parenless && !ci.is_method_call {
        config |= LookupConfig::INNERMOST;
    }
    if ci.is_method_call {
        config |= LookupConfig::ONLY_METHODS_FIELDS;
    }
    if ci.is_op_call {
        config |= LookupConfig::METHODS;
    }

    lookup_name_in_scope_with_set(
        ctx.program(),
        ctx.scopes(),
        scope,
        &receiver_scopes,
        ci.name,
        config,
        visited,
    )
}

// =============================================================================
// Initial applicability
// =============================================================================

fn is_untyped_signature_applicable(
    untyped: &UntypedFnSignature,
    fa_map: &FormalActualMap,
    ci: &CallInfo,
) -> bool {
    if !fa_map.is_valid() {
        return false;
    }
    if !ci.is_op_call && ci.is_method_call != untyped.is_method {
        return false;
    }
    true
}

/// Check one initial typed signature against the call: arity, names,
/// method-ness, pairwise `can_pass`, vararg count, and the where clause.
pub fn is_initial_typed_signature_applicable(
    ctx: &Context,
    sig: SigId,
    fa_map: &FormalActualMap,
    ci: &CallInfo,
) -> ApplicabilityResult {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    if !is_untyped_signature_applicable(&untyped, fa_map, ci) {
        return ApplicabilityResult::failure(untyped.id, CandidateFailureReason::Other, None);
    }

    let mut num_vararg_actuals = 0usize;
    let mut vararg_type = QualifiedType::unknown();
    for entry in fa_map.by_formals() {
        let actual_type = entry.actual_type;
        if actual_type.is_use_default_hint() {
            // the default will be used (or, with a `?` argument, the
            // formal stays generic); nothing to check against
            continue;
        }
        let formal_type = typed.formal_type(entry.formal_idx);
        let got = if entry.is_vararg_entry {
            if vararg_type.is_unknown() {
                vararg_type = formal_type;
            }
            num_vararg_actuals += 1;
            can_pass(ctx, actual_type, vararg_tuple_elem_type(ctx, formal_type))
        } else {
            can_pass(ctx, actual_type, formal_type)
        };
        if !got.passes() {
            return ApplicabilityResult::failure(
                untyped.id,
                CandidateFailureReason::TypeMismatch,
                Some(entry.formal_idx),
            );
        }
    }

    if !vararg_type.is_unknown() {
        if let Some(tup) = ctx.types.tuple_shape(vararg_type.type_id()) {
            if tup.is_vararg && tup.is_known_size() && num_vararg_actuals != tup.num_elements() {
                return ApplicabilityResult::failure(
                    untyped.id,
                    CandidateFailureReason::VarargMismatch,
                    None,
                );
            }
        }
    }

    if typed.where_clause_result == WhereClauseResult::False {
        return ApplicabilityResult::failure(
            untyped.id,
            CandidateFailureReason::WhereClauseFalse,
            None,
        );
    }

    ApplicabilityResult::success(sig)
}

fn do_is_candidate_applicable_initial(
    ctx: &Context,
    candidate_id: AstId,
    ci: &CallInfo,
) -> ApplicabilityResult {
    let tag = ctx.program().id_to_tag(candidate_id);

    // a paren-less call only considers paren-less routines and fields
    if ci.is_parenless {
        let ok = ctx.program().id_is_parenless_function(candidate_id)
            || ctx.program().id_is_field(candidate_id);
        if !ok {
            return ApplicabilityResult::failure(
                candidate_id,
                CandidateFailureReason::ParenlessMismatch,
                None,
            );
        }
    }

    if tag.is_some_and(|t| t.is_type_decl()) {
        // calling a type, i.e. type construction
        let t = super::functions::initial_type_for_type_decl(ctx, candidate_id);
        return ApplicabilityResult::success(type_constructor_initial(ctx, t));
    }

    if ci.is_method_call && matches!(tag, Some(AstTag::Formal | AstTag::VarArgFormal)) {
        return ApplicabilityResult::failure(candidate_id, CandidateFailureReason::Other, None);
    }

    if tag == Some(AstTag::Variable) {
        if ci.is_parenless && ci.is_method_call && ci.num_actuals() == 1 {
            // calling a field accessor
            let receiver = ci.actual(0).qt.type_id();
            if let Some(containing) = is_name_of_field(ctx, ci.name, receiver) {
                return ApplicabilityResult::success(field_accessor(ctx, containing, ci.name));
            }
        }
        return ApplicabilityResult::failure(candidate_id, CandidateFailureReason::Other, None);
    }

    if tag != Some(AstTag::Function) {
        return ApplicabilityResult::failure(candidate_id, CandidateFailureReason::Other, None);
    }

    let Some(ufs) = untyped_signature_for_function(ctx, candidate_id) else {
        return ApplicabilityResult::failure(candidate_id, CandidateFailureReason::Other, None);
    };
    let untyped = ctx.sigs.untyped(ufs);
    let fa_map = FormalActualMap::build(&untyped, ci);
    let Some(sig) = typed_signature_initial(ctx, ufs) else {
        return ApplicabilityResult::failure(candidate_id, CandidateFailureReason::Other, None);
    };
    is_initial_typed_signature_applicable(ctx, sig, &fa_map, ci)
}

fn is_candidate_applicable_initial_query(
    ctx: &Context,
    candidate_id: AstId,
    ci: &CallInfo,
) -> ApplicabilityResult {
    let revision = ctx.revision();
    let key = (candidate_id, ci.clone());
    match ctx
        .queries
        .is_candidate_applicable_initial
        .begin(revision, key.clone())
    {
        QueryStatus::Cached(result) => return result,
        QueryStatus::AlreadyRunning => {
            return ApplicabilityResult::failure(candidate_id, CandidateFailureReason::Other, None)
        }
        QueryStatus::Started => {}
    }
    let result = do_is_candidate_applicable_initial(ctx, candidate_id, ci);
    ctx.queries
        .is_candidate_applicable_initial
        .end(revision, key, result)
}

/// Filter looked-up ids by initial applicability, without instantiating.
pub fn filter_candidates_initial(
    ctx: &Context,
    ids: Vec<AstId>,
    ci: &CallInfo,
    rejected: Option<&mut Vec<ApplicabilityResult>>,
) -> Vec<SigId> {
    let mut matching = Vec::new();
    let mut rejections = rejected;
    for id in ids {
        let s = is_candidate_applicable_initial_query(ctx, id, ci);
        match s.candidate() {
            Some(candidate) => matching.push(candidate),
            None => {
                if let Some(out) = rejections.as_deref_mut() {
                    out.push(s);
                }
            }
        }
    }
    matching
}

/// Instantiate generic initial candidates against the call; concrete
/// candidates pass straight through.
pub fn filter_candidates_instantiating(
    ctx: &Context,
    initial: &[SigId],
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    result: &mut Vec<SigId>,
    mut rejected: Option<&mut Vec<ApplicabilityResult>>,
) {
    let mut instantiation_poi = None;
    for &sig in initial {
        if ctx.sigs.typed(sig).needs_instantiation {
            let poi = *instantiation_poi
                .get_or_insert_with(|| point_of_instantiation_scope(ctx, in_scope, in_poi_scope));
            let mut instantiated = instantiate_signature(ctx, sig, ci, Some(poi));
            // a signature carrying `where = false` is never selected
            if let Some(candidate) = instantiated.candidate() {
                if ctx.sigs.typed(candidate).where_clause_result == WhereClauseResult::False {
                    let id = ctx.sigs.untyped(ctx.sigs.typed(sig).untyped).id;
                    instantiated = ApplicabilityResult::failure(
                        id,
                        CandidateFailureReason::WhereClauseFalse,
                        None,
                    );
                }
            }
            match instantiated.candidate() {
                Some(candidate) => result.push(candidate),
                None => {
                    if let Some(out) = rejected.as_deref_mut() {
                        out.push(instantiated);
                    }
                }
            }
        } else {
            result.push(sig);
        }
    }
}

// =============================================================================
// Compiler-generated candidates
// =============================================================================

/// Built-in methods the receiver type advertises: currently the tuple
/// `size` accessor. Added candidates are fully concrete and contribute no
/// POI information.
pub fn consider_compiler_generated_candidates(
    ctx: &Context,
    ci: &CallInfo,
    candidates: &mut Vec<SigId>,
) {
    if !ci.is_method_call && !ci.is_op_call {
        return;
    }
    let Some(receiver) = ci.actuals.first() else {
        return;
    };
    let receiver_type = receiver.qt.type_id();

    if ci.is_parenless
        && ci.name == ctx.name("size")
        && matches!(ctx.types.key(receiver_type), TypeKey::Tuple(_))
    {
        candidates.push(super::functions::tuple_size_accessor(ctx, receiver_type));
    }
}

// =============================================================================
// Gathering
// =============================================================================

fn is_inside_forwarding(ctx: &Context, call: Option<AstId>) -> bool {
    let Some(call_id) = call else {
        return false;
    };
    let mut cur = ctx.program().id_to_parent_id(call_id);
    while let Some(id) = cur {
        match ctx.program().id_to_tag(id) {
            Some(t) if t.is_aggregate_decl() || t == AstTag::Function => break,
            Some(AstTag::Forwarding) => return true,
            _ => {}
        }
        cur = ctx.program().id_to_parent_id(id);
    }
    false
}

/// Returns candidates (including instantiating candidates) for `ci`.
pub fn gather_and_filter_candidates(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    mut rejected: Option<&mut Vec<ApplicabilityResult>>,
) -> GatheredCandidates {
    let mut gathered = GatheredCandidates::default();
    let mut visited = CheckedScopes::new();

    // compiler-generated candidates are always available where the type is
    consider_compiler_generated_candidates(ctx, ci, &mut gathered.candidates);

    // candidates without using POI
    {
        let ids = lookup_called_expr(ctx, in_scope, ci, &mut visited);
        let initial = filter_candidates_initial(ctx, ids, ci, rejected.as_deref_mut());
        filter_candidates_instantiating(
            ctx,
            &initial,
            ci,
            in_scope,
            in_poi_scope,
            &mut gathered.candidates,
            rejected.as_deref_mut(),
        );
    }

    // candidates through the POI chain; do not stop until something is
    // found
    gathered.first_poi_candidate = gathered.candidates.len();
    let mut cur_poi = in_poi_scope;
    while let Some(poi_id) = cur_poi {
        if !gathered.candidates.is_empty() {
            break;
        }
        let poi = ctx.poi.get(poi_id);
        let ids = lookup_called_expr(ctx, poi.in_scope, ci, &mut visited);
        let initial = filter_candidates_initial(ctx, ids, ci, rejected.as_deref_mut());
        filter_candidates_instantiating(
            ctx,
            &initial,
            ci,
            in_scope,
            in_poi_scope,
            &mut gathered.candidates,
            rejected.as_deref_mut(),
        );
        cur_poi = poi.in_fn_poi;
    }

    // forwarding, only when everything else came up empty
    if gathered.candidates.is_empty() && ci.is_method_call && ci.num_actuals() >= 1 {
        let receiver_type = ci.actual(0).qt.type_id();
        if type_uses_forwarding(ctx, receiver_type) && !is_inside_forwarding(ctx, call) {
            gather_and_filter_candidates_forwarding(
                ctx,
                call,
                ci,
                in_scope,
                in_poi_scope,
                &mut gathered,
            );
        }
    }

    trace!(
        name = %ctx.name_of(ci.name),
        num = gathered.candidates.len(),
        "gathered candidates"
    );
    gathered
}

/// Gather candidates through the receiver's forwarding declarations. Each
/// forwarded-to type is considered equally at every stage, and the
/// forwarded receiver type is recorded per candidate so the call site can
/// insert the correct conversion.
fn gather_and_filter_candidates_forwarding(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    gathered: &mut GatheredCandidates,
) {
    let receiver_type = ci.actual(0).qt.type_id();

    // initializers and deinit are exempt from forwarding
    let exempt = [ctx.name("init"), ctx.name("init="), ctx.name("deinit")];
    if exempt.contains(&ci.name) {
        return;
    }

    let Some(ct) = ctx.types.get_composite_type(receiver_type) else {
        return;
    };
    let mut forwards = Vec::new();
    {
        let fields = fields_for_type_decl(ctx, ct, DefaultsPolicy::UseDefaults);
        let exprs = resolve_forwarding_exprs(ctx, ct);
        if fields.num_forwards() > 0 || exprs.num_forwards() > 0 {
            if !emit_error_for_forwarding_cycles(ctx, ct) {
                forwards.extend(fields.forwardings().iter().cloned());
                forwards.extend(exprs.forwardings().iter().cloned());
            }
        }
    }
    if forwards.is_empty() {
        return;
    }

    // construct a CallInfo with the receiver replaced for each target
    let this_name = ctx.name("this");
    let mut forwarding_cis = Vec::new();
    for fwd in &forwards {
        let forward_type = fwd.to_type;
        if forward_type.is_unknown() || !forward_type.has_type() {
            continue;
        }
        let mut actuals = Vec::with_capacity(ci.num_actuals());
        actuals.push(CallInfoActual::named(forward_type, this_name));
        actuals.extend(ci.actuals.iter().skip(1).cloned());
        forwarding_cis.push(CallInfo {
            name: ci.name,
            called_type: forward_type,
            is_method_call: ci.is_method_call,
            is_op_call: false,
            has_question_arg: ci.has_question_arg,
            is_parenless: ci.is_parenless,
            actuals,
        });
    }

    let mut non_poi: Vec<SigId> = Vec::new();
    let mut non_poi_forwarding: Vec<QualifiedType> = Vec::new();
    let mut poi_candidates: Vec<SigId> = Vec::new();
    let mut poi_forwarding: Vec<QualifiedType> = Vec::new();

    // every forwarded receiver shares one visited set per target
    let mut visited = vec![CheckedScopes::new(); forwarding_cis.len()];

    for fci in &forwarding_cis {
        let start = non_poi.len();
        consider_compiler_generated_candidates(ctx, fci, &mut non_poi);
        extend_forwarding_info(&mut non_poi_forwarding, fci, start, non_poi.len());
    }

    for (i, fci) in forwarding_cis.iter().enumerate() {
        let start = non_poi.len();
        let ids = lookup_called_expr(ctx, in_scope, fci, &mut visited[i]);
        let initial = filter_candidates_initial(ctx, ids, fci, None);
        filter_candidates_instantiating(
            ctx,
            &initial,
            fci,
            in_scope,
            in_poi_scope,
            &mut non_poi,
            None,
        );
        extend_forwarding_info(&mut non_poi_forwarding, fci, start, non_poi.len());
    }

    let mut cur_poi = in_poi_scope;
    while let Some(poi_id) = cur_poi {
        if !non_poi.is_empty() || !poi_candidates.is_empty() {
            break;
        }
        let poi = ctx.poi.get(poi_id);
        for (i, fci) in forwarding_cis.iter().enumerate() {
            let start = poi_candidates.len();
            let ids = lookup_called_expr(ctx, poi.in_scope, fci, &mut visited[i]);
            let initial = filter_candidates_initial(ctx, ids, fci, None);
            filter_candidates_instantiating(
                ctx,
                &initial,
                fci,
                in_scope,
                in_poi_scope,
                &mut poi_candidates,
                None,
            );
            extend_forwarding_info(&mut poi_forwarding, fci, start, poi_candidates.len());
        }
        cur_poi = poi.in_fn_poi;
    }

    // forwarding-to-forwarding; bounded by the cycle check above
    if non_poi.is_empty() && poi_candidates.is_empty() {
        for fci in &forwarding_cis {
            if fci.is_method_call && fci.num_actuals() >= 1 {
                let fwd_receiver = fci.actual(0).qt.type_id();
                if type_uses_forwarding(ctx, fwd_receiver) {
                    let mut sub = GatheredCandidates::default();
                    gather_and_filter_candidates_forwarding(
                        ctx,
                        call,
                        fci,
                        in_scope,
                        in_poi_scope,
                        &mut sub,
                    );
                    non_poi.extend(sub.candidates.iter().copied());
                    non_poi_forwarding.extend(sub.forwarding_info.iter().copied());
                }
            }
        }
    }

    // forwarding info entries must exist for pre-existing candidates too
    gathered
        .forwarding_info
        .resize(gathered.candidates.len(), ci.actual(0).qt);

    gathered.candidates.extend(non_poi.iter().copied());
    gathered.forwarding_info.extend(non_poi_forwarding);
    gathered.first_poi_candidate = gathered.candidates.len();
    gathered.candidates.extend(poi_candidates.iter().copied());
    gathered.forwarding_info.extend(poi_forwarding);
}

fn extend_forwarding_info(
    info: &mut Vec<QualifiedType>,
    fci: &CallInfo,
    start: usize,
    end: usize,
) {
    for _ in start..end {
        info.push(fci.called_type);
    }
}

#[cfg(test)]
#[path = "tests/candidates_tests.rs"]
mod tests;
