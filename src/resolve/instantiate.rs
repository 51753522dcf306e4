//! Generic signature instantiation.
//!
//! Given a callee signature and a call site, computes substitutions formal
//! by formal and returns an instantiated signature, or a typed rejection.
//! Substitutions flow forward: later formals are re-resolved under the
//! substitutions accumulated so far, and type-query constraints are
//! enforced by a second, substitution-blind pass over each formal.

use crate::ast::{AstId, AstTag};
use crate::context::Context;
use crate::types::{
    ClassDecorator, Genericity, Management, QualifiedType, SubstitutionsMap, TypeKey,
};
use tracing::trace;

use super::can_pass::{can_pass, resolve_intent};
use super::genericity::get_type_genericity;
use super::poi::PoiScopeId;
use super::resolver::Resolver;
use super::sig::{
    any_formal_needs_instantiation, where_clause_result, Bitmap, SigId, TypedFnSignature,
    UntypedFnSignature, WhereClauseResult,
};
use super::{ApplicabilityResult, CallInfo, CandidateFailureReason};

// =============================================================================
// Formal-actual mapping
// =============================================================================

/// One formal paired with the actual that feeds it. Vararg formals get one
/// entry per bundled actual.
#[derive(Clone, Debug)]
pub struct FormalActual {
    pub formal_idx: usize,
    pub formal: AstId,
    pub actual_idx: Option<usize>,
    pub actual_type: QualifiedType,
    pub is_vararg_entry: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FormalActualMap {
    by_formals: Vec<FormalActual>,
    valid: bool,
}

impl FormalActualMap {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn by_formals(&self) -> &[FormalActual] {
        &self.by_formals
    }

    /// Positional and named matching, honoring default-valued formals and
    /// vararg formals.
    pub fn build(untyped: &UntypedFnSignature, ci: &CallInfo) -> FormalActualMap {
        let mut map = FormalActualMap {
            by_formals: Vec::new(),
            valid: false,
        };

        let num_formals = untyped.num_formals();
        let mut actual_used = vec![false; ci.num_actuals()];
        let mut next_positional = 0usize;

        for (formal_idx, detail) in untyped.formals.iter().enumerate() {
            if detail.is_vararg {
                // the vararg bundles every remaining positional actual
                while next_positional < ci.num_actuals() {
                    if actual_used[next_positional] {
                        next_positional += 1;
                        continue;
                    }
                    if !ci.actual(next_positional).by_name.is_none() {
                        break;
                    }
                    actual_used[next_positional] = true;
                    map.by_formals.push(FormalActual {
                        formal_idx,
                        formal: detail.decl,
                        actual_idx: Some(next_positional),
                        actual_type: ci.actual(next_positional).qt,
                        is_vararg_entry: true,
                    });
                    next_positional += 1;
                }
                continue;
            }

            // a named actual wins over position
            let named = ci
                .actuals
                .iter()
                .enumerate()
                .find(|(i, a)| !actual_used[*i] && a.by_name == detail.name && !a.by_name.is_none());
            let actual_idx = match named {
                Some((i, _)) => Some(i),
                None => {
                    // next unused positional actual
                    let mut found = None;
                    while next_positional < ci.num_actuals() {
                        if !actual_used[next_positional]
                            && ci.actual(next_positional).by_name.is_none()
                        {
                            found = Some(next_positional);
                            break;
                        }
                        next_positional += 1;
                    }
                    found
                }
            };

            match actual_idx {
                Some(i) => {
                    actual_used[i] = true;
                    map.by_formals.push(FormalActual {
                        formal_idx,
                        formal: detail.decl,
                        actual_idx: Some(i),
                        actual_type: ci.actual(i).qt,
                        is_vararg_entry: false,
                    });
                }
                None => {
                    if !detail.has_default {
                        return map; // missing required argument
                    }
                    map.by_formals.push(FormalActual {
                        formal_idx,
                        formal: detail.decl,
                        actual_idx: None,
                        // the use-the-default sentinel
                        actual_type: QualifiedType::unknown(),
                        is_vararg_entry: false,
                    });
                }
            }
        }

        if actual_used.iter().any(|used| !used) {
            return map; // leftover actual
        }
        let _ = num_formals;
        map.valid = true;
        map
    }
}

/// The tuple element type `can_pass` should compare vararg actuals to.
pub fn vararg_tuple_elem_type(ctx: &Context, vararg_type: QualifiedType) -> QualifiedType {
    if let Some(shape) = ctx.types.tuple_shape(vararg_type.type_id()) {
        if shape.is_vararg {
            if let Some(star) = shape.star {
                return star;
            }
        }
    }
    vararg_type
}

// =============================================================================
// Instantiation types
// =============================================================================

/// The type a generic formal takes when an actual instantiates it through
/// a conversion: combine decorators, take the manager from the actual when
/// managed, take the basic class from the formal when it has one.
pub fn get_instantiation_type(
    ctx: &Context,
    actual: QualifiedType,
    formal: QualifiedType,
) -> QualifiedType {
    let actual_t = actual.type_id();
    let formal_t = formal.type_id();

    if let Some(actual_shape) = ctx.types.class_shape(actual_t) {
        // decorated class passed to decorated class
        if let Some(formal_shape) = ctx.types.class_shape(formal_t) {
            let dec = formal_shape.decorator.combine(actual_shape.decorator);

            // there are no implicit conversions between managers, so a
            // managed combination always takes the actual's manager
            let manager = if dec.is_managed() {
                actual_shape.manager
            } else {
                None
            };

            let bct = if matches!(ctx.types.key(formal_shape.manageable), TypeKey::BasicClass(_)) {
                formal_shape.manageable
            } else {
                actual_shape.manageable
            };
            if get_type_genericity(ctx, bct) != Genericity::Concrete {
                ctx.unimplemented(AstId::NONE, "instantiate generic class formal");
            }

            let ct = ctx.types.class_type(bct, manager, dec);
            return QualifiedType::new(formal.qualifier(), ct);
        }

        // decorated class passed to an `owned`/`shared` bound with
        // matching management
        let matches_bound = |bound| {
            actual_shape.decorator.is_managed()
                && actual_shape
                    .manager
                    .is_some_and(|m| ctx.types.key(m) == TypeKey::AnyBound(bound))
        };
        let bound_matches = match ctx.types.key(formal_t) {
            TypeKey::AnyBound(crate::types::AnyBoundKind::Owned) => {
                matches_bound(crate::types::AnyBoundKind::Owned)
            }
            TypeKey::AnyBound(crate::types::AnyBoundKind::Shared) => {
                matches_bound(crate::types::AnyBoundKind::Shared)
            }
            _ => false,
        };
        if bound_matches {
            let formal_dec = ClassDecorator::new(Management::Managed, crate::types::Nilability::Generic);
            let dec = formal_dec.combine(actual_shape.decorator);
            let manager = if dec.is_managed() { actual_shape.manager } else { None };
            let ct = ctx.types.class_type(actual_shape.manageable, manager, dec);
            return QualifiedType::new(formal.qualifier(), ct);
        }
    }

    // remaining instantiating conversions keep the actual's type
    QualifiedType::with_param(formal.qualifier(), actual_t, actual.param())
}

// =============================================================================
// instantiate_signature
// =============================================================================

struct VarArgState {
    instantiate: bool,
    types: Vec<QualifiedType>,
    formal_idx: Option<usize>,
    formal_decl: AstId,
    computed_type: QualifiedType,
}

/// Instantiate `sig` against `call`, producing a new (possibly still
/// partially generic) signature or a typed rejection. Never reports user
/// errors: failures reject this candidate only.
pub fn instantiate_signature(
    ctx: &Context,
    sig: SigId,
    call: &CallInfo,
    poi_scope: Option<PoiScopeId>,
) -> ApplicabilityResult {
    let typed = ctx.sigs.typed(sig);
    debug_assert!(typed.needs_instantiation);
    let untyped = ctx.sigs.untyped(typed.untyped);

    let decl_node = ctx.program().id_to_ast(untyped.id);
    let is_fn = decl_node.map(|n| n.tag()) == Some(AstTag::Function);
    let is_type_ctor = untyped.is_type_constructor;

    if typed.parent_fn.is_some() {
        ctx.unimplemented(untyped.id, "generic nested functions");
        return ApplicabilityResult::failure(
            untyped.id,
            CandidateFailureReason::Other,
            None,
        );
    }

    let fa_map = FormalActualMap::build(&untyped, call);
    if !fa_map.is_valid() {
        return ApplicabilityResult::failure(
            untyped.id,
            CandidateFailureReason::FormalActualMismatch,
            None,
        );
    }

    let mut substitutions = SubstitutionsMap::new();
    let mut formals_instantiated = Bitmap::new();
    let mut formal_idx = 0usize;

    let mut visitor = Resolver::new(ctx, untyped.id).with_poi(poi_scope);
    // declared types ignore defaults here: an actual overrides a default,
    // and only the use-the-default hint resolves through the initializer
    visitor.use_generic_formal_defaults = false;
    visitor.defaults_policy = super::DefaultsPolicy::IgnoreDefaults;

    let mut varargs = VarArgState {
        instantiate: false,
        types: Vec::new(),
        formal_idx: None,
        formal_decl: AstId::NONE,
        computed_type: QualifiedType::unknown(),
    };

    for entry in fa_map.by_formals() {
        // do not ignore substitutions initially
        visitor.ignore_substitution_for = None;
        visitor.skip_type_queries = false;

        let mut add_sub = false;
        let mut use_type = QualifiedType::unknown();
        let formal = entry.formal;
        let actual_type = entry.actual_type;

        // re-compute the formal type under the substitutions so far
        let formal_type;
        if entry.is_vararg_entry {
            if varargs.computed_type.is_unknown() {
                visitor.traverse(formal);
                varargs.computed_type = visitor
                    .by_postorder
                    .by_id_or_null(formal)
                    .map(|re| re.type_())
                    .unwrap_or_default();
            }
            formal_type = vararg_tuple_elem_type(ctx, varargs.computed_type);
        } else {
            visitor.traverse(formal);
            formal_type = proper_formal_type(&visitor, &typed, entry, is_type_ctor);
        }

        if actual_type.is_use_default_hint() {
            if !call.has_question_arg {
                // record a "use the default" substitution
                add_sub = true;
                use_type = actual_type;
            }
        } else {
            let got = can_pass(ctx, actual_type, formal_type);
            if !got.passes() {
                return ApplicabilityResult::failure(
                    untyped.id,
                    CandidateFailureReason::TypeMismatch,
                    Some(entry.formal_idx),
                );
            }
            if got.instantiates() {
                if !got.converts() && !got.promotes() {
                    add_sub = true;
                    use_type = actual_type;
                } else {
                    add_sub = true;
                    use_type = get_instantiation_type(ctx, actual_type, formal_type);

                    // the instantiation type must still accept the actual
                    // under the resolved intent: `ref x: shared Parent`
                    // cannot take a `shared Child`
                    let kind = resolve_intent(ctx, use_type, false, false);
                    let concrete = QualifiedType::with_param(kind, use_type.type_id(), use_type.param());
                    let recheck = can_pass(ctx, actual_type, concrete);
                    if !recheck.passes() {
                        return ApplicabilityResult::failure(
                            untyped.id,
                            CandidateFailureReason::TypeMismatch,
                            Some(entry.formal_idx),
                        );
                    }
                }
            }
        }

        if entry.is_vararg_entry {
            // if any element instantiates, the whole vararg instantiates
            varargs.instantiate = varargs.instantiate || add_sub;
            if !add_sub {
                use_type = formal_type;
            }

            let qt_kind = formal_type.qualifier();
            let temp = QualifiedType::new(qt_kind, use_type.type_id());
            let new_kind = resolve_intent(ctx, temp, false, false);
            let param = if formal_type.is_param() { use_type.param() } else { None };
            let elem = QualifiedType::with_param(new_kind, use_type.type_id(), param);
            varargs.types.push(elem);

            if varargs.formal_idx.is_none() {
                varargs.formal_idx = Some(formal_idx);
                varargs.formal_decl = formal;
                formal_idx += 1;
            }
        } else {
            if add_sub {
                substitutions.insert(formal, use_type);
                visitor.substitutions.insert(formal, use_type);
                // make the type available to later formals without
                // reconstructing the resolver
                visitor.by_postorder.by_id(formal).set_type(use_type);
                if is_type_ctor {
                    if let Some(name) = ctx.program().id_to_ast(formal).and_then(|n| n.decl_name()) {
                        visitor.set_field_visible(name, use_type);
                    }
                }
                formals_instantiated.set_bit(formal_idx, true);
            }
            formal_idx += 1;
        }

        // substitutions updated: re-run resolution and record type-query
        // bindings now that this formal's type is known
        let settled = if entry.is_vararg_entry {
            if add_sub { use_type } else { formal_type }
        } else {
            visitor.traverse(formal);
            visitor
                .by_postorder
                .by_id_or_null(formal)
                .map(|re| re.type_())
                .unwrap_or_default()
        };
        if let Some(te) = formal_type_expr(ctx, formal) {
            visitor.resolve_type_queries(te, settled);
        }

        // enforce type-query constraints: re-resolve the formal without
        // its substitution but with the recorded bindings
        if formal_type_expr(ctx, formal).is_some() {
            visitor.ignore_substitution_for = Some(formal);
            visitor.skip_type_queries = true;
            let q_formal_full = visitor.resolve_decl(formal, true);
            visitor.ignore_substitution_for = None;
            visitor.skip_type_queries = false;

            let q_formal_type = if entry.is_vararg_entry {
                vararg_tuple_elem_type(ctx, q_formal_full)
            } else {
                // restore the settled type in the traversal results
                visitor.by_postorder.by_id(formal).set_type(settled);
                q_formal_full
            };

            let check_type = if !use_type.is_unknown() { use_type } else { settled };
            let pass = can_pass(ctx, check_type, q_formal_type);
            if !pass.passes() {
                return ApplicabilityResult::failure(
                    untyped.id,
                    CandidateFailureReason::TypeMismatch,
                    Some(entry.formal_idx),
                );
            }
        }

        // the receiver formal fixes the method's composite
        if is_fn && untyped.is_method && entry.formal_idx == 0 {
            if let Some(ct) = ctx.types.get_composite_type(settled.type_id()) {
                visitor.composite_type = Some(ct);
            }
        }
    }

    // instantiate the vararg formal once all actuals are seen
    if let Some(va_idx) = varargs.formal_idx {
        let declared = typed.formal_type(va_idx);
        let known_size = ctx
            .types
            .tuple_shape(declared.type_id())
            .is_some_and(|s| s.is_known_size());
        if !known_size {
            varargs.instantiate = true;
        }
        if varargs.instantiate {
            let tuple = ctx.types.qualified_tuple(varargs.types.clone());
            let vat = QualifiedType::new(declared.qualifier(), tuple);
            substitutions.insert(varargs.formal_decl, vat);
            visitor.substitutions.insert(varargs.formal_decl, vat);
            visitor.by_postorder.by_id(varargs.formal_decl).set_type(vat);
            formals_instantiated.set_bit(va_idx, true);
        }

        // a count expression must agree with the bundled actual count
        if !vararg_count_matches(ctx, &mut visitor, varargs.formal_decl, varargs.types.len()) {
            return ApplicabilityResult::failure(
                untyped.id,
                CandidateFailureReason::VarargMismatch,
                Some(va_idx),
            );
        }
    } else if let Some((va_idx, va_decl)) = lone_vararg_formal(&untyped) {
        // a vararg formal that received zero actuals still instantiates
        // to the empty tuple when its size is not pinned
        visitor.traverse(va_decl);
        let declared = visitor
            .by_postorder
            .by_id_or_null(va_decl)
            .map(|re| re.type_())
            .unwrap_or_default();
        let known = ctx
            .types
            .tuple_shape(declared.type_id())
            .is_some_and(|s| s.is_known_size() && s.num_elements() > 0);
        if known {
            return ApplicabilityResult::failure(
                untyped.id,
                CandidateFailureReason::VarargMismatch,
                Some(va_idx),
            );
        }
        let tuple = ctx.types.qualified_tuple(Vec::new());
        let vat = QualifiedType::new(declared.qualifier(), tuple);
        substitutions.insert(va_decl, vat);
        visitor.substitutions.insert(va_decl, vat);
        visitor.by_postorder.by_id(va_decl).set_type(vat);
        formals_instantiated.set_bit(va_idx, true);
    }

    // use the existing signature if there were no substitutions
    if substitutions.is_empty() {
        return ApplicabilityResult::success(sig);
    }

    // collect the final formal types as the resolver computed them
    let mut formal_types = Vec::with_capacity(untyped.num_formals());
    for (i, detail) in untyped.formals.iter().enumerate() {
        let mut qt = match visitor.by_postorder.by_id_or_null(detail.decl) {
            Some(re) if !re.type_().is_use_default_hint() => re.type_(),
            _ => visitor.substitutions.get(detail.decl).unwrap_or_default(),
        };
        if is_type_ctor {
            // generic var fields are type fields in the type constructor
            qt = QualifiedType::with_param(typed.formal_type(i).qualifier(), qt.type_id(), qt.param());
        }
        formal_types.push(qt);
    }

    let needs_instantiation =
        any_formal_needs_instantiation(ctx, &formal_types, &untyped, Some(&substitutions));

    // the where clause is evaluated under the substituted resolver; a
    // false result is carried on the signature and rejected by the filter
    let mut where_result = WhereClauseResult::None;
    if is_fn {
        if let Some(where_id) = untyped.where_clause {
            let qt = visitor.traverse(where_id);
            where_result = where_clause_result(ctx, Some(where_id), Some(qt), needs_instantiation);
        }
    }

    let result = ctx.sigs.intern_typed(TypedFnSignature {
        untyped: typed.untyped,
        formal_types,
        where_clause_result: where_result,
        needs_instantiation,
        instantiated_from: Some(sig),
        inferred_from: None,
        parent_fn: typed.parent_fn,
        formals_instantiated,
    });

    trace!(?sig, ?result, "instantiated signature");

    // initializer signatures are finalized by resolving the body
    let mut final_sig = result;
    if ensure_body_is_resolved(ctx, call, result) {
        if let Some(resolved) = super::functions::resolve_initializer(ctx, result, poi_scope) {
            let new_tfs = resolved.signature;
            debug_assert!(!ctx.sigs.typed(new_tfs).needs_instantiation);
            final_sig = new_tfs;
        }
    }

    ApplicabilityResult::success(final_sig)
}

fn formal_type_expr(ctx: &Context, formal: AstId) -> Option<AstId> {
    ctx.program()
        .id_to_ast(formal)
        .and_then(|n| n.as_formal())
        .and_then(|f| f.type_expr)
}

fn lone_vararg_formal(untyped: &UntypedFnSignature) -> Option<(usize, AstId)> {
    untyped
        .formals
        .iter()
        .enumerate()
        .find(|(_, d)| d.is_vararg)
        .map(|(i, d)| (i, d.decl))
}

fn vararg_count_matches(
    ctx: &Context,
    visitor: &mut Resolver<'_>,
    formal: AstId,
    num_elements: usize,
) -> bool {
    let Some(count_expr) = ctx
        .program()
        .id_to_ast(formal)
        .and_then(|n| n.as_formal())
        .and_then(|f| f.count_expr)
    else {
        return true;
    };
    let count_qt = visitor
        .by_postorder
        .by_id_or_null(count_expr)
        .map(|re| re.type_())
        .unwrap_or_default();
    if count_qt.is_param() {
        if let Some(count) = count_qt.param().and_then(|p| p.as_count()) {
            return count as usize == num_elements;
        }
        // non-integral counts never match
        return count_qt.param().is_none();
    }
    true
}

/// The formal's qualified type as later passes should see it: a type
/// constructor's generic var fields use the constructor formal's kind.
fn proper_formal_type(
    visitor: &Resolver<'_>,
    typed: &TypedFnSignature,
    entry: &FormalActual,
    is_type_ctor: bool,
) -> QualifiedType {
    let qt = visitor
        .by_postorder
        .by_id_or_null(entry.formal)
        .map(|re| re.type_())
        .unwrap_or_default();
    if is_type_ctor {
        QualifiedType::with_param(
            typed.formal_type(entry.formal_idx).qualifier(),
            qt.type_id(),
            qt.param(),
        )
    } else {
        qt
    }
}

pub fn is_tfs_for_initializer(ctx: &Context, sig: SigId) -> bool {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    untyped.is_method
        && (untyped.name == ctx.name("init") || untyped.name == ctx.name("init="))
}

fn ensure_body_is_resolved(ctx: &Context, _ci: &CallInfo, sig: SigId) -> bool {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    if untyped.is_compiler_generated {
        return false;
    }
    is_tfs_for_initializer(ctx, sig)
}

/// Is this call an initializer invocation?
pub fn is_call_info_for_initializer(ctx: &Context, ci: &CallInfo) -> bool {
    ci.is_method_call && (ci.name == ctx.name("init") || ci.name == ctx.name("init="))
}

#[cfg(test)]
#[path = "tests/instantiate_tests.rs"]
mod tests;
