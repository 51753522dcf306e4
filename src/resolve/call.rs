//! Call resolution driver.
//!
//! Orchestrates special-form recognition (built-in type constructors,
//! folded comparisons, postfix `?` on `new`), type-constructor calls,
//! tuple expressions, method receivers, and general overload resolution
//! through candidate gathering and instantiation.

use crate::ast::{AstId, AstKind};
use crate::context::Context;
use crate::scope::ScopeId;
use crate::types::{
    AnyBoundKind, ClassDecorator, Management, Nilability, ParamValue, QualifiedType, Qualifier,
    TypeId, TypeKey,
};
use tracing::{debug, trace};

use super::can_pass::can_pass;
use super::candidates::{
    gather_and_filter_candidates, filter_candidates_instantiating, point_of_instantiation_scope,
    GatheredCandidates,
};
use super::instantiate::is_call_info_for_initializer;
use super::most_specific::find_most_specific_candidates;
use super::poi::{PoiInfo, PoiScopeId};
use super::sig::type_constructor_initial;
use super::{
    functions, ApplicabilityResult, CallInfo, CallResolutionResult, MostSpecificCandidates,
};

/// Resolve one call. `call` is the AST node when there is one; generated
/// calls pass `None` and are found by name alone.
pub fn resolve_call(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    rejected: Option<&mut Vec<ApplicabilityResult>>,
) -> CallResolutionResult {
    if let Some(node) = call.and_then(|id| ctx.program().id_to_ast(id)) {
        if node.tag() == crate::ast::AstTag::Tuple {
            return resolve_tuple_expr(ctx, call, ci);
        }
    }

    // forms handled directly by the compiler
    if let Some(qt) = resolve_postfix_nilable_applied_to_new(ctx, call, ci) {
        return CallResolutionResult::from_type(qt);
    }
    if let Some(qt) = resolve_fn_call_special(ctx, call.unwrap_or(AstId::NONE), ci) {
        return CallResolutionResult::from_type(qt);
    }
    if let Some(result) = resolve_fn_call_special_type(ctx, call, ci, in_scope, in_poi_scope) {
        return result;
    }

    resolve_fn_call(ctx, call, ci, in_scope, in_poi_scope, rejected)
}

/// Like `resolve_call`, but retries as a method on the implicit receiver
/// before conceding failure.
pub fn resolve_call_in_method(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    implicit_receiver: QualifiedType,
    rejected: Option<&mut Vec<ApplicabilityResult>>,
) -> CallResolutionResult {
    if should_attempt_implicit_receiver(ctx, ci, implicit_receiver) {
        let method_ci = ci.with_receiver(ctx.name("this"), implicit_receiver, None);
        let ret = resolve_call(ctx, call, &method_ci, in_scope, in_poi_scope, None);
        if ret.most_specific.found_candidates() {
            return ret;
        }
    }
    resolve_call(ctx, call, ci, in_scope, in_poi_scope, rejected)
}

/// Resolve a compiler-generated call: no AST, no special type forms
/// beyond the folded ones.
pub fn resolve_generated_call(
    ctx: &Context,
    ast_for_err: AstId,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    rejected: Option<&mut Vec<ApplicabilityResult>>,
) -> CallResolutionResult {
    if let Some(qt) = resolve_fn_call_special(ctx, ast_for_err, ci) {
        return CallResolutionResult::from_type(qt);
    }
    resolve_fn_call(ctx, None, ci, in_scope, in_poi_scope, rejected)
}

pub fn resolve_generated_call_in_method(
    ctx: &Context,
    ast_for_err: AstId,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    implicit_receiver: QualifiedType,
) -> CallResolutionResult {
    if should_attempt_implicit_receiver(ctx, ci, implicit_receiver) {
        let method_ci = ci.with_receiver(ctx.name("this"), implicit_receiver, None);
        let ret = resolve_generated_call(ctx, ast_for_err, &method_ci, in_scope, in_poi_scope, None);
        if ret.most_specific.found_candidates() {
            return ret;
        }
    }
    resolve_generated_call(ctx, ast_for_err, ci, in_scope, in_poi_scope, None)
}

fn should_attempt_implicit_receiver(
    ctx: &Context,
    ci: &CallInfo,
    implicit_receiver: QualifiedType,
) -> bool {
    !ci.is_method_call
        && !ci.is_op_call
        && implicit_receiver.has_type()
        && !ci.name.is_none()
        && ![
            ctx.name("?"),
            ctx.name("owned"),
            ctx.name("shared"),
            ctx.name("borrowed"),
            ctx.name("unmanaged"),
        ]
        .contains(&ci.name)
}

// =============================================================================
// General dispatch
// =============================================================================

fn resolve_fn_call(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
    rejected: Option<&mut Vec<ApplicabilityResult>>,
) -> CallResolutionResult {
    let mut poi_info = PoiInfo::default();

    // type constructors are not methods
    let most_specific = if ci.called_type.is_type() && !ci.is_method_call {
        resolve_fn_call_for_type_ctor(ctx, ci, in_scope, in_poi_scope)
    } else {
        let gathered =
            gather_and_filter_candidates(ctx, call, ci, in_scope, in_poi_scope, rejected);
        find_most_specific_and_check(ctx, &gathered, call, ci, &mut poi_info)
    };

    // figure out the POI scope instantiations resolve their bodies under
    let any_instantiated = most_specific
        .iter()
        .any(|c| ctx.sigs.typed(c.sig).instantiated_from.is_some());
    let mut instantiation_poi = None;
    if any_instantiated {
        let poi = point_of_instantiation_scope(ctx, in_scope, in_poi_scope);
        instantiation_poi = Some(poi);
        poi_info.set_poi_scope(Some(poi));

        for candidate in most_specific.iter() {
            let untyped = ctx.sigs.untyped(ctx.sigs.typed(candidate.sig).untyped);
            if untyped.id_is_function() && !untyped.id.is_none() {
                functions::accumulate_pois_used_by_resolving_body(
                    ctx,
                    candidate.sig,
                    Some(poi),
                    &mut poi_info,
                );
            }
        }
    }

    // initializer bodies carry semantic checks even when concrete
    if is_call_info_for_initializer(ctx, ci) && most_specific.num_best() == 1 {
        if let Some(candidate) = most_specific.only() {
            let untyped = ctx.sigs.untyped(ctx.sigs.typed(candidate.sig).untyped);
            if !untyped.is_compiler_generated {
                let _ = functions::resolve_initializer(ctx, candidate.sig, in_poi_scope);
            }
        }
    }

    // compute the return type; return intent overloads must agree
    let mut ret_type = QualifiedType::unknown();
    let mut ret_type_set = false;
    for candidate in most_specific.iter() {
        let t = functions::return_type(ctx, candidate.sig, instantiation_poi);
        if ret_type_set && ret_type.type_id() != t.type_id() {
            ctx.error(
                ctx.sigs
                    .untyped(ctx.sigs.typed(candidate.sig).untyped)
                    .id,
                "return intent overload type does not match",
            );
        }
        ret_type = t;
        ret_type_set = true;
    }

    debug!(
        name = %ctx.name_of(ci.name),
        found = most_specific.found_candidates(),
        "resolved call"
    );

    CallResolutionResult {
        most_specific,
        expr_type: ret_type,
        poi_info,
    }
}

/// Select candidates, check them, and record which came from POI.
fn find_most_specific_and_check(
    ctx: &Context,
    gathered: &GatheredCandidates,
    call: Option<AstId>,
    ci: &CallInfo,
    poi_info: &mut PoiInfo,
) -> MostSpecificCandidates {
    let most_specific =
        find_most_specific_candidates(ctx, &gathered.candidates, &gathered.forwarding_info, ci);

    if let Some(call_id) = call {
        for i in gathered.first_poi_candidate..gathered.candidates.len() {
            for candidate in most_specific.iter() {
                if candidate.sig == gathered.candidates[i] {
                    let callee = ctx.sigs.untyped(ctx.sigs.typed(candidate.sig).untyped).id;
                    poi_info.add_ids(call_id, callee);
                }
            }
        }
    }

    most_specific
}

/// Invocation of a type constructor from a type.
fn resolve_fn_call_for_type_ctor(
    ctx: &Context,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
) -> MostSpecificCandidates {
    debug_assert!(ci.called_type.has_type());

    let initial = type_constructor_initial(ctx, ci.called_type.type_id());
    let mut candidates = Vec::new();
    filter_candidates_instantiating(
        ctx,
        &[initial],
        ci,
        in_scope,
        in_poi_scope,
        &mut candidates,
        None,
    );

    // at present there can be only one candidate here
    find_most_specific_candidates(ctx, &candidates, &[], ci)
}

// =============================================================================
// Tuple expressions
// =============================================================================

/// Resolve the tuple type from a tuple expression: all elements must be
/// uniformly type-valued or uniformly value-valued.
pub fn resolve_tuple_expr(ctx: &Context, call: Option<AstId>, ci: &CallInfo) -> CallResolutionResult {
    let mut any_unknown = false;
    let mut all_type = true;
    let mut all_value = true;
    for actual in &ci.actuals {
        let q = actual.qt;
        if !q.has_type() || q.is_unknown() {
            any_unknown = true;
        } else if q.is_type() {
            all_value = false;
        } else {
            all_type = false;
        }
    }

    if any_unknown {
        return CallResolutionResult::from_type(QualifiedType::new(
            Qualifier::ConstVar,
            TypeId::UNKNOWN,
        ));
    }

    if !all_type && !all_value {
        ctx.error(
            call.unwrap_or(AstId::NONE),
            "mix of value and type tuple elements in tuple expression",
        );
        return CallResolutionResult::from_type(QualifiedType::new(
            Qualifier::ConstVar,
            TypeId::ERRONEOUS,
        ));
    }

    let elements: Vec<TypeId> = ci.actuals.iter().map(|a| a.qt.type_id()).collect();
    let qt = if all_type {
        QualifiedType::type_(ctx.types.value_tuple(elements))
    } else {
        // value tuples are captured referentially
        QualifiedType::new(Qualifier::ConstVar, ctx.types.referential_tuple(elements))
    };
    CallResolutionResult::from_type(qt)
}

// =============================================================================
// Special forms
// =============================================================================

/// `new C(...)?` — the expression type is the nilable version of whatever
/// `new` produced.
fn resolve_postfix_nilable_applied_to_new(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
) -> Option<QualifiedType> {
    if !ci.is_op_call || ci.name != ctx.name("?") || ci.num_actuals() != 1 {
        return None;
    }
    let call_node = ctx.program().id_to_ast(call?)?;
    let op = call_node.as_call()?;
    let operand = ctx.program().id_to_ast(*op.actuals.first()?)?;
    let is_new = match &operand.kind {
        AstKind::New { .. } => true,
        AstKind::Call(inner) => matches!(
            ctx.program().id_to_ast(inner.callee).map(|n| &n.kind),
            Some(AstKind::New { .. })
        ),
        _ => false,
    };
    if !is_new {
        return None;
    }

    let new_qt = ci.actual(0).qt;
    match convert_class_type_to_nilable(ctx, new_qt.type_id()) {
        Some(nilable) => Some(QualifiedType::new(new_qt.qualifier(), nilable)),
        // non-class types have no nilable version; keep what `new` made
        None => Some(new_qt),
    }
}

/// Calls folded to a value without consulting user code.
fn resolve_fn_call_special(ctx: &Context, ast_for_err: AstId, ci: &CallInfo) -> Option<QualifiedType> {
    let eq = ctx.name("==");
    let neq = ctx.name("!=");

    if (ci.name == eq || ci.name == neq) && ci.num_actuals() == 2 {
        let lhs = ci.actual(0).qt;
        let rhs = ci.actual(1).qt;
        let both_type = lhs.is_type() && rhs.is_type();
        let both_param = lhs.is_param() && rhs.is_param();
        if both_type || both_param {
            let mut result = lhs == rhs;
            if ci.name == neq {
                result = !result;
            }
            return Some(QualifiedType::param_(TypeId::BOOL, ParamValue::Bool(result)));
        }
    }

    if ci.is_op_call && ci.name == ctx.name("!") && ci.num_actuals() == 1 {
        let qt = ci.actual(0).qt;
        if qt.is_param() && qt.type_id() == TypeId::BOOL {
            if let Some(ParamValue::Bool(v)) = qt.param() {
                return Some(QualifiedType::param_(TypeId::BOOL, ParamValue::Bool(!v)));
            }
        }
    }

    if ci.name == ctx.name("isCoercible") {
        if ci.num_actuals() != 2 {
            ctx.error(ast_for_err, "bad call to isCoercible");
            return Some(QualifiedType::new(Qualifier::Unknown, TypeId::ERRONEOUS));
        }
        let got = can_pass(ctx, ci.actual(0).qt, ci.actual(1).qt);
        return Some(QualifiedType::param_(
            TypeId::BOOL,
            ParamValue::Bool(got.passes()),
        ));
    }

    if ci.name == ctx.name("isIntegral") && ci.num_actuals() == 1 {
        let t = ci.actual(0).qt.type_id();
        let is_integral = matches!(ctx.types.key(t), TypeKey::Int(_) | TypeKey::Uint(_));
        return Some(QualifiedType::param_(
            TypeId::BOOL,
            ParamValue::Bool(is_integral),
        ));
    }

    None
}

/// Type-producing patterns that need other calls to finish: `domain(...)`
/// and `atomic(T)` rewrite to ordinary calls; `sync`/`single` are not
/// wired in yet.
fn resolve_fn_call_special_type(
    ctx: &Context,
    call: Option<AstId>,
    ci: &CallInfo,
    in_scope: ScopeId,
    in_poi_scope: Option<PoiScopeId>,
) -> Option<CallResolutionResult> {
    if ci.is_method_call {
        return None;
    }

    // types computable without resolving other calls
    if let Some(t) = resolve_builtin_type_ctor(ctx, call.unwrap_or(AstId::NONE), ci) {
        return Some(CallResolutionResult::from_type(QualifiedType::type_(t)));
    }

    if ci.name == ctx.name("domain") {
        // transform `domain(args...)` into `_domain.static_type(args...)`
        let generic_dom = ctx.types.generic_domain_type();
        let recv = QualifiedType::type_(generic_dom);
        let ctor_call = ci.with_receiver(
            ctx.name("this"),
            recv,
            Some(ctx.name("static_type")),
        );
        return Some(resolve_call(ctx, call, &ctor_call, in_scope, in_poi_scope, None));
    }

    if ci.name == ctx.name("atomic") {
        let mut renamed = ci.clone();
        renamed.name = ctx.name("chpl__atomicType");
        return Some(resolve_call(ctx, call, &renamed, in_scope, in_poi_scope, None));
    }

    if ci.name == ctx.name("sync") || ci.name == ctx.name("single") {
        ctx.unimplemented(call.unwrap_or(AstId::NONE), "sync/single type construction");
        return Some(CallResolutionResult::from_type(QualifiedType::new(
            Qualifier::Unknown,
            TypeId::ERRONEOUS,
        )));
    }

    None
}

/// Compiler-supported type-returning patterns: postfix `?` on a type,
/// star tuples, class management constructors, numeric constructors, and
/// `c_ptr`.
fn resolve_builtin_type_ctor(ctx: &Context, ast_for_err: AstId, ci: &CallInfo) -> Option<TypeId> {
    if ci.is_method_call {
        return None;
    }

    if ci.name == ctx.name("?") && ci.num_actuals() > 0 {
        let t = ci.actual(0).qt.type_id();
        if let Some(nilable) = convert_class_type_to_nilable(ctx, t) {
            return Some(nilable);
        }
    }

    if ci.name == ctx.name("*") && ci.num_actuals() == 2 {
        let first = ci.actual(0).qt;
        let second = ci.actual(1).qt;
        if first.is_param()
            && matches!(ctx.types.key(first.type_id()), TypeKey::Int(_) | TypeKey::Uint(_))
            && second.is_type()
        {
            let count = first.param().and_then(|p| p.as_count())?;
            let star = QualifiedType::var(second.type_id());
            return Some(ctx.types.star_tuple(Some(count), star, false));
        }
    }

    if let Some(t) = get_managed_class_type(ctx, ast_for_err, ci) {
        return Some(t);
    }
    if let Some(t) = get_numeric_type(ctx, ast_for_err, ci) {
        return Some(t);
    }
    if let Some(t) = get_c_ptr_type(ctx, ast_for_err, ci) {
        return Some(t);
    }

    None
}

/// `owned(T)`, `shared(T)`, `unmanaged(T)`, `borrowed(T)` and their `?`
/// forms.
fn get_managed_class_type(ctx: &Context, ast_for_err: AstId, ci: &CallInfo) -> Option<TypeId> {
    let name = ctx.name_of(ci.name);
    let types = &ctx.types;

    if ci.has_question_arg {
        if ci.num_actuals() != 0 {
            ctx.error(ast_for_err, "invalid class type construction");
            return Some(TypeId::ERRONEOUS);
        }
        return match name.as_str() {
            "owned" => Some(types.any_bound(AnyBoundKind::Owned)),
            "shared" => Some(types.any_bound(AnyBoundKind::Shared)),
            "unmanaged" => Some(types.class_type(
                types.any_bound(AnyBoundKind::Class),
                None,
                ClassDecorator::unmanaged(),
            )),
            "borrowed" => Some(types.class_type(
                types.any_bound(AnyBoundKind::Class),
                None,
                ClassDecorator::borrowed(),
            )),
            _ => None,
        };
    }

    let (management, manager) = match name.as_str() {
        "owned" => (Management::Managed, Some(types.any_bound(AnyBoundKind::Owned))),
        "shared" => (Management::Managed, Some(types.any_bound(AnyBoundKind::Shared))),
        "unmanaged" => (Management::Unmanaged, None),
        "borrowed" => (Management::Borrowed, None),
        _ => return None,
    };

    let t = if ci.num_actuals() > 0 {
        ci.actual(0).qt.type_id()
    } else {
        TypeId::NONE
    };

    // find the manageable type and take nilability from the operand
    let mut nilability = Nilability::NonNil;
    let manageable = match types.key(t) {
        TypeKey::BasicClass(_) | TypeKey::AnyBound(AnyBoundKind::Class) => t,
        TypeKey::Class(_) => {
            let shape = types.class_shape(t)?;
            if shape.decorator.is_nilable() {
                nilability = Nilability::Nilable;
            }
            shape.manageable
        }
        _ => {
            if !t.is_none() && !t.is_unknown() {
                ctx.error(ast_for_err, "invalid class type construction");
            }
            return Some(TypeId::ERRONEOUS);
        }
    };

    Some(types.class_type(manageable, manager, ClassDecorator::new(management, nilability)))
}

/// `int(w)`, `uint(w)`, `real(w)`, `imag(w)`, `complex(w)` with width in
/// [0, 128]; `int(?)` and `int(?t)` yield the generic bound.
fn get_numeric_type(ctx: &Context, ast_for_err: AstId, ci: &CallInfo) -> Option<TypeId> {
    let name = ctx.name_of(ci.name);
    let bound = match name.as_str() {
        "int" => AnyBoundKind::Int,
        "uint" => AnyBoundKind::Uint,
        "real" => AnyBoundKind::Real,
        "imag" => AnyBoundKind::Imag,
        "complex" => AnyBoundKind::Complex,
        _ => return None,
    };

    let mut use_generic_type = false;
    if ci.has_question_arg {
        // handle int(?)
        if ci.num_actuals() != 0 {
            ctx.error(ast_for_err, "invalid numeric type construction");
            return Some(TypeId::ERRONEOUS);
        }
        use_generic_type = true;
    } else {
        // handle int(?t) or int(16)
        if ci.num_actuals() != 1 {
            ctx.error(ast_for_err, "invalid numeric type construction");
            return Some(TypeId::ERRONEOUS);
        }
        let qt = ci.actual(0).qt;
        if qt.type_id() == TypeId::ANY {
            use_generic_type = true;
        } else if qt.is_param() && qt.param().is_none() {
            use_generic_type = true;
        }
    }

    if use_generic_type {
        return Some(ctx.types.any_bound(bound));
    }

    let qt = ci.actual(0).qt;
    let t = qt.type_id();
    if t.is_none() {
        return Some(TypeId::UNKNOWN);
    }
    if t.is_unknown() || t.is_erroneous() {
        // just propagate without raising errors
        return Some(t);
    }
    let Some(value) = qt.param().and_then(|p| p.as_int()) else {
        if qt.param().is_none() {
            return Some(TypeId::UNKNOWN);
        }
        ctx.error(ast_for_err, "invalid numeric type construction");
        return Some(TypeId::ERRONEOUS);
    };
    if !matches!(ctx.types.key(t), TypeKey::Int(_)) {
        ctx.error(ast_for_err, "invalid numeric type construction");
        return Some(TypeId::ERRONEOUS);
    }

    let valid = matches!(
        (&name[..], value),
        ("int" | "uint", 8 | 16 | 32 | 64)
            | ("real" | "imag", 32 | 64)
            | ("complex", 64 | 128)
    ) && (0..=128).contains(&value);
    if !valid {
        ctx.error(ast_for_err, "invalid numeric type construction");
        return Some(TypeId::ERRONEOUS);
    }

    let w = value as u16;
    Some(match name.as_str() {
        "int" => ctx.types.int_type(w),
        "uint" => ctx.types.uint_type(w),
        "real" => ctx.types.real_type(w),
        "imag" => ctx.types.imag_type(w),
        _ => ctx.types.complex_type(w),
    })
}

/// `c_ptr(T)` and its generic forms.
fn get_c_ptr_type(ctx: &Context, ast_for_err: AstId, ci: &CallInfo) -> Option<TypeId> {
    if ci.name != ctx.name("c_ptr") {
        return None;
    }

    if ci.has_question_arg {
        if ci.num_actuals() != 0 {
            ctx.error(ast_for_err, "invalid c_ptr type construction");
            return Some(TypeId::ERRONEOUS);
        }
        return Some(ctx.types.c_ptr_type(None));
    }

    if ci.num_actuals() != 1 {
        ctx.error(ast_for_err, "invalid c_ptr type construction");
        return Some(TypeId::ERRONEOUS);
    }
    let qt = ci.actual(0).qt;
    if qt.type_id() == TypeId::ANY {
        return Some(ctx.types.c_ptr_type(None));
    }
    let t = qt.type_id();
    if t.is_none() {
        return Some(TypeId::UNKNOWN);
    }
    if t.is_unknown() || t.is_erroneous() {
        return Some(t);
    }
    if !qt.is_type() {
        ctx.error(ast_for_err, "invalid c_ptr type construction");
        return Some(TypeId::ERRONEOUS);
    }
    Some(ctx.types.c_ptr_type(Some(t)))
}

/// The nilable version of a class type; `None` for non-class types.
fn convert_class_type_to_nilable(ctx: &Context, t: TypeId) -> Option<TypeId> {
    let ct = match ctx.types.key(t) {
        TypeKey::BasicClass(_) => ctx.types.class_type(
            t,
            None,
            ClassDecorator::new(Management::Generic, Nilability::NonNil),
        ),
        TypeKey::Class(_) => t,
        _ => return None,
    };
    let shape = ctx.types.class_shape(ct)?;
    let d = shape.decorator.add_nilable();
    let result = ctx.types.class_with_decorator(ct, d)?;
    trace!(?t, ?result, "converted class type to nilable");
    Some(result)
}

#[cfg(test)]
#[path = "tests/call_tests.rs"]
mod tests;
