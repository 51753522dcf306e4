//! The can-pass oracle and intent resolution.
//!
//! `can_pass(actual, formal)` answers whether an actual argument is
//! acceptable for a formal, and if so whether doing so instantiates a
//! generic formal and/or converts the value. The resolution core consumes
//! the answer; it never inspects types pairwise itself.
//!
//! The conversion set covered here: numeric widening, param-to-value,
//! class subtyping and borrowing, nilable widening, generic-bound and
//! generic-composite instantiation, tuples element-wise, c_ptr and domain
//! and array component instantiation. There is no promotion machinery.

use crate::context::Context;
use crate::types::{
    AnyBoundKind, Genericity, Management, QualifiedType, Qualifier, TypeId, TypeKey,
};

/// Why `can_pass` said no.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassFailReason {
    KindMismatch,
    TypeMismatch,
    ParamRequired,
    Nilability,
    Management,
    /// `ref` formals require the exact type; a conversion was needed.
    RefExactness,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanPassResult {
    passes: bool,
    instantiates: bool,
    converts: bool,
    promotes: bool,
    reason: Option<PassFailReason>,
}

impl CanPassResult {
    fn pass() -> Self {
        CanPassResult {
            passes: true,
            instantiates: false,
            converts: false,
            promotes: false,
            reason: None,
        }
    }

    fn fail(reason: PassFailReason) -> Self {
        CanPassResult {
            passes: false,
            instantiates: false,
            converts: false,
            promotes: false,
            reason: Some(reason),
        }
    }

    fn with(instantiates: bool, converts: bool) -> Self {
        CanPassResult {
            passes: true,
            instantiates,
            converts,
            promotes: false,
            reason: None,
        }
    }

    pub fn passes(&self) -> bool {
        self.passes
    }

    pub fn instantiates(&self) -> bool {
        self.instantiates
    }

    pub fn converts(&self) -> bool {
        self.converts
    }

    pub fn promotes(&self) -> bool {
        self.promotes
    }

    pub fn reason(&self) -> Option<PassFailReason> {
        self.reason
    }
}

/// Outcome of the structural part of the check: whether passing the types
/// instantiates and/or converts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TypePass {
    instantiates: bool,
    converts: bool,
}

impl TypePass {
    const EXACT: TypePass = TypePass {
        instantiates: false,
        converts: false,
    };

    fn instantiating() -> Self {
        TypePass {
            instantiates: true,
            converts: false,
        }
    }

    fn converting() -> Self {
        TypePass {
            instantiates: false,
            converts: true,
        }
    }

    fn join(self, other: TypePass) -> TypePass {
        TypePass {
            instantiates: self.instantiates || other.instantiates,
            converts: self.converts || other.converts,
        }
    }
}

pub fn can_pass(ctx: &Context, actual: QualifiedType, formal: QualifiedType) -> CanPassResult {
    // erroneous types silence downstream checks
    if actual.is_erroneous() || formal.is_erroneous() {
        return CanPassResult::pass();
    }

    // an unknown formal cannot reject anything yet
    if formal.is_unknown() {
        return CanPassResult::with(true, false);
    }
    if actual.is_unknown() {
        return CanPassResult::fail(PassFailReason::TypeMismatch);
    }

    // kind compatibility
    match formal.qualifier() {
        Qualifier::Param => {
            if !actual.is_param() {
                return CanPassResult::fail(PassFailReason::ParamRequired);
            }
            // a valued param formal accepts exactly that value
            if formal.param().is_some() && actual.param() != formal.param() {
                return CanPassResult::fail(PassFailReason::TypeMismatch);
            }
        }
        Qualifier::Type => {
            if !actual.is_type() {
                return CanPassResult::fail(PassFailReason::KindMismatch);
            }
        }
        _ => {
            if actual.is_type() {
                return CanPassResult::fail(PassFailReason::KindMismatch);
            }
        }
    }

    let Some(tp) = can_pass_types(ctx, actual.type_id(), formal.type_id()) else {
        return CanPassResult::fail(PassFailReason::TypeMismatch);
    };

    // a valued param passing to an unvalued param formal instantiates it
    let mut instantiates = tp.instantiates;
    if formal.is_param() && formal.param().is_none() && actual.param().is_some() {
        instantiates = true;
    }

    // ref formals require the exact type; conversions are ruled out
    if tp.converts && matches!(formal.qualifier(), Qualifier::Ref | Qualifier::RefMaybeConst) {
        return CanPassResult::fail(PassFailReason::RefExactness);
    }

    CanPassResult::with(instantiates, tp.converts)
}

fn can_pass_types(ctx: &Context, actual: TypeId, formal: TypeId) -> Option<TypePass> {
    if actual == formal {
        return Some(TypePass::EXACT);
    }

    let actual_key = ctx.types.key(actual);
    let formal_key = ctx.types.key(formal);

    match (&actual_key, &formal_key) {
        (_, TypeKey::AnyType) => Some(TypePass::instantiating()),
        (TypeKey::Erroneous, _) | (_, TypeKey::Erroneous) => Some(TypePass::EXACT),

        // numeric widening
        (TypeKey::Int(a), TypeKey::Int(f)) if a < f => Some(TypePass::converting()),
        (TypeKey::Uint(a), TypeKey::Uint(f)) if a < f => Some(TypePass::converting()),
        (TypeKey::Uint(a), TypeKey::Int(f)) if a < f => Some(TypePass::converting()),
        (TypeKey::Real(a), TypeKey::Real(f)) if a < f => Some(TypePass::converting()),
        (TypeKey::Imag(a), TypeKey::Imag(f)) if a < f => Some(TypePass::converting()),
        (TypeKey::Int(_) | TypeKey::Uint(_), TypeKey::Real(f)) if *f >= 64 => {
            Some(TypePass::converting())
        }
        (TypeKey::Real(a), TypeKey::Complex(f)) if (*a as u32) * 2 <= *f as u32 => {
            Some(TypePass::converting())
        }
        (TypeKey::Complex(a), TypeKey::Complex(f)) if a < f => Some(TypePass::converting()),

        // generic numeric bounds
        (TypeKey::Int(_), TypeKey::AnyBound(AnyBoundKind::Int))
        | (TypeKey::Uint(_), TypeKey::AnyBound(AnyBoundKind::Uint))
        | (TypeKey::Real(_), TypeKey::AnyBound(AnyBoundKind::Real))
        | (TypeKey::Imag(_), TypeKey::AnyBound(AnyBoundKind::Imag))
        | (TypeKey::Complex(_), TypeKey::AnyBound(AnyBoundKind::Complex)) => {
            Some(TypePass::instantiating())
        }

        // class bounds
        (TypeKey::Class(_), TypeKey::AnyBound(AnyBoundKind::Class)) => {
            Some(TypePass::instantiating())
        }
        (TypeKey::Class(_), TypeKey::AnyBound(AnyBoundKind::Owned)) => {
            class_to_manager_bound(ctx, actual, AnyBoundKind::Owned)
        }
        (TypeKey::Class(_), TypeKey::AnyBound(AnyBoundKind::Shared)) => {
            class_to_manager_bound(ctx, actual, AnyBoundKind::Shared)
        }

        (TypeKey::Class(_), TypeKey::Class(_)) => can_pass_class(ctx, actual, formal),

        // c_ptr
        (TypeKey::CPtr(Some(_)), TypeKey::CPtr(None)) => Some(TypePass::instantiating()),
        (TypeKey::CPtr(Some(a)), TypeKey::CPtr(Some(f))) => {
            let inner = can_pass_types(ctx, *a, *f)?;
            if inner.converts {
                // pointer element types do not convert
                return None;
            }
            Some(inner)
        }

        // domains and arrays
        (TypeKey::Domain(_), TypeKey::Domain(_)) => {
            if ctx.types.key(formal).shallow_genericity() == Genericity::Generic
                || matches!(
                    ctx.types.domain_shape(formal).as_deref(),
                    Some(crate::types::DomainShape::Unknown)
                )
            {
                Some(TypePass::instantiating())
            } else {
                None
            }
        }
        (
            TypeKey::Array {
                domain: ad,
                elt: ae,
            },
            TypeKey::Array {
                domain: fd,
                elt: fe,
            },
        ) => {
            let d = can_pass_types(ctx, *ad, *fd)?;
            let e = can_pass_types(ctx, *ae, *fe)?;
            if d.converts || e.converts {
                return None;
            }
            Some(d.join(e))
        }

        (TypeKey::Tuple(_), TypeKey::Tuple(_)) => can_pass_tuple(ctx, actual, formal),

        (TypeKey::Composite(_), TypeKey::Composite(_))
        | (TypeKey::BasicClass(_), TypeKey::BasicClass(_)) => {
            can_pass_composite(ctx, actual, formal)
        }

        _ => None,
    }
}

/// Actual decorated class to an `owned`/`shared` manager bound.
fn class_to_manager_bound(ctx: &Context, actual: TypeId, bound: AnyBoundKind) -> Option<TypePass> {
    let shape = ctx.types.class_shape(actual)?;
    if !shape.decorator.is_managed() {
        return None;
    }
    let manager = shape.manager?;
    if ctx.types.key(manager) == TypeKey::AnyBound(bound) {
        Some(TypePass::instantiating())
    } else {
        None
    }
}

fn can_pass_class(ctx: &Context, actual: TypeId, formal: TypeId) -> Option<TypePass> {
    let a = ctx.types.class_shape(actual)?;
    let f = ctx.types.class_shape(formal)?;
    let mut pass = TypePass::EXACT;

    // nilability: non-nil widens to nilable; the reverse is rejected
    if a.decorator.nilability != f.decorator.nilability {
        match f.decorator.nilability {
            crate::types::Nilability::Generic => pass.instantiates = true,
            crate::types::Nilability::Nilable if a.decorator.is_non_nil() => {
                pass.converts = true;
            }
            _ => return None,
        }
    }

    // management: borrowed formals borrow from anything; managed formals
    // require the same manager; unmanaged requires unmanaged
    if a.decorator.management != f.decorator.management {
        match f.decorator.management {
            Management::Generic => pass.instantiates = true,
            Management::Borrowed => pass.converts = true,
            _ => return None,
        }
    } else if f.decorator.management == Management::Managed && a.manager != f.manager {
        let formal_manager_generic = f
            .manager
            .is_some_and(|m| matches!(ctx.types.key(m), TypeKey::AnyBound(_)));
        if formal_manager_generic {
            pass.instantiates = true;
        } else {
            return None;
        }
    }

    // manageable: exact, generic bound, subtype, or generic composite
    if a.manageable != f.manageable {
        if ctx.types.key(f.manageable) == TypeKey::AnyBound(AnyBoundKind::Class) {
            pass.instantiates = true;
        } else if basic_class_is_subtype(ctx, a.manageable, f.manageable) {
            pass.converts = true;
        } else if let Some(inner) = can_pass_composite(ctx, a.manageable, f.manageable) {
            pass = pass.join(inner);
        } else {
            return None;
        }
    }

    Some(pass)
}

fn can_pass_tuple(ctx: &Context, actual: TypeId, formal: TypeId) -> Option<TypePass> {
    let a = ctx.types.tuple_shape(actual)?;
    let f = ctx.types.tuple_shape(formal)?;

    let mut pass = TypePass::EXACT;
    if !f.is_known_size() {
        pass.instantiates = true;
    } else if a.num_elements() != f.num_elements() {
        return None;
    }

    let n = a.num_elements();
    for i in 0..n {
        let ae = a.element(i)?;
        let fe = match f.element(i) {
            Some(e) => e,
            None if f.star.is_some() => f.star?,
            None => return None,
        };
        let elem = can_pass_types(ctx, ae.type_id(), fe.type_id())?;
        pass = pass.join(elem);
    }
    Some(pass)
}

/// Records, unions, and basic classes: a generic declaration accepts its
/// instantiations and its partial instantiations accept refinements.
fn can_pass_composite(ctx: &Context, actual: TypeId, formal: TypeId) -> Option<TypePass> {
    let a = ctx.types.composite_shape(actual)?;
    let f = ctx.types.composite_shape(formal)?;
    if a.decl_id != f.decl_id {
        return None;
    }
    // walk the instantiation chain of the actual looking for the formal
    let mut cur = actual;
    loop {
        if cur == formal {
            return Some(TypePass::instantiating());
        }
        let shape = ctx.types.composite_shape(cur)?;
        match shape.instantiated_from {
            Some(from) => cur = from,
            None => break,
        }
    }
    // the formal is the fully-generic declaration type
    if f.substitutions.is_empty() && f.instantiated_from.is_none() {
        Some(TypePass::instantiating())
    } else {
        None
    }
}

/// Walk the superclass chain of `actual` looking for `formal`.
pub fn basic_class_is_subtype(ctx: &Context, actual: TypeId, formal: TypeId) -> bool {
    let mut cur = Some(actual);
    while let Some(t) = cur {
        if t == formal {
            return true;
        }
        cur = ctx.types.composite_shape(t).and_then(|s| s.parent);
    }
    false
}

/// Map a declared formal's qualified type to the concrete intent used for
/// argument passing.
pub fn resolve_intent(ctx: &Context, qt: QualifiedType, is_this: bool, is_init: bool) -> Qualifier {
    match qt.qualifier() {
        Qualifier::Type => Qualifier::Type,
        Qualifier::Param => Qualifier::Param,
        Qualifier::In => Qualifier::In,
        Qualifier::ConstIn => Qualifier::ConstIn,
        Qualifier::Out => Qualifier::Out,
        Qualifier::Inout => Qualifier::Inout,
        Qualifier::Ref => Qualifier::Ref,
        Qualifier::ConstRef => Qualifier::ConstRef,
        Qualifier::RefMaybeConst => Qualifier::RefMaybeConst,
        _ => default_intent(ctx, qt.type_id(), is_this, is_init),
    }
}

fn default_intent(ctx: &Context, ty: TypeId, is_this: bool, is_init: bool) -> Qualifier {
    if is_init {
        // the receiver being initialized is mutated by definition
        return Qualifier::Ref;
    }
    match ctx.types.key(ty) {
        TypeKey::Composite(_) | TypeKey::Tuple(_) | TypeKey::Array { .. } | TypeKey::Domain(_) => {
            if is_this {
                Qualifier::RefMaybeConst
            } else {
                Qualifier::ConstRef
            }
        }
        _ => Qualifier::ConstIn,
    }
}

#[cfg(test)]
#[path = "tests/can_pass_tests.rs"]
mod tests;
