//! Genericity analysis.
//!
//! Classifies a type as concrete, generic, or generic-with-defaults. For
//! composite types the answer comes from resolved fields; the `ignore` set
//! and the is-running check on the fields query keep mutually recursive
//! class types (e.g. linked lists) from looping.

use crate::context::Context;
use crate::types::{DomainShape, Genericity, QualifiedType, TypeId, TypeKey};
use rustc_hash::FxHashSet;

use super::fields;
use super::DefaultsPolicy;

pub fn get_type_genericity(ctx: &Context, t: TypeId) -> Genericity {
    let mut ignore = FxHashSet::default();
    get_type_genericity_ignoring(ctx, t, &mut ignore)
}

pub fn get_qt_genericity(ctx: &Context, qt: QualifiedType) -> Genericity {
    let mut ignore = FxHashSet::default();
    get_qt_genericity_ignoring(ctx, qt, &mut ignore)
}

pub fn get_qt_genericity_ignoring(
    ctx: &Context,
    qt: QualifiedType,
    ignore: &mut FxHashSet<TypeId>,
) -> Genericity {
    let g = qt.shallow_genericity(&ctx.types);
    if g == Genericity::MaybeGeneric && qt.has_type() {
        return get_type_genericity_ignoring(ctx, qt.type_id(), ignore);
    }
    g
}

pub fn get_type_genericity_ignoring(
    ctx: &Context,
    t: TypeId,
    ignore: &mut FxHashSet<TypeId>,
) -> Genericity {
    if t.is_none() {
        return Genericity::MaybeGeneric;
    }

    // check if the key alone knows the full answer
    let key = ctx.types.key(t);
    let shallow = key.shallow_genericity();
    if shallow != Genericity::MaybeGeneric {
        return shallow;
    }
    if t.is_unknown() {
        return Genericity::MaybeGeneric;
    }

    match key {
        TypeKey::CPtr(Some(elt)) => {
            // mimics the fields logic: the c_ptr has a single field, the
            // element type
            if get_type_genericity_ignoring(ctx, elt, ignore) == Genericity::Concrete {
                Genericity::Concrete
            } else {
                Genericity::Generic
            }
        }
        TypeKey::Tuple(_) => tuple_genericity(ctx, t, ignore),
        TypeKey::Domain(_) => match ctx.types.domain_shape(t).as_deref() {
            Some(DomainShape::Unknown) | None => Genericity::Generic,
            Some(DomainShape::Rectangular { idx_type, .. }) => {
                if get_type_genericity_ignoring(ctx, *idx_type, ignore) == Genericity::Concrete {
                    Genericity::Concrete
                } else {
                    Genericity::Generic
                }
            }
        },
        TypeKey::Array { domain, elt } => {
            let dg = get_type_genericity_ignoring(ctx, domain, ignore);
            let eg = get_type_genericity_ignoring(ctx, elt, ignore);
            if dg != Genericity::Concrete || eg != Genericity::Concrete {
                Genericity::Generic
            } else {
                Genericity::Concrete
            }
        }
        TypeKey::Class(_) => {
            let Some(shape) = ctx.types.class_shape(t) else {
                return Genericity::Generic;
            };
            if shape.decorator.is_generic() {
                return Genericity::Generic;
            }
            match ctx.types.key(shape.manageable) {
                TypeKey::BasicClass(_) => get_fields_genericity(ctx, shape.manageable, ignore),
                // AnyClass manageable
                _ => Genericity::Generic,
            }
        }
        TypeKey::Composite(_) | TypeKey::BasicClass(_) => get_fields_genericity(ctx, t, ignore),
        TypeKey::Unknown => Genericity::MaybeGeneric,
        _ => Genericity::Concrete,
    }
}

fn tuple_genericity(ctx: &Context, t: TypeId, ignore: &mut FxHashSet<TypeId>) -> Genericity {
    let Some(shape) = ctx.types.tuple_shape(t) else {
        return Genericity::Generic;
    };
    if !shape.is_known_size() {
        return Genericity::Generic;
    }
    let mut combined = Genericity::Concrete;
    for i in 0..shape.num_elements() {
        let Some(elt) = shape.element(i) else {
            return Genericity::Generic;
        };
        let g = get_qt_genericity_ignoring(ctx, elt, ignore);
        debug_assert_ne!(g, Genericity::MaybeGeneric);
        if g == Genericity::Generic {
            combined = g;
        } else if g == Genericity::GenericWithDefaults && combined == Genericity::Concrete {
            combined = g;
        }
    }
    combined
}

/// Genericity of a composite based on the genericity of its fields.
fn get_fields_genericity(ctx: &Context, ct: TypeId, ignore: &mut FxHashSet<TypeId>) -> Genericity {
    // add the current type to the ignore set, and stop now if it is
    // already there
    if !ignore.insert(ct) {
        return Genericity::Concrete;
    }

    let mut g = Genericity::Concrete;

    // a basic class considers its parent first
    if let TypeKey::BasicClass(_) = ctx.types.key(ct) {
        if let Some(parent) = ctx.types.composite_shape(ct).and_then(|s| s.parent) {
            g = get_fields_genericity(ctx, parent, ignore);
            debug_assert_ne!(g, Genericity::MaybeGeneric);
            if g == Genericity::Generic {
                return Genericity::Generic;
            }
        }
    }

    // the fields query for this composite may already be running above us
    let revision = ctx.revision();
    for policy in [
        DefaultsPolicy::IgnoreDefaults,
        DefaultsPolicy::UseDefaults,
        DefaultsPolicy::UseDefaultsOtherFields,
    ] {
        if ctx
            .queries
            .fields_for_type_decl
            .is_running(revision, &(ct, policy))
        {
            return Genericity::Concrete;
        }
    }

    // we only care about whether each field is generic on its own merit,
    // so defaults apply to the fields other than the one being checked
    let f = fields::fields_for_type_decl(ctx, ct, DefaultsPolicy::UseDefaultsOtherFields);

    if f.is_generic_with_defaults()
        && (g == Genericity::Concrete || g == Genericity::GenericWithDefaults)
    {
        return Genericity::GenericWithDefaults;
    }
    if f.is_generic() {
        return Genericity::Generic;
    }
    g
}
