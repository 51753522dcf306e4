use super::*;
use crate::ast::{AstId, Program};
use crate::interner::StringInterner;
use crate::types::{
    ClassDecorator, CompositeKind, CompositeShape, Nilability, ParamValue, SubstitutionsMap,
};

fn ctx() -> Context {
    Context::new(Program::new(), StringInterner::new())
}

fn basic_class(ctx: &Context, name: &str, parent: Option<TypeId>) -> TypeId {
    let name = ctx.name(name);
    ctx.types.composite_type(CompositeShape {
        kind: CompositeKind::Class,
        decl_id: AstId::new(name, -1),
        name,
        parent,
        substitutions: SubstitutionsMap::new(),
        instantiated_from: None,
    })
}

#[test]
fn test_exact_and_widening() {
    let ctx = ctx();
    let i32t = ctx.types.int_type(32);
    let i64t = ctx.types.int_type(64);

    let exact = can_pass(&ctx, QualifiedType::var(i64t), QualifiedType::var(i64t));
    assert!(exact.passes());
    assert!(!exact.converts());
    assert!(!exact.instantiates());

    let widen = can_pass(&ctx, QualifiedType::var(i32t), QualifiedType::var(i64t));
    assert!(widen.passes());
    assert!(widen.converts());

    let narrow = can_pass(&ctx, QualifiedType::var(i64t), QualifiedType::var(i32t));
    assert!(!narrow.passes());
}

#[test]
fn test_param_formal_requires_param_actual() {
    let ctx = ctx();
    let i64t = ctx.types.int_type(64);
    let formal = QualifiedType::param_unvalued(i64t);

    let var_actual = can_pass(&ctx, QualifiedType::var(i64t), formal);
    assert!(!var_actual.passes());
    assert_eq!(var_actual.reason(), Some(PassFailReason::ParamRequired));

    let param_actual = can_pass(
        &ctx,
        QualifiedType::param_(i64t, ParamValue::Int(3)),
        formal,
    );
    assert!(param_actual.passes());
    assert!(param_actual.instantiates(), "binds the param value");
}

#[test]
fn test_any_bound_instantiates() {
    let ctx = ctx();
    let i32t = ctx.types.int_type(32);
    let any_int = ctx.types.any_bound(AnyBoundKind::Int);
    let got = can_pass(&ctx, QualifiedType::var(i32t), QualifiedType::var(any_int));
    assert!(got.passes());
    assert!(got.instantiates());
    assert!(!got.converts());

    let real = ctx.types.real_type(64);
    assert!(!can_pass(&ctx, QualifiedType::var(real), QualifiedType::var(any_int)).passes());
}

#[test]
fn test_shared_actual_to_borrowed_formal() {
    let ctx = ctx();
    let c = basic_class(&ctx, "C", None);
    let any_shared = ctx.types.any_bound(AnyBoundKind::Shared);
    let shared_c = ctx.types.class_type(
        c,
        Some(any_shared),
        ClassDecorator::new(Management::Managed, Nilability::NonNil),
    );
    // the type named by a bare `borrowed` formal annotation
    let any_class = ctx.types.any_bound(AnyBoundKind::Class);
    let borrowed = ctx.types.class_type(
        any_class,
        None,
        ClassDecorator::new(Management::Borrowed, Nilability::Generic),
    );

    let got = can_pass(
        &ctx,
        QualifiedType::var(shared_c),
        QualifiedType::var(borrowed),
    );
    assert!(got.passes());
    assert!(got.instantiates());
    assert!(got.converts(), "borrowing is a conversion");
}

#[test]
fn test_nilable_actual_rejected_by_nonnil_formal() {
    let ctx = ctx();
    let c = basic_class(&ctx, "C", None);
    let nonnil = ctx.types.class_type(c, None, ClassDecorator::borrowed());
    let nilable = ctx
        .types
        .class_type(c, None, ClassDecorator::borrowed().add_nilable());

    assert!(!can_pass(&ctx, QualifiedType::var(nilable), QualifiedType::var(nonnil)).passes());
    let widen = can_pass(&ctx, QualifiedType::var(nonnil), QualifiedType::var(nilable));
    assert!(widen.passes());
    assert!(widen.converts());
}

#[test]
fn test_subtype_conversion_and_ref_exactness() {
    let ctx = ctx();
    let parent = basic_class(&ctx, "Parent", None);
    let child = basic_class(&ctx, "Child", Some(parent));
    let borrowed_parent = ctx.types.class_type(parent, None, ClassDecorator::borrowed());
    let borrowed_child = ctx.types.class_type(child, None, ClassDecorator::borrowed());

    let by_value = can_pass(
        &ctx,
        QualifiedType::var(borrowed_child),
        QualifiedType::var(borrowed_parent),
    );
    assert!(by_value.passes());
    assert!(by_value.converts());

    // ref formals require the exact type
    let by_ref = can_pass(
        &ctx,
        QualifiedType::var(borrowed_child),
        QualifiedType::new(Qualifier::Ref, borrowed_parent),
    );
    assert!(!by_ref.passes());
    assert_eq!(by_ref.reason(), Some(PassFailReason::RefExactness));
}

#[test]
fn test_generic_composite_accepts_instantiation() {
    let ctx = ctx();
    let name = ctx.name("R");
    let decl = AstId::new(name, -1);
    let generic = ctx.types.composite_type(CompositeShape {
        kind: CompositeKind::Record,
        decl_id: decl,
        name,
        parent: None,
        substitutions: SubstitutionsMap::new(),
        instantiated_from: None,
    });
    let mut subs = SubstitutionsMap::new();
    subs.insert(
        AstId::new(name, 0),
        QualifiedType::type_(ctx.types.int_type(64)),
    );
    let inst = ctx.types.composite_type(CompositeShape {
        kind: CompositeKind::Record,
        decl_id: decl,
        name,
        parent: None,
        substitutions: subs,
        instantiated_from: Some(generic),
    });

    let got = can_pass(&ctx, QualifiedType::var(inst), QualifiedType::var(generic));
    assert!(got.passes());
    assert!(got.instantiates());

    // the reverse does not hold
    assert!(!can_pass(&ctx, QualifiedType::var(generic), QualifiedType::var(inst)).passes());
}

#[test]
fn test_vararg_star_tuple_accepts_elements() {
    let ctx = ctx();
    let star = QualifiedType::var(ctx.types.int_type(64));
    let unknown_size = ctx.types.star_tuple(None, star, true);
    let three = ctx
        .types
        .value_tuple(vec![ctx.types.int_type(64); 3]);

    let got = can_pass(
        &ctx,
        QualifiedType::var(three),
        QualifiedType::var(unknown_size),
    );
    assert!(got.passes());
    assert!(got.instantiates());
}
