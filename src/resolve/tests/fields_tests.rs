use super::*;
use crate::ast::build::*;
use crate::resolve::functions::initial_type_for_type_decl;
use crate::resolve::genericity::get_type_genericity;
use crate::resolve::DefaultsPolicy;
use crate::test_fixtures::*;
use crate::types::{QualifiedType, Qualifier};

#[test]
fn test_concrete_record_fields() {
    let ctx = context_for(vec![Decl::Record {
        name: "R".to_string(),
        children: vec![
            var("x", Some(ident("int")), None),
            var("y", Some(ident("real")), None),
        ],
    }]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));
    let fields = fields_for_type_decl(&ctx, r, DefaultsPolicy::UseDefaults);

    assert_eq!(fields.num_fields(), 2);
    assert_eq!(fields.field(0).qt.type_id(), ctx.types.int_type(64));
    assert_eq!(fields.field(1).qt.type_id(), ctx.types.real_type(64));
    assert!(!fields.is_generic());
    assert!(!fields.is_generic_with_defaults());
    assert_eq!(get_type_genericity(&ctx, r), crate::types::Genericity::Concrete);
}

#[test]
fn test_generic_record() {
    // `type t;` with no default makes the record generic
    let ctx = context_for(vec![Decl::Record {
        name: "R".to_string(),
        children: vec![
            type_var_no_init("t"),
            var("x", Some(ident("t")), None),
        ],
    }]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));
    let fields = fields_for_type_decl(&ctx, r, DefaultsPolicy::UseDefaults);
    assert!(fields.is_generic());
    assert_eq!(get_type_genericity(&ctx, r), crate::types::Genericity::Generic);
}

fn type_var_no_init(name: &str) -> Decl {
    Decl::Var {
        name: name.to_string(),
        storage: crate::ast::VarStorage::Type,
        type_expr: None,
        init_expr: None,
    }
}

#[test]
fn test_generic_with_defaults_record() {
    let ctx = context_for(vec![Decl::Record {
        name: "D".to_string(),
        children: vec![type_var("t", ident("int"))],
    }]);
    let d = initial_type_for_type_decl(&ctx, decl_id(&ctx, "D"));
    let fields = fields_for_type_decl(&ctx, d, DefaultsPolicy::UseDefaultsOtherFields);
    assert!(!fields.is_generic());
    assert!(fields.is_generic_with_defaults());
    assert_eq!(
        get_type_genericity(&ctx, d),
        crate::types::Genericity::GenericWithDefaults
    );

    // with full defaults the field settles
    let with_defaults = fields_for_type_decl(&ctx, d, DefaultsPolicy::UseDefaults);
    assert_eq!(
        with_defaults.field(0).qt.type_id(),
        ctx.types.int_type(64)
    );
}

#[test]
fn test_defaults_policy_reuse() {
    // for a composite that is not generic-with-defaults, USE_DEFAULTS
    // returns the same object as USE_DEFAULTS_OTHER_FIELDS
    let ctx = context_for(vec![Decl::Record {
        name: "R".to_string(),
        children: vec![var("x", Some(ident("int")), None)],
    }]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));
    let a = fields_for_type_decl(&ctx, r, DefaultsPolicy::UseDefaults);
    let b = fields_for_type_decl(&ctx, r, DefaultsPolicy::UseDefaultsOtherFields);
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}

#[test]
fn test_type_with_defaults() {
    let ctx = context_for(vec![Decl::Record {
        name: "D".to_string(),
        children: vec![type_var("t", ident("int"))],
    }]);
    let d = initial_type_for_type_decl(&ctx, decl_id(&ctx, "D"));
    let qt = type_with_defaults(&ctx, QualifiedType::type_(d));
    assert_ne!(qt.type_id(), d, "generic-with-defaults type instantiates");
    assert_eq!(
        get_type_genericity(&ctx, qt.type_id()),
        crate::types::Genericity::Concrete
    );

    // a concrete type is unchanged
    let ctx2 = context_for(vec![Decl::Record {
        name: "C".to_string(),
        children: vec![var("x", Some(ident("int")), None)],
    }]);
    let c = initial_type_for_type_decl(&ctx2, decl_id(&ctx2, "C"));
    assert_eq!(type_with_defaults(&ctx2, QualifiedType::type_(c)).type_id(), c);
}

#[test]
fn test_forwarding_cycle_detected_once() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "A".to_string(),
            children: vec![Decl::ForwardingField {
                name: "b".to_string(),
                storage: crate::ast::VarStorage::Var,
                type_expr: Some(ident("B")),
                init_expr: None,
            }],
        },
        Decl::Record {
            name: "B".to_string(),
            children: vec![Decl::ForwardingField {
                name: "a".to_string(),
                storage: crate::ast::VarStorage::Var,
                type_expr: Some(ident("A")),
                init_expr: None,
            }],
        },
    ]);
    let a = initial_type_for_type_decl(&ctx, decl_id(&ctx, "A"));

    assert!(emit_error_for_forwarding_cycles(&ctx, a));
    assert_eq!(ctx.error_count(), 1);

    // re-running is a memo hit: still exactly one diagnostic per cycle
    assert!(emit_error_for_forwarding_cycles(&ctx, a));
    assert_eq!(ctx.error_count(), 1);
}

#[test]
fn test_forwarding_expr_targets() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "Inner".to_string(),
            children: vec![var("x", Some(ident("int")), None)],
        },
        Decl::Record {
            name: "Outer".to_string(),
            children: vec![
                var("impl", Some(ident("Inner")), None),
                Decl::Forwarding { expr: ident("impl") },
            ],
        },
    ]);
    let outer = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Outer"));
    let inner = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Inner"));

    assert!(type_uses_forwarding(&ctx, outer));
    let exprs = resolve_forwarding_exprs(&ctx, outer);
    assert_eq!(exprs.num_forwards(), 1);
    assert_eq!(exprs.forwarding_to_type(0).type_id(), inner);
}

#[test]
fn test_is_name_of_field_through_parent() {
    let ctx = context_for(vec![
        Decl::Class {
            name: "Parent".to_string(),
            inherits: vec![],
            children: vec![var("base", Some(ident("int")), None)],
        },
        Decl::Class {
            name: "Child".to_string(),
            inherits: vec![ident("Parent")],
            children: vec![var("extra", Some(ident("int")), None)],
        },
    ]);
    let child = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Child"));
    let parent = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Parent"));
    let parent_ct = ctx.types.get_composite_type(parent).unwrap();

    let own = is_name_of_field(&ctx, ctx.name("extra"), child);
    assert_eq!(own, ctx.types.get_composite_type(child));

    let inherited = is_name_of_field(&ctx, ctx.name("base"), child);
    assert_eq!(inherited, Some(parent_ct));

    assert_eq!(is_name_of_field(&ctx, ctx.name("nope"), child), None);
}

#[test]
fn test_default_initializable() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "C".to_string(),
            children: vec![var("x", Some(ident("int")), None)],
        },
        Decl::Record {
            name: "G".to_string(),
            children: vec![type_var_no_init("t")],
        },
        Decl::Record {
            name: "D".to_string(),
            children: vec![type_var("t", ident("int"))],
        },
    ]);
    let c = initial_type_for_type_decl(&ctx, decl_id(&ctx, "C"));
    let g = initial_type_for_type_decl(&ctx, decl_id(&ctx, "G"));
    let d = initial_type_for_type_decl(&ctx, decl_id(&ctx, "D"));

    assert!(is_type_default_initializable(&ctx, c));
    assert!(!is_type_default_initializable(&ctx, g));
    assert!(is_type_default_initializable(&ctx, d));
    assert!(is_type_default_initializable(&ctx, ctx.types.int_type(64)));
}

#[test]
fn test_instantiated_fields_use_substitutions() {
    let ctx = context_for(vec![Decl::Record {
        name: "R".to_string(),
        children: vec![
            type_var_no_init("t"),
            var("x", Some(ident("t")), None),
        ],
    }]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));

    let mut subs = crate::types::SubstitutionsMap::new();
    subs.insert(
        decl_id(&ctx, "R.t"),
        QualifiedType::type_(ctx.types.int_type(64)),
    );
    let inst = instantiated_composite(&ctx, r, subs);
    assert_ne!(inst, r);

    let fields = fields_for_type_decl(&ctx, inst, DefaultsPolicy::UseDefaults);
    assert_eq!(fields.field(0).qt.qualifier(), Qualifier::Type);
    assert_eq!(fields.field(0).qt.type_id(), ctx.types.int_type(64));
    // `x: t` resolves through the substituted sibling
    assert_eq!(fields.field(1).qt.type_id(), ctx.types.int_type(64));
    assert!(!fields.is_generic());
}
