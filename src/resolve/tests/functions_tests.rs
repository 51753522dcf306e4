use super::*;
use crate::ast::build::*;
use crate::ast::FormalIntent;
use crate::resolve::call::resolve_call;
use crate::resolve::sig::typed_signature_initial;
use crate::resolve::{CallInfo, CallInfoActual};
use crate::scope::ScopeId;
use crate::test_fixtures::*;
use crate::types::{ParamValue, QualifiedType, Qualifier};

fn module_scope(ctx: &crate::context::Context) -> ScopeId {
    ctx.scopes().scope_for_symbol(module_id(ctx)).unwrap()
}

#[test]
fn test_initial_type_for_type_decls() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![],
        },
        Decl::Class {
            name: "C".to_string(),
            inherits: vec![],
            children: vec![],
        },
        Decl::Enum {
            name: "E".to_string(),
            elements: vec!["red".to_string(), "green".to_string()],
        },
    ]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));
    assert!(ctx.types.composite_shape(r).is_some());

    // a class name means the generic-management non-nil class
    let c = initial_type_for_type_decl(&ctx, decl_id(&ctx, "C"));
    let shape = ctx.types.class_shape(c).unwrap();
    assert_eq!(shape.decorator, crate::types::ClassDecorator::generic_nonnil());

    let e = initial_type_for_type_decl(&ctx, decl_id(&ctx, "E"));
    assert!(ctx.types.enum_shape(e).is_some());
}

#[test]
fn test_multiple_inheritance_reported() {
    let ctx = context_for(vec![
        Decl::Class {
            name: "A".to_string(),
            inherits: vec![],
            children: vec![],
        },
        Decl::Class {
            name: "B".to_string(),
            inherits: vec![],
            children: vec![],
        },
        Decl::Class {
            name: "C".to_string(),
            inherits: vec![ident("A"), ident("B")],
            children: vec![],
        },
    ]);
    let _ = initial_type_for_type_decl(&ctx, decl_id(&ctx, "C"));
    assert!(ctx
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("multiple inheritance")));
}

#[test]
fn test_resolve_module_is_memoized() {
    let ctx = context_for(vec![var("x", Some(ident("int")), None)]);
    let module = module_id(&ctx);
    let a = resolve_module(&ctx, module);
    let b = resolve_module(&ctx, module);
    assert!(std::sync::Arc::ptr_eq(&a, &b));

    // a revision bump logically invalidates the cache
    ctx.advance_revision();
    let c = resolve_module(&ctx, module);
    assert!(!std::sync::Arc::ptr_eq(&a, &c));
}

#[test]
fn test_module_results_cover_statement_children() {
    let ctx = context_for(vec![var(
        "x",
        None,
        Some(call(ident("int"), vec![int(8)])),
    )]);
    let module = module_id(&ctx);
    let resolved = resolve_module(&ctx, module);

    // the variable, the call, and the literal all have results
    let var_id = decl_id(&ctx, "x");
    assert!(resolved.by_id_or_null(var_id).is_some());
    let call_id = find_call(&ctx, "", "int");
    let re = resolved.by_id_or_null(call_id).unwrap();
    assert_eq!(re.type_().type_id(), ctx.types.int_type(8));
}

#[test]
fn test_type_for_module_level_symbol() {
    let ctx = context_for(vec![
        param_var("n", None, Some(int(3))),
        Decl::Record {
            name: "R".to_string(),
            children: vec![],
        },
        Decl::Fn(FnSpec::proc("f")),
    ]);
    let n = type_for_module_level_symbol(&ctx, decl_id(&ctx, "n"));
    assert!(n.is_param());
    assert_eq!(n.param(), Some(ParamValue::Int(3)));

    let r = type_for_module_level_symbol(&ctx, decl_id(&ctx, "R"));
    assert!(r.is_type());

    let f = type_for_module_level_symbol(&ctx, decl_id(&ctx, "f"));
    assert_eq!(f.qualifier(), Qualifier::Function);

    let m = type_for_module_level_symbol(&ctx, module_id(&ctx));
    assert_eq!(m.qualifier(), Qualifier::Module);
}

#[test]
fn test_scope_resolution_records_referents() {
    let ctx = context_for(vec![
        var("a", Some(ident("int")), None),
        var("b", None, Some(ident("a"))),
    ]);
    let module = module_id(&ctx);
    let resolved = scope_resolve_module(&ctx, module);

    // find the identifier expression referring to `a`
    let a_decl = decl_id(&ctx, "a");
    let b_decl = decl_id(&ctx, "b");
    let init = ctx
        .program()
        .id_to_ast(b_decl)
        .and_then(|n| n.as_variable())
        .and_then(|v| v.init_expr)
        .unwrap();
    let re = resolved.by_id_or_null(init).unwrap();
    assert_eq!(re.to_id(), a_decl);
    // scope resolution computes no types
    assert!(re.type_().is_unknown());
}

#[test]
fn test_poi_idempotence_for_generic_calls() {
    // resolving the same generic call twice under equal POI scopes
    // reuses the same instantiated signature and body resolution
    let ctx = context_for(vec![Decl::Fn(FnSpec::proc("g").formal(FormalSpec::new(
        "x",
        FormalIntent::Default,
        Some(type_query("T")),
    )))]);
    let ci = CallInfo::new(
        ctx.name("g"),
        vec![CallInfoActual::new(QualifiedType::var(ctx.types.int_type(64)))],
    );
    let a = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    let b = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    let sig_a = a.most_specific.only().unwrap().sig;
    let sig_b = b.most_specific.only().unwrap().sig;
    assert_eq!(sig_a, sig_b);

    let poi = a.poi_info.poi_scope();
    let ra = resolve_function(&ctx, sig_a, poi).unwrap();
    let rb = resolve_function(&ctx, sig_b, poi).unwrap();
    assert!(std::sync::Arc::ptr_eq(&ra, &rb));
}

#[test]
fn test_initializer_finalizes_receiver() {
    // the initializer's body determines the fully-instantiated receiver
    let ctx = context_for(vec![
        Decl::Record {
            name: "P".to_string(),
            children: vec![Decl::Var {
                name: "t".to_string(),
                storage: crate::ast::VarStorage::Type,
                type_expr: None,
                init_expr: None,
            }],
        },
        Decl::Fn(
            FnSpec::method("init", ident("P"))
                .formal(FormalSpec::new("v", FormalIntent::Default, Some(type_query("T"))))
                .body_stmt(op("=", vec![dot(ident("this"), "t"), ident("v")])),
        ),
    ]);
    let p = initial_type_for_type_decl(&ctx, decl_id(&ctx, "P"));

    let ci = CallInfo {
        name: ctx.name("init"),
        called_type: QualifiedType::var(p),
        is_method_call: true,
        is_op_call: false,
        has_question_arg: false,
        is_parenless: false,
        actuals: vec![
            CallInfoActual::named(QualifiedType::var(p), ctx.name("this")),
            CallInfoActual::new(QualifiedType::param_(
                ctx.types.int_type(64),
                ParamValue::Int(3),
            )),
        ],
    };
    let result = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert!(result.most_specific.found_candidates());

    let sig = result.most_specific.only().unwrap().sig;
    let typed = ctx.sigs.typed(sig);
    assert!(!typed.needs_instantiation);

    let receiver = typed.formal_type(0);
    let shape = ctx.types.composite_shape(receiver.type_id()).unwrap();
    assert!(shape.instantiated_from.is_some());
    assert_eq!(
        shape.substitutions.get(decl_id(&ctx, "P.t")).map(|s| s.type_id()),
        Some(ctx.types.int_type(64))
    );
}

#[test]
fn test_infer_ref_maybe_const_formals() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![var("x", Some(ident("int")), None)],
        },
        Decl::Fn(
            FnSpec::method("touch", ident("R"))
                .body_stmt(op("=", vec![dot(ident("this"), "x"), int(1)])),
        ),
        Decl::Fn(FnSpec::method("peek", ident("R"))),
    ]);

    let touch = typed_signature_initial(
        &ctx,
        crate::resolve::sig::untyped_signature_for_function(&ctx, decl_id(&ctx, "touch")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        ctx.sigs.typed(touch).formal_type(0).qualifier(),
        Qualifier::RefMaybeConst
    );

    let inferred = infer_ref_maybe_const_formals(&ctx, touch, None).unwrap();
    assert_ne!(inferred, touch);
    assert_eq!(
        ctx.sigs.typed(inferred).formal_type(0).qualifier(),
        Qualifier::Ref,
        "a mutated receiver is ref"
    );
    assert_eq!(ctx.sigs.typed(inferred).inferred_from, Some(touch));

    let peek = typed_signature_initial(
        &ctx,
        crate::resolve::sig::untyped_signature_for_function(&ctx, decl_id(&ctx, "peek")).unwrap(),
    )
    .unwrap();
    let inferred = infer_ref_maybe_const_formals(&ctx, peek, None).unwrap();
    assert_eq!(
        ctx.sigs.typed(inferred).formal_type(0).qualifier(),
        Qualifier::ConstRef,
        "an untouched receiver is const ref"
    );
}

#[test]
fn test_resolve_concrete_function() {
    let ctx = context_for(vec![
        Decl::Fn(
            FnSpec::proc("f")
                .formal(FormalSpec::new("x", FormalIntent::Default, Some(ident("int"))))
                .returns(ident("int")),
        ),
        Decl::Fn(FnSpec::proc("g").formal(FormalSpec::new(
            "x",
            FormalIntent::Default,
            Some(type_query("T")),
        ))),
    ]);
    let f = resolve_concrete_function(&ctx, decl_id(&ctx, "f"));
    assert!(f.is_some());
    assert_eq!(f.unwrap().return_type.type_id(), ctx.types.int_type(64));

    // generic functions cannot be resolved without instantiation
    assert!(resolve_concrete_function(&ctx, decl_id(&ctx, "g")).is_none());
}

#[test]
fn test_recursive_generic_call_is_bounded() {
    // g calls itself with its own argument; POI accumulation must track
    // the recursion instead of diverging
    let ctx = context_for(vec![Decl::Fn(
        FnSpec::proc("g")
            .formal(FormalSpec::new("x", FormalIntent::Default, Some(type_query("T"))))
            .body_stmt(call(ident("g"), vec![ident("x")])),
    )]);
    let ci = CallInfo::new(
        ctx.name("g"),
        vec![CallInfoActual::new(QualifiedType::var(ctx.types.int_type(64)))],
    );
    let result = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert!(result.most_specific.found_candidates());
}
