use super::*;
use crate::ast::build::*;
use crate::ast::{AstKind, FormalIntent};
use crate::resolve::functions::initial_type_for_type_decl;
use crate::resolve::{CallInfo, CallInfoActual};
use crate::scope::ScopeId;
use crate::test_fixtures::*;
use crate::types::{AnyBoundKind, Management, Nilability, QualifiedType as Qt, Qualifier};

fn module_scope(ctx: &crate::context::Context) -> ScopeId {
    ctx.scopes().scope_for_symbol(module_id(ctx)).unwrap()
}

// =============================================================================
// Built-in type constructors
// =============================================================================

#[test]
fn test_primitive_type_constructor() {
    // type T = int(32);
    let ctx = context_for(vec![type_var("T", call(ident("int"), vec![int(32)]))]);
    let qt = resolved_var_type(&ctx, "T");
    assert!(qt.is_type());
    assert_eq!(qt.type_id(), ctx.types.int_type(32));
    assert_eq!(ctx.error_count(), 0);
}

#[test]
fn test_numeric_generic_bound() {
    // type G = int(?);
    let ctx = context_for(vec![type_var("G", call_q(ident("int")))]);
    let qt = resolved_var_type(&ctx, "G");
    assert!(qt.is_type());
    assert_eq!(qt.type_id(), ctx.types.any_bound(AnyBoundKind::Int));
}

#[test]
fn test_invalid_numeric_width() {
    let ctx = context_for(vec![type_var("T", call(ident("int"), vec![int(37)]))]);
    let qt = resolved_var_type(&ctx, "T");
    assert!(qt.is_erroneous());
    assert_eq!(ctx.error_count(), 1);
}

#[test]
fn test_managed_class_constructor() {
    let ctx = context_for(vec![
        Decl::Class {
            name: "C".to_string(),
            inherits: vec![],
            children: vec![],
        },
        type_var("T", call(ident("owned"), vec![ident("C")])),
    ]);
    let qt = resolved_var_type(&ctx, "T");
    assert!(qt.is_type());
    let shape = ctx.types.class_shape(qt.type_id()).unwrap();
    assert_eq!(shape.decorator.management, Management::Managed);
    assert_eq!(shape.decorator.nilability, Nilability::NonNil);
    assert_eq!(shape.manager, Some(ctx.types.any_bound(AnyBoundKind::Owned)));
}

#[test]
fn test_c_ptr_constructor() {
    let ctx = context_for(vec![
        type_var("P", call(ident("c_ptr"), vec![ident("int")])),
        type_var("G", call_q(ident("c_ptr"))),
    ]);
    assert_eq!(
        resolved_var_type(&ctx, "P").type_id(),
        ctx.types.c_ptr_type(Some(ctx.types.int_type(64)))
    );
    assert_eq!(
        resolved_var_type(&ctx, "G").type_id(),
        ctx.types.c_ptr_type(None)
    );
}

#[test]
fn test_star_tuple_constructor() {
    // type T = 3 * int;
    let ctx = context_for(vec![type_var("T", op("*", vec![int(3), ident("int")]))]);
    let qt = resolved_var_type(&ctx, "T");
    assert!(qt.is_type());
    let shape = ctx.types.tuple_shape(qt.type_id()).unwrap();
    assert_eq!(shape.num_elements(), 3);
    assert_eq!(shape.star.map(|s| s.type_id()), Some(ctx.types.int_type(64)));
}

// =============================================================================
// Folded special forms
// =============================================================================

#[test]
fn test_type_and_param_comparisons_fold() {
    let ctx = context_for(vec![
        param_var("a", None, Some(op("==", vec![ident("int"), ident("int")]))),
        param_var("b", None, Some(op("!=", vec![ident("int"), ident("real")]))),
        param_var("c", None, Some(op("!", vec![Expr::Bool(true)]))),
        param_var("d", None, Some(call(ident("isCoercible"), vec![ident("int"), ident("real")]))),
    ]);
    assert!(resolved_var_type(&ctx, "a").is_param_true());
    assert!(resolved_var_type(&ctx, "b").is_param_true());
    assert!(resolved_var_type(&ctx, "c").is_param_false());
    assert!(resolved_var_type(&ctx, "d").is_param_true());
}

// =============================================================================
// Overload selection
// =============================================================================

#[test]
fn test_param_overload_preferred_for_param_actual() {
    let ctx = context_for(vec![
        Decl::Fn(FnSpec::proc("f").formal(FormalSpec::new(
            "x",
            FormalIntent::Param,
            Some(ident("int")),
        ))),
        Decl::Fn(FnSpec::proc("f").formal(FormalSpec::new(
            "x",
            FormalIntent::Default,
            Some(ident("int")),
        ))),
        var("a", Some(ident("int")), None),
        var("r1", None, Some(call(ident("f"), vec![int(3)]))),
        var("r2", None, Some(call(ident("f"), vec![ident("a")]))),
    ]);
    let module = module_id(&ctx);
    let resolved = crate::resolve::functions::resolve_module(&ctx, module);
    let fns = fn_decls(&ctx, "f");
    let calls = find_calls(&ctx, "", "f");
    assert_eq!(calls.len(), 2);

    // f(3) selects the param overload
    let first = resolved.by_id_or_null(calls[0]).unwrap();
    let sig = first.most_specific().only().unwrap().sig;
    assert_eq!(ctx.sigs.untyped(ctx.sigs.typed(sig).untyped).id, fns[0]);

    // f(a) with a non-param actual selects the non-param overload
    let second = resolved.by_id_or_null(calls[1]).unwrap();
    let sig = second.most_specific().only().unwrap().sig;
    assert_eq!(ctx.sigs.untyped(ctx.sigs.typed(sig).untyped).id, fns[1]);
}

#[test]
fn test_generic_call_with_where_clause() {
    let ctx = context_for(vec![
        Decl::Fn(
            FnSpec::proc("g")
                .formal(FormalSpec::new("x", FormalIntent::Default, Some(type_query("T"))))
                .where_(call(ident("isIntegral"), vec![ident("T")])),
        ),
        var("ok", None, Some(call(ident("g"), vec![int(1)]))),
    ]);
    let module = module_id(&ctx);
    let resolved = crate::resolve::functions::resolve_module(&ctx, module);
    let call_id = find_call(&ctx, "", "g");

    let re = resolved.by_id_or_null(call_id).unwrap();
    assert!(re.most_specific().found_candidates());
    let sig = re.most_specific().only().unwrap().sig;
    let typed = ctx.sigs.typed(sig);
    assert_eq!(typed.formal_type(0).type_id(), ctx.types.int_type(64));
    assert!(typed.instantiated_from.is_some());
}

// =============================================================================
// Tuple expressions
// =============================================================================

#[test]
fn test_value_tuple_expression() {
    let ctx = context_for(vec![var(
        "t",
        None,
        Some(Expr::Tuple(vec![int(1), int(2), int(3)])),
    )]);
    let qt = resolved_var_type(&ctx, "t");
    assert_eq!(qt.qualifier(), Qualifier::ConstVar);
    let shape = ctx.types.tuple_shape(qt.type_id()).unwrap();
    assert!(shape.referential);
    assert_eq!(shape.num_elements(), 3);
    assert_eq!(
        shape.element(0).map(|e| e.type_id()),
        Some(ctx.types.int_type(64))
    );
}

#[test]
fn test_type_tuple_expression() {
    let ctx = context_for(vec![type_var(
        "T",
        Expr::Tuple(vec![ident("int"), ident("real")]),
    )]);
    let qt = resolved_var_type(&ctx, "T");
    assert!(qt.is_type());
    let shape = ctx.types.tuple_shape(qt.type_id()).unwrap();
    assert!(!shape.referential);
    assert_eq!(shape.num_elements(), 2);
}

#[test]
fn test_mixed_tuple_expression_is_an_error() {
    let ctx = context_for(vec![var(
        "t",
        None,
        Some(Expr::Tuple(vec![int(1), ident("int")])),
    )]);
    let qt = resolved_var_type(&ctx, "t");
    assert!(qt.is_erroneous());
    assert_eq!(ctx.error_count(), 1);
    let messages: Vec<String> = ctx.diagnostics().iter().map(|d| d.message.clone()).collect();
    assert!(messages[0].contains("mix of value and type"));
}

// =============================================================================
// new expressions and postfix ?
// =============================================================================

#[test]
fn test_new_class_defaults_to_owned() {
    let ctx = context_for(vec![
        Decl::Class {
            name: "C".to_string(),
            inherits: vec![],
            children: vec![],
        },
        var("c", None, Some(Expr::Call {
            callee: Box::new(Expr::New(Box::new(ident("C")))),
            actuals: vec![],
            has_question_arg: false,
        })),
    ]);
    let qt = resolved_var_type(&ctx, "c");
    let shape = ctx.types.class_shape(qt.type_id()).unwrap();
    assert_eq!(shape.decorator.management, Management::Managed);
    assert_eq!(shape.decorator.nilability, Nilability::NonNil);
    assert_eq!(shape.manager, Some(ctx.types.any_bound(AnyBoundKind::Owned)));
}

#[test]
fn test_postfix_nilable_on_new_record_keeps_type() {
    // records have no nilable version; `new R()?` resolves to R itself
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![var("x", Some(ident("int")), None)],
        },
        var(
            "r",
            None,
            Some(op(
                "?",
                vec![Expr::Call {
                    callee: Box::new(Expr::New(Box::new(ident("R")))),
                    actuals: vec![],
                    has_question_arg: false,
                }],
            )),
        ),
    ]);
    let qt = resolved_var_type(&ctx, "r");
    assert_eq!(qt.type_id(), initial_type_for_type_decl(&ctx, decl_id(&ctx, "R")));
    assert_eq!(ctx.error_count(), 0);
}

#[test]
fn test_postfix_nilable_applied_to_new() {
    let ctx = context_for(vec![
        Decl::Class {
            name: "C".to_string(),
            inherits: vec![],
            children: vec![],
        },
        var(
            "c",
            None,
            Some(op(
                "?",
                vec![Expr::Call {
                    callee: Box::new(Expr::New(Box::new(ident("C")))),
                    actuals: vec![],
                    has_question_arg: false,
                }],
            )),
        ),
    ]);
    let qt = resolved_var_type(&ctx, "c");
    let shape = ctx.types.class_shape(qt.type_id()).unwrap();
    assert_eq!(shape.decorator.nilability, Nilability::Nilable);
    assert_eq!(shape.decorator.management, Management::Managed);
}

// =============================================================================
// Type-constructor calls on composites
// =============================================================================

#[test]
fn test_generic_record_type_constructor() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![
                Decl::Var {
                    name: "t".to_string(),
                    storage: crate::ast::VarStorage::Type,
                    type_expr: None,
                    init_expr: None,
                },
                var("x", Some(ident("t")), None),
            ],
        },
        type_var("T", call(ident("R"), vec![ident("int")])),
    ]);
    let qt = resolved_var_type(&ctx, "T");
    assert!(qt.is_type());
    let shape = ctx.types.composite_shape(qt.type_id()).unwrap();
    assert!(shape.instantiated_from.is_some());
    assert_eq!(
        shape.substitutions.get(decl_id(&ctx, "R.t")).map(|s| s.type_id()),
        Some(ctx.types.int_type(64))
    );
    assert_eq!(
        crate::resolve::genericity::get_type_genericity(&ctx, qt.type_id()),
        crate::types::Genericity::Concrete
    );
}

#[test]
fn test_partial_instantiation_with_question_arg() {
    // `R(?)` leaves the type constructor's formals generic
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![Decl::Var {
                name: "t".to_string(),
                storage: crate::ast::VarStorage::Type,
                type_expr: None,
                init_expr: None,
            }],
        },
        type_var("P", call_q(ident("R"))),
    ]);
    let qt = resolved_var_type(&ctx, "P");
    assert!(qt.is_type());
    assert_eq!(qt.type_id(), initial_type_for_type_decl(&ctx, decl_id(&ctx, "R")));
    assert_eq!(ctx.error_count(), 0);
}

#[test]
fn test_domain_call_rewrites_to_static_type() {
    let ctx = context_for(vec![
        Decl::Fn(
            FnSpec::type_method("static_type", ident("_domain"))
                .formal(FormalSpec::new("rank", FormalIntent::Param, Some(ident("int")))),
        ),
        type_var("D", call(ident("domain"), vec![int(2)])),
    ]);
    let module = module_id(&ctx);
    let _ = crate::resolve::functions::resolve_module(&ctx, module);
    let call_id = find_call(&ctx, "", "domain");
    let resolved = crate::resolve::functions::resolve_module_stmt(
        &ctx,
        crate::resolve::resolver::module_stmt_containing(&ctx, call_id),
    );
    let re = resolved.by_id_or_null(call_id).unwrap();
    assert!(re.most_specific().found_candidates());
    let sig = re.most_specific().only().unwrap().sig;
    assert_eq!(
        ctx.sigs.untyped(ctx.sigs.typed(sig).untyped).id,
        decl_id(&ctx, "static_type")
    );
}

#[test]
fn test_atomic_call_rewrites_to_atomic_type() {
    let ctx = context_for(vec![
        Decl::Fn(
            FnSpec::proc("chpl__atomicType")
                .formal(FormalSpec::new("t", FormalIntent::Type, None)),
        ),
        type_var("A", call(ident("atomic"), vec![ident("int")])),
    ]);
    let module = module_id(&ctx);
    let _ = crate::resolve::functions::resolve_module(&ctx, module);
    let call_id = find_call(&ctx, "", "atomic");
    let resolved = crate::resolve::functions::resolve_module_stmt(
        &ctx,
        crate::resolve::resolver::module_stmt_containing(&ctx, call_id),
    );
    let re = resolved.by_id_or_null(call_id).unwrap();
    assert!(re.most_specific().found_candidates());
    let sig = re.most_specific().only().unwrap().sig;
    let typed = ctx.sigs.typed(sig);
    assert_eq!(
        ctx.sigs.untyped(typed.untyped).id,
        decl_id(&ctx, "chpl__atomicType")
    );
    // the rewritten call instantiated the type formal with the operand
    assert_eq!(typed.formal_type(0).type_id(), ctx.types.int_type(64));
}

#[test]
fn test_sync_is_unimplemented() {
    let ctx = context_for(vec![type_var("S", call(ident("sync"), vec![ident("int")]))]);
    let qt = resolved_var_type(&ctx, "S");
    assert!(qt.is_erroneous());
    assert!(ctx
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("unimplemented")));
}

// =============================================================================
// Implicit receivers
// =============================================================================

#[test]
fn test_implicit_receiver_retry() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![var("x", Some(ident("int")), None)],
        },
        Decl::Fn(FnSpec::method("m", ident("R")).returns(ident("int"))),
    ]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));

    // a non-method call to `m` fails alone but resolves once the
    // implicit receiver is applied
    let ci = CallInfo::new(ctx.name("m"), vec![]);
    let without = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert!(!without.most_specific.found_candidates());

    let with = resolve_call_in_method(
        &ctx,
        None,
        &ci,
        module_scope(&ctx),
        None,
        Qt::var(r),
        None,
    );
    assert!(with.most_specific.found_candidates());
    assert_eq!(with.expr_type.type_id(), ctx.types.int_type(64));
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_resolve_call_is_deterministic() {
    let ctx = context_for(vec![Decl::Fn(FnSpec::proc("g").formal(FormalSpec::new(
        "x",
        FormalIntent::Default,
        Some(type_query("T")),
    )))]);
    let ci = CallInfo::new(
        ctx.name("g"),
        vec![CallInfoActual::new(Qt::var(ctx.types.int_type(64)))],
    );
    let a = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    let b = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert_eq!(a.most_specific, b.most_specific);
    assert_eq!(a.expr_type, b.expr_type);
    // the instantiated signature is reused, not re-derived
    assert_eq!(
        a.most_specific.only().unwrap().sig,
        b.most_specific.only().unwrap().sig
    );
}

#[test]
fn test_unknown_callee_reports_error() {
    let ctx = context_for(vec![var("x", None, Some(call(ident("nope"), vec![int(1)])))]);
    let qt = resolved_var_type(&ctx, "x");
    assert!(qt.is_erroneous());
    assert!(ctx.error_count() >= 1);
    // the AST still records a call node for downstream passes
    let call_id = find_call(&ctx, "", "nope");
    assert_eq!(
        ctx.program().id_to_ast(call_id).map(|n| matches!(n.kind, AstKind::Call(_))),
        Some(true)
    );
}
