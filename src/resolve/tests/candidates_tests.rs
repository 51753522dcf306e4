use super::*;
use crate::ast::build::*;
use crate::ast::FormalIntent;
use crate::resolve::call::resolve_call;
use crate::resolve::functions::initial_type_for_type_decl;
use crate::resolve::sig::WhereClauseResult;
use crate::resolve::{CallInfo, CallInfoActual, CandidateFailureReason};
use crate::scope::ScopeId;
use crate::test_fixtures::*;
use crate::types::{ParamValue, QualifiedType, Qualifier};

fn module_scope(ctx: &crate::context::Context) -> ScopeId {
    ctx.scopes().scope_for_symbol(module_id(ctx)).unwrap()
}

fn method_call(
    ctx: &crate::context::Context,
    name: &str,
    receiver: QualifiedType,
    rest: Vec<QualifiedType>,
) -> CallInfo {
    let mut actuals = vec![CallInfoActual::named(receiver, ctx.name("this"))];
    actuals.extend(rest.into_iter().map(CallInfoActual::new));
    CallInfo {
        name: ctx.name(name),
        called_type: receiver,
        is_method_call: true,
        is_op_call: false,
        has_question_arg: false,
        is_parenless: false,
        actuals,
    }
}

#[test]
fn test_gather_finds_overloads() {
    let ctx = context_for(vec![
        Decl::Fn(FnSpec::proc("f").formal(FormalSpec::new(
            "x",
            FormalIntent::Default,
            Some(ident("int")),
        ))),
        Decl::Fn(FnSpec::proc("f").formal(FormalSpec::new(
            "x",
            FormalIntent::Default,
            Some(ident("string")),
        ))),
    ]);
    let ci = CallInfo::new(
        ctx.name("f"),
        vec![CallInfoActual::new(QualifiedType::new(
            Qualifier::ConstVar,
            crate::types::TypeId::STRING,
        ))],
    );
    let gathered = gather_and_filter_candidates(&ctx, None, &ci, module_scope(&ctx), None, None);
    // only the string overload survives the initial filter
    assert_eq!(gathered.candidates.len(), 1);
    let untyped = ctx
        .sigs
        .untyped(ctx.sigs.typed(gathered.candidates[0]).untyped);
    assert_eq!(untyped.id, fn_decls(&ctx, "f")[1]);
}

#[test]
fn test_where_false_candidate_never_selected() {
    let ctx = context_for(vec![Decl::Fn(
        FnSpec::proc("g")
            .formal(FormalSpec::new("x", FormalIntent::Default, Some(type_query("T"))))
            .where_(call(ident("isIntegral"), vec![ident("T")])),
    )]);
    let ci = CallInfo::new(
        ctx.name("g"),
        vec![CallInfoActual::new(QualifiedType::new(
            Qualifier::ConstVar,
            ctx.types.real_type(64),
        ))],
    );
    let mut rejected = Vec::new();
    let gathered = gather_and_filter_candidates(
        &ctx,
        None,
        &ci,
        module_scope(&ctx),
        None,
        Some(&mut rejected),
    );
    assert!(gathered.candidates.is_empty());
    assert!(rejected
        .iter()
        .any(|r| r.reason == Some(CandidateFailureReason::WhereClauseFalse)));
}

#[test]
fn test_rejections_carry_failing_formal() {
    let ctx = context_for(vec![Decl::Fn(
        FnSpec::proc("f")
            .formal(FormalSpec::new("a", FormalIntent::Default, Some(ident("int"))))
            .formal(FormalSpec::new("b", FormalIntent::Default, Some(ident("string")))),
    )]);
    let int64 = ctx.types.int_type(64);
    let ci = CallInfo::new(
        ctx.name("f"),
        vec![
            CallInfoActual::new(QualifiedType::var(int64)),
            CallInfoActual::new(QualifiedType::var(int64)),
        ],
    );
    let mut rejected = Vec::new();
    let gathered = gather_and_filter_candidates(
        &ctx,
        None,
        &ci,
        module_scope(&ctx),
        None,
        Some(&mut rejected),
    );
    assert!(gathered.candidates.is_empty());
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].reason, Some(CandidateFailureReason::TypeMismatch));
    assert_eq!(rejected[0].formal_idx, Some(1));
}

#[test]
fn test_field_accessor_candidate() {
    let ctx = context_for(vec![Decl::Record {
        name: "R".to_string(),
        children: vec![var("x", Some(ident("int")), None)],
    }]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));

    let mut ci = method_call(&ctx, "x", QualifiedType::var(r), vec![]);
    ci.is_parenless = true;
    let gathered = gather_and_filter_candidates(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert_eq!(gathered.candidates.len(), 1);
    let untyped = ctx
        .sigs
        .untyped(ctx.sigs.typed(gathered.candidates[0]).untyped);
    assert!(untyped.is_compiler_generated);
    assert!(untyped.is_method);
}

#[test]
fn test_parenless_call_rejects_paren_routine() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "R".to_string(),
            children: vec![],
        },
        // a regular method, not paren-less
        Decl::Fn(FnSpec::method("m", ident("R"))),
    ]);
    let r = initial_type_for_type_decl(&ctx, decl_id(&ctx, "R"));
    let mut ci = method_call(&ctx, "m", QualifiedType::var(r), vec![]);
    ci.is_parenless = true;
    let mut rejected = Vec::new();
    let gathered = gather_and_filter_candidates(
        &ctx,
        None,
        &ci,
        module_scope(&ctx),
        None,
        Some(&mut rejected),
    );
    assert!(gathered.candidates.is_empty());
    assert!(rejected
        .iter()
        .any(|r| r.reason == Some(CandidateFailureReason::ParenlessMismatch)));
}

#[test]
fn test_forwarding_gathers_target_methods() {
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
        Decl::Fn(FnSpec::method("m", ident("Inner"))),
    ]);
    let outer = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Outer"));
    let inner = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Inner"));

    let ci = method_call(&ctx, "m", QualifiedType::var(outer), vec![]);
    let result = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert!(result.most_specific.found_candidates());

    let candidate = result.most_specific.only().unwrap();
    let untyped = ctx.sigs.untyped(ctx.sigs.typed(candidate.sig).untyped);
    assert_eq!(untyped.id, decl_id(&ctx, "m"));
    // the call site must coerce the receiver to the forwarded-to type
    assert_eq!(candidate.forwarding_to.map(|qt| qt.type_id()), Some(inner));
}

#[test]
fn test_forwarding_skipped_for_initializers() {
    let ctx = context_for(vec![
        Decl::Record {
            name: "Inner".to_string(),
            children: vec![],
        },
        Decl::Record {
            name: "Outer".to_string(),
            children: vec![
                var("impl", Some(ident("Inner")), None),
                Decl::Forwarding { expr: ident("impl") },
            ],
        },
        Decl::Fn(FnSpec::method("init", ident("Inner"))),
    ]);
    let outer = initial_type_for_type_decl(&ctx, decl_id(&ctx, "Outer"));
    let ci = method_call(&ctx, "init", QualifiedType::var(outer), vec![]);
    let gathered = gather_and_filter_candidates(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert!(gathered.candidates.is_empty());
}

#[test]
fn test_poi_lookup_finds_call_site_symbols() {
    // a method visible only from the point of instantiation is found when
    // the POI chain is searched after the lexical scope comes up empty
    use crate::ast::{AstId, Program};
    use crate::context::Context;
    use crate::interner::StringInterner;

    let strings = StringInterner::new();
    let mut program = Program::new();
    {
        let mut lowering = crate::ast::build::Lowering::new(&strings, &mut program);
        lowering.module(
            "A",
            vec![Decl::Record {
                name: "R".to_string(),
                children: vec![],
            }],
        );
        lowering.module("B", vec![Decl::Fn(FnSpec::method("helper", ident("R")))]);
    }
    let ctx = Context::new(program, strings);

    let r = initial_type_for_type_decl(&ctx, AstId::new(ctx.name("A.R"), -1));
    let scope_a = ctx
        .scopes()
        .scope_for_symbol(AstId::new(ctx.name("A"), -1))
        .unwrap();
    let scope_b = ctx
        .scopes()
        .scope_for_symbol(AstId::new(ctx.name("B"), -1))
        .unwrap();
    let poi = point_of_instantiation_scope(&ctx, scope_b, None);

    let ci = method_call(&ctx, "helper", QualifiedType::var(r), vec![]);
    let gathered = gather_and_filter_candidates(&ctx, None, &ci, scope_a, Some(poi), None);
    assert_eq!(gathered.candidates.len(), 1);
    assert_eq!(gathered.first_poi_candidate, 0, "the candidate came from POI");
}

#[test]
fn test_tuple_size_compiler_generated() {
    let ctx = context_for(vec![]);
    let int64 = ctx.types.int_type(64);
    let tuple = ctx.types.referential_tuple(vec![int64, int64]);

    let mut ci = method_call(
        &ctx,
        "size",
        QualifiedType::new(Qualifier::ConstVar, tuple),
        vec![],
    );
    ci.is_parenless = true;
    let result = resolve_call(&ctx, None, &ci, module_scope(&ctx), None, None);
    assert!(result.most_specific.found_candidates());
    assert_eq!(result.expr_type.param(), Some(ParamValue::Int(2)));
}

#[test]
fn test_where_result_recorded_on_initial_signature() {
    // a concrete function with a satisfied where clause records it at
    // signature-construction time
    let ctx = context_for(vec![Decl::Fn(
        FnSpec::proc("f")
            .formal(FormalSpec::new("x", FormalIntent::Default, Some(ident("int"))))
            .where_(op("==", vec![ident("int"), ident("int")])),
    )]);
    let ufs =
        crate::resolve::sig::untyped_signature_for_function(&ctx, decl_id(&ctx, "f")).unwrap();
    let sig = crate::resolve::sig::typed_signature_initial(&ctx, ufs).unwrap();
    assert_eq!(
        ctx.sigs.typed(sig).where_clause_result,
        WhereClauseResult::True
    );
}
