//! Shared helpers for resolution tests.
//!
//! Builds small programs through `ast::build` and exposes lookups over
//! the lowered ids so tests can address calls and declarations without
//! tracking post-order numbering by hand.

use crate::ast::build::{Decl, Lowering};
use crate::ast::{AstId, AstKind, AstTag, Program};
use crate::context::Context;
use crate::interner::StringInterner;
use crate::resolve::functions::resolve_module;
use crate::types::QualifiedType;

pub const TEST_MODULE: &str = "M";

/// Lower `decls` as a module named `M` and build a context over it.
pub fn context_for(decls: Vec<Decl>) -> Context {
    let strings = StringInterner::new();
    let mut program = Program::new();
    let mut lowering = Lowering::new(&strings, &mut program);
    lowering.module(TEST_MODULE, decls);
    Context::new(program, strings)
}

pub fn module_id(ctx: &Context) -> AstId {
    AstId::new(ctx.name(TEST_MODULE), -1)
}

/// Id of the declaration named `path` ("R" for `M.R`, "R.x" for a field).
pub fn decl_id(ctx: &Context, path: &str) -> AstId {
    let full = format!("{TEST_MODULE}.{path}");
    let symbol_atom = ctx.name(&full);
    if ctx.program().id_to_ast(AstId::new(symbol_atom, -1)).is_some() {
        return AstId::new(symbol_atom, -1);
    }
    // otherwise a non-symbol declaration: look it up by name within the
    // enclosing symbol
    let (parent, name) = match path.rsplit_once('.') {
        Some((parent, name)) => (format!("{TEST_MODULE}.{parent}"), name.to_string()),
        None => (TEST_MODULE.to_string(), path.to_string()),
    };
    let parent_atom = ctx.name(&parent);
    let name_atom = ctx.name(&name);
    ctx.program()
        .node_ids()
        .filter(|id| id.symbol == parent_atom && id.post_order >= 0)
        .find(|id| {
            ctx.program()
                .id_to_ast(*id)
                .and_then(|n| n.decl_name())
                == Some(name_atom)
        })
        .expect("declaration not found")
}

/// The first call expression in `symbol` whose callee is the identifier
/// `name` (or whose operator is `name`).
pub fn find_call(ctx: &Context, symbol: &str, name: &str) -> AstId {
    *find_calls(ctx, symbol, name)
        .first()
        .expect("call not found")
}

/// All call expressions in `symbol` calling `name`, in source order.
pub fn find_calls(ctx: &Context, symbol: &str, name: &str) -> Vec<AstId> {
    let symbol_atom = if symbol.is_empty() {
        ctx.name(TEST_MODULE)
    } else {
        ctx.name(&format!("{TEST_MODULE}.{symbol}"))
    };
    let name_atom = ctx.name(name);
    let mut found: Vec<AstId> = ctx
        .program()
        .node_ids()
        .filter(|id| id.symbol == symbol_atom)
        .filter(|id| {
            let Some(node) = ctx.program().id_to_ast(*id) else {
                return false;
            };
            match &node.kind {
                AstKind::Call(c) => matches!(
                    ctx.program().id_to_ast(c.callee).map(|n| &n.kind),
                    Some(AstKind::Identifier { name }) if *name == name_atom
                ),
                AstKind::OpCall(c) => c.op_name == name_atom,
                _ => false,
            }
        })
        .collect();
    found.sort();
    found
}

/// Resolve the module and return the type of the module-level variable
/// named `name`.
pub fn resolved_var_type(ctx: &Context, name: &str) -> QualifiedType {
    let module = module_id(ctx);
    let resolved = resolve_module(ctx, module);
    let var = decl_id(ctx, name);
    resolved
        .by_id_or_null(var)
        .map(|re| re.type_())
        .unwrap_or_default()
}

/// All function declarations named `name` in the test module.
pub fn fn_decls(ctx: &Context, name: &str) -> Vec<AstId> {
    let name_atom = ctx.name(name);
    let mut out: Vec<AstId> = ctx
        .program()
        .node_ids()
        .filter(|id| {
            id.is_symbol_defining()
                && ctx.program().id_to_tag(*id) == Some(AstTag::Function)
                && ctx
                    .program()
                    .id_to_ast(*id)
                    .and_then(|n| n.decl_name())
                    == Some(name_atom)
        })
        .collect();
    out.sort();
    out
}
