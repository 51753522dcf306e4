//! Semantic resolution core for the Strand array-parallel language
//! front-end.
//!
//! Given a parsed, symbol-bound AST, this crate assigns every expression
//! a fully-determined qualified type and resolves every call site to the
//! unique callee it refers to, performing overload resolution, generic
//! instantiation, and type-constructor elaboration. All exported
//! operations are queries over a [`context::Context`]: memoized,
//! re-entrance-safe, and invalidated by revision.
//!
//! The crate neither generates code nor executes user programs, and it
//! resolves function bodies only on demand (initializer semantics,
//! ref-maybe-const inference, POI footprint accumulation).

pub mod ast;
pub mod context;
pub mod diagnostics;
pub mod interner;
pub mod query;
pub mod resolve;
pub mod scope;
#[cfg(test)]
pub mod test_fixtures;
pub mod types;

pub use context::Context;
pub use resolve::call::{
    resolve_call, resolve_call_in_method, resolve_generated_call, resolve_generated_call_in_method,
};
pub use resolve::fields::{
    fields_for_type_decl, is_name_of_field, is_type_default_initializable, type_with_defaults,
};
pub use resolve::functions::{
    infer_ref_maybe_const_formals, resolve_concrete_function, resolve_function, resolve_initializer,
    resolve_module, resolve_module_stmt, scope_resolve_aggregate, scope_resolve_function,
    scope_resolve_module, scope_resolve_module_stmt,
};
pub use resolve::genericity::{get_qt_genericity, get_type_genericity};
pub use resolve::instantiate::instantiate_signature;
pub use resolve::sig::{type_constructor_initial, typed_signature_initial};
