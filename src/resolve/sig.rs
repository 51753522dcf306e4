//! Function signatures.
//!
//! An `UntypedFnSignature` captures the shape of a declaration (name,
//! formals, flags) without any types; a `TypedFnSignature` pairs it with
//! resolved formal types, the where-clause result, and instantiation
//! bookkeeping. Both are interned: handle equality is structural equality,
//! which is what makes memoized instantiation sound.

use crate::ast::{AstId, AstTag, ProcKind};
use crate::interner::Atom;
use crate::types::QualifiedType;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Handle to an interned `UntypedFnSignature`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UfsId(pub u32);

/// Handle to an interned `TypedFnSignature`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SigId(pub u32);

/// One formal in an untyped signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormalDetail {
    pub name: Atom,
    pub has_default: bool,
    pub decl: AstId,
    pub is_vararg: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UntypedFnSignature {
    /// Declaring construct; the composite's id for type constructors.
    pub id: AstId,
    pub name: Atom,
    pub is_method: bool,
    pub is_type_constructor: bool,
    pub is_compiler_generated: bool,
    pub throws: bool,
    /// AST tag of the declaring construct.
    pub tag: AstTag,
    pub kind: ProcKind,
    pub formals: Vec<FormalDetail>,
    pub where_clause: Option<AstId>,
}

impl UntypedFnSignature {
    pub fn num_formals(&self) -> usize {
        self.formals.len()
    }

    pub fn formal_decl(&self, i: usize) -> AstId {
        self.formals[i].decl
    }

    pub fn id_is_function(&self) -> bool {
        self.tag == AstTag::Function
    }
}

/// Outcome of where-clause evaluation on a typed signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WhereClauseResult {
    /// No where clause.
    None,
    True,
    False,
    /// Cannot be evaluated until instantiation.
    Tbd,
}

/// Marks which formals received substitutions during instantiation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bitmap {
    bits: Vec<bool>,
}

impl Bitmap {
    pub fn new() -> Self {
        Bitmap::default()
    }

    pub fn resize(&mut self, n: usize) {
        self.bits.resize(n, false);
    }

    pub fn set_bit(&mut self, i: usize, value: bool) {
        if i >= self.bits.len() {
            self.bits.resize(i + 1, false);
        }
        self.bits[i] = value;
    }

    pub fn bit(&self, i: usize) -> bool {
        self.bits.get(i).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypedFnSignature {
    pub untyped: UfsId,
    pub formal_types: Vec<QualifiedType>,
    pub where_clause_result: WhereClauseResult,
    pub needs_instantiation: bool,
    /// Predecessor this signature was instantiated from.
    pub instantiated_from: Option<SigId>,
    /// Signature this one was produced from by ref-maybe-const inference.
    pub inferred_from: Option<SigId>,
    /// Typed signature of the enclosing function, for nested functions.
    pub parent_fn: Option<SigId>,
    /// Which formals received substitutions.
    pub formals_instantiated: Bitmap,
}

impl TypedFnSignature {
    pub fn num_formals(&self) -> usize {
        self.formal_types.len()
    }

    pub fn formal_type(&self, i: usize) -> QualifiedType {
        self.formal_types[i]
    }
}

struct SigTable<T> {
    items: Vec<Arc<T>>,
    map: FxHashMap<Arc<T>, u32>,
}

impl<T> SigTable<T>
where
    T: Eq + Hash,
{
    fn new() -> Self {
        SigTable {
            items: Vec::new(),
            map: FxHashMap::default(),
        }
    }

    fn intern(&mut self, value: T) -> u32 {
        if let Some(&id) = self.map.get(&value) {
            return id;
        }
        let arc = Arc::new(value);
        let id = self.items.len() as u32;
        self.items.push(arc.clone());
        self.map.insert(arc, id);
        id
    }

    fn get(&self, id: u32) -> Arc<T> {
        self.items[id as usize].clone()
    }
}

/// Interner for signatures. Owned by the context; lives as long as the
/// current revision.
pub struct SigStore {
    untyped: RwLock<SigTable<UntypedFnSignature>>,
    typed: RwLock<SigTable<TypedFnSignature>>,
}

impl SigStore {
    pub fn new() -> Self {
        SigStore {
            untyped: RwLock::new(SigTable::new()),
            typed: RwLock::new(SigTable::new()),
        }
    }

    pub fn intern_untyped(&self, sig: UntypedFnSignature) -> UfsId {
        let mut table = self.untyped.write().expect("untyped sig lock poisoned");
        UfsId(table.intern(sig))
    }

    pub fn untyped(&self, id: UfsId) -> Arc<UntypedFnSignature> {
        self.untyped
            .read()
            .expect("untyped sig lock poisoned")
            .get(id.0)
    }

    pub fn intern_typed(&self, sig: TypedFnSignature) -> SigId {
        let mut table = self.typed.write().expect("typed sig lock poisoned");
        SigId(table.intern(sig))
    }

    pub fn typed(&self, id: SigId) -> Arc<TypedFnSignature> {
        self.typed.read().expect("typed sig lock poisoned").get(id.0)
    }
}

impl Default for SigStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Signature construction
// =============================================================================

use crate::context::Context;
use crate::query::QueryStatus;
use crate::types::{Genericity, Qualifier, SubstitutionsMap, TypeId};

use super::genericity::get_qt_genericity;
use super::resolver::Resolver;
use super::{fields, DefaultsPolicy};

/// The untyped signature of a function declaration.
pub fn untyped_signature_for_function(ctx: &Context, fn_id: AstId) -> Option<UfsId> {
    let node = ctx.program().id_to_ast(fn_id)?;
    let f = node.as_function()?;
    let formals = f
        .formals
        .iter()
        .filter_map(|&formal| {
            let formal_node = ctx.program().id_to_ast(formal)?;
            let detail = formal_node.as_formal()?;
            Some(FormalDetail {
                name: detail.name,
                has_default: detail.init_expr.is_some(),
                decl: formal,
                is_vararg: formal_node.tag() == AstTag::VarArgFormal,
            })
        })
        .collect();
    Some(ctx.sigs.intern_untyped(UntypedFnSignature {
        id: fn_id,
        name: f.name,
        is_method: f.is_method,
        is_type_constructor: false,
        is_compiler_generated: f.is_compiler_generated,
        throws: f.throws,
        tag: AstTag::Function,
        kind: f.kind,
        formals,
        where_clause: f.where_clause,
    }))
}

/// Is any formal type unknown or non-concrete? Formals that already carry
/// a substitution are not re-examined.
pub fn any_formal_needs_instantiation(
    ctx: &Context,
    formal_types: &[QualifiedType],
    untyped: &UntypedFnSignature,
    substitutions: Option<&SubstitutionsMap>,
) -> bool {
    for (i, qt) in formal_types.iter().enumerate() {
        if qt.is_unknown() {
            return true;
        }
        if let Some(subs) = substitutions {
            if subs.contains(untyped.formal_decl(i)) {
                continue;
            }
        }
        if get_qt_genericity(ctx, *qt) != Genericity::Concrete {
            return true;
        }
    }
    false
}

/// Evaluate a resolved where clause to its result.
pub fn where_clause_result(
    ctx: &Context,
    where_clause: Option<AstId>,
    where_qt: Option<QualifiedType>,
    needs_instantiation: bool,
) -> WhereClauseResult {
    let Some(where_id) = where_clause else {
        return WhereClauseResult::None;
    };
    if let Some(qt) = where_qt {
        let is_bool = qt.type_id() == TypeId::BOOL;
        if is_bool && qt.is_param_true() {
            return WhereClauseResult::True;
        }
        if is_bool && qt.is_param_false() {
            return WhereClauseResult::False;
        }
    }
    if needs_instantiation {
        return WhereClauseResult::Tbd;
    }
    ctx.error(where_id, "where clause does not result in a param bool value");
    WhereClauseResult::Tbd
}

/// Innermost function enclosing `fn_id`, if any.
fn parent_function_id(ctx: &Context, fn_id: AstId) -> Option<AstId> {
    let mut cur = ctx.program().id_to_parent_id(fn_id);
    while let Some(id) = cur {
        if ctx.program().id_to_tag(id) == Some(AstTag::Function) {
            return Some(id);
        }
        cur = ctx.program().id_to_parent_id(id);
    }
    None
}

fn check_parenless_method_field_redefinition(ctx: &Context, fn_id: AstId, receiver: QualifiedType) {
    let Some(f) = ctx.program().id_to_ast(fn_id).and_then(|n| n.as_function()) else {
        return;
    };
    if !(f.is_method && f.is_parenless) {
        return;
    }
    let Some(ct) = ctx.types.get_composite_type(receiver.type_id()) else {
        return;
    };
    let Some(shape) = ctx.types.composite_shape(ct) else {
        return;
    };
    if ctx.program().id_contains_field_with_name(shape.decl_id, f.name) {
        ctx.error(
            fn_id,
            format!(
                "parenless proc redeclares the field '{}'",
                ctx.name_of(f.name)
            ),
        );
    }
}

/// Build the initial typed signature: formal types resolved with no
/// substitutions, where clause evaluated only when already concrete.
pub fn typed_signature_initial(ctx: &Context, untyped_id: UfsId) -> Option<SigId> {
    let revision = ctx.revision();
    match ctx.queries.typed_signature_initial.begin(revision, untyped_id) {
        QueryStatus::Cached(sig) => return sig,
        QueryStatus::AlreadyRunning => return None,
        QueryStatus::Started => {}
    }
    let result = typed_signature_initial_impl(ctx, untyped_id);
    ctx.queries
        .typed_signature_initial
        .end(revision, untyped_id, result)
}

fn typed_signature_initial_impl(ctx: &Context, untyped_id: UfsId) -> Option<SigId> {
    let untyped = ctx.sigs.untyped(untyped_id);
    let node = ctx.program().id_to_ast(untyped.id)?;
    let f = node.as_function()?;

    // nested functions link to their parent's typed signature
    let parent_fn = parent_function_id(ctx, untyped.id)
        .and_then(|pid| untyped_signature_for_function(ctx, pid))
        .and_then(|pufs| typed_signature_initial(ctx, pufs));

    let mut visitor = Resolver::new(ctx, untyped.id);
    // the initial signature stays generic even for defaulted formals
    visitor.use_generic_formal_defaults = false;
    for &formal in &f.formals {
        visitor.traverse(formal);
    }
    // do not visit the return type or function body

    let formal_types: Vec<QualifiedType> = f
        .formals
        .iter()
        .map(|&formal| {
            visitor
                .by_postorder
                .by_id_or_null(formal)
                .map(|re| re.type_())
                .unwrap_or_default()
        })
        .collect();

    let needs_instantiation =
        any_formal_needs_instantiation(ctx, &formal_types, &untyped, None);

    // visit the where clause only when it can already be evaluated
    let mut where_result = WhereClauseResult::None;
    if let Some(where_id) = f.where_clause {
        if needs_instantiation {
            where_result = WhereClauseResult::Tbd;
        } else {
            let qt = visitor.traverse(where_id);
            where_result = where_clause_result(ctx, Some(where_id), Some(qt), false);
        }
    }

    if f.is_method {
        if let Some(receiver) = formal_types.first() {
            check_parenless_method_field_redefinition(ctx, untyped.id, *receiver);
        }
    }

    Some(ctx.sigs.intern_typed(TypedFnSignature {
        untyped: untyped_id,
        formal_types,
        where_clause_result: where_result,
        needs_instantiation,
        instantiated_from: None,
        inferred_from: None,
        parent_fn,
        formals_instantiated: Bitmap::new(),
    }))
}

/// Should a field become a formal of its composite's type constructor?
/// Type fields and value-less param fields always do; value fields only
/// when their declared type is generic and they have no initializer.
fn type_ctor_formal_type(
    ctx: &Context,
    field: &super::FieldInfo,
) -> Option<QualifiedType> {
    let qt = field.qt;
    if qt.is_param() && qt.param().is_none() && !field.has_default_value {
        return Some(qt);
    }
    if qt.is_type() {
        return Some(qt);
    }
    if field.has_default_value {
        return None;
    }
    // untyped, uninitialized value fields enter as `type: Any`
    if qt.type_id() == TypeId::ANY {
        return Some(QualifiedType::type_(TypeId::ANY));
    }
    if qt.has_type() && !qt.is_unknown() {
        if get_qt_genericity(ctx, QualifiedType::type_(qt.type_id())) == Genericity::Generic {
            return Some(QualifiedType::type_(qt.type_id()));
        }
    }
    None
}

/// The initial (uninstantiated) type-constructor signature for a
/// composite type.
pub fn type_constructor_initial(ctx: &Context, t: TypeId) -> SigId {
    let revision = ctx.revision();
    match ctx.queries.type_constructor_initial.begin(revision, t) {
        QueryStatus::Cached(sig) => return sig,
        QueryStatus::AlreadyRunning => {
            // produce an empty concrete constructor to break the cycle
            return intern_type_ctor(ctx, t, Vec::new(), Vec::new());
        }
        QueryStatus::Started => {}
    }
    let result = type_constructor_initial_impl(ctx, t);
    ctx.queries
        .type_constructor_initial
        .end(revision, t, result)
}

fn type_constructor_initial_impl(ctx: &Context, t: TypeId) -> SigId {
    let mut formals = Vec::new();
    let mut formal_types = Vec::new();

    if let Some(ct) = ctx.types.get_composite_type(t) {
        let resolved = fields::fields_for_type_decl(ctx, ct, DefaultsPolicy::IgnoreDefaults);
        for field in resolved.fields() {
            if let Some(formal_type) = type_ctor_formal_type(ctx, field) {
                formals.push(FormalDetail {
                    name: field.name,
                    has_default: field.has_default_value,
                    decl: field.decl_id,
                    is_vararg: false,
                });
                formal_types.push(formal_type);
            }
        }
    }

    intern_type_ctor(ctx, t, formals, formal_types)
}

fn intern_type_ctor(
    ctx: &Context,
    t: TypeId,
    formals: Vec<FormalDetail>,
    formal_types: Vec<QualifiedType>,
) -> SigId {
    let (decl_id, name, tag) = match ctx
        .types
        .get_composite_type(t)
        .and_then(|ct| ctx.types.composite_shape(ct))
    {
        Some(shape) => (
            shape.decl_id,
            shape.name,
            ctx.program()
                .id_to_tag(shape.decl_id)
                .unwrap_or(AstTag::Record),
        ),
        None => (AstId::NONE, Atom::NONE, AstTag::Record),
    };
    let needs_instantiation = !formals.is_empty();
    let untyped = ctx.sigs.intern_untyped(UntypedFnSignature {
        id: decl_id,
        name,
        is_method: false,
        is_type_constructor: true,
        is_compiler_generated: true,
        throws: false,
        tag,
        kind: ProcKind::Proc,
        formals,
        where_clause: None,
    });
    ctx.sigs.intern_typed(TypedFnSignature {
        untyped,
        formal_types,
        where_clause_result: WhereClauseResult::None,
        needs_instantiation,
        instantiated_from: None,
        inferred_from: None,
        parent_fn: None,
        formals_instantiated: Bitmap::new(),
    })
}

/// Compiler-generated paren-less accessor for a field.
pub fn field_accessor(ctx: &Context, containing: TypeId, name: Atom) -> SigId {
    let resolved = fields::fields_for_type_decl(ctx, containing, DefaultsPolicy::UseDefaults);
    let field = resolved.fields().iter().find(|f| f.name == name);
    let (decl, _field_qt) = match field {
        Some(f) => (f.decl_id, f.qt),
        None => (AstId::NONE, QualifiedType::unknown()),
    };
    let untyped = ctx.sigs.intern_untyped(UntypedFnSignature {
        id: decl,
        name,
        is_method: true,
        is_type_constructor: false,
        is_compiler_generated: true,
        throws: false,
        tag: AstTag::Variable,
        kind: ProcKind::Proc,
        formals: vec![FormalDetail {
            name: ctx.name("this"),
            has_default: false,
            decl,
            is_vararg: false,
        }],
        where_clause: None,
    });
    let receiver = QualifiedType::new(Qualifier::ConstRef, containing);
    ctx.sigs.intern_typed(TypedFnSignature {
        untyped,
        formal_types: vec![receiver],
        where_clause_result: WhereClauseResult::None,
        needs_instantiation: false,
        instantiated_from: None,
        inferred_from: None,
        parent_fn: None,
        formals_instantiated: Bitmap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_untyped(name: Atom) -> UntypedFnSignature {
        UntypedFnSignature {
            id: AstId::NONE,
            name,
            is_method: false,
            is_type_constructor: false,
            is_compiler_generated: false,
            throws: false,
            tag: AstTag::Function,
            kind: ProcKind::Proc,
            formals: Vec::new(),
            where_clause: None,
        }
    }

    #[test]
    fn test_signature_interning() {
        let store = SigStore::new();
        let name = Atom(5);
        let a = store.intern_untyped(sample_untyped(name));
        let b = store.intern_untyped(sample_untyped(name));
        assert_eq!(a, b, "structurally equal signatures share a handle");

        let t1 = store.intern_typed(TypedFnSignature {
            untyped: a,
            formal_types: Vec::new(),
            where_clause_result: WhereClauseResult::None,
            needs_instantiation: false,
            instantiated_from: None,
            inferred_from: None,
            parent_fn: None,
            formals_instantiated: Bitmap::new(),
        });
        let t2 = store.intern_typed(TypedFnSignature {
            untyped: b,
            formal_types: Vec::new(),
            where_clause_result: WhereClauseResult::None,
            needs_instantiation: false,
            instantiated_from: None,
            inferred_from: None,
            parent_fn: None,
            formals_instantiated: Bitmap::new(),
        });
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_bitmap() {
        let mut bm = Bitmap::new();
        assert!(!bm.bit(3));
        bm.set_bit(3, true);
        assert!(bm.bit(3));
        assert!(!bm.bit(0));
        assert_eq!(bm.len(), 4);
    }
}
