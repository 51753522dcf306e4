//! Per-traversal resolution state.
//!
//! A `Resolver` walks one symbol's AST in post order, assigning each
//! expression a qualified type in a `ResolutionResultByPostorderID`. All
//! traversal state (current substitutions, type-query bindings, the
//! defaults policy for fields, the method receiver) lives here and is
//! threaded explicitly; there is no module-level mutable state.

use crate::ast::{
    AstId, AstKind, AstTag, CallExpr, FormalIntent, LiteralValue, VarStorage,
};
use crate::context::Context;
use crate::interner::Atom;
use crate::query::QueryStatus;
use crate::scope::{CheckedScopes, LookupConfig, ScopeId, lookup_name_in_scope_with_set};
use crate::types::{
    AnyBoundKind, ClassDecorator, ParamValue, QualifiedType, Qualifier, SubstitutionsMap, TypeId,
    TypeKey,
};
use rustc_hash::FxHashMap;
use tracing::trace;

use super::poi::{PoiInfo, PoiScopeId};
use super::{call, can_pass, CallInfo, CallInfoActual, DefaultsPolicy, ResolutionResultByPostorderID};

pub struct Resolver<'a> {
    pub ctx: &'a Context,
    /// The symbol whose contents are being resolved.
    pub symbol: AstId,
    pub scope: ScopeId,
    pub poi_scope: Option<PoiScopeId>,
    pub by_postorder: ResolutionResultByPostorderID,
    pub substitutions: SubstitutionsMap,
    pub poi_info: PoiInfo,
    /// Scope-resolution pass: record referred-to declarations, skip types.
    pub scope_only: bool,
    pub defaults_policy: DefaultsPolicy,
    /// Do not record new type-query bindings; use the recorded ones.
    pub skip_type_queries: bool,
    /// Formal whose substitution is ignored while its type expression is
    /// re-inspected.
    pub ignore_substitution_for: Option<AstId>,
    pub type_query_bindings: FxHashMap<Atom, QualifiedType>,
    /// Receiver composite while resolving a method's formals or body.
    pub composite_type: Option<TypeId>,
    /// Sibling fields visible while resolving a composite's fields, typed
    /// under the with-defaults view.
    field_visible_types: FxHashMap<Atom, QualifiedType>,
    /// May an initializer instantiate a generic declared type? Off while
    /// building initial signatures and during instantiation, where only
    /// the use-the-default hint may trigger it.
    pub use_generic_formal_defaults: bool,
    pub return_type: QualifiedType,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a Context, symbol: AstId) -> Self {
        let scope = ctx
            .scopes()
            .scope_for_id(symbol)
            .unwrap_or(crate::scope::ScopeId(0));
        Resolver {
            ctx,
            symbol,
            scope,
            poi_scope: None,
            by_postorder: ResolutionResultByPostorderID::new(),
            substitutions: SubstitutionsMap::new(),
            poi_info: PoiInfo::default(),
            scope_only: false,
            defaults_policy: DefaultsPolicy::UseDefaults,
            skip_type_queries: false,
            ignore_substitution_for: None,
            type_query_bindings: FxHashMap::default(),
            composite_type: None,
            field_visible_types: FxHashMap::default(),
            use_generic_formal_defaults: true,
            return_type: QualifiedType::unknown(),
        }
    }

    pub fn with_substitutions(mut self, substitutions: SubstitutionsMap) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn with_poi(mut self, poi_scope: Option<PoiScopeId>) -> Self {
        self.poi_scope = poi_scope;
        self.poi_info.set_poi_scope(poi_scope);
        self
    }

    pub fn scope_only(mut self) -> Self {
        self.scope_only = true;
        self
    }

    pub fn with_defaults_policy(mut self, policy: DefaultsPolicy) -> Self {
        self.defaults_policy = policy;
        self
    }

    pub fn with_composite(mut self, ct: TypeId) -> Self {
        self.composite_type = Some(ct);
        self
    }

    pub fn set_field_visible(&mut self, name: Atom, qt: QualifiedType) {
        self.field_visible_types.insert(name, qt);
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Resolve one node (children first) and return its type.
    pub fn traverse(&mut self, id: AstId) -> QualifiedType {
        let Some(node) = self.ctx.program().id_to_ast(id) else {
            return self.ctx.unknown_qt();
        };
        let qt = match &node.kind {
            AstKind::Literal(lit) => self.resolve_literal(id, lit.clone()),
            AstKind::Identifier { name } => self.resolve_identifier(id, *name, false),
            AstKind::TypeQuery { name } => self.resolve_type_query_expr(id, *name),
            AstKind::Call(c) => {
                let c = c.clone();
                self.resolve_call_expr(id, &c, false)
            }
            AstKind::OpCall(c) => {
                let c = c.clone();
                self.resolve_call_expr(id, &c, true)
            }
            AstKind::Tuple { elements } => {
                let elements = elements.clone();
                self.resolve_tuple_expr(id, &elements)
            }
            AstKind::Dot { receiver, field } => {
                let (receiver, field) = (*receiver, *field);
                self.resolve_dot_expr(id, receiver, field)
            }
            AstKind::New { type_expr } => {
                let type_expr = *type_expr;
                self.resolve_new_expr(id, type_expr)
            }
            AstKind::Variable(_) => return self.resolve_decl(id, true),
            AstKind::Formal(_) | AstKind::VarArgFormal(_) => return self.resolve_decl(id, true),
            AstKind::Forwarding { expr, .. } => {
                let expr = *expr;
                let qt = self.traverse(expr);
                self.set_result(id, qt);
                qt
            }
            _ => self.ctx.unknown_qt(),
        };
        qt
    }

    fn set_result(&mut self, id: AstId, qt: QualifiedType) {
        if id.post_order >= 0 {
            self.by_postorder.by_id(id).set_type(qt);
        }
    }

    // =========================================================================
    // Literals
    // =========================================================================

    fn resolve_literal(&mut self, id: AstId, lit: LiteralValue) -> QualifiedType {
        let types = &self.ctx.types;
        // bool/int/uint literals are params; other literals are values of
        // their type
        let qt = match lit {
            LiteralValue::Bool(v) => QualifiedType::param_(TypeId::BOOL, ParamValue::Bool(v)),
            LiteralValue::Int(v) => QualifiedType::param_(types.int_type(0), ParamValue::Int(v)),
            LiteralValue::Uint(v) => QualifiedType::param_(types.uint_type(0), ParamValue::Uint(v)),
            LiteralValue::Real(_) => QualifiedType::new(Qualifier::ConstVar, types.real_type(0)),
            LiteralValue::Imag(_) => QualifiedType::new(Qualifier::ConstVar, types.imag_type(0)),
            LiteralValue::String(_) => QualifiedType::new(Qualifier::ConstVar, TypeId::STRING),
            LiteralValue::Bytes(_) => QualifiedType::new(Qualifier::ConstVar, TypeId::BYTES),
            LiteralValue::CString(_) => QualifiedType::new(Qualifier::ConstVar, TypeId::C_STRING),
        };
        self.set_result(id, qt);
        qt
    }

    // =========================================================================
    // Identifiers
    // =========================================================================

    /// `lenient` suppresses the unresolved-name error (used for call
    /// callees, where candidate search happens by name).
    pub fn resolve_identifier(&mut self, id: AstId, name: Atom, lenient: bool) -> QualifiedType {
        if let Some(&bound) = self.type_query_bindings.get(&name) {
            self.set_result(id, bound);
            return bound;
        }

        if let Some(&field_qt) = self.field_visible_types.get(&name) {
            // a type or param field whose value is not yet established
            // reads as unknown, so dependent fields stay out of the type
            // constructor
            let value_unknown = (field_qt.is_type() && field_qt.type_id() == TypeId::ANY)
                || (field_qt.is_param() && field_qt.param().is_none());
            let qt = if value_unknown {
                self.ctx.unknown_qt()
            } else {
                field_qt
            };
            self.set_result(id, qt);
            return qt;
        }

        let mut visited = CheckedScopes::new();
        let config = LookupConfig::DECLS | LookupConfig::PARENTS | LookupConfig::INNERMOST;
        let found = lookup_name_in_scope_with_set(
            self.ctx.program(),
            self.ctx.scopes(),
            self.scope,
            &[],
            name,
            config,
            &mut visited,
        );

        if let Some(&decl) = found.first() {
            if id.post_order >= 0 {
                self.by_postorder.by_id(id).set_to_id(decl);
            }
            if self.scope_only {
                let qt = self.ctx.unknown_qt();
                self.set_result(id, qt);
                return qt;
            }
            let qt = self.type_for_decl(decl);
            self.set_result(id, qt);
            return qt;
        }

        if let Some(qt) = type_for_builtin(self.ctx, name) {
            self.set_result(id, qt);
            return qt;
        }

        if self.scope_only || lenient {
            let qt = self.ctx.unknown_qt();
            self.set_result(id, qt);
            return qt;
        }

        self.ctx.error(
            id,
            format!("cannot find name '{}'", self.ctx.name_of(name)),
        );
        let qt = self.ctx.erroneous();
        self.set_result(id, qt);
        qt
    }

    /// The qualified type a declaration's name stands for at a use site.
    fn type_for_decl(&mut self, decl: AstId) -> QualifiedType {
        let Some(node) = self.ctx.program().id_to_ast(decl) else {
            return self.ctx.unknown_qt();
        };
        match node.tag() {
            AstTag::Record | AstTag::Class | AstTag::Union | AstTag::Enum => {
                QualifiedType::type_(super::functions::initial_type_for_type_decl(self.ctx, decl))
            }
            AstTag::Module => QualifiedType::new(Qualifier::Module, TypeId::NONE),
            AstTag::Function => {
                let is_parenless = self.ctx.program().id_is_parenless_function(decl);
                QualifiedType::new(
                    if is_parenless {
                        Qualifier::ParenlessFunction
                    } else {
                        Qualifier::Function
                    },
                    TypeId::NONE,
                )
            }
            AstTag::Formal | AstTag::VarArgFormal => {
                if self.substitutions.contains(decl)
                    && self.ignore_substitution_for != Some(decl)
                {
                    return self.substitutions.get(decl).unwrap_or_default();
                }
                if let Some(re) = self.by_postorder.by_id_or_null(decl) {
                    return re.type_();
                }
                self.ctx.unknown_qt()
            }
            AstTag::Variable => {
                if self.substitutions.contains(decl) {
                    return self.substitutions.get(decl).unwrap_or_default();
                }
                if decl.symbol == self.symbol.symbol {
                    if let Some(re) = self.by_postorder.by_id_or_null(decl) {
                        let qt = re.type_();
                        if !qt.is_unknown() || qt.is_erroneous() {
                            return qt;
                        }
                    }
                }
                if self.ctx.program().id_is_field(decl) {
                    // a field referenced outside field resolution resolves
                    // through the visible-fields map; if we get here the
                    // type is not available yet
                    return self.ctx.unknown_qt();
                }
                type_for_module_level_symbol(self.ctx, decl)
            }
            _ => self.ctx.unknown_qt(),
        }
    }

    // =========================================================================
    // Type queries
    // =========================================================================

    fn resolve_type_query_expr(&mut self, id: AstId, name: Atom) -> QualifiedType {
        let qt = if let Some(&bound) = self.type_query_bindings.get(&name) {
            bound
        } else {
            // an unbound query is the fully-generic type
            QualifiedType::type_(TypeId::ANY)
        };
        self.set_result(id, qt);
        qt
    }

    /// Match `?name` patterns in a formal's type expression against the
    /// components of `actual`, recording bindings for later formals.
    pub fn resolve_type_queries(&mut self, type_expr: AstId, actual: QualifiedType) {
        if self.skip_type_queries {
            return;
        }
        let Some(node) = self.ctx.program().id_to_ast(type_expr) else {
            return;
        };
        match &node.kind {
            AstKind::TypeQuery { name } => {
                let bound = QualifiedType::type_(actual.type_id());
                self.type_query_bindings.insert(*name, bound);
                self.set_result(type_expr, bound);
            }
            AstKind::Call(c) => {
                let c = c.clone();
                self.resolve_type_queries_in_call(&c, actual);
            }
            _ => {}
        }
    }

    fn resolve_type_queries_in_call(&mut self, c: &CallExpr, actual: QualifiedType) {
        let Some(callee) = self.ctx.program().id_to_ast(c.callee) else {
            return;
        };
        let AstKind::Identifier { name } = callee.kind else {
            return;
        };
        let callee_name = self.ctx.name_of(name);
        let actual_key = self.ctx.types.key(actual.type_id());

        // numeric patterns: int(?w) binds w to the param width
        let width = match (callee_name.as_str(), &actual_key) {
            ("int", TypeKey::Int(w))
            | ("uint", TypeKey::Uint(w))
            | ("real", TypeKey::Real(w))
            | ("imag", TypeKey::Imag(w))
            | ("complex", TypeKey::Complex(w)) => Some(*w),
            _ => None,
        };
        if let Some(w) = width {
            if let Some(&query_arg) = c.actuals.first() {
                if let Some(AstKind::TypeQuery { name }) =
                    self.ctx.program().id_to_ast(query_arg).map(|n| &n.kind)
                {
                    let bound = QualifiedType::param_(
                        self.ctx.types.int_type(0),
                        ParamValue::Int(w as i64),
                    );
                    self.type_query_bindings.insert(*name, bound);
                    self.set_result(query_arg, bound);
                }
            }
            return;
        }

        // c_ptr(?t) binds the element type
        if callee_name == "c_ptr" {
            if let (Some(&query_arg), TypeKey::CPtr(Some(elt))) = (c.actuals.first(), &actual_key) {
                if let Some(AstKind::TypeQuery { name }) =
                    self.ctx.program().id_to_ast(query_arg).map(|n| &n.kind)
                {
                    let bound = QualifiedType::type_(*elt);
                    self.type_query_bindings.insert(*name, bound);
                    self.set_result(query_arg, bound);
                }
            }
            return;
        }

        // composite patterns: R(?t) binds type-constructor formals against
        // the actual's substitutions
        let Some(ct) = self.ctx.types.get_composite_type(actual.type_id()) else {
            return;
        };
        let Some(shape) = self.ctx.types.composite_shape(ct) else {
            return;
        };
        let generic_root = {
            let mut cur = ct;
            loop {
                match self.ctx.types.composite_shape(cur).and_then(|s| s.instantiated_from) {
                    Some(from) => cur = from,
                    None => break cur,
                }
            }
        };
        let ctor = super::sig::type_constructor_initial(self.ctx, generic_root);
        let untyped = self.ctx.sigs.untyped(self.ctx.sigs.typed(ctor).untyped);
        for (i, &arg) in c.actuals.iter().enumerate() {
            if i >= untyped.num_formals() {
                break;
            }
            let Some(AstKind::TypeQuery { name }) =
                self.ctx.program().id_to_ast(arg).map(|n| &n.kind)
            else {
                continue;
            };
            if let Some(sub) = shape.substitutions.get(untyped.formal_decl(i)) {
                self.type_query_bindings.insert(*name, sub);
                self.set_result(arg, sub);
            }
        }
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    /// Resolve a variable or formal declaration. `use_init` controls
    /// whether the initializer may contribute the type (the defaults
    /// policy for fields, always-on elsewhere).
    pub fn resolve_decl(&mut self, id: AstId, use_init: bool) -> QualifiedType {
        let Some(node) = self.ctx.program().id_to_ast(id) else {
            return self.ctx.unknown_qt();
        };

        // substitution from an instantiation takes precedence
        if self.substitutions.contains(id) && self.ignore_substitution_for != Some(id) {
            let sub = self.substitutions.get(id).unwrap_or_default();
            // still record the type expression's own results
            if let Some(f) = node.as_formal() {
                if let Some(te) = f.type_expr {
                    self.traverse(te);
                }
            } else if let Some(v) = node.as_variable() {
                if let Some(te) = v.type_expr {
                    self.traverse(te);
                }
            }
            if !sub.is_use_default_hint() {
                // the kind comes from the declaration; type and param come
                // from the substitution
                let declared = match &node.kind {
                    AstKind::Variable(v) => storage_qualifier(v.storage),
                    AstKind::Formal(f) | AstKind::VarArgFormal(f) => intent_qualifier(f.intent),
                    _ => Qualifier::Unknown,
                };
                let qt = match declared {
                    Qualifier::Type => QualifiedType::type_(sub.type_id()),
                    Qualifier::Param => {
                        QualifiedType::with_param(Qualifier::Param, sub.type_id(), sub.param())
                    }
                    Qualifier::Var | Qualifier::ConstVar if node.tag() == AstTag::Variable => {
                        QualifiedType::new(declared, sub.type_id())
                    }
                    _ => {
                        let base = QualifiedType::new(declared, sub.type_id());
                        let is_this = node.decl_name() == Some(self.ctx.name("this"));
                        let kind = can_pass::resolve_intent(self.ctx, base, is_this, false);
                        QualifiedType::new(kind, sub.type_id())
                    }
                };
                self.set_result(id, qt);
                return qt;
            }
            // a use-the-default substitution defers to the initializer
            return self.resolve_decl_from_exprs(id, true, true);
        }

        // a formal's default contributes a type only when generic formal
        // defaults are in play; variables and fields follow the policy
        let is_formal = matches!(node.tag(), AstTag::Formal | AstTag::VarArgFormal);
        let use_init = use_init
            && !self.scope_only
            && self.defaults_policy != DefaultsPolicy::IgnoreDefaults
            && (!is_formal || self.use_generic_formal_defaults);
        let init_instantiates = use_init && self.use_generic_formal_defaults;
        self.resolve_decl_from_exprs(id, use_init, init_instantiates)
    }

    fn resolve_decl_from_exprs(
        &mut self,
        id: AstId,
        use_init: bool,
        init_instantiates: bool,
    ) -> QualifiedType {
        let Some(node) = self.ctx.program().id_to_ast(id) else {
            return self.ctx.unknown_qt();
        };
        let (declared, type_expr, init_expr, is_vararg, count_expr, name) = match &node.kind {
            AstKind::Variable(v) => (
                storage_qualifier(v.storage),
                v.type_expr,
                v.init_expr,
                false,
                None,
                v.name,
            ),
            AstKind::Formal(f) => (
                intent_qualifier(f.intent),
                f.type_expr,
                f.init_expr,
                false,
                None,
                f.name,
            ),
            AstKind::VarArgFormal(f) => (
                intent_qualifier(f.intent),
                f.type_expr,
                f.init_expr,
                true,
                f.count_expr,
                f.name,
            ),
            _ => return self.ctx.unknown_qt(),
        };

        let type_qt = type_expr.map(|te| self.traverse(te));
        let init_qt = init_expr.map(|ie| self.traverse(ie));
        let count_qt = count_expr.map(|ce| self.traverse(ce));

        if self.scope_only {
            let qt = self.ctx.unknown_qt();
            self.set_result(id, qt);
            return qt;
        }

        let mut ty = TypeId::NONE;
        let mut param = None;
        if let Some(t) = type_qt {
            if t.is_erroneous() {
                ty = TypeId::ERRONEOUS;
            } else if t.is_type() || t.is_unknown() {
                ty = t.type_id();
            } else {
                self.ctx
                    .error(type_expr.unwrap_or(id), "type expression does not name a type");
                ty = TypeId::ERRONEOUS;
            }
            // a param declaration with a declared type but no value stays
            // an unvalued param
            if declared == Qualifier::Param {
                if use_init {
                    param = init_qt.and_then(|i| i.param());
                }
            }
            // a default value may instantiate a generic declared type
            if init_instantiates && !ty.is_none() && !ty.is_erroneous() {
                if let Some(i) = init_qt {
                    let declared_generic = ty == TypeId::ANY
                        || super::genericity::get_type_genericity(self.ctx, ty)
                            != crate::types::Genericity::Concrete;
                    if declared_generic && i.has_type() && !i.is_unknown() {
                        ty = i.type_id();
                    }
                }
            }
        } else if use_init {
            if let Some(i) = init_qt {
                ty = i.type_id();
                if declared == Qualifier::Param {
                    param = i.param();
                } else if declared == Qualifier::Type {
                    // `type t = int(32);` takes the named type itself
                    ty = i.type_id();
                }
            }
        }

        if ty.is_none() {
            // untyped, uninitialized declarations are generic
            ty = TypeId::ANY;
        }

        let qt = if is_vararg {
            let star_kind = if declared == Qualifier::Unknown {
                Qualifier::Var
            } else {
                declared
            };
            let star = QualifiedType::with_param(star_kind, ty, param);
            let count = count_qt.and_then(|c| c.param()).and_then(|p| p.as_count());
            let tuple = self.ctx.types.star_tuple(count, star, true);
            QualifiedType::new(
                if declared == Qualifier::Unknown {
                    Qualifier::Var
                } else {
                    declared
                },
                tuple,
            )
        } else {
            let qt0 = QualifiedType::with_param(declared, ty, param);
            let is_this = name == self.ctx.name("this");
            let kind = if node.tag() == AstTag::Variable {
                // fields and module-level variables keep their storage
                match declared {
                    Qualifier::Unknown => Qualifier::Var,
                    other => other,
                }
            } else {
                can_pass::resolve_intent(self.ctx, qt0, is_this, false)
            };
            QualifiedType::with_param(kind, ty, param)
        };

        trace!(?id, ?qt, "resolved declaration");
        self.set_result(id, qt);
        qt
    }

    // =========================================================================
    // Calls, tuples, dots, new
    // =========================================================================

    fn resolve_call_expr(&mut self, id: AstId, c: &CallExpr, is_op: bool) -> QualifiedType {
        // assignment semantics (copy-init insertion, `=` overloads) are
        // applied by a later pass; here both sides just get resolved
        if is_op && c.op_name == self.ctx.name("=") {
            for &actual in &c.actuals {
                self.traverse(actual);
            }
            let qt = QualifiedType::new(Qualifier::Var, TypeId::VOID);
            self.set_result(id, qt);
            return qt;
        }

        // `new C(...)` — the callee is a new-expression
        if !is_op {
            if let Some(AstKind::New { type_expr }) =
                self.ctx.program().id_to_ast(c.callee).map(|n| &n.kind)
            {
                let type_expr = *type_expr;
                return self.resolve_new_call(id, type_expr, c);
            }
        }

        let ci = self.build_call_info(c, is_op);
        self.run_call(id, ci)
    }

    fn build_call_info(&mut self, c: &CallExpr, is_op: bool) -> CallInfo {
        let mut name = c.op_name;
        let mut called_type = QualifiedType::unknown();
        let mut is_method = false;
        let mut actuals = Vec::new();

        if !is_op {
            match self.ctx.program().id_to_ast(c.callee).map(|n| n.kind.clone()) {
                Some(AstKind::Identifier { name: callee_name }) => {
                    name = callee_name;
                    called_type = self.resolve_identifier(c.callee, callee_name, true);
                }
                Some(AstKind::Dot { receiver, field }) => {
                    name = field;
                    let recv_qt = self.traverse(receiver);
                    self.set_result(c.callee, self.ctx.unknown_qt());
                    is_method = true;
                    actuals.push(CallInfoActual::named(recv_qt, self.ctx.name("this")));
                    called_type = recv_qt;
                }
                _ => {
                    called_type = self.traverse(c.callee);
                }
            }
        }

        for (i, &actual) in c.actuals.iter().enumerate() {
            let qt = self.traverse(actual);
            let by_name = c.actual_names.get(i).copied().unwrap_or(Atom::NONE);
            actuals.push(CallInfoActual { qt, by_name });
        }

        CallInfo {
            name,
            called_type,
            is_method_call: is_method,
            is_op_call: is_op,
            has_question_arg: c.has_question_arg,
            is_parenless: false,
            actuals,
        }
    }

    fn run_call(&mut self, id: AstId, ci: CallInfo) -> QualifiedType {
        if self.scope_only {
            let qt = self.ctx.unknown_qt();
            self.set_result(id, qt);
            return qt;
        }
        let result = call::resolve_call(self.ctx, Some(id), &ci, self.scope, self.poi_scope, None);
        self.poi_info.accumulate(&result.poi_info);

        let mut expr_type = result.expr_type;
        if !result.most_specific.found_candidates() && !expr_type.has_type() {
            let any_erroneous =
                ci.called_type.is_erroneous() || ci.actuals.iter().any(|a| a.qt.is_erroneous());
            let any_unknown = ci.actuals.iter().any(|a| a.qt.is_unknown());
            if any_erroneous {
                // the root cause was already reported
                expr_type = self.ctx.erroneous();
            } else if any_unknown {
                expr_type = self.ctx.unknown_qt();
            } else {
                // not a special form and no candidate matched
                self.ctx.error(
                    id,
                    format!("unresolved call to '{}'", self.ctx.name_of(ci.name)),
                );
                expr_type = self.ctx.erroneous();
            }
        }

        if id.post_order >= 0 {
            let re = self.by_postorder.by_id(id);
            re.set_type(expr_type);
            re.set_most_specific(result.most_specific.clone());
            re.set_poi_scope(self.poi_scope);
        }
        expr_type
    }

    fn resolve_tuple_expr(&mut self, id: AstId, elements: &[AstId]) -> QualifiedType {
        let actuals: Vec<CallInfoActual> = elements
            .iter()
            .map(|&e| CallInfoActual::new(self.traverse(e)))
            .collect();
        let ci = CallInfo::new(Atom::NONE, actuals);
        if self.scope_only {
            let qt = self.ctx.unknown_qt();
            self.set_result(id, qt);
            return qt;
        }
        let result = call::resolve_tuple_expr(self.ctx, Some(id), &ci);
        self.set_result(id, result.expr_type);
        result.expr_type
    }

    /// `recv.field` outside a call: a field access or paren-less method.
    fn resolve_dot_expr(&mut self, id: AstId, receiver: AstId, field: Atom) -> QualifiedType {
        let recv_qt = self.traverse(receiver);
        if self.scope_only {
            let qt = self.ctx.unknown_qt();
            self.set_result(id, qt);
            return qt;
        }
        if recv_qt.qualifier() == Qualifier::Module {
            self.ctx.unimplemented(id, "module member access");
            let qt = self.ctx.erroneous();
            self.set_result(id, qt);
            return qt;
        }
        let ci = CallInfo {
            name: field,
            called_type: recv_qt,
            is_method_call: true,
            is_op_call: false,
            has_question_arg: false,
            is_parenless: true,
            actuals: vec![CallInfoActual::named(recv_qt, self.ctx.name("this"))],
        };
        self.run_call(id, ci)
    }

    fn resolve_new_expr(&mut self, id: AstId, type_expr: AstId) -> QualifiedType {
        let inner = self.traverse(type_expr);
        let qt = self.new_expr_type(id, inner);
        self.set_result(id, qt);
        qt
    }

    /// `new C(args)`: instantiate the type against the actuals if needed,
    /// then apply the default management.
    fn resolve_new_call(&mut self, id: AstId, type_expr: AstId, c: &CallExpr) -> QualifiedType {
        let mut inner = self.traverse(type_expr);
        // the New node itself mirrors the type it constructs
        self.set_result(c.callee, inner);

        if !c.actuals.is_empty() && inner.is_type() {
            let mut actuals = Vec::new();
            for (i, &actual) in c.actuals.iter().enumerate() {
                let qt = self.traverse(actual);
                let by_name = c.actual_names.get(i).copied().unwrap_or(Atom::NONE);
                actuals.push(CallInfoActual { qt, by_name });
            }
            let name = self
                .ctx
                .types
                .composite_shape(
                    self.ctx
                        .types
                        .get_composite_type(inner.type_id())
                        .unwrap_or(inner.type_id()),
                )
                .map(|s| s.name)
                .unwrap_or(Atom::NONE);
            let ci = CallInfo {
                name,
                called_type: inner,
                is_method_call: false,
                is_op_call: false,
                has_question_arg: c.has_question_arg,
                is_parenless: false,
                actuals,
            };
            if !self.scope_only {
                let result =
                    call::resolve_call(self.ctx, Some(id), &ci, self.scope, self.poi_scope, None);
                self.poi_info.accumulate(&result.poi_info);
                if result.expr_type.has_type() && !result.expr_type.is_erroneous() {
                    inner = result.expr_type;
                }
            }
        } else {
            for &actual in &c.actuals {
                self.traverse(actual);
            }
        }

        let qt = self.new_expr_type(id, inner);
        self.set_result(id, qt);
        qt
    }

    fn new_expr_type(&mut self, id: AstId, inner: QualifiedType) -> QualifiedType {
        if self.scope_only {
            return self.ctx.unknown_qt();
        }
        if !inner.is_type() || !inner.has_type() {
            if !inner.is_erroneous() {
                self.ctx.error(id, "'new' requires a type expression");
            }
            return self.ctx.erroneous();
        }
        let t = inner.type_id();
        match self.ctx.types.key(t) {
            // `new C()` defaults to owned management
            TypeKey::BasicClass(_) => {
                let owned = self.ctx.types.any_bound(AnyBoundKind::Owned);
                let ct = self
                    .ctx
                    .types
                    .class_type(t, Some(owned), ClassDecorator::new(
                        crate::types::Management::Managed,
                        crate::types::Nilability::NonNil,
                    ));
                QualifiedType::var(ct)
            }
            TypeKey::Class(_) => {
                let shape = self.ctx.types.class_shape(t);
                match shape {
                    Some(s) if s.decorator.is_generic() => {
                        let owned = self.ctx.types.any_bound(AnyBoundKind::Owned);
                        let ct = self.ctx.types.class_type(
                            s.manageable,
                            Some(owned),
                            ClassDecorator::new(
                                crate::types::Management::Managed,
                                crate::types::Nilability::NonNil,
                            ),
                        );
                        QualifiedType::var(ct)
                    }
                    _ => QualifiedType::var(t),
                }
            }
            TypeKey::Composite(_) => QualifiedType::var(t),
            _ => {
                self.ctx.error(id, "invalid use of 'new'");
                self.ctx.erroneous()
            }
        }
    }
}

fn storage_qualifier(storage: VarStorage) -> Qualifier {
    match storage {
        VarStorage::Var => Qualifier::Var,
        VarStorage::Const => Qualifier::ConstVar,
        VarStorage::Type => Qualifier::Type,
        VarStorage::Param => Qualifier::Param,
    }
}

fn intent_qualifier(intent: FormalIntent) -> Qualifier {
    match intent {
        FormalIntent::Default => Qualifier::Unknown,
        FormalIntent::In => Qualifier::In,
        FormalIntent::ConstIn => Qualifier::ConstIn,
        FormalIntent::Out => Qualifier::Out,
        FormalIntent::Inout => Qualifier::Inout,
        FormalIntent::Ref => Qualifier::Ref,
        FormalIntent::ConstRef => Qualifier::ConstRef,
        FormalIntent::Type => Qualifier::Type,
        FormalIntent::Param => Qualifier::Param,
    }
}

/// Types reachable by name without any declaration in scope.
pub fn type_for_builtin(ctx: &Context, name: Atom) -> Option<QualifiedType> {
    let s = ctx.name_of(name);
    let types = &ctx.types;
    let t = match s.as_str() {
        "bool" => TypeId::BOOL,
        "int" => types.int_type(0),
        "uint" => types.uint_type(0),
        "real" => types.real_type(0),
        "imag" => types.imag_type(0),
        "complex" => types.complex_type(0),
        "string" => TypeId::STRING,
        "bytes" => TypeId::BYTES,
        "c_string" => TypeId::C_STRING,
        "void" => TypeId::VOID,
        "owned" => types.any_bound(AnyBoundKind::Owned),
        "shared" => types.any_bound(AnyBoundKind::Shared),
        "borrowed" => types.class_type(
            types.any_bound(AnyBoundKind::Class),
            None,
            ClassDecorator::new(crate::types::Management::Borrowed, crate::types::Nilability::Generic),
        ),
        "unmanaged" => types.class_type(
            types.any_bound(AnyBoundKind::Class),
            None,
            ClassDecorator::new(crate::types::Management::Unmanaged, crate::types::Nilability::Generic),
        ),
        "c_ptr" => types.c_ptr_type(None),
        "domain" | "_domain" => types.generic_domain_type(),
        _ => return None,
    };
    Some(QualifiedType::type_(t))
}

/// The qualified type of a module-level declaration.
pub fn type_for_module_level_symbol(ctx: &Context, id: AstId) -> QualifiedType {
    let revision = ctx.revision();
    match ctx
        .queries
        .type_for_module_level_symbol
        .begin(revision, id)
    {
        QueryStatus::Cached(qt) => return qt,
        QueryStatus::AlreadyRunning => return ctx.unknown_qt(),
        QueryStatus::Started => {}
    }

    let result = if id.post_order >= 0 {
        // value declaration: read it out of the resolved statement
        let stmt = module_stmt_containing(ctx, id);
        let resolved = super::functions::resolve_module_stmt(ctx, stmt);
        resolved
            .by_id_or_null(id)
            .map(|re| re.type_())
            .unwrap_or_default()
    } else {
        match ctx.program().id_to_tag(id) {
            Some(tag) if tag.is_type_decl() => {
                QualifiedType::type_(super::functions::initial_type_for_type_decl(ctx, id))
            }
            Some(AstTag::Module) => QualifiedType::new(Qualifier::Module, TypeId::NONE),
            Some(AstTag::Function) => QualifiedType::new(
                if ctx.program().id_is_parenless_function(id) {
                    Qualifier::ParenlessFunction
                } else {
                    Qualifier::Function
                },
                TypeId::NONE,
            ),
            _ => QualifiedType::unknown(),
        }
    };

    ctx.queries
        .type_for_module_level_symbol
        .end(revision, id, result)
}

/// The outermost non-symbol ancestor of `id`: the module statement that
/// contains it.
pub fn module_stmt_containing(ctx: &Context, id: AstId) -> AstId {
    let mut cur = id;
    while let Some(parent) = ctx.program().id_to_parent_id(cur) {
        if parent.is_symbol_defining() {
            break;
        }
        cur = parent;
    }
    cur
}
