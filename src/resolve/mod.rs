//! The semantic resolution core.
//!
//! Given the symbol-bound AST, assigns every expression a fully-determined
//! qualified type and resolves every call site to its unique callee,
//! performing overload resolution, generic instantiation, and
//! type-constructor elaboration. Everything here is a query over the
//! context: equal inputs in the same revision produce the same results.

pub mod call;
pub mod can_pass;
pub mod candidates;
pub mod fields;
pub mod functions;
pub mod genericity;
pub mod instantiate;
pub mod most_specific;
pub mod poi;
pub mod resolver;
pub mod sig;

use crate::ast::AstId;
use crate::interner::Atom;
use crate::types::{QualifiedType, TypeId};
use self::poi::{PoiInfo, PoiScopeId};
use self::sig::SigId;
use smallvec::SmallVec;

/// How field default initializers are treated while resolving a
/// composite's fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DefaultsPolicy {
    /// Treat default initializers as absent; a field with no declared
    /// type is generic.
    IgnoreDefaults,
    /// When resolving field `f`, use defaults for every field except `f`.
    UseDefaultsOtherFields,
    /// Use all defaults.
    UseDefaults,
}

/// One actual argument of a call: its type and, for named arguments, the
/// formal name it binds to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallInfoActual {
    pub qt: QualifiedType,
    pub by_name: Atom,
}

impl CallInfoActual {
    pub fn new(qt: QualifiedType) -> Self {
        CallInfoActual {
            qt,
            by_name: Atom::NONE,
        }
    }

    pub fn named(qt: QualifiedType, name: Atom) -> Self {
        CallInfoActual { qt, by_name: name }
    }
}

/// Everything call resolution needs to know about a call site, independent
/// of the AST node it came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallInfo {
    pub name: Atom,
    /// Type of the called expression; a `Type`-kinded value routes the
    /// call through type construction.
    pub called_type: QualifiedType,
    pub is_method_call: bool,
    pub is_op_call: bool,
    pub has_question_arg: bool,
    pub is_parenless: bool,
    /// For method calls the receiver is `actuals[0]`, named `this`.
    pub actuals: Vec<CallInfoActual>,
}

impl CallInfo {
    pub fn new(name: Atom, actuals: Vec<CallInfoActual>) -> Self {
        CallInfo {
            name,
            called_type: QualifiedType::unknown(),
            is_method_call: false,
            is_op_call: false,
            has_question_arg: false,
            is_parenless: false,
            actuals,
        }
    }

    pub fn num_actuals(&self) -> usize {
        self.actuals.len()
    }

    pub fn actual(&self, i: usize) -> &CallInfoActual {
        &self.actuals[i]
    }

    /// The receiver type for a method call.
    pub fn receiver_type(&self) -> Option<QualifiedType> {
        if self.is_method_call {
            self.actuals.first().map(|a| a.qt)
        } else {
            None
        }
    }

    /// Rebuild `ci` as a method call on `receiver` (used for implicit
    /// receivers and forwarding), optionally renaming the call.
    pub fn with_receiver(
        &self,
        this_name: Atom,
        receiver: QualifiedType,
        rename: Option<Atom>,
    ) -> CallInfo {
        let mut actuals = Vec::with_capacity(self.actuals.len() + 1);
        actuals.push(CallInfoActual::named(receiver, this_name));
        let skip = usize::from(self.is_method_call);
        actuals.extend(self.actuals.iter().skip(skip).cloned());
        CallInfo {
            name: rename.unwrap_or(self.name),
            called_type: receiver,
            is_method_call: true,
            is_op_call: false,
            has_question_arg: self.has_question_arg,
            is_parenless: self.is_parenless,
            actuals,
        }
    }
}

/// Why a candidate was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CandidateFailureReason {
    /// Arity or argument naming prevented building a formal-actual map.
    FormalActualMismatch,
    /// `can_pass` rejected an actual.
    TypeMismatch,
    /// Vararg count did not match.
    VarargMismatch,
    /// The where clause evaluated to `param false`.
    WhereClauseFalse,
    /// A paren-less call named something that is not a paren-less routine
    /// or a field.
    ParenlessMismatch,
    /// Everything else: method-ness mismatch, non-candidate declarations.
    Other,
}

/// Result of checking one candidate against a call: the (possibly
/// instantiated) candidate on success, or a typed rejection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ApplicabilityResult {
    candidate: Option<SigId>,
    /// Declaration the result refers to, for diagnostics.
    pub id: AstId,
    pub reason: Option<CandidateFailureReason>,
    /// Index of the formal that failed, when known.
    pub formal_idx: Option<usize>,
}

impl ApplicabilityResult {
    pub fn success(candidate: SigId) -> Self {
        ApplicabilityResult {
            candidate: Some(candidate),
            id: AstId::NONE,
            reason: None,
            formal_idx: None,
        }
    }

    pub fn failure(id: AstId, reason: CandidateFailureReason, formal_idx: Option<usize>) -> Self {
        ApplicabilityResult {
            candidate: None,
            id,
            reason: Some(reason),
            formal_idx,
        }
    }

    pub fn is_success(&self) -> bool {
        self.candidate.is_some()
    }

    pub fn candidate(&self) -> Option<SigId> {
        self.candidate
    }
}

/// One selected candidate, with the receiver type actually passed when the
/// candidate was reached through forwarding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MostSpecificCandidate {
    pub sig: SigId,
    pub forwarding_to: Option<QualifiedType>,
}

/// Outcome of disambiguation: up to one best candidate per return intent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MostSpecificCandidates {
    best: SmallVec<[MostSpecificCandidate; 1]>,
    ambiguous: bool,
}

impl MostSpecificCandidates {
    pub fn empty() -> Self {
        MostSpecificCandidates::default()
    }

    pub fn ambiguous() -> Self {
        MostSpecificCandidates {
            best: SmallVec::new(),
            ambiguous: true,
        }
    }

    pub fn one(candidate: MostSpecificCandidate) -> Self {
        let mut best = SmallVec::new();
        best.push(candidate);
        MostSpecificCandidates {
            best,
            ambiguous: false,
        }
    }

    pub fn several(candidates: Vec<MostSpecificCandidate>) -> Self {
        MostSpecificCandidates {
            best: candidates.into(),
            ambiguous: false,
        }
    }

    pub fn found_candidates(&self) -> bool {
        !self.ambiguous && !self.best.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    pub fn num_best(&self) -> usize {
        self.best.len()
    }

    pub fn only(&self) -> Option<MostSpecificCandidate> {
        if self.best.len() == 1 {
            Some(self.best[0])
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MostSpecificCandidate> {
        self.best.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MostSpecificCandidate> {
        self.best.iter_mut()
    }
}

/// Result of resolving one call.
#[derive(Clone, Debug, Default)]
pub struct CallResolutionResult {
    pub most_specific: MostSpecificCandidates,
    pub expr_type: QualifiedType,
    pub poi_info: PoiInfo,
}

impl CallResolutionResult {
    pub fn from_type(expr_type: QualifiedType) -> Self {
        CallResolutionResult {
            most_specific: MostSpecificCandidates::empty(),
            expr_type,
            poi_info: PoiInfo::default(),
        }
    }
}

/// Per-AST-node resolution result.
#[derive(Clone, Debug, Default)]
pub struct ResolvedExpression {
    qt: QualifiedType,
    most_specific: MostSpecificCandidates,
    poi_scope: Option<PoiScopeId>,
    /// Declaration an identifier refers to; set by scope resolution.
    to_id: AstId,
}

impl ResolvedExpression {
    pub fn type_(&self) -> QualifiedType {
        self.qt
    }

    pub fn set_type(&mut self, qt: QualifiedType) {
        self.qt = qt;
    }

    pub fn most_specific(&self) -> &MostSpecificCandidates {
        &self.most_specific
    }

    pub fn set_most_specific(&mut self, ms: MostSpecificCandidates) {
        self.most_specific = ms;
    }

    pub fn poi_scope(&self) -> Option<PoiScopeId> {
        self.poi_scope
    }

    pub fn set_poi_scope(&mut self, poi: Option<PoiScopeId>) {
        self.poi_scope = poi;
    }

    pub fn to_id(&self) -> AstId {
        self.to_id
    }

    pub fn set_to_id(&mut self, id: AstId) {
        self.to_id = id;
    }
}

/// Dense per-symbol resolution results, indexed by post-order id.
#[derive(Clone, Debug, Default)]
pub struct ResolutionResultByPostorderID {
    symbol: AstId,
    results: Vec<ResolvedExpression>,
}

impl ResolutionResultByPostorderID {
    pub fn new() -> Self {
        ResolutionResultByPostorderID::default()
    }

    /// Size the array for everything contained in `symbol`.
    pub fn setup_for_symbol(&mut self, symbol: AstId, contained: u32) {
        self.symbol = AstId::new(symbol.symbol, -1);
        self.results = vec![ResolvedExpression::default(); contained as usize];
    }

    pub fn symbol(&self) -> AstId {
        self.symbol
    }

    pub fn has_id(&self, id: AstId) -> bool {
        id.symbol == self.symbol.symbol
            && id.post_order >= 0
            && (id.post_order as usize) < self.results.len()
    }

    pub fn by_id(&mut self, id: AstId) -> &mut ResolvedExpression {
        debug_assert!(id.post_order >= 0, "symbols have no postorder slot");
        if self.symbol.is_none() {
            self.symbol = AstId::new(id.symbol, -1);
        }
        let idx = id.post_order as usize;
        if idx >= self.results.len() {
            self.results.resize(idx + 1, ResolvedExpression::default());
        }
        &mut self.results[idx]
    }

    pub fn by_id_or_null(&self, id: AstId) -> Option<&ResolvedExpression> {
        if !self.has_id(id) {
            return None;
        }
        self.results.get(id.post_order as usize)
    }
}

/// One resolved field of a composite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: Atom,
    pub has_default_value: bool,
    pub decl_id: AstId,
    pub qt: QualifiedType,
}

/// One forwarding declaration of a composite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardingInfo {
    pub decl_id: AstId,
    pub to_type: QualifiedType,
}

/// Resolved fields and forwardings of one composite type, with cached
/// genericity summary flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedFields {
    type_id: TypeId,
    fields: Vec<FieldInfo>,
    forwardings: Vec<ForwardingInfo>,
    is_generic: bool,
    is_generic_with_defaults: bool,
}

impl ResolvedFields {
    pub fn set_type(&mut self, type_id: TypeId) {
        self.type_id = type_id;
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn add_field(&mut self, name: Atom, has_default_value: bool, decl_id: AstId, qt: QualifiedType) {
        self.fields.push(FieldInfo {
            name,
            has_default_value,
            decl_id,
            qt,
        });
    }

    pub fn add_forwarding(&mut self, decl_id: AstId, to_type: QualifiedType) {
        self.forwardings.push(ForwardingInfo { decl_id, to_type });
    }

    pub fn add_forwardings_from(&mut self, other: &ResolvedFields) {
        self.forwardings.extend(other.forwardings.iter().cloned());
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, i: usize) -> &FieldInfo {
        &self.fields[i]
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn num_forwards(&self) -> usize {
        self.forwardings.len()
    }

    pub fn forwarding_to_type(&self, i: usize) -> QualifiedType {
        self.forwardings[i].to_type
    }

    pub fn forwardings(&self) -> &[ForwardingInfo] {
        &self.forwardings
    }

    pub fn is_generic(&self) -> bool {
        self.is_generic
    }

    pub fn is_generic_with_defaults(&self) -> bool {
        self.is_generic_with_defaults
    }

    pub(crate) fn set_summary(&mut self, is_generic: bool, is_generic_with_defaults: bool) {
        self.is_generic = is_generic;
        self.is_generic_with_defaults = is_generic_with_defaults;
    }
}

/// A function with a fully resolved body.
#[derive(Clone, Debug)]
pub struct ResolvedFunction {
    pub signature: SigId,
    pub resolution_by_id: ResolutionResultByPostorderID,
    pub poi_info: PoiInfo,
    pub return_type: QualifiedType,
}
