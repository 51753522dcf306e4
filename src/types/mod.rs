//! Type representation for the resolution core.
//!
//! Types are represented as lightweight `TypeId` handles that point into
//! an interning table. The actual structure is stored in `TypeKey`.
//! Equality of handles is equality of types: the interner guarantees that
//! structurally identical keys receive the same id.

mod intern;

pub use intern::TypeInterner;

use crate::ast::AstId;
use crate::interner::Atom;
use serde::Serialize;

/// A lightweight handle to an interned type.
/// Equality check is O(1) - just compare the u32 values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Internal placeholder - no valid type. Distinct from `UNKNOWN`:
    /// `NONE` marks "no type expression at all" (e.g. the use-the-default
    /// actual sentinel), `UNKNOWN` is a resolved-but-undetermined type.
    pub const NONE: TypeId = TypeId(0);

    /// Error sentinel - resolution failed and an error was reported.
    /// Propagates through operations to prevent cascading errors.
    pub const ERRONEOUS: TypeId = TypeId(1);

    /// A type that is not yet known; silences secondary errors without
    /// implying one was reported.
    pub const UNKNOWN: TypeId = TypeId(2);

    /// The unit type of statements and value-less returns.
    pub const VOID: TypeId = TypeId(3);

    pub const BOOL: TypeId = TypeId(4);
    pub const STRING: TypeId = TypeId(5);
    pub const BYTES: TypeId = TypeId(6);
    pub const C_STRING: TypeId = TypeId(7);

    /// The fully-generic type variable written `?`.
    pub const ANY: TypeId = TypeId(8);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_erroneous(self) -> bool {
        self == Self::ERRONEOUS
    }

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

/// Generic upper bounds usable as formal annotations and for partial type
/// construction (`int(?)`, `owned(?)`, ...).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AnyBoundKind {
    Class,
    Owned,
    Shared,
    Int,
    Uint,
    Real,
    Imag,
    Complex,
}

/// How concrete a type is. `MaybeGeneric` means the answer requires field
/// resolution and is computed by the genericity query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Genericity {
    Concrete,
    Generic,
    GenericWithDefaults,
    MaybeGeneric,
}

/// Class management.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Management {
    Borrowed,
    Unmanaged,
    Managed,
    Generic,
}

/// Class nilability.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Nilability {
    NonNil,
    Nilable,
    Generic,
}

/// The management/nilability decorator on a class type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassDecorator {
    pub management: Management,
    pub nilability: Nilability,
}

impl ClassDecorator {
    pub const fn new(management: Management, nilability: Nilability) -> Self {
        ClassDecorator {
            management,
            nilability,
        }
    }

    pub const fn borrowed() -> Self {
        Self::new(Management::Borrowed, Nilability::NonNil)
    }

    pub const fn unmanaged() -> Self {
        Self::new(Management::Unmanaged, Nilability::NonNil)
    }

    pub const fn managed() -> Self {
        Self::new(Management::Managed, Nilability::NonNil)
    }

    pub const fn generic() -> Self {
        Self::new(Management::Generic, Nilability::Generic)
    }

    pub const fn generic_nonnil() -> Self {
        Self::new(Management::Generic, Nilability::NonNil)
    }

    pub fn is_managed(self) -> bool {
        self.management == Management::Managed
    }

    pub fn is_nilable(self) -> bool {
        self.nilability == Nilability::Nilable
    }

    pub fn is_non_nil(self) -> bool {
        self.nilability == Nilability::NonNil
    }

    pub fn is_generic(self) -> bool {
        self.management == Management::Generic || self.nilability == Nilability::Generic
    }

    pub fn add_nilable(self) -> Self {
        ClassDecorator {
            management: self.management,
            nilability: Nilability::Nilable,
        }
    }

    pub fn add_non_nil(self) -> Self {
        ClassDecorator {
            management: self.management,
            nilability: Nilability::NonNil,
        }
    }

    /// Combine a formal's decorator with an actual's: management comes from
    /// whichever side is concrete, nilability from the more specific side.
    /// Conflicting concrete sides are resolved in the formal's favor; the
    /// pass/no-pass decision was already made by `can_pass`.
    pub fn combine(self, actual: ClassDecorator) -> ClassDecorator {
        let management = if self.management == Management::Generic {
            actual.management
        } else {
            self.management
        };
        let nilability = if self.nilability == Nilability::Generic {
            actual.nilability
        } else {
            self.nilability
        };
        ClassDecorator {
            management,
            nilability,
        }
    }
}

/// Which kind of composite a `CompositeShape` describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompositeKind {
    Record,
    Union,
    Class,
}

/// A record, union, or basic (undecorated) class type, possibly an
/// instantiation of a generic declaration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompositeShape {
    pub kind: CompositeKind,
    pub decl_id: AstId,
    pub name: Atom,
    /// Parent class type (a `BasicClass`); only for `CompositeKind::Class`.
    pub parent: Option<TypeId>,
    /// Field substitutions this instantiation was built with.
    pub substitutions: SubstitutionsMap,
    /// The uninstantiated type this was instantiated from.
    pub instantiated_from: Option<TypeId>,
}

/// Tuple type: explicit elements, or a star element with a possibly-unknown
/// count, referential or value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TupleShape {
    /// Explicit element types; empty when `star` is set.
    pub elements: Vec<QualifiedType>,
    /// Star element type for `count * T` tuples and vararg tuples.
    pub star: Option<QualifiedType>,
    /// Element count; `None` for unknown-size star tuples.
    pub size: Option<u32>,
    pub referential: bool,
    pub is_vararg: bool,
}

impl TupleShape {
    pub fn is_known_size(&self) -> bool {
        self.size.is_some()
    }

    pub fn num_elements(&self) -> usize {
        match self.size {
            Some(n) => n as usize,
            None => self.elements.len(),
        }
    }

    /// The element type at `i`, looking through the star type.
    pub fn element(&self, i: usize) -> Option<QualifiedType> {
        if let Some(star) = self.star {
            if self.size.is_none() || i < self.num_elements() {
                return Some(star);
            }
            return None;
        }
        self.elements.get(i).copied()
    }
}

/// Domain type. Partially generic domains are not supported: a domain is
/// either the generic `domain` or a rectangular domain of known rank.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DomainShape {
    Unknown,
    Rectangular { rank: i64, idx_type: TypeId },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassShape {
    /// The manageable type: a `BasicClass` or `ANY_CLASS`.
    pub manageable: TypeId,
    /// Manager bound for managed decorators (`ANY_OWNED` / `ANY_SHARED`).
    pub manager: Option<TypeId>,
    pub decorator: ClassDecorator,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumShape {
    pub decl_id: AstId,
    pub name: Atom,
}

/// The structural "shape" of a type. This is the key used for interning -
/// structurally identical types have the same TypeKey and therefore the
/// same TypeId.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Erroneous,
    Unknown,
    Void,
    Bool,
    Int(u16),
    Uint(u16),
    Real(u16),
    Imag(u16),
    Complex(u16),
    StringType,
    Bytes,
    CString,
    /// The fully-generic type variable `?`.
    AnyType,
    AnyBound(AnyBoundKind),
    Tuple(u32),
    /// Record or union.
    Composite(u32),
    /// Undecorated (manageable) class.
    BasicClass(u32),
    /// Decorated class.
    Class(u32),
    /// `c_ptr(T)`; `None` is the generic `c_ptr`.
    CPtr(Option<TypeId>),
    Domain(u32),
    Array { domain: TypeId, elt: TypeId },
    Enum(u32),
}

impl TypeKey {
    /// Genericity decidable from the key alone. `MaybeGeneric` answers are
    /// refined by the genericity query using resolved fields.
    pub fn shallow_genericity(&self) -> Genericity {
        match self {
            TypeKey::Erroneous
            | TypeKey::Void
            | TypeKey::Bool
            | TypeKey::Int(_)
            | TypeKey::Uint(_)
            | TypeKey::Real(_)
            | TypeKey::Imag(_)
            | TypeKey::Complex(_)
            | TypeKey::StringType
            | TypeKey::Bytes
            | TypeKey::CString
            | TypeKey::Enum(_) => Genericity::Concrete,
            TypeKey::Unknown => Genericity::MaybeGeneric,
            TypeKey::AnyType | TypeKey::AnyBound(_) => Genericity::Generic,
            TypeKey::CPtr(None) => Genericity::Generic,
            TypeKey::CPtr(Some(_)) => Genericity::MaybeGeneric,
            TypeKey::Tuple(_)
            | TypeKey::Composite(_)
            | TypeKey::BasicClass(_)
            | TypeKey::Array { .. } => Genericity::MaybeGeneric,
            TypeKey::Class(_) => Genericity::MaybeGeneric,
            TypeKey::Domain(_) => Genericity::MaybeGeneric,
        }
    }
}

/// A compile-time constant value tagged by its type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
}

impl ParamValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uint(self) -> Option<u64> {
        match self {
            ParamValue::Uint(v) => Some(v),
            _ => None,
        }
    }

    /// Integral value viewed as a count, if non-negative.
    pub fn as_count(self) -> Option<u64> {
        match self {
            ParamValue::Int(v) if v >= 0 => Some(v as u64),
            ParamValue::Uint(v) => Some(v),
            _ => None,
        }
    }
}

/// Storage class / intent paired with a type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Qualifier {
    Unknown,
    Var,
    ConstVar,
    Ref,
    ConstRef,
    RefMaybeConst,
    In,
    ConstIn,
    Out,
    Inout,
    Type,
    Param,
    ParenlessFunction,
    Function,
    Module,
}

impl Qualifier {
    pub fn is_const(self) -> bool {
        matches!(
            self,
            Qualifier::ConstVar | Qualifier::ConstRef | Qualifier::ConstIn | Qualifier::Param
        )
    }

    pub fn is_ref(self) -> bool {
        matches!(self, Qualifier::Ref | Qualifier::ConstRef | Qualifier::RefMaybeConst)
    }
}

/// A type paired with a kind and, for compile-time constants, a param
/// value. Equality is structural over all three fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct QualifiedType {
    qualifier: Qualifier,
    ty: TypeId,
    param: Option<ParamValue>,
}

impl QualifiedType {
    pub fn new(qualifier: Qualifier, ty: TypeId) -> Self {
        QualifiedType {
            qualifier,
            ty,
            param: None,
        }
    }

    pub fn with_param(qualifier: Qualifier, ty: TypeId, param: Option<ParamValue>) -> Self {
        let param = if qualifier == Qualifier::Param { param } else { None };
        QualifiedType {
            qualifier,
            ty,
            param,
        }
    }

    pub fn type_(ty: TypeId) -> Self {
        Self::new(Qualifier::Type, ty)
    }

    pub fn param_(ty: TypeId, value: ParamValue) -> Self {
        Self::with_param(Qualifier::Param, ty, Some(value))
    }

    /// Generic param: the value is not yet known.
    pub fn param_unvalued(ty: TypeId) -> Self {
        QualifiedType {
            qualifier: Qualifier::Param,
            ty,
            param: None,
        }
    }

    pub fn unknown() -> Self {
        QualifiedType {
            qualifier: Qualifier::Unknown,
            ty: TypeId::NONE,
            param: None,
        }
    }

    pub fn var(ty: TypeId) -> Self {
        Self::new(Qualifier::Var, ty)
    }

    pub fn qualifier(&self) -> Qualifier {
        self.qualifier
    }

    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    pub fn param(&self) -> Option<ParamValue> {
        self.param
    }

    pub fn has_type(&self) -> bool {
        !self.ty.is_none()
    }

    pub fn has_param(&self) -> bool {
        self.param.is_some()
    }

    pub fn is_type(&self) -> bool {
        self.qualifier == Qualifier::Type
    }

    pub fn is_param(&self) -> bool {
        self.qualifier == Qualifier::Param
    }

    /// True when no useful type information is available.
    pub fn is_unknown(&self) -> bool {
        self.ty.is_none() || self.ty.is_unknown()
    }

    pub fn is_erroneous(&self) -> bool {
        self.ty.is_erroneous()
    }

    /// The "use the default value" sentinel produced for an absent actual.
    pub fn is_use_default_hint(&self) -> bool {
        self.qualifier == Qualifier::Unknown && self.ty.is_none()
    }

    pub fn is_param_true(&self) -> bool {
        self.is_param() && self.param == Some(ParamValue::Bool(true))
    }

    pub fn is_param_false(&self) -> bool {
        self.is_param() && self.param == Some(ParamValue::Bool(false))
    }

    pub fn with_qualifier(&self, qualifier: Qualifier) -> Self {
        QualifiedType {
            qualifier,
            ty: self.ty,
            param: self.param,
        }
    }

    pub fn with_type(&self, ty: TypeId) -> Self {
        QualifiedType {
            qualifier: self.qualifier,
            ty,
            param: self.param,
        }
    }

    /// Genericity decidable without resolving fields.
    pub fn shallow_genericity(&self, types: &TypeInterner) -> Genericity {
        match self.qualifier {
            Qualifier::Unknown => return Genericity::MaybeGeneric,
            // a param without a value still needs instantiation
            Qualifier::Param if self.param.is_none() => return Genericity::Generic,
            _ => {}
        }
        if !self.has_type() {
            return Genericity::MaybeGeneric;
        }
        types.key(self.ty).shallow_genericity()
    }
}

impl Default for QualifiedType {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Finite mapping from formal-decl ids to qualified types. Kept sorted so
/// the map can participate in interning keys; empty means "identity".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct SubstitutionsMap {
    entries: Vec<(AstId, QualifiedType)>,
}

impl SubstitutionsMap {
    pub fn new() -> Self {
        SubstitutionsMap::default()
    }

    pub fn insert(&mut self, decl: AstId, qt: QualifiedType) {
        match self.entries.binary_search_by_key(&decl, |(id, _)| *id) {
            Ok(i) => self.entries[i].1 = qt,
            Err(i) => self.entries.insert(i, (decl, qt)),
        }
    }

    pub fn get(&self, decl: AstId) -> Option<QualifiedType> {
        self.entries
            .binary_search_by_key(&decl, |(id, _)| *id)
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn contains(&self, decl: AstId) -> bool {
        self.get(decl).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AstId, QualifiedType)> {
        self.entries.iter()
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
