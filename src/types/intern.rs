//! Type interning for structural deduplication.
//!
//! Converts `TypeKey` structures into lightweight `TypeId` handles so that
//! type equality is a `u32` compare and types can appear inside other
//! interned keys (signatures, substitution maps).

use super::*;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

struct ValueInterner<T> {
    items: Vec<Arc<T>>,
    map: FxHashMap<Arc<T>, u32>,
}

impl<T> ValueInterner<T>
where
    T: Eq + Hash,
{
    fn new() -> Self {
        ValueInterner {
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

    fn get(&self, id: u32) -> Option<Arc<T>> {
        self.items.get(id as usize).cloned()
    }
}

struct KeyTable {
    key_to_id: FxHashMap<TypeKey, TypeId>,
    id_to_key: Vec<TypeKey>,
}

/// Type interning table.
pub struct TypeInterner {
    keys: RwLock<KeyTable>,
    tuple_shapes: RwLock<ValueInterner<TupleShape>>,
    composite_shapes: RwLock<ValueInterner<CompositeShape>>,
    class_shapes: RwLock<ValueInterner<ClassShape>>,
    domain_shapes: RwLock<ValueInterner<DomainShape>>,
    enum_shapes: RwLock<ValueInterner<EnumShape>>,
}

impl TypeInterner {
    /// Create a new type interner with pre-registered intrinsics at the
    /// ids named by the `TypeId` constants.
    pub fn new() -> Self {
        let interner = TypeInterner {
            keys: RwLock::new(KeyTable {
                key_to_id: FxHashMap::default(),
                // index 0 is the NONE placeholder
                id_to_key: vec![TypeKey::Unknown],
            }),
            tuple_shapes: RwLock::new(ValueInterner::new()),
            composite_shapes: RwLock::new(ValueInterner::new()),
            class_shapes: RwLock::new(ValueInterner::new()),
            domain_shapes: RwLock::new(ValueInterner::new()),
            enum_shapes: RwLock::new(ValueInterner::new()),
        };
        let intrinsics = [
            (TypeKey::Erroneous, TypeId::ERRONEOUS),
            (TypeKey::Unknown, TypeId::UNKNOWN),
            (TypeKey::Void, TypeId::VOID),
            (TypeKey::Bool, TypeId::BOOL),
            (TypeKey::StringType, TypeId::STRING),
            (TypeKey::Bytes, TypeId::BYTES),
            (TypeKey::CString, TypeId::C_STRING),
            (TypeKey::AnyType, TypeId::ANY),
        ];
        for (key, expected) in intrinsics {
            let got = interner.intern(key);
            debug_assert_eq!(got, expected, "intrinsic interned out of order");
        }
        interner
    }

    pub fn intern(&self, key: TypeKey) -> TypeId {
        {
            let table = self.keys.read().expect("type interner lock poisoned");
            if let Some(&id) = table.key_to_id.get(&key) {
                return id;
            }
        }
        let mut table = self.keys.write().expect("type interner lock poisoned");
        if let Some(&id) = table.key_to_id.get(&key) {
            return id;
        }
        let id = TypeId(table.id_to_key.len() as u32);
        table.id_to_key.push(key.clone());
        table.key_to_id.insert(key, id);
        id
    }

    /// The structural key for an id. `NONE` and out-of-range ids resolve
    /// to the `Unknown` key so lookups never panic.
    pub fn key(&self, id: TypeId) -> TypeKey {
        let table = self.keys.read().expect("type interner lock poisoned");
        table
            .id_to_key
            .get(id.0 as usize)
            .cloned()
            .unwrap_or(TypeKey::Unknown)
    }

    // =========================================================================
    // Primitive constructors
    // =========================================================================

    /// `int(w)`; width 0 selects the default width.
    pub fn int_type(&self, width: u16) -> TypeId {
        self.intern(TypeKey::Int(if width == 0 { 64 } else { width }))
    }

    pub fn uint_type(&self, width: u16) -> TypeId {
        self.intern(TypeKey::Uint(if width == 0 { 64 } else { width }))
    }

    pub fn real_type(&self, width: u16) -> TypeId {
        self.intern(TypeKey::Real(if width == 0 { 64 } else { width }))
    }

    pub fn imag_type(&self, width: u16) -> TypeId {
        self.intern(TypeKey::Imag(if width == 0 { 64 } else { width }))
    }

    pub fn complex_type(&self, width: u16) -> TypeId {
        self.intern(TypeKey::Complex(if width == 0 { 128 } else { width }))
    }

    pub fn any_bound(&self, kind: AnyBoundKind) -> TypeId {
        self.intern(TypeKey::AnyBound(kind))
    }

    pub fn c_ptr_type(&self, elt: Option<TypeId>) -> TypeId {
        self.intern(TypeKey::CPtr(elt))
    }

    // =========================================================================
    // Tuples
    // =========================================================================

    fn tuple_from_shape(&self, shape: TupleShape) -> TypeId {
        let id = {
            let mut shapes = self.tuple_shapes.write().expect("tuple shapes lock poisoned");
            shapes.intern(shape)
        };
        self.intern(TypeKey::Tuple(id))
    }

    pub fn value_tuple(&self, elements: Vec<TypeId>) -> TypeId {
        let n = elements.len() as u32;
        self.tuple_from_shape(TupleShape {
            elements: elements.into_iter().map(QualifiedType::var).collect(),
            star: None,
            size: Some(n),
            referential: false,
            is_vararg: false,
        })
    }

    pub fn referential_tuple(&self, elements: Vec<TypeId>) -> TypeId {
        let n = elements.len() as u32;
        self.tuple_from_shape(TupleShape {
            elements: elements.into_iter().map(QualifiedType::var).collect(),
            star: None,
            size: Some(n),
            referential: true,
            is_vararg: false,
        })
    }

    /// Vararg tuple with per-element qualified types.
    pub fn qualified_tuple(&self, elements: Vec<QualifiedType>) -> TypeId {
        let n = elements.len() as u32;
        self.tuple_from_shape(TupleShape {
            elements,
            star: None,
            size: Some(n),
            referential: false,
            is_vararg: true,
        })
    }

    /// `count * T` star tuple, or the unknown-size vararg tuple when
    /// `count` is `None`.
    pub fn star_tuple(&self, count: Option<u64>, star: QualifiedType, is_vararg: bool) -> TypeId {
        self.tuple_from_shape(TupleShape {
            elements: Vec::new(),
            star: Some(star),
            size: count.map(|c| c as u32),
            referential: false,
            is_vararg,
        })
    }

    pub fn tuple_shape(&self, id: TypeId) -> Option<Arc<TupleShape>> {
        match self.key(id) {
            TypeKey::Tuple(shape_id) => self
                .tuple_shapes
                .read()
                .expect("tuple shapes lock poisoned")
                .get(shape_id),
            _ => None,
        }
    }

    // =========================================================================
    // Composites, classes, enums
    // =========================================================================

    pub fn composite_type(&self, shape: CompositeShape) -> TypeId {
        let is_class = shape.kind == CompositeKind::Class;
        let id = {
            let mut shapes = self
                .composite_shapes
                .write()
                .expect("composite shapes lock poisoned");
            shapes.intern(shape)
        };
        self.intern(if is_class {
            TypeKey::BasicClass(id)
        } else {
            TypeKey::Composite(id)
        })
    }

    pub fn composite_shape(&self, id: TypeId) -> Option<Arc<CompositeShape>> {
        match self.key(id) {
            TypeKey::Composite(shape_id) | TypeKey::BasicClass(shape_id) => self
                .composite_shapes
                .read()
                .expect("composite shapes lock poisoned")
                .get(shape_id),
            _ => None,
        }
    }

    pub fn class_type(
        &self,
        manageable: TypeId,
        manager: Option<TypeId>,
        decorator: ClassDecorator,
    ) -> TypeId {
        let manager = if decorator.is_managed() { manager } else { None };
        let id = {
            let mut shapes = self.class_shapes.write().expect("class shapes lock poisoned");
            shapes.intern(ClassShape {
                manageable,
                manager,
                decorator,
            })
        };
        self.intern(TypeKey::Class(id))
    }

    pub fn class_shape(&self, id: TypeId) -> Option<Arc<ClassShape>> {
        match self.key(id) {
            TypeKey::Class(shape_id) => self
                .class_shapes
                .read()
                .expect("class shapes lock poisoned")
                .get(shape_id),
            _ => None,
        }
    }

    /// Same class with a different decorator.
    pub fn class_with_decorator(&self, id: TypeId, decorator: ClassDecorator) -> Option<TypeId> {
        let shape = self.class_shape(id)?;
        Some(self.class_type(shape.manageable, shape.manager, decorator))
    }

    pub fn enum_type(&self, decl_id: AstId, name: Atom) -> TypeId {
        let id = {
            let mut shapes = self.enum_shapes.write().expect("enum shapes lock poisoned");
            shapes.intern(EnumShape { decl_id, name })
        };
        self.intern(TypeKey::Enum(id))
    }

    pub fn enum_shape(&self, id: TypeId) -> Option<Arc<EnumShape>> {
        match self.key(id) {
            TypeKey::Enum(shape_id) => self
                .enum_shapes
                .read()
                .expect("enum shapes lock poisoned")
                .get(shape_id),
            _ => None,
        }
    }

    // =========================================================================
    // Domains and arrays
    // =========================================================================

    pub fn generic_domain_type(&self) -> TypeId {
        let id = {
            let mut shapes = self.domain_shapes.write().expect("domain shapes lock poisoned");
            shapes.intern(DomainShape::Unknown)
        };
        self.intern(TypeKey::Domain(id))
    }

    pub fn rectangular_domain_type(&self, rank: i64, idx_type: TypeId) -> TypeId {
        let id = {
            let mut shapes = self.domain_shapes.write().expect("domain shapes lock poisoned");
            shapes.intern(DomainShape::Rectangular { rank, idx_type })
        };
        self.intern(TypeKey::Domain(id))
    }

    pub fn domain_shape(&self, id: TypeId) -> Option<Arc<DomainShape>> {
        match self.key(id) {
            TypeKey::Domain(shape_id) => self
                .domain_shapes
                .read()
                .expect("domain shapes lock poisoned")
                .get(shape_id),
            _ => None,
        }
    }

    pub fn array_type(&self, domain: TypeId, elt: TypeId) -> TypeId {
        self.intern(TypeKey::Array { domain, elt })
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// The composite type behind `id`: itself for records/unions/basic
    /// classes, the manageable basic class for decorated classes.
    pub fn get_composite_type(&self, id: TypeId) -> Option<TypeId> {
        match self.key(id) {
            TypeKey::Composite(_) | TypeKey::BasicClass(_) => Some(id),
            TypeKey::Class(_) => {
                let shape = self.class_shape(id)?;
                match self.key(shape.manageable) {
                    TypeKey::BasicClass(_) => Some(shape.manageable),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        matches!(
            self.key(id),
            TypeKey::Int(_)
                | TypeKey::Uint(_)
                | TypeKey::Real(_)
                | TypeKey::Imag(_)
                | TypeKey::Complex(_)
        )
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}
