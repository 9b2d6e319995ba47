//! Class descriptors - per-class metadata supplied by the native side
//!
//! Shared across all instances of a class; immutable once registered.

use crate::anchor::ModuleId;
use crate::layout::TypeIdentity;
use crate::value::{Name, ValueCell, ValueKind};
use core::fmt;
use core::ops::BitOr;
use std::any::Any;
use std::sync::Arc;

/// Process-local opaque class identity. `ClassId::NONE` is never allocated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct ClassId(u32);

impl ClassId {
    pub const NONE: ClassId = ClassId(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// How instances of a class are allocated and kept alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AllocationStrategy {
    /// Value only; never allocated through the bridge
    None = 0,
    /// Single owner: one strong handle, no sharing, no weak handles
    StrongCounted = 1,
    /// Shared strong and weak counts
    RefCounted = 2,
}

impl AllocationStrategy {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::StrongCounted),
            2 => Some(Self::RefCounted),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        !matches!(self, Self::None)
    }

    #[inline]
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::RefCounted)
    }
}

/// Class flag bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassFlags(u8);

impl ClassFlags {
    pub const VALUE_TYPE: ClassFlags = ClassFlags(1 << 0);
    pub const REFERENCE_TYPE: ClassFlags = ClassFlags(1 << 1);
    pub const ENUM_TYPE: ClassFlags = ClassFlags(1 << 2);
    pub const ABSTRACT: ClassFlags = ClassFlags(1 << 3);
    pub const PLAIN_OLD_DATA: ClassFlags = ClassFlags(1 << 4);

    const ALL_BITS: u8 = 0b1_1111;

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    #[inline]
    pub const fn contains(self, other: ClassFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: ClassFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for ClassFlags {
    type Output = ClassFlags;

    fn bitor(self, rhs: Self) -> Self {
        ClassFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for ClassFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ClassFlags, &str); 5] = [
            (ClassFlags::VALUE_TYPE, "VALUE_TYPE"),
            (ClassFlags::REFERENCE_TYPE, "REFERENCE_TYPE"),
            (ClassFlags::ENUM_TYPE, "ENUM_TYPE"),
            (ClassFlags::ABSTRACT, "ABSTRACT"),
            (ClassFlags::PLAIN_OLD_DATA, "PLAIN_OLD_DATA"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ClassFlags({})", set.join(" | "))
    }
}

/// Native method entry point: contiguous argument cells (`this` first for
/// instance methods), their count, and the result cell to fill.
/// Returns `false` on failure, in which case `out` is not interpreted.
pub type NativeEntry =
    unsafe extern "C" fn(args: *const ValueCell, len: usize, out: *mut ValueCell) -> bool;

/// Destructor for an instance or value payload
pub type DestroyFn = unsafe extern "C" fn(payload: *mut u8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: Name,
    pub offset: usize,
    pub kind: ValueKind,
    /// Class of object/struct fields
    pub class: Option<ClassId>,
}

#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: Name,
    pub params: Vec<ValueKind>,
    /// `ValueKind::Null` for methods that return nothing
    pub returns: ValueKind,
    pub is_static: bool,
    pub entry: Option<NativeEntry>,
}

/// How well an argument list matches a parameter list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParamMatch {
    None,
    Widening,
    Exact,
}

impl MethodDescriptor {
    pub fn new(name: &str, params: &[ValueKind], returns: ValueKind) -> Self {
        Self {
            name: Name::intern(name),
            params: params.to_vec(),
            returns,
            is_static: false,
            entry: None,
        }
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_entry(mut self, entry: NativeEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Declared parameter count, not counting `this`
    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Match argument kinds against parameters.
    ///
    /// Null arguments match reference-like parameters (object, struct, string,
    /// array, bytes) since scripts pass null for "no value".
    pub fn match_args(&self, args: &[ValueKind]) -> ParamMatch {
        if args.len() != self.params.len() {
            return ParamMatch::None;
        }

        let mut result = ParamMatch::Exact;
        for (&param, &arg) in self.params.iter().zip(args) {
            if param == arg {
                continue;
            }
            let null_ok = arg == ValueKind::Null && (param.is_reference() || param.owns_payload());
            if null_ok || arg.widens_to(param) {
                result = ParamMatch::Widening;
            } else {
                return ParamMatch::None;
            }
        }
        result
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("is_static", &self.is_static)
            .field("bound", &self.entry.is_some())
            .finish()
    }
}

/// Property modeled as getter/setter methods on the same class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: Name,
    pub getter: Option<Name>,
    pub setter: Option<Name>,
}

/// Shared owner of the code a class's entry points live in
pub type CodeHold = Arc<dyn Any + Send + Sync>;

/// Complete class metadata
#[derive(Clone)]
pub struct ClassDescriptor {
    pub id: ClassId,
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub properties: Vec<PropertyDescriptor>,
    pub allocation: AllocationStrategy,
    pub flags: ClassFlags,
    /// Module that registered the class; `None` for engine built-ins
    pub owner: Option<ModuleId>,
    /// Stable identity of synthesized value types
    pub identity: Option<TypeIdentity>,
    pub destroy: Option<DestroyFn>,
    /// Keeps `methods` and `destroy` mapped for as long as the class or
    /// any of its instances exist
    pub code: Option<CodeHold>,
}

impl ClassDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        let name = Name::lookup(name)?;
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        let name = Name::lookup(name)?;
        self.properties.iter().find(|p| p.name == name)
    }

    /// All overloads of a method, with their indices in the method table
    pub fn overloads<'a>(&'a self, name: &str) -> impl Iterator<Item = (usize, &'a MethodDescriptor)> + 'a {
        let name = Name::lookup(name);
        self.methods
            .iter()
            .enumerate()
            .filter(move |(_, m)| Some(m.name) == name)
    }

    /// Pick the overload for a set of argument kinds: an exact match wins,
    /// otherwise the first overload the arguments widen into.
    pub fn resolve_method(&self, name: &str, args: &[ValueKind]) -> Option<(usize, &MethodDescriptor)> {
        let mut fallback = None;
        for (index, method) in self.overloads(name) {
            match method.match_args(args) {
                ParamMatch::Exact => return Some((index, method)),
                ParamMatch::Widening if fallback.is_none() => fallback = Some((index, method)),
                _ => {}
            }
        }
        fallback
    }

    #[inline]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(ClassFlags::VALUE_TYPE)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("allocation", &self.allocation)
            .field("flags", &self.flags)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("owner", &self.owner)
            .field("pins_code", &self.code.is_some())
            .finish()
    }
}

/// Builder for class descriptors; the table assigns the id
#[derive(Clone)]
pub struct ClassBuilder {
    name: String,
    size: usize,
    align: usize,
    fields: Vec<FieldDescriptor>,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    allocation: AllocationStrategy,
    flags: ClassFlags,
    owner: Option<ModuleId>,
    identity: Option<TypeIdentity>,
    destroy: Option<DestroyFn>,
    code: Option<CodeHold>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            align: 8,
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            allocation: AllocationStrategy::None,
            flags: ClassFlags::empty(),
            owner: None,
            identity: None,
            destroy: None,
            code: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn align(mut self, align: usize) -> Self {
        self.align = align.max(1);
        self
    }

    pub fn allocation(mut self, allocation: AllocationStrategy) -> Self {
        self.allocation = allocation;
        if allocation.is_allocated() {
            self.flags.insert(ClassFlags::REFERENCE_TYPE);
        }
        self
    }

    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn field(mut self, name: &str, offset: usize, kind: ValueKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: Name::intern(name),
            offset,
            kind,
            class: None,
        });
        self
    }

    pub fn field_of_class(mut self, name: &str, offset: usize, kind: ValueKind, class: ClassId) -> Self {
        self.fields.push(FieldDescriptor {
            name: Name::intern(name),
            offset,
            kind,
            class: Some(class),
        });
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Property backed by `get_<name>` / `set_<name>` style methods
    pub fn property(mut self, name: &str, getter: Option<&str>, setter: Option<&str>) -> Self {
        self.properties.push(PropertyDescriptor {
            name: Name::intern(name),
            getter: getter.map(Name::intern),
            setter: setter.map(Name::intern),
        });
        self
    }

    pub fn destroy(mut self, destroy: DestroyFn) -> Self {
        self.destroy = Some(destroy);
        self
    }

    /// Tie the class to the code its entry points and destructor live in
    pub fn keep_alive(mut self, code: CodeHold) -> Self {
        self.code = Some(code);
        self
    }

    pub fn owner(mut self, owner: ModuleId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn identity(mut self, identity: TypeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub(crate) fn owner_ref(&self) -> Option<ModuleId> {
        self.owner
    }

    pub(crate) fn build(self, id: ClassId) -> ClassDescriptor {
        ClassDescriptor {
            id,
            name: self.name,
            size: self.size,
            align: self.align,
            fields: self.fields,
            methods: self.methods,
            properties: self.properties,
            allocation: self.allocation,
            flags: self.flags,
            owner: self.owner,
            identity: self.identity,
            destroy: self.destroy,
            code: self.code,
        }
    }
}
