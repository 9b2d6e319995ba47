//! Dynamic struct registration
//!
//! Value types declared by script code are synthesized into class
//! descriptors at runtime. The declared layout must match the native layout
//! exactly: size and every field offset. Mismatches are refused, never padded
//! or truncated.

mod registry;
mod struct_type;

pub use registry::StructRegistry;
pub use struct_type::{FieldLayout, StructType, StructTypeBuilder};

use crate::value::ValueKind;
use core::any::TypeId;
use core::fmt;
use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Stable identity of a value type, derived from its qualified name
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIdentity(u64);

static IDENTITY_CACHE: Lazy<DashMap<TypeId, TypeIdentity>> = Lazy::new(DashMap::new);

impl TypeIdentity {
    pub fn of_name(qualified_name: &str) -> Self {
        let hash = blake3::hash(qualified_name.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_le_bytes(word))
    }

    /// Identity of a Rust type, computed once per type
    pub fn of<T: 'static>() -> Self {
        *IDENTITY_CACHE
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Self::of_name(core::any::type_name::<T>()))
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIdentity({:016x})", self.0)
    }
}

/// Size and alignment of a field kind inside a native struct.
/// `None` for kinds without a fixed inline representation.
pub fn field_layout(kind: ValueKind) -> Option<(usize, usize)> {
    use ValueKind::*;
    Some(match kind {
        I8 | U8 | Bool => (1, 1),
        I16 | U16 => (2, 2),
        I32 | U32 | F32 | Name => (4, 4),
        I64 | U64 | F64 | Ident => (8, 8),
        Address | Object => (core::mem::size_of::<usize>(), core::mem::align_of::<usize>()),
        // (ptr, len)
        Str | Array | Bytes => (2 * core::mem::size_of::<usize>(), core::mem::align_of::<usize>()),
        Null | Struct => return None,
    })
}
