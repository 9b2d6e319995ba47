//! Declared vs actual struct layouts

use super::{field_layout, TypeIdentity};
use crate::class::DestroyFn;
use crate::error::{BridgeError, Result};
use crate::value::ValueKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldLayout {
    pub name: String,
    pub kind: ValueKind,
    pub declared_offset: usize,
    pub actual_offset: usize,
}

/// A value type as declared by script code and as laid out natively
#[derive(Clone)]
pub struct StructType {
    pub name: String,
    pub identity: TypeIdentity,
    pub declared_size: usize,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldLayout>,
    pub destroy: Option<DestroyFn>,
}

unsafe extern "C" fn drop_payload<T>(payload: *mut u8) {
    core::ptr::drop_in_place(payload as *mut T);
}

impl StructType {
    /// Layout of a Rust type against a declared size and declared field offsets.
    /// Usually built with [`struct_type!`](crate::struct_type).
    pub fn for_type<T: 'static>(declared_size: usize, fields: Vec<FieldLayout>) -> Self {
        Self {
            name: core::any::type_name::<T>().to_string(),
            identity: TypeIdentity::of::<T>(),
            declared_size,
            size: core::mem::size_of::<T>(),
            align: core::mem::align_of::<T>(),
            fields,
            destroy: core::mem::needs_drop::<T>().then_some(drop_payload::<T> as DestroyFn),
        }
    }

    pub fn builder(name: impl Into<String>) -> StructTypeBuilder {
        StructTypeBuilder {
            name: name.into(),
            declared_size: None,
            fields: Vec::new(),
            destroy: None,
        }
    }

    /// No field owns heap memory and no destructor is needed
    pub fn is_plain_old_data(&self) -> bool {
        self.destroy.is_none() && !self.fields.iter().any(|f| f.kind.owns_payload())
    }

    /// Declared layout must equal the native one
    pub fn validate(&self) -> Result<()> {
        if self.declared_size != self.size {
            return Err(self.mismatch(format!(
                "declared size {} but native size is {}",
                self.declared_size, self.size
            )));
        }

        for field in &self.fields {
            if field.declared_offset != field.actual_offset {
                return Err(self.mismatch(format!(
                    "field '{}' declared at offset {} but native offset is {}",
                    field.name, field.declared_offset, field.actual_offset
                )));
            }
            if let Some((size, _)) = field_layout(field.kind) {
                if field.actual_offset + size > self.size {
                    return Err(self.mismatch(format!("field '{}' extends past the end of the type", field.name)));
                }
            }
        }

        if !self.is_plain_old_data() && self.destroy.is_none() {
            return Err(self.mismatch("type owns heap fields but has no destructor".to_string()));
        }

        Ok(())
    }

    /// Hash of everything that makes two layouts interchangeable
    pub fn layout_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.size as u64).to_le_bytes());
        hasher.update(&(self.align as u64).to_le_bytes());
        for field in &self.fields {
            hasher.update(field.name.as_bytes());
            hasher.update(&[0, field.kind.tag()]);
            hasher.update(&(field.actual_offset as u64).to_le_bytes());
        }
        hasher.finalize()
    }

    fn mismatch(&self, detail: String) -> BridgeError {
        BridgeError::LayoutMismatch {
            type_name: self.name.clone(),
            detail,
        }
    }
}

impl core::fmt::Debug for StructType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StructType")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("size", &self.size)
            .field("declared_size", &self.declared_size)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Struct described by a script compiler; the native layout is the C layout
/// of the field kinds in declaration order.
pub struct StructTypeBuilder {
    name: String,
    declared_size: Option<usize>,
    fields: Vec<(String, ValueKind, usize)>,
    destroy: Option<DestroyFn>,
}

impl StructTypeBuilder {
    pub fn field(mut self, name: &str, kind: ValueKind, declared_offset: usize) -> Self {
        self.fields.push((name.to_string(), kind, declared_offset));
        self
    }

    pub fn declared_size(mut self, size: usize) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn destroy(mut self, destroy: DestroyFn) -> Self {
        self.destroy = Some(destroy);
        self
    }

    pub fn build(self) -> Result<StructType> {
        let mut offset = 0usize;
        let mut align = 1usize;
        let mut fields = Vec::with_capacity(self.fields.len());

        for (name, kind, declared_offset) in self.fields {
            let (size, field_align) = field_layout(kind).ok_or_else(|| BridgeError::LayoutMismatch {
                type_name: self.name.clone(),
                detail: format!("field '{}' of kind {} has no inline layout", name, kind),
            })?;
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            fields.push(FieldLayout {
                name,
                kind,
                declared_offset,
                actual_offset: offset,
            });
            offset += size;
        }

        let size = align_up(offset, align);
        Ok(StructType {
            identity: TypeIdentity::of_name(&self.name),
            declared_size: self.declared_size.unwrap_or(size),
            name: self.name,
            size,
            align,
            fields,
            destroy: self.destroy,
        })
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Describe a `#[repr(C)]` Rust type together with the layout script code
/// declares for it.
///
/// ```ignore
/// let vec3 = struct_type!(Vec3, size = 12, { x: F32 @ 0, y: F32 @ 4, z: F32 @ 8 });
/// ```
#[macro_export]
macro_rules! struct_type {
    ($ty:ty, size = $size:expr, { $($field:ident : $kind:ident @ $offset:expr),* $(,)? }) => {
        $crate::layout::StructType::for_type::<$ty>(
            $size,
            vec![$($crate::layout::FieldLayout {
                name: stringify!($field).to_string(),
                kind: $crate::value::ValueKind::$kind,
                declared_offset: $offset,
                actual_offset: ::core::mem::offset_of!($ty, $field),
            }),*],
        )
    };
}
