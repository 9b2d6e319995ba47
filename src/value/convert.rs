//! Typed reads out of a cell
//!
//! `read_as` is strict (exact kind) or lenient (lossless numeric widening).
//! Empty cells read as the target's zero value in both modes.

use super::cell::{StructRef, ValueCell, ValueRef};
use super::kind::ValueKind;
use super::name::Name;
use crate::class::ClassId;
use crate::error::{BridgeError, Result};
use crate::object::{NativePtr, ObjectRef};

/// Types that can be read out of a [`ValueCell`]
pub trait FromCell: Sized {
    /// Kind an exact read requires
    const KIND: ValueKind;

    /// Value returned for an empty cell
    fn zero() -> Self;

    fn from_ref(value: &ValueRef<'_>, strict: bool) -> Option<Self>;
}

impl ValueCell {
    /// Read the stored value as `T`.
    ///
    /// Fails with `KindMismatch` when the stored kind is neither `T`'s kind
    /// nor (with `strict == false`) losslessly widenable to it.
    pub fn read_as<T: FromCell>(&self, strict: bool) -> Result<T> {
        if self.is_null() {
            return Ok(T::zero());
        }

        let value = self.get()?;
        T::from_ref(&value, strict).ok_or(BridgeError::KindMismatch {
            expected: T::KIND,
            found: value.kind(),
        })
    }
}

macro_rules! integer_from_cell {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl FromCell for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            #[inline]
            fn zero() -> Self {
                0
            }

            fn from_ref(value: &ValueRef<'_>, strict: bool) -> Option<Self> {
                match *value {
                    ValueRef::$kind(v) => Some(v),
                    ref other if !strict && other.kind().widens_to(Self::KIND) => {
                        other.as_integer().and_then(|i| <$ty>::try_from(i).ok())
                    }
                    _ => None,
                }
            }
        })*
    };
}

integer_from_cell! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
}

impl FromCell for f32 {
    const KIND: ValueKind = ValueKind::F32;

    fn zero() -> Self {
        0.0
    }

    fn from_ref(value: &ValueRef<'_>, strict: bool) -> Option<Self> {
        match *value {
            ValueRef::F32(v) => Some(v),
            ref other if !strict && other.kind().widens_to(Self::KIND) => {
                other.as_integer().map(|i| i as f32)
            }
            _ => None,
        }
    }
}

impl FromCell for f64 {
    const KIND: ValueKind = ValueKind::F64;

    fn zero() -> Self {
        0.0
    }

    fn from_ref(value: &ValueRef<'_>, strict: bool) -> Option<Self> {
        match *value {
            ValueRef::F64(v) => Some(v),
            ref other if !strict && other.kind().widens_to(Self::KIND) => other.as_float(),
            _ => None,
        }
    }
}

impl FromCell for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn zero() -> Self {
        false
    }

    fn from_ref(value: &ValueRef<'_>, _strict: bool) -> Option<Self> {
        match *value {
            ValueRef::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl FromCell for Name {
    const KIND: ValueKind = ValueKind::Name;

    fn zero() -> Self {
        Name::EMPTY
    }

    fn from_ref(value: &ValueRef<'_>, _strict: bool) -> Option<Self> {
        match *value {
            ValueRef::Name(v) => Some(v),
            _ => None,
        }
    }
}

impl FromCell for String {
    const KIND: ValueKind = ValueKind::Str;

    fn zero() -> Self {
        String::new()
    }

    fn from_ref(value: &ValueRef<'_>, _strict: bool) -> Option<Self> {
        match *value {
            ValueRef::Str(s) => Some(s.to_owned()),
            _ => None,
        }
    }
}

impl FromCell for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn zero() -> Self {
        Vec::new()
    }

    fn from_ref(value: &ValueRef<'_>, _strict: bool) -> Option<Self> {
        match *value {
            ValueRef::Bytes(b) => Some(b.to_vec()),
            _ => None,
        }
    }
}

impl FromCell for ObjectRef {
    const KIND: ValueKind = ValueKind::Object;

    fn zero() -> Self {
        ObjectRef::NULL
    }

    fn from_ref(value: &ValueRef<'_>, _strict: bool) -> Option<Self> {
        match *value {
            ValueRef::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl FromCell for StructRef {
    const KIND: ValueKind = ValueKind::Struct;

    fn zero() -> Self {
        StructRef::new(ClassId::NONE, NativePtr::NULL)
    }

    fn from_ref(value: &ValueRef<'_>, _strict: bool) -> Option<Self> {
        match *value {
            ValueRef::Struct(s) => Some(s),
            _ => None,
        }
    }
}
