//! Tagged value cell - the fixed-size container that crosses the boundary
//!
//! Wire shape (32 bytes on 64-bit targets, ABI version 1):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 16   | payload (two words)                     |
//! | 16     | 1    | kind discriminant ([`ValueKind`] tag)   |
//! | 17     | 7    | reserved, zero                          |
//! | 24     | 8    | optional custom serializer fn pointer   |
//!
//! Payload encoding: numeric kinds store their bits zero-extended in word 0.
//! Strings, byte buffers and arrays store `(ptr, len)` of heap storage owned
//! by the cell. Objects and value-type payloads store `(addr, class id)` and
//! own nothing.

use super::kind::ValueKind;
use super::ledger::{record_alloc, record_release};
use super::name::Name;
use crate::class::ClassId;
use crate::error::{BridgeError, Result};
use crate::object::{NativePtr, ObjectRef};
use core::fmt;
use core::ptr;

pub const CELL_PAYLOAD_SIZE: usize = 16;
pub const CELL_SIZE: usize = 32;
pub const CELL_ABI_VERSION: u32 = 1;

#[cfg(target_pointer_width = "64")]
const _: () = assert!(core::mem::size_of::<ValueCell>() == CELL_SIZE);

/// Custom serializer for values that need one; writes at most `capacity`
/// bytes to `out` and returns the number written.
pub type SerializeFn =
    unsafe extern "C" fn(cell: *const ValueCell, out: *mut u8, capacity: usize) -> usize;

/// Non-owning reference to a registered value-type payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructRef {
    pub class: ClassId,
    pub ptr: NativePtr,
}

impl StructRef {
    pub const fn new(class: ClassId, ptr: NativePtr) -> Self {
        Self { class, ptr }
    }
}

/// Owned value: one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Address(usize),
    Ident(u64),
    Name(Name),
    Str(String),
    Array(Vec<Value>),
    Bytes(Vec<u8>),
    Object(ObjectRef),
    Struct(StructRef),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::I8(_) => ValueKind::I8,
            Self::I16(_) => ValueKind::I16,
            Self::I32(_) => ValueKind::I32,
            Self::I64(_) => ValueKind::I64,
            Self::U8(_) => ValueKind::U8,
            Self::U16(_) => ValueKind::U16,
            Self::U32(_) => ValueKind::U32,
            Self::U64(_) => ValueKind::U64,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
            Self::Bool(_) => ValueKind::Bool,
            Self::Address(_) => ValueKind::Address,
            Self::Ident(_) => ValueKind::Ident,
            Self::Name(_) => ValueKind::Name,
            Self::Str(_) => ValueKind::Str,
            Self::Array(_) => ValueKind::Array,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Object(_) => ValueKind::Object,
            Self::Struct(_) => ValueKind::Struct,
        }
    }

    /// Narrowest signed kind that holds `v`
    pub fn integer(v: i64) -> Self {
        if let Ok(v) = i8::try_from(v) {
            Self::I8(v)
        } else if let Ok(v) = i16::try_from(v) {
            Self::I16(v)
        } else if let Ok(v) = i32::try_from(v) {
            Self::I32(v)
        } else {
            Self::I64(v)
        }
    }

    /// Narrowest unsigned kind that holds `v`
    pub fn unsigned(v: u64) -> Self {
        if let Ok(v) = u8::try_from(v) {
            Self::U8(v)
        } else if let Ok(v) = u16::try_from(v) {
            Self::U16(v)
        } else if let Ok(v) = u32::try_from(v) {
            Self::U32(v)
        } else {
            Self::U64(v)
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            #[inline]
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool,
    Name => Name, String => Str, Vec<u8> => Bytes, Vec<Value> => Array,
    ObjectRef => Object, StructRef => Struct,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

/// Borrowed view of a cell's contents
#[derive(Debug, Clone, Copy)]
pub enum ValueRef<'a> {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Address(usize),
    Ident(u64),
    Name(Name),
    Str(&'a str),
    Array(&'a [ValueCell]),
    Bytes(&'a [u8]),
    Object(ObjectRef),
    Struct(StructRef),
}

impl<'a> ValueRef<'a> {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::I8(_) => ValueKind::I8,
            Self::I16(_) => ValueKind::I16,
            Self::I32(_) => ValueKind::I32,
            Self::I64(_) => ValueKind::I64,
            Self::U8(_) => ValueKind::U8,
            Self::U16(_) => ValueKind::U16,
            Self::U32(_) => ValueKind::U32,
            Self::U64(_) => ValueKind::U64,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
            Self::Bool(_) => ValueKind::Bool,
            Self::Address(_) => ValueKind::Address,
            Self::Ident(_) => ValueKind::Ident,
            Self::Name(_) => ValueKind::Name,
            Self::Str(_) => ValueKind::Str,
            Self::Array(_) => ValueKind::Array,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Object(_) => ValueKind::Object,
            Self::Struct(_) => ValueKind::Struct,
        }
    }

    /// Integral payload widened to i128
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Self::I8(v) => v as i128,
            Self::I16(v) => v as i128,
            Self::I32(v) => v as i128,
            Self::I64(v) => v as i128,
            Self::U8(v) => v as i128,
            Self::U16(v) => v as i128,
            Self::U32(v) => v as i128,
            Self::U64(v) => v as i128,
            _ => return None,
        })
    }

    /// Numeric payload as f64 (exact for every kind that widens to f64)
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(v as f64),
            Self::F64(v) => Some(v),
            _ => self.as_integer().map(|i| i as f64),
        }
    }

    /// Deep copy into an owned value. `None` for null.
    pub fn to_value(&self) -> Result<Option<Value>> {
        Ok(Some(match *self {
            Self::Null => return Ok(None),
            Self::I8(v) => Value::I8(v),
            Self::I16(v) => Value::I16(v),
            Self::I32(v) => Value::I32(v),
            Self::I64(v) => Value::I64(v),
            Self::U8(v) => Value::U8(v),
            Self::U16(v) => Value::U16(v),
            Self::U32(v) => Value::U32(v),
            Self::U64(v) => Value::U64(v),
            Self::F32(v) => Value::F32(v),
            Self::F64(v) => Value::F64(v),
            Self::Bool(v) => Value::Bool(v),
            Self::Address(v) => Value::Address(v),
            Self::Ident(v) => Value::Ident(v),
            Self::Name(v) => Value::Name(v),
            Self::Str(s) => Value::Str(s.to_owned()),
            Self::Bytes(b) => Value::Bytes(b.to_vec()),
            Self::Object(o) => Value::Object(o),
            Self::Struct(s) => Value::Struct(s),
            Self::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    // Arrays hold no nulls: `set` never produces them
                    if let Some(v) = item.get()?.to_value()? {
                        out.push(v);
                    }
                }
                Value::Array(out)
            }
        }))
    }
}

/// Fixed-size container for one cross-boundary value
///
/// Not `Clone`: copying a cell would duplicate ownership of its payload.
/// Use [`ValueCell::try_clone_value`] to re-construct a deep copy.
#[repr(C)]
pub struct ValueCell {
    words: [u64; 2],
    kind: u8,
    _reserved: [u8; 7],
    serializer: Option<SerializeFn>,
}

// Owned payloads are uniquely owned by the cell; references are plain data.
unsafe impl Send for ValueCell {}
unsafe impl Sync for ValueCell {}

impl ValueCell {
    /// Empty cell
    #[inline]
    pub const fn new() -> Self {
        Self {
            words: [0; 2],
            kind: 0,
            _reserved: [0; 7],
            serializer: None,
        }
    }

    pub fn from_value(value: impl Into<Value>) -> Self {
        let mut cell = Self::new();
        cell.set(value);
        cell
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.kind == ValueKind::Null.tag()
    }

    /// Discriminant of the stored value
    pub fn kind(&self) -> Result<ValueKind> {
        ValueKind::from_tag(self.kind).ok_or(BridgeError::UnsupportedKind { tag: self.kind })
    }

    /// Store a value, releasing whatever the cell owned before
    pub fn set(&mut self, value: impl Into<Value>) {
        self.release();

        let value = value.into();
        let kind = value.kind();
        let words = match value {
            Value::I8(v) => [v as u8 as u64, 0],
            Value::I16(v) => [v as u16 as u64, 0],
            Value::I32(v) => [v as u32 as u64, 0],
            Value::I64(v) => [v as u64, 0],
            Value::U8(v) => [v as u64, 0],
            Value::U16(v) => [v as u64, 0],
            Value::U32(v) => [v as u64, 0],
            Value::U64(v) => [v, 0],
            Value::F32(v) => [v.to_bits() as u64, 0],
            Value::F64(v) => [v.to_bits(), 0],
            Value::Bool(v) => [v as u64, 0],
            Value::Address(v) => [v as u64, 0],
            Value::Ident(v) => [v, 0],
            Value::Name(v) => [v.raw() as u64, 0],
            Value::Str(s) => own_bytes(s.into_bytes().into_boxed_slice()),
            Value::Bytes(b) => own_bytes(b.into_boxed_slice()),
            Value::Array(items) => {
                let cells: Box<[ValueCell]> = items.into_iter().map(ValueCell::from_value).collect();
                let len = cells.len();
                let ptr = Box::into_raw(cells) as *mut ValueCell;
                record_alloc();
                [ptr as usize as u64, len as u64]
            }
            Value::Object(o) => [o.addr.addr() as u64, o.class.raw() as u64],
            Value::Struct(s) => [s.ptr.addr() as u64, s.class.raw() as u64],
        };

        self.words = words;
        self.kind = kind.tag();
    }

    /// Read the stored value
    pub fn get(&self) -> Result<ValueRef<'_>> {
        let kind = self.kind()?;
        let [w0, w1] = self.words;

        Ok(match kind {
            ValueKind::Null => ValueRef::Null,
            ValueKind::I8 => ValueRef::I8(w0 as u8 as i8),
            ValueKind::I16 => ValueRef::I16(w0 as u16 as i16),
            ValueKind::I32 => ValueRef::I32(w0 as u32 as i32),
            ValueKind::I64 => ValueRef::I64(w0 as i64),
            ValueKind::U8 => ValueRef::U8(w0 as u8),
            ValueKind::U16 => ValueRef::U16(w0 as u16),
            ValueKind::U32 => ValueRef::U32(w0 as u32),
            ValueKind::U64 => ValueRef::U64(w0),
            ValueKind::F32 => ValueRef::F32(f32::from_bits(w0 as u32)),
            ValueKind::F64 => ValueRef::F64(f64::from_bits(w0)),
            ValueKind::Bool => ValueRef::Bool(w0 != 0),
            ValueKind::Address => ValueRef::Address(w0 as usize),
            ValueKind::Ident => ValueRef::Ident(w0),
            ValueKind::Name => ValueRef::Name(
                Name::from_raw(w0 as u32).ok_or(BridgeError::UnsupportedKind { tag: self.kind })?,
            ),
            ValueKind::Str => {
                let bytes = unsafe { borrowed_slice::<u8>(w0, w1) };
                ValueRef::Str(
                    core::str::from_utf8(bytes)
                        .map_err(|_| BridgeError::UnsupportedKind { tag: self.kind })?,
                )
            }
            ValueKind::Bytes => ValueRef::Bytes(unsafe { borrowed_slice::<u8>(w0, w1) }),
            ValueKind::Array => ValueRef::Array(unsafe { borrowed_slice::<ValueCell>(w0, w1) }),
            ValueKind::Object => ValueRef::Object(ObjectRef::new(
                ClassId::from_raw(w1 as u32),
                NativePtr::from_addr(w0 as usize),
            )),
            ValueKind::Struct => ValueRef::Struct(StructRef::new(
                ClassId::from_raw(w1 as u32),
                NativePtr::from_addr(w0 as usize),
            )),
        })
    }

    /// Deep copy of the stored value; `None` when empty
    pub fn value(&self) -> Result<Option<Value>> {
        self.get()?.to_value()
    }

    /// Re-construct an independent cell holding a deep copy of this value
    pub fn try_clone_value(&self) -> Result<ValueCell> {
        let mut cell = ValueCell::new();
        if let Some(v) = self.value()? {
            cell.set(v);
        }
        cell.serializer = self.serializer;
        Ok(cell)
    }

    /// Free any owned payload and reset to empty
    pub fn release(&mut self) {
        let [w0, w1] = self.words;
        match ValueKind::from_tag(self.kind) {
            Some(ValueKind::Str | ValueKind::Bytes) if w0 != 0 => unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                    w0 as usize as *mut u8,
                    w1 as usize,
                )));
                record_release();
            },
            Some(ValueKind::Array) if w0 != 0 => unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                    w0 as usize as *mut ValueCell,
                    w1 as usize,
                )));
                record_release();
            },
            _ => {}
        }

        self.words = [0; 2];
        self.kind = ValueKind::Null.tag();
        self.serializer = None;
    }

    pub fn with_serializer(mut self, serializer: SerializeFn) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn set_serializer(&mut self, serializer: Option<SerializeFn>) {
        self.serializer = serializer;
    }

    #[inline]
    pub fn serializer(&self) -> Option<SerializeFn> {
        self.serializer
    }

    /// Run the custom serializer, if any, into `out`
    pub fn serialize_into(&self, out: &mut [u8]) -> Option<usize> {
        let f = self.serializer?;
        let written = unsafe { f(self as *const ValueCell, out.as_mut_ptr(), out.len()) };
        Some(written.min(out.len()))
    }
}

impl Default for ValueCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ValueCell {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Ok(v) => f.debug_tuple("ValueCell").field(&v).finish(),
            Err(_) => write!(f, "ValueCell(<tag {}>)", self.kind),
        }
    }
}

#[inline]
fn own_bytes(bytes: Box<[u8]>) -> [u64; 2] {
    let len = bytes.len();
    let ptr = Box::into_raw(bytes) as *mut u8;
    record_alloc();
    [ptr as usize as u64, len as u64]
}

/// Borrow `(ptr, len)` stored in a payload. A null pointer reads as empty.
#[inline]
unsafe fn borrowed_slice<'a, T>(ptr: u64, len: u64) -> &'a [T] {
    if ptr == 0 {
        &[]
    } else {
        core::slice::from_raw_parts(ptr as usize as *const T, len as usize)
    }
}
