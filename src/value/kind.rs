//! Value kinds that can cross the boundary
//!
//! The discriminant byte is part of the cell wire shape; values are stable.

use core::fmt;

/// Kind of value held by a [`ValueCell`](super::ValueCell)
///
/// Declaration order is the kind priority order: signed integers narrow to
/// wide, unsigned integers narrow to wide, float, double, bool, raw address,
/// opaque identifier, interned name, string, array, byte buffer, live object
/// reference, value-type payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Null = 0,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Address,
    Ident,
    Name,
    Str,
    Array,
    Bytes,
    Object,
    Struct,
}

impl ValueKind {
    pub const ALL: [ValueKind; 20] = [
        Self::Null,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::Bool,
        Self::Address,
        Self::Ident,
        Self::Name,
        Self::Str,
        Self::Array,
        Self::Bytes,
        Self::Object,
        Self::Struct,
    ];

    /// Decode a discriminant byte
    #[inline]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Width in bits of an integral kind, 0 otherwise
    #[inline]
    pub const fn int_bits(self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 8,
            Self::I16 | Self::U16 => 16,
            Self::I32 | Self::U32 => 32,
            Self::I64 | Self::U64 => 64,
            _ => 0,
        }
    }

    #[inline]
    pub const fn is_integral(self) -> bool {
        self.int_bits() != 0
    }

    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[inline]
    pub const fn is_numeric(self) -> bool {
        self.is_integral() || self.is_float()
    }

    /// Kinds whose payload is heap storage owned by the cell
    #[inline]
    pub const fn owns_payload(self) -> bool {
        matches!(self, Self::Str | Self::Array | Self::Bytes)
    }

    /// Kinds that reference something living elsewhere without owning it
    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Object | Self::Struct)
    }

    /// Lossless widening from `self` to `target`.
    ///
    /// Identity is not a widening. Signed widens to wider signed; unsigned
    /// widens to wider unsigned or strictly wider signed; f32 widens to f64;
    /// integers of at most 16 bits widen to f32, at most 32 bits to f64.
    pub const fn widens_to(self, target: Self) -> bool {
        let from_bits = self.int_bits();
        let to_bits = target.int_bits();

        if from_bits != 0 && to_bits != 0 {
            return if self.is_signed() {
                target.is_signed() && to_bits > from_bits
            } else {
                to_bits > from_bits
            };
        }

        match (self, target) {
            (Self::F32, Self::F64) => true,
            (_, Self::F32) => from_bits != 0 && from_bits <= 16,
            (_, Self::F64) => from_bits != 0 && from_bits <= 32,
            _ => false,
        }
    }

    /// Name shown to script authors in diagnostics
    pub const fn script_name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::I8 => "sbyte",
            Self::I16 => "short",
            Self::I32 => "int",
            Self::I64 => "long",
            Self::U8 => "byte",
            Self::U16 => "ushort",
            Self::U32 => "uint",
            Self::U64 => "ulong",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::Bool => "bool",
            Self::Address => "address",
            Self::Ident => "id",
            Self::Name => "name",
            Self::Str => "string",
            Self::Array => "array",
            Self::Bytes => "bytes",
            Self::Object => "object",
            Self::Struct => "struct",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script_name())
    }
}
