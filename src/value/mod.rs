//! Tagged values - the only currency that crosses the boundary
//!
//! Design: one fixed-size `#[repr(C)]` cell with an explicit discriminant.
//! Owned payloads (strings, arrays, byte buffers) are released exactly once,
//! on `set`, `release` or drop. Object and value-type payloads are
//! non-owning references.
//!
//! Layout:
//! - `kind.rs` - discriminants, priority order, widening rules
//! - `cell.rs` - the cell itself plus `Value`/`ValueRef`
//! - `convert.rs` - strict and lenient typed reads
//! - `name.rs` - interned names
//! - `ledger.rs` - per-thread owned payload accounting

mod cell;
mod convert;
mod kind;
mod ledger;
mod name;

pub use cell::{
    SerializeFn, StructRef, Value, ValueCell, ValueRef, CELL_ABI_VERSION, CELL_PAYLOAD_SIZE,
    CELL_SIZE,
};
pub use convert::FromCell;
pub use kind::ValueKind;
pub use ledger::{payload_ledger, PayloadLedger};
pub use name::Name;
