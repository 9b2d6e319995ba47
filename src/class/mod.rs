//! Class descriptor table
//!
//! Opaque lookup from a class identity (stable name or process-local id) to
//! its metadata: size, fields, methods, properties, allocation strategy.

mod descriptor;
mod table;

pub use descriptor::{
    AllocationStrategy, ClassBuilder, ClassDescriptor, ClassFlags, ClassId, CodeHold, DestroyFn,
    FieldDescriptor, MethodDescriptor, NativeEntry, ParamMatch, PropertyDescriptor,
};
pub use table::ClassTable;
