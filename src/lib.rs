//! Tether - object bridge between a garbage-collected scripting runtime and a
//! reference-counted native heap
//!
//! Managed code holds, inspects, mutates and invokes native objects through
//! tagged value cells; native code keeps managed wrappers alive through
//! liveness anchors. Modules load, hot-reload and unload as units.

pub mod anchor;
pub mod bridge;
pub mod class;
pub mod config;
pub mod error;
pub mod ffi;
pub mod invoke;
pub mod layout;
pub mod logging;
pub mod module;
pub mod native;
pub mod object;
pub mod value;

// Re-export commonly used items
pub use anchor::{AnchorGuard, AnchorId, AnchorRegistry, ManagedRef, ModuleId, Strength, SweepReport};
pub use bridge::{Bridge, BridgeStats};
pub use class::{
    AllocationStrategy, ClassBuilder, ClassDescriptor, ClassFlags, ClassId, ClassTable, MethodDescriptor,
    NativeEntry,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use invoke::CallFrame;
pub use layout::{StructRegistry, StructType, TypeIdentity};
pub use module::{DylibModule, ModuleCode, ModuleRegistrar, ModuleState, StaticModule, UnloadReport};
pub use native::{ExternHeap, HostHeap, NativeHeap};
pub use object::{BridgedObject, NativePtr, ObjectRef, StrongHandle, WeakHandle};
pub use value::{Name, Value, ValueCell, ValueKind};
