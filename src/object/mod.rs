//! Reference-counted object bridge
//!
//! Managed wrappers hold native instances through RAII handles:
//! - [`StrongHandle`] decrements exactly once on drop
//! - [`WeakHandle`] observes and can be upgraded while the instance lives
//! - [`BridgedObject`] is the wrapper's bridge state; `dispose` is the
//!   deterministic release path and `Drop` the safety net
//!
//! Construction anchors the wrapper before the instance learns its back
//! reference, so native code never sees a back reference to an unanchored
//! wrapper.

mod bridged;
mod handle;
mod lifecycle;

pub use bridged::{BridgedObject, Origin};
pub use handle::{StrongHandle, WeakHandle};

use crate::class::ClassId;
use core::fmt;

/// Opaque native instance address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct NativePtr(usize);

impl NativePtr {
    pub const NULL: NativePtr = NativePtr(0);

    #[inline]
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn as_mut_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

/// Non-owning reference to a live native instance, as carried by cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectRef {
    pub class: ClassId,
    pub addr: NativePtr,
}

impl ObjectRef {
    pub const NULL: ObjectRef = ObjectRef {
        class: ClassId::NONE,
        addr: NativePtr::NULL,
    };

    #[inline]
    pub const fn new(class: ClassId, addr: NativePtr) -> Self {
        Self { class, addr }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.addr.is_null()
    }
}

#[cfg(test)]
mod tests;
