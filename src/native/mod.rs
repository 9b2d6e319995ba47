//! Native heap seam
//!
//! Instances of bridged classes live in a manually reference-counted native
//! heap. The bridge only talks to it through [`NativeHeap`]: the in-process
//! [`HostHeap`] or an engine-supplied vtable wrapped by [`ExternHeap`].
//!
//! Counting rules shared by both:
//! - `allocate` returns an instance with strong count 1
//! - destruction runs when the strong count reaches zero
//! - weak handles keep the memory (not the instance) until released
//! - releasing past zero is `DoubleRelease`, unknown addresses `InvalidHandle`

mod extern_heap;
mod host;

pub use extern_heap::{ExternHeap, NativeHeapVTable, STATUS_INVALID, STATUS_PAST_ZERO};
pub use host::{HeapCounters, HostHeap, InstanceHeader, HEADER_SIZE};

use crate::anchor::AnchorId;
use crate::class::{ClassDescriptor, ClassId};
use crate::error::Result;
use crate::object::NativePtr;

pub trait NativeHeap: Send + Sync {
    /// Allocate a zeroed instance of `class` with strong count 1
    fn allocate(&self, class: &ClassDescriptor) -> Result<NativePtr>;

    /// Add a strong reference; returns the new strong count
    fn retain(&self, ptr: NativePtr) -> Result<u32>;

    /// Drop a strong reference; returns the remaining strong count
    fn release(&self, ptr: NativePtr) -> Result<u32>;

    fn retain_weak(&self, ptr: NativePtr) -> Result<u32>;

    fn release_weak(&self, ptr: NativePtr) -> Result<u32>;

    /// Take a strong reference if the instance has not been destroyed
    fn try_upgrade(&self, ptr: NativePtr) -> bool;

    /// Strong count; zero for destroyed or unknown instances
    fn strong_count(&self, ptr: NativePtr) -> u32;

    /// Record the managed wrapper's anchor on the instance
    fn set_back_reference(&self, ptr: NativePtr, anchor: AnchorId) -> Result<()>;

    fn back_reference(&self, ptr: NativePtr) -> Option<AnchorId>;

    fn class_of(&self, ptr: NativePtr) -> Option<ClassId>;

    /// Instance has not been destroyed
    fn is_live(&self, ptr: NativePtr) -> bool {
        self.strong_count(ptr) > 0
    }
}

#[cfg(test)]
mod tests;
