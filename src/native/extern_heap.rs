//! Engine-supplied native heap
//!
//! The engine exposes its allocator and reference counts as a table of C
//! callbacks. Count-returning callbacks use negative values for errors:
//! `-1` released past zero, `-2` unknown or destroyed instance.

use super::NativeHeap;
use crate::anchor::AnchorId;
use crate::class::{ClassDescriptor, ClassId};
use crate::error::{BridgeError, Result};
use crate::object::NativePtr;
use core::ffi::c_void;

pub const STATUS_PAST_ZERO: i64 = -1;
pub const STATUS_INVALID: i64 = -2;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NativeHeapVTable {
    pub ctx: *mut c_void,
    pub allocate: unsafe extern "C" fn(ctx: *mut c_void, class: u32, size: usize, align: usize) -> *mut u8,
    pub retain: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> i64,
    pub release: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> i64,
    pub retain_weak: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> i64,
    pub release_weak: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> i64,
    pub try_upgrade: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> bool,
    pub strong_count: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> u32,
    pub set_back_reference: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8, anchor: u64) -> bool,
    pub back_reference: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> u64,
    pub class_of: unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut u8) -> u32,
}

/// Native heap implemented by the engine through [`NativeHeapVTable`]
pub struct ExternHeap {
    vtable: NativeHeapVTable,
}

// The engine guarantees its heap callbacks are thread-safe
unsafe impl Send for ExternHeap {}
unsafe impl Sync for ExternHeap {}

impl ExternHeap {
    /// # Safety
    /// Every callback must be valid for the lifetime of the heap and safe
    /// to call from any thread with `vtable.ctx`.
    pub unsafe fn new(vtable: NativeHeapVTable) -> Self {
        Self { vtable }
    }

    fn count(&self, ptr: NativePtr, status: i64) -> Result<u32> {
        match status {
            STATUS_PAST_ZERO => Err(BridgeError::DoubleRelease { addr: ptr.addr() }),
            n if n < 0 => Err(BridgeError::InvalidHandle {
                addr: ptr.addr(),
                reason: "rejected by engine heap",
            }),
            n => u32::try_from(n).map_err(|_| BridgeError::InvalidHandle {
                addr: ptr.addr(),
                reason: "count out of range",
            }),
        }
    }
}

impl NativeHeap for ExternHeap {
    fn allocate(&self, class: &ClassDescriptor) -> Result<NativePtr> {
        let raw = unsafe { (self.vtable.allocate)(self.vtable.ctx, class.id.raw(), class.size, class.align) };
        if raw.is_null() {
            return Err(BridgeError::NotConstructible {
                class: class.name.clone(),
                reason: "engine heap returned null",
            });
        }
        Ok(NativePtr::from_addr(raw as usize))
    }

    fn retain(&self, ptr: NativePtr) -> Result<u32> {
        let status = unsafe { (self.vtable.retain)(self.vtable.ctx, ptr.as_mut_ptr()) };
        self.count(ptr, status)
    }

    fn release(&self, ptr: NativePtr) -> Result<u32> {
        let status = unsafe { (self.vtable.release)(self.vtable.ctx, ptr.as_mut_ptr()) };
        self.count(ptr, status)
    }

    fn retain_weak(&self, ptr: NativePtr) -> Result<u32> {
        let status = unsafe { (self.vtable.retain_weak)(self.vtable.ctx, ptr.as_mut_ptr()) };
        self.count(ptr, status)
    }

    fn release_weak(&self, ptr: NativePtr) -> Result<u32> {
        let status = unsafe { (self.vtable.release_weak)(self.vtable.ctx, ptr.as_mut_ptr()) };
        self.count(ptr, status)
    }

    fn try_upgrade(&self, ptr: NativePtr) -> bool {
        unsafe { (self.vtable.try_upgrade)(self.vtable.ctx, ptr.as_mut_ptr()) }
    }

    fn strong_count(&self, ptr: NativePtr) -> u32 {
        if ptr.is_null() {
            return 0;
        }
        unsafe { (self.vtable.strong_count)(self.vtable.ctx, ptr.as_mut_ptr()) }
    }

    fn set_back_reference(&self, ptr: NativePtr, anchor: AnchorId) -> Result<()> {
        let ok = unsafe { (self.vtable.set_back_reference)(self.vtable.ctx, ptr.as_mut_ptr(), anchor.raw()) };
        if ok {
            Ok(())
        } else {
            Err(BridgeError::InvalidHandle {
                addr: ptr.addr(),
                reason: "rejected by engine heap",
            })
        }
    }

    fn back_reference(&self, ptr: NativePtr) -> Option<AnchorId> {
        let raw = unsafe { (self.vtable.back_reference)(self.vtable.ctx, ptr.as_mut_ptr()) };
        (raw != 0).then(|| AnchorId::from_raw(raw))
    }

    fn class_of(&self, ptr: NativePtr) -> Option<ClassId> {
        let raw = unsafe { (self.vtable.class_of)(self.vtable.ctx, ptr.as_mut_ptr()) };
        (raw != 0).then(|| ClassId::from_raw(raw))
    }
}
