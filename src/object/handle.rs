//! Strong and weak handles

use super::{NativePtr, ObjectRef};
use crate::class::ClassDescriptor;
use crate::error::{lifetime_violation, BridgeError, Result};
use crate::native::NativeHeap;
use core::fmt;
use core::mem::ManuallyDrop;
use std::sync::Arc;

/// Owning strong reference; the count is decremented exactly once on drop
pub struct StrongHandle {
    class: Arc<ClassDescriptor>,
    ptr: NativePtr,
    heap: Arc<dyn NativeHeap>,
    strict: bool,
}

impl StrongHandle {
    /// Adopt one strong reference the caller already owns
    ///
    /// # Safety
    /// The caller must own one strong count on `ptr` and give it up.
    pub unsafe fn adopt(class: Arc<ClassDescriptor>, ptr: NativePtr, heap: Arc<dyn NativeHeap>, strict: bool) -> Self {
        Self { class, ptr, heap, strict }
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.ptr
    }

    #[inline]
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.class.id, self.ptr)
    }

    #[inline]
    pub fn class(&self) -> &Arc<ClassDescriptor> {
        &self.class
    }

    pub fn strong_count(&self) -> u32 {
        self.heap.strong_count(self.ptr)
    }

    /// Share the instance. Single-owner classes refuse.
    pub fn try_clone(&self) -> Result<StrongHandle> {
        if !self.class.allocation.is_shared() {
            return Err(BridgeError::SharingNotSupported { class: self.class.name.clone() });
        }
        self.heap
            .retain(self.ptr)
            .map_err(|err| lifetime_violation(self.strict, err))?;
        Ok(StrongHandle {
            class: self.class.clone(),
            ptr: self.ptr,
            heap: self.heap.clone(),
            strict: self.strict,
        })
    }

    /// Observe without owning. Single-owner classes refuse.
    pub fn downgrade(&self) -> Result<WeakHandle> {
        if !self.class.allocation.is_shared() {
            return Err(BridgeError::SharingNotSupported { class: self.class.name.clone() });
        }
        self.heap
            .retain_weak(self.ptr)
            .map_err(|err| lifetime_violation(self.strict, err))?;
        Ok(WeakHandle {
            class: self.class.clone(),
            ptr: self.ptr,
            heap: self.heap.clone(),
            strict: self.strict,
        })
    }

    /// Give up the handle without decrementing; the caller now owns the count
    pub fn into_raw(self) -> ObjectRef {
        let this = ManuallyDrop::new(self);
        let obj = this.object_ref();
        // Release the Arcs without touching the native count
        unsafe {
            drop(core::ptr::read(&this.class));
            drop(core::ptr::read(&this.heap));
        }
        obj
    }

    /// Decrement now and report the remaining strong count
    pub fn release(self) -> Result<u32> {
        let this = ManuallyDrop::new(self);
        let result = if this.ptr.is_null() { Ok(0) } else { this.heap.release(this.ptr) };
        let strict = this.strict;
        unsafe {
            drop(core::ptr::read(&this.class));
            drop(core::ptr::read(&this.heap));
        }
        result.map_err(|err| lifetime_violation(strict, err))
    }
}

impl Drop for StrongHandle {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Err(err) = self.heap.release(self.ptr) {
            let _ = lifetime_violation(self.strict && !std::thread::panicking(), err);
        }
    }
}

impl fmt::Debug for StrongHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrongHandle")
            .field("class", &self.class.name)
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// Non-owning observer of a shared instance
pub struct WeakHandle {
    class: Arc<ClassDescriptor>,
    ptr: NativePtr,
    heap: Arc<dyn NativeHeap>,
    strict: bool,
}

impl WeakHandle {
    /// Upgrade to a strong handle; `None` once the instance is destroyed
    pub fn lock(&self) -> Option<StrongHandle> {
        if !self.heap.try_upgrade(self.ptr) {
            return None;
        }
        Some(StrongHandle {
            class: self.class.clone(),
            ptr: self.ptr,
            heap: self.heap.clone(),
            strict: self.strict,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.heap.is_live(self.ptr)
    }

    #[inline]
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.class.id, self.ptr)
    }
}

impl Drop for WeakHandle {
    fn drop(&mut self) {
        if let Err(err) = self.heap.release_weak(self.ptr) {
            let _ = lifetime_violation(self.strict && !std::thread::panicking(), err);
        }
    }
}

impl fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("class", &self.class.name)
            .field("ptr", &self.ptr)
            .finish()
    }
}
