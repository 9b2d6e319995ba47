//! In-process native heap
//!
//! Every instance is prefixed by a 32-byte [`InstanceHeader`]. Strong and weak
//! counts are packed into one atomic word so each transition is a single CAS.
//! The thread that takes the strong count to zero also takes a temporary weak
//! reference, so memory cannot be freed underneath a running destructor.

use super::NativeHeap;
use crate::anchor::AnchorId;
use crate::class::{ClassDescriptor, ClassId, CodeHold, DestroyFn};
use crate::error::{BridgeError, Result};
use crate::logging::log_instance_destroyed;
use crate::object::NativePtr;
use dashmap::DashMap;
use serde::Serialize;
use std::alloc::{self, Layout};
use std::sync::atomic::{AtomicU64, Ordering};

pub const HEADER_SIZE: usize = 32;

/// Instance header (32 bytes) - prefixed before every instance payload
#[repr(C, align(8))]
pub struct InstanceHeader {
    pub class: u32,
    pub size: u32,
    /// Strong count in the low half, weak count in the high half
    counts: AtomicU64,
    back_ref: AtomicU64,
    pub align: u32,
    pub flags: u32,
}

const _: () = assert!(core::mem::size_of::<InstanceHeader>() == HEADER_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counts {
    strong: u32,
    weak: u32,
}

impl Counts {
    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            strong: raw as u32,
            weak: (raw >> 32) as u32,
        }
    }

    #[inline]
    fn pack(self) -> u64 {
        self.strong as u64 | ((self.weak as u64) << 32)
    }

    #[inline]
    fn is_dead(self) -> bool {
        self.strong == 0 && self.weak == 0
    }
}

impl InstanceHeader {
    /// Header of an instance payload
    #[inline]
    pub unsafe fn from_instance(ptr: *mut u8) -> *mut Self {
        ptr.sub(HEADER_SIZE) as *mut Self
    }

    #[inline]
    pub fn strong_count(&self) -> u32 {
        Counts::unpack(self.counts.load(Ordering::Acquire)).strong
    }

    #[inline]
    pub fn weak_count(&self) -> u32 {
        Counts::unpack(self.counts.load(Ordering::Acquire)).weak
    }
}

struct InstanceRecord {
    class: ClassId,
    layout: Layout,
    destroy: Option<DestroyFn>,
    /// Dropped with the record, after the destructor ran
    _code: Option<CodeHold>,
}

/// Allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapCounters {
    pub allocated: u64,
    pub destroyed: u64,
    pub freed: u64,
}

impl HeapCounters {
    /// Instances allocated and not yet destroyed
    #[inline]
    pub fn live(&self) -> u64 {
        self.allocated - self.destroyed
    }
}

pub struct HostHeap {
    live: DashMap<usize, InstanceRecord>,
    allocated: AtomicU64,
    destroyed: AtomicU64,
    freed: AtomicU64,
}

impl HostHeap {
    pub fn new() -> Self {
        Self {
            live: DashMap::with_capacity(256),
            allocated: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    pub fn counters(&self) -> HeapCounters {
        HeapCounters {
            allocated: self.allocated.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }

    /// Instances whose memory has not been returned
    pub fn resident(&self) -> usize {
        self.live.len()
    }

    /// Apply a count transition under the live-map guard.
    ///
    /// `Ok(Err(current))` when `f` refused the transition.
    fn transition(
        &self,
        ptr: NativePtr,
        mut f: impl FnMut(Counts) -> Option<Counts>,
    ) -> Result<std::result::Result<(Counts, Counts), Counts>> {
        if ptr.is_null() {
            return Err(BridgeError::InvalidHandle { addr: 0, reason: "null instance" });
        }

        let _record = self.live.get(&ptr.addr()).ok_or(BridgeError::InvalidHandle {
            addr: ptr.addr(),
            reason: "not an instance of this heap",
        })?;

        let header = unsafe { &*InstanceHeader::from_instance(ptr.as_mut_ptr()) };
        let mut new = None;
        let result = header
            .counts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let next = f(Counts::unpack(raw))?;
                new = Some(next);
                Some(next.pack())
            });

        Ok(match (result, new) {
            (Ok(old), Some(new)) => Ok((Counts::unpack(old), new)),
            (Ok(old), None) | (Err(old), _) => Err(Counts::unpack(old)),
        })
    }

    fn header(&self, ptr: NativePtr) -> Option<dashmap::mapref::one::Ref<'_, usize, InstanceRecord>> {
        if ptr.is_null() {
            return None;
        }
        self.live.get(&ptr.addr())
    }

    /// Run the payload destructor; the caller holds the destroying weak reference
    #[cold]
    #[inline(never)]
    fn destroy(&self, ptr: NativePtr) {
        let (class, destroy) = match self.live.get(&ptr.addr()) {
            Some(record) => (record.class, record.destroy),
            None => return,
        };

        if let Some(destroy) = destroy {
            unsafe { destroy(ptr.as_mut_ptr()) };
        }
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        log_instance_destroyed(class.raw(), ptr.addr());

        // Give back the destroying weak reference
        if let Ok(Ok((_, new))) = self.transition(ptr, |c| {
            Some(Counts { strong: c.strong, weak: c.weak.checked_sub(1)? })
        }) {
            if new.is_dead() {
                self.free(ptr);
            }
        }
    }

    fn free(&self, ptr: NativePtr) {
        if let Some((_, record)) = self.live.remove(&ptr.addr()) {
            unsafe {
                alloc::dealloc(ptr.as_mut_ptr().sub(HEADER_SIZE), record.layout);
            }
            self.freed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for HostHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeHeap for HostHeap {
    fn allocate(&self, class: &ClassDescriptor) -> Result<NativePtr> {
        let align = class.align.max(8);
        if align > HEADER_SIZE || !align.is_power_of_two() {
            return Err(BridgeError::NotConstructible {
                class: class.name.clone(),
                reason: "alignment exceeds instance header",
            });
        }

        let layout = Layout::from_size_align(HEADER_SIZE + class.size, align).map_err(|_| {
            BridgeError::NotConstructible {
                class: class.name.clone(),
                reason: "invalid instance layout",
            }
        })?;

        let base = unsafe { alloc::alloc_zeroed(layout) };
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }

        unsafe {
            (base as *mut InstanceHeader).write(InstanceHeader {
                class: class.id.raw(),
                size: class.size as u32,
                counts: AtomicU64::new(Counts { strong: 1, weak: 0 }.pack()),
                back_ref: AtomicU64::new(0),
                align: align as u32,
                flags: class.flags.bits() as u32,
            });
        }

        let ptr = NativePtr::from_addr(base as usize + HEADER_SIZE);
        self.live.insert(
            ptr.addr(),
            InstanceRecord {
                class: class.id,
                layout,
                destroy: class.destroy,
                _code: class.code.clone(),
            },
        );
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    fn retain(&self, ptr: NativePtr) -> Result<u32> {
        match self.transition(ptr, |c| {
            if c.strong == 0 {
                return None;
            }
            Some(Counts { strong: c.strong.checked_add(1)?, weak: c.weak })
        })? {
            Ok((_, new)) => Ok(new.strong),
            Err(_) => Err(BridgeError::InvalidHandle {
                addr: ptr.addr(),
                reason: "instance already destroyed",
            }),
        }
    }

    fn release(&self, ptr: NativePtr) -> Result<u32> {
        // Strong 1 -> 0 also takes the destroying weak reference
        let outcome = self.transition(ptr, |c| match c.strong {
            0 => None,
            1 => Some(Counts { strong: 0, weak: c.weak.checked_add(1)? }),
            n => Some(Counts { strong: n - 1, weak: c.weak }),
        })?;

        match outcome {
            Ok((_, new)) if new.strong == 0 => {
                std::sync::atomic::fence(Ordering::Acquire);
                self.destroy(ptr);
                Ok(0)
            }
            Ok((_, new)) => Ok(new.strong),
            Err(_) => Err(BridgeError::DoubleRelease { addr: ptr.addr() }),
        }
    }

    fn retain_weak(&self, ptr: NativePtr) -> Result<u32> {
        match self.transition(ptr, |c| {
            if c.strong == 0 {
                return None;
            }
            Some(Counts { strong: c.strong, weak: c.weak.checked_add(1)? })
        })? {
            Ok((_, new)) => Ok(new.weak),
            Err(_) => Err(BridgeError::InvalidHandle {
                addr: ptr.addr(),
                reason: "instance already destroyed",
            }),
        }
    }

    fn release_weak(&self, ptr: NativePtr) -> Result<u32> {
        match self.transition(ptr, |c| {
            Some(Counts { strong: c.strong, weak: c.weak.checked_sub(1)? })
        })? {
            Ok((_, new)) => {
                if new.is_dead() {
                    self.free(ptr);
                }
                Ok(new.weak)
            }
            Err(_) => Err(BridgeError::DoubleRelease { addr: ptr.addr() }),
        }
    }

    fn try_upgrade(&self, ptr: NativePtr) -> bool {
        matches!(
            self.transition(ptr, |c| {
                if c.strong == 0 {
                    return None;
                }
                Some(Counts { strong: c.strong.checked_add(1)?, weak: c.weak })
            }),
            Ok(Ok(_))
        )
    }

    fn strong_count(&self, ptr: NativePtr) -> u32 {
        match self.header(ptr) {
            Some(_guard) => unsafe { (*InstanceHeader::from_instance(ptr.as_mut_ptr())).strong_count() },
            None => 0,
        }
    }

    fn set_back_reference(&self, ptr: NativePtr, anchor: AnchorId) -> Result<()> {
        let _guard = self.header(ptr).ok_or(BridgeError::InvalidHandle {
            addr: ptr.addr(),
            reason: "not an instance of this heap",
        })?;
        let header = unsafe { &*InstanceHeader::from_instance(ptr.as_mut_ptr()) };
        header.back_ref.store(anchor.raw(), Ordering::Release);
        Ok(())
    }

    fn back_reference(&self, ptr: NativePtr) -> Option<AnchorId> {
        let _guard = self.header(ptr)?;
        let header = unsafe { &*InstanceHeader::from_instance(ptr.as_mut_ptr()) };
        let raw = header.back_ref.load(Ordering::Acquire);
        (raw != 0).then(|| AnchorId::from_raw(raw))
    }

    fn class_of(&self, ptr: NativePtr) -> Option<ClassId> {
        self.header(ptr).map(|record| record.class)
    }
}

impl Drop for HostHeap {
    fn drop(&mut self) {
        // Instances still referenced when the heap goes away are leaked
        // by their owners; return the memory without running destructors.
        for entry in self.live.iter() {
            unsafe {
                alloc::dealloc((*entry.key() as *mut u8).sub(HEADER_SIZE), entry.value().layout);
            }
        }
    }
}
