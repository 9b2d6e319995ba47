//! Test suite for native heaps

use super::*;
use crate::class::{AllocationStrategy, ClassBuilder, ClassTable};
use crate::error::BridgeError;
use proptest::prelude::*;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static COUNTED_DESTROYS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn count_destroy(_payload: *mut u8) {
    COUNTED_DESTROYS.fetch_add(1, Ordering::SeqCst);
}

fn class(name: &str) -> Arc<crate::class::ClassDescriptor> {
    ClassTable::new()
        .register(
            ClassBuilder::new(name)
                .size(16)
                .allocation(AllocationStrategy::RefCounted),
        )
        .unwrap()
}

#[test]
fn test_header_size() {
    assert_eq!(core::mem::size_of::<InstanceHeader>(), HEADER_SIZE);
}

#[test]
fn test_allocate_starts_at_one() {
    let heap = HostHeap::new();
    let desc = class("A");
    let ptr = heap.allocate(&desc).unwrap();

    assert!(!ptr.is_null());
    assert_eq!(ptr.addr() % 8, 0);
    assert_eq!(heap.strong_count(ptr), 1);
    assert!(heap.is_live(ptr));
    assert_eq!(heap.class_of(ptr), Some(desc.id));
    assert_eq!(heap.counters().allocated, 1);

    // Payload is zeroed
    let payload = unsafe { core::slice::from_raw_parts(ptr.as_mut_ptr(), 16) };
    assert!(payload.iter().all(|b| *b == 0));

    assert_eq!(heap.release(ptr).unwrap(), 0);
    assert_eq!(heap.resident(), 0);
}

#[test]
fn test_destroy_runs_once_at_zero() {
    let heap = HostHeap::new();
    let desc = ClassTable::new()
        .register(
            ClassBuilder::new("Counted")
                .size(8)
                .allocation(AllocationStrategy::RefCounted)
                .destroy(count_destroy),
        )
        .unwrap();

    let before = COUNTED_DESTROYS.load(Ordering::SeqCst);
    let ptr = heap.allocate(&desc).unwrap();
    assert_eq!(heap.retain(ptr).unwrap(), 2);
    assert_eq!(heap.release(ptr).unwrap(), 1);
    assert_eq!(COUNTED_DESTROYS.load(Ordering::SeqCst), before);
    assert_eq!(heap.release(ptr).unwrap(), 0);
    assert_eq!(COUNTED_DESTROYS.load(Ordering::SeqCst), before + 1);

    let counters = heap.counters();
    assert_eq!(counters.destroyed, 1);
    assert_eq!(counters.freed, 1);
    assert_eq!(counters.live(), 0);
}

#[test]
fn test_release_after_free_is_invalid() {
    let heap = HostHeap::new();
    let ptr = heap.allocate(&class("B")).unwrap();
    heap.release(ptr).unwrap();

    let err = heap.release(ptr).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidHandle { .. }));
    assert!(err.is_lifetime_violation());
    assert_eq!(heap.strong_count(ptr), 0);
}

#[test]
fn test_release_past_zero_while_weak_held() {
    let heap = HostHeap::new();
    let ptr = heap.allocate(&class("C")).unwrap();
    heap.retain_weak(ptr).unwrap();
    heap.release(ptr).unwrap();

    // Memory survives for the weak holder, so the header still answers
    assert!(matches!(heap.release(ptr), Err(BridgeError::DoubleRelease { .. })));
    assert!(!heap.try_upgrade(ptr));
    assert!(!heap.is_live(ptr));
    assert_eq!(heap.resident(), 1);

    assert_eq!(heap.release_weak(ptr).unwrap(), 0);
    assert_eq!(heap.resident(), 0);
}

#[test]
fn test_weak_upgrade_while_alive() {
    let heap = HostHeap::new();
    let ptr = heap.allocate(&class("D")).unwrap();
    assert_eq!(heap.retain_weak(ptr).unwrap(), 1);
    assert!(heap.try_upgrade(ptr));
    assert_eq!(heap.strong_count(ptr), 2);

    heap.release(ptr).unwrap();
    heap.release(ptr).unwrap();
    heap.release_weak(ptr).unwrap();
    assert!(matches!(heap.release_weak(ptr), Err(BridgeError::InvalidHandle { .. })));
}

#[test]
fn test_back_reference() {
    let heap = HostHeap::new();
    let ptr = heap.allocate(&class("E")).unwrap();
    assert_eq!(heap.back_reference(ptr), None);
    heap.set_back_reference(ptr, AnchorId::from_raw(77)).unwrap();
    assert_eq!(heap.back_reference(ptr), Some(AnchorId::from_raw(77)));
    heap.release(ptr).unwrap();
    assert!(heap.set_back_reference(ptr, AnchorId::from_raw(1)).is_err());
}

#[test]
fn test_null_and_foreign_pointers() {
    let heap = HostHeap::new();
    assert!(matches!(heap.retain(NativePtr::NULL), Err(BridgeError::InvalidHandle { addr: 0, .. })));
    assert!(matches!(
        heap.release(NativePtr::from_addr(0x1000)),
        Err(BridgeError::InvalidHandle { addr: 0x1000, .. })
    ));
    assert_eq!(heap.strong_count(NativePtr::NULL), 0);
    assert_eq!(heap.class_of(NativePtr::from_addr(0x1000)), None);
}

#[test]
fn test_concurrent_retain_release() {
    let heap = Arc::new(HostHeap::new());
    let ptr = heap.allocate(&class("F")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let heap = heap.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    heap.retain(ptr).unwrap();
                    heap.release(ptr).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(heap.strong_count(ptr), 1);
    assert_eq!(heap.release(ptr).unwrap(), 0);
    assert_eq!(heap.counters().destroyed, 1);
}

proptest! {
    #[test]
    fn prop_balanced_counts_destroy_exactly_once(extra in 0u32..32, weak in 0u32..4) {
        let heap = HostHeap::new();
        let ptr = heap.allocate(&class("P")).unwrap();

        for _ in 0..extra {
            heap.retain(ptr).unwrap();
        }
        for _ in 0..weak {
            heap.retain_weak(ptr).unwrap();
        }
        for i in 0..extra {
            prop_assert_eq!(heap.release(ptr).unwrap(), extra - i);
        }
        prop_assert_eq!(heap.counters().destroyed, 0);
        prop_assert_eq!(heap.release(ptr).unwrap(), 0);
        prop_assert_eq!(heap.counters().destroyed, 1);

        for _ in 0..weak {
            heap.release_weak(ptr).unwrap();
        }
        prop_assert_eq!(heap.resident(), 0);
    }
}

/// Single-instance engine heap driven through the vtable
struct FakeEngine {
    slot: [u64; 4],
    strong: AtomicI64,
    back_ref: AtomicU64,
}

unsafe fn engine<'a>(ctx: *mut core::ffi::c_void) -> &'a FakeEngine {
    &*(ctx as *const FakeEngine)
}

unsafe extern "C" fn fake_allocate(ctx: *mut core::ffi::c_void, _class: u32, _size: usize, _align: usize) -> *mut u8 {
    let e = engine(ctx);
    e.strong.store(1, Ordering::SeqCst);
    e.slot.as_ptr() as *mut u8
}

unsafe extern "C" fn fake_retain(ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> i64 {
    let e = engine(ctx);
    if e.strong.load(Ordering::SeqCst) == 0 {
        return STATUS_INVALID;
    }
    e.strong.fetch_add(1, Ordering::SeqCst) + 1
}

unsafe extern "C" fn fake_release(ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> i64 {
    let e = engine(ctx);
    if e.strong.load(Ordering::SeqCst) == 0 {
        return STATUS_PAST_ZERO;
    }
    e.strong.fetch_sub(1, Ordering::SeqCst) - 1
}

unsafe extern "C" fn fake_weak(_ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> i64 {
    STATUS_INVALID
}

unsafe extern "C" fn fake_upgrade(_ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> bool {
    false
}

unsafe extern "C" fn fake_strong(ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> u32 {
    engine(ctx).strong.load(Ordering::SeqCst) as u32
}

unsafe extern "C" fn fake_set_back(ctx: *mut core::ffi::c_void, _ptr: *mut u8, anchor: u64) -> bool {
    engine(ctx).back_ref.store(anchor, Ordering::SeqCst);
    true
}

unsafe extern "C" fn fake_back(ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> u64 {
    engine(ctx).back_ref.load(Ordering::SeqCst)
}

unsafe extern "C" fn fake_class(_ctx: *mut core::ffi::c_void, _ptr: *mut u8) -> u32 {
    3
}


#[test]
fn test_extern_heap_through_vtable() {
    let mut fake = Box::new(FakeEngine {
        slot: [0; 4],
        strong: AtomicI64::new(0),
        back_ref: AtomicU64::new(0),
    });
    let vtable = NativeHeapVTable {
        ctx: &mut *fake as *mut FakeEngine as *mut core::ffi::c_void,
        allocate: fake_allocate,
        retain: fake_retain,
        release: fake_release,
        retain_weak: fake_weak,
        release_weak: fake_weak,
        try_upgrade: fake_upgrade,
        strong_count: fake_strong,
        set_back_reference: fake_set_back,
        back_reference: fake_back,
        class_of: fake_class,
    };
    let heap = unsafe { ExternHeap::new(vtable) };
    let desc = class("Engine");

    let ptr = heap.allocate(&desc).unwrap();
    assert_eq!(heap.retain(ptr).unwrap(), 2);
    assert_eq!(heap.release(ptr).unwrap(), 1);
    heap.set_back_reference(ptr, AnchorId::from_raw(5)).unwrap();
    assert_eq!(heap.back_reference(ptr), Some(AnchorId::from_raw(5)));
    assert_eq!(heap.class_of(ptr), Some(crate::class::ClassId::from_raw(3)));
    assert_eq!(heap.release(ptr).unwrap(), 0);
    assert!(matches!(heap.release(ptr), Err(BridgeError::DoubleRelease { .. })));
    assert!(matches!(heap.retain_weak(ptr), Err(BridgeError::InvalidHandle { .. })));
    assert!(!heap.is_live(ptr));
    drop(heap);
    drop(fake);
}
