//! Test suite for the object bridge

use super::*;
use crate::anchor::{AnchorId, ManagedRef, ModuleId, Strength};
use crate::bridge::Bridge;
use crate::class::{AllocationStrategy, ClassBuilder, ClassDescriptor, ClassId};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::native::{HostHeap, NativeHeap};
use crate::value::ValueCell;
use std::sync::Arc;

fn bridge_with(config: BridgeConfig) -> (Bridge, Arc<HostHeap>) {
    let heap = Arc::new(HostHeap::new());
    let bridge = Bridge::new(config, heap.clone());
    for (name, allocation) in [
        ("Shared", AllocationStrategy::RefCounted),
        ("Unique", AllocationStrategy::StrongCounted),
        ("Inert", AllocationStrategy::None),
    ] {
        bridge
            .classes()
            .register(ClassBuilder::new(name).size(16).allocation(allocation))
            .unwrap();
    }
    (bridge, heap)
}

fn lenient() -> (Bridge, Arc<HostHeap>) {
    let mut config = BridgeConfig::lenient();
    config.lifetimes.check_dispose_count = true;
    bridge_with(config)
}

fn wrapper(tag: &'static str) -> ManagedRef {
    Arc::new(tag)
}

#[test]
fn test_construct_and_dispose() {
    let (bridge, heap) = lenient();
    let w = wrapper("player");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();

    assert_eq!(obj.origin(), Origin::Constructed);
    assert_eq!(obj.handle().unwrap().strong_count(), 1);
    assert_eq!(bridge.anchors().len(), 1);

    let found = bridge.wrapper_of(obj.object_ref()).unwrap();
    assert_eq!(found.downcast_ref::<&str>(), Some(&"player"));

    obj.dispose().unwrap();
    assert!(obj.is_disposed());
    assert!(obj.object_ref().is_null());
    assert!(bridge.anchors().is_empty());
    assert_eq!(heap.counters().live(), 0);

    let stats = bridge.stats();
    assert_eq!(stats.objects_constructed, 1);
    assert_eq!(stats.objects_disposed, 1);
}

#[test]
fn test_double_dispose_is_refused() {
    let (bridge, heap) = lenient();
    let w = wrapper("x");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();

    obj.dispose().unwrap();
    let err = obj.dispose().unwrap_err();
    assert!(matches!(err, BridgeError::DoubleRelease { .. }));
    assert_eq!(bridge.stats().lifetime_violations, 1);
    assert_eq!(heap.counters().destroyed, 1);
}

#[test]
#[should_panic(expected = "double release")]
fn test_double_dispose_panics_when_strict() {
    let (bridge, _heap) = bridge_with(BridgeConfig::strict());
    let w = wrapper("x");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();
    obj.dispose().unwrap();
    let _ = obj.dispose();
}

#[test]
fn test_dispose_with_outstanding_reference() {
    let (bridge, _heap) = lenient();
    let w = wrapper("x");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();

    let extra = bridge.retain(obj.object_ref()).unwrap();
    assert!(matches!(obj.dispose(), Err(BridgeError::InvalidHandle { .. })));
    assert!(!obj.is_disposed());

    drop(extra);
    obj.dispose().unwrap();
}

#[test]
fn test_drop_without_dispose_releases() {
    let (bridge, heap) = lenient();
    let w = wrapper("x");
    let obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();
    drop(obj);

    assert!(bridge.anchors().is_empty());
    assert_eq!(heap.counters().live(), 0);
}

#[test]
fn test_not_constructible() {
    let (bridge, heap) = lenient();
    let w = wrapper("x");
    let err = bridge.construct_named(ModuleId::HOST, "Inert", &w).unwrap_err();
    assert!(matches!(err, BridgeError::NotConstructible { .. }));
    assert!(bridge.anchors().is_empty());
    assert_eq!(heap.counters().allocated, 0);
}

#[test]
fn test_surface_native_owned_instance() {
    let (bridge, heap) = lenient();
    let desc = bridge.classes().by_name("Shared").unwrap();

    // Instance created and owned by native code
    let ptr = heap.allocate(&desc).unwrap();
    let obj = ObjectRef::new(desc.id, ptr);

    let w = wrapper("surfaced");
    let mut surfaced = bridge.surface(ModuleId::HOST, obj, &w).unwrap();
    assert_eq!(surfaced.origin(), Origin::Surfaced);
    assert_eq!(heap.strong_count(ptr), 2);
    assert_eq!(bridge.anchors().strength(surfaced.anchor()), Some(Strength::Weak));

    surfaced.dispose().unwrap();
    assert_eq!(heap.strong_count(ptr), 1);

    assert_eq!(bridge.release_raw(obj).unwrap(), 0);
    assert!(!heap.is_live(ptr));
}

#[test]
fn test_retain_and_downgrade() {
    let (bridge, _heap) = lenient();
    let w = wrapper("x");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();

    let strong = bridge.retain(obj.object_ref()).unwrap();
    let weak = bridge.downgrade(&strong).unwrap();
    assert_eq!(strong.strong_count(), 2);
    drop(strong);

    assert!(weak.is_alive());
    let upgraded = weak.lock().unwrap();
    drop(upgraded);

    let raw = obj.object_ref();
    obj.dispose().unwrap();
    assert!(!weak.is_alive());
    assert!(weak.lock().is_none());
    assert!(matches!(bridge.retain(raw), Err(BridgeError::InvalidHandle { .. })));
}

#[test]
fn test_strong_counted_is_single_owner() {
    let (bridge, _heap) = lenient();
    let w = wrapper("x");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Unique", &w).unwrap();

    assert!(matches!(
        bridge.retain(obj.object_ref()),
        Err(BridgeError::SharingNotSupported { .. })
    ));
    let handle = obj.handle().unwrap();
    assert!(matches!(handle.try_clone(), Err(BridgeError::SharingNotSupported { .. })));
    assert!(matches!(handle.downgrade(), Err(BridgeError::SharingNotSupported { .. })));

    obj.dispose().unwrap();
}

#[test]
fn test_object_in_cell() {
    let (bridge, _heap) = lenient();
    let w = wrapper("x");
    let mut obj = bridge.construct_named(ModuleId::HOST, "Shared", &w).unwrap();

    let cell = ValueCell::from_value(obj.object_ref());
    assert_eq!(bridge.object_in(&cell).unwrap(), obj.object_ref());

    let null = ValueCell::from_value(ObjectRef::NULL);
    assert!(bridge.object_in(&null).unwrap().is_null());

    obj.dispose().unwrap();
    assert!(bridge.object_in(&cell).is_err());
    assert!(bridge.object_in(&ValueCell::from_value(5i32)).is_err());
}

#[test]
fn test_release_raw_past_zero() {
    let (bridge, heap) = lenient();
    let desc = bridge.classes().by_name("Shared").unwrap();
    let ptr = heap.allocate(&desc).unwrap();
    let obj = ObjectRef::new(desc.id, ptr);

    assert_eq!(bridge.release_raw(obj).unwrap(), 0);
    assert!(bridge.release_raw(obj).is_err());
    assert_eq!(bridge.release_raw(ObjectRef::NULL).unwrap(), 0);
    assert_eq!(bridge.stats().lifetime_violations, 1);
}

#[test]
fn test_surface_single_owner_instance_borrows() {
    let (bridge, heap) = lenient();
    let desc = bridge.classes().by_name("Unique").unwrap();
    let ptr = heap.allocate(&desc).unwrap();
    let obj = ObjectRef::new(desc.id, ptr);

    let w = wrapper("borrowed");
    let mut surfaced = bridge.surface(ModuleId::HOST, obj, &w).unwrap();
    assert!(!surfaced.is_owning());
    assert!(surfaced.handle().is_none());
    assert_eq!(surfaced.object_ref(), obj);
    assert_eq!(heap.strong_count(ptr), 1);
    assert_eq!(bridge.anchors().strength(surfaced.anchor()), Some(Strength::Weak));
    assert_eq!(bridge.wrapper_of(obj).unwrap().downcast_ref::<&str>(), Some(&"borrowed"));

    // Disposing the wrapper leaves the native owner in charge
    surfaced.dispose().unwrap();
    assert!(surfaced.is_disposed());
    assert!(bridge.anchors().is_empty());
    assert_eq!(heap.strong_count(ptr), 1);
    assert!(heap.is_live(ptr));

    assert_eq!(bridge.release_raw(obj).unwrap(), 0);
    assert!(!heap.is_live(ptr));
    assert_eq!(bridge.stats().lifetime_violations, 0);
}

#[test]
fn test_dropping_borrowed_wrapper_keeps_instance() {
    let (bridge, heap) = lenient();
    let desc = bridge.classes().by_name("Unique").unwrap();
    let ptr = heap.allocate(&desc).unwrap();
    let obj = ObjectRef::new(desc.id, ptr);

    let w = wrapper("borrowed");
    drop(bridge.surface(ModuleId::HOST, obj, &w).unwrap());
    assert!(bridge.anchors().is_empty());
    assert!(heap.is_live(ptr));
    assert_eq!(bridge.release_raw(obj).unwrap(), 0);
}

/// Host heap that refuses to record back references
struct NoBackRefs(HostHeap);

impl NativeHeap for NoBackRefs {
    fn allocate(&self, class: &ClassDescriptor) -> Result<NativePtr> {
        self.0.allocate(class)
    }

    fn retain(&self, ptr: NativePtr) -> Result<u32> {
        self.0.retain(ptr)
    }

    fn release(&self, ptr: NativePtr) -> Result<u32> {
        self.0.release(ptr)
    }

    fn retain_weak(&self, ptr: NativePtr) -> Result<u32> {
        self.0.retain_weak(ptr)
    }

    fn release_weak(&self, ptr: NativePtr) -> Result<u32> {
        self.0.release_weak(ptr)
    }

    fn try_upgrade(&self, ptr: NativePtr) -> bool {
        self.0.try_upgrade(ptr)
    }

    fn strong_count(&self, ptr: NativePtr) -> u32 {
        self.0.strong_count(ptr)
    }

    fn set_back_reference(&self, ptr: NativePtr, _anchor: AnchorId) -> Result<()> {
        Err(BridgeError::InvalidHandle {
            addr: ptr.addr(),
            reason: "back references unsupported",
        })
    }

    fn back_reference(&self, ptr: NativePtr) -> Option<AnchorId> {
        self.0.back_reference(ptr)
    }

    fn class_of(&self, ptr: NativePtr) -> Option<ClassId> {
        self.0.class_of(ptr)
    }
}

#[test]
fn test_failed_surface_releases_anchor() {
    let heap = Arc::new(NoBackRefs(HostHeap::new()));
    let bridge = Bridge::new(BridgeConfig::lenient(), heap.clone());
    let desc = bridge
        .classes()
        .register(ClassBuilder::new("Shared").size(16).allocation(AllocationStrategy::RefCounted))
        .unwrap();
    let ptr = heap.allocate(&desc).unwrap();
    let obj = ObjectRef::new(desc.id, ptr);

    let w = wrapper("orphan");
    assert!(matches!(
        bridge.surface(ModuleId::HOST, obj, &w),
        Err(BridgeError::InvalidHandle { .. })
    ));
    assert!(bridge.anchors().is_empty());
    // The reference taken for the wrapper was given back
    assert_eq!(heap.strong_count(ptr), 1);
    assert_eq!(bridge.release_raw(obj).unwrap(), 0);
}

#[test]
fn test_null_handle_release_is_noop() {
    let (bridge, heap) = bridge_with(BridgeConfig::strict());
    let desc = bridge.classes().by_name("Shared").unwrap();

    let handle = unsafe { StrongHandle::adopt(desc, NativePtr::NULL, heap.clone(), true) };
    assert_eq!(handle.release().unwrap(), 0);
    assert_eq!(heap.counters().allocated, 0);
}
