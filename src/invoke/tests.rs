//! Test suite for method invocation

use super::*;
use crate::anchor::{ManagedRef, ModuleId};
use crate::bridge::Bridge;
use crate::class::{AllocationStrategy, ClassBuilder, ClassId, MethodDescriptor};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::native_method;
use crate::object::ObjectRef;
use crate::value::{payload_ledger, Name, Value, ValueCell, ValueKind};
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    // Native entries run on the calling thread
    static CALLS: Cell<usize> = const { Cell::new(0) };
}

unsafe fn counter_slot(obj: ObjectRef) -> *mut i64 {
    obj.addr.as_mut_ptr() as *mut i64
}

native_method!(counter_get, |frame| {
    CALLS.with(|c| c.set(c.get() + 1));
    let this = frame.this()?;
    let value = unsafe { *counter_slot(this) };
    frame.ret(value);
    Ok(())
});

native_method!(counter_set, |frame| {
    let this = frame.this()?;
    let value = frame.read::<i64>(1)?;
    unsafe { *counter_slot(this) = value };
    Ok(())
});

native_method!(counter_add_int, |frame| {
    CALLS.with(|c| c.set(c.get() + 1));
    let this = frame.this()?;
    let delta = frame.read::<i64>(1)?;
    let slot = unsafe { &mut *counter_slot(this) };
    *slot += delta;
    frame.ret(*slot);
    Ok(())
});

native_method!(counter_add_float, |frame| {
    let this = frame.this()?;
    let delta = frame.read::<f64>(1)?;
    let slot = unsafe { &mut *counter_slot(this) };
    *slot += delta.round() as i64;
    frame.ret("float");
    Ok(())
});

native_method!(sum, |frame| {
    // Widened arguments arrive as the declared kind
    assert_eq!(frame.arg(0)?.kind()?, ValueKind::I64);
    let total = frame.read::<i64>(0)? + frame.read::<i64>(1)?;
    frame.ret(total);
    Ok(())
});

native_method!(broken, |frame| {
    frame.ret("partial result that must be discarded");
    Err(BridgeError::InvocationFailed { method: "broken".into() })
});

native_method!(panics, |_frame| {
    panic!("native side blew up");
});

fn counter_class(bridge: &Bridge) -> ClassId {
    let desc = bridge
        .classes()
        .register(
            ClassBuilder::new("Counter")
                .size(8)
                .allocation(AllocationStrategy::RefCounted)
                .field("value", 0, ValueKind::I64)
                .method(MethodDescriptor::new("get", &[], ValueKind::I64).with_entry(counter_get))
                .method(MethodDescriptor::new("set", &[ValueKind::I64], ValueKind::Null).with_entry(counter_set))
                .method(MethodDescriptor::new("add", &[ValueKind::I64], ValueKind::I64).with_entry(counter_add_int))
                .method(MethodDescriptor::new("add", &[ValueKind::F64], ValueKind::Str).with_entry(counter_add_float))
                .method(
                    MethodDescriptor::new("sum", &[ValueKind::I64, ValueKind::I64], ValueKind::I64)
                        .static_method()
                        .with_entry(sum),
                )
                .method(MethodDescriptor::new("broken", &[], ValueKind::Str).static_method().with_entry(broken))
                .method(MethodDescriptor::new("panics", &[], ValueKind::Null).static_method().with_entry(panics))
                .method(MethodDescriptor::new("unbound", &[], ValueKind::Null))
                .property("value", Some("get"), Some("set"))
                .property("readonly", Some("get"), None),
        )
        .unwrap();
    desc.id
}

fn wrapper() -> ManagedRef {
    Arc::new(())
}

fn lenient_bridge() -> Bridge {
    Bridge::with_host_heap(BridgeConfig::lenient())
}

#[test]
fn test_instance_call_reads_native_state() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let w = wrapper();
    let mut obj = bridge.construct(ModuleId::HOST, class, &w).unwrap();

    let out = bridge.invoke(class, "get", Some(obj.object_ref()), &[]).unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 0);

    let out = bridge.invoke(class, "add", Some(obj.object_ref()), &[Value::I64(5)]).unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 5);
    assert_eq!(bridge.stats().invocations, 2);

    obj.dispose().unwrap();
}

#[test]
fn test_arity_mismatch_never_crosses() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let w = wrapper();
    let mut obj = bridge.construct(ModuleId::HOST, class, &w).unwrap();

    let before = CALLS.with(Cell::get);
    let err = bridge
        .invoke(class, "add", Some(obj.object_ref()), &[Value::I64(1), Value::I64(2)])
        .unwrap_err();
    assert!(matches!(err, BridgeError::ArityMismatch { got: 2, .. }));

    // Missing receiver counts against arity too
    let err = bridge.invoke(class, "get", None, &[]).unwrap_err();
    assert!(matches!(err, BridgeError::ArityMismatch { expected: 1, got: 0, .. }));

    assert_eq!(CALLS.with(Cell::get), before);
    assert_eq!(bridge.stats().arity_failures, 2);
    assert_eq!(bridge.stats().invocations, 0);

    obj.dispose().unwrap();
}

#[test]
fn test_overload_exact_match_wins() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let w = wrapper();
    let mut obj = bridge.construct(ModuleId::HOST, class, &w).unwrap();
    let this = Some(obj.object_ref());

    let out = bridge.invoke(class, "add", this, &[Value::F64(2.6)]).unwrap();
    assert_eq!(out.read_as::<String>(true).unwrap(), "float");

    // i32 widens to i64 before f64 is considered
    let out = bridge.invoke(class, "add", this, &[Value::I32(4)]).unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 7);

    let err = bridge.invoke(class, "add", this, &[Value::Bool(true)]).unwrap_err();
    assert!(matches!(err, BridgeError::UnknownMethod { .. }));

    obj.dispose().unwrap();
}

#[test]
fn test_static_call_widens_arguments() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);

    let out = bridge.invoke(class, "sum", None, &[Value::I8(40), Value::U16(2)]).unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 42);

    let out = bridge
        .invoke_named("Counter", "sum", None, &[Value::I64(1), Value::I64(1)])
        .unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 2);
}

#[test]
fn test_failed_call_discards_result() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let start = payload_ledger();

    let err = bridge.invoke(class, "broken", None, &[]).unwrap_err();
    assert!(matches!(err, BridgeError::InvocationFailed { .. }));
    let err = bridge.invoke(class, "panics", None, &[]).unwrap_err();
    assert!(matches!(err, BridgeError::InvocationFailed { .. }));

    assert_eq!(payload_ledger().since(start).outstanding(), 0);
    assert_eq!(bridge.stats().invocation_failures, 2);
}

#[test]
fn test_unknown_and_unbound_methods() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);

    assert!(matches!(
        bridge.invoke(class, "no_such_method_anywhere", None, &[]),
        Err(BridgeError::UnknownMethod { .. })
    ));
    assert!(matches!(
        bridge.invoke(class, "unbound", Some(ObjectRef::NULL), &[]),
        Err(BridgeError::UnknownMethod { .. })
    ));
    assert!(matches!(
        bridge.invoke(ClassId::from_raw(4040), "get", None, &[]),
        Err(BridgeError::UnknownClass(_))
    ));
}

#[test]
fn test_receiver_of_wrong_class_refused() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let err = bridge
        .invoke(class, "get", Some(ObjectRef::new(class, crate::object::NativePtr::from_addr(0x1000))), &[])
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidHandle { .. }));
    assert_eq!(bridge.stats().lifetime_violations, 1);
}

#[test]
fn test_properties() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let w = wrapper();
    let mut obj = bridge.construct(ModuleId::HOST, class, &w).unwrap();
    let this = obj.object_ref();

    bridge.set_property(this, "value", 41i64).unwrap();
    let out = bridge.get_property(this, "value").unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 41);

    assert!(matches!(
        bridge.set_property(this, "readonly", 1i64),
        Err(BridgeError::UnknownProperty { .. })
    ));
    assert!(matches!(
        bridge.get_property(this, "missing"),
        Err(BridgeError::UnknownProperty { .. })
    ));

    obj.dispose().unwrap();
}

#[test]
fn test_invoke_cells_accepts_caller_cells() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let args = [ValueCell::from_value(20i64), ValueCell::from_value(22i32)];

    let out = bridge.invoke_cells(class, "sum", None, &args).unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 42);
    // Caller still owns its cells
    assert_eq!(args[1].kind().unwrap(), ValueKind::I32);
}

#[test]
fn test_binding_cache_reuse_and_eviction() {
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);

    for _ in 0..3 {
        bridge.invoke(class, "sum", None, &[Value::I64(1), Value::I64(2)]).unwrap();
    }
    let (hits, misses) = bridge.bindings().hit_rate();
    assert_eq!(misses, 1);
    assert_eq!(hits, 2);
    assert_eq!(bridge.bindings().len(), 1);

    assert_eq!(bridge.bindings().evict_class(class), 1);
    assert!(bridge.bindings().is_empty());
}

#[test]
fn test_binding_cache_capacity() {
    let cache = BindingCache::new(2);
    let bridge = lenient_bridge();
    let class = counter_class(&bridge);
    let desc = bridge.classes().by_id(class).unwrap();

    for kinds in [[ValueKind::I64, ValueKind::I64], [ValueKind::I32, ValueKind::I64], [ValueKind::I8, ValueKind::I8]] {
        let binding = bridge.bind(&desc, "sum", &kinds).unwrap();
        cache.insert(BindingKey::new(class, binding.name, &kinds), binding);
    }
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.evict_module(ModuleId::from_raw(9)), 0);
}

fn module_binding(module: ModuleId) -> Arc<MethodBinding> {
    Arc::new(MethodBinding {
        class: ClassId::from_raw(1),
        class_name: Arc::from("Counter"),
        name: Name::intern("sum"),
        index: 0,
        params: Vec::new(),
        returns: ValueKind::I64,
        is_static: true,
        entry: sum,
        module: Some(module),
    })
}

#[test]
fn test_binding_cache_tracks_modules_through_eviction() {
    let cache = BindingCache::new(2);
    let (a, b) = (ModuleId::from_raw(3), ModuleId::from_raw(4));
    let method = Name::intern("sum");
    let key = |args: &[ValueKind]| BindingKey::new(ClassId::from_raw(1), method, args);

    cache.insert(key(&[]), module_binding(a));
    cache.insert(key(&[ValueKind::I32]), module_binding(b));
    assert_eq!(cache.module_count(), 2);

    // Capacity pushes out the oldest binding of `a`; `a` keeps the new one
    cache.insert(key(&[ValueKind::I64]), module_binding(a));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.module_count(), 2);

    // Rebinding a key to another module moves it between indexes
    cache.insert(key(&[ValueKind::I32]), module_binding(a));
    assert_eq!(cache.module_count(), 1);
    assert_eq!(cache.evict_module(b), 0);

    assert_eq!(cache.evict_module(a), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.module_count(), 0);
}
