//! Test suite for the C ABI

use super::*;
use crate::anchor::ModuleId;
use crate::bridge::Bridge;
use crate::class::{AllocationStrategy, ClassBuilder};
use crate::module::{ModuleRegistrar, StaticModule};
use crate::native_method;
use crate::value::{payload_ledger, ValueCell, ValueKind};
use core::ffi::c_void;
use core::mem::MaybeUninit;
use std::sync::Arc;

native_method!(answer, |frame| {
    frame.ret(42i64);
    Ok(())
});

#[test]
fn test_abi_constants() {
    tether_init();
    tether_init();
    assert_eq!(tether_cell_size(), core::mem::size_of::<ValueCell>());
    assert_eq!(tether_abi_version(), CELL_ABI_VERSION);
}

#[test]
fn test_cell_functions() {
    let start = payload_ledger();
    let mut slot = MaybeUninit::<ValueCell>::uninit();
    let cell = slot.as_mut_ptr();

    unsafe {
        tether_cell_init(cell);
        assert_eq!(tether_cell_kind(cell), ValueKind::Null.tag());

        tether_cell_set_i64(cell, -7);
        let mut int = 0i64;
        assert!(tether_cell_get_i64(cell, &mut int));
        assert_eq!(int, -7);

        tether_cell_set_f64(cell, 2.5);
        assert_eq!(tether_cell_kind(cell), ValueKind::F64.tag());
        let mut float = 0f64;
        assert!(tether_cell_get_f64(cell, &mut float));
        assert_eq!(float, 2.5);
        assert!(!tether_cell_get_i64(cell, &mut int));
        assert_eq!(tether_last_error(), TETHER_ERR_KIND);

        let text = "hello";
        assert!(tether_cell_set_str(cell, text.as_ptr(), text.len()));
        assert_eq!(tether_cell_kind(cell), ValueKind::Str.tag());
        assert!(!tether_cell_set_str(cell, [0xffu8, 0xfe].as_ptr(), 2));

        tether_cell_set_bool(cell, true);
        assert_eq!(tether_cell_kind(cell), ValueKind::Bool.tag());

        tether_cell_release(cell);
        assert_eq!(tether_cell_kind(cell), ValueKind::Null.tag());
        slot.assume_init_drop();
    }
    assert_eq!(payload_ledger().since(start).outstanding(), 0);
}

#[test]
fn test_null_pointers_are_no_ops() {
    unsafe {
        tether_cell_init(core::ptr::null_mut());
        tether_cell_release(core::ptr::null_mut());
        tether_cell_set_i64(core::ptr::null_mut(), 1);
        assert_eq!(tether_cell_kind(core::ptr::null()), 0);
        assert!(!tether_cell_get_i64(core::ptr::null(), core::ptr::null_mut()));
        assert_eq!(tether_last_error_message(core::ptr::null_mut(), 8), 0);
        assert!(!tether_init_with_heap(core::ptr::null()));
    }
    assert_eq!(tether_last_error(), TETHER_ERR_NULL);
    assert_eq!(tether_handle_release(0, 0), 0);
    assert_eq!(tether_handle_retain(0, 0), 0);
    assert!(!tether_anchor_release(0));
    assert!(!tether_anchor_is_alive(0));
}

#[test]
fn test_error_message_round_trip() {
    set_error(&BridgeError::UnknownClass("Ghost".into()));
    assert_eq!(tether_last_error(), TETHER_ERR_UNKNOWN);

    let mut buf = [0u8; 64];
    let len = unsafe { tether_last_error_message(buf.as_mut_ptr(), buf.len()) };
    let message = core::str::from_utf8(&buf[..len]).unwrap();
    assert!(message.contains("Ghost"));
}

#[test]
fn test_handles_on_default_bridge() {
    let bridge = default_bridge();
    let desc = bridge
        .classes()
        .register(
            ClassBuilder::new("ffi::Handled")
                .size(8)
                .allocation(AllocationStrategy::RefCounted),
        )
        .unwrap();

    let wrapper: crate::anchor::ManagedRef = Arc::new(1u8);
    let mut obj = bridge.construct(ModuleId::HOST, desc.id, &wrapper).unwrap();
    let addr = obj.object_ref().addr.addr();

    assert_eq!(tether_handle_retain(desc.id.raw(), addr), 2);
    assert_eq!(tether_handle_release(desc.id.raw(), addr), 1);

    let anchor = obj.anchor().raw();
    assert!(tether_anchor_is_alive(anchor));
    obj.dispose().unwrap();
    assert!(!tether_anchor_is_alive(anchor));
    assert!(!tether_anchor_release(anchor));
}

#[test]
fn test_registrar_from_c() {
    let bridge = Bridge::default();
    let module = StaticModule::new("c_module", |reg: &mut ModuleRegistrar<'_>| {
        let ptr = reg as *mut ModuleRegistrar<'_> as *mut c_void;
        unsafe {
            let class = tether_registrar_define_class(
                ptr,
                c"Oracle".as_ptr(),
                0,
                8,
                AllocationStrategy::None as u8,
            );
            assert_eq!(class, 0);
            assert!(tether_registrar_define_method(
                ptr,
                class,
                c"answer".as_ptr(),
                core::ptr::null(),
                0,
                ValueKind::I64.tag(),
                true,
                Some(answer),
            ));
            assert!(!tether_registrar_define_method(
                ptr,
                class,
                c"bad".as_ptr(),
                [200u8].as_ptr(),
                1,
                ValueKind::Null.tag(),
                true,
                Some(answer),
            ));
            assert_eq!(tether_last_error(), TETHER_ERR_KIND);
            assert_eq!(
                tether_registrar_define_class(ptr, c"Broken".as_ptr(), 0, 8, 9),
                -1
            );
        }
        Ok(())
    });

    let id = bridge.load_module(&module).unwrap();
    let desc = bridge.classes().by_name("Oracle").unwrap();
    assert_eq!(desc.owner, Some(id));

    let out = bridge.invoke(desc.id, "answer", None, &[]).unwrap();
    assert_eq!(out.read_as::<i64>(true).unwrap(), 42);
}
