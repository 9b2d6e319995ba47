//! Registration calls made by module binaries from `tether_module_init`

use super::{report, set_error, set_null_error};
use crate::class::{AllocationStrategy, ClassBuilder, MethodDescriptor, NativeEntry};
use crate::error::BridgeError;
use crate::module::ModuleRegistrar;
use crate::value::ValueKind;
use core::ffi::{c_char, c_void, CStr};

unsafe fn registrar<'r>(ptr: *mut c_void) -> Option<&'r mut ModuleRegistrar<'r>> {
    (ptr as *mut ModuleRegistrar<'r>).as_mut()
}

unsafe fn text<'t>(ptr: *const c_char, what: &str) -> Option<&'t str> {
    if ptr.is_null() {
        set_null_error(what);
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(text) => Some(text),
        Err(_) => {
            set_error(&BridgeError::KindMismatch {
                expected: ValueKind::Str,
                found: ValueKind::Bytes,
            });
            None
        }
    }
}

fn kind(tag: u8) -> Option<ValueKind> {
    let kind = ValueKind::from_tag(tag);
    if kind.is_none() {
        set_error(&BridgeError::UnsupportedKind { tag });
    }
    kind
}

/// Stage a class; its methods follow through `tether_registrar_define_method`
/// and it is registered when module initialization returns. Returns the
/// staged index, or -1 on failure.
///
/// # Safety
/// `reg` must be the registrar passed to `tether_module_init`; `name` must be
/// a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tether_registrar_define_class(
    reg: *mut c_void,
    name: *const c_char,
    size: usize,
    align: usize,
    allocation: u8,
) -> i64 {
    let Some(reg) = registrar(reg) else {
        set_null_error("registrar");
        return -1;
    };
    let Some(name) = text(name, "class name") else {
        return -1;
    };
    let Some(allocation) = AllocationStrategy::from_raw(allocation) else {
        set_error(&BridgeError::NotConstructible {
            class: name.to_string(),
            reason: "unknown allocation strategy",
        });
        return -1;
    };

    let builder = ClassBuilder::new(name).size(size).align(align.max(1)).allocation(allocation);
    reg.stage_class(builder) as i64
}

/// Add a method to a staged class
///
/// # Safety
/// `reg` as for `tether_registrar_define_class`; `params` must point to
/// `param_count` kind tags; `entry` must follow the native entry contract.
#[no_mangle]
pub unsafe extern "C" fn tether_registrar_define_method(
    reg: *mut c_void,
    class: i64,
    name: *const c_char,
    params: *const u8,
    param_count: usize,
    returns: u8,
    is_static: bool,
    entry: Option<NativeEntry>,
) -> bool {
    let Some(reg) = registrar(reg) else {
        set_null_error("registrar");
        return false;
    };
    let Some(name) = text(name, "method name") else {
        return false;
    };
    let Some(entry) = entry else {
        set_null_error("native entry");
        return false;
    };
    if params.is_null() && param_count > 0 {
        set_null_error("parameter list");
        return false;
    }
    let Ok(class) = usize::try_from(class) else {
        set_error(&BridgeError::UnknownClass(format!("staged class #{class}")));
        return false;
    };

    let tags = if param_count == 0 { &[][..] } else { core::slice::from_raw_parts(params, param_count) };
    let Some(kinds) = tags.iter().map(|&tag| kind(tag)).collect::<Option<Vec<_>>>() else {
        return false;
    };
    let Some(returns) = kind(returns) else {
        return false;
    };

    let mut method = MethodDescriptor::new(name, &kinds, returns).with_entry(entry);
    if is_static {
        method = method.static_method();
    }
    report(reg.stage_method(class, method)).is_some()
}
