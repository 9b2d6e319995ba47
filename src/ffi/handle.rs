//! Reference counts and anchors

use super::{default_bridge, report};
use crate::anchor::AnchorId;
use crate::class::ClassId;
use crate::object::{NativePtr, ObjectRef};

fn object(class: u32, addr: usize) -> ObjectRef {
    ObjectRef::new(ClassId::from_raw(class), NativePtr::from_addr(addr))
}

/// Take one strong reference on behalf of the caller; returns the new count,
/// or 0 on failure (null address included)
#[no_mangle]
pub extern "C" fn tether_handle_retain(class: u32, addr: usize) -> u32 {
    if addr == 0 {
        return 0;
    }
    report(default_bridge().retain(object(class, addr)))
        .map_or(0, |handle| {
            let count = handle.strong_count();
            let _ = handle.into_raw();
            count
        })
}

/// Drop one strong reference owned by the caller; returns the remaining
/// count. A null address is a no-op returning 0.
#[no_mangle]
pub extern "C" fn tether_handle_release(class: u32, addr: usize) -> u32 {
    report(default_bridge().release_raw(object(class, addr))).unwrap_or(0)
}

/// Release an anchor; `false` when it was not registered
#[no_mangle]
pub extern "C" fn tether_anchor_release(anchor: u64) -> bool {
    let id = AnchorId::from_raw(anchor);
    !id.is_none() && default_bridge().anchors().release(id)
}

/// Whether the anchor still resolves to a live managed object
#[no_mangle]
pub extern "C" fn tether_anchor_is_alive(anchor: u64) -> bool {
    let id = AnchorId::from_raw(anchor);
    !id.is_none() && default_bridge().anchors().resolve(id).is_some()
}
