//! C ABI - stable surface for native code and module binaries
//!
//! Design:
//! 1. One process-wide default [`Bridge`], created on first use
//! 2. Null pointers are no-ops
//! 3. Failures set a thread-local error code read by `tether_last_error`

mod cell;
mod handle;
mod registrar;

pub use cell::*;
pub use handle::*;
pub use registrar::*;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::logging::{self, debug, info};
use crate::native::{ExternHeap, NativeHeapVTable};
use crate::value::{CELL_ABI_VERSION, CELL_SIZE};
use once_cell::sync::OnceCell;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

static DEFAULT_BRIDGE: OnceCell<Bridge> = OnceCell::new();

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(TETHER_OK) };
    static LAST_MESSAGE: RefCell<String> = const { RefCell::new(String::new()) };
}

pub const TETHER_OK: i32 = 0;
pub const TETHER_ERR_KIND: i32 = 1;
pub const TETHER_ERR_UNKNOWN: i32 = 2;
pub const TETHER_ERR_LAYOUT: i32 = 3;
pub const TETHER_ERR_IDENTITY: i32 = 4;
pub const TETHER_ERR_ARITY: i32 = 5;
pub const TETHER_ERR_INVOCATION: i32 = 6;
pub const TETHER_ERR_LIFETIME: i32 = 7;
pub const TETHER_ERR_NOT_CONSTRUCTIBLE: i32 = 8;
pub const TETHER_ERR_MODULE: i32 = 9;
pub const TETHER_ERR_IO: i32 = 10;
pub const TETHER_ERR_NULL: i32 = 11;

/// Stable error code for a bridge error
pub fn error_code(err: &BridgeError) -> i32 {
    match err {
        BridgeError::KindMismatch { .. } | BridgeError::UnsupportedKind { .. } => TETHER_ERR_KIND,
        BridgeError::UnknownClass(_) | BridgeError::UnknownMethod { .. } | BridgeError::UnknownProperty { .. } => {
            TETHER_ERR_UNKNOWN
        }
        BridgeError::LayoutMismatch { .. } => TETHER_ERR_LAYOUT,
        BridgeError::ClassIdentityConflict { .. } => TETHER_ERR_IDENTITY,
        BridgeError::ArityMismatch { .. } => TETHER_ERR_ARITY,
        BridgeError::InvocationFailed { .. } => TETHER_ERR_INVOCATION,
        BridgeError::DoubleRelease { .. } | BridgeError::InvalidHandle { .. } => TETHER_ERR_LIFETIME,
        BridgeError::NotConstructible { .. } | BridgeError::SharingNotSupported { .. } => TETHER_ERR_NOT_CONSTRUCTIBLE,
        BridgeError::ModuleUnavailable { .. }
        | BridgeError::ModuleLoadFailed { .. }
        | BridgeError::DrainTimeout { .. }
        | BridgeError::Manifest { .. }
        | BridgeError::Library(_) => TETHER_ERR_MODULE,
        BridgeError::Io(_) | BridgeError::Config(_) => TETHER_ERR_IO,
    }
}

pub(crate) fn set_error(err: &BridgeError) {
    LAST_ERROR.with(|code| code.set(error_code(err)));
    LAST_MESSAGE.with(|message| *message.borrow_mut() = err.to_string());
}

pub(crate) fn set_null_error(what: &str) {
    LAST_ERROR.with(|code| code.set(TETHER_ERR_NULL));
    LAST_MESSAGE.with(|message| *message.borrow_mut() = format!("null {what}"));
}

pub(crate) fn clear_error() {
    LAST_ERROR.with(|code| code.set(TETHER_OK));
}

/// Record the error of a failed result and turn it into an option
pub(crate) fn report<T>(result: crate::Result<T>) -> Option<T> {
    match result {
        Ok(value) => {
            clear_error();
            Some(value)
        }
        Err(err) => {
            set_error(&err);
            None
        }
    }
}

/// The process-wide bridge
pub fn default_bridge() -> &'static Bridge {
    DEFAULT_BRIDGE.get_or_init(|| {
        let config = BridgeConfig::discover();
        debug!("default bridge created over the host heap");
        Bridge::with_host_heap(config)
    })
}

/// Initialize logging and the default bridge. Safe to call more than once.
#[no_mangle]
pub extern "C" fn tether_init() {
    let config = BridgeConfig::discover();
    // The guard must outlive the process for file logging
    if let Some(guard) = logging::init_with_config(config.logging.to_log_config()) {
        std::mem::forget(guard);
    }
    default_bridge();
    info!(abi = CELL_ABI_VERSION, "tether initialized");
}

/// Install an engine-supplied heap as the default bridge's heap.
/// Fails once the default bridge exists.
///
/// # Safety
/// `vtable` must satisfy the contract of [`ExternHeap::new`].
#[no_mangle]
pub unsafe extern "C" fn tether_init_with_heap(vtable: *const NativeHeapVTable) -> bool {
    if vtable.is_null() {
        set_null_error("heap vtable");
        return false;
    }
    let heap = Arc::new(ExternHeap::new(*vtable));
    let config = BridgeConfig::discover();
    let installed = DEFAULT_BRIDGE.set(Bridge::new(config, heap)).is_ok();
    if installed {
        info!("default bridge created over an external heap");
    }
    installed
}

#[no_mangle]
pub extern "C" fn tether_abi_version() -> u32 {
    CELL_ABI_VERSION
}

#[no_mangle]
pub extern "C" fn tether_cell_size() -> usize {
    CELL_SIZE
}

/// Error code of the last failed call on this thread; `TETHER_OK` after a
/// successful one
#[no_mangle]
pub extern "C" fn tether_last_error() -> i32 {
    LAST_ERROR.with(Cell::get)
}

/// Copy the last error message (not NUL-terminated) into `buf`; returns the
/// number of bytes written.
///
/// # Safety
/// `buf` must be writable for `capacity` bytes.
#[no_mangle]
pub unsafe extern "C" fn tether_last_error_message(buf: *mut u8, capacity: usize) -> usize {
    if buf.is_null() {
        return 0;
    }
    LAST_MESSAGE.with(|message| {
        let message = message.borrow();
        let len = message.len().min(capacity);
        core::ptr::copy_nonoverlapping(message.as_ptr(), buf, len);
        len
    })
}

#[cfg(test)]
mod tests;
