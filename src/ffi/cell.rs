//! Value cell functions

use super::{clear_error, report, set_error, set_null_error};
use crate::error::BridgeError;
use crate::value::{ValueCell, ValueKind};

/// Initialize raw storage as a null cell
///
/// # Safety
/// `cell` must point to writable storage of `tether_cell_size()` bytes that
/// does not hold a live cell.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_init(cell: *mut ValueCell) {
    if !cell.is_null() {
        cell.write(ValueCell::new());
    }
}

/// Release the cell's owned payload, leaving it null
///
/// # Safety
/// `cell` must point to an initialized cell.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_release(cell: *mut ValueCell) {
    if let Some(cell) = cell.as_mut() {
        cell.release();
    }
}

/// Discriminant of the cell; 0 (null) for a null pointer or an unknown tag
///
/// # Safety
/// `cell` must point to an initialized cell.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_kind(cell: *const ValueCell) -> u8 {
    match cell.as_ref() {
        Some(cell) => report(cell.kind()).map_or(0, |kind| kind.tag()),
        None => 0,
    }
}

/// # Safety
/// `cell` must point to an initialized cell.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_set_i64(cell: *mut ValueCell, value: i64) {
    if let Some(cell) = cell.as_mut() {
        cell.set(value);
    }
}

/// # Safety
/// `cell` must point to an initialized cell.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_set_f64(cell: *mut ValueCell, value: f64) {
    if let Some(cell) = cell.as_mut() {
        cell.set(value);
    }
}

/// # Safety
/// `cell` must point to an initialized cell.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_set_bool(cell: *mut ValueCell, value: bool) {
    if let Some(cell) = cell.as_mut() {
        cell.set(value);
    }
}

/// Copy `len` bytes of UTF-8 into the cell as an owned string
///
/// # Safety
/// `cell` must point to an initialized cell and `text` to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_set_str(cell: *mut ValueCell, text: *const u8, len: usize) -> bool {
    let Some(cell) = cell.as_mut() else {
        return false;
    };
    if text.is_null() && len > 0 {
        set_null_error("string");
        return false;
    }
    let bytes = if len == 0 { &[][..] } else { core::slice::from_raw_parts(text, len) };
    match core::str::from_utf8(bytes) {
        Ok(text) => {
            cell.set(text);
            clear_error();
            true
        }
        Err(_) => {
            set_error(&BridgeError::KindMismatch {
                expected: ValueKind::Str,
                found: ValueKind::Bytes,
            });
            false
        }
    }
}

/// Lenient integer read; `false` when the cell does not hold a value that
/// fits an i64
///
/// # Safety
/// `cell` must point to an initialized cell and `out` to a writable i64.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_get_i64(cell: *const ValueCell, out: *mut i64) -> bool {
    let (Some(cell), Some(out)) = (cell.as_ref(), out.as_mut()) else {
        return false;
    };
    match report(cell.read_as::<i64>(false)) {
        Some(value) => {
            *out = value;
            true
        }
        None => false,
    }
}

/// Lenient float read
///
/// # Safety
/// `cell` must point to an initialized cell and `out` to a writable f64.
#[no_mangle]
pub unsafe extern "C" fn tether_cell_get_f64(cell: *const ValueCell, out: *mut f64) -> bool {
    let (Some(cell), Some(out)) = (cell.as_ref(), out.as_mut()) else {
        return false;
    };
    match report(cell.read_as::<f64>(false)) {
        Some(value) => {
            *out = value;
            true
        }
        None => false,
    }
}
