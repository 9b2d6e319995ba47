//! Safe view of an invocation for Rust-implemented native entries

use crate::error::{BridgeError, Result};
use crate::object::ObjectRef;
use crate::value::{FromCell, Value, ValueCell};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Argument cells (`this` first for instance methods) and the result cell
pub struct CallFrame<'a> {
    args: &'a [ValueCell],
    out: &'a mut ValueCell,
}

impl<'a> CallFrame<'a> {
    /// # Safety
    /// `args` must point to `len` initialized cells and `out` to a writable
    /// cell, both valid for `'a`.
    pub unsafe fn from_raw(args: *const ValueCell, len: usize, out: *mut ValueCell) -> Option<Self> {
        if out.is_null() || (args.is_null() && len > 0) {
            return None;
        }
        let args = if len == 0 { &[][..] } else { core::slice::from_raw_parts(args, len) };
        Some(Self { args, out: &mut *out })
    }

    /// Run `f` over a raw frame and report success the way native entries do.
    /// Errors and panics both become `false`.
    ///
    /// # Safety
    /// Same contract as [`CallFrame::from_raw`].
    pub unsafe fn run(
        args: *const ValueCell,
        len: usize,
        out: *mut ValueCell,
        f: impl FnOnce(&mut CallFrame<'_>) -> Result<()>,
    ) -> bool {
        let Some(mut frame) = Self::from_raw(args, len, out) else {
            return false;
        };
        matches!(catch_unwind(AssertUnwindSafe(|| f(&mut frame))), Ok(Ok(())))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn arg(&self, index: usize) -> Result<&ValueCell> {
        self.args.get(index).ok_or(BridgeError::ArityMismatch {
            method: "<frame>".to_string(),
            expected: index + 1,
            got: self.args.len(),
        })
    }

    /// Lenient typed read of argument `index`
    pub fn read<T: FromCell>(&self, index: usize) -> Result<T> {
        self.arg(index)?.read_as::<T>(false)
    }

    /// Receiver of an instance method
    pub fn this(&self) -> Result<ObjectRef> {
        self.arg(0)?.read_as::<ObjectRef>(true)
    }

    /// Store the result
    pub fn ret(&mut self, value: impl Into<Value>) {
        self.out.set(value);
    }
}

/// Define an `extern "C"` native entry from a body over a [`CallFrame`].
///
/// ```ignore
/// native_method!(add, |frame| {
///     let sum = frame.read::<i64>(0)? + frame.read::<i64>(1)?;
///     frame.ret(sum);
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! native_method {
    ($name:ident, |$frame:ident| $body:block) => {
        unsafe extern "C" fn $name(
            args: *const $crate::value::ValueCell,
            len: usize,
            out: *mut $crate::value::ValueCell,
        ) -> bool {
            $crate::invoke::CallFrame::run(args, len, out, |$frame: &mut $crate::invoke::CallFrame<'_>| -> $crate::Result<()> { $body })
        }
    };
}
