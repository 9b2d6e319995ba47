//! Managed wrapper state

use super::{NativePtr, ObjectRef, StrongHandle};
use crate::anchor::{AnchorId, AnchorRegistry, ModuleId};
use crate::bridge::StatCounters;
use crate::error::{BridgeError, Result};
use core::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// How the wrapper came to own its instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Allocated through the bridge on behalf of managed code
    Constructed,
    /// Native-owned instance surfaced to managed code
    Surfaced,
}

/// What the wrapper holds on its instance
enum Hold {
    /// One strong reference, released on dispose or drop
    Owned(StrongHandle),
    /// Nothing; native code stays the owner of record
    Borrowed,
    Released,
}

/// Bridge state carried by a managed wrapper
pub struct BridgedObject {
    hold: Hold,
    obj: ObjectRef,
    anchor: AnchorId,
    module: ModuleId,
    origin: Origin,
    anchors: Arc<AnchorRegistry>,
    stats: Arc<StatCounters>,
    strict: bool,
    check_dispose_count: bool,
}

impl BridgedObject {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: StrongHandle,
        anchor: AnchorId,
        module: ModuleId,
        origin: Origin,
        anchors: Arc<AnchorRegistry>,
        stats: Arc<StatCounters>,
        strict: bool,
        check_dispose_count: bool,
    ) -> Self {
        Self {
            obj: handle.object_ref(),
            hold: Hold::Owned(handle),
            anchor,
            module,
            origin,
            anchors,
            stats,
            strict,
            check_dispose_count,
        }
    }

    /// Wrapper state for a single-owner native instance: no count is taken
    /// and none is given back
    pub(crate) fn borrowed(
        obj: ObjectRef,
        anchor: AnchorId,
        module: ModuleId,
        anchors: Arc<AnchorRegistry>,
        stats: Arc<StatCounters>,
        strict: bool,
    ) -> Self {
        Self {
            hold: Hold::Borrowed,
            obj,
            anchor,
            module,
            origin: Origin::Surfaced,
            anchors,
            stats,
            strict,
            check_dispose_count: false,
        }
    }

    /// Release the instance now.
    ///
    /// A constructed wrapper must be the only strong owner at this point.
    /// Disposing twice is a `DoubleRelease`.
    pub fn dispose(&mut self) -> Result<()> {
        match &self.hold {
            Hold::Released => {
                return Err(self.stats.violation(self.strict, BridgeError::DoubleRelease { addr: self.obj.addr.addr() }));
            }
            Hold::Owned(handle) if self.check_dispose_count && self.origin == Origin::Constructed => {
                if handle.strong_count() != 1 {
                    return Err(self.stats.violation(
                        self.strict,
                        BridgeError::InvalidHandle {
                            addr: self.obj.addr.addr(),
                            reason: "outstanding strong references at dispose",
                        },
                    ));
                }
            }
            Hold::Owned(_) | Hold::Borrowed => {}
        }

        let hold = core::mem::replace(&mut self.hold, Hold::Released);
        self.anchors.release(self.anchor);
        if let Hold::Owned(handle) = hold {
            handle.release().map_err(|err| {
                self.stats.lifetime_violations.fetch_add(1, Ordering::Relaxed);
                err
            })?;
        }
        self.stats.objects_disposed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        matches!(self.hold, Hold::Released)
    }

    /// Whether the wrapper owns a strong reference (false for surfaced
    /// single-owner instances)
    #[inline]
    pub fn is_owning(&self) -> bool {
        matches!(self.hold, Hold::Owned(_))
    }

    /// The instance this wrapper refers to (null-addressed once disposed)
    pub fn object_ref(&self) -> ObjectRef {
        match self.hold {
            Hold::Released => ObjectRef::new(self.obj.class, NativePtr::NULL),
            Hold::Owned(_) | Hold::Borrowed => self.obj,
        }
    }

    pub fn handle(&self) -> Option<&StrongHandle> {
        match &self.hold {
            Hold::Owned(handle) => Some(handle),
            Hold::Borrowed | Hold::Released => None,
        }
    }

    #[inline]
    pub fn anchor(&self) -> AnchorId {
        self.anchor
    }

    #[inline]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }
}

impl Drop for BridgedObject {
    fn drop(&mut self) {
        // Reclaimed without dispose
        match core::mem::replace(&mut self.hold, Hold::Released) {
            Hold::Owned(handle) => {
                self.anchors.release(self.anchor);
                drop(handle);
            }
            Hold::Borrowed => {
                self.anchors.release(self.anchor);
            }
            Hold::Released => {}
        }
    }
}

impl fmt::Debug for BridgedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgedObject")
            .field("object", &self.obj)
            .field("anchor", &self.anchor)
            .field("module", &self.module)
            .field("origin", &self.origin)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
