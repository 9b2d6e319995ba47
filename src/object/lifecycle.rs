//! Construction, surfacing and raw reference operations

use super::{BridgedObject, ObjectRef, Origin, StrongHandle, WeakHandle};
use crate::anchor::{ManagedRef, ModuleId, Strength};
use crate::bridge::{Bridge, StatCounters};
use crate::class::{AllocationStrategy, ClassDescriptor, ClassId};
use crate::error::{BridgeError, Result};
use crate::logging::debug;
use crate::value::ValueCell;
use std::sync::Arc;

impl Bridge {
    /// Allocate a native instance for a managed wrapper.
    ///
    /// The wrapper is anchored strongly before the instance gets its back
    /// reference; the instance starts with strong count 1, owned by the
    /// returned state.
    pub fn construct(&self, module: ModuleId, class: ClassId, wrapper: &ManagedRef) -> Result<BridgedObject> {
        let desc = self.classes.require(class)?;
        self.construct_with(module, desc, wrapper)
    }

    pub fn construct_named(&self, module: ModuleId, class: &str, wrapper: &ManagedRef) -> Result<BridgedObject> {
        let desc = self.classes.require_name(class)?;
        self.construct_with(module, desc, wrapper)
    }

    fn construct_with(&self, module: ModuleId, desc: Arc<ClassDescriptor>, wrapper: &ManagedRef) -> Result<BridgedObject> {
        if desc.allocation == AllocationStrategy::None {
            return Err(BridgeError::NotConstructible {
                class: desc.name.clone(),
                reason: "class has no allocation strategy",
            });
        }

        let _pass = self.modules.enter(module)?;

        let ptr = self.heap.allocate(&desc)?;
        let handle = unsafe { StrongHandle::adopt(desc.clone(), ptr, self.heap.clone(), self.strict()) };

        let anchor = self.anchors.register(module, wrapper, Strength::Strong);
        if let Err(err) = self.heap.set_back_reference(ptr, anchor) {
            self.anchors.release(anchor);
            drop(handle);
            return Err(err);
        }

        StatCounters::bump(&self.stats.objects_constructed);
        debug!(class = %desc.name, addr = ptr.addr(), anchor = anchor.raw(), "object constructed");

        Ok(BridgedObject::new(
            handle,
            anchor,
            module,
            Origin::Constructed,
            self.anchors.clone(),
            self.stats.clone(),
            self.strict(),
            self.config.lifetimes.check_dispose_count,
        ))
    }

    /// Wrap a native-owned instance for managed code.
    ///
    /// The wrapper is anchored weakly, so the native side does not keep it
    /// alive. For ref-counted classes the wrapper takes one strong
    /// reference of its own; single-owner instances stay solely native-owned
    /// and the wrapper neither retains nor releases them.
    pub fn surface(&self, module: ModuleId, obj: ObjectRef, wrapper: &ManagedRef) -> Result<BridgedObject> {
        let desc = self.classes.require(obj.class)?;
        self.check_instance(&desc, obj)?;

        let _pass = self.modules.enter(module)?;

        let handle = if desc.allocation.is_shared() {
            self.heap.retain(obj.addr).map_err(|err| self.violation(err))?;
            Some(unsafe { StrongHandle::adopt(desc, obj.addr, self.heap.clone(), self.strict()) })
        } else {
            None
        };

        let anchor = self.anchors.register(module, wrapper, Strength::Weak);
        if self.heap.back_reference(obj.addr).is_none() {
            if let Err(err) = self.heap.set_back_reference(obj.addr, anchor) {
                self.anchors.release(anchor);
                drop(handle);
                return Err(err);
            }
        }

        Ok(match handle {
            Some(handle) => BridgedObject::new(
                handle,
                anchor,
                module,
                Origin::Surfaced,
                self.anchors.clone(),
                self.stats.clone(),
                self.strict(),
                self.config.lifetimes.check_dispose_count,
            ),
            None => BridgedObject::borrowed(
                obj,
                anchor,
                module,
                self.anchors.clone(),
                self.stats.clone(),
                self.strict(),
            ),
        })
    }

    /// Take a new strong reference to a live instance
    pub fn retain(&self, obj: ObjectRef) -> Result<StrongHandle> {
        let desc = self.classes.require(obj.class)?;
        if !desc.allocation.is_shared() {
            return Err(BridgeError::SharingNotSupported { class: desc.name.clone() });
        }
        self.check_instance(&desc, obj)?;
        self.heap.retain(obj.addr).map_err(|err| self.violation(err))?;
        Ok(unsafe { StrongHandle::adopt(desc, obj.addr, self.heap.clone(), self.strict()) })
    }

    /// Drop one strong reference owned by the caller; returns the remaining count.
    /// A null reference is a no-op.
    pub fn release_raw(&self, obj: ObjectRef) -> Result<u32> {
        if obj.is_null() {
            return Ok(0);
        }
        self.heap.release(obj.addr).map_err(|err| self.violation(err))
    }

    pub fn downgrade(&self, handle: &StrongHandle) -> Result<WeakHandle> {
        handle.downgrade()
    }

    /// Managed wrapper of an instance, found through its back reference
    pub fn wrapper_of(&self, obj: ObjectRef) -> Option<ManagedRef> {
        let anchor = self.heap.back_reference(obj.addr)?;
        self.anchors.resolve(anchor)
    }

    /// Object reference stored in a cell, checked against the live heap
    pub fn object_in(&self, cell: &ValueCell) -> Result<ObjectRef> {
        let obj = cell.read_as::<ObjectRef>(true)?;
        if obj.is_null() {
            return Ok(obj);
        }
        let desc = self.classes.require(obj.class)?;
        self.check_instance(&desc, obj)?;
        Ok(obj)
    }

    fn check_instance(&self, desc: &ClassDescriptor, obj: ObjectRef) -> Result<()> {
        if obj.is_null() {
            return Err(self.violation(BridgeError::InvalidHandle { addr: 0, reason: "null instance" }));
        }
        match self.heap.class_of(obj.addr) {
            Some(actual) if actual != desc.id => Err(self.violation(BridgeError::InvalidHandle {
                addr: obj.addr.addr(),
                reason: "instance belongs to another class",
            })),
            _ if !self.heap.is_live(obj.addr) => Err(self.violation(BridgeError::InvalidHandle {
                addr: obj.addr.addr(),
                reason: "instance already destroyed",
            })),
            _ => Ok(()),
        }
    }
}
