//! Class descriptor table - lookup by stable name and by opaque id
//!
//! Names may be registered by several modules at once (an old and a freshly
//! rebuilt module during hot reload); name lookups resolve to the most recent
//! registration and fall back to the previous one when it is removed.

use super::descriptor::{ClassBuilder, ClassDescriptor, ClassId};
use crate::anchor::ModuleId;
use crate::error::{BridgeError, Result};
use crate::logging::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct TableInner {
    by_id: HashMap<ClassId, Arc<ClassDescriptor>>,
    by_name: HashMap<String, Vec<ClassId>>,
    by_owner: HashMap<Option<ModuleId>, Vec<ClassId>>,
}

impl TableInner {
    fn unlink_name(&mut self, name: &str, id: ClassId) {
        if let Some(names) = self.by_name.get_mut(name) {
            names.retain(|n| *n != id);
            if names.is_empty() {
                self.by_name.remove(name);
            }
        }
    }
}

pub struct ClassTable {
    inner: RwLock<TableInner>,
    next_id: AtomicU32,
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner::default()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register a class and assign its id.
    ///
    /// The same owner registering a name twice is a `ClassIdentityConflict`.
    pub fn register(&self, builder: ClassBuilder) -> Result<Arc<ClassDescriptor>> {
        let owner = builder.owner_ref();
        let mut inner = self.inner.write();

        if let Some(ids) = inner.by_name.get(builder.name()) {
            let clash = ids
                .iter()
                .filter_map(|id| inner.by_id.get(id))
                .any(|existing| existing.owner == owner);
            if clash {
                return Err(BridgeError::ClassIdentityConflict {
                    name: builder.name().to_string(),
                    detail: "already registered by the same owner".to_string(),
                });
            }
        }

        let id = ClassId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let descriptor = Arc::new(builder.build(id));

        inner.by_id.insert(id, descriptor.clone());
        inner.by_name.entry(descriptor.name.clone()).or_default().push(id);
        inner.by_owner.entry(owner).or_default().push(id);

        debug!(
            class = %descriptor.name,
            id = id.raw(),
            allocation = ?descriptor.allocation,
            methods = descriptor.methods.len(),
            "class registered"
        );

        Ok(descriptor)
    }

    #[inline]
    pub fn by_id(&self, id: ClassId) -> Option<Arc<ClassDescriptor>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?.last()?;
        inner.by_id.get(id).cloned()
    }

    /// Lookup by id, failing with `UnknownClass`
    pub fn require(&self, id: ClassId) -> Result<Arc<ClassDescriptor>> {
        self.by_id(id)
            .ok_or_else(|| BridgeError::UnknownClass(id.to_string()))
    }

    /// Lookup by name, failing with `UnknownClass`
    pub fn require_name(&self, name: &str) -> Result<Arc<ClassDescriptor>> {
        self.by_name(name)
            .ok_or_else(|| BridgeError::UnknownClass(name.to_string()))
    }

    /// Remove every class registered by a module; returns how many went away
    pub fn remove_owned_by(&self, module: ModuleId) -> usize {
        let removed: Vec<Arc<ClassDescriptor>> = {
            let mut inner = self.inner.write();
            let ids = inner.by_owner.remove(&Some(module)).unwrap_or_default();
            let mut removed = Vec::with_capacity(ids.len());

            for id in ids {
                if let Some(desc) = inner.by_id.remove(&id) {
                    inner.unlink_name(&desc.name, id);
                    removed.push(desc);
                }
            }
            removed
        };

        removed.len()
    }

    /// Remove a single class
    pub fn remove(&self, id: ClassId) -> bool {
        let mut inner = self.inner.write();
        let Some(desc) = inner.by_id.remove(&id) else {
            return false;
        };

        inner.unlink_name(&desc.name, id);
        if let Some(ids) = inner.by_owner.get_mut(&desc.owner) {
            ids.retain(|n| *n != id);
        }
        true
    }

    pub fn owned_count(&self, module: ModuleId) -> usize {
        self.inner
            .read()
            .by_owner
            .get(&Some(module))
            .map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}
