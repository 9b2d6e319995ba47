//! Anchor registry

use super::{AnchorId, ModuleId, Strength};
use crate::logging::{log_anchor_register, log_anchor_sweep};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Managed object as seen by the bridge
pub type ManagedRef = Arc<dyn Any + Send + Sync>;

type WeakManagedRef = Weak<dyn Any + Send + Sync>;

enum Hold {
    Strong(ManagedRef),
    Weak(WeakManagedRef),
}

impl Hold {
    fn resolve(&self) -> Option<ManagedRef> {
        match self {
            Hold::Strong(obj) => Some(obj.clone()),
            Hold::Weak(obj) => obj.upgrade(),
        }
    }
}

struct Entry {
    module: ModuleId,
    hold: Hold,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<AnchorId, Entry>,
    by_module: HashMap<ModuleId, HashSet<AnchorId>>,
}

impl Inner {
    fn remove(&mut self, id: AnchorId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        if let Some(ids) = self.by_module.get_mut(&entry.module) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_module.remove(&entry.module);
            }
        }
        Some(entry)
    }
}

/// Anchors removed by a module sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub strong: usize,
    pub weak: usize,
}

impl SweepReport {
    #[inline]
    pub fn total(&self) -> usize {
        self.strong + self.weak
    }
}

pub struct AnchorRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `obj` on behalf of `module` and return a fresh id
    pub fn register(&self, module: ModuleId, obj: &ManagedRef, strength: Strength) -> AnchorId {
        let id = AnchorId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let hold = match strength {
            Strength::Strong => Hold::Strong(obj.clone()),
            Strength::Weak => Hold::Weak(Arc::downgrade(obj)),
        };

        {
            let mut inner = self.inner.lock();
            inner.entries.insert(id, Entry { module, hold });
            inner.by_module.entry(module).or_default().insert(id);
        }

        log_anchor_register(id.raw(), module.raw(), strength == Strength::Strong);
        id
    }

    /// Managed object behind an anchor; `None` when released, swept or collected
    pub fn resolve(&self, id: AnchorId) -> Option<ManagedRef> {
        self.inner.lock().entries.get(&id).and_then(|e| e.hold.resolve())
    }

    /// `Some(true)` when a weak anchor's target has been collected,
    /// `None` when the id is not registered
    pub fn is_collected(&self, id: AnchorId) -> Option<bool> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(&id)?;
        Some(match &entry.hold {
            Hold::Strong(_) => false,
            Hold::Weak(w) => w.strong_count() == 0,
        })
    }

    pub fn strength(&self, id: AnchorId) -> Option<Strength> {
        self.inner.lock().entries.get(&id).map(|e| match e.hold {
            Hold::Strong(_) => Strength::Strong,
            Hold::Weak(_) => Strength::Weak,
        })
    }

    /// Remove one anchor. Returns `false` if it was not registered.
    pub fn release(&self, id: AnchorId) -> bool {
        let removed = self.inner.lock().remove(id);
        // Drop the hold outside the lock
        removed.is_some()
    }

    /// Remove every anchor owned by `module`
    pub fn sweep(&self, module: ModuleId) -> SweepReport {
        let removed: Vec<Entry> = {
            let mut inner = self.inner.lock();
            let ids = inner.by_module.remove(&module).unwrap_or_default();
            ids.into_iter().filter_map(|id| inner.entries.remove(&id)).collect()
        };

        let mut report = SweepReport::default();
        for entry in &removed {
            match entry.hold {
                Hold::Strong(_) => report.strong += 1,
                Hold::Weak(_) => report.weak += 1,
            }
        }
        drop(removed);

        log_anchor_sweep(module.raw(), report.strong, report.weak);
        report
    }

    /// Drop weak anchors whose targets have been collected
    pub fn prune_collected(&self) -> usize {
        let removed: Vec<Entry> = {
            let mut inner = self.inner.lock();
            let dead: Vec<AnchorId> = inner
                .entries
                .iter()
                .filter(|(_, e)| matches!(&e.hold, Hold::Weak(w) if w.strong_count() == 0))
                .map(|(id, _)| *id)
                .collect();
            dead.into_iter().filter_map(|id| inner.remove(id)).collect()
        };
        removed.len()
    }

    pub fn count_for(&self, module: ModuleId) -> usize {
        self.inner.lock().by_module.get(&module).map_or(0, HashSet::len)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AnchorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII anchor registration, released when dropped
pub struct AnchorGuard {
    registry: Arc<AnchorRegistry>,
    id: AnchorId,
}

impl AnchorGuard {
    pub fn new(registry: Arc<AnchorRegistry>, module: ModuleId, obj: &ManagedRef, strength: Strength) -> Self {
        let id = registry.register(module, obj, strength);
        Self { registry, id }
    }

    #[inline]
    pub fn id(&self) -> AnchorId {
        self.id
    }
}

impl Drop for AnchorGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
