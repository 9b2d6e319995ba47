//! Method binding cache
//!
//! Resolving an overload walks the class's method table; the result is
//! cached per (class, method, argument kinds). Bindings of a module are
//! evicted when it unloads.

use crate::anchor::ModuleId;
use crate::class::{ClassId, NativeEntry};
use crate::value::{Name, ValueKind};
use core::fmt;
use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type KindSignature = SmallVec<[ValueKind; 8]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub class: ClassId,
    pub method: Name,
    pub args: KindSignature,
}

impl BindingKey {
    pub fn new(class: ClassId, method: Name, args: &[ValueKind]) -> Self {
        Self {
            class,
            method,
            args: args.iter().copied().collect(),
        }
    }
}

/// A resolved, callable overload
#[derive(Clone)]
pub struct MethodBinding {
    pub class: ClassId,
    pub class_name: Arc<str>,
    pub name: Name,
    /// Index in the class's method table
    pub index: usize,
    pub params: Vec<ValueKind>,
    pub returns: ValueKind,
    pub is_static: bool,
    pub entry: NativeEntry,
    /// Module whose gate guards the call; `None` for host classes
    pub module: Option<ModuleId>,
}

impl MethodBinding {
    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}

impl fmt::Debug for MethodBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBinding")
            .field("method", &self.qualified_name())
            .field("index", &self.index)
            .field("params", &self.params)
            .field("is_static", &self.is_static)
            .field("module", &self.module)
            .finish()
    }
}

struct Entries {
    lru: LruCache<BindingKey, Arc<MethodBinding>>,
    /// Keys bound into each module, so unloading only visits its own
    by_module: HashMap<ModuleId, HashSet<BindingKey>>,
}

impl Entries {
    fn unindex(&mut self, key: &BindingKey, binding: &MethodBinding) {
        let Some(module) = binding.module else {
            return;
        };
        if let Some(keys) = self.by_module.get_mut(&module) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_module.remove(&module);
            }
        }
    }
}

pub struct BindingCache {
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BindingCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                by_module: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &BindingKey) -> Option<Arc<MethodBinding>> {
        let found = self.entries.lock().lru.get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, key: BindingKey, binding: Arc<MethodBinding>) {
        let module = binding.module;
        let mut entries = self.entries.lock();
        // Either the least recently used entry or the one under `key`
        if let Some((old_key, old)) = entries.lru.push(key.clone(), binding) {
            entries.unindex(&old_key, &old);
        }
        if let Some(module) = module {
            entries.by_module.entry(module).or_default().insert(key);
        }
    }

    /// Drop every binding into `module`; returns how many were removed
    pub fn evict_module(&self, module: ModuleId) -> usize {
        let mut entries = self.entries.lock();
        let Some(keys) = entries.by_module.remove(&module) else {
            return 0;
        };
        keys.iter().filter(|key| entries.lru.pop(*key).is_some()).count()
    }

    pub fn evict_class(&self, class: ClassId) -> usize {
        let mut entries = self.entries.lock();
        let keys: Vec<BindingKey> = entries
            .lru
            .iter()
            .filter(|(_, binding)| binding.class == class)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(binding) = entries.lru.pop(key) {
                entries.unindex(key, &binding);
            }
        }
        keys.len()
    }

    /// Modules with at least one cached binding
    pub(crate) fn module_count(&self) -> usize {
        self.entries.lock().by_module.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.by_module.clear();
    }

    /// (hits, misses)
    pub fn hit_rate(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}
