//! Bridge runtime instance
//!
//! One `Bridge` owns every registry. Nothing is process-global except the
//! default instance the C ABI uses.

use crate::anchor::AnchorRegistry;
use crate::class::ClassTable;
use crate::config::BridgeConfig;
use crate::error::{lifetime_violation, BridgeError};
use crate::invoke::BindingCache;
use crate::layout::StructRegistry;
use crate::module::ModuleTable;
use crate::native::{HostHeap, NativeHeap};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live diagnostic counters
#[derive(Debug, Default)]
pub struct StatCounters {
    pub(crate) invocations: AtomicU64,
    pub(crate) invocation_failures: AtomicU64,
    pub(crate) arity_failures: AtomicU64,
    pub(crate) objects_constructed: AtomicU64,
    pub(crate) objects_disposed: AtomicU64,
    pub(crate) anchors_swept: AtomicU64,
    pub(crate) lifetime_violations: AtomicU64,
    pub(crate) modules_loaded: AtomicU64,
    pub(crate) module_load_failures: AtomicU64,
}

impl StatCounters {
    /// Count a lifetime violation and apply the strictness policy
    #[track_caller]
    pub(crate) fn violation(&self, strict: bool, err: BridgeError) -> BridgeError {
        self.lifetime_violations.fetch_add(1, Ordering::Relaxed);
        lifetime_violation(strict, err)
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            invocation_failures: self.invocation_failures.load(Ordering::Relaxed),
            arity_failures: self.arity_failures.load(Ordering::Relaxed),
            objects_constructed: self.objects_constructed.load(Ordering::Relaxed),
            objects_disposed: self.objects_disposed.load(Ordering::Relaxed),
            anchors_swept: self.anchors_swept.load(Ordering::Relaxed),
            lifetime_violations: self.lifetime_violations.load(Ordering::Relaxed),
            modules_loaded: self.modules_loaded.load(Ordering::Relaxed),
            module_load_failures: self.module_load_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub invocations: u64,
    pub invocation_failures: u64,
    pub arity_failures: u64,
    pub objects_constructed: u64,
    pub objects_disposed: u64,
    pub anchors_swept: u64,
    pub lifetime_violations: u64,
    pub modules_loaded: u64,
    pub module_load_failures: u64,
}

pub struct Bridge {
    pub(crate) config: BridgeConfig,
    pub(crate) classes: ClassTable,
    pub(crate) anchors: Arc<AnchorRegistry>,
    pub(crate) structs: StructRegistry,
    pub(crate) bindings: BindingCache,
    pub(crate) modules: ModuleTable,
    pub(crate) heap: Arc<dyn NativeHeap>,
    pub(crate) stats: Arc<StatCounters>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, heap: Arc<dyn NativeHeap>) -> Self {
        Self {
            classes: ClassTable::new(),
            anchors: Arc::new(AnchorRegistry::new()),
            structs: StructRegistry::new(),
            bindings: BindingCache::new(config.invoke.binding_cache_capacity),
            modules: ModuleTable::new(),
            heap,
            stats: Arc::new(StatCounters::default()),
            config,
        }
    }

    /// Bridge over an in-process [`HostHeap`]
    pub fn with_host_heap(config: BridgeConfig) -> Self {
        Self::new(config, Arc::new(HostHeap::new()))
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    #[inline]
    pub fn anchors(&self) -> &Arc<AnchorRegistry> {
        &self.anchors
    }

    #[inline]
    pub fn structs(&self) -> &StructRegistry {
        &self.structs
    }

    #[inline]
    pub fn heap(&self) -> &Arc<dyn NativeHeap> {
        &self.heap
    }

    #[inline]
    pub fn bindings(&self) -> &BindingCache {
        &self.bindings
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats.snapshot()
    }

    #[inline]
    pub(crate) fn strict(&self) -> bool {
        self.config.lifetimes.strict
    }

    #[track_caller]
    pub(crate) fn violation(&self, err: BridgeError) -> BridgeError {
        self.stats.violation(self.strict(), err)
    }

    /// Identity conflicts follow the lifetime policy; other errors pass through
    pub(crate) fn identity_conflict(&self, err: BridgeError) -> BridgeError {
        match err {
            BridgeError::ClassIdentityConflict { .. } => self.violation(err),
            other => other,
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::with_host_heap(BridgeConfig::default())
    }
}
