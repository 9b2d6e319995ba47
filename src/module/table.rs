//! Loaded modules and the load/unload lifecycle

use super::code::{ModuleCode, ModuleRegistrar, ResolutionContext};
use super::gate::{GatePass, ModuleGate};
use super::{ModuleInfo, ModuleState, UnloadReport};
use crate::anchor::ModuleId;
use crate::bridge::{Bridge, StatCounters};
use crate::error::{BridgeError, Result};
use crate::logging::{log_module_state, perf, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct ModuleEntry {
    name: String,
    gate: Arc<ModuleGate>,
    /// Serializes unload attempts
    lifecycle: Mutex<()>,
    state: Mutex<ModuleState>,
    info: Mutex<ModuleInfo>,
    context: Mutex<Option<ResolutionContext>>,
}

impl ModuleEntry {
    fn set_state(&self, id: ModuleId, state: ModuleState) {
        *self.state.lock() = state;
        self.info.lock().state = state;
        log_module_state(id.raw(), &self.name, state.as_str());
    }
}

/// Unloaded modules kept for `info`, `state` and `list`
const RETIRED_HISTORY: usize = 64;

pub struct ModuleTable {
    entries: RwLock<HashMap<ModuleId, Arc<ModuleEntry>>>,
    retired: Mutex<VecDeque<ModuleInfo>>,
    next_id: AtomicU32,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retired: Mutex::new(VecDeque::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Admit one invocation into `module`. Host code always passes.
    pub(crate) fn enter(&self, module: ModuleId) -> Result<GatePass> {
        if module.is_host() {
            return Ok(GatePass::host());
        }
        let gate = self
            .entry(module)
            .map(|entry| entry.gate.clone())
            .ok_or(BridgeError::ModuleUnavailable { module })?;
        gate.enter()
    }

    fn entry(&self, module: ModuleId) -> Option<Arc<ModuleEntry>> {
        self.entries.read().get(&module).cloned()
    }

    fn insert(&self, name: &str, binary: Option<u64>) -> (ModuleId, Arc<ModuleEntry>) {
        let id = ModuleId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(ModuleEntry {
            name: name.to_string(),
            gate: ModuleGate::new(id),
            lifecycle: Mutex::new(()),
            state: Mutex::new(ModuleState::Unloaded),
            info: Mutex::new(ModuleInfo::new(id, name, binary)),
            context: Mutex::new(None),
        });
        self.entries.write().insert(id, entry.clone());
        (id, entry)
    }

    /// Drop an unloaded module's entry, keeping its info in the bounded
    /// history. The oldest record falls out once the history is full.
    fn retire(&self, module: ModuleId) {
        let Some(entry) = self.entries.write().remove(&module) else {
            return;
        };
        let mut retired = self.retired.lock();
        if retired.len() == RETIRED_HISTORY {
            retired.pop_front();
        }
        retired.push_back(entry.info.lock().clone());
    }

    fn retired_info(&self, module: ModuleId) -> Option<ModuleInfo> {
        self.retired.lock().iter().find(|info| info.id == module).cloned()
    }

    pub fn state(&self, module: ModuleId) -> Option<ModuleState> {
        match self.entry(module) {
            Some(entry) => Some(*entry.state.lock()),
            None => self.retired_info(module).map(|info| info.state),
        }
    }

    pub fn info(&self, module: ModuleId) -> Option<ModuleInfo> {
        match self.entry(module) {
            Some(entry) => Some(entry.info.lock().clone()),
            None => self.retired_info(module),
        }
    }

    /// Modules with a live entry: loaded, or stuck unloading
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recently loaded module with `name` that is still loaded
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.name == name && *entry.state.lock() == ModuleState::Loaded)
            .map(|(id, _)| *id)
            .max()
    }

    /// Live modules plus the most recently unloaded ones, by id
    pub fn list(&self) -> Vec<ModuleInfo> {
        let mut infos: Vec<ModuleInfo> = self.entries.read().values().map(|entry| entry.info.lock().clone()).collect();
        infos.extend(self.retired.lock().iter().cloned());
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn loaded_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| *entry.state.lock() == ModuleState::Loaded)
            .count()
    }
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    #[inline]
    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    /// Load a module: resolve its dependencies into a fresh resolution
    /// context, then let it register its classes and value types.
    ///
    /// A module that fails goes straight to `Unloading`, has its partial
    /// state swept, ends `Unloaded`, and the failure is returned as
    /// `ModuleLoadFailed`. Other modules are untouched.
    ///
    /// If a call into the failed module is still running when the drain
    /// times out, nothing is swept: the module stays `Unloading` with its
    /// gate closed and a later `unload_module` finishes the job.
    pub fn load_module(&self, code: &dyn ModuleCode) -> Result<ModuleId> {
        let _timer = perf::track("module_load");
        let (id, entry) = self.modules.insert(code.name(), code.binary_number());

        let mut registrar = ModuleRegistrar::new(self, id);
        let outcome = Self::initialize_module(code, &mut registrar);
        let (classes, methods, structs) = (registrar.class_count(), registrar.method_count(), registrar.struct_count());
        *entry.context.lock() = Some(registrar.into_context());

        if let Err(err) = outcome {
            let reason = err.to_string();
            warn!(module = id.raw(), name = %entry.name, error = %reason, "module failed to load");
            entry.info.lock().last_error = Some(reason.clone());
            entry.set_state(id, ModuleState::Unloading);
            match entry.gate.close_and_drain(self.config.drain_timeout()) {
                Ok(()) => {
                    let _ = self.teardown(id, &entry);
                    entry.set_state(id, ModuleState::Unloaded);
                    self.modules.retire(id);
                }
                Err(drain) => {
                    warn!(module = id.raw(), error = %drain, "failed module left unloading with calls in flight");
                }
            }
            StatCounters::bump(&self.stats.module_load_failures);
            return Err(BridgeError::ModuleLoadFailed {
                name: entry.name.clone(),
                reason,
            });
        }

        {
            let mut info = entry.info.lock();
            info.classes = classes;
            info.methods = methods;
            info.structs = structs;
        }
        entry.set_state(id, ModuleState::Loaded);
        StatCounters::bump(&self.stats.modules_loaded);
        Ok(id)
    }

    fn initialize_module(code: &dyn ModuleCode, registrar: &mut ModuleRegistrar<'_>) -> Result<()> {
        for dependency in code.dependencies() {
            registrar.context_mut().load(&dependency)?;
        }
        code.initialize(registrar)?;
        registrar.finish()?;
        Ok(())
    }

    /// Unload a module.
    ///
    /// New invocations are refused first, in-flight ones are drained, then
    /// the module's anchors, bindings, classes and value types are swept and
    /// its resolution context released. Unloading an unloaded module is a
    /// no-op that returns an empty report.
    pub fn unload_module(&self, module: ModuleId) -> Result<UnloadReport> {
        let Some(entry) = self.modules.entry(module) else {
            return match self.modules.retired_info(module) {
                Some(_) => Ok(UnloadReport::default()),
                None => Err(BridgeError::ModuleUnavailable { module }),
            };
        };
        let _lifecycle = entry.lifecycle.lock();
        let _timer = perf::track("module_unload");

        match *entry.state.lock() {
            ModuleState::Unloaded => return Ok(UnloadReport::default()),
            ModuleState::Loaded | ModuleState::Unloading => {}
        }

        entry.set_state(module, ModuleState::Unloading);
        entry.gate.close_and_drain(self.config.drain_timeout())?;

        let report = self.teardown(module, &entry);
        entry.set_state(module, ModuleState::Unloaded);
        self.modules.retire(module);
        Ok(report)
    }

    fn teardown(&self, module: ModuleId, entry: &ModuleEntry) -> UnloadReport {
        let anchors = self.anchors.sweep(module);
        self.stats
            .anchors_swept
            .fetch_add(anchors.total() as u64, std::sync::atomic::Ordering::Relaxed);

        let bindings = self.bindings.evict_module(module);
        let classes = self.classes.remove_owned_by(module);
        let structs = self.structs.evict(&self.classes, module);
        let libraries = entry.context.lock().take().map_or(0, ResolutionContext::release);

        UnloadReport {
            anchors,
            bindings,
            classes,
            structs,
            libraries,
        }
    }
}
