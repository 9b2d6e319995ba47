//! Module load/unload lifecycle
//!
//! States: `Unloaded -> Loaded -> Unloading -> Unloaded`. A module that fails
//! to load goes straight to `Unloading`.
//!
//! Layout:
//! - `code.rs` - module code, the registrar, resolution contexts
//! - `gate.rs` - per-module invocation gate used as the unload barrier
//! - `table.rs` - the module table and `Bridge::load_module`/`unload_module`
//! - `manifest.rs` - marker files and numbered binaries
//! - `library.rs` - platform dynamic loader

mod code;
mod gate;
mod library;
pub mod manifest;
mod table;

pub use code::{
    DylibModule, ModuleCode, ModuleInitFn, ModuleRegistrar, ResolutionContext, StaticModule,
    MODULE_INIT_SYMBOL,
};
pub use gate::{GatePass, ModuleGate};
pub use library::Library;
pub use manifest::{ModuleDir, ModuleManifest, NumberedBinary};
pub use table::ModuleTable;

use crate::anchor::{ModuleId, SweepReport};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Unloaded,
    Loaded,
    Unloading,
}

impl ModuleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
        }
    }
}

/// Diagnostic record of one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub state: ModuleState,
    pub classes: usize,
    pub methods: usize,
    pub structs: usize,
    /// Rebuild number of the loaded binary, for modules loaded from one
    pub binary: Option<u64>,
    pub last_error: Option<String>,
}

impl ModuleInfo {
    fn new(id: ModuleId, name: &str, binary: Option<u64>) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: ModuleState::Unloaded,
            classes: 0,
            methods: 0,
            structs: 0,
            binary,
            last_error: None,
        }
    }
}

/// What one unload swept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnloadReport {
    pub anchors: SweepReport,
    pub bindings: usize,
    pub classes: usize,
    pub structs: usize,
    pub libraries: usize,
}
