//! Module code and its registration step
//!
//! Classes are never discovered by introspection. A module's code runs once,
//! at load, against a [`ModuleRegistrar`] and declares everything it exports.

use super::library::Library;
use super::manifest::ModuleDir;
use crate::anchor::ModuleId;
use crate::bridge::Bridge;
use crate::class::{ClassBuilder, ClassDescriptor, ClassId, CodeHold, MethodDescriptor};
use crate::error::{BridgeError, Result};
use crate::layout::StructType;
use crate::logging::debug;
use core::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Symbol every module binary exports
pub const MODULE_INIT_SYMBOL: &str = "tether_module_init";

/// Signature of [`MODULE_INIT_SYMBOL`]; receives an opaque registrar pointer
/// for the `tether_registrar_*` C functions
pub type ModuleInitFn = unsafe extern "C" fn(registrar: *mut c_void) -> bool;

pub trait ModuleCode {
    fn name(&self) -> &str;

    /// Libraries loaded into the module's resolution context before it
    /// initializes
    fn dependencies(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Rebuild number of the binary, when the code comes from one
    fn binary_number(&self) -> Option<u64> {
        None
    }

    fn initialize(&self, registrar: &mut ModuleRegistrar<'_>) -> Result<()>;
}

/// Module compiled into the host
pub struct StaticModule<F> {
    name: String,
    init: F,
}

impl<F> StaticModule<F>
where
    F: Fn(&mut ModuleRegistrar<'_>) -> Result<()>,
{
    pub fn new(name: impl Into<String>, init: F) -> Self {
        Self { name: name.into(), init }
    }
}

impl<F> ModuleCode for StaticModule<F>
where
    F: Fn(&mut ModuleRegistrar<'_>) -> Result<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, registrar: &mut ModuleRegistrar<'_>) -> Result<()> {
        (self.init)(registrar)
    }
}

/// Module loaded from a numbered binary
#[derive(Debug, Clone)]
pub struct DylibModule {
    name: String,
    path: PathBuf,
    number: Option<u64>,
    dependencies: Vec<PathBuf>,
}

impl DylibModule {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            number: None,
            dependencies: Vec::new(),
        }
    }

    /// The highest-numbered binary of a module directory
    pub fn latest(dir: &ModuleDir) -> Result<Self> {
        let binary = dir.latest_binary()?.ok_or_else(|| BridgeError::Manifest {
            path: dir.output_dir(),
            reason: "no built binary".to_string(),
        })?;
        Ok(Self {
            name: dir.name().to_string(),
            path: binary.path,
            number: Some(binary.number),
            dependencies: dir.dependencies(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModuleCode for DylibModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<PathBuf> {
        self.dependencies.clone()
    }

    fn binary_number(&self) -> Option<u64> {
        self.number
    }

    fn initialize(&self, registrar: &mut ModuleRegistrar<'_>) -> Result<()> {
        let init = {
            let library = registrar.context_mut().load(&self.path)?;
            let symbol = library.symbol(MODULE_INIT_SYMBOL)?;
            unsafe { core::mem::transmute::<*mut c_void, ModuleInitFn>(symbol.as_ptr()) }
        };

        let ok = unsafe { init(registrar as *mut ModuleRegistrar<'_> as *mut c_void) };
        if !ok {
            return Err(BridgeError::Library(format!("{MODULE_INIT_SYMBOL} reported failure")));
        }
        Ok(())
    }
}

/// Libraries resolved on behalf of one module; nothing is shared between
/// modules. Classes registered through the context pin its libraries, so a
/// library closes once the context is released and the last instance of
/// those classes is gone.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    libraries: Vec<Arc<Library>>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, path: &Path) -> Result<&Library> {
        let library = Library::open(path)?;
        self.libraries.push(Arc::new(library));
        self.libraries
            .last()
            .map(|library| &**library)
            .ok_or_else(|| BridgeError::Library("library list empty after load".to_string()))
    }

    /// Shared hold on every library loaded so far; `None` when empty
    pub(crate) fn code_hold(&self) -> Option<CodeHold> {
        if self.libraries.is_empty() {
            return None;
        }
        Some(Arc::new(self.libraries.clone()))
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Let go of every library, most recently loaded first; returns how
    /// many. Libraries still pinned by live classes stay open until the
    /// last pin drops.
    pub fn release(mut self) -> usize {
        let count = self.libraries.len();
        while let Some(library) = self.libraries.pop() {
            if Arc::strong_count(&library) > 1 {
                debug!(library = %library.path().display(), "library stays open for live instances");
            }
            drop(library);
        }
        count
    }
}

/// Registration surface handed to a module while it initializes
pub struct ModuleRegistrar<'a> {
    bridge: &'a Bridge,
    module: ModuleId,
    context: ResolutionContext,
    staged: Vec<ClassBuilder>,
    classes: usize,
    methods: usize,
    structs: usize,
}

impl<'a> ModuleRegistrar<'a> {
    pub(crate) fn new(bridge: &'a Bridge, module: ModuleId) -> Self {
        Self {
            bridge,
            module,
            context: ResolutionContext::new(),
            staged: Vec::new(),
            classes: 0,
            methods: 0,
            structs: 0,
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn bridge(&self) -> &'a Bridge {
        self.bridge
    }

    /// Register a class owned by this module
    pub fn define_class(&mut self, builder: ClassBuilder) -> Result<Arc<ClassDescriptor>> {
        let methods = builder.method_count();
        let builder = match self.context.code_hold() {
            Some(code) => builder.keep_alive(code),
            None => builder,
        };
        let desc = self
            .bridge
            .classes
            .register(builder.owner(self.module))
            .map_err(|err| self.bridge.identity_conflict(err))?;
        self.classes += 1;
        self.methods += methods;
        Ok(desc)
    }

    /// Register a value type on behalf of this module
    pub fn define_struct(&mut self, ty: &StructType) -> Result<Arc<ClassDescriptor>> {
        let desc = self
            .bridge
            .structs
            .register_with_code(&self.bridge.classes, self.module, ty, self.context.code_hold())
            .map_err(|err| self.bridge.identity_conflict(err))?;
        self.structs += 1;
        Ok(desc)
    }

    /// Start a class whose methods arrive one at a time (C registration);
    /// staged classes are registered when initialization returns
    pub fn stage_class(&mut self, builder: ClassBuilder) -> usize {
        self.staged.push(builder);
        self.staged.len() - 1
    }

    pub fn stage_method(&mut self, class: usize, method: MethodDescriptor) -> Result<()> {
        let staged = self.staged.get_mut(class).ok_or_else(|| {
            BridgeError::UnknownClass(format!("staged class #{class}"))
        })?;
        let builder = core::mem::replace(staged, ClassBuilder::new(""));
        *staged = builder.method(method);
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<Vec<ClassId>> {
        let staged = core::mem::take(&mut self.staged);
        staged
            .into_iter()
            .map(|builder| self.define_class(builder).map(|desc| desc.id))
            .collect()
    }

    pub fn context_mut(&mut self) -> &mut ResolutionContext {
        &mut self.context
    }

    pub(crate) fn into_context(self) -> ResolutionContext {
        self.context
    }

    pub fn class_count(&self) -> usize {
        self.classes
    }

    pub fn method_count(&self) -> usize {
        self.methods
    }

    pub fn struct_count(&self) -> usize {
        self.structs
    }
}
