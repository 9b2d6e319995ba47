//! Synthesized value-type registry
//!
//! Keyed by type identity. A type is synthesized once; later registrations
//! with the same layout reuse the cached descriptor, so a hot-reloaded module
//! and its predecessor share it. The class goes away when the last module
//! using it is evicted.

use super::StructType;
use crate::anchor::ModuleId;
use crate::bridge::Bridge;
use crate::class::{ClassBuilder, ClassDescriptor, ClassFlags, ClassId, ClassTable, CodeHold};
use crate::error::{BridgeError, Result};
use crate::layout::TypeIdentity;
use crate::logging::log_struct_registered;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Synthesized {
    layout: blake3::Hash,
    descriptor: Arc<ClassDescriptor>,
    users: Vec<ModuleId>,
}

#[derive(Default)]
struct Types {
    by_identity: HashMap<TypeIdentity, Synthesized>,
    /// Identities each module uses, so eviction only visits those
    by_module: HashMap<ModuleId, HashSet<TypeIdentity>>,
}

pub struct StructRegistry {
    types: Mutex<Types>,
    synthesized: AtomicU64,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self {
            types: Mutex::new(Types::default()),
            synthesized: AtomicU64::new(0),
        }
    }

    /// Validate and register a value type on behalf of `module`.
    ///
    /// - declared size or any field offset differs from the native layout:
    ///   `LayoutMismatch`
    /// - identity already registered with a different layout:
    ///   `ClassIdentityConflict`
    pub fn register(&self, classes: &ClassTable, module: ModuleId, ty: &StructType) -> Result<Arc<ClassDescriptor>> {
        self.register_with_code(classes, module, ty, None)
    }

    /// As [`register`](Self::register); a newly synthesized class also pins
    /// `code`, where the type's destructor lives
    pub(crate) fn register_with_code(
        &self,
        classes: &ClassTable,
        module: ModuleId,
        ty: &StructType,
        code: Option<CodeHold>,
    ) -> Result<Arc<ClassDescriptor>> {
        ty.validate()?;
        let layout = ty.layout_hash();

        let mut types = self.types.lock();
        let types = &mut *types;
        if let Some(existing) = types.by_identity.get_mut(&ty.identity) {
            if existing.layout != layout {
                return Err(BridgeError::ClassIdentityConflict {
                    name: ty.name.clone(),
                    detail: "already registered with a different layout".to_string(),
                });
            }
            if !existing.users.contains(&module) {
                existing.users.push(module);
            }
            types.by_module.entry(module).or_default().insert(ty.identity);
            return Ok(existing.descriptor.clone());
        }

        let pod = ty.is_plain_old_data();
        let mut flags = ClassFlags::VALUE_TYPE;
        if pod {
            flags.insert(ClassFlags::PLAIN_OLD_DATA);
        }

        let mut builder = ClassBuilder::new(ty.name.clone())
            .size(ty.size)
            .align(ty.align)
            .flags(flags)
            .identity(ty.identity);
        for field in &ty.fields {
            builder = builder.field(&field.name, field.actual_offset, field.kind);
        }
        if let Some(destroy) = ty.destroy {
            builder = builder.destroy(destroy);
        }
        if let Some(code) = code {
            builder = builder.keep_alive(code);
        }

        let descriptor = classes.register(builder)?;
        types.by_module.entry(module).or_default().insert(ty.identity);
        types.by_identity.insert(
            ty.identity,
            Synthesized {
                layout,
                descriptor: descriptor.clone(),
                users: vec![module],
            },
        );
        self.synthesized.fetch_add(1, Ordering::Relaxed);
        log_struct_registered(&ty.name, ty.size, pod);

        Ok(descriptor)
    }

    pub fn lookup(&self, identity: TypeIdentity) -> Option<Arc<ClassDescriptor>> {
        self.types.lock().by_identity.get(&identity).map(|s| s.descriptor.clone())
    }

    /// Drop `module`'s use of every type; types with no remaining users are
    /// removed from the class table. Returns how many were removed.
    pub fn evict(&self, classes: &ClassTable, module: ModuleId) -> usize {
        let dead: Vec<ClassId> = {
            let mut types = self.types.lock();
            let types = &mut *types;
            let used = types.by_module.remove(&module).unwrap_or_default();
            let mut dead = Vec::new();
            for identity in used {
                let Some(entry) = types.by_identity.get_mut(&identity) else {
                    continue;
                };
                entry.users.retain(|m| *m != module);
                if entry.users.is_empty() {
                    dead.push(entry.descriptor.id);
                    types.by_identity.remove(&identity);
                }
            }
            dead
        };

        dead.into_iter().filter(|id| classes.remove(*id)).count()
    }

    /// Number of synthesis runs since creation
    pub fn synthesized_count(&self) -> u64 {
        self.synthesized.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.types.lock().by_identity.len()
    }

    /// Modules currently holding a value type
    pub(crate) fn module_count(&self) -> usize {
        self.types.lock().by_module.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StructRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    /// Register a value type for `module`; an identity conflict follows the
    /// lifetime policy
    pub fn register_struct(&self, module: ModuleId, ty: &StructType) -> Result<Arc<ClassDescriptor>> {
        self.structs
            .register(&self.classes, module, ty)
            .map_err(|err| self.identity_conflict(err))
    }
}
