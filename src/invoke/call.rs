//! Method and property invocation

use super::binding::{BindingKey, MethodBinding};
use crate::anchor::ModuleId;
use crate::bridge::{Bridge, StatCounters};
use crate::class::{ClassDescriptor, ClassId};
use crate::error::{BridgeError, Result};
use crate::logging::{log_invoke, log_invoke_failed};
use crate::object::ObjectRef;
use crate::value::{Name, Value, ValueCell, ValueKind};
use smallvec::SmallVec;
use std::sync::Arc;

/// Argument cells for one call; short calls stay on the stack
type ArgCells = SmallVec<[ValueCell; 8]>;

impl Bridge {
    /// Invoke `method` on `class` with `args`.
    ///
    /// Instance methods take their receiver through `this`; static methods
    /// must be called without one. Overloads are picked by argument kinds.
    pub fn invoke(&self, class: ClassId, method: &str, this: Option<ObjectRef>, args: &[Value]) -> Result<ValueCell> {
        let desc = self.classes.require(class)?;
        let kinds: SmallVec<[ValueKind; 8]> = args.iter().map(Value::kind).collect();
        let binding = self.bind(&desc, method, &kinds)?;
        self.invoke_binding(&binding, this, args)
    }

    pub fn invoke_named(&self, class: &str, method: &str, this: Option<ObjectRef>, args: &[Value]) -> Result<ValueCell> {
        let desc = self.classes.require_name(class)?;
        self.invoke(desc.id, method, this, args)
    }

    /// Resolve (or fetch from cache) the overload for a set of argument kinds
    pub fn bind(&self, desc: &ClassDescriptor, method: &str, kinds: &[ValueKind]) -> Result<Arc<MethodBinding>> {
        let unknown = || BridgeError::UnknownMethod {
            class: desc.name.clone(),
            method: method.to_string(),
            args: kinds.to_vec(),
        };

        let name = Name::lookup(method).ok_or_else(unknown)?;
        let key = BindingKey::new(desc.id, name, kinds);
        if let Some(binding) = self.bindings.get(&key) {
            return Ok(binding);
        }

        let Some((index, found)) = desc.resolve_method(method, kinds) else {
            let mut overloads = desc.overloads(method).peekable();
            let Some((_, first)) = overloads.peek().copied() else {
                return Err(unknown());
            };
            if overloads.all(|(_, m)| m.arity() != kinds.len()) {
                StatCounters::bump(&self.stats.arity_failures);
                return Err(BridgeError::ArityMismatch {
                    method: format!("{}.{}", desc.name, method),
                    expected: first.arity(),
                    got: kinds.len(),
                });
            }
            return Err(unknown());
        };

        let entry = found.entry.ok_or_else(unknown)?;
        let binding = Arc::new(MethodBinding {
            class: desc.id,
            class_name: Arc::from(desc.name.as_str()),
            name,
            index,
            params: found.params.clone(),
            returns: found.returns,
            is_static: found.is_static,
            entry,
            module: desc.owner,
        });
        self.bindings.insert(key, binding.clone());
        Ok(binding)
    }

    /// Invoke with caller-built cells; null arguments may fill reference
    /// parameters. Cells are copied, the caller keeps ownership.
    pub fn invoke_cells(&self, class: ClassId, method: &str, this: Option<ObjectRef>, args: &[ValueCell]) -> Result<ValueCell> {
        let desc = self.classes.require(class)?;
        let kinds = args.iter().map(ValueCell::kind).collect::<Result<SmallVec<[ValueKind; 8]>>>()?;
        let binding = self.bind(&desc, method, &kinds)?;
        self.precheck(&binding, this, args.len())?;

        let mut cells = ArgCells::with_capacity(args.len() + 1);
        cells.extend(this.map(ValueCell::from_value));
        for (arg, &param) in args.iter().zip(&binding.params) {
            cells.push(widen_cell(arg.try_clone_value()?, param));
        }
        self.cross(&binding, cells)
    }

    /// Call a resolved binding.
    ///
    /// Arity is checked before anything crosses; argument cells are released
    /// on every exit path.
    pub fn invoke_binding(&self, binding: &MethodBinding, this: Option<ObjectRef>, args: &[Value]) -> Result<ValueCell> {
        self.precheck(binding, this, args.len())?;

        let mut cells = ArgCells::with_capacity(args.len() + 1);
        cells.extend(this.map(ValueCell::from_value));
        for (arg, &param) in args.iter().zip(&binding.params) {
            cells.push(widen_cell(ValueCell::from_value(arg.clone()), param));
        }
        self.cross(binding, cells)
    }

    fn precheck(&self, binding: &MethodBinding, this: Option<ObjectRef>, argc: usize) -> Result<()> {
        let receiver_ok = binding.is_static == this.is_none();
        if argc != binding.arity() || !receiver_ok {
            StatCounters::bump(&self.stats.arity_failures);
            let receiver = usize::from(!binding.is_static);
            return Err(BridgeError::ArityMismatch {
                method: binding.qualified_name(),
                expected: binding.arity() + receiver,
                got: argc + usize::from(this.is_some()),
            });
        }
        match this {
            Some(obj) => self.checked_receiver(binding, obj),
            None => Ok(()),
        }
    }

    /// Hand the cells to the native entry. A failed call discards whatever
    /// was written to the result cell.
    fn cross(&self, binding: &MethodBinding, cells: ArgCells) -> Result<ValueCell> {
        let _pass = self.modules.enter(binding.module.unwrap_or(ModuleId::HOST))?;

        let class_name: &str = &binding.class_name;
        let method = binding.name.as_str();
        log_invoke(class_name, &method, cells.len());
        StatCounters::bump(&self.stats.invocations);

        let mut out = ValueCell::new();
        let ok = unsafe { (binding.entry)(cells.as_ptr(), cells.len(), &mut out) };
        drop(cells);

        if !ok {
            out.release();
            StatCounters::bump(&self.stats.invocation_failures);
            log_invoke_failed(class_name, &method, "native entry reported failure");
            return Err(BridgeError::InvocationFailed { method: binding.qualified_name() });
        }

        if self.config.invoke.strict_kinds && binding.returns != ValueKind::Null && !out.is_null() {
            let found = out.kind()?;
            if found != binding.returns {
                return Err(BridgeError::KindMismatch { expected: binding.returns, found });
            }
        }

        Ok(out)
    }

    /// Read a property through its getter
    pub fn get_property(&self, obj: ObjectRef, property: &str) -> Result<ValueCell> {
        let desc = self.classes.require(obj.class)?;
        let getter = desc
            .property(property)
            .and_then(|p| p.getter)
            .ok_or_else(|| BridgeError::UnknownProperty {
                class: desc.name.clone(),
                property: property.to_string(),
            })?;
        self.invoke(desc.id, &getter.as_str(), Some(obj), &[])
    }

    /// Write a property through its setter
    pub fn set_property(&self, obj: ObjectRef, property: &str, value: impl Into<Value>) -> Result<()> {
        let desc = self.classes.require(obj.class)?;
        let setter = desc
            .property(property)
            .and_then(|p| p.setter)
            .ok_or_else(|| BridgeError::UnknownProperty {
                class: desc.name.clone(),
                property: property.to_string(),
            })?;
        self.invoke(desc.id, &setter.as_str(), Some(obj), &[value.into()])?;
        Ok(())
    }

    fn checked_receiver(&self, binding: &MethodBinding, obj: ObjectRef) -> Result<()> {
        if obj.is_null() || obj.class != binding.class {
            return Err(self.violation(BridgeError::InvalidHandle {
                addr: obj.addr.addr(),
                reason: "receiver is not an instance of the method's class",
            }));
        }
        if !self.heap.is_live(obj.addr) {
            return Err(self.violation(BridgeError::InvalidHandle {
                addr: obj.addr.addr(),
                reason: "receiver already destroyed",
            }));
        }
        Ok(())
    }
}

/// Re-encode a numeric cell as the parameter's kind when it widens to it
fn widen_cell(cell: ValueCell, param: ValueKind) -> ValueCell {
    let widened = match cell.get() {
        Ok(value) if value.kind() != param && value.kind().widens_to(param) => {
            if param.is_float() {
                value.as_float().map(|f| match param {
                    ValueKind::F32 => Value::F32(f as f32),
                    _ => Value::F64(f),
                })
            } else {
                value.as_integer().and_then(|i| integer_of_kind(i, param))
            }
        }
        _ => None,
    };

    match widened {
        Some(value) => ValueCell::from_value(value),
        None => cell,
    }
}

fn integer_of_kind(value: i128, kind: ValueKind) -> Option<Value> {
    Some(match kind {
        ValueKind::I8 => Value::I8(i8::try_from(value).ok()?),
        ValueKind::I16 => Value::I16(i16::try_from(value).ok()?),
        ValueKind::I32 => Value::I32(i32::try_from(value).ok()?),
        ValueKind::I64 => Value::I64(i64::try_from(value).ok()?),
        ValueKind::U8 => Value::U8(u8::try_from(value).ok()?),
        ValueKind::U16 => Value::U16(u16::try_from(value).ok()?),
        ValueKind::U32 => Value::U32(u32::try_from(value).ok()?),
        ValueKind::U64 => Value::U64(u64::try_from(value).ok()?),
        _ => return None,
    })
}
