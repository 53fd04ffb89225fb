//! Host import namespaces and their composition into one table.
//!
//! The set of bindings is fixed at compile time: each namespace is a static
//! list of names, and composition applies them in a fixed override order.

use std::collections::BTreeMap;

use crate::error::EngineLoadError;
use crate::memory::SharedMemory;
use crate::module::{Import, ImportType};

/// Every host function the engine may import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFunction {
    // Runtime
    Abort,
    NotifyMemoryGrowth,
    // Native-interface shim
    ModuleRegister,
    SetInstanceData,
    GetInstanceData,
    ThrowError,
    // System interface
    FdWrite,
    FdClose,
    ProcExit,
    ClockTimeGet,
    EnvironSizesGet,
    EnvironGet,
    PathOpen,
}

/// Which layer of the environment a namespace belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Runtime,
    NativeShim,
    SystemInterface,
}

/// A statically enumerated import namespace.
#[derive(Debug, Clone, Copy)]
pub struct Namespace {
    pub module: &'static str,
    pub layer: Layer,
    pub functions: &'static [(&'static str, HostFunction)],
}

pub const RUNTIME: Namespace = Namespace {
    module: "env",
    layer: Layer::Runtime,
    functions: &[
        ("abort", HostFunction::Abort),
        ("emscripten_notify_memory_growth", HostFunction::NotifyMemoryGrowth),
    ],
};

pub const NATIVE_SHIM: Namespace = Namespace {
    module: "napi",
    layer: Layer::NativeShim,
    functions: &[
        ("napi_module_register", HostFunction::ModuleRegister),
        ("napi_set_instance_data", HostFunction::SetInstanceData),
        ("napi_get_instance_data", HostFunction::GetInstanceData),
        ("napi_throw_error", HostFunction::ThrowError),
    ],
};

pub const SYSTEM_INTERFACE: Namespace = Namespace {
    module: "wasi_snapshot_preview1",
    layer: Layer::SystemInterface,
    functions: &[
        ("fd_write", HostFunction::FdWrite),
        ("fd_close", HostFunction::FdClose),
        ("proc_exit", HostFunction::ProcExit),
        ("clock_time_get", HostFunction::ClockTimeGet),
        ("environ_sizes_get", HostFunction::EnvironSizesGet),
        ("environ_get", HostFunction::EnvironGet),
        ("path_open", HostFunction::PathOpen),
    ],
};

/// All namespaces, in override order.
pub const NAMESPACES: [Namespace; 3] = [RUNTIME, NATIVE_SHIM, SYSTEM_INTERFACE];

/// What an import name resolves to.
#[derive(Debug, Clone)]
pub enum Binding {
    Function(HostFunction),
    Memory(SharedMemory),
}

/// The fixed table handed to instantiation, keyed by module then name.
#[derive(Debug, Clone)]
pub struct ImportTable {
    entries: BTreeMap<&'static str, BTreeMap<&'static str, Binding>>,
}

impl ImportTable {
    /// Compose the namespaces into one table.
    ///
    /// Later steps override earlier ones: runtime, then the native shim
    /// (under its own name and merged into `env`), then the system
    /// interface, then `env.memory` bound to `memory`.
    pub fn compose(memory: &SharedMemory) -> Self {
        let mut table = Self {
            entries: BTreeMap::new(),
        };
        for ns in NAMESPACES {
            for &(name, function) in ns.functions {
                table.bind(ns.module, name, Binding::Function(function));
                if ns.layer == Layer::NativeShim {
                    table.bind(RUNTIME.module, name, Binding::Function(function));
                }
            }
        }
        table.bind(RUNTIME.module, "memory", Binding::Memory(memory.clone()));
        table
    }

    fn bind(&mut self, module: &'static str, name: &'static str, binding: Binding) {
        self.entries.entry(module).or_default().insert(name, binding);
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&Binding> {
        self.entries.get(module)?.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Names the table provides, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries
            .iter()
            .flat_map(|(&module, functions)| functions.keys().map(move |&name| (module, name)))
    }

    /// Check one declared import against the table.
    ///
    /// # Errors
    ///
    /// `UnresolvedImport` when nothing is bound under the name (tables and
    /// globals are never provided), `ImportKind` when the binding has the
    /// wrong kind, and `Memory` when a memory import's limits or shared flag
    /// disagree with the provided memory.
    pub fn resolve(&self, import: &Import) -> Result<&Binding, EngineLoadError> {
        let unresolved = || EngineLoadError::UnresolvedImport {
            module: import.module.clone(),
            name: import.name.clone(),
        };
        let wrong_kind = || EngineLoadError::ImportKind {
            module: import.module.clone(),
            name: import.name.clone(),
        };
        let binding = self.get(&import.module, &import.name).ok_or_else(unresolved)?;

        match (&import.ty, binding) {
            (ImportType::Function(_), Binding::Function(_)) => Ok(binding),
            (ImportType::Memory(ty), Binding::Memory(memory)) => {
                if ty.shared != memory.is_shared() {
                    return Err(EngineLoadError::Memory(format!(
                        "import expects shared={}, provided shared={}",
                        ty.shared,
                        memory.is_shared()
                    )));
                }
                if ty.limits.min > memory.max_pages() {
                    return Err(EngineLoadError::Memory(format!(
                        "import needs {} pages, memory allows at most {}",
                        ty.limits.min,
                        memory.max_pages()
                    )));
                }
                if let Some(max) = ty.limits.max {
                    if memory.max_pages() > max {
                        return Err(EngineLoadError::Memory(format!(
                            "memory maximum {} exceeds import maximum {max}",
                            memory.max_pages()
                        )));
                    }
                }
                Ok(binding)
            }
            (ImportType::Table { .. } | ImportType::Global { .. }, _) => Err(unresolved()),
            _ => Err(wrong_kind()),
        }
    }
}
