//! The instantiated engine: parsed module, resolved imports, linear memory
//! and the system-interface state, bundled per execution context.

use pngpress_core::{compress_png, CompressionConfig};
use tracing::{debug, info};

use crate::context::LoadRequest;
use crate::error::{BridgeError, BridgeResult, EngineLoadError};
use crate::imports::{Binding, ImportTable, SYSTEM_INTERFACE};
use crate::memory::{LinearMemory, SharedMemory, PAGE_SIZE};
use crate::module::CompiledModule;
use crate::wasi::SystemInterface;

/// Scratch area at the bottom of memory for host-call arguments.
const IOVEC: usize = 0;
const NWRITTEN: usize = 8;
const MESSAGE: usize = 16;
const SCRATCH_END: usize = 1024;

/// Input images are copied in from here; output follows the input at the
/// next 8-byte boundary.
const INPUT_BASE: usize = SCRATCH_END;

const STDERR: u64 = 2;

#[derive(Debug)]
pub struct EngineEnvironment {
    module: CompiledModule,
    imports: ImportTable,
    memory: SharedMemory,
    system: SystemInterface,
}

impl EngineEnvironment {
    /// Instantiate with the default system interface.
    pub fn instantiate(request: &LoadRequest) -> Result<Self, EngineLoadError> {
        Self::with_system_interface(request, SystemInterface::new())
    }

    /// Parse the module, compose the import table, check every declared
    /// import against it, and size memory to the import's minimum.
    ///
    /// # Errors
    ///
    /// Any `EngineLoadError`: a malformed module, an import the table cannot
    /// satisfy, or a memory that cannot reach the required size.
    pub fn with_system_interface(request: &LoadRequest, system: SystemInterface) -> Result<Self, EngineLoadError> {
        let module = CompiledModule::parse(request.module.clone())?;
        let imports = ImportTable::compose(&request.memory);
        for import in module.imports() {
            imports.resolve(import)?;
            debug!("resolved {}.{} ({})", import.module, import.name, import.ty.describe());
        }

        if let Some((_, ty)) = module.memory_import() {
            let mut memory = request
                .memory
                .lock()
                .map_err(|e| EngineLoadError::Memory(e.to_string()))?;
            memory
                .ensure(ty.limits.min as usize * PAGE_SIZE)
                .map_err(|e| EngineLoadError::Memory(e.to_string()))?;
        }

        info!(
            "engine instantiated: {} imports resolved against {} bindings",
            module.imports().len(),
            imports.len()
        );
        Ok(Self {
            module,
            imports,
            memory: request.memory.clone(),
            system,
        })
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    pub fn imports(&self) -> &ImportTable {
        &self.imports
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn system(&self) -> &SystemInterface {
        &self.system
    }

    /// Call a bound host function the way the engine would.
    pub fn call_import(&self, module: &str, name: &str, args: &[u64]) -> BridgeResult<u64> {
        let mut memory = self.memory.lock()?;
        self.dispatch(module, name, args, &mut memory)
    }

    fn dispatch(&self, module: &str, name: &str, args: &[u64], memory: &mut LinearMemory) -> BridgeResult<u64> {
        match self.imports.get(module, name) {
            Some(Binding::Function(function)) => self.system.call(*function, args, memory),
            _ => Err(BridgeError::MissingBinding(format!("{module}.{name}"))),
        }
    }

    /// Run one compression through linear memory.
    ///
    /// The memory lock is held for the whole call, so concurrent callers on
    /// the same environment run one after another. A failure is also written
    /// to the engine's error stream.
    ///
    /// # Errors
    ///
    /// `Exited` once the engine has called `proc_exit`, `Memory` when the
    /// image does not fit the memory maximum, and `Compress` for pipeline
    /// failures.
    pub fn compress(&self, input: &[u8], config: &CompressionConfig) -> BridgeResult<Vec<u8>> {
        if let Some(code) = self.system.exit_code() {
            return Err(BridgeError::Exited(code));
        }

        let mut memory = self.memory.lock()?;
        memory.ensure(INPUT_BASE + input.len())?;
        memory.write(INPUT_BASE, input)?;

        let result = compress_png(memory.read(INPUT_BASE, input.len())?, config);
        match result {
            Ok(output) => {
                let base = (INPUT_BASE + input.len()).next_multiple_of(8);
                memory.ensure(base + output.len())?;
                memory.write(base, &output)?;
                debug!("engine call: {} bytes in, {} bytes out", input.len(), output.len());
                Ok(memory.read(base, output.len())?.to_vec())
            }
            Err(e) => {
                self.report(&mut memory, &e.to_string())?;
                Err(e.into())
            }
        }
    }

    /// Write `message` to the engine's error stream through `fd_write`.
    fn report(&self, memory: &mut LinearMemory, message: &str) -> BridgeResult<()> {
        let bytes = message.as_bytes();
        let bytes = &bytes[..bytes.len().min(SCRATCH_END - MESSAGE)];
        memory.ensure(SCRATCH_END)?;
        memory.write(MESSAGE, bytes)?;
        memory.write_u32(IOVEC, MESSAGE as u32)?;
        memory.write_u32(IOVEC + 4, bytes.len() as u32)?;
        self.dispatch(
            SYSTEM_INTERFACE.module,
            "fd_write",
            &[STDERR, IOVEC as u64, 1, NWRITTEN as u64],
            memory,
        )
        .map(|_| ())
    }
}
