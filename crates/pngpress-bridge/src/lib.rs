//! pngpress bridge: loads the compiled engine once per execution context and
//! routes compression requests to it.
//!
//! A context moves through `Unloaded -> Loading -> Ready | Failed` exactly
//! once, no matter how many callers race on the first request. Loading parses
//! the module's import section, resolves it against a fixed table of host
//! namespaces, and sizes the context's linear memory.
//!
//! ```ignore
//! use pngpress_bridge::{LoadRequest, SharedMemory, Worker};
//! use pngpress_core::CompressionConfig;
//!
//! let worker = Worker::spawn()?;
//! let memory = SharedMemory::new(1, 1024, true)?;
//! worker.load(LoadRequest::new(module_bytes, memory)).wait()?;
//! let png = worker.compress(input, CompressionConfig::default()).wait()?;
//! ```

pub mod context;
pub mod environment;
pub mod error;
pub mod imports;
pub mod memory;
pub mod module;
pub mod slot;
pub mod wasi;
pub mod worker;

pub use context::{ExecutionContext, LoadRequest};
pub use environment::EngineEnvironment;
pub use error::{BridgeError, BridgeResult, EngineLoadError, MemoryError};
pub use imports::{Binding, HostFunction, ImportTable, Namespace};
pub use memory::{LinearMemory, SharedMemory, PAGE_SIZE};
pub use module::{CompiledModule, Import, ImportType};
pub use slot::{EngineSlot, SlotState};
pub use wasi::SystemInterface;
pub use worker::{Ticket, Worker};
