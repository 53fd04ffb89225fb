//! Error types for engine loading and request routing.

use std::sync::PoisonError;

use pngpress_core::CompressError;
use thiserror::Error;

/// Why an execution context failed to instantiate its engine.
///
/// A context that fails to load stays failed: every pending and future
/// request receives a clone of the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineLoadError {
    /// The module blob is not a well-formed module.
    #[error("Invalid module: {0}")]
    InvalidModule(String),

    /// The module imports something no namespace provides.
    #[error("Unresolved import {module}.{name}")]
    UnresolvedImport { module: String, name: String },

    /// The import exists but with a different kind (function vs memory).
    #[error("Import {module}.{name} has the wrong kind")]
    ImportKind { module: String, name: String },

    /// The memory import is incompatible with the provided memory.
    #[error("Memory import rejected: {0}")]
    Memory(String),

    /// A compression request arrived before any load request.
    #[error("No engine has been loaded on this context")]
    NotLoaded,

    /// A loader panicked while instantiating.
    #[error("Engine slot poisoned by a failed loader")]
    Poisoned,
}

/// Linear memory access failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("Access of {len} bytes at offset {offset} exceeds memory size {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("Cannot grow to {requested} pages: maximum is {max}")]
    Grow { requested: u64, max: u32 },

    #[error("Invalid memory limits: initial {initial} pages, maximum {max}")]
    Limits { initial: u32, max: u32 },

    #[error("Memory lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for MemoryError {
    fn from(_: PoisonError<T>) -> Self {
        MemoryError::Poisoned
    }
}

/// Everything a routed compression request can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Load(#[from] EngineLoadError),

    #[error(transparent)]
    Compress(#[from] CompressError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The engine called `proc_exit`; the environment accepts no more work.
    #[error("Engine exited with code {0}")]
    Exited(u32),

    /// The engine aborted or passed arguments the host cannot honor.
    #[error("Engine trapped: {0}")]
    Trap(String),

    /// An import call named a binding the table does not hold.
    #[error("No host binding for {0}")]
    MissingBinding(String),

    /// The worker thread could not be started.
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// The worker is gone: it shut down or its thread exited.
    #[error("Worker disconnected")]
    Disconnected,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
