//! Execution contexts: one engine slot plus the request that loads it.

use std::sync::Arc;

use pngpress_core::{CompressError, CompressionConfig};
use tracing::debug;

use crate::environment::EngineEnvironment;
use crate::error::{BridgeResult, EngineLoadError};
use crate::memory::SharedMemory;
use crate::slot::{EngineSlot, SlotState};

/// What a context needs to instantiate its engine: the compiled module blob
/// and the memory region it will run in.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub module: Arc<[u8]>,
    pub memory: SharedMemory,
}

impl LoadRequest {
    pub fn new(module: impl Into<Arc<[u8]>>, memory: SharedMemory) -> Self {
        Self {
            module: module.into(),
            memory,
        }
    }
}

/// An isolated execution context.
///
/// Share it behind an `Arc` to let several threads route requests to the
/// same engine; the first request instantiates it and the rest reuse it.
/// Requests on one context run one at a time on its memory.
#[derive(Debug)]
pub struct ExecutionContext {
    slot: EngineSlot<EngineEnvironment>,
    request: LoadRequest,
}

impl ExecutionContext {
    pub fn new(request: LoadRequest) -> Self {
        Self {
            slot: EngineSlot::new(),
            request,
        }
    }

    pub fn request(&self) -> &LoadRequest {
        &self.request
    }

    /// The engine environment, instantiating it on first use.
    pub fn environment(&self) -> Result<Arc<EngineEnvironment>, EngineLoadError> {
        self.slot.get_or_load(|| EngineEnvironment::instantiate(&self.request))
    }

    /// Compress through this context's engine.
    ///
    /// The config is validated before the engine is touched, so a bad config
    /// never triggers instantiation.
    pub fn compress(&self, input: &[u8], config: &CompressionConfig) -> BridgeResult<Vec<u8>> {
        config.validate().map_err(CompressError::from)?;
        let environment = self.environment()?;
        debug!("routing {} byte request to engine", input.len());
        environment.compress(input, config)
    }

    pub fn state(&self) -> SlotState {
        self.slot.state()
    }

    pub fn instantiations(&self) -> usize {
        self.slot.instantiations()
    }
}
