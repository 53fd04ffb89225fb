//! Top-level error type for the compression entry points.

use thiserror::Error;

use crate::codec::{EncodeError, FormatError};
use crate::config::ConfigError;

/// Everything `compress_png` can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressError {
    /// The input is not a well-formed PNG.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The configuration was rejected before any decoding.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A working image could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Resampling failed.
    #[error("Resize failed: {0}")]
    Resize(String),

    /// Every encoding candidate in the search failed.
    #[error("No encoding candidate succeeded")]
    NoCandidate,
}
