//! Compression configuration.
//!
//! [`CompressOptions`] is the loosely typed request a binding layer hands
//! over; [`CompressionConfig`] is the validated value the engine runs on.
//! All validation happens in the conversion, before any image data is read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{ChunkType, MAX_DIMENSION};

/// Highest accepted effort level.
pub const MAX_LEVEL: u8 = 6;

/// Effort level used when none is given.
pub const DEFAULT_LEVEL: u8 = 3;

/// Error types for invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Effort level outside `0..=6`.
    #[error("Invalid level {0}: expected 0 to {MAX_LEVEL}")]
    Level(i64),

    /// Target width is zero, negative, or too large.
    #[error("Invalid width {0}: must be a positive integer")]
    Width(i64),

    /// Target height is zero, negative, or too large.
    #[error("Invalid height {0}: must be a positive integer")]
    Height(i64),

    /// Unrecognized strip mode.
    #[error("Invalid strip mode {0:?}: expected none, safe, or all")]
    Strip(String),
}

/// Which ancillary chunks survive recompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StripMode {
    /// Keep every ancillary chunk.
    None,
    /// Keep only chunks that change how the image renders or animates.
    #[default]
    Safe,
    /// Drop every ancillary chunk.
    All,
}

impl StripMode {
    /// Whether an ancillary chunk of this type is kept.
    pub fn retains(self, kind: ChunkType) -> bool {
        match self {
            StripMode::None => true,
            StripMode::Safe => kind.affects_rendering(),
            StripMode::All => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StripMode::None => "none",
            StripMode::Safe => "safe",
            StripMode::All => "all",
        }
    }
}

impl FromStr for StripMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            Ok(StripMode::None)
        } else if s.eq_ignore_ascii_case("safe") {
            Ok(StripMode::Safe)
        } else if s.eq_ignore_ascii_case("all") {
            Ok(StripMode::All)
        } else {
            Err(ConfigError::Strip(s.to_string()))
        }
    }
}

impl fmt::Display for StripMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter type for image resizing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterType {
    /// Nearest neighbor interpolation (fastest, lowest quality).
    Nearest,
    /// Bilinear interpolation (fast, acceptable quality).
    #[default]
    Bilinear,
    /// Lanczos3 interpolation (slower, highest quality).
    Lanczos3,
}

impl FilterType {
    /// Convert to the image crate's FilterType.
    pub fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            FilterType::Nearest => image::imageops::FilterType::Nearest,
            FilterType::Bilinear => image::imageops::FilterType::Triangle,
            FilterType::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// Validated compression settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Search effort, 0 (fastest) to 6 (most exhaustive).
    pub level: u8,
    /// Ancillary chunk retention.
    pub strip: StripMode,
    /// Target width in pixels; `None` keeps the width (or follows the aspect
    /// ratio when only `height` is set).
    pub width: Option<u32>,
    /// Target height in pixels.
    pub height: Option<u32>,
    /// Resampling filter used when resizing.
    pub filter: FilterType,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            strip: StripMode::default(),
            width: None,
            height: None,
            filter: FilterType::default(),
        }
    }
}

impl CompressionConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a directly constructed config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `level` exceeds [`MAX_LEVEL`] or a target
    /// dimension is zero or above [`MAX_DIMENSION`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level > MAX_LEVEL {
            return Err(ConfigError::Level(i64::from(self.level)));
        }
        if let Some(w) = self.width.filter(|&w| !in_range(w)) {
            return Err(ConfigError::Width(i64::from(w)));
        }
        if let Some(h) = self.height.filter(|&h| !in_range(h)) {
            return Err(ConfigError::Height(i64::from(h)));
        }
        Ok(())
    }

    /// Whether any resize was requested.
    pub fn resizes(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }
}

/// Caller-facing compression request with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressOptions {
    pub level: Option<i64>,
    pub strip: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub filter: Option<FilterType>,
}

impl TryFrom<CompressOptions> for CompressionConfig {
    type Error = ConfigError;

    fn try_from(options: CompressOptions) -> Result<Self, Self::Error> {
        let level = match options.level {
            None => DEFAULT_LEVEL,
            Some(l) => u8::try_from(l)
                .ok()
                .filter(|&l| l <= MAX_LEVEL)
                .ok_or(ConfigError::Level(l))?,
        };
        let strip = match options.strip {
            None => StripMode::default(),
            Some(s) => s.parse()?,
        };
        let width = options
            .width
            .map(|w| positive(w).ok_or(ConfigError::Width(w)))
            .transpose()?;
        let height = options
            .height
            .map(|h| positive(h).ok_or(ConfigError::Height(h)))
            .transpose()?;

        Ok(Self {
            level,
            strip,
            width,
            height,
            filter: options.filter.unwrap_or_default(),
        })
    }
}

fn positive(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|&v| in_range(v))
}

fn in_range(dimension: u32) -> bool {
    (1..=MAX_DIMENSION).contains(&dimension)
}
