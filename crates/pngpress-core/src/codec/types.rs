//! Core types for PNG decoding and encoding.

use thiserror::Error;

use super::chunk::Chunk;

/// Error types for malformed or corrupt PNG input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The input does not begin with the PNG signature.
    #[error("Missing PNG signature")]
    Signature,

    /// A chunk declares more payload than the input holds.
    #[error("Truncated {chunk} chunk: declared {declared} bytes, {available} available")]
    Truncated {
        chunk: String,
        declared: usize,
        available: usize,
    },

    /// A chunk's CRC does not match its type and payload.
    #[error("CRC mismatch in {chunk} chunk: expected {expected:#010x}, found {actual:#010x}")]
    Crc {
        chunk: String,
        expected: u32,
        actual: u32,
    },

    /// A chunk type contains something other than ASCII letters.
    #[error("Invalid chunk type: {0:?}")]
    ChunkType([u8; 4]),

    /// A critical chunk is absent.
    #[error("Missing {0} chunk")]
    MissingChunk(&'static str),

    /// Critical chunks appear out of their required order.
    #[error("Chunk order violation: {0}")]
    ChunkOrder(String),

    /// A critical chunk this decoder does not understand.
    #[error("Unknown critical chunk: {0}")]
    UnknownCriticalChunk(String),

    /// The IHDR chunk holds invalid values.
    #[error("Invalid header: {0}")]
    Header(String),

    /// The PLTE or tRNS chunk is malformed.
    #[error("Invalid palette: {0}")]
    Palette(String),

    /// The zlib stream could not be inflated.
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// The inflated image data does not match the header.
    #[error("Invalid image data: {0}")]
    ImageData(String),

    /// Bytes follow the IEND chunk.
    #[error("{0} bytes of trailing data after IEND")]
    TrailingData(usize),
}

/// Errors raised while encoding pixel data into a PNG container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Pixel data length doesn't match the header-derived length
    #[error("Invalid pixel data: expected {expected} bytes, got {actual}")]
    InvalidPixelData { expected: usize, actual: usize },

    /// Width or height is zero
    #[error("Invalid dimensions: width ({width}) and height ({height}) must be non-zero")]
    InvalidDimensions { width: u32, height: u32 },

    /// The compressor failed to produce a complete zlib stream
    #[error("Deflate failed: {0}")]
    Deflate(String),
}

/// PNG color types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorType {
    Grayscale = 0,
    Rgb = 2,
    Indexed = 3,
    GrayscaleAlpha = 4,
    Rgba = 6,
}

impl ColorType {
    /// Number of samples per pixel.
    pub fn channels(self) -> usize {
        match self {
            ColorType::Grayscale | ColorType::Indexed => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }

    /// Whether the pixel carries its own alpha sample.
    pub fn has_alpha(self) -> bool {
        matches!(self, ColorType::GrayscaleAlpha | ColorType::Rgba)
    }

    /// Whether `depth` is legal for this color type.
    pub fn allows(self, depth: BitDepth) -> bool {
        match self {
            ColorType::Grayscale => true,
            ColorType::Indexed => depth != BitDepth::Sixteen,
            _ => matches!(depth, BitDepth::Eight | BitDepth::Sixteen),
        }
    }
}

impl TryFrom<u8> for ColorType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ColorType::Grayscale),
            2 => Ok(ColorType::Rgb),
            3 => Ok(ColorType::Indexed),
            4 => Ok(ColorType::GrayscaleAlpha),
            6 => Ok(ColorType::Rgba),
            other => Err(FormatError::Header(format!("color type {other}"))),
        }
    }
}

/// PNG sample bit depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BitDepth {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
    Sixteen = 16,
}

impl BitDepth {
    /// Bits per sample.
    #[inline]
    pub fn bits(self) -> usize {
        self as usize
    }

    /// Largest sample value at this depth.
    #[inline]
    pub fn max_value(self) -> u16 {
        match self {
            BitDepth::Sixteen => u16::MAX,
            other => (1u16 << other.bits()) - 1,
        }
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BitDepth::One),
            2 => Ok(BitDepth::Two),
            4 => Ok(BitDepth::Four),
            8 => Ok(BitDepth::Eight),
            16 => Ok(BitDepth::Sixteen),
            other => Err(FormatError::Header(format!("bit depth {other}"))),
        }
    }
}

/// A single transparent color for grayscale or truecolor images (from tRNS).
///
/// Values are stored at the image's own bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorKey {
    Gray(u16),
    Rgb(u16, u16, u16),
}

/// One palette entry: red, green, blue, alpha.
pub type PaletteEntry = [u8; 4];

/// A decoded PNG image.
///
/// The pixel data is an independent copy of the input: the pipeline may
/// mutate it freely without touching caller-owned memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    pub color_type: ColorType,
    pub bit_depth: BitDepth,
    /// Palette entries with alpha folded in from tRNS. Empty unless indexed.
    pub palette: Vec<PaletteEntry>,
    /// Transparent color for grayscale/truecolor images.
    pub color_key: Option<ColorKey>,
    /// Packed scanlines in row-major order, no filter bytes. Each row is
    /// padded to a whole byte.
    pub pixels: Vec<u8>,
    /// Ancillary chunks collected during decode.
    pub chunks: Vec<Chunk>,
}

/// The parts of an image that ancillary chunks such as bKGD or sBIT encode
/// against. Two images with equal layouts can share those chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub color_type: ColorType,
    pub bit_depth: BitDepth,
    pub palette: Vec<PaletteEntry>,
}

impl DecodedImage {
    /// Bits used by one pixel.
    #[inline]
    pub fn bits_per_pixel(&self) -> usize {
        self.color_type.channels() * self.bit_depth.bits()
    }

    /// Bytes in one unfiltered scanline.
    #[inline]
    pub fn row_bytes(&self) -> usize {
        row_bytes(self.width, self.bits_per_pixel())
    }

    /// Byte distance used by the Sub/Average/Paeth filters.
    #[inline]
    pub fn filter_stride(&self) -> usize {
        (self.bits_per_pixel() / 8).max(1)
    }

    /// Expected length of `pixels`.
    pub fn expected_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    /// Get the total number of pixels.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Iterate over packed scanlines.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.pixels.chunks_exact(self.row_bytes().max(1))
    }

    /// Snapshot of the layout-defining fields.
    pub fn layout(&self) -> ImageLayout {
        ImageLayout {
            width: self.width,
            height: self.height,
            color_type: self.color_type,
            bit_depth: self.bit_depth,
            palette: self.palette.clone(),
        }
    }

    /// Check that the pixel buffer and palette agree with the header fields.
    pub fn check(&self) -> Result<(), EncodeError> {
        if self.width == 0 || self.height == 0 {
            return Err(EncodeError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len();
        if self.pixels.len() != expected {
            return Err(EncodeError::InvalidPixelData {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }
}

/// Bytes needed for `width` pixels of `bits_per_pixel` each, rounded up.
#[inline]
pub(crate) fn row_bytes(width: u32, bits_per_pixel: usize) -> usize {
    (width as usize * bits_per_pixel).div_ceil(8)
}
