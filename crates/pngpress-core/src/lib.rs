//! pngpress core: lossless PNG recompression.
//!
//! The pipeline decodes a PNG, applies the metadata policy (chunk stripping
//! and optional resize), searches reductions, filters, and deflate settings
//! for the smallest encoding, and writes a fresh container.
//!
//! ```ignore
//! use pngpress_core::{compress_png, CompressionConfig};
//!
//! let input = std::fs::read("in.png").unwrap();
//! let output = compress_png(&input, &CompressionConfig::default()).unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod optimize;
pub mod policy;

pub use codec::{decode, encode, stored_image_data, DecodedImage, EncodeError, FormatError};
pub use config::{CompressOptions, CompressionConfig, ConfigError, FilterType, StripMode};
pub use error::CompressError;
pub use optimize::{optimize, prefer_stored, EncodingCandidate};
pub use policy::apply_policy;

use tracing::debug;

/// Compress a PNG buffer.
///
/// # Arguments
///
/// * `input` - A complete PNG stream; it is only read, never modified
/// * `config` - Validated compression settings
///
/// # Returns
///
/// A new PNG stream that renders identically to the input, apart from any
/// requested resize. Without a resize, the input's own image data is kept
/// when no re-encoding beats it.
///
/// # Errors
///
/// Returns `CompressError::Config` before touching the input if `config` is
/// out of range, `CompressError::Format` if the input is not a well-formed
/// PNG, and `CompressError::NoCandidate` if the search produced nothing.
pub fn compress_png(input: &[u8], config: &CompressionConfig) -> Result<Vec<u8>, CompressError> {
    config.validate()?;
    let image = decode(input)?;
    let layout = image.layout();
    let image = apply_policy(image, config)?;
    let mut best = optimize(&image, config.level)?;
    if image.layout() == layout {
        if let Some(idat) = stored_image_data(input) {
            best = prefer_stored(best, &image, idat);
        }
    }
    let output = best.to_png();
    debug!(
        "compressed {} bytes to {} bytes (level {}, strip {})",
        input.len(),
        output.len(),
        config.level,
        config.strip
    );
    Ok(output)
}

/// Validate loosely typed options, then compress.
///
/// # Errors
///
/// As [`compress_png`], with option validation reported as
/// `CompressError::Config`.
pub fn compress_png_with_options(input: &[u8], options: CompressOptions) -> Result<Vec<u8>, CompressError> {
    let config = CompressionConfig::try_from(options)?;
    compress_png(input, &config)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::codec::chunk::write_chunk;
    use crate::codec::{encode, BitDepth, ChunkType, ColorType, DecodedImage, DeflateParams, FilterStrategy, RowFilter};

    /// 1x1 transparent black RGBA image.
    pub const TINY_PNG: &[u8] = &[
        137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 6,
        0, 0, 0, 31, 21, 196, 137, 0, 0, 0, 11, 73, 68, 65, 84, 120, 156, 99, 96, 0, 2, 0, 0, 5, 0,
        1, 122, 94, 171, 63, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
    ];

    /// An opaque RGBA gradient carrying metadata chunks.
    pub fn photo_png(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 9) as u8, (y * 9) as u8, ((x ^ y) * 4) as u8, 255]);
            }
        }
        let image = DecodedImage {
            width,
            height,
            color_type: ColorType::Rgba,
            bit_depth: BitDepth::Eight,
            palette: Vec::new(),
            color_key: None,
            pixels,
            chunks: Vec::new(),
        };
        let plain = encode(&image, FilterStrategy::Fixed(RowFilter::None), DeflateParams::default()).unwrap();

        // Splice gAMA before IDAT and tEXt/tIME after it.
        let ihdr_end = 8 + 25;
        let iend_start = plain.len() - 12;
        let mut out = plain[..ihdr_end].to_vec();
        write_chunk(&mut out, ChunkType(*b"gAMA"), &45455u32.to_be_bytes());
        out.extend_from_slice(&plain[ihdr_end..iend_start]);
        write_chunk(&mut out, ChunkType(*b"tEXt"), b"Comment\0made by hand");
        write_chunk(&mut out, ChunkType(*b"tIME"), &[0x07, 0xE8, 1, 2, 3, 4, 5]);
        out.extend_from_slice(&plain[iend_start..]);
        out
    }

    /// Ancillary chunk types present in a PNG stream.
    pub fn ancillary_types(png: &[u8]) -> Vec<String> {
        crate::codec::chunk::ChunkReader::new(&png[8..])
            .filter_map(Result::ok)
            .filter(|c| !c.kind.is_critical())
            .map(|c| c.kind.to_string())
            .collect()
    }
}
