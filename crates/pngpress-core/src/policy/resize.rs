//! Resampling for requested output dimensions.
//!
//! Pixels are expanded to RGBA at 8 or 16 bits, resampled with the `image`
//! crate's algorithms, and handed back as a new `DecodedImage`; the
//! optimization pipeline reduces the result again afterwards.

use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use tracing::debug;

use crate::codec::{samples, BitDepth, ColorKey, ColorType, DecodedImage, MAX_DIMENSION};
use crate::config::{ConfigError, FilterType};
use crate::error::CompressError;

/// Resolve the requested dimensions against the source size.
///
/// When only one dimension is given the other follows the source aspect
/// ratio, rounded and kept within `1..=MAX_DIMENSION`.
pub fn target_dimensions(
    src_width: u32,
    src_height: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    let ratio = f64::from(src_width) / f64::from(src_height.max(1));
    let derived = |v: f64| (v.round() as u32).clamp(1, MAX_DIMENSION);
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, derived(f64::from(w) / ratio)),
        (None, Some(h)) => (derived(f64::from(h) * ratio), h),
        (None, None) => (src_width, src_height),
    }
}

/// Resize an image to exact dimensions.
///
/// # Arguments
///
/// * `image` - The source image to resize
/// * `width` - Target width in pixels
/// * `height` - Target height in pixels
/// * `filter` - Interpolation filter to use
///
/// # Returns
///
/// A new RGBA `DecodedImage` with the specified dimensions. Chunks whose
/// payload depends on the old pixel layout are dropped.
///
/// # Errors
///
/// Returns `ConfigError` for a zero dimension and `CompressError::Resize` if
/// the pixel buffer cannot be wrapped for resampling.
pub fn resize(
    image: &DecodedImage,
    width: u32,
    height: u32,
    filter: FilterType,
) -> Result<DecodedImage, CompressError> {
    if width == 0 {
        return Err(ConfigError::Width(0).into());
    }
    if height == 0 {
        return Err(ConfigError::Height(0).into());
    }

    // Fast path: if dimensions match, just clone
    if image.width == width && image.height == height {
        return Ok(image.clone());
    }

    let wide = image.bit_depth == BitDepth::Sixteen;
    let buffer_error = || CompressError::Resize("pixel buffer does not match dimensions".to_string());

    let pixels: Vec<u8> = if wide {
        let rgba = expand_rgba(image, BitDepth::Sixteen);
        let source: ImageBuffer<Rgba<u16>, Vec<u16>> =
            ImageBuffer::from_raw(image.width, image.height, rgba).ok_or_else(buffer_error)?;
        imageops::resize(&source, width, height, filter.to_image_filter())
            .into_raw()
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect()
    } else {
        let rgba = expand_rgba(image, BitDepth::Eight).into_iter().map(|v| v as u8).collect();
        let source = RgbaImage::from_raw(image.width, image.height, rgba).ok_or_else(buffer_error)?;
        imageops::resize(&source, width, height, filter.to_image_filter()).into_raw()
    };

    debug!(
        "resized {}x{} to {}x{} ({:?})",
        image.width, image.height, width, height, filter
    );

    Ok(DecodedImage {
        width,
        height,
        color_type: ColorType::Rgba,
        bit_depth: if wide { BitDepth::Sixteen } else { BitDepth::Eight },
        palette: Vec::new(),
        color_key: None,
        pixels,
        chunks: image
            .chunks
            .iter()
            .filter(|c| !c.kind.is_layout_bound())
            .cloned()
            .collect(),
    })
}

/// Expand every pixel to RGBA samples at `target` depth (8 or 16).
fn expand_rgba(image: &DecodedImage, target: BitDepth) -> Vec<u16> {
    let from = image.bit_depth;
    let max = target.max_value();
    let up = |v: u16| samples::rescale(v, from, target);
    let channels = image.color_type.channels();
    let unpacked = samples::unpack(image);

    let mut out = Vec::with_capacity(unpacked.len() / channels * 4);
    for px in unpacked.chunks_exact(channels) {
        let rgba = match image.color_type {
            ColorType::Grayscale => {
                let alpha = if image.color_key == Some(ColorKey::Gray(px[0])) { 0 } else { max };
                [up(px[0]), up(px[0]), up(px[0]), alpha]
            }
            ColorType::Rgb => {
                let alpha = if image.color_key == Some(ColorKey::Rgb(px[0], px[1], px[2])) {
                    0
                } else {
                    max
                };
                [up(px[0]), up(px[1]), up(px[2]), alpha]
            }
            ColorType::Indexed => {
                // Decode rejects out-of-range indices.
                let entry = image.palette.get(usize::from(px[0])).copied().unwrap_or([0, 0, 0, 255]);
                entry.map(|c| samples::rescale(u16::from(c), BitDepth::Eight, target))
            }
            ColorType::GrayscaleAlpha => [up(px[0]), up(px[0]), up(px[0]), up(px[1])],
            ColorType::Rgba => [up(px[0]), up(px[1]), up(px[2]), up(px[3])],
        };
        out.extend_from_slice(&rgba);
    }
    out
}
