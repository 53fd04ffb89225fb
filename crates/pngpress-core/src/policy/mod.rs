//! Metadata policy: chunk stripping and resizing.
//!
//! Runs between decode and the optimization search so the search only ever
//! sees the final pixels and the final ancillary set.

mod resize;

pub use resize::{resize, target_dimensions};

use tracing::debug;

use crate::codec::{Chunk, ChunkType, DecodedImage};
use crate::config::{CompressionConfig, StripMode};
use crate::error::CompressError;

/// Apply the strip mode and any requested resize.
///
/// # Errors
///
/// Returns `ConfigError` (wrapped) for an invalid config and
/// `CompressError::Resize` if resampling fails.
pub fn apply_policy(mut image: DecodedImage, config: &CompressionConfig) -> Result<DecodedImage, CompressError> {
    config.validate()?;
    strip_chunks(&mut image.chunks, config.strip);

    if config.resizes() {
        let (width, height) = target_dimensions(image.width, image.height, config.width, config.height);
        if (width, height) != (image.width, image.height) {
            image = resize(&image, width, height, config.filter)?;
        }
    }
    Ok(image)
}

/// Drop the ancillary chunks `mode` does not retain.
pub fn strip_chunks(chunks: &mut Vec<Chunk>, mode: StripMode) {
    chunks.retain(|c| {
        let keep = mode.retains(c.kind);
        if !keep {
            debug!("stripping {} chunk ({} bytes)", c.kind, c.data.len());
        }
        keep
    });

    if mode != StripMode::Safe {
        return;
    }
    // iCCP and sRGB should not coexist; sRGB wins.
    let has = |kind: ChunkType| chunks.iter().any(|c| c.kind == kind);
    if has(ChunkType::ICCP) && has(ChunkType::SRGB) {
        debug!("dropping iCCP in favor of sRGB");
        chunks.retain(|c| c.kind != ChunkType::ICCP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BitDepth, ChunkPosition, ColorType};
    use crate::config::ConfigError;

    fn chunk(kind: &[u8; 4]) -> Chunk {
        Chunk::new(ChunkType(*kind), vec![1, 2, 3], ChunkPosition::BeforePalette)
    }

    fn kinds(chunks: &[Chunk]) -> Vec<String> {
        chunks.iter().map(|c| c.kind.to_string()).collect()
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk(b"gAMA"),
            chunk(b"tEXt"),
            chunk(b"pHYs"),
            chunk(b"tIME"),
            chunk(b"prVT"),
            chunk(b"eXIf"),
        ]
    }

    fn gray_image(width: u32, height: u32) -> DecodedImage {
        DecodedImage {
            width,
            height,
            color_type: ColorType::Grayscale,
            bit_depth: BitDepth::Eight,
            palette: Vec::new(),
            color_key: None,
            pixels: vec![77; (width * height) as usize],
            chunks: sample_chunks(),
        }
    }

    #[test]
    fn test_strip_all() {
        let mut chunks = sample_chunks();
        strip_chunks(&mut chunks, StripMode::All);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_strip_safe_keeps_rendering_chunks() {
        let mut chunks = sample_chunks();
        strip_chunks(&mut chunks, StripMode::Safe);
        assert_eq!(kinds(&chunks), vec!["gAMA", "pHYs"]);
    }

    #[test]
    fn test_strip_none_keeps_everything() {
        let mut chunks = sample_chunks();
        strip_chunks(&mut chunks, StripMode::None);
        assert_eq!(chunks, sample_chunks());
    }

    #[test]
    fn test_srgb_wins_over_iccp() {
        let mut chunks = vec![chunk(b"iCCP"), chunk(b"sRGB"), chunk(b"gAMA")];
        strip_chunks(&mut chunks, StripMode::Safe);
        assert_eq!(kinds(&chunks), vec!["sRGB", "gAMA"]);

        let mut chunks = vec![chunk(b"iCCP"), chunk(b"gAMA")];
        strip_chunks(&mut chunks, StripMode::Safe);
        assert_eq!(kinds(&chunks), vec!["iCCP", "gAMA"]);
    }

    #[test]
    fn test_strip_none_keeps_both_color_profiles() {
        let mut chunks = vec![chunk(b"iCCP"), chunk(b"sRGB")];
        strip_chunks(&mut chunks, StripMode::None);
        assert_eq!(kinds(&chunks), vec!["iCCP", "sRGB"]);
    }

    #[test]
    fn test_apply_policy_resizes() {
        let config = CompressionConfig {
            width: Some(4),
            ..CompressionConfig::default()
        };
        let out = apply_policy(gray_image(8, 2), &config).unwrap();
        assert_eq!((out.width, out.height), (4, 1));
        assert_eq!(kinds(&out.chunks), vec!["gAMA", "pHYs"]);
    }

    #[test]
    fn test_apply_policy_same_size_is_noop() {
        let config = CompressionConfig {
            width: Some(8),
            strip: StripMode::None,
            ..CompressionConfig::default()
        };
        let img = gray_image(8, 2);
        assert_eq!(apply_policy(img.clone(), &config).unwrap(), img);
    }

    #[test]
    fn test_apply_policy_rejects_bad_config() {
        let config = CompressionConfig {
            height: Some(0),
            ..CompressionConfig::default()
        };
        assert_eq!(
            apply_policy(gray_image(2, 2), &config),
            Err(CompressError::Config(ConfigError::Height(0)))
        );
    }
}
