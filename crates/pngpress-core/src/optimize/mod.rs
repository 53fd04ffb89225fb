//! Optimization pipeline: reduce, then search filter and deflate settings.
//!
//! The search is deterministic. Candidates are tried in a fixed order and a
//! later candidate only replaces the current best when strictly smaller, so
//! ties go to the one computed first.

mod preset;
mod reduce;

pub use preset::{plan, SearchPlan};
pub use reduce::{layout_locked, reduce_variants};

use tracing::{debug, trace, warn};

use crate::codec::{
    encoded_len, filter::filter_rows, write_png, zlib, DecodedImage, DeflateParams, EncodeError, FilterStrategy,
};
use crate::error::CompressError;

/// The winning encoding of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingCandidate {
    /// The (possibly reduced) image the stream encodes.
    pub image: DecodedImage,
    /// `None` when the input's own stream was kept.
    pub filter: Option<FilterStrategy>,
    pub deflate: Option<DeflateParams>,
    /// Compressed, filtered scanlines.
    pub idat: Vec<u8>,
    /// Size of the complete PNG this candidate serializes to.
    pub len: usize,
}

impl EncodingCandidate {
    /// Serialize to a complete PNG stream.
    pub fn to_png(&self) -> Vec<u8> {
        write_png(&self.image, &self.idat)
    }
}

/// Find the smallest encoding of `image` within the effort budget of `level`.
///
/// The input is never modified; reductions operate on copies.
///
/// # Errors
///
/// Returns `CompressError::Encode` if the image's pixel buffer is
/// inconsistent, and `CompressError::NoCandidate` if every candidate failed.
pub fn optimize(image: &DecodedImage, level: u8) -> Result<EncodingCandidate, CompressError> {
    image.check()?;
    let plan = plan(level);
    let variants = reduce_variants(image, plan.keep_truecolor);
    let best = search(variants, &plan, zlib::deflate)?;
    debug!(
        "level {}: best {:?}/{} with {:?} and {:?}, {} bytes",
        level,
        best.image.color_type,
        best.image.bit_depth.bits(),
        best.filter,
        best.deflate,
        best.len
    );
    Ok(best)
}

/// Keep the input's stored image data when it beats the search winner.
///
/// `image` must have the layout `idat` was filtered for. Ties go to `best`.
pub fn prefer_stored(best: EncodingCandidate, image: &DecodedImage, idat: Vec<u8>) -> EncodingCandidate {
    let len = encoded_len(image, idat.len());
    if len >= best.len {
        return best;
    }
    debug!("keeping stored image data: {} bytes against {}", len, best.len);
    EncodingCandidate {
        image: image.clone(),
        filter: None,
        deflate: None,
        idat,
        len,
    }
}

/// Best candidate so far, referring to its variant by index.
struct Best {
    variant: usize,
    filter: FilterStrategy,
    deflate: DeflateParams,
    idat: Vec<u8>,
    len: usize,
}

/// Try every (variant, filter, deflate) combination in order.
fn search<F>(mut variants: Vec<DecodedImage>, plan: &SearchPlan, compress: F) -> Result<EncodingCandidate, CompressError>
where
    F: Fn(&[u8], DeflateParams) -> Result<Vec<u8>, EncodeError>,
{
    let mut best: Option<Best> = None;

    for (v, variant) in variants.iter().enumerate() {
        for &filter in plan.filters {
            let filtered = filter_rows(&variant.pixels, variant.row_bytes(), variant.filter_stride(), filter);

            for &params in plan.deflate {
                let idat = match compress(&filtered, params) {
                    Ok(idat) => idat,
                    Err(e) => {
                        warn!("discarding candidate {:?}/{:?}: {}", filter, params, e);
                        continue;
                    }
                };
                let len = encoded_len(variant, idat.len());
                trace!(
                    "candidate {:?}/{} {:?} {:?}: {} bytes",
                    variant.color_type,
                    variant.bit_depth.bits(),
                    filter,
                    params,
                    len
                );
                if best.as_ref().is_some_and(|b| len >= b.len) {
                    continue;
                }

                match zlib::inflate(&idat, filtered.len()) {
                    Ok(check) if check == filtered => {}
                    Ok(_) => {
                        warn!("discarding candidate {:?}/{:?}: stream does not round-trip", filter, params);
                        continue;
                    }
                    Err(e) => {
                        warn!("discarding candidate {:?}/{:?}: {}", filter, params, e);
                        continue;
                    }
                }
                best = Some(Best {
                    variant: v,
                    filter,
                    deflate: params,
                    idat,
                    len,
                });
            }
        }
    }

    let best = best.ok_or(CompressError::NoCandidate)?;
    Ok(EncodingCandidate {
        image: variants.swap_remove(best.variant),
        filter: Some(best.filter),
        deflate: Some(best.deflate),
        idat: best.idat,
        len: best.len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, BitDepth, ColorType, DeflateStrategy, RowFilter};
    use std::cell::Cell;

    fn gradient(width: u32, height: u32) -> DecodedImage {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8]);
            }
        }
        DecodedImage {
            width,
            height,
            color_type: ColorType::Rgb,
            bit_depth: BitDepth::Eight,
            palette: Vec::new(),
            color_key: None,
            pixels,
            chunks: Vec::new(),
        }
    }

    #[test]
    fn test_every_level_round_trips() {
        let img = gradient(24, 20);
        for level in 0..=6 {
            let best = optimize(&img, level).unwrap();
            let png = best.to_png();
            assert_eq!(png.len(), best.len);
            let back = decode(&png).unwrap();
            assert_eq!(back, best.image, "level {level}");
        }
    }

    #[test]
    fn test_search_is_deterministic() {
        let img = gradient(16, 16);
        assert_eq!(optimize(&img, 3).unwrap(), optimize(&img, 3).unwrap());
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        // A constant compressor makes every candidate the same size.
        let plan = plan(3);
        let best = search(vec![gradient(4, 4)], &plan, |data, params| {
            zlib::deflate(data, DeflateParams { level: 0, ..params })
        })
        .unwrap();
        assert_eq!(best.filter, Some(plan.filters[0]));
        assert_eq!(best.deflate, Some(plan.deflate[0]));
    }

    #[test]
    fn test_failed_candidates_are_skipped() {
        let plan = plan(4);
        let calls = Cell::new(0);
        let best = search(vec![gradient(4, 4)], &plan, |data, params| {
            calls.set(calls.get() + 1);
            if params.strategy == DeflateStrategy::Default {
                Err(EncodeError::Deflate("refused".to_string()))
            } else {
                zlib::deflate(data, params)
            }
        })
        .unwrap();
        assert_eq!(best.deflate.map(|d| d.strategy), Some(DeflateStrategy::Filtered));
        assert_eq!(calls.get(), plan.filters.len() * plan.deflate.len());
    }

    #[test]
    fn test_corrupt_streams_are_rejected() {
        let plan = plan(2);
        let result = search(vec![gradient(4, 4)], &plan, |data, params| {
            let mut wrong = data.to_vec();
            wrong[1] ^= 0xFF;
            zlib::deflate(&wrong, params)
        });
        assert_eq!(result, Err(CompressError::NoCandidate));
    }

    #[test]
    fn test_input_not_modified() {
        let img = gradient(8, 8);
        let copy = img.clone();
        let _ = optimize(&img, 6).unwrap();
        assert_eq!(img, copy);
    }

    #[test]
    fn test_inconsistent_image_rejected() {
        let mut img = gradient(4, 4);
        img.pixels.truncate(5);
        assert!(matches!(optimize(&img, 0), Err(CompressError::Encode(_))));
    }

    #[test]
    fn test_level_zero_uses_single_candidate() {
        let best = optimize(&gradient(8, 8), 0).unwrap();
        assert_eq!(best.filter, Some(FilterStrategy::Fixed(RowFilter::None)));
        assert_eq!(best.deflate, Some(DeflateParams::new(6, DeflateStrategy::Default)));
    }

    #[test]
    fn test_stored_data_kept_only_when_smaller() {
        // Too many colors to reduce, so every level encodes this same layout.
        let img = gradient(32, 32);
        let tight = optimize(&img, 6).unwrap().idat;
        let filtered = filter_rows(&img.pixels, img.row_bytes(), img.filter_stride(), FilterStrategy::MinSum);
        let loose = zlib::deflate(&filtered, DeflateParams::new(0, DeflateStrategy::Default)).unwrap();

        let best = optimize(&img, 0).unwrap();
        assert_eq!(best.image, img);
        let kept = prefer_stored(best.clone(), &img, tight.clone());
        assert_eq!(kept.filter, None);
        assert_eq!(kept.idat, tight);
        assert_eq!(kept.to_png().len(), kept.len);
        assert_eq!(decode(&kept.to_png()).unwrap(), img);

        assert_eq!(prefer_stored(best.clone(), &img, loose), best);
    }
}
