//! Lossless color type and bit depth reductions.
//!
//! Each step only fires when it provably keeps every rendered pixel
//! unchanged. Steps run in a fixed order over unpacked samples.

use std::collections::HashMap;

use tracing::debug;

use crate::codec::{samples, zlib, BitDepth, ChunkType, ColorKey, ColorType, DecodedImage, PaletteEntry};

/// Unpacked working form of an image.
#[derive(Debug, Clone)]
struct Raster {
    color_type: ColorType,
    depth: BitDepth,
    palette: Vec<PaletteEntry>,
    key: Option<ColorKey>,
    samples: Vec<u16>,
}

impl Raster {
    fn from_image(image: &DecodedImage) -> Self {
        Self {
            color_type: image.color_type,
            depth: image.bit_depth,
            palette: image.palette.clone(),
            key: image.color_key,
            samples: samples::unpack(image),
        }
    }

    /// Pack back into an image that shares `base`'s size and chunks.
    fn into_image(self, base: &DecodedImage) -> DecodedImage {
        DecodedImage {
            width: base.width,
            height: base.height,
            color_type: self.color_type,
            bit_depth: self.depth,
            pixels: samples::pack(&self.samples, base.width, self.color_type.channels(), self.depth),
            palette: self.palette,
            color_key: self.key,
            chunks: base.chunks.clone(),
        }
    }

    fn channels(&self) -> usize {
        self.color_type.channels()
    }
}

/// Data color space declared by a retained ICC profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileSpace {
    Gray,
    Rgb,
    /// Unreadable, or some other space.
    Other,
}

impl ProfileSpace {
    /// Read the space field (bytes 16..20) of the profile in an iCCP chunk.
    fn of(image: &DecodedImage) -> Option<Self> {
        let chunk = image.chunks.iter().find(|c| c.kind == ChunkType::ICCP)?;
        let header = chunk
            .data
            .iter()
            .position(|&b| b == 0)
            .and_then(|nul| chunk.data.get(nul + 2..))
            .and_then(|stream| zlib::inflate_prefix(stream, 20).ok());
        Some(match header.as_deref().and_then(|h| h.get(16..20)) {
            Some(b"GRAY") => ProfileSpace::Gray,
            Some(b"RGB ") => ProfileSpace::Rgb,
            _ => ProfileSpace::Other,
        })
    }
}

/// Whether a retained profile still applies after a gray/color change.
fn profile_allows(profile: Option<ProfileSpace>, to_gray: bool) -> bool {
    match profile {
        None => true,
        Some(ProfileSpace::Gray) => to_gray,
        Some(ProfileSpace::Rgb) => !to_gray,
        Some(ProfileSpace::Other) => false,
    }
}

/// Whether any retained chunk would be invalidated by a layout change.
pub fn layout_locked(image: &DecodedImage) -> bool {
    image.chunks.iter().any(|c| c.kind.is_layout_bound())
}

/// Produce the images the search should try, most reduced first.
///
/// With `keep_truecolor`, the variant from just before palette conversion is
/// included as well whenever that conversion happened.
pub fn reduce_variants(image: &DecodedImage, keep_truecolor: bool) -> Vec<DecodedImage> {
    if layout_locked(image) {
        debug!("layout-bound chunk retained, skipping reductions");
        return vec![image.clone()];
    }

    let profile = ProfileSpace::of(image);
    let mut raster = Raster::from_image(image);
    let mut applied = Vec::new();

    if reduce_sixteen(&mut raster) {
        applied.push("16-bit to 8-bit");
    }
    if drop_opaque_alpha(&mut raster) {
        applied.push("opaque alpha removed");
    }
    if alpha_to_color_key(&mut raster) {
        applied.push("binary alpha to color key");
    }
    if profile_allows(profile, true) && rgb_to_gray(&mut raster) {
        applied.push("rgb to gray");
    }

    let truecolor = raster.clone();
    let gray_to_color = raster.color_type == ColorType::GrayscaleAlpha;
    let paletted = (!gray_to_color || profile_allows(profile, false)) && to_palette(&mut raster);
    if paletted {
        applied.push("truecolor to palette");
    }
    if compact_palette(&mut raster) {
        applied.push("palette compacted");
    }
    if pack_depth(&mut raster) {
        applied.push("bit depth packed");
    }

    if !applied.is_empty() {
        debug!(
            "reduced {:?}/{} to {:?}/{}: {}",
            image.color_type,
            image.bit_depth.bits(),
            raster.color_type,
            raster.depth.bits(),
            applied.join(", ")
        );
    }

    let mut variants = vec![raster.into_image(image)];
    if paletted && keep_truecolor {
        variants.push(truecolor.into_image(image));
    }
    variants
}

fn map_key(key: ColorKey, f: impl Fn(u16) -> u16) -> ColorKey {
    match key {
        ColorKey::Gray(v) => ColorKey::Gray(f(v)),
        ColorKey::Rgb(r, g, b) => ColorKey::Rgb(f(r), f(g), f(b)),
    }
}

fn key_values(key: ColorKey) -> Vec<u16> {
    match key {
        ColorKey::Gray(v) => vec![v],
        ColorKey::Rgb(r, g, b) => vec![r, g, b],
    }
}

/// 16 to 8 bits when every sample has equal high and low bytes.
fn reduce_sixteen(r: &mut Raster) -> bool {
    if r.depth != BitDepth::Sixteen {
        return false;
    }
    let fits = |v: u16| v >> 8 == v & 0xFF;
    if !r.samples.iter().all(|&v| fits(v)) || !r.key.map_or(true, |k| key_values(k).into_iter().all(fits)) {
        return false;
    }
    for v in &mut r.samples {
        *v >>= 8;
    }
    r.key = r.key.map(|k| map_key(k, |v| v >> 8));
    r.depth = BitDepth::Eight;
    true
}

fn without_alpha(r: &mut Raster) {
    let ch = r.channels();
    r.samples = r
        .samples
        .chunks_exact(ch)
        .flat_map(|p| p[..ch - 1].iter().copied())
        .collect();
    r.color_type = if ch == 2 { ColorType::Grayscale } else { ColorType::Rgb };
}

/// Remove an alpha channel that is fully opaque everywhere.
fn drop_opaque_alpha(r: &mut Raster) -> bool {
    if !r.color_type.has_alpha() {
        return false;
    }
    let ch = r.channels();
    let max = r.depth.max_value();
    if !r.samples.chunks_exact(ch).all(|p| p[ch - 1] == max) {
        return false;
    }
    without_alpha(r);
    true
}

/// Replace a binary alpha channel with a tRNS color key.
///
/// Requires every transparent pixel to share one color that no opaque pixel
/// uses.
fn alpha_to_color_key(r: &mut Raster) -> bool {
    if !r.color_type.has_alpha() {
        return false;
    }
    let ch = r.channels();
    let max = r.depth.max_value();
    let mut key: Option<&[u16]> = None;
    for p in r.samples.chunks_exact(ch) {
        match p[ch - 1] {
            0 => match key {
                None => key = Some(&p[..ch - 1]),
                Some(k) if k == &p[..ch - 1] => {}
                Some(_) => return false,
            },
            a if a == max => {}
            _ => return false,
        }
    }
    let Some(key) = key.map(<[u16]>::to_vec) else {
        return false;
    };
    if r
        .samples
        .chunks_exact(ch)
        .any(|p| p[ch - 1] == max && p[..ch - 1] == key[..])
    {
        return false;
    }

    let color_key = match key[..] {
        [g] => ColorKey::Gray(g),
        [red, green, blue] => ColorKey::Rgb(red, green, blue),
        _ => return false,
    };
    without_alpha(r);
    r.key = Some(color_key);
    true
}

/// Collapse RGB to gray when every pixel has equal channels.
fn rgb_to_gray(r: &mut Raster) -> bool {
    if !matches!(r.color_type, ColorType::Rgb | ColorType::Rgba) {
        return false;
    }
    let ch = r.channels();
    if !r.samples.chunks_exact(ch).all(|p| p[0] == p[1] && p[1] == p[2]) {
        return false;
    }
    let key = match r.key {
        Some(ColorKey::Rgb(red, green, blue)) if red == green && green == blue => Some(ColorKey::Gray(red)),
        Some(_) => return false,
        None => None,
    };
    r.samples = r
        .samples
        .chunks_exact(ch)
        .flat_map(|p| {
            let mut gray = vec![p[0]];
            if ch == 4 {
                gray.push(p[3]);
            }
            gray
        })
        .collect();
    r.color_type = if ch == 4 { ColorType::GrayscaleAlpha } else { ColorType::Grayscale };
    r.key = key;
    true
}

/// Transparent entries first, otherwise first-use order.
fn order_palette(entries: Vec<PaletteEntry>) -> Vec<PaletteEntry> {
    let (mut ordered, opaque): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e[3] != 255);
    ordered.extend(opaque);
    ordered
}

/// Convert 8-bit truecolor (or gray with alpha) to indexed color when it
/// uses at most 256 distinct colors.
fn to_palette(r: &mut Raster) -> bool {
    if r.depth != BitDepth::Eight
        || !matches!(r.color_type, ColorType::Rgb | ColorType::Rgba | ColorType::GrayscaleAlpha)
    {
        return false;
    }
    let ch = r.channels();
    let key = r.key;
    let entry = |p: &[u16]| -> PaletteEntry {
        match ch {
            2 => [p[0] as u8, p[0] as u8, p[0] as u8, p[1] as u8],
            4 => [p[0] as u8, p[1] as u8, p[2] as u8, p[3] as u8],
            _ => {
                let alpha = if key == Some(ColorKey::Rgb(p[0], p[1], p[2])) { 0 } else { 255 };
                [p[0] as u8, p[1] as u8, p[2] as u8, alpha]
            }
        }
    };

    let mut seen: HashMap<PaletteEntry, usize> = HashMap::new();
    let mut first_use = Vec::new();
    for p in r.samples.chunks_exact(ch) {
        let e = entry(p);
        if !seen.contains_key(&e) {
            if first_use.len() == 256 {
                return false;
            }
            seen.insert(e, first_use.len());
            first_use.push(e);
        }
    }

    let palette = order_palette(first_use);
    let index: HashMap<PaletteEntry, u16> = palette.iter().enumerate().map(|(i, &e)| (e, i as u16)).collect();
    r.samples = r.samples.chunks_exact(ch).map(|p| index[&entry(p)]).collect();
    r.palette = palette;
    r.color_type = ColorType::Indexed;
    r.key = None;
    true
}

/// Drop unused and duplicate palette entries and put transparent ones first.
fn compact_palette(r: &mut Raster) -> bool {
    if r.color_type != ColorType::Indexed {
        return false;
    }
    let mut used = vec![false; r.palette.len()];
    for &i in &r.samples {
        if let Some(u) = used.get_mut(usize::from(i)) {
            *u = true;
        }
    }

    let mut unique = Vec::new();
    for (i, &e) in r.palette.iter().enumerate() {
        if used[i] && !unique.contains(&e) {
            unique.push(e);
        }
    }
    let palette = order_palette(unique);
    if palette == r.palette {
        return false;
    }

    let index: HashMap<PaletteEntry, u16> = palette.iter().enumerate().map(|(i, &e)| (e, i as u16)).collect();
    let remap: Vec<u16> = r
        .palette
        .iter()
        .map(|e| index.get(e).copied().unwrap_or(0))
        .collect();
    for v in &mut r.samples {
        *v = remap.get(usize::from(*v)).copied().unwrap_or(0);
    }
    r.palette = palette;
    true
}

/// Pack indexed and gray images into the smallest depth that holds them.
fn pack_depth(r: &mut Raster) -> bool {
    match r.color_type {
        ColorType::Indexed => {
            let depth = match r.palette.len() {
                0..=2 => BitDepth::One,
                3..=4 => BitDepth::Two,
                5..=16 => BitDepth::Four,
                _ => BitDepth::Eight,
            };
            if depth < r.depth {
                r.depth = depth;
                true
            } else {
                false
            }
        }
        ColorType::Grayscale if r.depth <= BitDepth::Eight => {
            let from = r.depth;
            let exact = |v: u16, to: BitDepth| samples::rescale(samples::rescale(v, from, to), to, from) == v;
            let key = r.key.map(key_values).unwrap_or_default();
            let target = [BitDepth::One, BitDepth::Two, BitDepth::Four]
                .into_iter()
                .filter(|&d| d < from)
                .find(|&d| r.samples.iter().chain(&key).all(|&v| exact(v, d)));
            let Some(to) = target else {
                return false;
            };
            for v in &mut r.samples {
                *v = samples::rescale(*v, from, to);
            }
            r.key = r.key.map(|k| map_key(k, |v| samples::rescale(v, from, to)));
            r.depth = to;
            true
        }
        _ => false,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: reductions never change rendered pixels.
        #[test]
        fn prop_reductions_preserve_rgba(
            width in 1u32..=6,
            height in 1u32..=4,
            colors in prop::collection::vec((0u8..4, 0u8..4, 0u8..2, prop::bool::ANY), 1..6),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 24),
        ) {
            let n = (width * height) as usize;
            let mut pixels = Vec::with_capacity(n * 4);
            for pick in picks.iter().take(n) {
                let (r, g, b, opaque) = colors[pick.index(colors.len())];
                pixels.extend_from_slice(&[r * 85, g * 85, b * 85, if opaque { 255 } else { 0 }]);
            }
            let img = DecodedImage {
                width,
                height,
                color_type: ColorType::Rgba,
                bit_depth: BitDepth::Eight,
                palette: Vec::new(),
                color_key: None,
                pixels,
                chunks: Vec::new(),
            };
            let expected = rgba(&img);
            for variant in reduce_variants(&img, true) {
                prop_assert!(variant.check().is_ok());
                prop_assert_eq!(rgba(&variant), expected.clone());
            }
        }
    }

    /// Rendered RGBA8, with fully transparent pixels normalized.
    fn rgba(img: &DecodedImage) -> Vec<[u8; 4]> {
        let ch = img.color_type.channels();
        let up = |v: u16| samples::rescale(v, img.bit_depth, BitDepth::Eight) as u8;
        samples::unpack(img)
            .chunks_exact(ch)
            .map(|p| {
                let px = match img.color_type {
                    ColorType::Indexed => img.palette[p[0] as usize],
                    ColorType::Grayscale => {
                        let a = if img.color_key == Some(ColorKey::Gray(p[0])) { 0 } else { 255 };
                        [up(p[0]), up(p[0]), up(p[0]), a]
                    }
                    ColorType::Rgb => {
                        let a = if img.color_key == Some(ColorKey::Rgb(p[0], p[1], p[2])) { 0 } else { 255 };
                        [up(p[0]), up(p[1]), up(p[2]), a]
                    }
                    ColorType::GrayscaleAlpha => [up(p[0]), up(p[0]), up(p[0]), up(p[1])],
                    ColorType::Rgba => [up(p[0]), up(p[1]), up(p[2]), up(p[3])],
                };
                if px[3] == 0 { [0, 0, 0, 0] } else { px }
            })
            .collect()
    }
}
