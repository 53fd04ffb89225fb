//! PNG container decoding.

use tracing::{debug, trace};

use super::chunk::{read_u32, Chunk, ChunkPosition, ChunkReader, ChunkType};
use super::interlace::{deinterlace, interlaced_len};
use super::types::row_bytes;
use super::{
    filter, samples, zlib, BitDepth, ColorKey, ColorType, DecodedImage, FormatError, PaletteEntry, MAX_DIMENSION, SIGNATURE,
};

/// Parsed IHDR fields.
#[derive(Debug, Clone, Copy)]
struct Header {
    width: u32,
    height: u32,
    bit_depth: BitDepth,
    color_type: ColorType,
    interlaced: bool,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() != 13 {
            return Err(FormatError::Header(format!("IHDR length {}", data.len())));
        }
        let width = read_u32(&data[0..4]);
        let height = read_u32(&data[4..8]);
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(FormatError::Header(format!("dimensions {width}x{height}")));
        }

        let bit_depth = BitDepth::try_from(data[8])?;
        let color_type = ColorType::try_from(data[9])?;
        if !color_type.allows(bit_depth) {
            return Err(FormatError::Header(format!(
                "bit depth {} with color type {}",
                data[8], data[9]
            )));
        }
        if data[10] != 0 {
            return Err(FormatError::Header(format!("compression method {}", data[10])));
        }
        if data[11] != 0 {
            return Err(FormatError::Header(format!("filter method {}", data[11])));
        }
        let interlaced = match data[12] {
            0 => false,
            1 => true,
            other => return Err(FormatError::Header(format!("interlace method {other}"))),
        };

        Ok(Self {
            width,
            height,
            bit_depth,
            color_type,
            interlaced,
        })
    }

    fn bits_per_pixel(&self) -> usize {
        self.color_type.channels() * self.bit_depth.bits()
    }

    /// Size of the filtered, uncompressed image data.
    fn data_len(&self) -> Result<usize, FormatError> {
        let bpp = self.bits_per_pixel();
        let len = if self.interlaced {
            interlaced_len(self.width, self.height, bpp)
        } else {
            (self.width as usize)
                .checked_mul(bpp)
                .and_then(|bits| bits.div_ceil(8).checked_add(1))
                .and_then(|row| row.checked_mul(self.height as usize))
        };
        len.ok_or_else(|| {
            FormatError::Header(format!(
                "image data for {}x{} at {bpp} bits per pixel is too large",
                self.width, self.height
            ))
        })
    }
}

/// Where the parser is relative to the IDAT run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataState {
    NotSeen,
    Open,
    Closed,
}

/// Decode a PNG container into pixel data plus retained ancillary chunks.
///
/// # Errors
///
/// Returns a `FormatError` if the signature is absent, a chunk is truncated
/// or fails its CRC, a critical chunk is missing or out of order, or the
/// image data does not inflate to what the header promises.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, FormatError> {
    if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
        return Err(FormatError::Signature);
    }

    let mut reader = ChunkReader::new(&bytes[SIGNATURE.len()..]);
    let mut header: Option<Header> = None;
    let mut palette: Option<Vec<PaletteEntry>> = None;
    let mut transparency: Option<&[u8]> = None;
    let mut idat = Vec::new();
    let mut data_state = DataState::NotSeen;
    let mut chunks = Vec::new();
    let mut ended = false;

    for raw in reader.by_ref() {
        let raw = raw?;

        if header.is_none() && raw.kind != ChunkType::IHDR {
            return Err(FormatError::ChunkOrder(format!("{} before IHDR", raw.kind)));
        }
        if data_state == DataState::Open && raw.kind != ChunkType::IDAT {
            data_state = DataState::Closed;
        }

        match raw.kind {
            ChunkType::IHDR => {
                if header.is_some() {
                    return Err(FormatError::ChunkOrder("duplicate IHDR".to_string()));
                }
                header = Some(Header::parse(raw.data)?);
            }
            ChunkType::PLTE => {
                if palette.is_some() {
                    return Err(FormatError::ChunkOrder("duplicate PLTE".to_string()));
                }
                if data_state != DataState::NotSeen {
                    return Err(FormatError::ChunkOrder("PLTE after IDAT".to_string()));
                }
                if transparency.is_some() {
                    return Err(FormatError::ChunkOrder("PLTE after tRNS".to_string()));
                }
                palette = Some(parse_palette(raw.data)?);
            }
            ChunkType::TRNS => {
                if transparency.is_some() {
                    return Err(FormatError::ChunkOrder("duplicate tRNS".to_string()));
                }
                if data_state != DataState::NotSeen {
                    return Err(FormatError::ChunkOrder("tRNS after IDAT".to_string()));
                }
                transparency = Some(raw.data);
            }
            ChunkType::IDAT => {
                if data_state == DataState::Closed {
                    return Err(FormatError::ChunkOrder("IDAT chunks are not consecutive".to_string()));
                }
                data_state = DataState::Open;
                idat.extend_from_slice(raw.data);
            }
            ChunkType::IEND => {
                ended = true;
                break;
            }
            kind if kind.is_critical() => {
                return Err(FormatError::UnknownCriticalChunk(kind.to_string()));
            }
            kind => {
                let position = match (data_state, palette.is_some()) {
                    (DataState::NotSeen, false) => ChunkPosition::BeforePalette,
                    (DataState::NotSeen, true) => ChunkPosition::BeforeData,
                    _ => ChunkPosition::AfterData,
                };
                chunks.push(Chunk::new(kind, raw.data.to_vec(), position));
            }
        }
    }

    let header = header.ok_or(FormatError::MissingChunk("IHDR"))?;
    if !ended {
        return Err(FormatError::MissingChunk("IEND"));
    }
    if reader.remaining() > 0 {
        return Err(FormatError::TrailingData(reader.remaining()));
    }
    if data_state == DataState::NotSeen {
        return Err(FormatError::MissingChunk("IDAT"));
    }

    let palette = match (header.color_type, palette) {
        (ColorType::Indexed, None) => return Err(FormatError::MissingChunk("PLTE")),
        (ColorType::Indexed, Some(p)) => {
            if p.len() > 1 << header.bit_depth.bits() {
                return Err(FormatError::Palette(format!(
                    "{} entries exceed bit depth {}",
                    p.len(),
                    header.bit_depth.bits()
                )));
            }
            p
        }
        (ColorType::Grayscale | ColorType::GrayscaleAlpha, Some(_)) => {
            return Err(FormatError::ChunkOrder("PLTE in a grayscale image".to_string()));
        }
        // A suggested palette for truecolor images carries no pixel data.
        (_, Some(_)) => {
            trace!("dropping suggested palette for truecolor image");
            Vec::new()
        }
        (_, None) => Vec::new(),
    };

    let mut image = DecodedImage {
        width: header.width,
        height: header.height,
        color_type: header.color_type,
        bit_depth: header.bit_depth,
        palette,
        color_key: None,
        pixels: Vec::new(),
        chunks,
    };
    if let Some(trns) = transparency {
        apply_transparency(&mut image, trns)?;
    }

    let bpp = header.bits_per_pixel();
    let stride = (bpp / 8).max(1);
    let raw = zlib::inflate(&idat, header.data_len()?)?;
    image.pixels = if header.interlaced {
        deinterlace(&raw, header.width, header.height, bpp, stride)?
    } else {
        let row = row_bytes(header.width, bpp);
        filter::unfilter_rows(&raw, row, header.height as usize, stride)?
    };

    if image.color_type == ColorType::Indexed {
        let entries = image.palette.len();
        if samples::unpack(&image).iter().any(|&i| usize::from(i) >= entries) {
            return Err(FormatError::ImageData(format!(
                "palette index out of range for {entries} entries"
            )));
        }
    }

    debug!(
        "decoded {}x{} {:?}/{} ({} ancillary chunks, interlaced: {})",
        image.width,
        image.height,
        image.color_type,
        image.bit_depth.bits(),
        image.chunks.len(),
        header.interlaced
    );
    Ok(image)
}

/// The IDAT stream of a non-interlaced PNG, concatenated as stored.
///
/// Returns `None` for interlaced input, whose stream cannot be reused in
/// non-interlaced output, and for input that does not parse.
pub fn stored_image_data(bytes: &[u8]) -> Option<Vec<u8>> {
    if !bytes.starts_with(&SIGNATURE) {
        return None;
    }
    let mut idat = Vec::new();
    for raw in ChunkReader::new(&bytes[SIGNATURE.len()..]) {
        let raw = raw.ok()?;
        match raw.kind {
            ChunkType::IHDR if raw.data.get(12) != Some(&0) => return None,
            ChunkType::IDAT => idat.extend_from_slice(raw.data),
            ChunkType::IEND => break,
            _ => {}
        }
    }
    Some(idat)
}

fn parse_palette(data: &[u8]) -> Result<Vec<PaletteEntry>, FormatError> {
    if data.is_empty() || data.len() % 3 != 0 || data.len() > 256 * 3 {
        return Err(FormatError::Palette(format!("PLTE length {}", data.len())));
    }
    Ok(data.chunks_exact(3).map(|c| [c[0], c[1], c[2], 255]).collect())
}

/// Fold a tRNS payload into the image: palette alphas or a color key.
fn apply_transparency(image: &mut DecodedImage, data: &[u8]) -> Result<(), FormatError> {
    let max = image.bit_depth.max_value();
    let sample = |i: usize| -> Result<u16, FormatError> {
        let v = u16::from_be_bytes([data[i], data[i + 1]]);
        if v > max {
            Err(FormatError::Palette(format!("tRNS value {v} exceeds bit depth")))
        } else {
            Ok(v)
        }
    };

    match image.color_type {
        ColorType::Indexed => {
            if data.len() > image.palette.len() {
                return Err(FormatError::Palette(format!(
                    "{} tRNS entries for {} palette entries",
                    data.len(),
                    image.palette.len()
                )));
            }
            for (entry, &alpha) in image.palette.iter_mut().zip(data) {
                entry[3] = alpha;
            }
        }
        ColorType::Grayscale => {
            if data.len() != 2 {
                return Err(FormatError::Palette(format!("grayscale tRNS length {}", data.len())));
            }
            image.color_key = Some(ColorKey::Gray(sample(0)?));
        }
        ColorType::Rgb => {
            if data.len() != 6 {
                return Err(FormatError::Palette(format!("truecolor tRNS length {}", data.len())));
            }
            image.color_key = Some(ColorKey::Rgb(sample(0)?, sample(2)?, sample(4)?));
        }
        ColorType::GrayscaleAlpha | ColorType::Rgba => {
            return Err(FormatError::Palette("tRNS in an image with an alpha channel".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::chunk::write_chunk;
    use crate::codec::zlib::{deflate, DeflateParams};
    use crate::fixtures::TINY_PNG;

    fn ihdr(width: u32, height: u32, depth: u8, color: u8, interlace: u8) -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(&width.to_be_bytes());
        d.extend_from_slice(&height.to_be_bytes());
        d.extend_from_slice(&[depth, color, 0, 0, interlace]);
        d
    }

    /// Assemble a PNG from (type, payload) pairs.
    fn png(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        for (kind, data) in chunks {
            write_chunk(&mut out, ChunkType(**kind), data);
        }
        out
    }

    fn gray_2x2() -> Vec<(&'static [u8; 4], Vec<u8>)> {
        let raw = [0u8, 10, 20, 0, 30, 40];
        vec![
            (b"IHDR", ihdr(2, 2, 8, 0, 0)),
            (b"IDAT", deflate(&raw, DeflateParams::default()).unwrap()),
            (b"IEND", Vec::new()),
        ]
    }

    #[test]
    fn test_decode_fixture() {
        let img = decode(TINY_PNG).unwrap();
        assert_eq!((img.width, img.height), (1, 1));
        assert_eq!(img.color_type, ColorType::Rgba);
        assert_eq!(img.bit_depth, BitDepth::Eight);
        assert_eq!(img.pixels, vec![0, 0, 0, 0]);
        assert!(img.chunks.is_empty());
    }

    #[test]
    fn test_decode_gray() {
        let img = decode(&png(&gray_2x2())).unwrap();
        assert_eq!(img.pixels, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_decode_split_idat() {
        let mut chunks = gray_2x2();
        let data = chunks[1].1.clone();
        let (a, b) = data.split_at(3);
        chunks[1].1 = a.to_vec();
        chunks.insert(2, (b"IDAT", b.to_vec()));
        let img = decode(&png(&chunks)).unwrap();
        assert_eq!(img.pixels, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_missing_signature() {
        assert_eq!(decode(b"GIF89a"), Err(FormatError::Signature));
        assert_eq!(decode(&[]), Err(FormatError::Signature));
    }

    #[test]
    fn test_bad_crc() {
        let mut bytes = TINY_PNG.to_vec();
        bytes[20] ^= 1; // inside IHDR payload
        assert!(matches!(decode(&bytes), Err(FormatError::Crc { .. })));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = &TINY_PNG[..40];
        assert!(matches!(decode(bytes), Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_missing_iend() {
        let mut chunks = gray_2x2();
        chunks.pop();
        assert_eq!(decode(&png(&chunks)), Err(FormatError::MissingChunk("IEND")));
    }

    #[test]
    fn test_missing_idat() {
        let chunks = vec![(b"IHDR", ihdr(2, 2, 8, 0, 0)), (b"IEND", Vec::new())];
        assert_eq!(decode(&png(&chunks)), Err(FormatError::MissingChunk("IDAT")));
    }

    #[test]
    fn test_ihdr_must_be_first() {
        let mut chunks = gray_2x2();
        chunks.insert(0, (b"tEXt", b"a\0b".to_vec()));
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::ChunkOrder(_))));
    }

    #[test]
    fn test_palette_after_data_rejected() {
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(2, 2, 8, 3, 0);
        chunks.insert(2, (b"PLTE", vec![0; 3]));
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::ChunkOrder(_))));
    }

    #[test]
    fn test_indexed_without_palette() {
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(2, 2, 8, 3, 0);
        assert_eq!(decode(&png(&chunks)), Err(FormatError::MissingChunk("PLTE")));
    }

    #[test]
    fn test_non_consecutive_idat() {
        let mut chunks = gray_2x2();
        let data = chunks[1].1.clone();
        let (a, b) = data.split_at(3);
        chunks[1].1 = a.to_vec();
        chunks.insert(2, (b"tEXt", b"k\0v".to_vec()));
        chunks.insert(3, (b"IDAT", b.to_vec()));
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::ChunkOrder(_))));
    }

    #[test]
    fn test_trailing_data() {
        let mut bytes = png(&gray_2x2());
        bytes.extend_from_slice(b"junk");
        assert_eq!(decode(&bytes), Err(FormatError::TrailingData(4)));
    }

    #[test]
    fn test_unknown_critical_chunk() {
        let mut chunks = gray_2x2();
        chunks.insert(1, (b"ABCD", Vec::new()));
        assert_eq!(
            decode(&png(&chunks)),
            Err(FormatError::UnknownCriticalChunk("ABCD".to_string()))
        );
    }

    #[test]
    fn test_invalid_header_combination() {
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(2, 2, 4, 2, 0);
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::Header(_))));
    }

    #[test]
    fn test_stored_image_data() {
        let mut chunks = gray_2x2();
        let data = chunks[1].1.clone();
        let (a, b) = data.split_at(3);
        chunks[1].1 = a.to_vec();
        chunks.insert(2, (b"IDAT", b.to_vec()));
        assert_eq!(stored_image_data(&png(&chunks)), Some(data));

        chunks[0].1 = ihdr(2, 2, 8, 0, 1);
        assert_eq!(stored_image_data(&png(&chunks)), None);
        assert_eq!(stored_image_data(b"GIF89a"), None);
    }

    #[test]
    fn test_oversized_header_rejected() {
        // Largest legal dimensions at 64 bits per pixel overflow the data size.
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(0x7FFF_FFFF, 0x7FFF_FFFF, 16, 6, 0);
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::Header(_))));

        chunks[0].1 = ihdr(0x7FFF_FFFF, 0x7FFF_FFFF, 16, 6, 1);
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::Header(_))));
    }

    #[test]
    fn test_ancillary_positions() {
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(2, 2, 8, 3, 0);
        chunks.insert(1, (b"gAMA", 45455u32.to_be_bytes().to_vec()));
        chunks.insert(2, (b"PLTE", (0..=255u8).flat_map(|v| [v, v, v]).collect()));
        chunks.insert(3, (b"bKGD", vec![7]));
        chunks.insert(5, (b"tEXt", b"k\0v".to_vec()));

        let img = decode(&png(&chunks)).unwrap();
        let positions: Vec<_> = img.chunks.iter().map(|c| (c.kind.to_string(), c.position)).collect();
        assert_eq!(
            positions,
            vec![
                ("gAMA".to_string(), ChunkPosition::BeforePalette),
                ("bKGD".to_string(), ChunkPosition::BeforeData),
                ("tEXt".to_string(), ChunkPosition::AfterData),
            ]
        );
        assert_eq!(img.palette.len(), 256);
    }

    #[test]
    fn test_transparency_applied() {
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(2, 2, 8, 3, 0);
        chunks.insert(1, (b"PLTE", (0..=255u8).flat_map(|v| [v, v, v]).collect()));
        chunks.insert(2, (b"tRNS", vec![0, 128]));
        let img = decode(&png(&chunks)).unwrap();
        assert_eq!(img.palette[0], [0, 0, 0, 0]);
        assert_eq!(img.palette[1], [1, 1, 1, 128]);
        assert_eq!(img.palette[2], [2, 2, 2, 255]);

        let mut chunks = gray_2x2();
        chunks.insert(1, (b"tRNS", vec![0, 20]));
        let img = decode(&png(&chunks)).unwrap();
        assert_eq!(img.color_key, Some(ColorKey::Gray(20)));
    }

    #[test]
    fn test_palette_index_out_of_range() {
        let mut chunks = gray_2x2();
        chunks[0].1 = ihdr(2, 2, 8, 3, 0);
        chunks.insert(1, (b"PLTE", vec![0; 3 * 16]));
        assert!(matches!(decode(&png(&chunks)), Err(FormatError::ImageData(_))));
    }

    #[test]
    fn test_interlaced_decode_matches_plain() {
        // 3x3 gray, one filter byte per pass row, filter None everywhere.
        // Passes present: 1 (x0,y0), 4 (x2,y0), 5 (x0,x2 @ y2), 6 (x1 @ y0,y2),
        // 7 (rows 1: x0..x2).
        let px = |x: u8, y: u8| y * 3 + x + 1;
        let mut raw = vec![0, px(0, 0)];
        raw.extend_from_slice(&[0, px(2, 0)]);
        raw.extend_from_slice(&[0, px(0, 2), px(2, 2)]);
        raw.extend_from_slice(&[0, px(1, 0), 0, px(1, 2)]);
        raw.extend_from_slice(&[0, px(0, 1), px(1, 1), px(2, 1)]);

        let chunks = vec![
            (b"IHDR", ihdr(3, 3, 8, 0, 1)),
            (b"IDAT", deflate(&raw, DeflateParams::default()).unwrap()),
            (b"IEND", Vec::new()),
        ];
        let img = decode(&png(&chunks)).unwrap();
        assert_eq!(img.pixels, (1..=9).collect::<Vec<u8>>());
    }
}
