//! PNG container encoding.

use super::chunk::{framed_len, write_chunk, ChunkPosition, ChunkType};
use super::filter::{filter_rows, FilterStrategy};
use super::zlib::{deflate, DeflateParams};
use super::{ColorKey, ColorType, DecodedImage, EncodeError, SIGNATURE};

/// Maximum payload per IDAT chunk. Longer streams are split.
pub const IDAT_CHUNK_SIZE: usize = 1 << 20;

/// Filter, compress, and serialize an image in one pass.
///
/// # Arguments
///
/// * `image` - The image to encode
/// * `filter` - Row filter strategy
/// * `params` - Compressor settings
///
/// # Errors
///
/// Returns an error if the pixel buffer does not match the header fields or
/// the compressor fails.
pub fn encode(image: &DecodedImage, filter: FilterStrategy, params: DeflateParams) -> Result<Vec<u8>, EncodeError> {
    image.check()?;
    let filtered = filter_rows(&image.pixels, image.row_bytes(), image.filter_stride(), filter);
    let idat = deflate(&filtered, params)?;
    Ok(write_png(image, &idat))
}

/// Serialize an image around an already compressed zlib stream.
///
/// Chunks are written in canonical order: IHDR, the ancillary chunks that
/// preceded PLTE, PLTE, tRNS, those that preceded IDAT, the IDAT run, those
/// that followed it, and IEND.
pub fn write_png(image: &DecodedImage, idat: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(image, idat.len()));
    out.extend_from_slice(&SIGNATURE);
    write_chunk(&mut out, ChunkType::IHDR, &header_bytes(image));

    write_ancillary(&mut out, image, ChunkPosition::BeforePalette);
    if let Some(plte) = palette_bytes(image) {
        write_chunk(&mut out, ChunkType::PLTE, &plte);
    }
    if let Some(trns) = transparency_bytes(image) {
        write_chunk(&mut out, ChunkType::TRNS, &trns);
    }
    write_ancillary(&mut out, image, ChunkPosition::BeforeData);

    if idat.is_empty() {
        write_chunk(&mut out, ChunkType::IDAT, &[]);
    }
    for part in idat.chunks(IDAT_CHUNK_SIZE) {
        write_chunk(&mut out, ChunkType::IDAT, part);
    }

    write_ancillary(&mut out, image, ChunkPosition::AfterData);
    write_chunk(&mut out, ChunkType::IEND, &[]);
    out
}

/// Exact size `write_png` produces for this image and stream length.
pub fn encoded_len(image: &DecodedImage, idat_len: usize) -> usize {
    let idat_chunks = idat_len.div_ceil(IDAT_CHUNK_SIZE).max(1);
    SIGNATURE.len()
        + framed_len(13)
        + image.chunks.iter().map(|c| c.framed_len()).sum::<usize>()
        + palette_bytes(image).map_or(0, |p| framed_len(p.len()))
        + transparency_bytes(image).map_or(0, |t| framed_len(t.len()))
        + idat_chunks * framed_len(0)
        + idat_len
        + framed_len(0)
}

fn write_ancillary(out: &mut Vec<u8>, image: &DecodedImage, position: ChunkPosition) {
    for chunk in image.chunks.iter().filter(|c| c.position == position) {
        write_chunk(out, chunk.kind, &chunk.data);
    }
}

fn header_bytes(image: &DecodedImage) -> [u8; 13] {
    let mut ihdr = [0u8; 13];
    ihdr[0..4].copy_from_slice(&image.width.to_be_bytes());
    ihdr[4..8].copy_from_slice(&image.height.to_be_bytes());
    ihdr[8] = image.bit_depth as u8;
    ihdr[9] = image.color_type as u8;
    // compression 0, filter 0, interlace 0
    ihdr
}

fn palette_bytes(image: &DecodedImage) -> Option<Vec<u8>> {
    if image.color_type != ColorType::Indexed {
        return None;
    }
    Some(image.palette.iter().flat_map(|e| [e[0], e[1], e[2]]).collect())
}

/// tRNS payload, omitting trailing opaque palette entries.
fn transparency_bytes(image: &DecodedImage) -> Option<Vec<u8>> {
    match (image.color_type, image.color_key) {
        (ColorType::Indexed, _) => {
            let used = image.palette.iter().rposition(|e| e[3] != 255)? + 1;
            Some(image.palette[..used].iter().map(|e| e[3]).collect())
        }
        (ColorType::Grayscale, Some(ColorKey::Gray(v))) => Some(v.to_be_bytes().to_vec()),
        (ColorType::Rgb, Some(ColorKey::Rgb(r, g, b))) => {
            Some([r.to_be_bytes(), g.to_be_bytes(), b.to_be_bytes()].concat())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::chunk::Chunk;
    use crate::codec::{decode, BitDepth, RowFilter};

    fn indexed() -> DecodedImage {
        DecodedImage {
            width: 4,
            height: 2,
            color_type: ColorType::Indexed,
            bit_depth: BitDepth::Two,
            palette: vec![[255, 0, 0, 0], [0, 255, 0, 255], [0, 0, 255, 128], [9, 9, 9, 255]],
            color_key: None,
            pixels: vec![0b0001_1011, 0b1110_0100],
            chunks: vec![
                Chunk::new(ChunkType(*b"gAMA"), 45455u32.to_be_bytes().to_vec(), ChunkPosition::BeforePalette),
                Chunk::new(ChunkType(*b"bKGD"), vec![1], ChunkPosition::BeforeData),
                Chunk::new(ChunkType(*b"tEXt"), b"k\0v".to_vec(), ChunkPosition::AfterData),
            ],
        }
    }

    fn chunk_order(png: &[u8]) -> Vec<String> {
        crate::codec::chunk::ChunkReader::new(&png[8..])
            .map(|c| c.unwrap().kind.to_string())
            .collect()
    }

    #[test]
    fn test_encode_decode_indexed() {
        let image = indexed();
        let png = encode(&image, FilterStrategy::MinSum, DeflateParams::default()).unwrap();
        assert_eq!(&png[..8], &SIGNATURE);
        assert_eq!(decode(&png).unwrap(), image);
    }

    #[test]
    fn test_canonical_chunk_order() {
        let png = encode(&indexed(), FilterStrategy::Fixed(RowFilter::None), DeflateParams::default()).unwrap();
        assert_eq!(
            chunk_order(&png),
            vec!["IHDR", "gAMA", "PLTE", "tRNS", "bKGD", "IDAT", "tEXt", "IEND"]
        );
    }

    #[test]
    fn test_trns_trims_opaque_tail() {
        let image = indexed();
        assert_eq!(transparency_bytes(&image), Some(vec![0, 255, 128]));

        let mut opaque = image;
        for e in &mut opaque.palette {
            e[3] = 255;
        }
        assert_eq!(transparency_bytes(&opaque), None);
    }

    #[test]
    fn test_color_key_written() {
        let image = DecodedImage {
            width: 1,
            height: 1,
            color_type: ColorType::Rgb,
            bit_depth: BitDepth::Sixteen,
            palette: Vec::new(),
            color_key: Some(ColorKey::Rgb(1, 2, 0x0304)),
            pixels: vec![0; 6],
            chunks: Vec::new(),
        };
        assert_eq!(transparency_bytes(&image), Some(vec![0, 1, 0, 2, 3, 4]));
        let png = encode(&image, FilterStrategy::Fixed(RowFilter::None), DeflateParams::default()).unwrap();
        assert_eq!(decode(&png).unwrap().color_key, Some(ColorKey::Rgb(1, 2, 0x0304)));
    }

    #[test]
    fn test_encoded_len_is_exact() {
        let image = indexed();
        for idat_len in [0usize, 1, 100, IDAT_CHUNK_SIZE, IDAT_CHUNK_SIZE + 1] {
            let idat = vec![0u8; idat_len];
            assert_eq!(write_png(&image, &idat).len(), encoded_len(&image, idat_len));
        }
    }

    #[test]
    fn test_long_streams_are_split() {
        let idat = vec![0u8; IDAT_CHUNK_SIZE * 2 + 5];
        let png = write_png(&indexed(), &idat);
        let idats = chunk_order(&png).iter().filter(|k| *k == "IDAT").count();
        assert_eq!(idats, 3);
    }

    #[test]
    fn test_encode_rejects_bad_buffer() {
        let mut image = indexed();
        image.pixels.pop();
        assert!(matches!(
            encode(&image, FilterStrategy::MinSum, DeflateParams::default()),
            Err(EncodeError::InvalidPixelData { .. })
        ));
    }
}
