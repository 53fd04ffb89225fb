//! Adam7 de-interlacing.
//!
//! Interlaced images store seven reduced passes one after another, each with
//! its own scanlines and filter history. The engine always writes
//! non-interlaced output, so only the decode direction exists here.

use super::filter::unfilter_rows;
use super::samples::{read_bits, write_bits};
use super::types::row_bytes;
use super::FormatError;

/// (x origin, y origin, x step, y step) for each pass.
const PASSES: [(usize, usize, usize, usize); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Pixel dimensions of one pass; zero when the pass is empty.
fn pass_size(width: usize, height: usize, pass: (usize, usize, usize, usize)) -> (usize, usize) {
    let (x0, y0, dx, dy) = pass;
    let w = if width > x0 { (width - x0).div_ceil(dx) } else { 0 };
    let h = if height > y0 { (height - y0).div_ceil(dy) } else { 0 };
    (w, h)
}

/// Length of the inflated stream for an interlaced image, or `None` if it
/// does not fit in `usize`.
pub fn interlaced_len(width: u32, height: u32, bits_per_pixel: usize) -> Option<usize> {
    PASSES.iter().try_fold(0usize, |total, &pass| {
        let (w, h) = pass_size(width as usize, height as usize, pass);
        if w == 0 || h == 0 {
            return Some(total);
        }
        w.checked_mul(bits_per_pixel)?
            .div_ceil(8)
            .checked_add(1)?
            .checked_mul(h)?
            .checked_add(total)
    })
}

/// Unfilter every pass and scatter the pixels into non-interlaced rows.
pub fn deinterlace(
    filtered: &[u8],
    width: u32,
    height: u32,
    bits_per_pixel: usize,
    stride: usize,
) -> Result<Vec<u8>, FormatError> {
    let (width, height) = (width as usize, height as usize);
    let out_row = row_bytes(width as u32, bits_per_pixel);
    let mut out = vec![0u8; out_row * height];
    let mut offset = 0;

    for pass in PASSES {
        let (w, h) = pass_size(width, height, pass);
        if w == 0 || h == 0 {
            continue;
        }
        let pass_row = row_bytes(w as u32, bits_per_pixel);
        let len = (pass_row + 1) * h;
        let src = filtered.get(offset..offset + len).ok_or_else(|| {
            FormatError::ImageData("interlaced data ends mid-pass".to_string())
        })?;
        offset += len;

        let pixels = unfilter_rows(src, pass_row, h, stride)?;
        let (x0, y0, dx, dy) = pass;
        for (py, row) in pixels.chunks_exact(pass_row).enumerate() {
            let y = y0 + py * dy;
            let dst = &mut out[y * out_row..(y + 1) * out_row];
            for px in 0..w {
                let x = x0 + px * dx;
                copy_pixel(row, px, dst, x, bits_per_pixel);
            }
        }
    }
    Ok(out)
}

#[inline]
fn copy_pixel(src: &[u8], from: usize, dst: &mut [u8], to: usize, bits_per_pixel: usize) {
    if bits_per_pixel >= 8 {
        let n = bits_per_pixel / 8;
        dst[to * n..(to + 1) * n].copy_from_slice(&src[from * n..(from + 1) * n]);
    } else {
        let v = read_bits(src, from * bits_per_pixel, bits_per_pixel);
        write_bits(dst, to * bits_per_pixel, bits_per_pixel, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_sizes_for_tiny_images() {
        // A 1x1 image only has pixels in the first pass.
        assert_eq!(pass_size(1, 1, PASSES[0]), (1, 1));
        for pass in &PASSES[1..] {
            let (w, h) = pass_size(1, 1, *pass);
            assert!(w == 0 || h == 0);
        }
    }

    #[test]
    fn test_interlaced_len_covers_every_pixel() {
        // 8x8 at 8 bits per pixel: 64 pixel bytes plus one filter byte per
        // pass row (1 + 1 + 1 + 2 + 2 + 4 + 4 = 15 rows).
        assert_eq!(interlaced_len(8, 8, 8), Some(64 + 15));
    }

    #[test]
    fn test_interlaced_len_overflow() {
        assert_eq!(interlaced_len(0x7FFF_FFFF, 0x7FFF_FFFF, 64), None);
    }

    #[test]
    fn test_deinterlace_places_pixels() {
        // Build an 8x8 8-bit image whose value is its index, interlace it by
        // hand with filter type None, and check the scatter.
        let (width, height) = (8usize, 8usize);
        let mut stream = Vec::new();
        for pass in PASSES {
            let (w, h) = pass_size(width, height, pass);
            let (x0, y0, dx, dy) = pass;
            for py in 0..h {
                stream.push(0);
                for px in 0..w {
                    stream.push(((y0 + py * dy) * width + x0 + px * dx) as u8);
                }
            }
        }

        let out = deinterlace(&stream, 8, 8, 8, 1).unwrap();
        let expected: Vec<u8> = (0..64u8).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_deinterlace_sub_byte() {
        // 3x1 at 1 bit: pass 1 holds x=0, pass 6 holds x=1; x=2 falls into
        // pass 4 (x0 = 2, step 4).
        let stream = vec![0, 0b1000_0000, 0, 0b1000_0000, 0, 0b0000_0000];
        let out = deinterlace(&stream, 3, 1, 1, 1).unwrap();
        assert_eq!(out, vec![0b1010_0000]);
    }

    #[test]
    fn test_deinterlace_rejects_short_data() {
        assert!(deinterlace(&[0, 1, 2], 8, 8, 8, 1).is_err());
    }
}
