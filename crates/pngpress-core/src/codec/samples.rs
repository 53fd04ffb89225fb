//! Conversion between packed scanlines and one-sample-per-slot buffers.
//!
//! Reductions and resampling are far simpler over unpacked samples; the
//! packed form is what gets filtered and compressed.

use super::types::row_bytes;
use super::{BitDepth, DecodedImage};

/// Read `bits` bits starting at `bit_offset` (MSB-first) from `row`.
#[inline]
pub(crate) fn read_bits(row: &[u8], bit_offset: usize, bits: usize) -> u16 {
    match bits {
        16 => {
            let i = bit_offset / 8;
            u16::from_be_bytes([row[i], row[i + 1]])
        }
        8 => u16::from(row[bit_offset / 8]),
        _ => {
            let byte = row[bit_offset / 8];
            let shift = 8 - bits - (bit_offset % 8);
            u16::from((byte >> shift) & ((1u8 << bits) - 1))
        }
    }
}

/// Write the low `bits` bits of `value` at `bit_offset` (MSB-first).
#[inline]
pub(crate) fn write_bits(row: &mut [u8], bit_offset: usize, bits: usize, value: u16) {
    match bits {
        16 => {
            let i = bit_offset / 8;
            row[i..i + 2].copy_from_slice(&value.to_be_bytes());
        }
        8 => row[bit_offset / 8] = value as u8,
        _ => {
            let mask = (1u8 << bits) - 1;
            let shift = 8 - bits - (bit_offset % 8);
            let byte = &mut row[bit_offset / 8];
            *byte = (*byte & !(mask << shift)) | (((value as u8) & mask) << shift);
        }
    }
}

/// Every sample of the image in row-major order, one `u16` each.
pub fn unpack(image: &DecodedImage) -> Vec<u16> {
    let channels = image.color_type.channels();
    let bits = image.bit_depth.bits();
    let per_row = image.width as usize * channels;
    let mut out = Vec::with_capacity(per_row * image.height as usize);

    for row in image.rows() {
        match bits {
            8 => out.extend(row.iter().map(|&b| u16::from(b))),
            16 => out.extend(row.chunks_exact(2).map(|p| u16::from_be_bytes([p[0], p[1]]))),
            _ => out.extend((0..per_row).map(|i| read_bits(row, i * bits, bits))),
        }
    }
    out
}

/// Pack `samples` into padded scanlines at `depth`.
pub fn pack(samples: &[u16], width: u32, channels: usize, depth: BitDepth) -> Vec<u8> {
    let bits = depth.bits();
    let per_row = width as usize * channels;
    if per_row == 0 {
        return Vec::new();
    }
    let stride = row_bytes(width, channels * bits);
    let height = samples.len() / per_row;
    let mut out = vec![0u8; stride * height];

    for (src, dst) in samples.chunks_exact(per_row).zip(out.chunks_exact_mut(stride)) {
        match bits {
            8 => {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = s as u8;
                }
            }
            16 => {
                for (d, &s) in dst.chunks_exact_mut(2).zip(src) {
                    d.copy_from_slice(&s.to_be_bytes());
                }
            }
            _ => {
                for (i, &s) in src.iter().enumerate() {
                    write_bits(dst, i * bits, bits, s);
                }
            }
        }
    }
    out
}

/// Rescale a sample from one depth to another, rounding to nearest.
#[inline]
pub fn rescale(value: u16, from: BitDepth, to: BitDepth) -> u16 {
    if from == to {
        return value;
    }
    let from_max = u32::from(from.max_value());
    let to_max = u32::from(to.max_value());
    ((u32::from(value) * to_max + from_max / 2) / from_max) as u16
}
