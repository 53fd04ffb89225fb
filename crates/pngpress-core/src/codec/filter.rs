//! Scanline filters.
//!
//! PNG prefixes every scanline with a filter-type byte and stores each byte
//! as a difference against its left (`a`), upper (`b`) and upper-left (`c`)
//! neighbors. Neighbors outside the image read as zero.

use serde::{Deserialize, Serialize};

use super::FormatError;

/// The five per-row filters defined by the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RowFilter {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl RowFilter {
    pub const ALL: [RowFilter; 5] = [
        RowFilter::None,
        RowFilter::Sub,
        RowFilter::Up,
        RowFilter::Average,
        RowFilter::Paeth,
    ];
}

impl TryFrom<u8> for RowFilter {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RowFilter::None),
            1 => Ok(RowFilter::Sub),
            2 => Ok(RowFilter::Up),
            3 => Ok(RowFilter::Average),
            4 => Ok(RowFilter::Paeth),
            other => Err(FormatError::ImageData(format!("unknown filter type {other}"))),
        }
    }
}

/// How a filter is chosen for each row of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterStrategy {
    /// The same filter on every row.
    Fixed(RowFilter),
    /// Per row, the filter with the smallest sum of absolute (signed) byte
    /// values.
    MinSum,
    /// Per row, the filter whose output has the lowest Shannon entropy.
    Entropy,
}

/// Paeth predictor.
#[inline]
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Filter `cur` into `out` (same length) given the previous row.
///
/// `prev` is `None` for the first row of an image or interlace pass.
pub fn filter_row(filter: RowFilter, stride: usize, prev: Option<&[u8]>, cur: &[u8], out: &mut [u8]) {
    debug_assert_eq!(cur.len(), out.len());
    let up = |i: usize| prev.map_or(0, |p| p[i]);
    match filter {
        RowFilter::None => out.copy_from_slice(cur),
        RowFilter::Sub => {
            for i in 0..cur.len() {
                let a = if i >= stride { cur[i - stride] } else { 0 };
                out[i] = cur[i].wrapping_sub(a);
            }
        }
        RowFilter::Up => {
            for i in 0..cur.len() {
                out[i] = cur[i].wrapping_sub(up(i));
            }
        }
        RowFilter::Average => {
            for i in 0..cur.len() {
                let a = if i >= stride { cur[i - stride] } else { 0 };
                let avg = ((u16::from(a) + u16::from(up(i))) / 2) as u8;
                out[i] = cur[i].wrapping_sub(avg);
            }
        }
        RowFilter::Paeth => {
            for i in 0..cur.len() {
                let (a, c) = if i >= stride {
                    (cur[i - stride], up(i - stride))
                } else {
                    (0, 0)
                };
                out[i] = cur[i].wrapping_sub(paeth(a, up(i), c));
            }
        }
    }
}

/// Reverse a filter in place: `row` holds filtered bytes on entry and
/// reconstructed bytes on return.
pub fn unfilter_row(filter: RowFilter, stride: usize, prev: Option<&[u8]>, row: &mut [u8]) {
    let up = |i: usize| prev.map_or(0, |p| p[i]);
    match filter {
        RowFilter::None => {}
        RowFilter::Sub => {
            for i in stride..row.len() {
                row[i] = row[i].wrapping_add(row[i - stride]);
            }
        }
        RowFilter::Up => {
            if prev.is_some() {
                for i in 0..row.len() {
                    row[i] = row[i].wrapping_add(up(i));
                }
            }
        }
        RowFilter::Average => {
            for i in 0..row.len() {
                let a = if i >= stride { row[i - stride] } else { 0 };
                let avg = ((u16::from(a) + u16::from(up(i))) / 2) as u8;
                row[i] = row[i].wrapping_add(avg);
            }
        }
        RowFilter::Paeth => {
            for i in 0..row.len() {
                let (a, c) = if i >= stride {
                    (row[i - stride], up(i - stride))
                } else {
                    (0, 0)
                };
                row[i] = row[i].wrapping_add(paeth(a, up(i), c));
            }
        }
    }
}

/// Filter a block of packed scanlines, producing the byte stream that gets
/// deflated: each row prefixed by its filter-type byte.
pub fn filter_rows(pixels: &[u8], row_bytes: usize, stride: usize, strategy: FilterStrategy) -> Vec<u8> {
    if row_bytes == 0 {
        return Vec::new();
    }
    let height = pixels.len() / row_bytes;
    let mut out = Vec::with_capacity(height * (row_bytes + 1));
    let mut scratch = vec![0u8; row_bytes];
    let mut trial = vec![0u8; row_bytes];
    let mut prev: Option<&[u8]> = None;

    for cur in pixels.chunks_exact(row_bytes) {
        let filter = match strategy {
            FilterStrategy::Fixed(f) => {
                filter_row(f, stride, prev, cur, &mut scratch);
                f
            }
            FilterStrategy::MinSum => pick_row(stride, prev, cur, &mut scratch, &mut trial, sum_abs),
            FilterStrategy::Entropy => pick_row(stride, prev, cur, &mut scratch, &mut trial, entropy),
        };
        out.push(filter as u8);
        out.extend_from_slice(&scratch);
        prev = Some(cur);
    }
    out
}

/// Try every filter on one row and leave the lowest-scoring result in `best`.
/// Ties keep the earlier filter.
fn pick_row<F>(
    stride: usize,
    prev: Option<&[u8]>,
    cur: &[u8],
    best: &mut [u8],
    trial: &mut [u8],
    score: F,
) -> RowFilter
where
    F: Fn(&[u8]) -> f64,
{
    let mut chosen = RowFilter::None;
    let mut best_score = f64::INFINITY;
    for filter in RowFilter::ALL {
        filter_row(filter, stride, prev, cur, trial);
        let s = score(trial);
        if s < best_score {
            best_score = s;
            chosen = filter;
            best.copy_from_slice(trial);
        }
    }
    chosen
}

/// Sum of absolute values, reading each byte as signed.
fn sum_abs(row: &[u8]) -> f64 {
    row.iter().map(|&b| u64::from((b as i8).unsigned_abs())).sum::<u64>() as f64
}

/// Shannon entropy of the row's byte histogram, scaled by length.
fn entropy(row: &[u8]) -> f64 {
    let mut counts = [0u32; 256];
    for &b in row {
        counts[b as usize] += 1;
    }
    let len = row.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = f64::from(c) / len;
            -p * p.log2() * len
        })
        .sum()
}

/// Reverse `filter_rows` for one image or interlace pass, returning the
/// packed scanlines.
pub fn unfilter_rows(filtered: &[u8], row_bytes: usize, height: usize, stride: usize) -> Result<Vec<u8>, FormatError> {
    let line = row_bytes + 1;
    if filtered.len() < line * height {
        return Err(FormatError::ImageData(format!(
            "expected {} filtered bytes, found {}",
            line * height,
            filtered.len()
        )));
    }

    let mut out = vec![0u8; row_bytes * height];
    for y in 0..height {
        let src = &filtered[y * line..(y + 1) * line];
        let filter = RowFilter::try_from(src[0])?;
        let (done, rest) = out.split_at_mut(y * row_bytes);
        let row = &mut rest[..row_bytes];
        row.copy_from_slice(&src[1..]);
        let prev = if y == 0 { None } else { Some(&done[(y - 1) * row_bytes..]) };
        unfilter_row(filter, stride, prev, row);
    }
    Ok(out)
}
