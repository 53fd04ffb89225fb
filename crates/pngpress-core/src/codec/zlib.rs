//! zlib stream handling for IDAT data, backed by `miniz_oxide`.

use miniz_oxide::deflate::core::{
    compress_to_output, create_comp_flags_from_zip_params, CompressorOxide, TDEFLFlush, TDEFLStatus,
};
use miniz_oxide::inflate::{decompress_to_vec_zlib_with_limit, TINFLStatus};
use serde::{Deserialize, Serialize};

use super::{EncodeError, FormatError};

/// Window size exponent for every stream we write (32 KiB, zlib header).
const WINDOW_BITS: i32 = 15;

/// Highest level `miniz_oxide` understands.
pub const MAX_LEVEL: u8 = 10;

/// Match-finding strategy handed to the compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeflateStrategy {
    Default,
    /// Favors Huffman coding over short matches; suits filtered image data.
    Filtered,
    /// Run-length matches only.
    Rle,
}

impl DeflateStrategy {
    /// The zlib strategy constant.
    fn code(self) -> i32 {
        match self {
            DeflateStrategy::Default => 0,
            DeflateStrategy::Filtered => 1,
            DeflateStrategy::Rle => 3,
        }
    }
}

/// One set of compressor parameters tried by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeflateParams {
    /// Effort, 0 (store) to 10.
    pub level: u8,
    pub strategy: DeflateStrategy,
}

impl DeflateParams {
    pub const fn new(level: u8, strategy: DeflateStrategy) -> Self {
        Self { level, strategy }
    }
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self::new(6, DeflateStrategy::Default)
    }
}

/// Compress `data` into a complete zlib stream.
pub fn deflate(data: &[u8], params: DeflateParams) -> Result<Vec<u8>, EncodeError> {
    let level = i32::from(params.level.min(MAX_LEVEL));
    let flags = create_comp_flags_from_zip_params(level, WINDOW_BITS, params.strategy.code());
    let mut compressor = CompressorOxide::new(flags);

    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    let (status, consumed) = compress_to_output(&mut compressor, data, TDEFLFlush::Finish, |chunk| {
        out.extend_from_slice(chunk);
        true
    });

    match status {
        TDEFLStatus::Done if consumed == data.len() => Ok(out),
        other => Err(EncodeError::Deflate(format!(
            "{other:?} after {consumed} of {} bytes",
            data.len()
        ))),
    }
}

/// Inflate a zlib stream that should expand to exactly `expected` bytes.
///
/// One byte of slack is allowed past `expected` so a stream that ends exactly
/// on the limit is not mistaken for an overrun; anything beyond that is an
/// error. Excess output within the slack is truncated.
pub fn inflate(data: &[u8], expected: usize) -> Result<Vec<u8>, FormatError> {
    let mut out = decompress_to_vec_zlib_with_limit(data, expected.saturating_add(1))
        .map_err(|e| FormatError::Decompress(format!("{:?}", e.status)))?;

    if out.len() < expected {
        return Err(FormatError::ImageData(format!(
            "expected {expected} inflated bytes, found {}",
            out.len()
        )));
    }
    out.truncate(expected);
    Ok(out)
}

/// Inflate at most the first `limit` bytes of a zlib stream.
///
/// Streams that run past `limit` are cut short rather than rejected.
pub fn inflate_prefix(data: &[u8], limit: usize) -> Result<Vec<u8>, FormatError> {
    match decompress_to_vec_zlib_with_limit(data, limit) {
        Ok(out) => Ok(out),
        Err(e) if e.status == TINFLStatus::HasMoreOutput => {
            let mut out = e.output;
            out.truncate(limit);
            Ok(out)
        }
        Err(e) => Err(FormatError::Decompress(format!("{:?}", e.status))),
    }
}
