//! PNG chunk framing: reading, writing, and classification.
//!
//! Every chunk is a 4-byte big-endian payload length, a 4-byte type code, the
//! payload, and a CRC-32 over type and payload. CRCs are checked on read and
//! always recomputed on write.

use std::fmt;

use tracing::trace;

use super::FormatError;

/// Largest payload length the format allows (2^31 - 1).
pub const MAX_CHUNK_LEN: usize = 0x7FFF_FFFF;

/// A four-letter chunk type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    pub const PLTE: ChunkType = ChunkType(*b"PLTE");
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    pub const IEND: ChunkType = ChunkType(*b"IEND");
    pub const TRNS: ChunkType = ChunkType(*b"tRNS");
    pub const ICCP: ChunkType = ChunkType(*b"iCCP");
    pub const SRGB: ChunkType = ChunkType(*b"sRGB");

    /// Ancillary chunks that change how pixels render or animate. These
    /// survive `strip=safe`.
    pub const RENDERING: [ChunkType; 11] = [
        ChunkType(*b"cICP"),
        ChunkType(*b"iCCP"),
        ChunkType(*b"sRGB"),
        ChunkType(*b"gAMA"),
        ChunkType(*b"cHRM"),
        ChunkType(*b"mDCv"),
        ChunkType(*b"cLLI"),
        ChunkType(*b"pHYs"),
        ChunkType(*b"acTL"),
        ChunkType(*b"fcTL"),
        ChunkType(*b"fdAT"),
    ];

    /// Known ancillary chunks whose payload is encoded against the image's
    /// color type, bit depth, palette, or dimensions.
    const LAYOUT_BOUND: [ChunkType; 6] = [
        ChunkType(*b"bKGD"),
        ChunkType(*b"sBIT"),
        ChunkType(*b"hIST"),
        ChunkType(*b"acTL"),
        ChunkType(*b"fcTL"),
        ChunkType(*b"fdAT"),
    ];

    /// Known ancillary chunks that stay valid however the pixels are
    /// re-encoded.
    const LAYOUT_FREE: [ChunkType; 14] = [
        ChunkType(*b"cICP"),
        ChunkType(*b"iCCP"),
        ChunkType(*b"sRGB"),
        ChunkType(*b"gAMA"),
        ChunkType(*b"cHRM"),
        ChunkType(*b"mDCv"),
        ChunkType(*b"cLLI"),
        ChunkType(*b"pHYs"),
        ChunkType(*b"sPLT"),
        ChunkType(*b"tEXt"),
        ChunkType(*b"zTXt"),
        ChunkType(*b"iTXt"),
        ChunkType(*b"tIME"),
        ChunkType(*b"eXIf"),
    ];

    /// Parse a type code, rejecting anything but ASCII letters.
    pub fn new(bytes: [u8; 4]) -> Result<Self, FormatError> {
        if bytes.iter().all(u8::is_ascii_alphabetic) {
            Ok(ChunkType(bytes))
        } else {
            Err(FormatError::ChunkType(bytes))
        }
    }

    /// Critical chunks have an uppercase first letter.
    #[inline]
    pub fn is_critical(self) -> bool {
        self.0[0] & 0x20 == 0
    }

    /// Safe-to-copy chunks have a lowercase fourth letter.
    #[inline]
    pub fn is_safe_to_copy(self) -> bool {
        self.0[3] & 0x20 != 0
    }

    /// Whether the chunk's payload depends on the pixel layout.
    ///
    /// Known chunks are classified explicitly; unknown ones follow the
    /// safe-to-copy bit.
    pub fn is_layout_bound(self) -> bool {
        if Self::LAYOUT_BOUND.contains(&self) {
            true
        } else if Self::LAYOUT_FREE.contains(&self) {
            false
        } else {
            !self.is_safe_to_copy()
        }
    }

    /// Whether the chunk alters rendering or animation.
    pub fn affects_rendering(self) -> bool {
        Self::RENDERING.contains(&self)
    }

    /// The type code as text.
    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII letters.
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Where an ancillary chunk sat relative to the critical chunks.
///
/// The encoder re-emits each chunk in the same slot, which keeps ordering
/// rules such as "gAMA before PLTE" and "bKGD after PLTE" intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkPosition {
    /// After IHDR, before PLTE.
    BeforePalette,
    /// After PLTE (if any), before the first IDAT.
    BeforeData,
    /// After the last IDAT, before IEND.
    AfterData,
}

/// An ancillary chunk retained from the input.
///
/// No CRC is stored: it is recomputed whenever the chunk is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkType,
    pub data: Vec<u8>,
    pub position: ChunkPosition,
}

impl Chunk {
    pub fn new(kind: ChunkType, data: Vec<u8>, position: ChunkPosition) -> Self {
        Self {
            kind,
            data,
            position,
        }
    }

    /// Bytes this chunk occupies once framed.
    #[inline]
    pub fn framed_len(&self) -> usize {
        framed_len(self.data.len())
    }
}

/// A borrowed view of one chunk inside the input buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawChunk<'a> {
    pub kind: ChunkType,
    pub data: &'a [u8],
}

/// Iterator over the chunks following the signature.
///
/// Yields an error (and then stops) on the first framing problem.
pub struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_chunk(&mut self) -> Result<RawChunk<'a>, FormatError> {
        let rest = &self.buf[self.pos..];
        if rest.len() < 8 {
            return Err(FormatError::Truncated {
                chunk: "chunk header".to_string(),
                declared: 8,
                available: rest.len(),
            });
        }

        let len = read_u32(&rest[..4]) as usize;
        let kind = ChunkType::new([rest[4], rest[5], rest[6], rest[7]])?;
        let available = rest.len() - 8;
        if len > MAX_CHUNK_LEN || available < len + 4 {
            return Err(FormatError::Truncated {
                chunk: kind.to_string(),
                declared: len,
                available: available.saturating_sub(4),
            });
        }

        let data = &rest[8..8 + len];
        let expected = read_u32(&rest[8 + len..12 + len]);
        let actual = chunk_crc(kind, data);
        if expected != actual {
            return Err(FormatError::Crc {
                chunk: kind.to_string(),
                expected,
                actual,
            });
        }

        self.pos += 12 + len;
        trace!("chunk {} ({} bytes)", kind, len);
        Ok(RawChunk { kind, data })
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Result<RawChunk<'a>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let res = self.read_chunk();
        if res.is_err() {
            self.failed = true;
        }
        Some(res)
    }
}

/// CRC-32 over a chunk's type and payload.
pub fn chunk_crc(kind: ChunkType, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&kind.0);
    hasher.update(data);
    hasher.finalize()
}

/// Append one framed chunk to `out`, computing a fresh CRC.
pub fn write_chunk(out: &mut Vec<u8>, kind: ChunkType, data: &[u8]) {
    debug_assert!(data.len() <= MAX_CHUNK_LEN);
    out.reserve(framed_len(data.len()));
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&kind.0);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(kind, data).to_be_bytes());
}

/// Bytes a chunk with a `payload`-byte body occupies once framed.
#[inline]
pub const fn framed_len(payload: usize) -> usize {
    payload + 12
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
