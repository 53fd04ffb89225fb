//! PNG container codec.
//!
//! Decoding turns a byte stream into a [`DecodedImage`]: unfiltered, packed
//! pixels plus the ancillary chunks that were present. Encoding goes the other
//! way, always producing a non-interlaced stream with freshly computed CRCs.

pub mod chunk;
mod decode;
mod encode;
pub mod filter;
mod interlace;
pub mod samples;
mod types;
pub mod zlib;

pub use chunk::{Chunk, ChunkPosition, ChunkType};
pub use decode::{decode, stored_image_data};
pub use encode::{encode, encoded_len, write_png, IDAT_CHUNK_SIZE};
pub use filter::{FilterStrategy, RowFilter};
pub use types::{BitDepth, ColorKey, ColorType, DecodedImage, EncodeError, FormatError, ImageLayout, PaletteEntry};
pub use zlib::{DeflateParams, DeflateStrategy};

/// The eight bytes every PNG stream starts with.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest width or height the format allows.
pub const MAX_DIMENSION: u32 = 0x7FFF_FFFF;
