//! Binary serialization and deserialization for [`VolumeChunk`].
//!
//! The AXVC (Axon Volume Chunk) format is a compact, versioned binary format
//! for chunk files in the chunk store. Sample arrays are LZ4-compressed.
//!
//! ## Binary Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `[0x41, 0x58, 0x56, 0x43]` ("AXVC") |
//! | 4 | 1 | Format version (`u8`, currently 1) |
//! | 5 | 1 | Flags (bit 0: labels identical to data, label section omitted) |
//! | 6 | 12 | Dimensions (3 × `u32`, little-endian) |
//! | 18 | 4 | Data section length `N` (`u32`, little-endian) |
//! | 22 | N | LZ4 block of data samples (`u32` LE each, size-prepended) |
//! | 22+N | 4 | Label section length `M` (absent when flag bit 0 is set) |
//! | 26+N | M | LZ4 block of label samples |

use crate::chunk::VolumeChunk;
use crate::error::VolumeError;
use crate::volume::{Volume, sample_count};

/// Magic bytes identifying the AXVC format.
const MAGIC: [u8; 4] = [0x41, 0x58, 0x56, 0x43];

/// Current format version.
const FORMAT_VERSION: u8 = 1;

/// Flag bit: the label array equals the data array and is stored once.
const FLAG_SHARED_LABELS: u8 = 0b0000_0001;

/// Size of the fixed header before the first section.
const HEADER_LEN: usize = 18;

/// An LZ4 block never expands by more than this factor.
const MAX_LZ4_RATIO: usize = 255;

/// Errors that can occur during chunk deserialization.
#[derive(Debug, thiserror::Error)]
pub enum ChunkSerError {
    /// The data does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    /// The data is shorter than expected.
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// An LZ4 section failed to decompress.
    #[error("corrupt sample section: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    /// A section decompressed to the wrong number of samples.
    #[error("section holds {actual} bytes, expected {expected}")]
    SectionSize {
        /// Bytes implied by the header dimensions.
        expected: usize,
        /// Bytes actually decompressed.
        actual: usize,
    },
    /// The header makes claims no section of this file could satisfy.
    #[error("corrupt chunk: {0}")]
    Corrupt(String),
    /// The decoded arrays do not form a valid chunk.
    #[error(transparent)]
    Volume(#[from] VolumeError),
}

impl VolumeChunk {
    /// Serializes this chunk to a byte vector in the AXVC format.
    pub fn serialize(&self) -> Vec<u8> {
        let shared = self.data_matches_labels();
        let data_section = compress_samples(self.data().samples());

        let mut buf = Vec::with_capacity(HEADER_LEN + 4 + data_section.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);
        buf.push(if shared { FLAG_SHARED_LABELS } else { 0 });
        for d in self.dims() {
            buf.extend_from_slice(&(d as u32).to_le_bytes());
        }

        buf.extend_from_slice(&(data_section.len() as u32).to_le_bytes());
        buf.extend_from_slice(&data_section);

        if !shared {
            let label_section = compress_samples(self.labels().samples());
            buf.extend_from_slice(&(label_section.len() as u32).to_le_bytes());
            buf.extend_from_slice(&label_section);
        }

        buf
    }

    /// Deserializes a chunk from a byte slice in the AXVC format.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ChunkSerError> {
        if bytes.len() < 4 || bytes[0..4] != MAGIC {
            return Err(ChunkSerError::InvalidMagic);
        }
        if bytes.len() < HEADER_LEN {
            return Err(ChunkSerError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let version = bytes[4];
        if version != FORMAT_VERSION {
            return Err(ChunkSerError::UnsupportedVersion(version));
        }
        let flags = bytes[5];
        let dims = [
            read_u32(bytes, 6) as usize,
            read_u32(bytes, 10) as usize,
            read_u32(bytes, 14) as usize,
        ];
        let expected_bytes = sample_count(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| ChunkSerError::Corrupt(format!("dimensions {dims:?} overflow")))?;

        let (data, offset) = read_section(bytes, HEADER_LEN, expected_bytes)?;
        let data = to_volume(dims, data)?;

        if flags & FLAG_SHARED_LABELS != 0 {
            return Ok(VolumeChunk::from_labels(data));
        }

        let (labels, _) = read_section(bytes, offset, expected_bytes)?;
        let labels = to_volume(dims, labels)?;
        Ok(VolumeChunk::new(data, labels)?)
    }
}

fn compress_samples(samples: &[u32]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        raw.extend_from_slice(&s.to_le_bytes());
    }
    lz4_flex::compress_prepend_size(&raw)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Reads one length-prefixed LZ4 section starting at `offset`.
///
/// The size prefix of the LZ4 block is checked against `expected_bytes`
/// before anything is allocated. Returns the decompressed bytes and the
/// offset just past the section.
fn read_section(
    bytes: &[u8],
    offset: usize,
    expected_bytes: usize,
) -> Result<(Vec<u8>, usize), ChunkSerError> {
    if bytes.len() < offset + 4 {
        return Err(ChunkSerError::Truncated {
            expected: offset + 4,
            actual: bytes.len(),
        });
    }
    let len = read_u32(bytes, offset) as usize;
    let start = offset + 4;
    let end = start + len;
    if bytes.len() < end {
        return Err(ChunkSerError::Truncated {
            expected: end,
            actual: bytes.len(),
        });
    }
    let block = &bytes[start..end];
    if block.len() < 4 {
        return Err(ChunkSerError::Truncated {
            expected: start + 4,
            actual: end,
        });
    }
    if expected_bytes > block.len().saturating_mul(MAX_LZ4_RATIO) {
        return Err(ChunkSerError::Corrupt(format!(
            "{expected_bytes} sample bytes cannot come from a {}-byte section",
            block.len()
        )));
    }
    let claimed = read_u32(block, 0) as usize;
    if claimed != expected_bytes {
        return Err(ChunkSerError::SectionSize {
            expected: expected_bytes,
            actual: claimed,
        });
    }
    let raw = lz4_flex::decompress_size_prepended(block)?;
    if raw.len() != expected_bytes {
        return Err(ChunkSerError::SectionSize {
            expected: expected_bytes,
            actual: raw.len(),
        });
    }
    Ok((raw, end))
}

fn to_volume(dims: [usize; 3], raw: Vec<u8>) -> Result<Volume<u32>, VolumeError> {
    let samples: Vec<u32> = raw
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Volume::from_vec(dims, samples)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
