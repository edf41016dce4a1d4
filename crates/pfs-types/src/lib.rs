#![forbid(unsafe_code)]
//! Shared value types for PebbleFS.
//!
//! Newtype wrappers for block numbers and metadata pairs, validated
//! filesystem geometry, little-endian read helpers, and the on-disk
//! constants shared by the codec and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Magic carried as the superblock NAME payload.
pub const MAGIC: &[u8; 8] = b"littlefs";

/// On-disk format version.
pub const DISK_VERSION_MAJOR: u16 = 2;
pub const DISK_VERSION_MINOR: u16 = 0;

/// Superblock defaults.
pub const NAME_LENGTH_MAX: u32 = 32;
pub const FILE_SIZE_MAX: u32 = 2_147_483_647;
pub const FILE_ATTRIBUTE_SIZE_MAX: u32 = 1022;

/// Index of a block on the underlying device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Narrow to the on-disk u32 pointer width.
    pub fn to_u32(self) -> Result<u32, ParseError> {
        u32::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "block_number",
        })
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered pair of blocks holding alternating revisions of one logical
/// metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPair(pub BlockNumber, pub BlockNumber);

impl BlockPair {
    /// The root metadata pair.
    pub const ROOT: Self = Self(BlockNumber(0), BlockNumber(1));

    #[must_use]
    pub fn new(a: u64, b: u64) -> Self {
        Self(BlockNumber(a), BlockNumber(b))
    }

    #[must_use]
    pub fn blocks(self) -> [BlockNumber; 2] {
        [self.0, self.1]
    }
}

impl fmt::Display for BlockPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// Validated filesystem geometry.
///
/// `block_size` and `program_block_size` must be powers of two, the program
/// block must divide the block, and the device must hold at least the root
/// pair. Block numbers must fit the on-disk u32 pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    block_size: u32,
    program_block_size: u32,
    block_count: u64,
}

impl Geometry {
    pub fn new(block_size: u32, program_block_size: u32, block_count: u64) -> Result<Self, ParseError> {
        if !block_size.is_power_of_two() || block_size < 128 {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a power of two >= 128",
            });
        }
        // The commit CRC tag stores 4 + padding in its 10-bit length
        // field, so the program block cannot exceed 512 bytes.
        if !program_block_size.is_power_of_two()
            || !(8..=512).contains(&program_block_size)
        {
            return Err(ParseError::InvalidField {
                field: "program_block_size",
                reason: "must be a power of two in 8..=512",
            });
        }
        if block_size % program_block_size != 0 {
            return Err(ParseError::InvalidField {
                field: "program_block_size",
                reason: "must divide block_size",
            });
        }
        if block_count < 2 {
            return Err(ParseError::InvalidField {
                field: "block_count",
                reason: "device must hold at least the root pair",
            });
        }
        if block_count > u64::from(u32::MAX) {
            return Err(ParseError::InvalidField {
                field: "block_count",
                reason: "block numbers must fit 32 bits on disk",
            });
        }
        Ok(Self {
            block_size,
            program_block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn block_size(self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn program_block_size(self) -> u32 {
        self.program_block_size
    }

    #[must_use]
    pub fn block_count(self) -> u64 {
        self.block_count
    }

    /// Byte offset of a block, `None` if the block is out of range.
    #[must_use]
    pub fn block_offset(self, block: BlockNumber) -> Option<u64> {
        if block.0 >= self.block_count {
            return None;
        }
        block.0.checked_mul(u64::from(self.block_size))
    }

    /// Largest value stored inline in a directory entry; beyond this the
    /// file spills into a CTZ skip list.
    #[must_use]
    pub fn inline_max(self) -> usize {
        (self.block_size / 4) as usize
    }
}

/// Failure while decoding on-disk bytes. Pure codec errors; the I/O layer
/// wraps these with the block number they were found on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid tag: {reason}")]
    InvalidTag { reason: &'static str },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("commit checksum mismatch at offset {offset}")]
    CrcMismatch { offset: usize },
    #[error("no valid commit in metadata block")]
    NoCommit,
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Revision counts compare as wrapping signed 32-bit values, so a counter
/// that rolls over still orders correctly against its predecessor.
#[must_use]
#[allow(clippy::cast_possible_wrap)] // the wrap is the point
pub fn revision_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_helpers() {
        let bytes = [0x34_u8, 0x12, 0x78, 0x56, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(read_le_u16(&bytes, 0).expect("u16"), 0x1234);
        assert_eq!(read_le_u32(&bytes, 0).expect("u32"), 0x5678_1234);
        assert_eq!(read_le_u64(&bytes, 0).expect("u64"), 0x90AB_CDEF_5678_1234);
        assert_eq!(read_be_u32(&bytes, 0).expect("be u32"), 0x3412_7856);
        assert!(read_le_u32(&bytes, 6).is_err());
    }

    #[test]
    fn geometry_validation() {
        assert!(Geometry::new(4096, 16, 16).is_ok());
        assert!(Geometry::new(4096, 512, 2).is_ok());
        // not a power of two
        assert!(Geometry::new(3000, 16, 16).is_err());
        // program block larger than block
        assert!(Geometry::new(128, 256, 16).is_err());
        // program block too large for the CRC tag length field
        assert!(Geometry::new(4096, 1024, 16).is_err());
        // too few blocks for the root pair
        assert!(Geometry::new(4096, 16, 1).is_err());
        // block numbers must fit u32
        assert!(Geometry::new(4096, 16, u64::from(u32::MAX) + 1).is_err());
    }

    #[test]
    fn geometry_offsets() {
        let g = Geometry::new(4096, 16, 16).expect("geometry");
        assert_eq!(g.block_offset(BlockNumber(0)), Some(0));
        assert_eq!(g.block_offset(BlockNumber(3)), Some(12288));
        assert_eq!(g.block_offset(BlockNumber(16)), None);
        assert_eq!(g.inline_max(), 1024);
    }

    #[test]
    fn revision_signed_compare() {
        assert!(revision_newer(2, 1));
        assert!(!revision_newer(1, 2));
        assert!(!revision_newer(7, 7));
        // wraparound: 0 is newer than u32::MAX
        assert!(revision_newer(0, u32::MAX));
        assert!(!revision_newer(u32::MAX, 0));
    }

    #[test]
    fn block_number_narrowing() {
        assert_eq!(BlockNumber(7).to_u32(), Ok(7));
        assert!(BlockNumber(u64::from(u32::MAX) + 1).to_u32().is_err());
    }
}
