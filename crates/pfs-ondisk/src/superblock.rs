//! Superblock payload carried by the root pair's inline STRUCT entry.

use pfs_types::{
    read_le_u16, read_le_u32, Geometry, ParseError, DISK_VERSION_MAJOR, DISK_VERSION_MINOR,
    FILE_ATTRIBUTE_SIZE_MAX, FILE_SIZE_MAX, NAME_LENGTH_MAX,
};
use serde::{Deserialize, Serialize};

/// Serialized size of the superblock payload.
pub const SUPERBLOCK_LEN: usize = 24;

/// Filesystem parameters stored inline on the root pair.
///
/// All fields little-endian: `version_minor u16 | version_major u16 |
/// block_size u32 | block_count u32 | name_length_max u32 |
/// file_size_max u32 | file_attribute_size_max u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub version_minor: u16,
    pub version_major: u16,
    pub block_size: u32,
    pub block_count: u32,
    pub name_length_max: u32,
    pub file_size_max: u32,
    pub file_attribute_size_max: u32,
}

impl Superblock {
    /// Superblock describing a freshly formatted device.
    pub fn for_geometry(geometry: Geometry) -> Result<Self, ParseError> {
        let block_count =
            u32::try_from(geometry.block_count()).map_err(|_| ParseError::IntegerConversion {
                field: "block_count",
            })?;
        Ok(Self {
            version_minor: DISK_VERSION_MINOR,
            version_major: DISK_VERSION_MAJOR,
            block_size: geometry.block_size(),
            block_count,
            name_length_max: NAME_LENGTH_MAX,
            file_size_max: FILE_SIZE_MAX,
            file_attribute_size_max: FILE_ATTRIBUTE_SIZE_MAX,
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < SUPERBLOCK_LEN {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_LEN,
                offset: 0,
                actual: data.len(),
            });
        }
        let sb = Self {
            version_minor: read_le_u16(data, 0)?,
            version_major: read_le_u16(data, 2)?,
            block_size: read_le_u32(data, 4)?,
            block_count: read_le_u32(data, 8)?,
            name_length_max: read_le_u32(data, 12)?,
            file_size_max: read_le_u32(data, 16)?,
            file_attribute_size_max: read_le_u32(data, 20)?,
        };
        if sb.block_size == 0 || !sb.block_size.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a power of two",
            });
        }
        Ok(sb)
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; SUPERBLOCK_LEN] {
        let mut out = [0_u8; SUPERBLOCK_LEN];
        out[0..2].copy_from_slice(&self.version_minor.to_le_bytes());
        out[2..4].copy_from_slice(&self.version_major.to_le_bytes());
        out[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.block_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.name_length_max.to_le_bytes());
        out[16..20].copy_from_slice(&self.file_size_max.to_le_bytes());
        out[20..24].copy_from_slice(&self.file_attribute_size_max.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let geometry = Geometry::new(4096, 16, 16).expect("geometry");
        let sb = Superblock::for_geometry(geometry).expect("superblock");
        let bytes = sb.to_bytes();
        assert_eq!(Superblock::parse(&bytes).expect("parse"), sb);
    }

    #[test]
    fn reference_layout() {
        let geometry = Geometry::new(4096, 16, 16).expect("geometry");
        let sb = Superblock::for_geometry(geometry).expect("superblock");
        let bytes = sb.to_bytes();
        // version (2, 0)
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x02, 0x00]);
        // block_size 4096, block_count 16
        assert_eq!(&bytes[4..8], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[8..12], &[0x10, 0x00, 0x00, 0x00]);
        // name_length_max 32, file_size_max 0x7FFFFFFF, attr max 1022
        assert_eq!(&bytes[12..16], &[0x20, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[16..20], &[0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(&bytes[20..24], &[0xFE, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn rejects_bad_block_size() {
        let geometry = Geometry::new(4096, 16, 16).expect("geometry");
        let mut bytes = Superblock::for_geometry(geometry).expect("superblock").to_bytes();
        bytes[4..8].copy_from_slice(&3000_u32.to_le_bytes());
        assert!(Superblock::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_short_input() {
        assert!(Superblock::parse(&[0_u8; 10]).is_err());
    }
}
