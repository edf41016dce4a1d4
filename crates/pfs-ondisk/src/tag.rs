//! 32-bit on-disk tag codec.
//!
//! Tags are stored big-endian, XOR-masked against the raw value of the
//! preceding tag in the commit (all-ones for the first tag of a block).
//! Bit layout of the unmasked value:
//!
//! ```text
//! bit  31     valid (0 = valid)
//! bits 30..28 abstract type
//! bits 27..20 chunk
//! bits 19..10 id
//! bits  9..0  payload length
//! ```

use pfs_types::ParseError;
use serde::{Deserialize, Serialize};

/// Sentinel id used by tags that do not address a directory entry
/// (commit CRCs, hardtails).
pub const NO_ID: u16 = 0x3FF;

/// NAME chunks.
pub const NAME_FILE: u8 = 0x01;
pub const NAME_DIR: u8 = 0x02;
pub const NAME_SUPERBLOCK: u8 = 0xFF;

/// STRUCT chunks.
pub const STRUCT_DIR: u8 = 0x00;
pub const STRUCT_INLINE: u8 = 0x01;
pub const STRUCT_CTZ: u8 = 0x02;

/// USERATTR chunk carrying a creation timestamp.
pub const USERATTR_CTIME: u8 = 0x74;

/// SPLICE chunk marking an id as removed.
pub const SPLICE_DELETE: u8 = 0xFF;

/// TAIL chunk linking to the next metadata pair.
pub const TAIL_HARD: u8 = 0x01;

/// Three-bit abstract tag type. Value 1 is reserved and never valid on
/// disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbstractType {
    Name = 0,
    Struct = 2,
    UserAttr = 3,
    Splice = 4,
    Crc = 5,
    Tail = 6,
    Gstate = 7,
}

impl AbstractType {
    pub fn from_bits(bits: u32) -> Result<Self, ParseError> {
        match bits {
            0 => Ok(Self::Name),
            2 => Ok(Self::Struct),
            3 => Ok(Self::UserAttr),
            4 => Ok(Self::Splice),
            5 => Ok(Self::Crc),
            6 => Ok(Self::Tail),
            7 => Ok(Self::Gstate),
            _ => Err(ParseError::InvalidTag {
                reason: "abstract type 0x1 is reserved",
            }),
        }
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// A decoded tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub valid: bool,
    pub abstract_type: AbstractType,
    pub chunk: u8,
    pub id: u16,
    pub length: u16,
}

impl Tag {
    #[must_use]
    pub fn new(abstract_type: AbstractType, chunk: u8, id: u16, length: u16) -> Self {
        Self {
            valid: true,
            abstract_type,
            chunk,
            id,
            length,
        }
    }

    /// Unpack an unmasked 32-bit tag value.
    pub fn parse(raw: u32) -> Result<Self, ParseError> {
        let abstract_type = AbstractType::from_bits((raw >> 28) & 0x7)?;
        #[allow(clippy::cast_possible_truncation)] // masked to 8/10 bits
        Ok(Self {
            valid: raw & 0x8000_0000 == 0,
            abstract_type,
            chunk: ((raw >> 20) & 0xFF) as u8,
            id: ((raw >> 10) & 0x3FF) as u16,
            length: (raw & 0x3FF) as u16,
        })
    }

    /// Pack into the unmasked 32-bit representation.
    #[must_use]
    pub fn bits(self) -> u32 {
        let valid = if self.valid { 0 } else { 0x8000_0000 };
        valid
            | (self.abstract_type.bits() << 28)
            | (u32::from(self.chunk) << 20)
            | (u32::from(self.id & 0x3FF) << 10)
            | u32::from(self.length & 0x3FF)
    }

    /// Pack and apply the XOR mask of the preceding tag. Inverse of
    /// `parse(emitted ^ mask)`.
    #[must_use]
    pub fn emit(self, xor_mask: u32) -> u32 {
        self.bits() ^ xor_mask
    }

    #[must_use]
    pub fn is_crc(self) -> bool {
        self.abstract_type == AbstractType::Crc
    }

    #[must_use]
    pub fn is_name(self) -> bool {
        self.abstract_type == AbstractType::Name
    }

    #[must_use]
    pub fn is_struct(self, chunk: u8) -> bool {
        self.abstract_type == AbstractType::Struct && self.chunk == chunk
    }

    #[must_use]
    pub fn is_delete(self) -> bool {
        self.abstract_type == AbstractType::Splice && self.chunk == SPLICE_DELETE
    }

    #[must_use]
    pub fn is_hardtail(self) -> bool {
        self.abstract_type == AbstractType::Tail && self.chunk == TAIL_HARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_under_mask() {
        let tags = [
            Tag::new(AbstractType::Name, NAME_SUPERBLOCK, 0, 8),
            Tag::new(AbstractType::Struct, STRUCT_INLINE, 5, 24),
            Tag::new(AbstractType::Splice, SPLICE_DELETE, 0x3FE, 0),
            Tag::new(AbstractType::Tail, TAIL_HARD, NO_ID, 8),
            Tag::new(AbstractType::Crc, 0x00, NO_ID, 16),
        ];
        let masks = [0_u32, 0xFFFF_FFFF, 0x2010_0018, 0xDEAD_BEEF];
        for tag in tags {
            for mask in masks {
                let on_disk = tag.emit(mask);
                let back = Tag::parse(on_disk ^ mask).expect("parse");
                assert_eq!(back, tag);
            }
        }
    }

    #[test]
    fn all_ones_tag_under_all_ones_mask_is_zero() {
        let tag = Tag {
            valid: false,
            abstract_type: AbstractType::Gstate,
            chunk: 0xFF,
            id: 0x3FF,
            length: 0x3FF,
        };
        assert_eq!(tag.bits(), 0xFFFF_FFFF);
        assert_eq!(tag.emit(0xFFFF_FFFF), 0);
    }

    #[test]
    fn abstract_type_one_rejected() {
        // every value whose abstract-type field decodes to 1
        for low in [0_u32, 0x000F_FC00, 0x0FF0_0008, 0x0000_03FF] {
            let raw = 0x1000_0000 | low;
            assert!(Tag::parse(raw).is_err());
            assert!(Tag::parse(raw | 0x8000_0000).is_err());
        }
    }

    #[test]
    fn invalid_bit_survives_parse() {
        let tag = Tag::new(AbstractType::Name, NAME_FILE, 1, 4);
        let raw = tag.bits() | 0x8000_0000;
        let parsed = Tag::parse(raw).expect("parse");
        assert!(!parsed.valid);
        assert_eq!(parsed.id, 1);
    }

    #[test]
    fn identity_predicates() {
        assert!(Tag::new(AbstractType::Crc, 0, NO_ID, 4).is_crc());
        assert!(Tag::new(AbstractType::Tail, TAIL_HARD, NO_ID, 8).is_hardtail());
        assert!(!Tag::new(AbstractType::Tail, 0x00, NO_ID, 8).is_hardtail());
        assert!(Tag::new(AbstractType::Splice, SPLICE_DELETE, 2, 0).is_delete());
        assert!(Tag::new(AbstractType::Struct, STRUCT_CTZ, 2, 8).is_struct(STRUCT_CTZ));
        assert!(!Tag::new(AbstractType::Struct, STRUCT_CTZ, 2, 8).is_struct(STRUCT_INLINE));
    }
}
