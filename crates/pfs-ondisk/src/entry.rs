//! Typed metadata entries and their compaction rules.
//!
//! An entry is a `(Tag, payload)` pair. Constructors cover every entry
//! kind the engine writes; accessors decode the structural payloads
//! (directory pairs, CTZ headers, hardtails) without touching the device.

use crate::tag::{self, AbstractType, Tag};
use pfs_types::{read_le_u32, BlockNumber, BlockPair, ParseError, MAGIC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub tag: Tag,
    pub data: Vec<u8>,
}

impl Entry {
    #[must_use]
    pub fn new(tag: Tag, data: Vec<u8>) -> Self {
        Self { tag, data }
    }

    /// NAME entry binding `id` to a file name.
    #[must_use]
    pub fn file_name(id: u16, name: &[u8]) -> Self {
        #[allow(clippy::cast_possible_truncation)] // names are bounded well below 0x3FF
        let length = name.len() as u16;
        Self::new(
            Tag::new(AbstractType::Name, tag::NAME_FILE, id, length),
            name.to_vec(),
        )
    }

    /// NAME entry binding `id` to a subdirectory name.
    #[must_use]
    pub fn dir_name(id: u16, name: &[u8]) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let length = name.len() as u16;
        Self::new(
            Tag::new(AbstractType::Name, tag::NAME_DIR, id, length),
            name.to_vec(),
        )
    }

    /// The root superblock NAME entry carrying the magic.
    #[must_use]
    pub fn superblock_name() -> Self {
        Self::new(
            Tag::new(AbstractType::Name, tag::NAME_SUPERBLOCK, 0, 8),
            MAGIC.to_vec(),
        )
    }

    /// Inline STRUCT entry holding the value bytes directly.
    #[must_use]
    pub fn inline_struct(id: u16, data: Vec<u8>) -> Self {
        #[allow(clippy::cast_possible_truncation)] // inline values are < block_size/4
        let length = data.len() as u16;
        Self::new(
            Tag::new(AbstractType::Struct, tag::STRUCT_INLINE, id, length),
            data,
        )
    }

    /// CTZ STRUCT entry: head pointer of the skip list and file length.
    pub fn ctz_struct(id: u16, head: BlockNumber, file_length: u32) -> Result<Self, ParseError> {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&head.to_u32()?.to_le_bytes());
        data.extend_from_slice(&file_length.to_le_bytes());
        Ok(Self::new(
            Tag::new(AbstractType::Struct, tag::STRUCT_CTZ, id, 8),
            data,
        ))
    }

    /// Directory STRUCT entry pointing at the child's metadata pair.
    pub fn dir_struct(id: u16, pair: BlockPair) -> Result<Self, ParseError> {
        Ok(Self::new(
            Tag::new(AbstractType::Struct, tag::STRUCT_DIR, id, 8),
            pair_payload(pair)?,
        ))
    }

    /// Hardtail entry linking this metadata pair to its successor.
    pub fn hardtail(pair: BlockPair) -> Result<Self, ParseError> {
        Ok(Self::new(
            Tag::new(AbstractType::Tail, tag::TAIL_HARD, tag::NO_ID, 8),
            pair_payload(pair)?,
        ))
    }

    /// Creation-time user attribute: days since epoch and picoseconds
    /// within the day.
    #[must_use]
    pub fn ctime(id: u16, days: u32, picoseconds: u64) -> Self {
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&days.to_le_bytes());
        data.extend_from_slice(&picoseconds.to_le_bytes());
        Self::new(
            Tag::new(AbstractType::UserAttr, tag::USERATTR_CTIME, id, 12),
            data,
        )
    }

    /// SPLICE tombstone removing `id`.
    #[must_use]
    pub fn delete(id: u16) -> Self {
        Self::new(
            Tag::new(AbstractType::Splice, tag::SPLICE_DELETE, id, 0),
            Vec::new(),
        )
    }

    /// Serialized size: 4 tag bytes plus the payload.
    #[must_use]
    #[allow(clippy::len_without_is_empty)] // the tag alone is 4 bytes
    pub fn len(&self) -> usize {
        4 + self.data.len()
    }

    /// Decode a blockpair payload (dir struct or hardtail).
    pub fn as_pair(&self) -> Result<BlockPair, ParseError> {
        let a = read_le_u32(&self.data, 0)?;
        let b = read_le_u32(&self.data, 4)?;
        Ok(BlockPair::new(u64::from(a), u64::from(b)))
    }

    /// Decode a CTZ struct payload into `(head, file_length)`.
    pub fn as_ctz(&self) -> Result<(BlockNumber, u32), ParseError> {
        let head = read_le_u32(&self.data, 0)?;
        let length = read_le_u32(&self.data, 4)?;
        Ok((BlockNumber(u64::from(head)), length))
    }
}

fn pair_payload(pair: BlockPair) -> Result<Vec<u8>, ParseError> {
    let mut data = Vec::with_capacity(8);
    data.extend_from_slice(&pair.0.to_u32()?.to_le_bytes());
    data.extend_from_slice(&pair.1.to_u32()?.to_le_bytes());
    Ok(data)
}

/// Serialized size of a run of entries (tags plus payloads, no commit
/// framing).
#[must_use]
pub fn length_of(entries: &[Entry]) -> usize {
    entries.iter().map(Entry::len).sum()
}

/// Stable reduction to the minimal entry set equivalent to replaying the
/// input in order.
///
/// For each id, everything up to and including its most recent SPLICE
/// delete is dropped, the tombstone with it. Of the survivors, the last
/// entry per `(id, abstract type)` slot wins; winners keep their input
/// order.
#[must_use]
pub fn compact(entries: &[Entry]) -> Vec<Entry> {
    let mut last_delete: HashMap<u16, usize> = HashMap::new();
    for (pos, entry) in entries.iter().enumerate() {
        if entry.tag.is_delete() {
            last_delete.insert(entry.tag.id, pos);
        }
    }

    let survives = |pos: usize, entry: &Entry| -> bool {
        if entry.tag.is_delete() {
            return false;
        }
        match last_delete.get(&entry.tag.id) {
            Some(&del) => pos > del,
            None => true,
        }
    };

    let mut winner: HashMap<(u16, AbstractType), usize> = HashMap::new();
    for (pos, entry) in entries.iter().enumerate() {
        if survives(pos, entry) {
            winner.insert((entry.tag.id, entry.tag.abstract_type), pos);
        }
    }

    entries
        .iter()
        .enumerate()
        .filter(|(pos, entry)| {
            winner.get(&(entry.tag.id, entry.tag.abstract_type)) == Some(pos)
        })
        .map(|(_, entry)| entry.clone())
        .collect()
}
