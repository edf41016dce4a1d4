//! Metadata-block serialization and parsing.
//!
//! A metadata block is a 4-byte revision count followed by commits laid
//! back-to-back. Each commit is a run of XOR-chained tags with payloads,
//! terminated by a CRC tag whose length field records the CRC word plus
//! trailing zero padding; padding brings the commit's end offset to a
//! multiple of the program block size. The tag XOR chain runs across
//! commits; the CRC chain seeds the first commit with the CRC of the
//! revision-count bytes and restarts for each commit after that. The
//! stored CRC word is the bitwise NOT of the running CRC-32.

use crate::entry::{compact, length_of, Entry};
use crate::tag::{self, AbstractType, Tag};
use crc32fast::Hasher;
use pfs_types::{read_be_u32, read_le_u32, BlockNumber, BlockPair, ParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One commit: an ordered run of entries. Framing (CRC tag, CRC word,
/// padding) is recomputed at serialization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub entries: Vec<Entry>,
}

/// In-memory metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub revision_count: u32,
    pub commits: Vec<Commit>,
}

/// Outcome of serializing a block into a fixed-size buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeStatus {
    /// Everything fit.
    Ok,
    /// Overflow that a compaction or a split may recover.
    Split,
    /// Overflow beyond what a compaction can plausibly save.
    SplitEmergency,
}

/// A structural reference held by a block's surviving entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// A metadata pair: a subdirectory or the hardtail successor.
    Pair(BlockPair),
    /// Head of a CTZ skip list and the file length needed to walk it.
    Ctz { head: BlockNumber, file_length: u32 },
}

fn round_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

impl Block {
    /// Single-commit block (the commit may be empty, which still
    /// serializes a parseable CRC-only commit).
    #[must_use]
    pub fn of_entries(revision_count: u32, entries: Vec<Entry>) -> Self {
        Self {
            revision_count,
            commits: vec![Commit { entries }],
        }
    }

    /// Append a commit, bumping the revision count.
    #[must_use]
    pub fn add_commit(&self, entries: Vec<Entry>) -> Self {
        let mut commits = self.commits.clone();
        commits.push(Commit { entries });
        Self {
            revision_count: self.revision_count.wrapping_add(1),
            commits,
        }
    }

    /// All entries across commits, in commit order, uncompacted.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.commits
            .iter()
            .flat_map(|commit| commit.entries.iter().cloned())
            .collect()
    }

    /// Collapse to a single commit holding the compacted union of all
    /// entries. The revision count is unchanged.
    #[must_use]
    pub fn compact(&self) -> Self {
        Self::of_entries(self.revision_count, compact(&self.entries()))
    }

    /// The successor pair, if this block carries a hardtail.
    #[must_use]
    pub fn hardtail(&self) -> Option<BlockPair> {
        compact(&self.entries())
            .iter()
            .rev()
            .find(|entry| entry.tag.is_hardtail())
            .and_then(|entry| entry.as_pair().ok())
    }

    /// Every blockpair or CTZ head referenced from the surviving entries.
    #[must_use]
    pub fn linked_blocks(&self) -> Vec<Link> {
        let mut links = Vec::new();
        for entry in compact(&self.entries()) {
            if entry.tag.is_struct(tag::STRUCT_DIR) || entry.tag.is_hardtail() {
                if let Ok(pair) = entry.as_pair() {
                    links.push(Link::Pair(pair));
                }
            } else if entry.tag.is_struct(tag::STRUCT_CTZ) {
                if let Ok((head, file_length)) = entry.as_ctz() {
                    links.push(Link::Ctz { head, file_length });
                }
            }
        }
        links
    }

    /// Live entry ids: ids carrying a NAME after deletes are applied.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<u16> {
        compact(&self.entries())
            .iter()
            .filter(|entry| entry.tag.is_name())
            .map(|entry| entry.tag.id)
            .collect()
    }

    /// Serialized size with commit framing and padding.
    #[must_use]
    pub fn serialized_len(&self, program_block_size: u32) -> usize {
        let pbs = program_block_size as usize;
        let mut offset = 4;
        for commit in &self.commits {
            offset = round_up(offset + length_of(&commit.entries) + 8, pbs);
        }
        offset
    }

    /// Serialize into `buf`, which must be zeroed. Commits are emitted in
    /// order; the first commit that does not fit and everything after it
    /// is withheld, so an overflowing serialization still leaves a
    /// parseable prefix in the buffer.
    pub fn into_cstruct(&self, buf: &mut [u8], program_block_size: u32) -> SerializeStatus {
        let pbs = program_block_size as usize;
        let cap = buf.len();
        buf[0..4].copy_from_slice(&self.revision_count.to_le_bytes());

        let mut offset = 4_usize;
        let mut prev_tag = 0xFFFF_FFFF_u32;
        let mut first = true;
        for commit in &self.commits {
            let unpadded_end = offset + length_of(&commit.entries) + 8;
            let padded_end = round_up(unpadded_end, pbs);
            if padded_end > cap {
                break;
            }
            let cover_start = if first { 0 } else { offset };

            for entry in &commit.entries {
                let masked = entry.tag.emit(prev_tag);
                buf[offset..offset + 4].copy_from_slice(&masked.to_be_bytes());
                buf[offset + 4..offset + 4 + entry.data.len()].copy_from_slice(&entry.data);
                prev_tag = entry.tag.bits();
                offset += 4 + entry.data.len();
            }

            let padding = padded_end - unpadded_end;
            #[allow(clippy::cast_possible_truncation)] // padding < program block <= 512
            let crc_tag = Tag::new(AbstractType::Crc, 0x00, tag::NO_ID, (4 + padding) as u16);
            let masked = crc_tag.emit(prev_tag);
            buf[offset..offset + 4].copy_from_slice(&masked.to_be_bytes());
            offset += 4;

            let mut hasher = Hasher::new();
            hasher.update(&buf[cover_start..offset]);
            let crc = !hasher.finalize();
            buf[offset..offset + 4].copy_from_slice(&crc.to_le_bytes());

            // padding bytes stay zero
            offset = padded_end;
            prev_tag = crc_tag.bits();
            first = false;
        }

        let needed = self.serialized_len(program_block_size);
        if needed <= cap {
            SerializeStatus::Ok
        } else if needed <= 2 * cap {
            SerializeStatus::Split
        } else {
            SerializeStatus::SplitEmergency
        }
    }

    /// Parse a metadata block. Commits are accepted up to the first one
    /// whose leading tag is invalid or whose CRC does not verify; at
    /// least one commit must survive.
    pub fn of_cstruct(bytes: &[u8], program_block_size: u32) -> Result<Self, ParseError> {
        if program_block_size == 0 {
            return Err(ParseError::InvalidField {
                field: "program_block_size",
                reason: "must be nonzero",
            });
        }
        let pbs = program_block_size as usize;
        let revision_count = read_le_u32(bytes, 0)?;
        let mut commits: Vec<Commit> = Vec::new();

        let mut offset = 4_usize;
        let mut prev_tag = 0xFFFF_FFFF_u32;
        let mut first = true;
        'commits: while offset + 8 <= bytes.len() {
            let cover_start = if first { 0 } else { offset };
            let mut entries = Vec::new();
            let mut pos = offset;
            let mut chain = prev_tag;
            loop {
                if pos + 4 > bytes.len() {
                    break 'commits;
                }
                let raw = read_be_u32(bytes, pos)? ^ chain;
                let Ok(parsed) = Tag::parse(raw) else {
                    break 'commits;
                };
                if !parsed.valid {
                    break 'commits;
                }

                if parsed.is_crc() {
                    if parsed.length < 4 {
                        break 'commits;
                    }
                    let crc_offset = pos + 4;
                    if crc_offset + 4 > bytes.len() {
                        break 'commits;
                    }
                    let mut hasher = Hasher::new();
                    hasher.update(&bytes[cover_start..crc_offset]);
                    if read_le_u32(bytes, crc_offset)? != !hasher.finalize() {
                        break 'commits;
                    }
                    let end = crc_offset + usize::from(parsed.length);
                    if end > bytes.len() || end % pbs != 0 {
                        break 'commits;
                    }
                    // padding is outside the CRC; a nonzero byte means the
                    // commit was torn
                    if bytes[crc_offset + 4..end].iter().any(|byte| *byte != 0) {
                        break 'commits;
                    }
                    commits.push(Commit { entries });
                    prev_tag = raw;
                    offset = end;
                    first = false;
                    continue 'commits;
                }

                let len = usize::from(parsed.length);
                if pos + 4 + len > bytes.len() {
                    break 'commits;
                }
                entries.push(Entry::new(parsed, bytes[pos + 4..pos + 4 + len].to_vec()));
                chain = raw;
                pos += 4 + len;
            }
        }

        if commits.is_empty() {
            return Err(ParseError::NoCommit);
        }
        Ok(Self {
            revision_count,
            commits,
        })
    }

    /// Partition this block for a split: live ids are ordered ascending,
    /// the lower half stays, the higher half moves to a fresh revision-1
    /// block on `new_pair`, and the old block's hardtail is pointed at
    /// the new pair. Ids are not renumbered.
    pub fn split(&self, new_pair: BlockPair) -> Result<(Self, Self), ParseError> {
        let compacted = compact(&self.entries());
        let ids: Vec<u16> = self.ids().into_iter().collect();
        let keep_count = ids.len().div_ceil(2);
        let moved: BTreeSet<u16> = ids[keep_count..].iter().copied().collect();

        let mut old_entries: Vec<Entry> = compacted
            .iter()
            .filter(|entry| !moved.contains(&entry.tag.id))
            .cloned()
            .collect();
        let new_entries: Vec<Entry> = compacted
            .iter()
            .filter(|entry| moved.contains(&entry.tag.id))
            .cloned()
            .collect();

        old_entries.retain(|entry| !entry.tag.is_hardtail());
        old_entries.push(Entry::hardtail(new_pair)?);

        Ok((
            Self::of_entries(self.revision_count, old_entries),
            Self::of_entries(1, new_entries),
        ))
    }
}
