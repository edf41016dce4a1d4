//! Name resolution inside the directory tree.
//!
//! Directory enumeration returns uncompacted entries: compaction erases
//! which block holds an id, and callers deleting or replacing in place
//! need exactly that. When a name appears in more than one block of a
//! hardtail chain, the last block is authoritative.

use crate::{key_of, Clock, Fs};
use pfs_block::ByteDevice;
use pfs_error::{PfsError, Result};
use pfs_ondisk::entry::compact;
use pfs_ondisk::tag::{NAME_DIR, NAME_FILE, STRUCT_DIR};
use pfs_ondisk::Entry;
use pfs_types::BlockPair;
use std::collections::HashSet;

/// Outcome of resolving a directory path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirLookup {
    /// Segments exhausted; the basename lives on this pair.
    BasenameOn(BlockPair),
    /// A segment has no id in its parent.
    NoId(Vec<u8>),
    /// A segment's id exists but carries no directory struct.
    NoStructs,
    /// A segment's directory struct does not decode.
    NoEntry,
}

impl<D: ByteDevice, C: Clock> Fs<D, C> {
    /// Every `(pair, entries)` of the hardtail chain rooted at `head`.
    /// Entries are uncompacted.
    pub(crate) fn all_entries_in_dir(
        &self,
        head: BlockPair,
    ) -> Result<Vec<(BlockPair, Vec<Entry>)>> {
        let mut out = Vec::new();
        let mut current = head;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return Err(PfsError::Disconnected {
                    pair: current,
                    detail: "hardtail cycle".to_owned(),
                });
            }
            let block = self.block_of_block_pair(current)?;
            let tail = block.hardtail();
            out.push((current, block.entries()));
            match tail {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// For each block of the chain where `name` is live, the compacted
    /// entries of its id on that block.
    pub(crate) fn entries_of_name(
        &self,
        head: BlockPair,
        name: &[u8],
    ) -> Result<Vec<(BlockPair, Vec<Entry>)>> {
        let mut out = Vec::new();
        for (pair, raw) in self.all_entries_in_dir(head)? {
            let compacted = compact(&raw);
            let id = compacted
                .iter()
                .find(|entry| {
                    entry.tag.is_name()
                        && matches!(entry.tag.chunk, NAME_FILE | NAME_DIR)
                        && entry.data == name
                })
                .map(|entry| entry.tag.id);
            let Some(id) = id else { continue };

            let for_id: Vec<Entry> = raw
                .iter()
                .filter(|entry| entry.tag.id == id)
                .cloned()
                .collect();
            let entries = compact(&for_id);
            if !entries.is_empty() {
                out.push((pair, entries));
            }
        }
        Ok(out)
    }

    /// Recursive descent: resolve `segments` to the pair that holds the
    /// final name.
    pub fn find_first_blockpair_of_directory(
        &self,
        root: BlockPair,
        segments: &[&[u8]],
    ) -> Result<DirLookup> {
        let Some((segment, rest)) = segments.split_first() else {
            return Ok(DirLookup::BasenameOn(root));
        };
        let matches = self.entries_of_name(root, segment)?;
        let Some((_, entries)) = matches.last() else {
            return Ok(DirLookup::NoId(segment.to_vec()));
        };
        let Some(dir_entry) = entries.iter().find(|entry| entry.tag.is_struct(STRUCT_DIR))
        else {
            return Ok(DirLookup::NoStructs);
        };
        let Ok(child) = dir_entry.as_pair() else {
            return Ok(DirLookup::NoEntry);
        };
        self.find_first_blockpair_of_directory(child, rest)
    }

    /// Resolve the pair of the directory named by `segments`, mapping
    /// lookup misses to operation-level errors.
    pub(crate) fn resolve_dir(&self, segments: &[&[u8]]) -> Result<BlockPair> {
        match self.find_first_blockpair_of_directory(BlockPair::ROOT, segments)? {
            DirLookup::BasenameOn(pair) => Ok(pair),
            DirLookup::NoId(_) | DirLookup::NoEntry => {
                Err(PfsError::NotFound(key_of(segments)))
            }
            DirLookup::NoStructs => Err(PfsError::DictionaryExpected(key_of(segments))),
        }
    }
}
