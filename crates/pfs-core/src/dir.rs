//! Directory creation and enumeration.

use crate::{next_id, Clock, Fs};
use pfs_alloc::Lookahead;
use pfs_block::ByteDevice;
use pfs_error::{PfsError, Result};
use pfs_ondisk::entry::compact;
use pfs_ondisk::tag::{NAME_DIR, NAME_FILE, STRUCT_DIR};
use pfs_ondisk::{Block, Entry, SerializeStatus};
use pfs_types::BlockPair;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// What a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Value,
    Dictionary,
}

impl<D: ByteDevice, C: Clock> Fs<D, C> {
    /// Create the directory chain named by `segments`, segment by
    /// segment, reusing any prefix that already exists. Returns the pair
    /// of the final directory.
    pub fn mkdir(&self, segments: &[&[u8]]) -> Result<BlockPair> {
        let mut lookahead = self.lookahead.lock();
        let mut pair = BlockPair::ROOT;
        for segment in segments {
            pair = self.find_or_mkdir(&mut lookahead, pair, segment)?;
        }
        Ok(pair)
    }

    /// Resolve `name` as a subdirectory of `parent`, creating it when
    /// absent: a fresh pair gets an empty revision-1 block on both legs,
    /// then the parent's last chain block gains the NAME and STRUCT
    /// entries.
    fn find_or_mkdir(
        &self,
        lookahead: &mut Lookahead,
        parent: BlockPair,
        name: &[u8],
    ) -> Result<BlockPair> {
        let matches = self.entries_of_name(parent, name)?;
        if let Some((_, entries)) = matches.last() {
            if let Some(entry) = entries.iter().find(|entry| entry.tag.is_struct(STRUCT_DIR)) {
                return entry
                    .as_pair()
                    .map_err(|detail| PfsError::corrupt(parent.0 .0, detail));
            }
            return Err(PfsError::DictionaryExpected(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }

        let new_pair = self.allocate_pair(lookahead, &BTreeSet::new())?;
        let empty = Block::of_entries(1, Vec::new());
        let mut buf = vec![0_u8; self.geometry().block_size() as usize];
        if empty.into_cstruct(&mut buf, self.geometry().program_block_size())
            != SerializeStatus::Ok
        {
            return Err(PfsError::NoSpace);
        }
        self.block_to_block_number(&buf, new_pair.0)?;
        self.block_to_block_number(&buf, new_pair.1)?;

        let target = self.last_block_pair(parent)?;
        let block = self.block_of_block_pair(target)?;
        let id = next_id(&block)?;
        let updated = block.add_commit(vec![
            Entry::dir_name(id, name),
            Entry::dir_struct(id, new_pair).map_err(|err| PfsError::Format(err.to_string()))?,
        ]);
        self.block_to_block_pair(lookahead, &BTreeSet::new(), &updated, target)?;
        debug!(
            target: "pfs::core",
            event = "mkdir",
            parent = %parent,
            pair = %new_pair,
            id = id
        );
        Ok(new_pair)
    }

    /// Live names in the directory at `segments`, with their kinds.
    /// Later chain blocks shadow earlier ones.
    pub fn list(&self, segments: &[&[u8]]) -> Result<Vec<(Vec<u8>, EntryKind)>> {
        let pair = if segments.is_empty() {
            BlockPair::ROOT
        } else {
            self.resolve_dir(segments)?
        };

        let mut names: BTreeMap<Vec<u8>, EntryKind> = BTreeMap::new();
        for (_, raw) in self.all_entries_in_dir(pair)? {
            for entry in compact(&raw) {
                if !entry.tag.is_name() {
                    continue;
                }
                let kind = match entry.tag.chunk {
                    NAME_FILE => EntryKind::Value,
                    NAME_DIR => EntryKind::Dictionary,
                    _ => continue,
                };
                names.insert(entry.data.clone(), kind);
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Kind of the entry at `segments`.
    pub fn entry_kind(&self, segments: &[&[u8]]) -> Result<EntryKind> {
        let Some((basename, parents)) = segments.split_last() else {
            return Err(PfsError::ValueExpected(String::new()));
        };
        let pair = if parents.is_empty() {
            BlockPair::ROOT
        } else {
            self.resolve_dir(parents)?
        };
        let matches = self.entries_of_name(pair, basename)?;
        let Some((_, entries)) = matches.last() else {
            return Err(PfsError::NotFound(
                String::from_utf8_lossy(basename).into_owned(),
            ));
        };
        if entries.iter().any(|entry| entry.tag.is_struct(STRUCT_DIR)) {
            Ok(EntryKind::Dictionary)
        } else {
            Ok(EntryKind::Value)
        }
    }
}
