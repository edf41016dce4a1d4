//! Value read and write paths.
//!
//! Values at most a quarter of a block are stored inline in the directory
//! entry; anything larger spills into a CTZ skip list whose head and
//! length ride in the STRUCT entry. Overwrites tombstone the old id and
//! land the replacement in the same commit, so the swap is atomic.

use crate::{key_of, next_id, Clock, Fs};
use pfs_alloc::Lookahead;
use pfs_block::ByteDevice;
use pfs_error::{PfsError, Result};
use pfs_ondisk::tag::{STRUCT_CTZ, STRUCT_DIR, STRUCT_INLINE};
use pfs_ondisk::{ctz, Entry};
use pfs_types::{BlockNumber, BlockPair, FILE_SIZE_MAX};
use std::collections::BTreeSet;
use tracing::debug;

impl<D: ByteDevice, C: Clock> Fs<D, C> {
    /// Read the value at `segments`, resolving intermediate segments as
    /// directories from the root pair.
    pub fn get(&self, segments: &[&[u8]]) -> Result<Vec<u8>> {
        let Some((basename, parents)) = segments.split_last() else {
            return Err(PfsError::ValueExpected(String::new()));
        };
        let pair = if parents.is_empty() {
            BlockPair::ROOT
        } else {
            self.resolve_dir(parents)
                .map_err(|err| match err {
                    PfsError::NotFound(_) | PfsError::DictionaryExpected(_) => {
                        PfsError::NotFound(key_of(segments))
                    }
                    other => other,
                })?
        };
        self.get_value(pair, basename)
    }

    /// Resolve `name` within the chain at `pair` and reconstruct its
    /// value. Only the last matching block of the chain counts.
    pub(crate) fn get_value(&self, pair: BlockPair, name: &[u8]) -> Result<Vec<u8>> {
        let matches = self.entries_of_name(pair, name)?;
        let Some((_, entries)) = matches.last() else {
            return Err(PfsError::NotFound(String::from_utf8_lossy(name).into_owned()));
        };

        if let Some(entry) = entries.iter().find(|entry| entry.tag.is_struct(STRUCT_INLINE)) {
            return Ok(entry.data.clone());
        }
        if let Some(entry) = entries.iter().find(|entry| entry.tag.is_struct(STRUCT_CTZ)) {
            let (head, file_length) = entry
                .as_ctz()
                .map_err(|detail| PfsError::corrupt(pair.0 .0, detail))?;
            return self.get_ctz(head, file_length);
        }
        if entries.iter().any(|entry| entry.tag.is_struct(STRUCT_DIR)) {
            return Err(PfsError::ValueExpected(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        Err(PfsError::NotFound(String::from_utf8_lossy(name).into_owned()))
    }

    /// Reassemble a CTZ file: walk the pointer chain from the head, then
    /// concatenate each block's data region first-to-last.
    pub(crate) fn get_ctz(&self, head: BlockNumber, file_length: u32) -> Result<Vec<u8>> {
        let pointers = self.get_ctz_pointers(head, file_length)?;
        let mut data = Vec::with_capacity(file_length as usize);
        for (index, block) in pointers.iter().rev().enumerate() {
            let bytes = self.dev.read_block(*block)?;
            let skip = 4 * ctz::pointer_count(index as u64) as usize;
            data.extend_from_slice(&bytes[skip..]);
        }
        data.truncate(file_length as usize);
        Ok(data)
    }

    /// Create or replace `name` in the directory chain at `dir_pair`.
    pub fn set_in_directory(&self, dir_pair: BlockPair, name: &[u8], data: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(PfsError::ValueExpected(String::new()));
        }
        let mut lookahead = self.lookahead.lock();

        let matches = self.entries_of_name(dir_pair, name)?;
        match matches.last() {
            None => {
                // fresh name: append to the end of the chain
                let target = self.last_block_pair(dir_pair)?;
                let block = self.block_of_block_pair(target)?;
                let id = next_id(&block)?;
                let mut pending = BTreeSet::new();
                let entries =
                    self.value_entries(&mut lookahead, &mut pending, id, name, data)?;
                let updated = block.add_commit(entries);
                self.block_to_block_pair(&mut lookahead, &pending, &updated, target)
            }
            Some((pair, existing)) => {
                // replace in place: tombstone the old id and write the new
                // entries in the same commit on the block that held it
                let Some(old_id) = existing.first().map(|entry| entry.tag.id) else {
                    return Err(PfsError::NotFound(String::from_utf8_lossy(name).into_owned()));
                };
                let block = self.block_of_block_pair(*pair)?;
                let id = next_id(&block)?;
                let mut pending = BTreeSet::new();
                let mut entries = vec![Entry::delete(old_id)];
                entries.extend(self.value_entries(&mut lookahead, &mut pending, id, name, data)?);
                let updated = block.add_commit(entries);
                debug!(
                    target: "pfs::core::write",
                    event = "replace",
                    pair = %pair,
                    old_id = old_id,
                    new_id = id
                );
                self.block_to_block_pair(&mut lookahead, &pending, &updated, *pair)
            }
        }
    }

    /// NAME + CTIME + STRUCT entries for a value, writing CTZ data blocks
    /// first when the value does not fit inline. CTZ blocks are recorded
    /// in `pending` so the commit that links them cannot reallocate them.
    fn value_entries(
        &self,
        lookahead: &mut Lookahead,
        pending: &mut BTreeSet<u64>,
        id: u16,
        name: &[u8],
        data: &[u8],
    ) -> Result<Vec<Entry>> {
        let (days, picoseconds) = self.clock.now();
        let struct_entry = if data.len() > self.geometry().inline_max() {
            let (head, file_length) = self.write_ctz_data(lookahead, pending, data)?;
            Entry::ctz_struct(id, head, file_length)
                .map_err(|err| PfsError::Format(err.to_string()))?
        } else {
            Entry::inline_struct(id, data.to_vec())
        };
        Ok(vec![
            Entry::file_name(id, name),
            Entry::ctime(id, days, picoseconds),
            struct_entry,
        ])
    }

    /// Emit CTZ data blocks from index 0 upward; the returned head is the
    /// last block written. Every block claimed is added to `pending`.
    fn write_ctz_data(
        &self,
        lookahead: &mut Lookahead,
        pending: &mut BTreeSet<u64>,
        data: &[u8],
    ) -> Result<(BlockNumber, u32)> {
        let file_length = u32::try_from(data.len())
            .ok()
            .filter(|len| *len <= FILE_SIZE_MAX)
            .ok_or_else(|| PfsError::Format("value exceeds maximum file size".to_owned()))?;
        let block_size = self.geometry().block_size();

        let mut written: Vec<BlockNumber> = Vec::new();
        let mut offset = 0_usize;
        let mut index = 0_u64;
        while offset < data.len() {
            let block = self.allocate_block(lookahead, pending)?;
            let pointers = ctz::pointer_count(index) as usize;
            let mut buf = vec![0_u8; block_size as usize];
            for slot in 0..pointers {
                let back = written[(index - (1_u64 << slot)) as usize];
                let pointer = back
                    .to_u32()
                    .map_err(|err| PfsError::Format(err.to_string()))?;
                buf[slot * 4..slot * 4 + 4].copy_from_slice(&pointer.to_le_bytes());
            }
            let take = ctz::data_capacity(index, block_size).min(data.len() - offset);
            buf[pointers * 4..pointers * 4 + take].copy_from_slice(&data[offset..offset + take]);
            self.dev.write_block(block, &buf)?;

            pending.insert(block.0);
            written.push(block);
            offset += take;
            index += 1;
        }

        let head = written
            .last()
            .copied()
            .ok_or_else(|| PfsError::Format("empty CTZ write".to_owned()))?;
        debug!(
            target: "pfs::core::write",
            event = "ctz_write",
            blocks = written.len(),
            length = file_length
        );
        Ok((head, file_length))
    }

    /// Remove `name` from the directory chain at `dir_pair`. Succeeds
    /// silently when the name is absent.
    pub fn delete_in_directory(&self, dir_pair: BlockPair, name: &[u8]) -> Result<()> {
        let mut lookahead = self.lookahead.lock();

        let matches = self.entries_of_name(dir_pair, name)?;
        let Some((pair, entries)) = matches.last() else {
            return Ok(());
        };
        let Some(id) = entries.first().map(|entry| entry.tag.id) else {
            return Ok(());
        };
        let block = self.block_of_block_pair(*pair)?;
        let updated = block.add_commit(vec![Entry::delete(id)]);
        self.block_to_block_pair(&mut lookahead, &BTreeSet::new(), &updated, *pair)
    }
}
