//! Reachability walks over the on-disk structure.
//!
//! Hardtail chains, the full live set rooted at the superblock pair, and
//! CTZ skip-list pointer walks. The live set feeds the allocator: a block
//! is free exactly when no walk from the root reaches it.

use crate::{Clock, Fs};
use pfs_block::ByteDevice;
use pfs_error::{PfsError, Result};
use pfs_ondisk::{ctz, Link};
use pfs_types::{read_le_u32, BlockNumber, BlockPair};
use std::collections::{BTreeSet, HashSet};

impl<D: ByteDevice, C: Clock> Fs<D, C> {
    /// Walk hardtails from `pair` to the terminal pair of the chain.
    pub(crate) fn last_block_pair(&self, pair: BlockPair) -> Result<BlockPair> {
        let mut current = pair;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return Err(PfsError::Disconnected {
                    pair: current,
                    detail: "hardtail cycle".to_owned(),
                });
            }
            match self.block_of_block_pair(current)?.hardtail() {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
    }

    /// Enumerate every block reachable from the root pair via directory
    /// hardtails, subdirectory pointers, and CTZ chains. Read or parse
    /// failures surface as `Disconnected`.
    pub(crate) fn follow_links(&self) -> Result<BTreeSet<u64>> {
        let mut used = BTreeSet::new();
        let mut queue = vec![BlockPair::ROOT];
        let mut seen = HashSet::new();

        while let Some(pair) = queue.pop() {
            if !seen.insert(pair) {
                continue;
            }
            used.insert(pair.0 .0);
            used.insert(pair.1 .0);

            let block = self
                .block_of_block_pair(pair)
                .map_err(|err| PfsError::Disconnected {
                    pair,
                    detail: err.to_string(),
                })?;

            for link in block.linked_blocks() {
                match link {
                    Link::Pair(next) => queue.push(next),
                    Link::Ctz { head, file_length } => {
                        for block in self.get_ctz_pointers(head, file_length)? {
                            used.insert(block.0);
                        }
                    }
                }
            }
        }
        Ok(used)
    }

    /// Data blocks of a CTZ file from last to first, following the
    /// slot-0 pointer at the head of each block.
    pub(crate) fn get_ctz_pointers(
        &self,
        head: BlockNumber,
        file_length: u32,
    ) -> Result<Vec<BlockNumber>> {
        let index = ctz::last_block_index(u64::from(file_length), self.geometry().block_size());
        let mut blocks = Vec::with_capacity(index as usize + 1);
        blocks.push(head);
        let mut current = head;
        for _ in 0..index {
            let bytes = self.dev.read_block(current)?;
            let pointer =
                read_le_u32(&bytes, 0).map_err(|detail| PfsError::corrupt(current.0, detail))?;
            current = BlockNumber(u64::from(pointer));
            blocks.push(current);
        }
        Ok(blocks)
    }
}
