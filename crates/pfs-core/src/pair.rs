//! Metadata-pair I/O.
//!
//! Reads pick the leg with the newer revision under signed comparison and
//! tolerate one corrupt leg. Writes serialize once and program both legs;
//! a commit that overflows the block is compacted, and a compacted block
//! that still overflows is split into a freshly allocated pair linked by
//! hardtail. A block that already has a hardtail cannot split again: its
//! compacted form is a single commit with no parseable truncation, so an
//! overflow there is refused outright instead of programming a block that
//! would no longer parse.

use crate::{Clock, Fs};
use pfs_alloc::Lookahead;
use pfs_block::ByteDevice;
use pfs_error::{PfsError, Result};
use pfs_ondisk::{Block, SerializeStatus};
use pfs_types::{revision_newer, BlockNumber, BlockPair};
use std::collections::BTreeSet;
use tracing::{debug, warn};

impl<D: ByteDevice, C: Clock> Fs<D, C> {
    /// Read and parse one metadata block.
    pub(crate) fn block_of_block_number(&self, block: BlockNumber) -> Result<Block> {
        let bytes = self.dev.read_block(block)?;
        Block::of_cstruct(&bytes, self.geometry().program_block_size())
            .map_err(|detail| PfsError::corrupt(block.0, detail))
    }

    /// Read a metadata pair, returning the authoritative revision.
    pub(crate) fn block_of_block_pair(&self, pair: BlockPair) -> Result<Block> {
        match (
            self.block_of_block_number(pair.0),
            self.block_of_block_number(pair.1),
        ) {
            (Ok(a), Ok(b)) => Ok(if revision_newer(b.revision_count, a.revision_count) {
                b
            } else {
                a
            }),
            (Ok(a), Err(err)) => {
                let leg = pair.1;
                warn!(
                    target: "pfs::core",
                    event = "pair_leg_unreadable",
                    pair = %pair,
                    leg = leg.0,
                    error = %err
                );
                Ok(a)
            }
            (Err(err), Ok(b)) => {
                let leg = pair.0;
                warn!(
                    target: "pfs::core",
                    event = "pair_leg_unreadable",
                    pair = %pair,
                    leg = leg.0,
                    error = %err
                );
                Ok(b)
            }
            (Err(err), Err(_)) => Err(err),
        }
    }

    /// Write one serialized metadata block.
    pub(crate) fn block_to_block_number(&self, buf: &[u8], block: BlockNumber) -> Result<()> {
        self.dev.write_block(block, buf)
    }

    fn write_both_legs(&self, buf: &[u8], pair: BlockPair) -> Result<()> {
        self.block_to_block_number(buf, pair.0)?;
        self.block_to_block_number(buf, pair.1)
    }

    /// Write `block` to both legs of `pair`, compacting and splitting as
    /// needed to make it fit. `pending` holds blocks claimed by the
    /// caller's in-flight writes that no metadata references yet; a split
    /// must not hand them out as the fresh pair.
    pub(crate) fn block_to_block_pair(
        &self,
        lookahead: &mut Lookahead,
        pending: &BTreeSet<u64>,
        block: &Block,
        pair: BlockPair,
    ) -> Result<()> {
        let block_size = self.geometry().block_size() as usize;
        let pbs = self.geometry().program_block_size();

        let mut buf = vec![0_u8; block_size];
        match block.into_cstruct(&mut buf, pbs) {
            SerializeStatus::Ok => return self.write_both_legs(&buf, pair),
            SerializeStatus::Split | SerializeStatus::SplitEmergency => {}
        }

        debug!(target: "pfs::core::write", event = "compact", pair = %pair);
        let compacted = block.compact();
        let mut buf = vec![0_u8; block_size];
        match compacted.into_cstruct(&mut buf, pbs) {
            SerializeStatus::Ok => self.write_both_legs(&buf, pair),
            SerializeStatus::Split => {
                if compacted.hardtail().is_none() {
                    self.split_into_fresh_pair(lookahead, pending, &compacted, pair)
                } else {
                    // a tailed block cannot split again, and its single
                    // compacted commit has no parseable truncation;
                    // refuse instead of destroying the pair
                    warn!(
                        target: "pfs::core::write",
                        event = "tailed_overflow",
                        pair = %pair
                    );
                    Err(PfsError::NoSpace)
                }
            }
            SerializeStatus::SplitEmergency => Err(PfsError::NoSpace),
        }
    }

    /// Split protocol: move the higher half of ids to a newly allocated
    /// pair, then rewrite the old pair pointing at it by hardtail. The
    /// new pair goes down first so a failure in either phase leaves the
    /// old pair intact; all failures surface as `NoSpace`.
    fn split_into_fresh_pair(
        &self,
        lookahead: &mut Lookahead,
        pending: &BTreeSet<u64>,
        block: &Block,
        pair: BlockPair,
    ) -> Result<()> {
        let block_size = self.geometry().block_size() as usize;
        let pbs = self.geometry().program_block_size();

        let new_pair = self.allocate_pair(lookahead, pending)?;
        debug!(
            target: "pfs::core::write",
            event = "split",
            old = %pair,
            new = %new_pair
        );
        let (old_block, new_block) = block.split(new_pair).map_err(|_| PfsError::NoSpace)?;

        let mut buf = vec![0_u8; block_size];
        if new_block.into_cstruct(&mut buf, pbs) != SerializeStatus::Ok {
            return Err(PfsError::NoSpace);
        }
        self.write_both_legs(&buf, new_pair)
            .map_err(|_| PfsError::NoSpace)?;

        let mut buf = vec![0_u8; block_size];
        if old_block.into_cstruct(&mut buf, pbs) != SerializeStatus::Ok {
            return Err(PfsError::NoSpace);
        }
        self.write_both_legs(&buf, pair)
            .map_err(|_| PfsError::NoSpace)
    }
}
