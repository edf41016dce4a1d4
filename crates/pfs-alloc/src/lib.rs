#![forbid(unsafe_code)]
//! Lookahead free-block allocation policy.
//!
//! The allocator keeps a cached list of known-free blocks, refilled from a
//! live-set scan supplied by the engine. Each refill keeps only one half
//! of the device — below or above the midpoint — and the half alternates
//! between refills, which spreads wear without persisting any state. The
//! policy layer is pure: the engine performs the reachability scan and
//! hands the used set in.

use pfs_types::BlockNumber;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Which half of the device the next refill keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    /// Blocks below the midpoint.
    Before,
    /// Blocks at or above the midpoint.
    After,
}

impl Bias {
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
        }
    }
}

/// Cached free-block list plus the bias of the next refill.
#[derive(Debug)]
pub struct Lookahead {
    bias: Bias,
    free: VecDeque<BlockNumber>,
}

impl Default for Lookahead {
    fn default() -> Self {
        Self::new()
    }
}

impl Lookahead {
    /// Empty lookahead; the first refill keeps the lower half.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bias: Bias::Before,
            free: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Bias the next refill will use.
    #[must_use]
    pub fn bias(&self) -> Bias {
        self.bias
    }

    /// Replace the free list with the unused blocks in the current bias
    /// half, in ascending order, then flip the bias.
    pub fn refill(&mut self, used: &BTreeSet<u64>, block_count: u64) {
        let midpoint = block_count / 2;
        let range = match self.bias {
            Bias::Before => 0..midpoint,
            Bias::After => midpoint..block_count,
        };
        self.free = range
            .filter(|block| !used.contains(block))
            .map(BlockNumber)
            .collect();
        debug!(
            target: "pfs::alloc",
            event = "refill",
            bias = ?self.bias,
            free = self.free.len(),
            used = used.len()
        );
        self.bias = self.bias.flipped();
    }

    /// Pop the lowest cached free block.
    pub fn pop(&mut self) -> Option<BlockNumber> {
        self.free.pop_front()
    }

    /// Pop two distinct cached free blocks.
    pub fn pop_pair(&mut self) -> Option<(BlockNumber, BlockNumber)> {
        if self.free.len() < 2 {
            return None;
        }
        let a = self.free.pop_front()?;
        let b = self.free.pop_front()?;
        Some((a, b))
    }
}
