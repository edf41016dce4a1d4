//! CTZ skip-list arithmetic.
//!
//! A CTZ file is a reverse-linked list over data blocks: block `i`
//! (counting from 0) starts with `ctz(i) + 1` little-endian u32 pointers,
//! where pointer slot `k` refers back to block `i - 2^k`. Block 0 carries
//! no pointers. The remainder of each block is file data.

/// Number of back-pointers stored at the head of block `i`.
#[must_use]
pub fn pointer_count(index: u64) -> u32 {
    if index == 0 {
        0
    } else {
        index.trailing_zeros() + 1
    }
}

/// File-data bytes block `i` can hold.
#[must_use]
pub fn data_capacity(index: u64, block_size: u32) -> usize {
    (block_size - 4 * pointer_count(index)) as usize
}

/// Index of the block holding the last byte of an `file_size`-byte file.
///
/// Closed form from the reference implementation; inverts the cumulative
/// capacity of the variable-width skip-list heads.
#[must_use]
pub fn last_block_index(file_size: u64, block_size: u32) -> u64 {
    if file_size == 0 {
        return 0;
    }
    let off = file_size - 1;
    let b = u64::from(block_size) - 8;
    let i = off / b;
    if i == 0 {
        return 0;
    }
    (off - 4 * (u64::from((i - 1).count_ones()) + 2)) / b
}
