#![forbid(unsafe_code)]
//! On-disk metadata codec for PebbleFS.
//!
//! Pure parsing and serialization — no I/O, no side effects. Covers the
//! 32-bit XOR-chained tag codec, typed entries and their compaction rules,
//! CRC-terminated commits, whole metadata blocks, the superblock payload,
//! and the CTZ skip-list arithmetic.

pub mod block;
pub mod ctz;
pub mod entry;
pub mod superblock;
pub mod tag;

pub use block::{Block, Commit, Link, SerializeStatus};
pub use entry::{compact, length_of, Entry};
pub use superblock::Superblock;
pub use tag::{AbstractType, Tag};
