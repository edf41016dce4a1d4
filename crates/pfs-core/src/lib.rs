#![forbid(unsafe_code)]
//! The PebbleFS engine.
//!
//! Composes the block device, the metadata codec, and the lookahead
//! allocator into a log-structured, copy-on-write filesystem: a directory
//! tree of metadata pairs linked by hardtails, values stored inline or as
//! CTZ skip lists, and space reclaimed by rescanning the live set.
//!
//! The handle owns the device and a mutex over the allocator. Operations
//! that may allocate or extend structure (`set_in_directory`, `mkdir`,
//! `delete_in_directory`, connect-time seeding) serialize on that mutex;
//! reads take no lock.

mod dir;
mod file;
mod find;
mod pair;
mod traverse;

pub use dir::EntryKind;
pub use find::DirLookup;

use parking_lot::Mutex;
use pfs_alloc::Lookahead;
use pfs_block::{ByteBlockDevice, ByteDevice};
use pfs_error::{PfsError, Result};
use pfs_ondisk::{Block, Entry, SerializeStatus, Superblock};
use pfs_types::{BlockNumber, BlockPair, Geometry};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Wall-clock source for creation-time entries.
pub trait Clock: Send + Sync {
    /// Days since the Unix epoch and picoseconds within the day.
    fn now(&self) -> (u32, u64);
}

/// `Clock` backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> (u32, u64) {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)] // day count fits u32 for ~11M years
        let days = (since.as_secs() / 86_400) as u32;
        let picoseconds =
            (since.as_secs() % 86_400) * 1_000_000_000_000 + u64::from(since.subsec_nanos()) * 1_000;
        (days, picoseconds)
    }
}

/// A mounted filesystem handle.
pub struct Fs<D, C = SystemClock> {
    pub(crate) dev: ByteBlockDevice<D>,
    pub(crate) clock: C,
    pub(crate) lookahead: Mutex<Lookahead>,
}

fn geometry_for(
    device: &impl ByteDevice,
    block_size: u32,
    program_block_size: u32,
) -> Result<Geometry> {
    let block_count = device.len_bytes() / u64::from(block_size.max(1));
    Geometry::new(block_size, program_block_size, block_count)
        .map_err(|err| PfsError::Format(err.to_string()))
}

/// Write a fresh filesystem onto `device`: both legs of the root pair get
/// the superblock NAME and inline config, at revisions 1 and 2, so the
/// newer leg is authoritative on first mount.
pub fn format<D: ByteDevice>(device: &D, block_size: u32, program_block_size: u32) -> Result<()> {
    let geometry = geometry_for(device, block_size, program_block_size)?;
    let dev = ByteBlockDevice::new(device, geometry)?;
    let superblock =
        Superblock::for_geometry(geometry).map_err(|err| PfsError::Format(err.to_string()))?;
    let entries = vec![
        Entry::superblock_name(),
        Entry::inline_struct(0, superblock.to_bytes().to_vec()),
    ];

    for (leg, revision) in [(BlockPair::ROOT.0, 1), (BlockPair::ROOT.1, 2)] {
        let block = Block::of_entries(revision, entries.clone());
        let mut buf = vec![0_u8; geometry.block_size() as usize];
        if block.into_cstruct(&mut buf, geometry.program_block_size()) != SerializeStatus::Ok {
            return Err(PfsError::NoSpace);
        }
        dev.write_block(leg, &buf)?;
    }
    info!(
        target: "pfs::core",
        event = "format",
        block_size = geometry.block_size(),
        block_count = geometry.block_count()
    );
    Ok(())
}

impl<D: ByteDevice> Fs<D, SystemClock> {
    /// Mount `device` with the system clock.
    pub fn connect(device: D, block_size: u32, program_block_size: u32) -> Result<Self> {
        Self::connect_with_clock(device, block_size, program_block_size, SystemClock)
    }
}

impl<D: ByteDevice, C: Clock> Fs<D, C> {
    /// Mount `device`, stamping new entries with `clock`.
    pub fn connect_with_clock(
        device: D,
        block_size: u32,
        program_block_size: u32,
        clock: C,
    ) -> Result<Self> {
        let geometry = geometry_for(&device, block_size, program_block_size)?;
        let dev = ByteBlockDevice::new(device, geometry)?;
        dev.read_block(BlockNumber(0))?;

        let fs = Self {
            dev,
            clock,
            lookahead: Mutex::new(Lookahead::new()),
        };
        fs.check_superblock()?;
        {
            let mut lookahead = fs.lookahead.lock();
            let used = fs.follow_links()?;
            lookahead.refill(&used, geometry.block_count());
        }
        info!(
            target: "pfs::core",
            event = "connect",
            block_size = geometry.block_size(),
            block_count = geometry.block_count()
        );
        Ok(fs)
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.dev.geometry()
    }

    /// Verify the root pair carries the magic and a config that agrees
    /// with the mount geometry.
    fn check_superblock(&self) -> Result<()> {
        let root = self.block_of_block_pair(BlockPair::ROOT)?;
        let entries = pfs_ondisk::entry::compact(&root.entries());

        let has_magic = entries.iter().any(|entry| {
            entry.tag.is_name()
                && entry.tag.chunk == pfs_ondisk::tag::NAME_SUPERBLOCK
                && entry.data == pfs_types::MAGIC
        });
        if !has_magic {
            return Err(PfsError::Format(
                "root pair carries no superblock magic".to_owned(),
            ));
        }

        if let Some(config) = entries.iter().find(|entry| {
            entry.tag.id == 0 && entry.tag.is_struct(pfs_ondisk::tag::STRUCT_INLINE)
        }) {
            let superblock = Superblock::parse(&config.data)
                .map_err(|detail| PfsError::corrupt(BlockPair::ROOT.0 .0, detail))?;
            if superblock.block_size != self.geometry().block_size() {
                return Err(PfsError::Format(format!(
                    "device was formatted with block size {}, mounted with {}",
                    superblock.block_size,
                    self.geometry().block_size()
                )));
            }
        }
        Ok(())
    }

    /// Pop a free block, refilling the lookahead from a live-set scan if
    /// it has run dry. `pending` holds blocks claimed by an in-flight
    /// multi-block write that are not yet linked from any metadata.
    pub(crate) fn allocate_block(
        &self,
        lookahead: &mut Lookahead,
        pending: &BTreeSet<u64>,
    ) -> Result<BlockNumber> {
        while let Some(block) = lookahead.pop() {
            if !pending.contains(&block.0) {
                return Ok(block);
            }
        }
        let mut used = self.follow_links()?;
        used.extend(pending.iter().copied());
        lookahead.refill(&used, self.geometry().block_count());
        lookahead.pop().ok_or(PfsError::NoSpace)
    }

    /// Pop two distinct free blocks for a fresh metadata pair. As with
    /// `allocate_block`, `pending` blocks are skipped and excluded from a
    /// refill's live-set scan, which cannot see them yet.
    pub(crate) fn allocate_pair(
        &self,
        lookahead: &mut Lookahead,
        pending: &BTreeSet<u64>,
    ) -> Result<BlockPair> {
        let mut picked: Vec<BlockNumber> = Vec::new();
        while picked.len() < 2 {
            match lookahead.pop() {
                Some(block) if !pending.contains(&block.0) => picked.push(block),
                Some(_) => {}
                None => break,
            }
        }
        if let [a, b] = picked[..] {
            return Ok(BlockPair(a, b));
        }
        let mut used = self.follow_links()?;
        used.extend(pending.iter().copied());
        lookahead.refill(&used, self.geometry().block_count());
        lookahead
            .pop_pair()
            .map(|(a, b)| BlockPair(a, b))
            .ok_or(PfsError::NoSpace)
    }
}

/// Next free entry id on a block: one past the highest live id, or 1 for
/// a block with none. Ids are 10 bits on disk; a block that has burned
/// through them cannot take more entries.
pub(crate) fn next_id(block: &Block) -> Result<u16> {
    let id = block
        .ids()
        .iter()
        .next_back()
        .map_or(1, |id| id.saturating_add(1));
    if id >= 0x3FF {
        return Err(PfsError::NoSpace);
    }
    Ok(id)
}

/// Lossy display form of a segment path, for error messages.
pub(crate) fn key_of(segments: &[&[u8]]) -> String {
    let parts: Vec<String> = segments
        .iter()
        .map(|seg| String::from_utf8_lossy(seg).into_owned())
        .collect();
    parts.join("/")
}
