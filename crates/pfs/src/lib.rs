#![forbid(unsafe_code)]
//! PebbleFS: a log-structured, copy-on-write filesystem for small block
//! devices.
//!
//! This crate re-exports the engine and wraps it in a string-keyed
//! interface: hierarchical keys like `/logs/boot` are split into byte
//! segments and resolved against the directory tree.

pub use pfs_block::{ByteDevice, FileByteDevice, MemByteDevice};
pub use pfs_core::{format, Clock, DirLookup, EntryKind, Fs, SystemClock};
pub use pfs_error::{PfsError, Result};
pub use pfs_ondisk as ondisk;
pub use pfs_types::{BlockNumber, BlockPair, Geometry};

/// Split a `/`-separated key into byte segments. Repeated and trailing
/// separators collapse; the empty key yields no segments.
#[must_use]
pub fn segments(key: &str) -> Vec<&[u8]> {
    key.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::as_bytes)
        .collect()
}

/// String-keyed view over a mounted filesystem.
pub struct Pebble<D, C = SystemClock> {
    inner: Fs<D, C>,
}

impl<D: ByteDevice> Pebble<D, SystemClock> {
    /// Format `device` and leave it ready to mount.
    pub fn format(device: &D, block_size: u32, program_block_size: u32) -> Result<()> {
        format(device, block_size, program_block_size)
    }

    /// Mount `device`.
    pub fn connect(device: D, block_size: u32, program_block_size: u32) -> Result<Self> {
        Ok(Self {
            inner: Fs::connect(device, block_size, program_block_size)?,
        })
    }
}

impl<D: ByteDevice, C: Clock> Pebble<D, C> {
    /// Mount `device`, stamping new entries with `clock`.
    pub fn connect_with_clock(
        device: D,
        block_size: u32,
        program_block_size: u32,
        clock: C,
    ) -> Result<Self> {
        Ok(Self {
            inner: Fs::connect_with_clock(device, block_size, program_block_size, clock)?,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &Fs<D, C> {
        &self.inner
    }

    /// Read the value at `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(&segments(key))
    }

    /// Create or replace the value at `key`. Parent directories must
    /// already exist.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let segments = segments(key);
        let Some((basename, parents)) = segments.split_last() else {
            return Err(PfsError::ValueExpected(key.to_owned()));
        };
        let pair = self.resolve_parent(parents)?;
        self.inner.set_in_directory(pair, basename, value)
    }

    /// Remove the value at `key`. Removing an absent key — or a key under
    /// an absent directory — succeeds silently.
    pub fn remove(&self, key: &str) -> Result<()> {
        let segments = segments(key);
        let Some((basename, parents)) = segments.split_last() else {
            return Ok(());
        };
        let pair = match self.resolve_parent(parents) {
            Ok(pair) => pair,
            Err(PfsError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        self.inner.delete_in_directory(pair, basename)
    }

    /// Create the directory chain at `key`, parents included.
    pub fn mkdir(&self, key: &str) -> Result<()> {
        self.inner.mkdir(&segments(key)).map(|_| ())
    }

    /// Names and kinds inside the directory at `key` (`"/"` for the
    /// root).
    pub fn list(&self, key: &str) -> Result<Vec<(String, EntryKind)>> {
        Ok(self
            .inner
            .list(&segments(key))?
            .into_iter()
            .map(|(name, kind)| (String::from_utf8_lossy(&name).into_owned(), kind))
            .collect())
    }

    fn resolve_parent(&self, parents: &[&[u8]]) -> Result<BlockPair> {
        if parents.is_empty() {
            return Ok(BlockPair::ROOT);
        }
        match self
            .inner
            .find_first_blockpair_of_directory(BlockPair::ROOT, parents)?
        {
            DirLookup::BasenameOn(pair) => Ok(pair),
            DirLookup::NoId(segment) => Err(PfsError::NotFound(
                String::from_utf8_lossy(&segment).into_owned(),
            )),
            DirLookup::NoStructs | DirLookup::NoEntry => Err(PfsError::DictionaryExpected(
                parents
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment).into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
            )),
        }
    }
}
