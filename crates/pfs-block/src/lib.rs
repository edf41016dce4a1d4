#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the `ByteDevice` trait for byte-addressed storage, file-backed
//! and in-memory implementations, and `ByteBlockDevice`, which translates
//! logical filesystem block numbers into byte ranges on the underlying
//! device using the configured geometry.

use parking_lot::Mutex;
use pfs_error::{PfsError, Result};
use pfs_types::{BlockNumber, Geometry};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

impl<T: ByteDevice + ?Sized> ByteDevice for &T {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_all_at(offset, buf)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Arc<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_all_at(offset, buf)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let len = u64::try_from(len)
        .map_err(|_| PfsError::Format("I/O length overflows u64".to_owned()))?;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| PfsError::Format("I/O range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(PfsError::Format(format!(
            "I/O out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// `std::os::unix::fs::FileExt` is thread-safe and does not require a
/// shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        trace!(target: "pfs::block", event = "open", len = len);
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }

    /// Create (or truncate) a backing file of `len` bytes.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(len)?;
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory byte device, zero-filled at creation.
#[derive(Debug)]
pub struct MemByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }

    /// Snapshot the device contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        check_range(offset, buf.len(), bytes.len() as u64)?;
        let offset = usize::try_from(offset)
            .map_err(|_| PfsError::Format("offset overflows usize".to_owned()))?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        check_range(offset, buf.len(), bytes.len() as u64)?;
        let offset = usize::try_from(offset)
            .map_err(|_| PfsError::Format("offset overflows usize".to_owned()))?;
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Block-addressed view over a byte device.
///
/// Sectors of the underlying device are assumed to be an integer multiple
/// of the filesystem block size; this wrapper aggregates them by issuing
/// one byte-range transfer per logical block.
#[derive(Debug)]
pub struct ByteBlockDevice<D> {
    inner: D,
    geometry: Geometry,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap `inner`, checking that the device is large enough for the
    /// geometry's block count.
    pub fn new(inner: D, geometry: Geometry) -> Result<Self> {
        let needed = geometry
            .block_count()
            .checked_mul(u64::from(geometry.block_size()))
            .ok_or_else(|| PfsError::Format("device size overflows u64".to_owned()))?;
        if inner.len_bytes() < needed {
            return Err(PfsError::Format(format!(
                "device too small: {} bytes for {} blocks of {}",
                inner.len_bytes(),
                geometry.block_count(),
                geometry.block_size()
            )));
        }
        Ok(Self { inner, geometry })
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.geometry.block_count()
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size()
    }

    fn offset_of(&self, block: BlockNumber) -> Result<u64> {
        self.geometry.block_offset(block).ok_or_else(|| {
            PfsError::Format(format!(
                "block {block} out of range (device has {} blocks)",
                self.geometry.block_count()
            ))
        })
    }

    /// Read one logical block.
    pub fn read_block(&self, block: BlockNumber) -> Result<Vec<u8>> {
        let offset = self.offset_of(block)?;
        let mut buf = vec![0_u8; self.geometry.block_size() as usize];
        self.inner.read_exact_at(offset, &mut buf)?;
        trace!(target: "pfs::block", event = "read", block = block.0);
        Ok(buf)
    }

    /// Write one logical block. `data.len()` must equal the block size.
    pub fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if data.len() != self.geometry.block_size() as usize {
            return Err(PfsError::Format(format!(
                "write of {} bytes to block {block}; block size is {}",
                data.len(),
                self.geometry.block_size()
            )));
        }
        let offset = self.offset_of(block)?;
        self.inner.write_all_at(offset, data)?;
        trace!(target: "pfs::block", event = "write", block = block.0);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    #[must_use]
    pub fn into_inner(self) -> D {
        self.inner
    }
}
