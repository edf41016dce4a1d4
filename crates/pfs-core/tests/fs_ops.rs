#![forbid(unsafe_code)]
//! End-to-end engine tests on an in-memory device: format/mount, inline
//! and CTZ values, overwrite and delete semantics, directory trees,
//! chain splitting, and failure injection.

use parking_lot::Mutex;
use pfs_block::{ByteDevice, MemByteDevice};
use pfs_core::{format, Clock, EntryKind, Fs};
use pfs_error::PfsError;
use pfs_ondisk::tag::USERATTR_CTIME;
use pfs_ondisk::{AbstractType, Block, Entry};
use pfs_types::{read_le_u32, revision_newer, BlockPair};
use std::collections::HashSet;
use std::sync::Arc;

const BLOCK_SIZE: u32 = 4096;
const PBS: u32 = 16;
const BLOCKS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct FixedClock {
    days: u32,
    picoseconds: u64,
}

impl Clock for FixedClock {
    fn now(&self) -> (u32, u64) {
        (self.days, self.picoseconds)
    }
}

fn device() -> Arc<MemByteDevice> {
    Arc::new(MemByteDevice::new(BLOCK_SIZE as usize * BLOCKS))
}

fn mount(dev: &Arc<MemByteDevice>) -> Fs<Arc<MemByteDevice>, FixedClock> {
    format(&Arc::clone(dev), BLOCK_SIZE, PBS).expect("format");
    Fs::connect_with_clock(
        Arc::clone(dev),
        BLOCK_SIZE,
        PBS,
        FixedClock {
            days: 19_000,
            picoseconds: 42,
        },
    )
    .expect("connect")
}

fn raw_block(dev: &MemByteDevice, index: usize) -> Vec<u8> {
    let contents = dev.contents();
    contents[index * BLOCK_SIZE as usize..(index + 1) * BLOCK_SIZE as usize].to_vec()
}

#[test]
fn format_then_mount_reads_revision_two() {
    let dev = device();
    format(&Arc::clone(&dev), BLOCK_SIZE, PBS).expect("format");

    let leg0 = Block::of_cstruct(&raw_block(&dev, 0), PBS).expect("leg 0");
    let leg1 = Block::of_cstruct(&raw_block(&dev, 1), PBS).expect("leg 1");
    assert_eq!(leg0.revision_count, 1);
    assert_eq!(leg1.revision_count, 2);
    assert!(revision_newer(leg1.revision_count, leg0.revision_count));
    assert_eq!(leg0.entries(), leg1.entries());

    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");
    assert!(fs.list(&[]).expect("list").is_empty());
}

#[test]
fn connect_rejects_unformatted_device() {
    let dev = device();
    assert!(Fs::connect(dev, BLOCK_SIZE, PBS).is_err());
}

#[test]
fn connect_rejects_mismatched_block_size() {
    let dev = device();
    format(&Arc::clone(&dev), BLOCK_SIZE, PBS).expect("format");
    assert!(matches!(
        Fs::connect(Arc::clone(&dev), 512, PBS),
        Err(PfsError::Format(_))
    ));
}

#[test]
fn set_and_get_small_value() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"a", b"hello")
        .expect("set");
    assert_eq!(fs.get(&[b"a"]).expect("get"), b"hello");
    assert_eq!(fs.entry_kind(&[b"a"]).expect("kind"), EntryKind::Value);
}

#[test]
fn set_and_get_large_value() {
    let dev = device();
    let fs = mount(&dev);
    let data: Vec<u8> = (0..5000_u32).map(|i| (i % 251) as u8).collect();
    fs.set_in_directory(BlockPair::ROOT, b"big", &data)
        .expect("set");
    assert_eq!(fs.get(&[b"big"]).expect("get"), data);
}

#[test]
fn ctz_round_trip_at_boundaries() {
    let dev = Arc::new(MemByteDevice::new(BLOCK_SIZE as usize * 64));
    format(&Arc::clone(&dev), BLOCK_SIZE, PBS).expect("format");
    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");

    // 1025 is the smallest CTZ value at this block size; 4096/4097 and
    // 8188/8189 straddle the one- and two-block boundaries
    for (name, size) in [
        (b"s0".as_slice(), 1025_usize),
        (b"s1".as_slice(), 4096),
        (b"s2".as_slice(), 4097),
        (b"s3".as_slice(), 8188),
        (b"s4".as_slice(), 8189),
        (b"s5".as_slice(), 20_000),
    ] {
        let data: Vec<u8> = (0..size).map(|i| (i % 239) as u8).collect();
        fs.set_in_directory(BlockPair::ROOT, name, &data)
            .expect("set");
        assert_eq!(fs.get(&[name]).expect("get"), data, "size {size}");
    }
    // earlier values survive later allocations
    let data: Vec<u8> = (0..1025_usize).map(|i| (i % 239) as u8).collect();
    assert_eq!(fs.get(&[b"s0"]).expect("get"), data);
}

#[test]
fn mkdir_then_nested_set() {
    let dev = device();
    let fs = mount(&dev);
    fs.mkdir(&[b"d"]).expect("mkdir");
    fs.set_in_directory(
        fs.mkdir(&[b"d"]).expect("mkdir is idempotent"),
        b"f",
        b"v",
    )
    .expect("set");
    assert_eq!(fs.get(&[b"d", b"f"]).expect("get"), b"v");
    assert!(matches!(
        fs.get(&[b"d"]),
        Err(PfsError::ValueExpected(_))
    ));
    assert_eq!(
        fs.entry_kind(&[b"d"]).expect("kind"),
        EntryKind::Dictionary
    );
}

#[test]
fn mkdir_deep_chain() {
    let dev = device();
    let fs = mount(&dev);
    let pair = fs.mkdir(&[b"a", b"b", b"c"]).expect("mkdir");
    fs.set_in_directory(pair, b"leaf", b"value").expect("set");
    assert_eq!(fs.get(&[b"a", b"b", b"c", b"leaf"]).expect("get"), b"value");

    let listing = fs.list(&[b"a", b"b"]).expect("list");
    assert_eq!(listing, vec![(b"c".to_vec(), EntryKind::Dictionary)]);
}

#[test]
fn mkdir_over_value_is_rejected() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"v", b"data")
        .expect("set");
    assert!(matches!(
        fs.mkdir(&[b"v"]),
        Err(PfsError::DictionaryExpected(_))
    ));
}

#[test]
fn get_through_value_segment_is_not_found() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"v", b"data")
        .expect("set");
    assert!(matches!(
        fs.get(&[b"v", b"x"]),
        Err(PfsError::NotFound(_))
    ));
    assert!(matches!(
        fs.get(&[b"missing", b"x"]),
        Err(PfsError::NotFound(_))
    ));
}

#[test]
fn empty_key_is_value_expected() {
    let dev = device();
    let fs = mount(&dev);
    assert!(matches!(fs.get(&[]), Err(PfsError::ValueExpected(_))));
    assert!(matches!(
        fs.set_in_directory(BlockPair::ROOT, b"", b"x"),
        Err(PfsError::ValueExpected(_))
    ));
}

#[test]
fn overwrite_inline_with_ctz() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"a", b"v1")
        .expect("set inline");
    let big: Vec<u8> = (0..5000_u32).map(|i| (i % 131) as u8).collect();
    fs.set_in_directory(BlockPair::ROOT, b"a", &big)
        .expect("overwrite");
    assert_eq!(fs.get(&[b"a"]).expect("get"), big);

    // the old id is tombstoned in the same commit: exactly one live name
    let listing = fs.list(&[]).expect("list");
    assert_eq!(listing, vec![(b"a".to_vec(), EntryKind::Value)]);
}

#[test]
fn overwrite_twice_returns_latest() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"k", b"v1").expect("set");
    fs.set_in_directory(BlockPair::ROOT, b"k", b"v2").expect("set");
    assert_eq!(fs.get(&[b"k"]).expect("get"), b"v2");
    assert_eq!(fs.list(&[]).expect("list").len(), 1);
}

#[test]
fn delete_is_idempotent() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"k", b"v").expect("set");
    fs.delete_in_directory(BlockPair::ROOT, b"k").expect("delete");
    fs.delete_in_directory(BlockPair::ROOT, b"k")
        .expect("second delete");
    assert!(matches!(fs.get(&[b"k"]), Err(PfsError::NotFound(_))));
    fs.delete_in_directory(BlockPair::ROOT, b"never-existed")
        .expect("deleting an absent name succeeds");
}

#[test]
fn ctime_entry_is_stamped() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"t", b"x").expect("set");
    drop(fs);

    let block = Block::of_cstruct(&raw_block(&dev, 0), PBS).expect("parse");
    let ctime = block
        .entries()
        .into_iter()
        .find(|entry| {
            entry.tag.abstract_type == AbstractType::UserAttr && entry.tag.chunk == USERATTR_CTIME
        })
        .expect("ctime entry");
    assert_eq!(ctime.data.len(), 12);
    assert_eq!(read_le_u32(&ctime.data, 0).expect("days"), 19_000);
}

#[test]
fn directory_chain_splits_and_stays_readable() {
    let dev = Arc::new(MemByteDevice::new(BLOCK_SIZE as usize * 64));
    format(&Arc::clone(&dev), BLOCK_SIZE, PBS).expect("format");
    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");

    // enough 150-byte values to overflow the root block several times
    let count = 60;
    for i in 0..count {
        let name = format!("key-{i:03}");
        let value = vec![i as u8; 150];
        fs.set_in_directory(BlockPair::ROOT, name.as_bytes(), &value)
            .expect("set");
    }
    for i in 0..count {
        let name = format!("key-{i:03}");
        assert_eq!(
            fs.get(&[name.as_bytes()]).expect("get"),
            vec![i as u8; 150],
            "{name}"
        );
    }
    assert_eq!(fs.list(&[]).expect("list").len(), count);

    // remount and read everything back again
    drop(fs);
    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("reconnect");
    for i in 0..count {
        let name = format!("key-{i:03}");
        assert_eq!(fs.get(&[name.as_bytes()]).expect("get"), vec![i as u8; 150]);
    }
}

#[test]
fn fill_until_no_space_leaves_no_partial_file() {
    let dev = device();
    let fs = mount(&dev);

    let mut written = Vec::new();
    let mut failed = None;
    for i in 0..10_000 {
        let name = format!("f{i:04}");
        let value = vec![0x5A_u8; 200];
        match fs.set_in_directory(BlockPair::ROOT, name.as_bytes(), &value) {
            Ok(()) => written.push(name),
            Err(PfsError::NoSpace) => {
                failed = Some(name);
                break;
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    let failed = failed.expect("device should fill up");
    assert!(!written.is_empty());

    // the failed set left nothing visible
    assert!(matches!(
        fs.get(&[failed.as_bytes()]),
        Err(PfsError::NotFound(_))
    ));
    // everything committed before the failure is intact
    for name in &written {
        assert_eq!(
            fs.get(&[name.as_bytes()]).expect("get"),
            vec![0x5A_u8; 200],
            "{name}"
        );
    }
}

#[test]
fn last_block_of_chain_wins_for_duplicate_names() {
    // forge an image where "x" lives in two blocks of the root chain
    let dev = device();
    let geometry = pfs_types::Geometry::new(BLOCK_SIZE, PBS, BLOCKS as u64).expect("geometry");
    let superblock = pfs_ondisk::Superblock::for_geometry(geometry).expect("superblock");

    let tail_pair = BlockPair::new(2, 3);
    let root = Block::of_entries(
        1,
        vec![
            Entry::superblock_name(),
            Entry::inline_struct(0, superblock.to_bytes().to_vec()),
            Entry::file_name(1, b"x"),
            Entry::inline_struct(1, b"old".to_vec()),
            Entry::hardtail(tail_pair).expect("hardtail"),
        ],
    );
    let tail = Block::of_entries(
        1,
        vec![
            Entry::file_name(1, b"x"),
            Entry::inline_struct(1, b"new".to_vec()),
        ],
    );

    for (block, legs) in [(&root, [0_u64, 1]), (&tail, [2, 3])] {
        let mut buf = vec![0_u8; BLOCK_SIZE as usize];
        assert_eq!(
            block.into_cstruct(&mut buf, PBS),
            pfs_ondisk::SerializeStatus::Ok
        );
        for leg in legs {
            dev.write_all_at(leg * u64::from(BLOCK_SIZE), &buf)
                .expect("write leg");
        }
    }

    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");
    assert_eq!(fs.get(&[b"x"]).expect("get"), b"new");
}

#[test]
fn tailed_block_overflow_is_refused_not_destroyed() {
    // forge a root that already carries a hardtail, then grow it by
    // overwriting its names with larger values; once the compacted block
    // no longer fits it cannot split again, and the commit must be
    // refused without touching the pair
    let dev = device();
    let geometry = pfs_types::Geometry::new(BLOCK_SIZE, PBS, BLOCKS as u64).expect("geometry");
    let superblock = pfs_ondisk::Superblock::for_geometry(geometry).expect("superblock");

    let tail_pair = BlockPair::new(2, 3);
    let mut root_entries = vec![
        Entry::superblock_name(),
        Entry::inline_struct(0, superblock.to_bytes().to_vec()),
    ];
    for i in 0..5_u16 {
        root_entries.push(Entry::file_name(1 + i, format!("n{i}").as_bytes()));
        root_entries.push(Entry::ctime(1 + i, 0, 0));
        root_entries.push(Entry::inline_struct(1 + i, vec![i as u8; 10]));
    }
    root_entries.push(Entry::hardtail(tail_pair).expect("hardtail"));
    let root = Block::of_entries(1, root_entries);
    let tail = Block::of_entries(
        1,
        vec![Entry::file_name(1, b"t"), Entry::inline_struct(1, b"x".to_vec())],
    );
    for (block, legs) in [(&root, [0_u64, 1]), (&tail, [2, 3])] {
        let mut buf = vec![0_u8; BLOCK_SIZE as usize];
        assert_eq!(
            block.into_cstruct(&mut buf, PBS),
            pfs_ondisk::SerializeStatus::Ok
        );
        for leg in legs {
            dev.write_all_at(leg * u64::from(BLOCK_SIZE), &buf)
                .expect("write leg");
        }
    }

    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");
    let big = vec![0xAA_u8; 1020];
    let mut succeeded = Vec::new();
    let mut refused = None;
    for i in 0..5 {
        let name = format!("n{i}");
        match fs.set_in_directory(BlockPair::ROOT, name.as_bytes(), &big) {
            Ok(()) => succeeded.push(i),
            Err(PfsError::NoSpace) => {
                refused = Some(i);
                break;
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(succeeded, vec![0, 1, 2]);
    assert_eq!(refused, Some(3));

    // the refused commit left the chain fully readable: overwritten
    // names carry the new value, the rest their originals
    for i in 0..5 {
        let name = format!("n{i}");
        let value = fs.get(&[name.as_bytes()]).expect("get");
        if succeeded.contains(&i) {
            assert_eq!(value, big, "{name}");
        } else {
            assert_eq!(value, vec![i as u8; 10], "{name}");
        }
    }
    assert_eq!(fs.get(&[b"t"]).expect("tail name"), b"x");
}

#[test]
fn ctz_spill_then_split_without_space_fails_cleanly() {
    // a near-full root plus a value big enough to drain the allocator:
    // the split that follows must not be handed the file's in-flight
    // data blocks by a lookahead refill that cannot see them yet
    let dev = Arc::new(MemByteDevice::new(BLOCK_SIZE as usize * 32));
    let geometry = pfs_types::Geometry::new(BLOCK_SIZE, PBS, 32).expect("geometry");
    let superblock = pfs_ondisk::Superblock::for_geometry(geometry).expect("superblock");

    let mut root_entries = vec![
        Entry::superblock_name(),
        Entry::inline_struct(0, superblock.to_bytes().to_vec()),
    ];
    for i in 0..3_u16 {
        root_entries.push(Entry::file_name(1 + i, format!("n{i}").as_bytes()));
        root_entries.push(Entry::ctime(1 + i, 0, 0));
        root_entries.push(Entry::inline_struct(1 + i, vec![i as u8; 1316]));
    }
    let root = Block::of_entries(1, root_entries);
    let mut buf = vec![0_u8; BLOCK_SIZE as usize];
    assert_eq!(
        root.into_cstruct(&mut buf, PBS),
        pfs_ondisk::SerializeStatus::Ok
    );
    for leg in [0_u64, 1] {
        dev.write_all_at(leg * u64::from(BLOCK_SIZE), &buf)
            .expect("write leg");
    }

    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");
    let big: Vec<u8> = (0..118_000_u32).map(|i| (i % 251) as u8).collect();
    assert!(matches!(
        fs.set_in_directory(BlockPair::ROOT, b"big", &big),
        Err(PfsError::NoSpace)
    ));

    // nothing of the failed file is visible and the old values survive
    assert!(matches!(fs.get(&[b"big"]), Err(PfsError::NotFound(_))));
    for i in 0..3 {
        let name = format!("n{i}");
        assert_eq!(
            fs.get(&[name.as_bytes()]).expect("get"),
            vec![i as u8; 1316],
            "{name}"
        );
    }
}

// ── failure injection ───────────────────────────────────────────────────

#[derive(Debug)]
struct FailingDevice {
    inner: MemByteDevice,
    fail_write_offsets: Mutex<HashSet<u64>>,
}

impl FailingDevice {
    fn new(len: usize) -> Self {
        Self {
            inner: MemByteDevice::new(len),
            fail_write_offsets: Mutex::new(HashSet::new()),
        }
    }

    fn fail_writes_to_block(&self, block: u64) {
        self.fail_write_offsets
            .lock()
            .insert(block * u64::from(BLOCK_SIZE));
    }
}

impl ByteDevice for FailingDevice {
    fn len_bytes(&self) -> u64 {
        self.inner.len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> pfs_error::Result<()> {
        self.inner.read_exact_at(offset, buf)
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> pfs_error::Result<()> {
        if self.fail_write_offsets.lock().contains(&offset) {
            return Err(PfsError::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.write_all_at(offset, buf)
    }

    fn sync(&self) -> pfs_error::Result<()> {
        self.inner.sync()
    }
}

#[test]
fn failed_first_leg_write_keeps_older_state() {
    let dev = Arc::new(FailingDevice::new(BLOCK_SIZE as usize * BLOCKS));
    format(&Arc::clone(&dev), BLOCK_SIZE, PBS).expect("format");
    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");

    fs.set_in_directory(BlockPair::ROOT, b"old", b"v1").expect("set");

    // both legs of the root pair refuse writes: the op fails cleanly
    dev.fail_writes_to_block(0);
    dev.fail_writes_to_block(1);
    assert!(fs.set_in_directory(BlockPair::ROOT, b"new", b"v2").is_err());

    assert_eq!(fs.get(&[b"old"]).expect("get"), b"v1");
    assert!(matches!(fs.get(&[b"new"]), Err(PfsError::NotFound(_))));
}

#[test]
fn failed_second_leg_write_leaves_newer_leg_visible() {
    let dev = Arc::new(FailingDevice::new(BLOCK_SIZE as usize * BLOCKS));
    format(&Arc::clone(&dev), BLOCK_SIZE, PBS).expect("format");
    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");

    // only the second leg fails; the first leg carries the new revision
    dev.fail_writes_to_block(1);
    assert!(fs.set_in_directory(BlockPair::ROOT, b"k", b"v").is_err());
    assert_eq!(fs.get(&[b"k"]).expect("get"), b"v");
}

#[test]
fn corrupt_leg_falls_back_to_readable_leg() {
    let dev = device();
    let fs = mount(&dev);
    fs.set_in_directory(BlockPair::ROOT, b"k", b"v").expect("set");
    drop(fs);

    // trash leg 1 of the root pair
    dev.write_all_at(u64::from(BLOCK_SIZE), &vec![0xFF_u8; 64])
        .expect("corrupt");

    let fs = Fs::connect(Arc::clone(&dev), BLOCK_SIZE, PBS).expect("connect");
    assert_eq!(fs.get(&[b"k"]).expect("get"), b"v");
}
