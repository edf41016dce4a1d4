use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pfs_ondisk::{Block, Entry};

fn bench_block_codec(c: &mut Criterion) {
    let mut block = Block::of_entries(1, vec![Entry::superblock_name()]);
    for id in 1..32 {
        block = block.add_commit(vec![
            Entry::file_name(id, format!("file-{id}").as_bytes()),
            Entry::inline_struct(id, vec![0x5A; 64]),
        ]);
    }
    let mut buf = vec![0_u8; 16384];
    assert_eq!(
        block.into_cstruct(&mut buf, 16),
        pfs_ondisk::SerializeStatus::Ok
    );

    c.bench_function("block_serialize", |b| {
        b.iter(|| {
            let mut out = vec![0_u8; 16384];
            black_box(&block).into_cstruct(&mut out, 16)
        });
    });

    c.bench_function("block_parse", |b| {
        b.iter(|| Block::of_cstruct(black_box(&buf), 16).expect("parse"));
    });
}

criterion_group!(benches, bench_block_codec);
criterion_main!(benches);
