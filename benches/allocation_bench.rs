//! Benchmarks for ChunkVault allocation and compaction

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use chunkvault::{ChunkStore, FreeSpaceMap, Reservation, BLOCK_SIZE, STORE_HEADER_BLOCKS};

/// Map with every other 4-block run used, up to `blocks`
fn checkerboard(blocks: u64) -> FreeSpaceMap {
    let mut map = FreeSpaceMap::new(STORE_HEADER_BLOCKS, BLOCK_SIZE);
    let mut block = STORE_HEADER_BLOCKS;
    while block < blocks {
        map.mark_used(block * BLOCK_SIZE, 4 * BLOCK_SIZE).unwrap();
        block += 8;
    }
    map
}

fn allocation_benchmarks(c: &mut Criterion) {
    let map = checkerboard(100_000);

    c.bench_function("allocate_small_fragmented", |b| {
        b.iter_batched(
            || map.clone(),
            |mut map| black_box(map.allocate(BLOCK_SIZE, Reservation::NONE)),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("allocate_large_fragmented", |b| {
        b.iter_batched(
            || map.clone(),
            |mut map| black_box(map.allocate(16 * BLOCK_SIZE, Reservation::NONE)),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("predict_with_reservation", |b| {
        let reservation = Reservation::bounded(STORE_HEADER_BLOCKS, 50_000);
        b.iter(|| black_box(map.predict_allocation(4, reservation)))
    });

    c.bench_function("move_priority", |b| {
        b.iter(|| black_box(map.move_priority(50_002)))
    });
}

fn store_benchmarks(c: &mut Criterion) {
    let payload = vec![0xA5u8; 10_000];

    c.bench_function("write_and_commit", |b| {
        b.iter_batched(
            || ChunkStore::in_memory().unwrap(),
            |store| {
                for _ in 0..16 {
                    store.write_chunk(&payload).unwrap();
                }
                store.commit().unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("compact_half_removed", |b| {
        b.iter_batched(
            || {
                let store = ChunkStore::in_memory().unwrap();
                let ids: Vec<u32> = (0..64)
                    .map(|_| store.write_chunk(&payload).unwrap().id)
                    .collect();
                store.commit().unwrap();
                for id in ids.iter().step_by(2) {
                    store.remove_chunk(*id).unwrap();
                }
                store.commit().unwrap();
                store
            },
            |store| black_box(store.compact_file(90, 16 * 1024 * 1024).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, allocation_benchmarks, store_benchmarks);
criterion_main!(benches);
