use criterion::{criterion_group, criterion_main, Criterion, black_box};

use std::sync::Arc;

use rayon::prelude::*;

use cellbatch::access::{MutationAccess, NullSink, PendingWrites};
use cellbatch::core::EditConfig;
use cellbatch::scheduler::{HostCapability, TaskScheduler};
use cellbatch::world::{CellPos, CellState, MemoryWorld, WorldId};

fn cube(side: i32) -> Vec<CellPos> {
    let mut cells = Vec::with_capacity((side * side * side) as usize);
    for y in 0..side {
        for z in 0..side {
            for x in 0..side {
                cells.push(CellPos::new(x, y, z));
            }
        }
    }
    cells
}

fn bench_buffer_insert(c: &mut Criterion) {
    let cells = cube(16);

    c.bench_function("buffer_insert_4096", |b| {
        b.iter(|| {
            let mut writes = PendingWrites::default();
            for pos in &cells {
                writes.insert(*pos, black_box(CellState::from_id(1)));
            }
            writes
        });
    });
}

fn bench_split_by_region(c: &mut Criterion) {
    let host = HostCapability::RegionPartitioned { region_shift: 1 };
    let mut writes = PendingWrites::default();
    for pos in cube(64) {
        writes.insert(pos, CellState::from_id(3));
    }

    c.bench_function("split_by_region_262144", |b| {
        b.iter(|| black_box(writes.clone()).split_by_owner(host));
    });
}

fn bench_session_flush(c: &mut Criterion) {
    let config = EditConfig::default();
    let scheduler = Arc::new(TaskScheduler::new(&config.scheduler).unwrap());
    let cells = cube(32);

    c.bench_function("session_write_flush_32768", |b| {
        b.iter(|| {
            let world = Arc::new(MemoryWorld::without_call_log(WorldId(0)));
            let session = MutationAccess::new(&world, scheduler.clone(), Arc::new(NullSink), &config).unwrap();
            for pos in &cells {
                session.set_state(*pos, CellState::from_id(5)).unwrap();
            }
            session.flush().unwrap();
            world
        });
    });
}

fn bench_parallel_writers(c: &mut Criterion) {
    let config = EditConfig::default();
    let scheduler = Arc::new(TaskScheduler::new(&config.scheduler).unwrap());
    let cells = cube(32);

    c.bench_function("parallel_write_flush_32768", |b| {
        b.iter(|| {
            let world = Arc::new(MemoryWorld::without_call_log(WorldId(0)));
            let session = MutationAccess::new(&world, scheduler.clone(), Arc::new(NullSink), &config).unwrap();
            cells.par_iter().for_each(|pos| {
                session.set_state(*pos, CellState::from_id(7)).unwrap();
            });
            session.flush().unwrap();
            world
        });
    });
}

criterion_group!(
    benches,
    bench_buffer_insert,
    bench_split_by_region,
    bench_session_flush,
    bench_parallel_writers,
);
criterion_main!(benches);
