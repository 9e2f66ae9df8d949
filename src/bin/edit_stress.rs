//! Edit stress binary: many parallel writers against one edit session.
//!
//! Usage: cargo run --release --bin edit_stress -- [OPTIONS]
//!
//! Options:
//!   --cells <N>        Distinct cells written per round (default: 65536)
//!   --rounds <N>       Times every cell is rewritten (default: 8)
//!   --jobs <N>         Rayon worker threads (default: 8)
//!   --threshold <N>    Auto-flush threshold (default: 1024)
//!   --regions <SHIFT>  Run a region-partitioned host with 2^SHIFT chunk regions
//!   --config <PATH>    Load an edit config from JSON (flags override it)
//!
//! Every cell's final state is checked against the last value written to it.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use cellbatch::access::{MutationAccess, NullSink};
use cellbatch::core::EditConfig;
use cellbatch::scheduler::{HostCapability, OwnerKey, RegionCoord, TaskScheduler};
use cellbatch::world::{CellPos, CellState, ChunkCoord, MemoryWorld, WorldId};

/// Cells along each horizontal axis of the edit area
const AREA_WIDTH: u32 = 256;

fn main() {
    cellbatch::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => EditConfig::load(&path).expect("Failed to load config"),
        None => EditConfig::default(),
    };
    if let Some(threshold) = parse_usize_arg(&args, "--threshold") {
        config.flush_threshold = threshold;
    }
    if let Some(shift) = parse_u32_arg(&args, "--regions") {
        config.scheduler.host = HostCapability::RegionPartitioned { region_shift: shift };
    }
    let cells = parse_u32_arg(&args, "--cells").unwrap_or(65536);
    let rounds = parse_u32_arg(&args, "--rounds").unwrap_or(8).max(1);
    let jobs = parse_usize_arg(&args, "--jobs").unwrap_or(8);

    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
        .expect("Failed to configure thread pool");

    let world = Arc::new(MemoryWorld::without_call_log(WorldId(0)));
    let scheduler = Arc::new(TaskScheduler::new(&config.scheduler).expect("Failed to start scheduler"));

    if let HostCapability::RegionPartitioned { region_shift } = config.scheduler.host {
        let mut regions: Vec<RegionCoord> = (0..cells)
            .map(|i| cell_pos(i).into())
            .map(|coord: ChunkCoord| RegionCoord::of_chunk(coord, region_shift))
            .collect();
        regions.sort();
        regions.dedup();
        for region in &regions {
            scheduler.load_region(*region).expect("Failed to load region");
        }
        log::info!("Loaded {} regions", regions.len());
    }

    let session = MutationAccess::new(&world, scheduler.clone(), Arc::new(NullSink), &config)
        .expect("Failed to open edit session");

    log::info!(
        "Writing {} cells x {} rounds on {} workers (threshold {}, {:?})",
        cells,
        rounds,
        jobs,
        config.flush_threshold,
        config.scheduler.host
    );

    let start = Instant::now();
    (0..cells).into_par_iter().for_each(|i| {
        let pos = cell_pos(i);
        for round in 0..rounds {
            if let Err(e) = session.set_state(pos, expected_state(i, round)) {
                log::error!("Write to {} failed: {}", pos, e);
                return;
            }
        }
    });
    let write_time = start.elapsed();

    let flush_start = Instant::now();
    session.flush().expect("Final flush failed");
    let flush_time = flush_start.elapsed();

    let mismatches = (0..cells)
        .into_par_iter()
        .filter(|&i| world.state(cell_pos(i)) != expected_state(i, rounds - 1))
        .count();

    let stats = session.stats();
    let sched = scheduler.stats();
    log::info!(
        "Writes: {:.1} ms, final flush: {:.1} ms, {:.0} writes/s",
        write_time.as_secs_f64() * 1000.0,
        flush_time.as_secs_f64() * 1000.0,
        (cells as f64 * rounds as f64) / (write_time + flush_time).as_secs_f64()
    );
    log::info!(
        "Session: {} buffered, {} direct, {} auto-flushes, {} applied, {} chunk resyncs",
        stats.buffered_writes,
        stats.direct_writes,
        stats.auto_flushes,
        stats.applied_writes,
        stats.resynced_chunks
    );
    log::info!(
        "Scheduler: {} completed, {} failed, {} panicked, {} deferred",
        sched.completed,
        sched.failed,
        sched.panicked,
        sched.deferred
    );

    if let Some(owner) = scheduler.owner_thread_id(OwnerKey::Global) {
        log::info!("Owner thread: {:?}", owner);
    }
    log::info!("Distinct writer threads seen by the world: {}", world.write_threads().len());

    if mismatches > 0 {
        log::error!("{} of {} cells do not hold their last written state", mismatches, cells);
        std::process::exit(1);
    }
    log::info!("All {} cells hold their last written state", cells);
}

fn cell_pos(i: u32) -> CellPos {
    let x = i % AREA_WIDTH;
    let z = (i / AREA_WIDTH) % AREA_WIDTH;
    let y = i / (AREA_WIDTH * AREA_WIDTH);
    CellPos::new(x as i32, y as i32, z as i32)
}

fn expected_state(i: u32, round: u32) -> CellState {
    // Zero is air; keep every written state non-empty
    CellState::from_id(1 + (i.wrapping_mul(31).wrapping_add(round) % 4096))
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
