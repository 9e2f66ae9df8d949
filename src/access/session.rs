//! Batched, thread-affine cell mutation.
//!
//! A [`MutationAccess`] is the entry point an editing engine writes through.
//! Writes made on the thread that owns the cell are applied immediately.
//! Writes from anywhere else are buffered; when the buffer reaches the flush
//! threshold it is swapped out for an empty one and handed to the owner, and
//! the final [`MutationAccess::flush`] blocks until everything buffered so far
//! has been applied.
//!
//! Batches drained from the buffer wait in a per-owner queue until the owner
//! applies them, oldest first. A flush that runs inline on the owner drains
//! that queue before its own writes, so a newer write is never overwritten by
//! an older batch that happened to be scheduled earlier.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::EditConfig;
use crate::core::{Error, Result};
use crate::scheduler::{OwnerKey, TaskError, TaskResult, TaskScheduler};
use crate::side_effect::{SideEffectPolicy, SideEffects};
use crate::world::{CellPos, CellState, ChunkAccess, ChunkCoord, WorldEngine, WorldHandle, WorldId};

use super::buffer::PendingWrites;
use super::neighbor::NeighborNotifier;
use super::sync::{ChunkSink, ChunkSyncTracker};

/// Lifecycle of an edit session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// No write seen yet
    Created,
    /// Accepting writes
    Accumulating,
    /// Swapping a full buffer out for an auto-flush
    AutoFlushing,
    /// The final flush is running; new writes are rejected
    FinalFlushing,
    /// Final flush done
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Accumulating,
            2 => SessionState::AutoFlushing,
            3 => SessionState::FinalFlushing,
            _ => SessionState::Closed,
        }
    }

    fn is_open(self) -> bool {
        self < SessionState::FinalFlushing
    }
}

/// Session counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Writes applied immediately on the owner thread
    pub direct_writes: u64,
    /// Writes placed in the buffer
    pub buffered_writes: u64,
    /// Buffers handed to owners because they reached the threshold
    pub auto_flushes: u64,
    /// Buffered writes stored into the engine
    pub applied_writes: u64,
    /// Chunk resyncs requested
    pub resynced_chunks: u64,
}

#[derive(Default)]
struct Counters {
    direct_writes: AtomicU64,
    buffered_writes: AtomicU64,
    auto_flushes: AtomicU64,
    applied_writes: AtomicU64,
}

type Queued<N> = HashMap<OwnerKey, VecDeque<PendingWrites<N>>>;

struct Inner<E: WorldEngine> {
    world: WorldHandle<E>,
    scheduler: Arc<TaskScheduler>,
    policy: Arc<SideEffectPolicy>,
    notifier: NeighborNotifier<E>,
    // Lock order: buffer, then queued
    buffer: Mutex<PendingWrites<E::Native>>,
    queued: Mutex<Queued<E::Native>>,
    tracker: ChunkSyncTracker,
    flush_threshold: usize,
    recursion_limit: u32,
    state: AtomicU8,
    counters: Counters,
}

impl<E: WorldEngine> Inner<E> {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().is_open() {
            Ok(())
        } else {
            Err(Error::SessionClosed)
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) {
        let _ = self.state.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Move the buffer into the per-owner queues. Returns the owners that
    /// received a batch.
    fn enqueue(&self, buffer: &mut PendingWrites<E::Native>) -> Vec<OwnerKey> {
        let batches = buffer.take().split_by_owner(self.scheduler.host());
        let mut queued = self.queued.lock();
        let mut keys = Vec::with_capacity(batches.len());
        for (key, batch) in batches {
            log::trace!("Queued batch of {} writes for {}", batch.len(), key);
            queued.entry(key).or_default().push_back(batch);
            keys.push(key);
        }
        keys
    }

    /// Apply every queued batch for `key`, oldest first.
    fn drain(&self, key: OwnerKey) -> TaskResult {
        if !self.scheduler.is_owner_of(key) {
            return Err(TaskError::WrongThread);
        }
        let world = self.world.get()?;
        loop {
            let batch = {
                let mut queued = self.queued.lock();
                match queued.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(batch) => batch,
                    None => {
                        queued.remove(&key);
                        break;
                    }
                }
            };
            self.apply_batch(&world, batch);
        }
        Ok(())
    }

    fn apply_batch(&self, world: &E, batch: PendingWrites<E::Native>) {
        let apply_update = self.policy.should_apply(SideEffects::UPDATE);
        let (cells, chunks) = batch.into_parts();
        let count = cells.len();

        let mut handles: HashMap<ChunkCoord, E::Chunk> = HashMap::new();
        for (pos, native) in cells {
            let chunk = handles
                .entry(ChunkCoord::of(pos))
                .or_insert_with_key(|coord| world.chunk(*coord));
            chunk.set_state(pos, native, apply_update);
        }
        self.counters.applied_writes.fetch_add(count as u64, Ordering::Relaxed);

        let resynced = self.tracker.resync(world.world_id(), &chunks);
        log::trace!("Applied {} writes across {} chunks", count, resynced);
    }

    fn schedule_drain(self: &Arc<Self>, key: OwnerKey) {
        let inner = self.clone();
        self.scheduler.run_on_owner_in(key, move || inner.drain(key));
    }

    fn final_flush(self: &Arc<Self>) -> Result<()> {
        self.world.get()?;
        let keys: Vec<OwnerKey> = {
            let mut buffer = self.buffer.lock();
            self.enqueue(&mut buffer);
            self.queued.lock().keys().copied().collect()
        };

        let replies: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let inner = self.clone();
                (key, self.scheduler.submit_with_reply(key, move || inner.drain(key)))
            })
            .collect();

        for (key, reply) in replies {
            reply.wait()?.map_err(|e| match e {
                TaskError::World(e) => e,
                other => Error::OwnerUnavailable(format!("flush on {} failed: {}", key, other)),
            })?;
        }
        Ok(())
    }

    fn apply_side_effects_now(&self, world: &E, pos: CellPos, previous: CellState, new: CellState) -> Result<()> {
        let old = world.to_native(previous);
        let new = world.to_native(new);
        let chunk = world.chunk(ChunkCoord::of(pos));
        if chunk.state_at(pos) != new {
            log::trace!("{} changed again before side effects ran; skipping", pos);
            return Ok(());
        }

        if self.policy.should_apply(SideEffects::LIGHTING) {
            world.recompute_light(pos);
        }
        if chunk.is_ticking() {
            if self.policy.should_apply(SideEffects::NETWORK) {
                world.notify_cell_update(pos, &old, &new);
            } else {
                world.mark_cell_changed(pos);
            }
        }
        if self.policy.should_apply(SideEffects::NEIGHBORS) {
            self.notifier.notify_neighbors(pos, &old, &new)?;
            self.notifier.update_neighbors(pos, &old, &new, self.recursion_limit)?;
        }
        if self.policy.should_apply(SideEffects::POI_UPDATE) {
            world.on_state_change(pos, &old, &new);
        }
        Ok(())
    }
}

impl<E: WorldEngine> Inner<E> {
    /// Writes accepted but not yet applied, whether still buffered or
    /// queued for an owner.
    fn pending_writes(&self) -> usize {
        let buffer = self.buffer.lock();
        let queued: usize = self
            .queued
            .lock()
            .values()
            .flat_map(|batches| batches.iter().map(PendingWrites::len))
            .sum();
        buffer.len() + queued
    }
}

impl<E: WorldEngine> Drop for Inner<E> {
    fn drop(&mut self) {
        let unflushed = self.pending_writes();
        if unflushed > 0 {
            log::warn!("Edit session on {} dropped with {} unflushed writes", self.world.id(), unflushed);
        }
    }
}

/// Write access to one world for the duration of an edit.
///
/// Cheap to clone; clones share the same buffer and lifecycle, so one session
/// can be handed to many worker threads.
pub struct MutationAccess<E: WorldEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: WorldEngine> Clone for MutationAccess<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: WorldEngine> MutationAccess<E> {
    /// Start a session on `world`.
    ///
    /// The session holds only a weak reference; once the host drops the world
    /// every call fails with [`Error::StaleWorld`].
    pub fn new(
        world: &Arc<E>,
        scheduler: Arc<TaskScheduler>,
        sink: Arc<dyn ChunkSink>,
        config: &EditConfig,
    ) -> Result<Self> {
        config.validate()?;
        let handle = WorldHandle::new(world);
        let policy = Arc::new(SideEffectPolicy::new(config.side_effects));
        let notifier = NeighborNotifier::new(handle.clone(), policy.clone());

        log::debug!(
            "Edit session opened on {} (flush threshold {})",
            handle.id(),
            config.flush_threshold
        );

        Ok(Self {
            inner: Arc::new(Inner {
                world: handle,
                scheduler,
                policy,
                notifier,
                buffer: Mutex::new(PendingWrites::default()),
                queued: Mutex::new(HashMap::new()),
                tracker: ChunkSyncTracker::new(sink),
                flush_threshold: config.flush_threshold,
                recursion_limit: config.neighbor_recursion_limit,
                state: AtomicU8::new(SessionState::Created as u8),
                counters: Counters::default(),
            }),
        })
    }

    /// Set the cell at `pos`.
    ///
    /// On the owner thread the state is stored right away and the state the
    /// engine actually holds afterwards is returned. Anywhere else the write
    /// is buffered and `state` is returned; reaching the flush threshold
    /// hands the buffer to the owner without waiting for it.
    pub fn set_state(&self, pos: CellPos, state: CellState) -> Result<CellState> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let world = inner.world.get()?;
        inner.transition(SessionState::Created, SessionState::Accumulating);

        let key = inner.scheduler.owner_key(pos);
        let native = world.to_native(state);

        if inner.scheduler.is_owner_of(key) {
            let chunk = world.chunk(ChunkCoord::of(pos));
            let applied = chunk.set_state(pos, native, inner.policy.should_apply(SideEffects::UPDATE));
            inner.counters.direct_writes.fetch_add(1, Ordering::Relaxed);
            return Ok(world.from_native(&applied));
        }

        let keys = {
            let mut buffer = inner.buffer.lock();
            // Recheck under the lock: the final flush takes the buffer while
            // holding it, so nothing may be inserted after that.
            inner.ensure_open()?;
            let len = buffer.insert(pos, native);
            inner.counters.buffered_writes.fetch_add(1, Ordering::Relaxed);
            if len < inner.flush_threshold {
                return Ok(state);
            }
            inner.transition(SessionState::Accumulating, SessionState::AutoFlushing);
            let keys = inner.enqueue(&mut buffer);
            inner.transition(SessionState::AutoFlushing, SessionState::Accumulating);
            keys
        };

        inner.counters.auto_flushes.fetch_add(1, Ordering::Relaxed);
        log::debug!("Buffer reached {} writes; scheduling auto-flush", inner.flush_threshold);
        for key in keys {
            inner.schedule_drain(key);
        }
        Ok(state)
    }

    /// Apply every buffered write, resync the touched chunks and close the
    /// session.
    ///
    /// Runs inline on the owner thread and blocks until the owner is done
    /// otherwise. Fails with [`Error::SessionClosed`] if the session was
    /// already flushed. Writes racing with the flush are either applied by it
    /// or rejected with [`Error::SessionClosed`].
    ///
    /// Off the owner this blocks the calling thread, so it must not be called
    /// from async code running on a tokio worker; hand it to
    /// [`TaskScheduler::run_async`] or `spawn_blocking` instead.
    pub fn flush(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                SessionState::from_u8(s)
                    .is_open()
                    .then_some(SessionState::FinalFlushing as u8)
            })
            .map_err(|_| Error::SessionClosed)?;

        let result = inner.final_flush();
        inner.state.store(SessionState::Closed as u8, Ordering::Release);

        match &result {
            Ok(()) => {
                let stats = self.stats();
                log::debug!(
                    "Edit session on {} closed: {} buffered writes applied, {} chunks resynced",
                    inner.world.id(),
                    stats.applied_writes,
                    stats.resynced_chunks
                );
            }
            Err(e) => log::warn!("Final flush on {} failed: {}", inner.world.id(), e),
        }
        result
    }

    /// State at `pos` as this session sees it: a pending write if there is
    /// one, otherwise what the engine holds.
    pub fn get_state(&self, pos: CellPos) -> Result<CellState> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let world = inner.world.get()?;
        {
            let buffer = inner.buffer.lock();
            if let Some(native) = buffer.get(pos) {
                return Ok(world.from_native(native));
            }
            let queued = inner.queued.lock();
            let pending = queued
                .get(&inner.scheduler.owner_key(pos))
                .and_then(|batches| batches.iter().rev().find_map(|batch| batch.get(pos)));
            if let Some(native) = pending {
                return Ok(world.from_native(native));
            }
        }
        let chunk = world.chunk(ChunkCoord::of(pos));
        Ok(world.from_native(&chunk.state_at(pos)))
    }

    /// Replace the side effects consulted from now on.
    pub fn set_current_side_effect_set(&self, effects: SideEffects) {
        log::debug!("Side effects set to {:?}", effects);
        self.inner.policy.set(effects);
    }

    /// Side effects currently in force.
    pub fn side_effects(&self) -> SideEffects {
        self.inner.policy.current()
    }

    /// Run the secondary effects of `pos` changing from `previous` to `new`:
    /// lighting, observer updates, neighbor propagation and engine
    /// bookkeeping, each gated by its toggle.
    ///
    /// Nothing happens if the cell no longer holds `new` by the time this
    /// runs. Off the owner thread the work is queued to the owner.
    pub fn apply_side_effects(&self, pos: CellPos, previous: CellState, new: CellState) -> Result<()> {
        let world = self.inner.world.get()?;
        let key = self.inner.scheduler.owner_key(pos);
        if self.inner.scheduler.is_owner_of(key) {
            return self.inner.apply_side_effects_now(&world, pos, previous, new);
        }

        let inner = self.inner.clone();
        self.inner.scheduler.run_on_owner_in(key, move || {
            let world = inner.world.get()?;
            inner.apply_side_effects_now(&world, pos, previous, new)?;
            Ok(())
        });
        Ok(())
    }

    pub fn notifier(&self) -> &NeighborNotifier<E> {
        &self.inner.notifier
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.inner.scheduler
    }

    pub fn world_id(&self) -> WorldId {
        self.inner.world.id()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Number of positions in the buffer
    pub fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Number of chunks recorded alongside the buffer
    pub fn touched_chunk_count(&self) -> usize {
        self.inner.buffer.lock().chunks().len()
    }

    /// Batches handed to owners but not yet applied
    pub fn queued_batches(&self) -> usize {
        self.inner.queued.lock().values().map(VecDeque::len).sum()
    }

    /// Writes not yet applied to the world, buffered or queued.
    pub fn pending_writes(&self) -> usize {
        self.inner.pending_writes()
    }

    pub fn stats(&self) -> SessionStats {
        let counters = &self.inner.counters;
        SessionStats {
            direct_writes: counters.direct_writes.load(Ordering::Relaxed),
            buffered_writes: counters.buffered_writes.load(Ordering::Relaxed),
            auto_flushes: counters.auto_flushes.load(Ordering::Relaxed),
            applied_writes: counters.applied_writes.load(Ordering::Relaxed),
            resynced_chunks: self.inner.tracker.resynced(),
        }
    }
}
