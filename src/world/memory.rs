//! In-memory reference engine.
//!
//! Stores cells in a hash map and records every engine call it receives, so
//! the ordering, thread affinity and propagation behaviour of the mutation
//! layer can be observed from tests, benches and the stress binary.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use super::chunk::ChunkCoord;
use super::engine::{ChunkAccess, EventOutcome, WorldEngine, WorldId};
use super::pos::CellPos;
use super::state::CellState;

/// One call received by a [`MemoryWorld`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCall {
    SetState {
        pos: CellPos,
        state: CellState,
        apply_update: bool,
    },
    RecomputeLight(CellPos),
    CellUpdated(CellPos),
    NeighborChanged(CellPos),
    OutputSignal(CellPos),
    IndirectShapes {
        pos: CellPos,
        state: CellState,
        recursion_limit: u32,
    },
    PhysicsEvent(CellPos),
    Placement {
        pos: CellPos,
        state: CellState,
    },
    NotifyCellUpdate(CellPos),
    MarkChanged(CellPos),
    StateChange(CellPos),
}

struct Shared {
    id: WorldId,
    cells: RwLock<HashMap<CellPos, CellState>>,
    record_calls: bool,
    calls: Mutex<Vec<EngineCall>>,
    write_threads: Mutex<HashSet<ThreadId>>,
    writes: AtomicU64,
    analog: RwLock<HashSet<CellState>>,
    idle_chunks: RwLock<HashSet<ChunkCoord>>,
    substitutions: RwLock<HashMap<CellState, CellState>>,
    cancel_physics: AtomicBool,
}

impl Shared {
    fn record(&self, call: EngineCall) {
        if self.record_calls {
            self.calls.lock().push(call);
        }
    }
}

/// Hash-map backed world implementing [`WorldEngine`].
pub struct MemoryWorld {
    shared: Arc<Shared>,
}

impl MemoryWorld {
    /// Create an empty world that records calls
    pub fn new(id: WorldId) -> Self {
        Self::build(id, true)
    }

    /// Create an empty world that keeps no call log (for long runs)
    pub fn without_call_log(id: WorldId) -> Self {
        Self::build(id, false)
    }

    fn build(id: WorldId, record_calls: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                cells: RwLock::new(HashMap::new()),
                record_calls,
                calls: Mutex::new(Vec::new()),
                write_threads: Mutex::new(HashSet::new()),
                writes: AtomicU64::new(0),
                analog: RwLock::new(HashSet::new()),
                idle_chunks: RwLock::new(HashSet::new()),
                substitutions: RwLock::new(HashMap::new()),
                cancel_physics: AtomicBool::new(false),
            }),
        }
    }

    /// Read a cell directly, bypassing any session
    pub fn state(&self, pos: CellPos) -> CellState {
        self.shared.cells.read().get(&pos).copied().unwrap_or(CellState::AIR)
    }

    /// Number of non-air cells stored
    pub fn cell_count(&self) -> usize {
        self.shared.cells.read().values().filter(|s| !s.is_air()).count()
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.calls.lock().clone()
    }

    /// Take and clear the call log
    pub fn take_calls(&self) -> Vec<EngineCall> {
        std::mem::take(&mut *self.shared.calls.lock())
    }

    /// Threads that have stored cell states
    pub fn write_threads(&self) -> HashSet<ThreadId> {
        self.shared.write_threads.lock().clone()
    }

    /// Total number of chunk writes
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::Relaxed)
    }

    /// Mark `state` as exposing an analog output signal
    pub fn set_analog_output(&self, state: CellState) {
        self.shared.analog.write().insert(state);
    }

    /// Mark a chunk ticking or idle. All chunks tick by default.
    pub fn set_ticking(&self, coord: ChunkCoord, ticking: bool) {
        let mut idle = self.shared.idle_chunks.write();
        if ticking {
            idle.remove(&coord);
        } else {
            idle.insert(coord);
        }
    }

    /// Make every physics event come back cancelled
    pub fn cancel_physics_events(&self, cancel: bool) {
        self.shared.cancel_physics.store(cancel, Ordering::Release);
    }

    /// Store `applied` whenever `requested` is written, like an engine
    /// correcting an invalid state.
    pub fn substitute(&self, requested: CellState, applied: CellState) {
        self.shared.substitutions.write().insert(requested, applied);
    }
}

/// Chunk handle into a [`MemoryWorld`].
#[derive(Clone)]
pub struct MemoryChunk {
    coord: ChunkCoord,
    shared: Arc<Shared>,
}

impl ChunkAccess for MemoryChunk {
    type Native = CellState;

    fn coord(&self) -> ChunkCoord {
        self.coord
    }

    fn state_at(&self, pos: CellPos) -> CellState {
        self.shared.cells.read().get(&pos).copied().unwrap_or(CellState::AIR)
    }

    fn set_state(&self, pos: CellPos, state: CellState, apply_update: bool) -> CellState {
        debug_assert!(self.coord.contains(pos), "{} is outside chunk {}", pos, self.coord);
        let applied = self
            .shared
            .substitutions
            .read()
            .get(&state)
            .copied()
            .unwrap_or(state);

        self.shared.cells.write().insert(pos, applied);
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        self.shared.write_threads.lock().insert(std::thread::current().id());
        self.shared.record(EngineCall::SetState {
            pos,
            state: applied,
            apply_update,
        });
        applied
    }

    fn is_ticking(&self) -> bool {
        !self.shared.idle_chunks.read().contains(&self.coord)
    }
}

impl WorldEngine for MemoryWorld {
    type Native = CellState;
    type Chunk = MemoryChunk;

    fn world_id(&self) -> WorldId {
        self.shared.id
    }

    fn chunk(&self, coord: ChunkCoord) -> MemoryChunk {
        MemoryChunk {
            coord,
            shared: self.shared.clone(),
        }
    }

    fn to_native(&self, state: CellState) -> CellState {
        state
    }

    fn from_native(&self, native: &CellState) -> CellState {
        *native
    }

    fn recompute_light(&self, pos: CellPos) {
        self.shared.record(EngineCall::RecomputeLight(pos));
    }

    fn cell_updated(&self, pos: CellPos, _old: &CellState) {
        self.shared.record(EngineCall::CellUpdated(pos));
    }

    fn neighbor_changed(&self, pos: CellPos, _source: &CellState) {
        self.shared.record(EngineCall::NeighborChanged(pos));
    }

    fn has_analog_output(&self, state: &CellState) -> bool {
        self.shared.analog.read().contains(state)
    }

    fn update_output_signal(&self, pos: CellPos, _state: &CellState) {
        self.shared.record(EngineCall::OutputSignal(pos));
    }

    fn update_indirect_shapes(&self, pos: CellPos, state: &CellState, recursion_limit: u32) {
        self.shared.record(EngineCall::IndirectShapes {
            pos,
            state: *state,
            recursion_limit,
        });
    }

    fn fire_physics_event(&self, pos: CellPos, _new: &CellState) -> EventOutcome {
        self.shared.record(EngineCall::PhysicsEvent(pos));
        if self.shared.cancel_physics.load(Ordering::Acquire) {
            EventOutcome::Cancelled
        } else {
            EventOutcome::Proceed
        }
    }

    fn trigger_placement(&self, pos: CellPos, state: &CellState, _recursion_limit: u32) {
        self.shared.record(EngineCall::Placement { pos, state: *state });
    }

    fn notify_cell_update(&self, pos: CellPos, _old: &CellState, _new: &CellState) {
        self.shared.record(EngineCall::NotifyCellUpdate(pos));
    }

    fn mark_cell_changed(&self, pos: CellPos) {
        self.shared.record(EngineCall::MarkChanged(pos));
    }

    fn on_state_change(&self, pos: CellPos, _old: &CellState, _new: &CellState) {
        self.shared.record(EngineCall::StateChange(pos));
    }
}
