//! Contract between the mutation layer and the voxel engine it drives.
//!
//! Everything here is implemented by the host engine. The mutation layer
//! only ever calls the mutating methods from the thread that owns the
//! affected cells.

use std::fmt::Debug;

use super::chunk::ChunkCoord;
use super::pos::CellPos;
use super::state::CellState;

/// Identifies a world when talking to collaborators outside the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(pub u32);

impl std::fmt::Display for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "world-{}", self.0)
    }
}

/// Outcome of an event offered to external observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Observers let the change propagate
    Proceed,
    /// An observer cancelled the event
    Cancelled,
}

impl EventOutcome {
    /// Whether the event was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EventOutcome::Cancelled)
    }
}

/// Handle to one loaded chunk column.
pub trait ChunkAccess {
    /// Engine-native cell state
    type Native;

    /// Coordinate of this chunk
    fn coord(&self) -> ChunkCoord;

    /// Native state stored at `pos`
    fn state_at(&self, pos: CellPos) -> Self::Native;

    /// Store `state` at `pos` and return what the chunk actually holds
    /// afterwards. `apply_update` lets the chunk run its own placement and
    /// removal hooks.
    fn set_state(&self, pos: CellPos, state: Self::Native, apply_update: bool) -> Self::Native;

    /// Whether the chunk is loaded far enough for notifications to matter
    fn is_ticking(&self) -> bool;
}

/// A voxel world whose cell storage must only be mutated from its owner.
pub trait WorldEngine: Send + Sync + 'static {
    /// Engine-native cell state
    type Native: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Chunk handle type
    type Chunk: ChunkAccess<Native = Self::Native>;

    /// Identity passed to external collaborators
    fn world_id(&self) -> WorldId;

    /// Fetch (loading if necessary) the chunk at `coord`
    fn chunk(&self, coord: ChunkCoord) -> Self::Chunk;

    /// Convert an abstract state into the engine's representation
    fn to_native(&self, state: CellState) -> Self::Native;

    /// Convert a native state back into an abstract one
    fn from_native(&self, native: &Self::Native) -> CellState;

    /// Recompute light at `pos`
    fn recompute_light(&self, pos: CellPos);

    /// Generic "cell updated" notification. The engine cascades to neighbors
    /// itself and fires a cancellable event to observers.
    fn cell_updated(&self, pos: CellPos, old: &Self::Native);

    /// Re-run physics for the cell at `pos` because `source` changed next to
    /// it. No observer events are fired.
    fn neighbor_changed(&self, pos: CellPos, source: &Self::Native);

    /// Whether `state` exposes an analog output signal
    fn has_analog_output(&self, state: &Self::Native) -> bool;

    /// Signal-specific neighbor update for analog outputs
    fn update_output_signal(&self, pos: CellPos, state: &Self::Native);

    /// Indirect (diagonal) shape updates derived from `state`
    fn update_indirect_shapes(&self, pos: CellPos, state: &Self::Native, recursion_limit: u32);

    /// Offer a cancellable "physics changed" event to observers
    fn fire_physics_event(&self, pos: CellPos, new: &Self::Native) -> EventOutcome;

    /// Run `state`'s placement trigger
    fn trigger_placement(&self, pos: CellPos, state: &Self::Native, recursion_limit: u32);

    /// Send a single-cell update to observers of the chunk
    fn notify_cell_update(&self, pos: CellPos, old: &Self::Native, new: &Self::Native);

    /// Mark a cell changed so the next chunk send includes it
    fn mark_cell_changed(&self, pos: CellPos);

    /// Engine bookkeeping after a state change (points of interest and similar)
    fn on_state_change(&self, pos: CellPos, old: &Self::Native, new: &Self::Native);
}
