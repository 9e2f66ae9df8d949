//! World-facing types: positions, chunks, states and the engine contract

pub mod pos;
pub mod chunk;
pub mod state;
pub mod engine;
pub mod handle;
pub mod memory;

pub use pos::{CellPos, Direction, NEIGHBOR_ORDER};
pub use chunk::{ChunkCoord, CHUNK_SHIFT, CHUNK_WIDTH};
pub use state::CellState;
pub use engine::{ChunkAccess, EventOutcome, WorldEngine, WorldId};
pub use handle::WorldHandle;
pub use memory::{EngineCall, MemoryChunk, MemoryWorld};
