//! Buffered, thread-affine write access to a world

pub mod buffer;
pub mod sync;
pub mod neighbor;
pub mod session;

pub use buffer::PendingWrites;
pub use sync::{ChunkSink, ChunkSyncTracker, NullSink, RecordingSink, TouchedChunks};
pub use neighbor::NeighborNotifier;
pub use session::{MutationAccess, SessionState, SessionStats};
