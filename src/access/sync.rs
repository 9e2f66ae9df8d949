//! Touched chunk tracking and resynchronization.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::world::{ChunkCoord, WorldId};

/// External collaborator that pushes a chunk's current contents to observers.
pub trait ChunkSink: Send + Sync {
    /// Resend `coord` in `world` to everyone observing it.
    fn resync_chunk(&self, world: WorldId, coord: ChunkCoord);
}

/// Set of chunks holding buffered writes.
///
/// May contain chunks whose writes were overwritten or already applied; it
/// never misses a chunk with a pending write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TouchedChunks {
    chunks: HashSet<ChunkCoord>,
}

impl TouchedChunks {
    /// Record a chunk. Returns true if it was not already present.
    pub fn record(&mut self, coord: ChunkCoord) -> bool {
        self.chunks.insert(coord)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains(&coord)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.iter().copied()
    }
}

impl FromIterator<ChunkCoord> for TouchedChunks {
    fn from_iter<I: IntoIterator<Item = ChunkCoord>>(iter: I) -> Self {
        Self {
            chunks: iter.into_iter().collect(),
        }
    }
}

/// Calls the external resync once per distinct touched chunk.
pub struct ChunkSyncTracker {
    sink: Arc<dyn ChunkSink>,
    resynced: AtomicU64,
}

impl ChunkSyncTracker {
    pub fn new(sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            sink,
            resynced: AtomicU64::new(0),
        }
    }

    /// Resync every chunk in `chunks`. Order across chunks is unspecified.
    pub fn resync(&self, world: WorldId, chunks: &TouchedChunks) -> usize {
        for coord in chunks.iter() {
            self.sink.resync_chunk(world, coord);
        }
        let count = chunks.len();
        self.resynced.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            log::debug!("Resynced {} chunks in {}", count, world);
        }
        count
    }

    /// Total chunk resyncs requested through this tracker.
    pub fn resynced(&self) -> u64 {
        self.resynced.load(Ordering::Relaxed)
    }
}

/// Sink that remembers every resync request.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(WorldId, ChunkCoord)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far, in arrival order
    pub fn calls(&self) -> Vec<(WorldId, ChunkCoord)> {
        self.calls.lock().clone()
    }

    /// Distinct chunks resynced so far
    pub fn chunks(&self) -> HashSet<ChunkCoord> {
        self.calls.lock().iter().map(|(_, coord)| *coord).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl ChunkSink for RecordingSink {
    fn resync_chunk(&self, world: WorldId, coord: ChunkCoord) {
        self.calls.lock().push((world, coord));
    }
}

/// Sink that drops every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ChunkSink for NullSink {
    fn resync_chunk(&self, _world: WorldId, _coord: ChunkCoord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_deduplicates() {
        let mut touched = TouchedChunks::default();
        assert!(touched.record(ChunkCoord::new(0, 0)));
        assert!(!touched.record(ChunkCoord::new(0, 0)));
        assert!(touched.record(ChunkCoord::new(-1, 0)));
        assert_eq!(touched.len(), 2);
        assert!(touched.contains(ChunkCoord::new(-1, 0)));
    }

    #[test]
    fn test_resync_once_per_chunk() {
        let sink = Arc::new(RecordingSink::new());
        let tracker = ChunkSyncTracker::new(sink.clone());
        let touched: TouchedChunks = [ChunkCoord::new(0, 0), ChunkCoord::new(1, 0), ChunkCoord::new(0, 0)]
            .into_iter()
            .collect();

        assert_eq!(tracker.resync(WorldId(3), &touched), 2);
        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(world, _)| *world == WorldId(3)));
        assert_eq!(sink.chunks().len(), 2);
        assert_eq!(tracker.resynced(), 2);
    }

    #[test]
    fn test_resync_empty_set() {
        let tracker = ChunkSyncTracker::new(Arc::new(NullSink));
        assert_eq!(tracker.resync(WorldId(0), &TouchedChunks::default()), 0);
        assert_eq!(tracker.resynced(), 0);
    }
}
