//! Pending write buffer.

use std::collections::HashMap;

use crate::scheduler::{HostCapability, OwnerKey};
use crate::world::{CellPos, ChunkCoord};

use super::sync::TouchedChunks;

/// Writes waiting to be applied on an owner thread, with the chunks they touch.
///
/// At most one state is kept per position; a later insert replaces it.
#[derive(Clone, Debug)]
pub struct PendingWrites<N> {
    cells: HashMap<CellPos, N>,
    chunks: TouchedChunks,
}

impl<N> Default for PendingWrites<N> {
    fn default() -> Self {
        Self {
            cells: HashMap::new(),
            chunks: TouchedChunks::default(),
        }
    }
}

impl<N> PendingWrites<N> {
    /// Buffer `state` at `pos` and record its chunk. Returns the number of
    /// buffered positions afterwards.
    pub fn insert(&mut self, pos: CellPos, state: N) -> usize {
        self.cells.insert(pos, state);
        self.chunks.record(ChunkCoord::of(pos));
        self.cells.len()
    }

    pub fn get(&self, pos: CellPos) -> Option<&N> {
        self.cells.get(&pos)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn chunks(&self) -> &TouchedChunks {
        &self.chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellPos, &N)> + '_ {
        self.cells.iter().map(|(pos, state)| (*pos, state))
    }

    /// Move everything out, leaving an empty buffer behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Split into one batch per owner.
    pub fn split_by_owner(self, host: HostCapability) -> HashMap<OwnerKey, PendingWrites<N>> {
        let mut batches = HashMap::new();
        if self.is_empty() {
            return batches;
        }
        if !host.is_region_partitioned() {
            batches.insert(OwnerKey::Global, self);
            return batches;
        }

        for (pos, state) in self.cells {
            batches
                .entry(host.owner_key(pos))
                .or_insert_with(PendingWrites::default)
                .cells
                .insert(pos, state);
        }
        for coord in self.chunks.iter() {
            if let Some(batch) = batches.get_mut(&host.owner_key_for_chunk(coord)) {
                batch.chunks.record(coord);
            }
        }
        batches
    }

    pub fn into_parts(self) -> (HashMap<CellPos, N>, TouchedChunks) {
        (self.cells, self.chunks)
    }
}
