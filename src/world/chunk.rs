//! Chunk coordinates: the column buckets cells are loaded and synced in

use super::pos::CellPos;

/// log2 of a chunk's width and depth in cells
pub const CHUNK_SHIFT: u32 = 4;

/// Width and depth of a chunk column in cells
pub const CHUNK_WIDTH: i32 = 1 << CHUNK_SHIFT;

/// Integer coordinate identifying a chunk column in the world grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk column containing `pos`. Arithmetic shift floors negatives.
    pub fn of(pos: CellPos) -> Self {
        Self {
            x: pos.x >> CHUNK_SHIFT,
            z: pos.z >> CHUNK_SHIFT,
        }
    }

    /// Minimum x/z cell corner of this chunk (y is 0)
    pub fn origin(&self) -> CellPos {
        CellPos::new(self.x << CHUNK_SHIFT, 0, self.z << CHUNK_SHIFT)
    }

    /// Whether `pos` falls inside this column
    pub fn contains(&self, pos: CellPos) -> bool {
        Self::of(pos) == *self
    }
}

impl From<CellPos> for ChunkCoord {
    fn from(pos: CellPos) -> Self {
        Self::of(pos)
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_of_origin() {
        assert_eq!(ChunkCoord::of(CellPos::new(0, 0, 0)), ChunkCoord::new(0, 0));
        assert_eq!(ChunkCoord::of(CellPos::new(15, 200, 15)), ChunkCoord::new(0, 0));
        assert_eq!(ChunkCoord::of(CellPos::new(16, -64, 31)), ChunkCoord::new(1, 1));
    }

    #[test]
    fn test_chunk_of_negative() {
        // -1 belongs to chunk -1, not chunk 0
        assert_eq!(ChunkCoord::of(CellPos::new(-1, 0, -1)), ChunkCoord::new(-1, -1));
        assert_eq!(ChunkCoord::of(CellPos::new(-16, 0, -17)), ChunkCoord::new(-1, -2));
    }

    #[test]
    fn test_y_is_ignored() {
        let low = ChunkCoord::of(CellPos::new(5, -2000, 5));
        let high = ChunkCoord::of(CellPos::new(5, 2000, 5));
        assert_eq!(low, high);
    }

    #[test]
    fn test_origin_and_contains() {
        let coord = ChunkCoord::new(-2, 3);
        assert_eq!(coord.origin(), CellPos::new(-32, 0, 48));
        assert!(coord.contains(CellPos::new(-32, 7, 48)));
        assert!(coord.contains(CellPos::new(-17, 7, 63)));
        assert!(!coord.contains(CellPos::new(-16, 7, 48)));
    }
}
