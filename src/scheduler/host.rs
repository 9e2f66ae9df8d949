//! Host threading models and the owner keys they produce.

use serde::{Deserialize, Serialize};

use crate::world::{CellPos, ChunkCoord};

/// Threading model of the host running the world.
///
/// Supplied explicitly at construction; the scheduler never probes its
/// environment to guess.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostCapability {
    /// One thread owns every cell
    #[default]
    SingleOwnerThread,
    /// Each region of `2^region_shift` x `2^region_shift` chunks is owned by
    /// its own thread
    RegionPartitioned { region_shift: u32 },
}

impl HostCapability {
    /// Owner of the cell at `pos`
    pub fn owner_key(&self, pos: CellPos) -> OwnerKey {
        self.owner_key_for_chunk(ChunkCoord::of(pos))
    }

    /// Owner of every cell in `coord`
    pub fn owner_key_for_chunk(&self, coord: ChunkCoord) -> OwnerKey {
        match *self {
            HostCapability::SingleOwnerThread => OwnerKey::Global,
            HostCapability::RegionPartitioned { region_shift } => {
                OwnerKey::Region(RegionCoord::of_chunk(coord, region_shift))
            }
        }
    }

    /// Whether ownership is split by region
    pub fn is_region_partitioned(&self) -> bool {
        matches!(self, HostCapability::RegionPartitioned { .. })
    }
}

/// Coordinate of an independently threaded region
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
}

impl RegionCoord {
    /// Create a new region coordinate
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region containing chunk `coord`
    pub fn of_chunk(coord: ChunkCoord, region_shift: u32) -> Self {
        Self {
            x: coord.x >> region_shift,
            z: coord.z >> region_shift,
        }
    }
}

impl std::fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region({}, {})", self.x, self.z)
    }
}

/// Identifies the thread that must perform a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnerKey {
    /// The single global owner
    Global,
    /// Owner of one region
    Region(RegionCoord),
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKey::Global => write!(f, "global owner"),
            OwnerKey::Region(region) => write!(f, "{}", region),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single_owner() {
        assert_eq!(HostCapability::default(), HostCapability::SingleOwnerThread);
    }

    #[test]
    fn test_single_owner_is_global() {
        let host = HostCapability::SingleOwnerThread;
        assert_eq!(host.owner_key(CellPos::new(1000, 5, -1000)), OwnerKey::Global);
        assert!(!host.is_region_partitioned());
    }

    #[test]
    fn test_region_key_groups_chunks() {
        let host = HostCapability::RegionPartitioned { region_shift: 3 };
        // chunks 0..8 share region 0
        assert_eq!(
            host.owner_key(CellPos::new(0, 0, 0)),
            OwnerKey::Region(RegionCoord::new(0, 0))
        );
        assert_eq!(
            host.owner_key(CellPos::new(127, 0, 127)),
            OwnerKey::Region(RegionCoord::new(0, 0))
        );
        assert_eq!(
            host.owner_key(CellPos::new(128, 0, -1)),
            OwnerKey::Region(RegionCoord::new(1, -1))
        );
    }

    #[test]
    fn test_region_of_chunk_negative() {
        assert_eq!(RegionCoord::of_chunk(ChunkCoord::new(-1, -9), 3), RegionCoord::new(-1, -2));
    }
}
