//! Cell positions and axis directions

use glam::IVec3;

/// Integer coordinate identifying a single cell in the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellPos {
    /// Create a new cell position
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Position one step away in `direction`
    pub fn relative(&self, direction: Direction) -> Self {
        *self + direction.offset()
    }

    /// The six axis-aligned neighbors in notification order
    pub fn neighbors(&self) -> [CellPos; 6] {
        NEIGHBOR_ORDER.map(|direction| self.relative(direction))
    }
}

impl From<IVec3> for CellPos {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<CellPos> for IVec3 {
    fn from(pos: CellPos) -> Self {
        IVec3::new(pos.x, pos.y, pos.z)
    }
}

impl std::ops::Add<IVec3> for CellPos {
    type Output = CellPos;

    fn add(self, rhs: IVec3) -> CellPos {
        CellPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::fmt::Display for CellPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Axis-aligned direction. North is -Z, east is +X, up is +Y.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    East,
    West,
    Down,
    Up,
    North,
    South,
}

/// Order in which neighbors are visited when notifying without events.
pub const NEIGHBOR_ORDER: [Direction; 6] = [
    Direction::East,
    Direction::West,
    Direction::Down,
    Direction::Up,
    Direction::North,
    Direction::South,
];

impl Direction {
    /// Unit offset for this direction
    pub fn offset(self) -> IVec3 {
        match self {
            Direction::East => IVec3::X,
            Direction::West => IVec3::NEG_X,
            Direction::Down => IVec3::NEG_Y,
            Direction::Up => IVec3::Y,
            Direction::North => IVec3::NEG_Z,
            Direction::South => IVec3::Z,
        }
    }

    /// Direction pointing the other way
    pub fn opposite(self) -> Self {
        match self {
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Down => Direction::Up,
            Direction::Up => Direction::Down,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative() {
        let pos = CellPos::new(10, 64, -3);
        assert_eq!(pos.relative(Direction::East), CellPos::new(11, 64, -3));
        assert_eq!(pos.relative(Direction::Down), CellPos::new(10, 63, -3));
        assert_eq!(pos.relative(Direction::North), CellPos::new(10, 64, -4));
    }

    #[test]
    fn test_neighbor_order() {
        let neighbors = CellPos::new(0, 0, 0).neighbors();
        assert_eq!(
            neighbors,
            [
                CellPos::new(1, 0, 0),
                CellPos::new(-1, 0, 0),
                CellPos::new(0, -1, 0),
                CellPos::new(0, 1, 0),
                CellPos::new(0, 0, -1),
                CellPos::new(0, 0, 1),
            ]
        );
    }

    #[test]
    fn test_opposite_cancels_offset() {
        for direction in NEIGHBOR_ORDER {
            assert_eq!(direction.offset() + direction.opposite().offset(), IVec3::ZERO);
        }
    }

    #[test]
    fn test_ivec3_conversion() {
        let pos: CellPos = IVec3::new(1, 2, 3).into();
        assert_eq!(pos, CellPos::new(1, 2, 3));
        assert_eq!(IVec3::from(pos), IVec3::new(1, 2, 3));
    }
}
