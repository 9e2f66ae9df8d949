//! Engine-independent cell states

use serde::{Deserialize, Serialize};

/// Immutable value identifying a cell's material and configuration.
///
/// Two states are equal when their ids are equal. Engines map ids to and
/// from their native representation through
/// [`WorldEngine`](super::engine::WorldEngine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellState(u32);

impl CellState {
    /// The empty cell
    pub const AIR: CellState = CellState(0);

    /// Create a state from its id
    pub const fn from_id(id: u32) -> Self {
        Self(id)
    }

    /// Numeric id of this state
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Whether this is the empty cell
    pub const fn is_air(&self) -> bool {
        self.0 == 0
    }
}

impl Default for CellState {
    fn default() -> Self {
        Self::AIR
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "state#{}", self.0)
    }
}
