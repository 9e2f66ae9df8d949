//! Cellbatch - thread-affine batched cell mutation for voxel worlds

pub mod core;
pub mod world;
pub mod side_effect;
pub mod scheduler;
pub mod access;

pub use crate::access::{ChunkSink, MutationAccess, NeighborNotifier};
pub use crate::core::{EditConfig, Error, Result, SchedulerConfig};
pub use crate::scheduler::{HostCapability, TaskScheduler};
pub use crate::side_effect::{SideEffectPolicy, SideEffects};
pub use crate::world::{CellPos, CellState, ChunkCoord, WorldEngine};
