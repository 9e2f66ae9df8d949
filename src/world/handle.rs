//! Validity-checked world references.

use std::sync::{Arc, Weak};

use crate::core::{Error, Result};
use super::engine::{WorldEngine, WorldId};

/// Non-owning reference to a world.
///
/// The host keeps the world alive; once it drops its last `Arc` every
/// access through the handle fails with [`Error::StaleWorld`].
pub struct WorldHandle<E> {
    world: Weak<E>,
    id: WorldId,
}

impl<E: WorldEngine> WorldHandle<E> {
    /// Create a handle to `world`
    pub fn new(world: &Arc<E>) -> Self {
        Self {
            world: Arc::downgrade(world),
            id: world.world_id(),
        }
    }

    /// Id captured when the handle was created
    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Borrow the world for the duration of one operation
    pub fn get(&self) -> Result<Arc<E>> {
        self.world
            .upgrade()
            .ok_or_else(|| Error::StaleWorld(format!("{} was unloaded", self.id)))
    }

    /// Whether the world is still loaded
    pub fn is_alive(&self) -> bool {
        self.world.strong_count() > 0
    }
}

impl<E> Clone for WorldHandle<E> {
    fn clone(&self) -> Self {
        Self {
            world: self.world.clone(),
            id: self.id,
        }
    }
}

impl<E> std::fmt::Debug for WorldHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldHandle")
            .field("id", &self.id)
            .field("alive", &(self.world.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::memory::MemoryWorld;

    #[test]
    fn test_handle_resolves_while_alive() {
        let world = Arc::new(MemoryWorld::new(WorldId(3)));
        let handle = WorldHandle::new(&world);
        assert!(handle.is_alive());
        assert_eq!(handle.get().unwrap().world_id(), WorldId(3));
        assert_eq!(handle.id(), WorldId(3));
    }

    #[test]
    fn test_handle_goes_stale() {
        let world = Arc::new(MemoryWorld::new(WorldId(1)));
        let handle = WorldHandle::new(&world);
        drop(world);

        assert!(!handle.is_alive());
        assert!(matches!(handle.get(), Err(Error::StaleWorld(_))));
    }
}
