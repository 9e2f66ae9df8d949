//! Propagation of a cell change to the cells around it.
//!
//! Called on the owner thread after a state has been stored. Both passes read
//! the [`SideEffectPolicy`] at the moment they run.

use std::sync::Arc;

use crate::core::Result;
use crate::side_effect::{SideEffectPolicy, SideEffects};
use crate::world::{CellPos, WorldEngine, WorldHandle};

/// Notifies and updates neighbors of changed cells.
pub struct NeighborNotifier<E: WorldEngine> {
    world: WorldHandle<E>,
    policy: Arc<SideEffectPolicy>,
}

impl<E: WorldEngine> NeighborNotifier<E> {
    pub fn new(world: WorldHandle<E>, policy: Arc<SideEffectPolicy>) -> Self {
        Self { world, policy }
    }

    /// Tell the cells around `pos` that it changed from `old` to `new`.
    ///
    /// With EVENTS on this is the engine's generic update, which cascades and
    /// lets observers react. With EVENTS off each of the six neighbors has its
    /// physics re-run directly, in east, west, down, up, north, south order.
    /// Analog output states additionally get a signal update.
    pub fn notify_neighbors(&self, pos: CellPos, old: &E::Native, new: &E::Native) -> Result<()> {
        let world = self.world.get()?;
        if self.policy.should_apply(SideEffects::EVENTS) {
            world.cell_updated(pos, old);
        } else {
            for neighbor in pos.neighbors() {
                world.neighbor_changed(neighbor, old);
            }
        }
        if world.has_analog_output(new) {
            world.update_output_signal(pos, new);
        }
        Ok(())
    }

    /// Shape and placement propagation for a change at `pos`.
    ///
    /// A cancelled physics event stops the pass before the placement trigger.
    pub fn update_neighbors(
        &self,
        pos: CellPos,
        old: &E::Native,
        new: &E::Native,
        recursion_limit: u32,
    ) -> Result<()> {
        let world = self.world.get()?;
        world.update_indirect_shapes(pos, old, recursion_limit);

        if self.policy.should_apply(SideEffects::EVENTS)
            && world.fire_physics_event(pos, new).is_cancelled()
        {
            log::trace!("Physics event at {} cancelled; skipping placement", pos);
            return Ok(());
        }

        world.trigger_placement(pos, new, recursion_limit);
        world.update_indirect_shapes(pos, new, recursion_limit);
        Ok(())
    }

    pub fn policy(&self) -> &Arc<SideEffectPolicy> {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::world::{CellState, EngineCall, MemoryWorld, WorldId};

    const OLD: CellState = CellState::from_id(1);
    const NEW: CellState = CellState::from_id(2);

    fn setup(effects: SideEffects) -> (Arc<MemoryWorld>, NeighborNotifier<MemoryWorld>) {
        let world = Arc::new(MemoryWorld::new(WorldId(0)));
        let notifier = NeighborNotifier::new(
            WorldHandle::new(&world),
            Arc::new(SideEffectPolicy::new(effects)),
        );
        (world, notifier)
    }

    #[test]
    fn test_events_off_visits_six_neighbors_in_order() {
        let (world, notifier) = setup(SideEffects::empty());
        let pos = CellPos::new(10, 64, 10);
        notifier.notify_neighbors(pos, &OLD, &NEW).unwrap();

        let expected = vec![
            EngineCall::NeighborChanged(CellPos::new(11, 64, 10)),
            EngineCall::NeighborChanged(CellPos::new(9, 64, 10)),
            EngineCall::NeighborChanged(CellPos::new(10, 63, 10)),
            EngineCall::NeighborChanged(CellPos::new(10, 65, 10)),
            EngineCall::NeighborChanged(CellPos::new(10, 64, 9)),
            EngineCall::NeighborChanged(CellPos::new(10, 64, 11)),
        ];
        assert_eq!(world.calls(), expected);
    }

    #[test]
    fn test_analog_output_adds_one_signal_update() {
        let (world, notifier) = setup(SideEffects::empty());
        world.set_analog_output(NEW);
        let pos = CellPos::new(0, 0, 0);
        notifier.notify_neighbors(pos, &OLD, &NEW).unwrap();

        let calls = world.calls();
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[6], EngineCall::OutputSignal(pos));

        // Only the new state's signal matters
        world.take_calls();
        notifier.notify_neighbors(pos, &NEW, &OLD).unwrap();
        assert!(!world.calls().contains(&EngineCall::OutputSignal(pos)));
    }

    #[test]
    fn test_events_on_uses_generic_update() {
        let (world, notifier) = setup(SideEffects::EVENTS);
        let pos = CellPos::new(3, 3, 3);
        notifier.notify_neighbors(pos, &OLD, &NEW).unwrap();
        assert_eq!(world.calls(), vec![EngineCall::CellUpdated(pos)]);
    }

    #[test]
    fn test_update_neighbors_full_pass() {
        let (world, notifier) = setup(SideEffects::EVENTS);
        let pos = CellPos::new(1, 2, 3);
        notifier.update_neighbors(pos, &OLD, &NEW, 16).unwrap();
        assert_eq!(
            world.calls(),
            vec![
                EngineCall::IndirectShapes { pos, state: OLD, recursion_limit: 16 },
                EngineCall::PhysicsEvent(pos),
                EngineCall::Placement { pos, state: NEW },
                EngineCall::IndirectShapes { pos, state: NEW, recursion_limit: 16 },
            ]
        );
    }

    #[test]
    fn test_cancelled_physics_event_stops_pass() {
        let (world, notifier) = setup(SideEffects::EVENTS);
        world.cancel_physics_events(true);
        let pos = CellPos::new(1, 2, 3);
        notifier.update_neighbors(pos, &OLD, &NEW, 512).unwrap();
        assert_eq!(
            world.calls(),
            vec![
                EngineCall::IndirectShapes { pos, state: OLD, recursion_limit: 512 },
                EngineCall::PhysicsEvent(pos),
            ]
        );
    }

    #[test]
    fn test_events_off_skips_physics_event() {
        let (world, notifier) = setup(SideEffects::empty());
        world.cancel_physics_events(true);
        let pos = CellPos::new(0, 0, 0);
        notifier.update_neighbors(pos, &OLD, &NEW, 4).unwrap();
        let calls = world.calls();
        assert_eq!(calls.len(), 3);
        assert!(!calls.contains(&EngineCall::PhysicsEvent(pos)));
    }

    #[test]
    fn test_policy_read_live() {
        let (world, notifier) = setup(SideEffects::EVENTS);
        let pos = CellPos::new(0, 0, 0);
        notifier.policy().set(SideEffects::empty());
        notifier.notify_neighbors(pos, &OLD, &NEW).unwrap();
        assert_eq!(world.calls().len(), 6);
    }

    #[test]
    fn test_stale_world() {
        let (world, notifier) = setup(SideEffects::EVENTS);
        drop(world);
        let err = notifier
            .notify_neighbors(CellPos::new(0, 0, 0), &OLD, &NEW)
            .unwrap_err();
        assert!(matches!(err, Error::StaleWorld(_)));
    }
}
