//! Side effect toggles consulted when cells change.
//!
//! A [`SideEffectPolicy`] is shared between a session and its neighbor
//! notifier and is read at every decision point, so a change made mid-session
//! (for example bulk generation turning physics off) is seen by the very next
//! write or flush.

use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Secondary consequences of a cell write that may be suppressed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct SideEffects: u16 {
        /// Let the chunk run its own placement/removal hooks when a state is set.
        const UPDATE = 1 << 0;
        /// Fire events to external observers.
        const EVENTS = 1 << 1;
        /// Recompute lighting for changed cells.
        const LIGHTING = 1 << 2;
        /// Notify and update neighboring cells.
        const NEIGHBORS = 1 << 3;
        /// Validate states against their surroundings.
        const VALIDATION = 1 << 4;
        /// Update entity pathfinding.
        const ENTITY_AI = 1 << 5;
        /// Send changed cells to observers.
        const NETWORK = 1 << 6;
        /// Update points of interest.
        const POI_UPDATE = 1 << 7;
        /// Record the change in edit history.
        const HISTORY = 1 << 8;
        /// Update height maps.
        const HEIGHTMAPS = 1 << 9;
    }
}

impl SideEffects {
    /// The set a fresh session starts with: everything except entity AI.
    pub fn defaults() -> Self {
        Self::all().difference(Self::ENTITY_AI)
    }

    /// Check whether a side effect should run.
    pub fn should_apply(&self, effect: SideEffects) -> bool {
        self.contains(effect)
    }
}

impl Default for SideEffects {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Live, shareable side effect set.
#[derive(Debug)]
pub struct SideEffectPolicy {
    bits: AtomicU16,
}

impl SideEffectPolicy {
    /// Create a policy holding `effects`.
    pub fn new(effects: SideEffects) -> Self {
        Self {
            bits: AtomicU16::new(effects.bits()),
        }
    }

    /// Current set.
    pub fn current(&self) -> SideEffects {
        SideEffects::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Replace the whole set.
    pub fn set(&self, effects: SideEffects) {
        self.bits.store(effects.bits(), Ordering::Release);
    }

    /// Check a single toggle as of now.
    pub fn should_apply(&self, effect: SideEffects) -> bool {
        self.current().contains(effect)
    }

    /// Turn toggles on or off without touching the others.
    pub fn toggle(&self, effect: SideEffects, enabled: bool) {
        if enabled {
            self.bits.fetch_or(effect.bits(), Ordering::AcqRel);
        } else {
            self.bits.fetch_and(!effect.bits(), Ordering::AcqRel);
        }
    }
}

impl Default for SideEffectPolicy {
    fn default() -> Self {
        Self::new(SideEffects::defaults())
    }
}
