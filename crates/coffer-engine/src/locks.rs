use std::time::Instant;

use dashmap::DashMap;
use tracing::warn;

use coffer_core::{ActorId, ContainerId};

/// Lock phases for a single container. Absence of an entry means FREE.
///
/// The two-phase shape exists because open has a suspension point between
/// claiming the container and committing the session: RESERVED marks the
/// claim, LOCKED marks a live edit session. Either way the container is
/// unavailable to other actors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockPhase {
    Reserved,
    Locked,
}

#[derive(Clone, Debug)]
struct LockState {
    phase: LockPhase,
    holder: ActorId,
    since: Instant,
}

/// Per-container edit locks. All transitions are atomic via the map's
/// per-entry locking, so N racing reservations yield exactly one winner.
#[derive(Default)]
pub struct LockManager {
    locks: DashMap<ContainerId, LockState>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// FREE -> RESERVED. Re-reserving one's own RESERVED lock refreshes it;
    /// anything else held by anyone fails.
    pub fn try_reserve(&self, container: &ContainerId, holder: &ActorId) -> bool {
        match self.locks.entry(container.clone()) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(LockState {
                    phase: LockPhase::Reserved,
                    holder: holder.clone(),
                    since: Instant::now(),
                });
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if state.phase == LockPhase::Reserved && state.holder == *holder {
                    state.since = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// RESERVED -> LOCKED, only for the reserving actor.
    pub fn confirm(&self, container: &ContainerId, holder: &ActorId) -> bool {
        match self.locks.get_mut(container) {
            Some(mut state)
                if state.phase == LockPhase::Reserved && state.holder == *holder =>
            {
                state.phase = LockPhase::Locked;
                state.since = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Any state -> FREE, only for the holding actor. Releasing a free lock
    /// is a no-op, so abort paths can release unconditionally.
    pub fn release(&self, container: &ContainerId, holder: &ActorId) {
        self.locks
            .remove_if(container, |_, state| state.holder == *holder);
    }

    /// Administrative release regardless of holder (auditor recovery path).
    pub fn force_release(&self, container: &ContainerId) -> bool {
        if self.locks.remove(container).is_some() {
            warn!(container = %container, "lock force-released");
            true
        } else {
            false
        }
    }

    pub fn holder_of(&self, container: &ContainerId) -> Option<ActorId> {
        self.locks.get(container).map(|s| s.holder.clone())
    }

    pub fn phase_of(&self, container: &ContainerId) -> Option<LockPhase> {
        self.locks.get(container).map(|s| s.phase.clone())
    }

    /// Containers whose lock has been held longer than the given age, in any
    /// phase. Used by the auditor to find leaked reservations.
    pub fn held_longer_than(&self, age: std::time::Duration) -> Vec<(ContainerId, ActorId)> {
        self.locks
            .iter()
            .filter(|entry| entry.value().since.elapsed() > age)
            .map(|entry| (entry.key().clone(), entry.value().holder.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
