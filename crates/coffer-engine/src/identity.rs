use dashmap::DashMap;
use tracing::warn;

use coffer_core::{ActorId, ContainerId};

/// Result of resolving the identifier carried by an opened item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The item had no identifier; one was minted and claimed for it.
    Fresh(ContainerId),
    /// The identifier is owned by this actor (or unclaimed until now).
    Existing(ContainerId),
    /// The identifier is owned by a different actor — this item is a copy.
    /// A replacement identifier was minted and claimed; the caller carries
    /// the item's own embedded contents over to it.
    Regenerated {
        original: ContainerId,
        fresh: ContainerId,
    },
}

impl Resolution {
    pub fn id(&self) -> &ContainerId {
        match self {
            Self::Fresh(id) | Self::Existing(id) => id,
            Self::Regenerated { fresh, .. } => fresh,
        }
    }
}

/// First-write-wins ownership table: identifier → first-claiming actor.
/// An item presenting an identifier owned by someone else is treated as a
/// duplicate and silently re-keyed, so copies can never share storage with
/// the original. Claims last for the process lifetime.
#[derive(Default)]
pub struct IdentityResolver {
    owners: DashMap<ContainerId, ActorId>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and claim in one step. Never fails: an ownership conflict
    /// resolves to a fresh identifier rather than an error.
    pub fn resolve(&self, presented: Option<&ContainerId>, actor: &ActorId) -> Resolution {
        match presented {
            None => {
                let id = ContainerId::new();
                self.owners.insert(id.clone(), actor.clone());
                Resolution::Fresh(id)
            }
            Some(id) => {
                let owner = self
                    .owners
                    .entry(id.clone())
                    .or_insert_with(|| actor.clone());
                if owner.value() == actor {
                    drop(owner);
                    Resolution::Existing(id.clone())
                } else {
                    drop(owner);
                    let fresh = ContainerId::new();
                    self.owners.insert(fresh.clone(), actor.clone());
                    warn!(
                        original = %id,
                        fresh = %fresh,
                        actor = %actor,
                        "duplicate container identifier, re-keying"
                    );
                    Resolution::Regenerated {
                        original: id.clone(),
                        fresh,
                    }
                }
            }
        }
    }

    /// Drop a claim (admin tooling, container deletion). Safe when the
    /// identifier was never claimed.
    pub fn forget(&self, id: &ContainerId) {
        self.owners.remove(id);
    }

    pub fn owner_of(&self, id: &ContainerId) -> Option<ActorId> {
        self.owners.get(id).map(|owner| owner.clone())
    }

    pub fn claimed_count(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_id_is_minted_and_claimed() {
        let resolver = IdentityResolver::new();
        let actor = ActorId::new();
        let resolution = resolver.resolve(None, &actor);
        assert!(matches!(resolution, Resolution::Fresh(_)));
        assert!(resolution.id().as_str().starts_with("ctr_"));
        assert_eq!(resolver.owner_of(resolution.id()), Some(actor));
    }

    #[test]
    fn unclaimed_id_resolves_as_existing() {
        let resolver = IdentityResolver::new();
        let actor = ActorId::new();
        let id = ContainerId::new();
        let resolution = resolver.resolve(Some(&id), &actor);
        assert_eq!(resolution, Resolution::Existing(id.clone()));
        assert_eq!(resolver.owner_of(&id), Some(actor));
    }

    #[test]
    fn owner_can_resolve_repeatedly() {
        let resolver = IdentityResolver::new();
        let actor = ActorId::new();
        let id = ContainerId::new();
        assert!(matches!(
            resolver.resolve(Some(&id), &actor),
            Resolution::Existing(_)
        ));
        assert!(matches!(
            resolver.resolve(Some(&id), &actor),
            Resolution::Existing(_)
        ));
        assert_eq!(resolver.claimed_count(), 1);
    }

    #[test]
    fn foreign_claim_is_rekeyed() {
        let resolver = IdentityResolver::new();
        let alice = ActorId::new();
        let bob = ActorId::new();
        let id = ContainerId::new();

        resolver.resolve(Some(&id), &alice);
        let resolution = resolver.resolve(Some(&id), &bob);
        match resolution {
            Resolution::Regenerated { original, fresh } => {
                assert_eq!(original, id);
                assert_ne!(fresh, id);
                // The original claim is untouched; the fresh one is Bob's.
                assert_eq!(resolver.owner_of(&id), Some(alice));
                assert_eq!(resolver.owner_of(&fresh), Some(bob));
            }
            other => panic!("expected re-key, got {other:?}"),
        }
    }

    #[test]
    fn forget_allows_a_new_claim() {
        let resolver = IdentityResolver::new();
        let alice = ActorId::new();
        let bob = ActorId::new();
        let id = ContainerId::new();

        resolver.resolve(Some(&id), &alice);
        resolver.forget(&id);
        resolver.forget(&id);
        assert!(matches!(
            resolver.resolve(Some(&id), &bob),
            Resolution::Existing(_)
        ));
    }
}
