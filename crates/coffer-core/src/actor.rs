use crate::ids::{ActorId, ContainerId};
use crate::item::{Item, SlotRef};

/// Host-side view of a connected actor. The engine never touches the host's
/// inventory structures directly; everything goes through this boundary, and
/// all mutations happen on the host's primary mutation thread.
pub trait Actor {
    fn id(&self) -> &ActorId;
    fn name(&self) -> &str;
    fn is_online(&self) -> bool;

    fn item_at(&self, slot: &SlotRef) -> Option<Item>;
    fn put_item(&mut self, slot: &SlotRef, item: Option<Item>);

    fn inventory_size(&self) -> usize;
    fn stash_size(&self) -> usize;

    /// Drop items into the world at the actor's current location.
    fn drop_items(&mut self, items: Vec<Item>);

    /// User-facing message (refusal reasons, save notices).
    fn notify(&self, message: &str);

    /// Close any open virtual view for this actor.
    fn close_view(&mut self);
}

/// Lookup of online actors, used by the auditor sweep and the migration
/// coordinator.
pub trait ActorDirectory {
    fn online(&self) -> Vec<ActorId>;
    fn actor_mut(&mut self, id: &ActorId) -> Option<&mut dyn Actor>;
}

/// Privileged-observer broadcast for integrity violations. Hosts typically
/// fan this out to admin-permissioned actors.
pub trait SecurityNotifier: Send + Sync {
    fn broadcast(
        &self,
        actor: &ActorId,
        actor_name: &str,
        container: Option<&ContainerId>,
        reason: &str,
    );
}

/// Every slot an actor can hold a container in, in the search order used by
/// the open protocol: main hand, off hand, primary inventory, stash.
pub fn scan_slots(actor: &dyn Actor) -> Vec<SlotRef> {
    let mut slots = Vec::with_capacity(2 + actor.inventory_size() + actor.stash_size());
    slots.push(SlotRef::MainHand);
    slots.push(SlotRef::OffHand);
    slots.extend((0..actor.inventory_size()).map(SlotRef::Inventory));
    slots.extend((0..actor.stash_size()).map(SlotRef::Stash));
    slots
}
