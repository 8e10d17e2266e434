//! In-memory host doubles for tests and examples.

use std::collections::HashMap;

use parking_lot::Mutex;

use coffer_core::{Actor, ActorDirectory, ActorId, ContainerId, Item, SecurityNotifier, SlotRef};

/// Scriptable actor backed by plain vectors. Inventory is 36 slots, stash 27,
/// matching the usual host layout.
pub struct MockActor {
    id: ActorId,
    name: String,
    online: bool,
    main_hand: Option<Item>,
    off_hand: Option<Item>,
    inventory: Vec<Option<Item>>,
    stash: Vec<Option<Item>>,
    messages: Mutex<Vec<String>>,
    dropped: Vec<Item>,
    views_closed: u32,
}

impl MockActor {
    pub fn new(name: &str) -> Self {
        Self {
            id: ActorId::new(),
            name: name.to_string(),
            online: true,
            main_hand: None,
            off_hand: None,
            inventory: vec![None; 36],
            stash: vec![None; 27],
            messages: Mutex::new(Vec::new()),
            dropped: Vec::new(),
            views_closed: 0,
        }
    }

    pub fn set_main_hand(&mut self, item: Option<Item>) {
        self.main_hand = item;
    }

    pub fn set_off_hand(&mut self, item: Option<Item>) {
        self.off_hand = item;
    }

    pub fn set_inventory_slot(&mut self, index: usize, item: Option<Item>) {
        self.inventory[index] = item;
    }

    pub fn set_stash_slot(&mut self, index: usize, item: Option<Item>) {
        self.stash[index] = item;
    }

    pub fn go_offline(&mut self) {
        self.online = false;
    }

    pub fn go_online(&mut self) {
        self.online = true;
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn dropped(&self) -> &[Item] {
        &self.dropped
    }

    pub fn views_closed(&self) -> u32 {
        self.views_closed
    }
}

impl Actor for MockActor {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn item_at(&self, slot: &SlotRef) -> Option<Item> {
        match slot {
            SlotRef::MainHand => self.main_hand.clone(),
            SlotRef::OffHand => self.off_hand.clone(),
            SlotRef::Inventory(i) => self.inventory.get(*i).cloned().flatten(),
            SlotRef::Stash(i) => self.stash.get(*i).cloned().flatten(),
        }
    }

    fn put_item(&mut self, slot: &SlotRef, item: Option<Item>) {
        match slot {
            SlotRef::MainHand => self.main_hand = item,
            SlotRef::OffHand => self.off_hand = item,
            SlotRef::Inventory(i) => {
                if let Some(s) = self.inventory.get_mut(*i) {
                    *s = item;
                }
            }
            SlotRef::Stash(i) => {
                if let Some(s) = self.stash.get_mut(*i) {
                    *s = item;
                }
            }
        }
    }

    fn inventory_size(&self) -> usize {
        self.inventory.len()
    }

    fn stash_size(&self) -> usize {
        self.stash.len()
    }

    fn drop_items(&mut self, items: Vec<Item>) {
        self.dropped.extend(items);
    }

    fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn close_view(&mut self) {
        self.views_closed += 1;
    }
}

/// Directory over a fixed set of mock actors.
#[derive(Default)]
pub struct MockDirectory {
    actors: HashMap<ActorId, MockActor>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, actor: MockActor) -> ActorId {
        let id = actor.id().clone();
        self.actors.insert(id.clone(), actor);
        id
    }

    pub fn get(&self, id: &ActorId) -> Option<&MockActor> {
        self.actors.get(id)
    }

    pub fn get_mut(&mut self, id: &ActorId) -> Option<&mut MockActor> {
        self.actors.get_mut(id)
    }
}

impl ActorDirectory for MockDirectory {
    fn online(&self) -> Vec<ActorId> {
        self.actors
            .values()
            .filter(|a| a.is_online())
            .map(|a| a.id().clone())
            .collect()
    }

    fn actor_mut(&mut self, id: &ActorId) -> Option<&mut dyn Actor> {
        self.actors.get_mut(id).map(|a| a as &mut dyn Actor)
    }
}

/// Records broadcast violations for assertions.
#[derive(Default)]
pub struct MockNotifier {
    broadcasts: Mutex<Vec<String>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().clone()
    }
}

impl SecurityNotifier for MockNotifier {
    fn broadcast(
        &self,
        actor: &ActorId,
        actor_name: &str,
        container: Option<&ContainerId>,
        reason: &str,
    ) {
        let target = container.map(|c| c.as_str().to_string()).unwrap_or_default();
        self.broadcasts
            .lock()
            .push(format!("{actor}:{actor_name}:{target}:{reason}"));
    }
}
