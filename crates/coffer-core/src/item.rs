use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ContainerId;

/// What an item carries beyond its base metadata. Container-backed items
/// embed their identifier and (once persisted) a copy of their contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Plain,
    Container {
        id: Option<ContainerId>,
        contents: Option<ContentRecord>,
    },
}

/// An item instance as held in an actor's slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub kind: String,
    pub count: u32,
    pub display_name: Option<String>,
    pub lore: Vec<String>,
    pub payload: Payload,
}

impl Item {
    pub fn plain(kind: &str, count: u32) -> Self {
        Self {
            kind: kind.to_string(),
            count,
            display_name: None,
            lore: Vec::new(),
            payload: Payload::Plain,
        }
    }

    /// A container item with no identifier yet (assigned lazily on first open).
    pub fn container(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            count: 1,
            display_name: None,
            lore: Vec::new(),
            payload: Payload::Container {
                id: None,
                contents: None,
            },
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.payload, Payload::Container { .. })
    }

    pub fn container_id(&self) -> Option<&ContainerId> {
        match &self.payload {
            Payload::Container { id, .. } => id.as_ref(),
            Payload::Plain => None,
        }
    }

    /// Sets the embedded identifier. No-op for plain items.
    pub fn set_container_id(&mut self, new_id: ContainerId) {
        if let Payload::Container { id, .. } = &mut self.payload {
            *id = Some(new_id);
        }
    }

    pub fn embedded_contents(&self) -> Option<&ContentRecord> {
        match &self.payload {
            Payload::Container { contents, .. } => contents.as_ref(),
            Payload::Plain => None,
        }
    }

    /// Replaces the embedded contents copy. No-op for plain items.
    pub fn set_embedded_contents(&mut self, record: ContentRecord) {
        if let Payload::Container { contents, .. } = &mut self.payload {
            *contents = Some(record);
        }
    }

    /// Identity signature comparison: same kind, display name, lore, and
    /// embedded container identifier. Embedded contents are deliberately
    /// excluded so an edited container still matches its open-time snapshot.
    pub fn same_identity(&self, other: &Item) -> bool {
        if self.kind != other.kind
            || self.display_name != other.display_name
            || self.lore != other.lore
        {
            return false;
        }
        match (&self.payload, &other.payload) {
            (Payload::Plain, Payload::Plain) => true,
            (Payload::Container { id: a, .. }, Payload::Container { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Fixed-size slot array backing one logical container. The length is set at
/// creation and never changes for a given identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    slots: Vec<Option<Item>>,
}

#[derive(Debug, thiserror::Error)]
#[error("slot {index} out of range for record of {len} slots")]
pub struct SlotOutOfRange {
    pub index: usize,
    pub len: usize,
}

impl ContentRecord {
    pub fn empty(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn slots(&self) -> &[Option<Item>] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn set(&mut self, index: usize, item: Option<Item>) -> Result<(), SlotOutOfRange> {
        let len = self.slots.len();
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = item;
                Ok(())
            }
            None => Err(SlotOutOfRange { index, len }),
        }
    }

    /// Number of occupied slots.
    pub fn non_empty(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Sum of item counts across all slots.
    pub fn total_count(&self) -> u64 {
        self.slots
            .iter()
            .flatten()
            .map(|item| u64::from(item.count))
            .sum()
    }

    /// Per-kind item counts.
    pub fn type_counts(&self) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        for item in self.slots.iter().flatten() {
            *counts.entry(item.kind.clone()).or_insert(0) += u64::from(item.count);
        }
        counts
    }

    /// Drains the occupied slots into a plain item list (world-drop path).
    pub fn into_items(self) -> Vec<Item> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Where a container item lives in an actor's holdings. "Stash" is the
/// secondary per-actor storage (e.g. an ender chest).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotRef {
    MainHand,
    OffHand,
    Inventory(usize),
    Stash(usize),
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MainHand => f.write_str("main_hand"),
            Self::OffHand => f.write_str("off_hand"),
            Self::Inventory(i) => write!(f, "inventory[{i}]"),
            Self::Stash(i) => write!(f, "stash[{i}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_starts_without_id() {
        let item = Item::container("shell_box");
        assert!(item.is_container());
        assert!(item.container_id().is_none());
        assert!(item.embedded_contents().is_none());
    }

    #[test]
    fn set_container_id_is_noop_for_plain() {
        let mut item = Item::plain("stone", 4);
        item.set_container_id(ContainerId::new());
        assert!(item.container_id().is_none());
    }

    #[test]
    fn same_identity_ignores_embedded_contents() {
        let id = ContainerId::new();
        let mut a = Item::container("shell_box");
        a.set_container_id(id.clone());
        let mut b = a.clone();
        b.set_embedded_contents(ContentRecord::empty(27));
        assert!(a.same_identity(&b));
    }

    #[test]
    fn same_identity_distinguishes_ids_and_meta() {
        let mut a = Item::container("shell_box");
        a.set_container_id(ContainerId::new());
        let mut b = Item::container("shell_box");
        b.set_container_id(ContainerId::new());
        assert!(!a.same_identity(&b));

        let mut c = a.clone();
        c.display_name = Some("renamed".into());
        assert!(!a.same_identity(&c));

        assert!(!a.same_identity(&Item::plain("shell_box", 1)));
    }

    #[test]
    fn record_length_is_fixed() {
        let mut record = ContentRecord::empty(27);
        assert_eq!(record.len(), 27);
        assert!(record.set(26, Some(Item::plain("dust", 1))).is_ok());
        let err = record.set(27, Some(Item::plain("dust", 1))).unwrap_err();
        assert_eq!(err.index, 27);
        assert_eq!(record.len(), 27);
    }

    #[test]
    fn record_counts() {
        let mut record = ContentRecord::empty(9);
        record.set(0, Some(Item::plain("dust", 64))).unwrap();
        record.set(3, Some(Item::plain("dust", 32))).unwrap();
        record.set(5, Some(Item::plain("gem", 3))).unwrap();
        assert_eq!(record.non_empty(), 3);
        assert_eq!(record.total_count(), 99);
        let types = record.type_counts();
        assert_eq!(types["dust"], 96);
        assert_eq!(types["gem"], 3);
    }

    #[test]
    fn record_serde_roundtrip_preserves_slots() {
        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("dust", 64))).unwrap();
        let mut named = Item::plain("gem", 1);
        named.display_name = Some("lucky gem".into());
        named.lore = vec!["found in a river".into()];
        record.set(13, Some(named)).unwrap();
        record.set(26, Some(Item::container("shell_box"))).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let parsed: ContentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.len(), 27);
        assert_eq!(parsed.get(13).unwrap().display_name.as_deref(), Some("lucky gem"));
    }

    #[test]
    fn into_items_drops_empty_slots() {
        let mut record = ContentRecord::empty(5);
        record.set(1, Some(Item::plain("dust", 2))).unwrap();
        record.set(4, Some(Item::plain("gem", 1))).unwrap();
        let items = record.into_items();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn slot_ref_display() {
        assert_eq!(SlotRef::MainHand.to_string(), "main_hand");
        assert_eq!(SlotRef::Inventory(7).to_string(), "inventory[7]");
        assert_eq!(SlotRef::Stash(0).to_string(), "stash[0]");
    }
}
