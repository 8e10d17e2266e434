use std::collections::HashMap;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use coffer_core::{scan_slots, Actor, ContentRecord, Item, SlotRef};

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// SHA-256 over the item's canonical JSON form. Serialization of these types
/// is infallible (no maps with non-string keys, no custom Serialize).
pub fn item_hash(item: &Item) -> String {
    let mut hasher = Sha256::new();
    match serde_json::to_vec(item) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => hasher.update(item.kind.as_bytes()),
    }
    hex(&hasher.finalize())
}

pub fn record_hash(record: &ContentRecord) -> String {
    let mut hasher = Sha256::new();
    match serde_json::to_vec(record) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => hasher.update(record.len().to_le_bytes()),
    }
    hex(&hasher.finalize())
}

/// Point-in-time fingerprint of an actor's holdings plus the container being
/// edited. Taken at open, recomputed at close, and compared slot by slot to
/// detect restores of pre-session state. Actor slots and container contents
/// are tracked separately: a restore pattern shows up as unchanged actor
/// slots next to a changed container.
#[derive(Clone, Debug)]
pub struct InventorySnapshot {
    slot_hashes: Vec<(SlotRef, Option<String>)>,
    container_hash: String,
    combined_hash: String,
    inventory_types: HashMap<String, u64>,
    container_types: HashMap<String, u64>,
    total_count: u64,
}

impl InventorySnapshot {
    pub fn capture(actor: &dyn Actor, container: &ContentRecord) -> Self {
        let mut slot_hashes = Vec::new();
        let mut inventory_types: HashMap<String, u64> = HashMap::new();

        for slot in scan_slots(actor) {
            let hash = match actor.item_at(&slot) {
                Some(item) => {
                    *inventory_types.entry(item.kind.clone()).or_insert(0) +=
                        u64::from(item.count);
                    Some(item_hash(&item))
                }
                None => None,
            };
            slot_hashes.push((slot, hash));
        }

        let container_types = container.type_counts();
        let total_count =
            inventory_types.values().sum::<u64>() + container.total_count();

        let container_hash = record_hash(container);
        let mut hasher = Sha256::new();
        for (_, hash) in &slot_hashes {
            match hash {
                Some(h) => hasher.update(h.as_bytes()),
                None => hasher.update(b"-"),
            }
        }
        hasher.update(container_hash.as_bytes());
        let combined_hash = hex(&hasher.finalize());

        Self {
            slot_hashes,
            container_hash,
            combined_hash,
            inventory_types,
            container_types,
            total_count,
        }
    }

    pub fn container_hash(&self) -> &str {
        &self.container_hash
    }

    pub fn combined_hash(&self) -> &str {
        &self.combined_hash
    }

    /// Item count across actor slots and container contents.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Per-kind counts over actor slots only.
    pub fn inventory_types(&self) -> &HashMap<String, u64> {
        &self.inventory_types
    }

    /// Per-kind counts over container contents only.
    pub fn container_types(&self) -> &HashMap<String, u64> {
        &self.container_types
    }

    /// Combined per-kind count for one item kind.
    pub fn count_of(&self, kind: &str) -> u64 {
        self.inventory_types.get(kind).copied().unwrap_or(0)
            + self.container_types.get(kind).copied().unwrap_or(0)
    }

    /// All kinds present in either tracked inventory.
    pub fn kinds(&self) -> impl Iterator<Item = &String> {
        self.inventory_types
            .keys()
            .chain(self.container_types.keys())
    }

    /// Fraction of actor slots whose contents are identical in both
    /// snapshots, in 0.0..=1.0. Compared positionally; a slot layout change
    /// (actor resized inventory) counts as fully different.
    pub fn slot_overlap(&self, other: &Self) -> f64 {
        if self.slot_hashes.len() != other.slot_hashes.len() {
            return 0.0;
        }
        if self.slot_hashes.is_empty() {
            return 1.0;
        }
        let matching = self
            .slot_hashes
            .iter()
            .zip(&other.slot_hashes)
            .filter(|((_, a), (_, b))| a == b)
            .count();
        matching as f64 / self.slot_hashes.len() as f64
    }

    pub fn slots_identical(&self, other: &Self) -> bool {
        self.slot_hashes.len() == other.slot_hashes.len()
            && self
                .slot_hashes
                .iter()
                .zip(&other.slot_hashes)
                .all(|((_, a), (_, b))| a == b)
    }
}
