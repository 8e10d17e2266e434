use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::debug;

use coffer_core::{ActorId, CofferConfig, ContentRecord, Item, Payload, Violation};

use crate::snapshot::InventorySnapshot;

/// Threshold above which a partial slot restore is treated as a rollback
/// attempt. Exact restores hit the full-match check first.
const PARTIAL_ROLLBACK_THRESHOLD: f64 = 0.8;

/// How many recurrences of one combined state are tolerated before the
/// close is refused as a save/restore replay.
const MAX_STATE_RECURRENCES: u32 = 2;

/// Rolling per-actor history of combined state hashes, used to catch an
/// actor cycling between identical states to farm duplicate saves.
#[derive(Default)]
pub struct StateHistory {
    entries: DashMap<ActorId, VecDeque<String>>,
    limit: usize,
}

impl StateHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
        }
    }

    /// Record a state hash and return how many times it now appears in the
    /// actor's retained window (including this occurrence).
    pub fn push(&self, actor: &ActorId, hash: &str) -> u32 {
        let mut window = self.entries.entry(actor.clone()).or_default();
        window.push_back(hash.to_string());
        while window.len() > self.limit {
            window.pop_front();
        }
        window.iter().filter(|h| h.as_str() == hash).count() as u32
    }

    pub fn forget(&self, actor: &ActorId) {
        self.entries.remove(actor);
    }
}

/// Validates container structure at open and session deltas at close.
/// Fail-closed: any violation aborts the save with nothing written.
///
/// The rollback family of checks compares the actor's slots against the
/// open-time snapshot, but only fires when the container's item multiset
/// actually changed: rearranging items inside the container, or a session
/// that never touched the actor's own slots, is ordinary use.
pub struct IntegrityValidator {
    config: CofferConfig,
}

impl IntegrityValidator {
    pub fn new(config: CofferConfig) -> Self {
        Self { config }
    }

    /// Nesting depth of an item: plain items are 0, a container is 1 plus
    /// the deepest container among its embedded contents.
    pub fn nesting_depth(item: &Item) -> u32 {
        match &item.payload {
            Payload::Plain => 0,
            Payload::Container { contents, .. } => {
                let inner = contents
                    .as_ref()
                    .map(|record| {
                        record
                            .slots()
                            .iter()
                            .flatten()
                            .map(Self::nesting_depth)
                            .max()
                            .unwrap_or(0)
                    })
                    .unwrap_or(0);
                1 + inner
            }
        }
    }

    /// Structural bounds on a single item: nesting depth, display name
    /// length, lore dimensions, applied recursively to embedded contents.
    pub fn validate_item(&self, item: &Item) -> Result<(), Violation> {
        if Self::nesting_depth(item) > self.config.max_nesting_depth {
            return Err(Violation::NestingTooDeep {
                max: self.config.max_nesting_depth,
            });
        }
        self.validate_metadata_deep(item)
    }

    /// Structural bounds on a record about to be persisted. Depth counts the
    /// record itself as one level of containment.
    pub fn validate_record(&self, record: &ContentRecord) -> Result<(), Violation> {
        for item in record.slots().iter().flatten() {
            if 1 + Self::nesting_depth(item) > self.config.max_nesting_depth {
                return Err(Violation::NestingTooDeep {
                    max: self.config.max_nesting_depth,
                });
            }
            self.validate_metadata_deep(item)?;
        }
        Ok(())
    }

    fn validate_metadata(&self, item: &Item) -> Result<(), Violation> {
        if let Some(name) = &item.display_name {
            if name.chars().count() > self.config.max_display_name_len {
                return Err(Violation::DisplayNameTooLong {
                    max: self.config.max_display_name_len,
                });
            }
        }
        if item.lore.len() > self.config.max_lore_lines
            || item
                .lore
                .iter()
                .any(|line| line.chars().count() > self.config.max_lore_line_len)
        {
            return Err(Violation::LoreTooLarge {
                max_lines: self.config.max_lore_lines,
                max_len: self.config.max_lore_line_len,
            });
        }
        Ok(())
    }

    fn validate_metadata_deep(&self, item: &Item) -> Result<(), Violation> {
        self.validate_metadata(item)?;
        if let Payload::Container {
            contents: Some(record),
            ..
        } = &item.payload
        {
            for inner in record.slots().iter().flatten() {
                self.validate_metadata_deep(inner)?;
            }
        }
        Ok(())
    }

    /// Session-delta checks at close, in fixed order: exact rollback, total
    /// count, per-type counts, state replay, partial rollback. `recurrences`
    /// is the occurrence count of the closing state in the actor's history.
    pub fn validate_close(
        &self,
        opened: &InventorySnapshot,
        closing: &InventorySnapshot,
        recurrences: u32,
    ) -> Result<(), Violation> {
        // "Changed" means the container gained, lost, or swapped items.
        // Layout-only rearrangement inside the container is not a delta the
        // rollback checks care about.
        let container_changed = opened.container_types() != closing.container_types();

        if container_changed && closing.slots_identical(opened) {
            return Err(Violation::RollbackDetected);
        }

        if closing.total_count() > opened.total_count() {
            return Err(Violation::CountIncreased {
                gained: closing.total_count() - opened.total_count(),
            });
        }

        for kind in closing.kinds() {
            let before = opened.count_of(kind);
            let after = closing.count_of(kind);
            if after > before {
                return Err(Violation::TypeIncreased {
                    kind: kind.clone(),
                    before,
                    after,
                });
            }
        }

        if recurrences > MAX_STATE_RECURRENCES {
            return Err(Violation::StateReplayed {
                occurrences: recurrences,
            });
        }

        // Near-exact restore: the actor's slots still hold the same item
        // multiset as at open and almost every slot is byte-identical, yet
        // the container changed. An honest edit that feeds the container
        // changes the actor-side counts too.
        if container_changed && opened.inventory_types() == closing.inventory_types() {
            let overlap = closing.slot_overlap(opened);
            if overlap > PARTIAL_ROLLBACK_THRESHOLD && overlap < 1.0 {
                debug!(overlap, "partial inventory restore during edit");
                return Err(Violation::PartialRollback {
                    restored_pct: (overlap * 100.0) as u8,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockActor;
    use coffer_core::Item;

    fn validator() -> IntegrityValidator {
        IntegrityValidator::new(CofferConfig::default())
    }

    fn nested(depth: u32) -> Item {
        let mut item = Item::container("shell_box");
        if depth > 1 {
            let mut record = ContentRecord::empty(9);
            record.set(0, Some(nested(depth - 1))).unwrap();
            item.set_embedded_contents(record);
        }
        item
    }

    #[test]
    fn nesting_depth_counts_containers() {
        assert_eq!(IntegrityValidator::nesting_depth(&Item::plain("dust", 1)), 0);
        assert_eq!(IntegrityValidator::nesting_depth(&nested(1)), 1);
        assert_eq!(IntegrityValidator::nesting_depth(&nested(3)), 3);
    }

    #[test]
    fn depth_limit_enforced() {
        let v = validator();
        assert!(v.validate_item(&nested(3)).is_ok());
        assert!(matches!(
            v.validate_item(&nested(4)),
            Err(Violation::NestingTooDeep { max: 3 })
        ));
    }

    #[test]
    fn record_depth_includes_the_record_itself() {
        let v = validator();
        let mut record = ContentRecord::empty(9);
        record.set(0, Some(nested(2))).unwrap();
        assert!(v.validate_record(&record).is_ok());

        let mut too_deep = ContentRecord::empty(9);
        too_deep.set(0, Some(nested(3))).unwrap();
        assert!(v.validate_record(&too_deep).is_err());
    }

    #[test]
    fn metadata_bounds_enforced() {
        let v = validator();

        let mut long_name = Item::plain("dust", 1);
        long_name.display_name = Some("x".repeat(257));
        assert!(matches!(
            v.validate_item(&long_name),
            Err(Violation::DisplayNameTooLong { .. })
        ));

        let mut fat_lore = Item::plain("dust", 1);
        fat_lore.lore = vec!["line".to_string(); 51];
        assert!(matches!(
            v.validate_item(&fat_lore),
            Err(Violation::LoreTooLarge { .. })
        ));

        let mut long_line = Item::plain("dust", 1);
        long_line.lore = vec!["y".repeat(257)];
        assert!(v.validate_item(&long_line).is_err());
    }

    #[test]
    fn metadata_checked_inside_nested_contents() {
        let v = validator();
        let mut bad_inner = Item::plain("dust", 1);
        bad_inner.display_name = Some("x".repeat(300));

        let mut outer = Item::container("shell_box");
        let mut record = ContentRecord::empty(9);
        record.set(4, Some(bad_inner)).unwrap();
        outer.set_embedded_contents(record);

        assert!(matches!(
            v.validate_item(&outer),
            Err(Violation::DisplayNameTooLong { .. })
        ));
    }

    #[test]
    fn rollback_detected_when_slots_restored_and_contents_changed() {
        let v = validator();
        let mut actor = MockActor::new("steve");
        actor.set_inventory_slot(0, Some(Item::plain("dust", 5)));

        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("gem", 3))).unwrap();
        let opened = InventorySnapshot::capture(&actor, &record);

        // Container lost items while actor slots are byte-identical to open
        // time: the removed gems went nowhere visible.
        let mut edited = ContentRecord::empty(27);
        edited.set(0, Some(Item::plain("gem", 1))).unwrap();
        let closing = InventorySnapshot::capture(&actor, &edited);

        assert!(matches!(
            v.validate_close(&opened, &closing, 1),
            Err(Violation::RollbackDetected)
        ));
    }

    #[test]
    fn rearranging_container_contents_is_legal() {
        let v = validator();
        let actor = MockActor::new("steve");

        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("gem", 3))).unwrap();
        let opened = InventorySnapshot::capture(&actor, &record);

        // Same items, different slot.
        let mut edited = ContentRecord::empty(27);
        edited.set(13, Some(Item::plain("gem", 3))).unwrap();
        let closing = InventorySnapshot::capture(&actor, &edited);

        assert!(v.validate_close(&opened, &closing, 1).is_ok());
    }

    #[test]
    fn unchanged_close_passes() {
        let v = validator();
        let actor = MockActor::new("steve");
        let record = ContentRecord::empty(27);
        let opened = InventorySnapshot::capture(&actor, &record);
        let closing = InventorySnapshot::capture(&actor, &record);
        assert!(v.validate_close(&opened, &closing, 1).is_ok());
    }

    #[test]
    fn count_increase_detected() {
        let v = validator();
        let actor = MockActor::new("steve");

        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("dust", 5))).unwrap();
        let opened = InventorySnapshot::capture(&actor, &record);

        let mut actor_after = MockActor::new("steve");
        actor_after.set_inventory_slot(0, Some(Item::plain("dust", 3)));
        let mut edited = ContentRecord::empty(27);
        edited.set(0, Some(Item::plain("dust", 5))).unwrap();
        let closing = InventorySnapshot::capture(&actor_after, &edited);

        assert!(matches!(
            v.validate_close(&opened, &closing, 1),
            Err(Violation::CountIncreased { gained: 3 })
        ));
    }

    #[test]
    fn moving_items_between_inventory_and_container_is_legal() {
        let v = validator();

        let mut actor = MockActor::new("steve");
        actor.set_inventory_slot(0, Some(Item::plain("dust", 8)));
        let opened = InventorySnapshot::capture(&actor, &ContentRecord::empty(27));

        // All eight moved into the container.
        let mut actor_after = MockActor::new("steve");
        actor_after.set_inventory_slot(0, None);
        let mut edited = ContentRecord::empty(27);
        edited.set(0, Some(Item::plain("dust", 8))).unwrap();
        let closing = InventorySnapshot::capture(&actor_after, &edited);

        assert!(v.validate_close(&opened, &closing, 1).is_ok());
    }

    #[test]
    fn type_swap_with_equal_totals_detected() {
        let v = validator();
        let actor = MockActor::new("steve");

        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("dust", 4))).unwrap();
        record.set(1, Some(Item::plain("gem", 2))).unwrap();
        let opened = InventorySnapshot::capture(&actor, &record);

        // Total stays 6 but gems grew at dust's expense.
        let mut actor_after = MockActor::new("steve");
        actor_after.set_inventory_slot(0, Some(Item::plain("dust", 1)));
        let mut edited = ContentRecord::empty(27);
        edited.set(0, Some(Item::plain("gem", 5))).unwrap();
        let closing = InventorySnapshot::capture(&actor_after, &edited);

        assert!(matches!(
            v.validate_close(&opened, &closing, 1),
            Err(Violation::TypeIncreased { .. })
        ));
    }

    #[test]
    fn state_replay_detected_past_tolerance() {
        let v = validator();
        let actor = MockActor::new("steve");
        let record = ContentRecord::empty(27);
        let opened = InventorySnapshot::capture(&actor, &record);
        let closing = InventorySnapshot::capture(&actor, &record);

        assert!(v.validate_close(&opened, &closing, 2).is_ok());
        assert!(matches!(
            v.validate_close(&opened, &closing, 3),
            Err(Violation::StateReplayed { occurrences: 3 })
        ));
    }

    #[test]
    fn partial_rollback_detected_above_threshold() {
        let v = validator();
        let mut actor = MockActor::new("steve");
        for i in 0..20 {
            actor.set_inventory_slot(i, Some(Item::plain("dust", 1)));
        }
        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("gem", 2))).unwrap();
        let opened = InventorySnapshot::capture(&actor, &record);

        // Two slots swapped (same multiset, near-identical layout) while
        // the container lost a gem.
        actor.set_inventory_slot(19, None);
        actor.set_inventory_slot(25, Some(Item::plain("dust", 1)));
        let mut edited = ContentRecord::empty(27);
        edited.set(0, Some(Item::plain("gem", 1))).unwrap();
        let closing = InventorySnapshot::capture(&actor, &edited);

        assert!(matches!(
            v.validate_close(&opened, &closing, 1),
            Err(Violation::PartialRollback { .. })
        ));
    }

    #[test]
    fn honest_deposit_with_high_overlap_is_legal() {
        let v = validator();
        let mut actor = MockActor::new("steve");
        for i in 0..20 {
            actor.set_inventory_slot(i, Some(Item::plain("dust", 1)));
        }
        let opened = InventorySnapshot::capture(&actor, &ContentRecord::empty(27));

        // One dust moved from inventory into the container: actor-side
        // counts changed, so the restore heuristics stay quiet.
        actor.set_inventory_slot(19, None);
        let mut edited = ContentRecord::empty(27);
        edited.set(0, Some(Item::plain("dust", 1))).unwrap();
        let closing = InventorySnapshot::capture(&actor, &edited);

        assert!(v.validate_close(&opened, &closing, 1).is_ok());
    }

    #[test]
    fn history_window_counts_recurrences() {
        let history = StateHistory::new(10);
        let actor = ActorId::new();

        assert_eq!(history.push(&actor, "aaa"), 1);
        assert_eq!(history.push(&actor, "bbb"), 1);
        assert_eq!(history.push(&actor, "aaa"), 2);
        assert_eq!(history.push(&actor, "aaa"), 3);
    }

    #[test]
    fn history_window_is_bounded() {
        let history = StateHistory::new(3);
        let actor = ActorId::new();

        history.push(&actor, "old");
        history.push(&actor, "x");
        history.push(&actor, "y");
        history.push(&actor, "z");
        // "old" fell out of the window.
        assert_eq!(history.push(&actor, "old"), 1);
    }

    #[test]
    fn history_is_per_actor() {
        let history = StateHistory::new(10);
        let alice = ActorId::new();
        let bob = ActorId::new();

        assert_eq!(history.push(&alice, "state"), 1);
        assert_eq!(history.push(&bob, "state"), 1);
        history.forget(&alice);
        assert_eq!(history.push(&alice, "state"), 1);
    }
}
