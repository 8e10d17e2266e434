use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use coffer_core::{scan_slots, Actor, ActorDirectory};
use coffer_store::{ContainerRepo, Database, StoreError};

use crate::error::CofferError;

/// Marker file written once every legacy record has been embedded.
pub const MIGRATION_MARKER: &str = ".migrated_to_embedded";

#[derive(Clone, Debug, Default)]
pub struct MigrationReport {
    pub items_migrated: usize,
    pub records_remaining: i64,
    pub completed: bool,
}

/// One-time transfer of store-only container records into item-embedded
/// copies. Marker-gated and idempotent: records whose owners are offline
/// stay put and are retried when that actor is next seen; the marker is only
/// written once the legacy set is fully drained.
pub struct MigrationCoordinator {
    containers: ContainerRepo,
    marker: PathBuf,
}

impl MigrationCoordinator {
    pub fn new(db: Database, data_dir: &Path) -> Self {
        Self {
            containers: ContainerRepo::new(db),
            marker: data_dir.join(MIGRATION_MARKER),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.marker.exists()
    }

    /// Embed stored contents into every identified container the actor
    /// holds, consuming the store record. Returns how many items were
    /// updated. Safe to call repeatedly.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id()))]
    pub fn migrate_actor(&self, actor: &mut dyn Actor) -> Result<usize, CofferError> {
        if self.is_complete() {
            return Ok(0);
        }

        let mut updated = 0;
        for slot in scan_slots(actor) {
            let mut item = match actor.item_at(&slot) {
                Some(item) => item,
                None => continue,
            };
            let id = match item.container_id().cloned() {
                Some(id) => id,
                None => continue,
            };
            if let Some(stored) = self.containers.load(&id)? {
                item.set_embedded_contents(stored.contents);
                actor.put_item(&slot, Some(item));
                self.containers.delete(&id)?;
                updated += 1;
            }
        }
        if updated > 0 {
            info!(actor = %actor.id(), updated, "legacy records embedded");
        }
        Ok(updated)
    }

    /// Sweep all online actors, then write the completion marker if the
    /// legacy store has drained. Offline owners keep their records for a
    /// later sweep.
    pub fn run(&self, directory: &mut dyn ActorDirectory) -> Result<MigrationReport, CofferError> {
        if self.is_complete() {
            return Ok(MigrationReport {
                completed: true,
                ..MigrationReport::default()
            });
        }

        let mut report = MigrationReport::default();
        for actor_id in directory.online() {
            if let Some(actor) = directory.actor_mut(&actor_id) {
                report.items_migrated += self.migrate_actor(actor)?;
            }
        }

        report.records_remaining = self.containers.count()?;
        if report.records_remaining == 0 {
            self.write_marker()?;
            report.completed = true;
            info!("legacy store drained, migration complete");
        } else {
            warn!(
                remaining = report.records_remaining,
                "legacy records awaiting offline owners"
            );
        }
        Ok(report)
    }

    fn write_marker(&self) -> Result<(), CofferError> {
        std::fs::write(&self.marker, chrono::Utc::now().to_rfc3339())
            .map_err(|e| StoreError::Io(format!("migration marker: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockActor, MockDirectory};
    use coffer_core::{ContainerId, ContentRecord, Item, SlotRef};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("coffer-migration-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn identified_box(id: &ContainerId) -> Item {
        let mut item = Item::container("shell_box");
        item.set_container_id(id.clone());
        item
    }

    #[test]
    fn migrates_online_actor_and_writes_marker() {
        let db = Database::in_memory().unwrap();
        let dir = temp_dir();
        let repo = ContainerRepo::new(db.clone());

        let id = ContainerId::new();
        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain("dust", 4))).unwrap();
        repo.save(&id, None, &record).unwrap();

        let mut actor = MockActor::new("steve");
        actor.set_inventory_slot(3, Some(identified_box(&id)));
        let mut directory = MockDirectory::new();
        let actor_id = directory.insert(actor);

        let coordinator = MigrationCoordinator::new(db, &dir);
        let report = coordinator.run(&mut directory).unwrap();
        assert_eq!(report.items_migrated, 1);
        assert_eq!(report.records_remaining, 0);
        assert!(report.completed);
        assert!(coordinator.is_complete());

        // Contents now ride on the item; the record is gone.
        let item = directory
            .get(&actor_id)
            .unwrap()
            .item_at(&SlotRef::Inventory(3))
            .unwrap();
        assert_eq!(item.embedded_contents().unwrap(), &record);
        assert_eq!(repo.count().unwrap(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn offline_owner_defers_completion() {
        let db = Database::in_memory().unwrap();
        let dir = temp_dir();
        let repo = ContainerRepo::new(db.clone());

        let id = ContainerId::new();
        repo.save(&id, None, &ContentRecord::empty(27)).unwrap();

        // The owning actor is not connected.
        let mut directory = MockDirectory::new();
        let coordinator = MigrationCoordinator::new(db.clone(), &dir);
        let report = coordinator.run(&mut directory).unwrap();
        assert_eq!(report.items_migrated, 0);
        assert_eq!(report.records_remaining, 1);
        assert!(!report.completed);
        assert!(!coordinator.is_complete());

        // Owner reconnects; the lazy retry drains the record.
        let mut actor = MockActor::new("late");
        actor.set_main_hand(Some(identified_box(&id)));
        directory.insert(actor);

        let report = coordinator.run(&mut directory).unwrap();
        assert_eq!(report.items_migrated, 1);
        assert!(report.completed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn completed_migration_is_a_noop() {
        let db = Database::in_memory().unwrap();
        let dir = temp_dir();

        let coordinator = MigrationCoordinator::new(db.clone(), &dir);
        let mut directory = MockDirectory::new();
        assert!(coordinator.run(&mut directory).unwrap().completed);

        // Records created after completion are live data, not legacy.
        let repo = ContainerRepo::new(db);
        let id = ContainerId::new();
        repo.save(&id, None, &ContentRecord::empty(27)).unwrap();

        let mut actor = MockActor::new("steve");
        actor.set_main_hand(Some(identified_box(&id)));
        let actor_id = directory.insert(actor);

        let report = coordinator.run(&mut directory).unwrap();
        assert_eq!(report.items_migrated, 0);
        assert!(report.completed);
        assert_eq!(repo.count().unwrap(), 1);
        assert!(directory
            .get(&actor_id)
            .unwrap()
            .item_at(&SlotRef::MainHand)
            .unwrap()
            .embedded_contents()
            .is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unidentified_items_are_ignored() {
        let db = Database::in_memory().unwrap();
        let dir = temp_dir();

        let mut actor = MockActor::new("steve");
        actor.set_main_hand(Some(Item::container("shell_box")));
        actor.set_inventory_slot(0, Some(Item::plain("dust", 1)));
        let mut directory = MockDirectory::new();
        directory.insert(actor);

        let coordinator = MigrationCoordinator::new(db, &dir);
        let report = coordinator.run(&mut directory).unwrap();
        assert_eq!(report.items_migrated, 0);
        assert!(report.completed);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
