use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use coffer_core::{
    scan_slots, Actor, ActorId, CofferConfig, ContainerId, ContentRecord, Item,
    SecurityNotifier, SessionId, SlotRef, Violation,
};
use coffer_store::{ContainerRepo, Database, PendingSaveRepo, StoreError};
use coffer_telemetry::SecurityLog;

use crate::error::CofferError;
use crate::identity::{IdentityResolver, Resolution};
use crate::locks::LockManager;
use crate::snapshot::{record_hash, InventorySnapshot};
use crate::validator::{IntegrityValidator, StateHistory};

/// One live edit session. At most one per actor; holds the open-time
/// snapshot the close-time validation compares against.
struct EditSession {
    session_id: SessionId,
    actor_id: ActorId,
    container_id: ContainerId,
    slot: SlotRef,
    /// The backing item as it looked at open, identifier already resolved.
    item: Item,
    opened: InventorySnapshot,
    /// Slot count of the record handed to the view; fixed per identifier.
    record_len: usize,
    opened_at: Instant,
}

/// Public view of a live session, for the auditor and admin tooling.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub actor_id: ActorId,
    pub container_id: ContainerId,
    pub slot: SlotRef,
    pub age: Duration,
}

impl From<&EditSession> for SessionInfo {
    fn from(session: &EditSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            actor_id: session.actor_id.clone(),
            container_id: session.container_id.clone(),
            slot: session.slot.clone(),
            age: session.opened_at.elapsed(),
        }
    }
}

/// What the host renders after a successful open.
#[derive(Clone, Debug)]
pub struct OpenedView {
    pub session_id: SessionId,
    pub container_id: ContainerId,
    pub title: String,
    pub contents: ContentRecord,
}

/// Where the contents ended up when a session closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing changed; nothing was written.
    Discarded,
    /// Durable store and embedded copy both updated.
    Saved,
    /// Backing item unavailable or write-back failed; contents parked in
    /// the pending-save table for the next open.
    Pended,
    /// Last resort: contents dropped at the actor's location.
    DroppedToWorld,
}

#[derive(Clone, Debug)]
pub struct EngineStats {
    pub active_sessions: usize,
    pub held_locks: usize,
    pub cached_containers: usize,
    pub pending_saves: i64,
}

/// Orchestrates the full open/close protocol: locking, identity resolution,
/// content loading, integrity validation, and write-back with fallback.
/// Constructed once at process start and shared by reference.
pub struct SessionManager {
    config: CofferConfig,
    locks: LockManager,
    identity: IdentityResolver,
    validator: IntegrityValidator,
    history: StateHistory,
    containers: ContainerRepo,
    pending: PendingSaveRepo,
    db: Database,
    cache: DashMap<ContainerId, ContentRecord>,
    sessions: DashMap<ActorId, EditSession>,
    loading: DashMap<ActorId, Instant>,
    last_open: DashMap<ActorId, Instant>,
    notifier: Option<Arc<dyn SecurityNotifier>>,
    security_log: Option<Arc<SecurityLog>>,
}

impl SessionManager {
    pub fn new(config: CofferConfig, db: Database) -> Self {
        let containers = ContainerRepo::new(db.clone());
        let pending = PendingSaveRepo::new(db.clone());

        match pending.purge_expired(config.pending_retention_days) {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "expired pending saves discarded"),
            Err(e) => warn!(error = %e, "pending-save purge failed"),
        }
        if let Err(e) = containers.purge_backups_older_than(config.pending_retention_days) {
            warn!(error = %e, "backup purge failed");
        }

        Self {
            validator: IntegrityValidator::new(config.clone()),
            history: StateHistory::new(config.state_history_limit),
            locks: LockManager::new(),
            identity: IdentityResolver::new(),
            containers,
            pending,
            db,
            cache: DashMap::new(),
            sessions: DashMap::new(),
            loading: DashMap::new(),
            last_open: DashMap::new(),
            notifier: None,
            security_log: None,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SecurityNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_security_log(mut self, log: Arc<SecurityLog>) -> Self {
        self.security_log = Some(log);
        self
    }

    pub fn config(&self) -> &CofferConfig {
        &self.config
    }

    /// Open the container item in the given slot for editing.
    ///
    /// The protocol: session/loading/cooldown guards, structural validation,
    /// identity resolution, provisional lock, content loading (the only
    /// suspension point), post-load re-checks, lock confirmation, snapshot,
    /// session registration.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id(), slot = %slot))]
    pub async fn open(
        &self,
        actor: &mut dyn Actor,
        slot: &SlotRef,
    ) -> Result<OpenedView, CofferError> {
        let actor_id = actor.id().clone();

        if self.sessions.contains_key(&actor_id) {
            return Err(CofferError::AlreadyEditing);
        }

        let loading_timeout = Duration::from_secs(self.config.loading_timeout_secs);
        let stale_loading = match self.loading.get(&actor_id) {
            Some(entry) if entry.value().elapsed() < loading_timeout => {
                return Err(CofferError::Loading)
            }
            Some(_) => true,
            None => false,
        };
        if stale_loading {
            warn!(actor = %actor_id, "stale loading flag force-cleared");
            self.loading.remove(&actor_id);
        }

        let cooldown = Duration::from_millis(self.config.open_cooldown_ms);
        let remaining = self
            .last_open
            .get(&actor_id)
            .and_then(|last| cooldown.checked_sub(last.value().elapsed()));
        if let Some(remaining) = remaining {
            if !remaining.is_zero() {
                return Err(CofferError::Cooldown {
                    remaining_ms: remaining.as_millis() as u64,
                });
            }
        }

        let mut item = actor.item_at(slot).ok_or(CofferError::NotAContainer)?;
        if !item.is_container() {
            return Err(CofferError::NotAContainer);
        }

        if let Err(violation) = self.validator.validate_item(&item) {
            self.report_violation(&actor_id, actor.name(), item.container_id(), &violation);
            actor.notify(&CofferError::Integrity(violation.clone()).user_message());
            return Err(violation.into());
        }

        // Identity resolution. A duplicate is re-keyed on the spot and keeps
        // the contents it physically carries.
        let resolution = self.identity.resolve(item.container_id(), &actor_id);
        let carried = match &resolution {
            Resolution::Regenerated { original, fresh } => {
                info!(original = %original, fresh = %fresh, actor = %actor_id,
                    "duplicate container re-keyed at open");
                Some(
                    item.embedded_contents()
                        .cloned()
                        .unwrap_or_else(|| ContentRecord::empty(self.config.container_size)),
                )
            }
            _ => None,
        };
        let container_id = resolution.id().clone();
        item.set_container_id(container_id.clone());
        // Write the resolved identifier back into the slot before anything
        // can suspend, so the item never circulates id-less.
        actor.put_item(slot, Some(item.clone()));

        if !self.locks.try_reserve(&container_id, &actor_id) {
            return Err(CofferError::Contended {
                container: container_id.to_string(),
            });
        }

        self.loading.insert(actor_id.clone(), Instant::now());

        // Content resolution: carried duplicate contents, then cache, then
        // the durable store and pending-save table off the runtime thread.
        // The pending entry is only peeked here; it is deleted after the
        // open has fully committed, so an aborted open leaves it in place
        // for the next attempt.
        let mut pending_consumed = false;
        let resolved: Option<ContentRecord> = if carried.is_some() {
            carried
        } else if let Some(cached) = self.cache.get(&container_id) {
            Some(cached.value().clone())
        } else {
            let db = self.db.clone();
            let id = container_id.clone();
            let loaded = tokio::task::spawn_blocking(
                move || -> Result<Option<(ContentRecord, bool)>, StoreError> {
                    let pending = PendingSaveRepo::new(db.clone());
                    if let Some(parked) = pending.get(&id)? {
                        return Ok(Some((parked.contents, true)));
                    }
                    let repo = ContainerRepo::new(db);
                    Ok(repo.load(&id)?.map(|stored| (stored.contents, false)))
                },
            )
            .await;

            match loaded {
                Ok(Ok(Some((record, from_pending)))) => {
                    pending_consumed = from_pending;
                    Some(record)
                }
                Ok(Ok(None)) => None,
                Ok(Err(e)) => {
                    self.abort_open(&container_id, &actor_id);
                    return Err(e.into());
                }
                Err(join_err) => {
                    self.abort_open(&container_id, &actor_id);
                    return Err(StoreError::Io(join_err.to_string()).into());
                }
            }
        };

        // Re-checks after the suspension point: the actor may have left or
        // raced another open in the meantime.
        if !actor.is_online() {
            self.abort_open(&container_id, &actor_id);
            return Err(CofferError::WentOffline);
        }
        if self.sessions.contains_key(&actor_id) {
            self.abort_open(&container_id, &actor_id);
            return Err(CofferError::AlreadyEditing);
        }

        let contents = resolved
            .or_else(|| item.embedded_contents().cloned())
            .unwrap_or_else(|| ContentRecord::empty(self.config.container_size));

        // The item may have been moved to a different slot while loading.
        let slot_now = match self.locate(actor, &container_id) {
            Some(found) => found,
            None => {
                self.abort_open(&container_id, &actor_id);
                return Err(CofferError::ItemVanished);
            }
        };

        if !self.locks.confirm(&container_id, &actor_id) {
            self.abort_open(&container_id, &actor_id);
            return Err(CofferError::Contended {
                container: container_id.to_string(),
            });
        }

        let opened = InventorySnapshot::capture(actor, &contents);
        let session = EditSession {
            session_id: SessionId::new(),
            actor_id: actor_id.clone(),
            container_id: container_id.clone(),
            slot: slot_now,
            item,
            opened,
            record_len: contents.len(),
            opened_at: Instant::now(),
        };
        let session_id = session.session_id.clone();

        self.cache.insert(container_id.clone(), contents.clone());
        self.sessions.insert(actor_id.clone(), session);
        self.loading.remove(&actor_id);
        self.last_open.insert(actor_id.clone(), Instant::now());

        // The open is committed; now the parked entry can be retired.
        if pending_consumed {
            let db = self.db.clone();
            let id = container_id.clone();
            let removed =
                tokio::task::spawn_blocking(move || PendingSaveRepo::new(db).take(&id)).await;
            match removed {
                Ok(Ok(_)) => info!(container = %container_id, "pending save consumed at open"),
                Ok(Err(e)) => {
                    warn!(container = %container_id, error = %e, "consumed pending entry not cleared")
                }
                Err(e) => {
                    warn!(container = %container_id, error = %e, "pending cleanup task failed")
                }
            }
        }

        info!(actor = %actor_id, container = %container_id, session = %session_id, "edit session opened");

        Ok(OpenedView {
            session_id,
            container_id,
            title: self.config.view_title.clone(),
            contents,
        })
    }

    /// Close the actor's session with the contents the view ended on.
    /// Fail-closed: a validation failure refuses the save with nothing
    /// written anywhere.
    #[instrument(skip(self, actor, edited), fields(actor_id = %actor.id()))]
    pub async fn close(
        &self,
        actor: &mut dyn Actor,
        edited: ContentRecord,
    ) -> Result<CloseOutcome, CofferError> {
        let actor_id = actor.id().clone();
        let session = match self.sessions.remove(&actor_id) {
            Some((_, session)) => session,
            None => return Err(CofferError::NoSession),
        };
        let container_id = session.container_id.clone();

        let result = self.close_inner(actor, &session, edited).await;

        self.locks.release(&container_id, &actor_id);
        self.loading.remove(&actor_id);
        actor.close_view();
        result
    }

    async fn close_inner(
        &self,
        actor: &mut dyn Actor,
        session: &EditSession,
        edited: ContentRecord,
    ) -> Result<CloseOutcome, CofferError> {
        let actor_id = &session.actor_id;
        let container_id = &session.container_id;

        // Record length is fixed per identifier; a resized record from the
        // host is refused before anything else looks at it.
        if edited.len() != session.record_len {
            let violation = Violation::RecordResized {
                expected: session.record_len,
                actual: edited.len(),
            };
            self.refuse(actor, container_id, &violation);
            return Err(violation.into());
        }

        // Unchanged contents short-circuit before validation and history
        // bookkeeping: a peek is not a state transition.
        if record_hash(&edited) == session.opened.container_hash() {
            return Ok(CloseOutcome::Discarded);
        }

        if let Err(violation) = self.validator.validate_record(&edited) {
            self.refuse(actor, container_id, &violation);
            return Err(violation.into());
        }

        let closing = InventorySnapshot::capture(actor, &edited);
        let recurrences = self.history.push(actor_id, closing.combined_hash());

        if let Err(violation) =
            self.validator
                .validate_close(&session.opened, &closing, recurrences)
        {
            self.refuse(actor, container_id, &violation);
            return Err(violation.into());
        }

        // Identity continuity: whatever sits in the slot now must be the
        // item that was opened. A missing item is tolerated (parked-save
        // path below); a swapped item refuses the save with nothing written.
        let backing = self
            .locate(actor, container_id)
            .and_then(|slot| actor.item_at(&slot).map(|item| (slot, item)));
        if let Some((_, current)) = &backing {
            if !current.same_identity(&session.item) {
                let violation = Violation::IdentityMismatch {
                    detail: format!(
                        "backing item changed from '{}' to '{}' during session",
                        session.item.kind, current.kind
                    ),
                };
                self.refuse(actor, container_id, &violation);
                return Err(violation.into());
            }
        }

        self.cache.insert(container_id.clone(), edited.clone());

        // Durable write, awaited so teardown can never race it.
        let store_ok = {
            let db = self.db.clone();
            let id = container_id.clone();
            let owner = actor_id.clone();
            let record = edited.clone();
            match tokio::task::spawn_blocking(move || {
                ContainerRepo::new(db).save(&id, Some(&owner), &record)
            })
            .await
            {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(container = %container_id, error = %e, "durable save failed");
                    false
                }
                Err(e) => {
                    warn!(container = %container_id, error = %e, "durable save task failed");
                    false
                }
            }
        };

        match backing {
            Some((slot, mut current)) => {
                current.set_embedded_contents(edited.clone());
                actor.put_item(&slot, Some(current));
                if store_ok {
                    info!(actor = %actor_id, container = %container_id, "session closed and saved");
                    Ok(CloseOutcome::Saved)
                } else {
                    self.pend_or_drop(actor, container_id, edited, false).await
                }
            }
            None => self.pend_or_drop(actor, container_id, edited, store_ok).await,
        }
    }

    /// Park the contents in the pending-save table; if even that fails,
    /// materialize them in the world rather than lose them.
    async fn pend_or_drop(
        &self,
        actor: &mut dyn Actor,
        container_id: &ContainerId,
        edited: ContentRecord,
        store_ok: bool,
    ) -> Result<CloseOutcome, CofferError> {
        let db = self.db.clone();
        let id = container_id.clone();
        let record = edited.clone();
        let parked = tokio::task::spawn_blocking(move || {
            PendingSaveRepo::new(db).put(&id, &record, store_ok)
        })
        .await;

        match parked {
            Ok(Ok(())) => {
                warn!(container = %container_id, "backing item unavailable, save parked");
                actor.notify("Your container was saved and will be restored when you next open it.");
                Ok(CloseOutcome::Pended)
            }
            Ok(Err(e)) => self.drop_unless_stored(actor, container_id, edited, store_ok, &e.to_string()),
            Err(e) => self.drop_unless_stored(actor, container_id, edited, store_ok, &e.to_string()),
        }
    }

    fn drop_unless_stored(
        &self,
        actor: &mut dyn Actor,
        container_id: &ContainerId,
        edited: ContentRecord,
        store_ok: bool,
        error: &str,
    ) -> Result<CloseOutcome, CofferError> {
        if store_ok {
            // The durable copy exists; dropping would duplicate.
            warn!(container = %container_id, error, "pending save failed, durable copy retained");
            Ok(CloseOutcome::Saved)
        } else {
            warn!(container = %container_id, error, "all write paths failed, dropping contents");
            actor.notify("Your container could not be saved; its contents were dropped at your feet.");
            actor.drop_items(edited.into_items());
            Ok(CloseOutcome::DroppedToWorld)
        }
    }

    /// Discard the actor's session without writing anything.
    pub fn cancel(&self, actor: &mut dyn Actor) -> Result<(), CofferError> {
        let actor_id = actor.id().clone();
        match self.sessions.remove(&actor_id) {
            Some((_, session)) => {
                self.locks.release(&session.container_id, &actor_id);
                self.loading.remove(&actor_id);
                actor.close_view();
                info!(actor = %actor_id, container = %session.container_id, "session cancelled");
                Ok(())
            }
            None => Err(CofferError::NoSession),
        }
    }

    /// Verify the backing item for the actor's session is still present and
    /// identity-matched; force-end the session otherwise. Returns true when
    /// the session was ended.
    pub fn revalidate(&self, actor: &mut dyn Actor) -> bool {
        let actor_id = actor.id().clone();
        let (container_id, original, age) = match self.sessions.get(&actor_id) {
            Some(session) => (
                session.container_id.clone(),
                session.item.clone(),
                session.opened_at.elapsed(),
            ),
            None => return false,
        };

        let intact = self
            .locate(actor, &container_id)
            .and_then(|slot| actor.item_at(&slot))
            .map(|current| current.same_identity(&original))
            .unwrap_or(false);
        if intact {
            return false;
        }

        self.force_end(&actor_id);
        actor.close_view();
        let violation = Violation::IdentityMismatch {
            detail: format!(
                "backing item missing or changed mid-session (session age {}s)",
                age.as_secs()
            ),
        };
        self.report_violation(&actor_id, actor.name(), Some(&container_id), &violation);
        actor.notify(&CofferError::Integrity(violation).user_message());
        true
    }

    /// Tear down a session without saving (offline actor, audit recovery).
    pub fn force_end(&self, actor_id: &ActorId) -> Option<SessionInfo> {
        let (_, session) = self.sessions.remove(actor_id)?;
        let info = SessionInfo::from(&session);
        self.locks.release(&session.container_id, actor_id);
        self.loading.remove(actor_id);
        warn!(actor = %actor_id, container = %session.container_id, "session force-ended");
        Some(info)
    }

    /// Drop loading flags older than the staleness timeout. Returns how many
    /// were cleared.
    pub fn clear_stale_loading(&self) -> usize {
        let timeout = Duration::from_secs(self.config.loading_timeout_secs);
        let stale: Vec<ActorId> = self
            .loading
            .iter()
            .filter(|entry| entry.value().elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for actor in &stale {
            warn!(actor = %actor, "stale loading flag cleared by audit");
            self.loading.remove(actor);
        }
        stale.len()
    }

    /// Release locks whose holder has neither a session nor an in-flight
    /// open. Returns how many were released.
    pub fn release_orphaned_locks(&self) -> usize {
        let age = Duration::from_secs(self.config.loading_timeout_secs);
        let mut released = 0;
        for (container, holder) in self.locks.held_longer_than(age) {
            let backed_by_session = self
                .sessions
                .get(&holder)
                .map(|session| session.container_id == container)
                .unwrap_or(false);
            if !backed_by_session
                && !self.loading.contains_key(&holder)
                && self.locks.force_release(&container)
            {
                released += 1;
            }
        }
        released
    }

    pub fn has_session(&self, actor_id: &ActorId) -> bool {
        self.sessions.contains_key(actor_id)
    }

    pub fn session_for(&self, actor_id: &ActorId) -> Option<SessionInfo> {
        self.sessions.get(actor_id).map(|s| SessionInfo::from(s.value()))
    }

    pub fn sessions_snapshot(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo::from(entry.value()))
            .collect()
    }

    pub fn stats(&self) -> Result<EngineStats, CofferError> {
        Ok(EngineStats {
            active_sessions: self.sessions.len(),
            held_locks: self.locks.len(),
            cached_containers: self.cache.len(),
            pending_saves: self.pending.count()?,
        })
    }

    /// Park every open session's last known contents and release all state.
    /// Called on process shutdown; returns how many sessions were parked.
    pub async fn shutdown(&self) -> Result<usize, CofferError> {
        let actors: Vec<ActorId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut parked = 0;

        for actor_id in actors {
            let session = match self.sessions.remove(&actor_id) {
                Some((_, session)) => session,
                None => continue,
            };
            if let Some(record) = self.cache.get(&session.container_id).map(|r| r.value().clone()) {
                let db = self.db.clone();
                let id = session.container_id.clone();
                let result = tokio::task::spawn_blocking(move || {
                    PendingSaveRepo::new(db).put(&id, &record, false)
                })
                .await;
                match result {
                    Ok(Ok(())) => parked += 1,
                    Ok(Err(e)) => warn!(container = %session.container_id, error = %e, "shutdown park failed"),
                    Err(e) => warn!(container = %session.container_id, error = %e, "shutdown park task failed"),
                }
            }
            self.locks.release(&session.container_id, &actor_id);
            self.loading.remove(&actor_id);
        }

        info!(parked, "session manager shut down");
        Ok(parked)
    }

    fn locate(&self, actor: &dyn Actor, container_id: &ContainerId) -> Option<SlotRef> {
        scan_slots(actor).into_iter().find(|slot| {
            actor
                .item_at(slot)
                .map(|item| item.container_id() == Some(container_id))
                .unwrap_or(false)
        })
    }

    fn abort_open(&self, container_id: &ContainerId, actor_id: &ActorId) {
        self.locks.release(container_id, actor_id);
        self.loading.remove(actor_id);
    }

    fn refuse(&self, actor: &dyn Actor, container_id: &ContainerId, violation: &Violation) {
        self.report_violation(actor.id(), actor.name(), Some(container_id), violation);
        actor.notify(&CofferError::Integrity(violation.clone()).user_message());
    }

    fn report_violation(
        &self,
        actor_id: &ActorId,
        actor_name: &str,
        container: Option<&ContainerId>,
        violation: &Violation,
    ) {
        warn!(
            actor = %actor_id,
            kind = violation.kind(),
            detail = %violation,
            "integrity violation"
        );
        if let Some(log) = &self.security_log {
            log.record(
                actor_id.as_str(),
                actor_name,
                container.map(|c| c.as_str()),
                violation.kind(),
                &violation.to_string(),
            );
        }
        if let Some(notifier) = &self.notifier {
            notifier.broadcast(actor_id, actor_name, container, &violation.to_string());
        }
    }
}
