use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use coffer_core::ActorDirectory;

use crate::sessions::SessionManager;

/// What one audit sweep recovered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub sessions_ended: usize,
    pub stale_loading_cleared: usize,
    pub orphaned_locks_released: usize,
}

/// Periodic sweep over live sessions. Catches manipulation happening between
/// discrete interaction events: vanished or swapped backing items, sessions
/// whose actor left, leaked loading flags and locks.
pub struct SessionAuditor {
    manager: Arc<SessionManager>,
}

impl SessionAuditor {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Full sweep. Needs host directory access, so the host calls this from
    /// its mutation thread on its own cadence.
    pub fn audit(&self, directory: &mut dyn ActorDirectory) -> AuditReport {
        let mut sessions_ended = 0;
        let online = directory.online();

        for info in self.manager.sessions_snapshot() {
            if !online.contains(&info.actor_id)
                && self.manager.force_end(&info.actor_id).is_some()
            {
                sessions_ended += 1;
            }
        }

        for actor_id in online {
            if let Some(actor) = directory.actor_mut(&actor_id) {
                if self.manager.revalidate(actor) {
                    sessions_ended += 1;
                }
            }
        }

        let report = AuditReport {
            sessions_ended,
            stale_loading_cleared: self.manager.clear_stale_loading(),
            orphaned_locks_released: self.manager.release_orphaned_locks(),
        };
        if report != AuditReport::default() {
            info!(
                sessions_ended = report.sessions_ended,
                stale_loading = report.stale_loading_cleared,
                orphaned_locks = report.orphaned_locks_released,
                "audit sweep recovered state"
            );
        }
        report
    }

    /// Background half of the sweep: the recovery work that needs no host
    /// access, ticking at the configured interval until aborted.
    pub fn spawn(manager: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
        let interval_secs = manager.config().audit_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stale = manager.clear_stale_loading();
                let orphaned = manager.release_orphaned_locks();
                if stale + orphaned > 0 {
                    info!(stale, orphaned, "background audit recovered state");
                }
            }
        })
    }
}
