use coffer_core::Violation;
use coffer_store::StoreError;

/// Errors surfaced by the session engine. Open/close failures fall into two
/// families: transient refusals the actor can retry, and integrity violations
/// that abort the operation with nothing written.
#[derive(Debug, thiserror::Error)]
pub enum CofferError {
    #[error("actor already has an active edit session")]
    AlreadyEditing,

    #[error("previous open is still loading")]
    Loading,

    #[error("open cooldown active, retry in {remaining_ms}ms")]
    Cooldown { remaining_ms: u64 },

    #[error("item is not a container")]
    NotAContainer,

    #[error("container {container} is being edited elsewhere")]
    Contended { container: String },

    #[error("actor went offline during open")]
    WentOffline,

    #[error("backing item disappeared during open")]
    ItemVanished,

    #[error("no active edit session for actor")]
    NoSession,

    #[error("integrity violation: {0}")]
    Integrity(#[from] Violation),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CofferError {
    /// Stable classification string for logs and host error handling.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyEditing => "already_editing",
            Self::Loading => "loading",
            Self::Cooldown { .. } => "cooldown",
            Self::NotAContainer => "not_a_container",
            Self::Contended { .. } => "contended",
            Self::WentOffline => "went_offline",
            Self::ItemVanished => "item_vanished",
            Self::NoSession => "no_session",
            Self::Integrity(_) => "integrity",
            Self::Store(_) => "store",
        }
    }

    /// Message suitable for showing to the actor. Integrity details are
    /// deliberately vague; the full reason goes to the security log.
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyEditing => "You are already editing a container.".to_string(),
            Self::Loading => "Still loading your container, hold on.".to_string(),
            Self::Cooldown { .. } => "You are doing that too fast.".to_string(),
            Self::NotAContainer => "That item cannot be opened.".to_string(),
            Self::Contended { .. } => {
                "This container is being edited by someone else.".to_string()
            }
            Self::WentOffline | Self::ItemVanished => {
                "The container could not be opened.".to_string()
            }
            Self::NoSession => "You have no open container.".to_string(),
            Self::Integrity(_) => {
                "Save refused: container contents failed verification.".to_string()
            }
            Self::Store(_) => "Storage is unavailable, try again shortly.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(CofferError::AlreadyEditing.kind(), "already_editing");
        assert_eq!(
            CofferError::Contended { container: "ctr_x".into() }.kind(),
            "contended"
        );
        assert_eq!(
            CofferError::Integrity(Violation::RollbackDetected).kind(),
            "integrity"
        );
    }

    #[test]
    fn integrity_user_message_hides_detail() {
        let err = CofferError::Integrity(Violation::CountIncreased { gained: 99 });
        assert!(!err.user_message().contains("99"));
    }
}
