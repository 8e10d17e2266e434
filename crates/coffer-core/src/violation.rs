/// Integrity violations detected by the validator. Policy is fail-closed:
/// any of these aborts the save with nothing written.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("backing item identity changed: {detail}")]
    IdentityMismatch { detail: String },

    #[error("inventory rollback: inventories restored to pre-session state while container contents changed")]
    RollbackDetected,

    #[error("partial inventory rollback: {restored_pct}% of inventory slots restored while contents changed")]
    PartialRollback { restored_pct: u8 },

    #[error("total item count increased by {gained} during session")]
    CountIncreased { gained: u64 },

    #[error("count of '{kind}' increased during session ({before} -> {after})")]
    TypeIncreased {
        kind: String,
        before: u64,
        after: u64,
    },

    #[error("identical inventory state recurred {occurrences} times")]
    StateReplayed { occurrences: u32 },

    #[error("container record resized from {expected} to {actual} slots")]
    RecordResized { expected: usize, actual: usize },

    #[error("container nesting exceeds {max} levels")]
    NestingTooDeep { max: u32 },

    #[error("display name exceeds {max} characters")]
    DisplayNameTooLong { max: usize },

    #[error("lore exceeds {max_lines} lines or {max_len} characters per line")]
    LoreTooLarge { max_lines: usize, max_len: usize },
}

impl Violation {
    /// Stable classification string for security logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::RollbackDetected => "rollback",
            Self::PartialRollback { .. } => "partial_rollback",
            Self::CountIncreased { .. } => "count_increased",
            Self::TypeIncreased { .. } => "type_increased",
            Self::StateReplayed { .. } => "state_replayed",
            Self::RecordResized { .. } => "record_resized",
            Self::NestingTooDeep { .. } => "nesting_too_deep",
            Self::DisplayNameTooLong { .. } => "display_name_too_long",
            Self::LoreTooLarge { .. } => "lore_too_large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Violation::RollbackDetected.kind(), "rollback");
        assert_eq!(
            Violation::CountIncreased { gained: 3 }.kind(),
            "count_increased"
        );
        assert_eq!(Violation::NestingTooDeep { max: 3 }.kind(), "nesting_too_deep");
    }

    #[test]
    fn display_includes_detail() {
        let v = Violation::TypeIncreased {
            kind: "gem".into(),
            before: 2,
            after: 5,
        };
        let text = v.to_string();
        assert!(text.contains("gem"));
        assert!(text.contains("2 -> 5"));
    }
}
