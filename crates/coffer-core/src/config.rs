use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("container_size must be a multiple of 9 between 9 and 54, got {0}")]
    InvalidSize(usize),

    #[error("invalid config JSON: {0}")]
    Parse(String),
}

/// Engine configuration. Retention windows and timeouts are tunables, not
/// invariants; the defaults mirror the values the rest of the documentation
/// assumes (27-slot containers, 5s loading staleness, 7-day retention).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CofferConfig {
    /// Slots in a newly created container record.
    pub container_size: usize,
    /// Title for the virtual view, passed through to the host.
    pub view_title: String,
    /// A loading flag older than this is considered stuck and force-cleared.
    pub loading_timeout_secs: u64,
    /// Auditor sweep interval.
    pub audit_interval_secs: u64,
    /// Pending-save entries older than this are discarded at startup.
    pub pending_retention_days: u64,
    /// Minimum gap between two opens by the same actor.
    pub open_cooldown_ms: u64,
    /// Rolling combined-hash history kept per actor for replay detection.
    pub state_history_limit: usize,
    /// Maximum container-in-container depth accepted by structural checks.
    pub max_nesting_depth: u32,
    pub max_display_name_len: usize,
    pub max_lore_lines: usize,
    pub max_lore_line_len: usize,
}

impl Default for CofferConfig {
    fn default() -> Self {
        Self {
            container_size: 27,
            view_title: "Container".to_string(),
            loading_timeout_secs: 5,
            audit_interval_secs: 5,
            pending_retention_days: 7,
            open_cooldown_ms: 200,
            state_history_limit: 10,
            max_nesting_depth: 3,
            max_display_name_len: 256,
            max_lore_lines: 50,
            max_lore_line_len: 256,
        }
    }
}

impl CofferConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let size = self.container_size;
        if size == 0 || size > 54 || size % 9 != 0 {
            return Err(ConfigError::InvalidSize(size));
        }
        Ok(())
    }
}
