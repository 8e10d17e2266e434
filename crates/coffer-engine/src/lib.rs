pub mod auditor;
pub mod error;
pub mod identity;
pub mod locks;
pub mod migration;
pub mod mock;
pub mod sessions;
pub mod snapshot;
pub mod validator;

pub use auditor::{AuditReport, SessionAuditor};
pub use error::CofferError;
pub use identity::{IdentityResolver, Resolution};
pub use locks::{LockManager, LockPhase};
pub use migration::{MigrationCoordinator, MigrationReport, MIGRATION_MARKER};
pub use sessions::{CloseOutcome, EngineStats, OpenedView, SessionInfo, SessionManager};
pub use snapshot::{item_hash, record_hash, InventorySnapshot};
pub use validator::{IntegrityValidator, StateHistory};
