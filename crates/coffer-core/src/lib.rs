pub mod actor;
pub mod config;
pub mod ids;
pub mod item;
pub mod violation;

pub use actor::{scan_slots, Actor, ActorDirectory, SecurityNotifier};
pub use config::{CofferConfig, ConfigError};
pub use ids::{ActorId, ContainerId, SessionId};
pub use item::{ContentRecord, Item, Payload, SlotRef};
pub use violation::Violation;
