pub mod containers;
pub mod database;
pub mod error;
pub mod pending;
pub mod row_helpers;
pub mod schema;

pub use containers::{ContainerRepo, StoredContainer};
pub use database::Database;
pub use error::StoreError;
pub use pending::{PendingSave, PendingSaveRepo};
