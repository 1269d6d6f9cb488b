//! Durable key-value storage for the active entitlement.

pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryEntitlementStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEntitlementStore;
pub use r#trait::{CURRENT_SUBSCRIPTION_KEY, EntitlementStore, PersistenceError};
