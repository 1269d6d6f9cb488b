use async_trait::async_trait;
use thiserror::Error;

/// Key under which the active product identifier is stored.
pub const CURRENT_SUBSCRIPTION_KEY: &str = "@CURRENT_SUBSCRIPTION_KEY";

/// Storage operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("storage read failed: {0}")]
    Read(String),

    #[error("storage write failed: {0}")]
    Write(String),
}

/// Durable string key-value storage.
///
/// Implementations must make a completed `set` / `remove` visible to every
/// later `get`, including after a process restart.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}
