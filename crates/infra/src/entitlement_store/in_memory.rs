use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::r#trait::{EntitlementStore, PersistenceError};

/// In-memory key-value store.
///
/// Intended for tests/dev. Counts writes so callers can assert that a replay
/// did not rewrite the record, and can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    entries: RwLock<HashMap<String, String>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry (as if persisted by an earlier session).
    pub fn with_entry(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), value.into());
        }
        self
    }

    /// Current value without going through the async trait.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Number of successful `set` + `remove` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(PersistenceError::Write("storage is read-only".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PersistenceError::Read("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PersistenceError::Write("lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PersistenceError::Write("lock poisoned".to_string()))?;
        entries.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = InMemoryEntitlementStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "sub.a").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("sub.a"));

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.peek("k"), None);
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn failing_mode_rejects_writes_but_keeps_data() {
        let store = InMemoryEntitlementStore::new().with_entry("k", "sub.a");
        store.set_failing(true);

        assert!(matches!(store.set("k", "sub.b").await, Err(PersistenceError::Write(_))));
        assert!(store.remove("k").await.is_err());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("sub.a"));
        assert_eq!(store.writes(), 0);
    }
}
