//! KeyValueStore trait abstraction for the backing store.
//!
//! Implementations:
//! - `InMemoryKv` - For testing (supports write-failure injection)
//! - `DirKv` (in sketch-cli) - One file per key under a data directory
//!
//! Each key is individually atomic. There are no cross-key transactions, which
//! is why the repository orders its writes carefully.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Asynchronous string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// List all keys starting with `prefix`, in lexicographic order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory store for testing.
///
/// Writes can be made to fail per key or globally to simulate quota errors
/// and crashes between two writes.
#[derive(Default)]
pub struct InMemoryKv {
    entries: RwLock<BTreeMap<String, String>>,
    failing_keys: RwLock<HashSet<String>>,
    fail_all_writes: AtomicBool,
    /// Successful `set` calls per key
    set_counts: RwLock<HashMap<String, usize>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` of `key` fail.
    pub fn fail_writes_to(&self, key: &str) {
        self.failing_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
    }

    /// Make every subsequent `set`/`remove` fail, regardless of key.
    pub fn fail_all_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        self.failing_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.fail_all_writes.store(false, Ordering::SeqCst);
    }

    /// Number of successful writes to `key` so far.
    pub fn set_count(&self, key: &str) -> usize {
        self.set_counts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.fail_all_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("writes disabled ({key})")));
        }
        let failing = self.failing_keys.read().unwrap_or_else(|e| e.into_inner());
        if failing.contains(key) {
            return Err(StoreError::Unavailable(format!("write to {key} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.check_writable(key)?;

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());

        *self
            .set_counts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// Lets tests keep a handle on the store they hand to a Repository
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_kv_basic_operations() {
        let kv = InMemoryKv::new();

        kv.set("a", "1").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.get("missing").await.unwrap(), None);

        kv.set("a", "2").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.set_count("a"), 2);

        kv.remove("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);

        // Removing an absent key is fine
        kv.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let kv = InMemoryKv::new();
        kv.set("drawing:b", "{}").await.unwrap();
        kv.set("drawing:a", "{}").await.unwrap();
        kv.set("drawing-index", "[]").await.unwrap();
        kv.set("other", "x").await.unwrap();

        let keys = kv.keys("drawing:").await.unwrap();
        assert_eq!(keys, vec!["drawing:a", "drawing:b"]);
        assert_eq!(kv.keys("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let kv = InMemoryKv::new();
        kv.set("idx", "[]").await.unwrap();

        kv.fail_writes_to("idx");
        assert!(matches!(
            kv.set("idx", "[1]").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(kv.remove("idx").await.is_err());
        // Other keys are unaffected, reads still work
        kv.set("rec", "{}").await.unwrap();
        assert_eq!(kv.get("idx").await.unwrap().as_deref(), Some("[]"));

        kv.fail_all_writes(true);
        assert!(kv.set("rec", "{}").await.is_err());

        kv.heal();
        kv.set("idx", "[1]").await.unwrap();
        assert_eq!(kv.get("idx").await.unwrap().as_deref(), Some("[1]"));
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let kv = InMemoryKv::new();
        assert!(matches!(
            kv.set("", "x").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(kv.is_empty());
    }
}
