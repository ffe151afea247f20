//! IndexStore: the ordered list of all document ids, stored as one record.
//!
//! Newest-created first. Updates never reorder it. Read-modify-write cycles
//! through one `IndexStore` are serialized; writers in other processes are
//! last-writer-wins.

use crate::kv::{KeyValueStore, StoreError};
use crate::model::DocumentId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Corrupt index at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode index: {0}")]
    Encode(#[source] serde_json::Error),
}

pub struct IndexStore<S> {
    store: Arc<S>,
    key: String,
    /// Serializes read-modify-write of the index record
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> IndexStore<S> {
    pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the index. A missing index record is an empty index.
    pub async fn read(&self) -> Result<Vec<DocumentId>, IndexError> {
        match self.store.get(&self.key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| IndexError::Corrupt {
                key: self.key.clone(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, ids: &[DocumentId]) -> Result<(), IndexError> {
        let raw = serde_json::to_string(ids).map_err(IndexError::Encode)?;
        self.store.set(&self.key, &raw).await?;
        Ok(())
    }

    /// Apply `f` to the current index and write it back if `f` returns true.
    ///
    /// Returns whether a write happened.
    pub async fn modify<F>(&self, f: F) -> Result<bool, IndexError>
    where
        F: FnOnce(&mut Vec<DocumentId>) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut ids = self.read().await?;
        if !f(&mut ids) {
            return Ok(false);
        }
        self.write(&ids).await?;
        Ok(true)
    }

    /// Put `id` at the front. No-op if already indexed.
    pub async fn prepend(&self, id: &DocumentId) -> Result<bool, IndexError> {
        self.modify(|ids| {
            if ids.contains(id) {
                return false;
            }
            ids.insert(0, id.clone());
            true
        })
        .await
    }

    /// Drop `id`. Returns whether it was present.
    pub async fn remove(&self, id: &DocumentId) -> Result<bool, IndexError> {
        self.modify(|ids| {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            ids.len() != before
        })
        .await
    }
}
