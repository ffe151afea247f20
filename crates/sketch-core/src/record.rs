//! RecordStore: one serialized document per key.

use crate::kv::{KeyValueStore, StoreError};
use crate::model::{Document, DocumentId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Failed to encode record {id}: {source}")]
    Encode {
        id: DocumentId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt record at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub struct RecordStore<S> {
    store: Arc<S>,
    prefix: String,
}

impl<S: KeyValueStore> RecordStore<S> {
    pub fn new(store: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, id: &DocumentId) -> String {
        format!("{}{}", self.prefix, id)
    }

    pub async fn get(&self, id: &DocumentId) -> Result<Option<Document>, RecordError> {
        let key = self.key(id);
        match self.store.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| RecordError::Decode { key, source }),
            None => Ok(None),
        }
    }

    pub async fn put(&self, doc: &Document) -> Result<(), RecordError> {
        let raw = serde_json::to_string(doc).map_err(|source| RecordError::Encode {
            id: doc.id.clone(),
            source,
        })?;
        self.store.set(&self.key(&doc.id), &raw).await?;
        Ok(())
    }

    pub async fn remove(&self, id: &DocumentId) -> Result<(), RecordError> {
        self.store.remove(&self.key(id)).await?;
        Ok(())
    }

    /// Ids of every record in the store, indexed or not.
    pub async fn ids(&self) -> Result<Vec<DocumentId>, RecordError> {
        let keys = self.store.keys(&self.prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&self.prefix))
            .filter_map(|id| id.parse().ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::model::Content;
    use chrono::Utc;

    fn doc(id: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.parse().unwrap(),
            name: format!("doc {id}"),
            tags: Default::default(),
            content: Content::default(),
            thumbnail: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let kv = Arc::new(InMemoryKv::new());
        let records = RecordStore::new(kv.clone(), "drawing:");

        let d = doc("one");
        records.put(&d).await.unwrap();
        assert!(kv.get("drawing:one").await.unwrap().is_some());
        assert_eq!(records.get(&d.id).await.unwrap(), Some(d.clone()));

        records.remove(&d.id).await.unwrap();
        assert_eq!(records.get(&d.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_decode_error() {
        let kv = Arc::new(InMemoryKv::new());
        kv.set("drawing:bad", "{not json").await.unwrap();
        let records = RecordStore::new(kv, "drawing:");

        let err = records.get(&"bad".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, RecordError::Decode { ref key, .. } if key == "drawing:bad"));
    }

    #[tokio::test]
    async fn test_ids_lists_only_prefixed_keys() {
        let kv = Arc::new(InMemoryKv::new());
        let records = RecordStore::new(kv.clone(), "drawing:");
        records.put(&doc("a")).await.unwrap();
        records.put(&doc("b")).await.unwrap();
        kv.set("drawing-index", "[]").await.unwrap();

        let ids: Vec<String> = records
            .ids()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
