//! Repository: create/load/update/delete over the record and index stores.
//!
//! The backing store has no multi-key transactions, so write order decides
//! what a crash can leave behind:
//! - create writes the record, then the index entry
//! - delete marks the record deleted, removes the index entry, then the record
//!
//! Either way an interrupted operation leaves an orphan record and never an
//! index entry pointing at nothing. [`Repository::repair`] re-links orphans
//! from interrupted creates and purges the marked leftovers of deletes.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, StoreConfig};
use crate::index::{IndexError, IndexStore};
use crate::kv::KeyValueStore;
use crate::model::{Content, Document, DocumentId, DocumentPatch, DocumentSummary, Tags};
use crate::record::{RecordError, RecordStore};

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    #[error("Failed to serialize document {id}: {source}")]
    Serialization {
        id: DocumentId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read record {id}: {source}")]
    RecordRead {
        id: DocumentId,
        #[source]
        source: RecordError,
    },

    #[error("Failed to write record {id}: {source}")]
    RecordWrite {
        id: DocumentId,
        #[source]
        source: RecordError,
    },

    #[error("Failed to read index: {0}")]
    IndexRead(#[source] IndexError),

    #[error("Failed to update index entry for {id}: {source}")]
    IndexWrite {
        id: DocumentId,
        #[source]
        source: IndexError,
    },

    #[error("Removed {id} from the index but its record remains: {source}")]
    PartialDelete {
        id: DocumentId,
        #[source]
        source: RecordError,
    },

    #[error("Failed to rewrite index during repair: {0}")]
    IndexRepair(#[source] IndexError),

    #[error("Failed to list records: {0}")]
    Listing(#[source] RecordError),
}

impl RepositoryError {
    /// Whether trying the same operation again later could succeed.
    ///
    /// Serialization failures and missing documents are permanent; storage
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RepositoryError::NotFound(_)
                | RepositoryError::Serialization { .. }
                | RepositoryError::RecordRead {
                    source: RecordError::Decode { .. },
                    ..
                }
        )
    }

    fn record_write(id: &DocumentId, source: RecordError) -> Self {
        match source {
            RecordError::Encode { source, .. } => RepositoryError::Serialization {
                id: id.clone(),
                source,
            },
            source => RepositoryError::RecordWrite {
                id: id.clone(),
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Outcome of [`Repository::repair`].
#[derive(Debug, Default)]
pub struct RepairReport {
    /// Orphan records that were added back to the index
    pub relinked: Vec<DocumentId>,
    /// Index entries dropped because their record no longer exists
    pub dropped_dangling: Vec<DocumentId>,
    /// Repeated index entries that were collapsed
    pub removed_duplicates: usize,
    /// Records of interrupted deletes that were removed
    pub purged: Vec<DocumentId>,
    /// Orphan records that could not be decoded and were left in place
    pub unreadable: Vec<DocumentId>,
}

impl RepairReport {
    pub fn has_changes(&self) -> bool {
        !self.relinked.is_empty()
            || !self.dropped_dangling.is_empty()
            || !self.purged.is_empty()
            || self.removed_duplicates > 0
    }
}

/// Per-document locks held across a record's read-modify-write, so an
/// update cannot write back a record that a delete removed meanwhile.
#[derive(Default)]
struct RecordLocks {
    locks: Mutex<HashMap<DocumentId, Arc<AsyncMutex<()>>>>,
}

impl RecordLocks {
    async fn acquire(&self, id: &DocumentId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only the map refers to are neither held nor awaited
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Repository<S> {
    records: RecordStore<S>,
    index: IndexStore<S>,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
}

impl<S: KeyValueStore> Repository<S> {
    /// Repository with the default key layout and the system clock.
    pub fn new(store: S) -> Self {
        let config = StoreConfig::default();
        let store = Arc::new(store);
        Self {
            records: RecordStore::new(store.clone(), config.record_prefix),
            index: IndexStore::new(store, config.index_key),
            clock: Arc::new(SystemClock),
            locks: RecordLocks::default(),
        }
    }

    pub fn with_config(
        store: S,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let store = Arc::new(store);
        Ok(Self {
            records: RecordStore::new(store.clone(), config.record_prefix),
            index: IndexStore::new(store, config.index_key),
            clock,
            locks: RecordLocks::default(),
        })
    }

    /// Create an empty document and index it.
    pub async fn create(&self, name: &str, tags: Tags) -> Result<Document> {
        let now = self.clock.now();
        let doc = Document {
            id: DocumentId::generate(),
            name: name.to_string(),
            tags,
            content: Content::default(),
            thumbnail: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        if let Err(e) = self.records.put(&doc).await {
            error!(
                "Failed to write record {} for new document {:?}: {}",
                self.records.key(&doc.id),
                doc.name,
                e
            );
            return Err(RepositoryError::record_write(&doc.id, e));
        }

        if let Err(e) = self.index.prepend(&doc.id).await {
            warn!(
                "Wrote record for {} but failed to update index {}: {} (orphan left for repair)",
                doc.id,
                self.index.key(),
                e
            );
            return Err(RepositoryError::IndexWrite {
                id: doc.id,
                source: e,
            });
        }

        info!("Created document {} ({:?})", doc.id, doc.name);
        Ok(doc)
    }

    /// Read one document by id. Does not consult the index.
    ///
    /// A document whose delete has started reads as absent.
    pub async fn load(&self, id: &DocumentId) -> Result<Option<Document>> {
        let doc = self
            .records
            .get(id)
            .await
            .map_err(|source| RepositoryError::RecordRead {
                id: id.clone(),
                source,
            })?;
        Ok(doc.filter(|doc| !doc.is_deleted()))
    }

    /// All indexed documents, most recently updated first.
    ///
    /// Index entries without a readable record are skipped and logged.
    pub async fn load_all(&self) -> Result<Vec<Document>> {
        let ids = self.index.read().await.map_err(RepositoryError::IndexRead)?;

        let mut seen = HashSet::with_capacity(ids.len());
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id.clone()) {
                debug!("Duplicate index entry {}", id);
                continue;
            }
            match self.records.get(&id).await {
                Ok(Some(doc)) if doc.is_deleted() => {
                    debug!("Skipping {} (delete in progress)", id)
                }
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => warn!("Index entry {} has no record, skipping", id),
                Err(e @ RecordError::Decode { .. }) => {
                    warn!("Skipping unreadable record {}: {}", id, e)
                }
                Err(source) => return Err(RepositoryError::RecordRead { id, source }),
            }
        }

        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    /// Listing view of [`Repository::load_all`].
    pub async fn list_summaries(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self.load_all().await?.iter().map(Document::summary).collect())
    }

    /// Raw index order: creation order, newest first.
    pub async fn list_ids(&self) -> Result<Vec<DocumentId>> {
        self.index.read().await.map_err(RepositoryError::IndexRead)
    }

    /// Apply `patch` to a stored document and bump `updated_at`.
    pub async fn update(&self, id: &DocumentId, patch: DocumentPatch) -> Result<Document> {
        let _guard = self.locks.acquire(id).await;
        let mut doc = self
            .load(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;

        let previous = doc.updated_at;
        patch.apply_to(&mut doc);
        doc.updated_at = next_timestamp(previous, self.clock.now());

        if let Err(e) = self.records.put(&doc).await {
            error!("Failed to write record {}: {}", self.records.key(id), e);
            return Err(RepositoryError::record_write(id, e));
        }

        debug!("Updated document {} at {}", id, doc.updated_at);
        Ok(doc)
    }

    /// Remove a document: mark the record, drop the index entry, then remove
    /// the record.
    ///
    /// Returns whether the id was present in the index. Waits for an update
    /// of the same document that is already writing.
    pub async fn delete(&self, id: &DocumentId) -> Result<bool> {
        let _guard = self.locks.acquire(id).await;
        let existing = self
            .records
            .get(id)
            .await
            .map_err(|source| RepositoryError::RecordRead {
                id: id.clone(),
                source,
            })?;

        if let Some(mut doc) = existing.filter(|doc| !doc.is_deleted()) {
            doc.deleted_at = Some(self.clock.now());
            if let Err(e) = self.records.put(&doc).await {
                error!("Failed to mark {} as deleted: {}", id, e);
                return Err(RepositoryError::record_write(id, e));
            }
        }

        let was_indexed =
            self.index
                .remove(id)
                .await
                .map_err(|source| RepositoryError::IndexWrite {
                    id: id.clone(),
                    source,
                })?;

        if let Err(e) = self.records.remove(id).await {
            error!(
                "Removed {} from the index but failed to remove record {}: {}",
                id,
                self.records.key(id),
                e
            );
            return Err(RepositoryError::PartialDelete {
                id: id.clone(),
                source: e,
            });
        }

        if was_indexed {
            info!("Deleted document {}", id);
        } else {
            warn!("Deleted {} which was not in the index", id);
        }
        Ok(was_indexed)
    }

    /// Restore index/record consistency after interrupted operations.
    ///
    /// Orphan records are prepended in creation order. Dangling and duplicate
    /// index entries are dropped. Records marked deleted are unindexed and
    /// removed. Documents created concurrently are left alone.
    pub async fn repair(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        // Index first: any id it holds had its record written before it
        let indexed = self.index.read().await.map_err(RepositoryError::IndexRead)?;
        let stored: HashSet<DocumentId> = self
            .records
            .ids()
            .await
            .map_err(RepositoryError::Listing)?
            .into_iter()
            .collect();
        let indexed_set: HashSet<&DocumentId> = indexed.iter().collect();

        let mut unlink: HashSet<DocumentId> = indexed
            .iter()
            .filter(|id| !stored.contains(*id))
            .cloned()
            .collect();

        let mut orphans = Vec::new();
        let mut purge = Vec::new();
        let mut ids: Vec<&DocumentId> = stored.iter().collect();
        ids.sort();
        for id in ids {
            match self.records.get(id).await {
                Ok(Some(doc)) if doc.is_deleted() => {
                    unlink.insert(doc.id.clone());
                    purge.push(doc.id);
                }
                Ok(Some(doc)) if !indexed_set.contains(&doc.id) => {
                    orphans.push((doc.created_at, doc.id))
                }
                Ok(_) => {}
                Err(e @ RecordError::Decode { .. }) => {
                    if !indexed_set.contains(id) {
                        warn!("Orphan record {} is unreadable, leaving it: {}", id, e);
                        report.unreadable.push(id.clone());
                    }
                }
                Err(source) => {
                    return Err(RepositoryError::RecordRead {
                        id: id.clone(),
                        source,
                    });
                }
            }
        }
        // Oldest first, so after prepending the newest ends up on top
        orphans.sort();

        let mut relinked = Vec::new();
        let mut duplicates = 0;
        let mut dropped = Vec::new();
        self.index
            .modify(|ids| {
                let mut seen = HashSet::with_capacity(ids.len());
                let before = ids.len();
                let mut unlinked = 0;
                ids.retain(|id| {
                    if unlink.contains(id) {
                        unlinked += 1;
                        if !stored.contains(id) && !dropped.contains(id) {
                            dropped.push(id.clone());
                        }
                        return false;
                    }
                    seen.insert(id.clone())
                });
                duplicates = before - ids.len() - unlinked;

                for (_, id) in &orphans {
                    if seen.insert(id.clone()) {
                        ids.insert(0, id.clone());
                        relinked.push(id.clone());
                    }
                }
                unlinked > 0 || duplicates > 0 || !relinked.is_empty()
            })
            .await
            .map_err(RepositoryError::IndexRepair)?;

        for id in &relinked {
            info!("Re-linked orphan record {}", id);
        }
        for id in &dropped {
            info!("Dropped dangling index entry {}", id);
        }
        if duplicates > 0 {
            info!("Removed {} duplicate index entries", duplicates);
        }

        // Index entries are gone; now the records can go
        for id in purge {
            self.records
                .remove(&id)
                .await
                .map_err(|source| RepositoryError::PartialDelete {
                    id: id.clone(),
                    source,
                })?;
            info!("Purged record of interrupted delete {}", id);
            report.purged.push(id);
        }

        report.relinked = relinked;
        report.dropped_dangling = dropped;
        report.removed_duplicates = duplicates;
        Ok(report)
    }
}

/// Strictly later than `previous`, even if the clock has not moved.
fn next_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}
