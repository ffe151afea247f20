//! AutosaveScheduler: debounced, single-flight persistence of one open document.
//!
//! Lifecycle of a session:
//!
//! 1. `attach` records the fingerprint of the stored content and starts a short
//!    grace period; change notifications during it are ignored (the editor
//!    reports its own initial load as a change).
//! 2. `on_change` compares the editor's current fingerprint with the last one
//!    it saw. A real change marks the session dirty and re-arms the debounce
//!    timer, so a burst of edits produces one save after the quiet period.
//! 3. A flush (timer expiry or `save_now`) snapshots content and tags, asks for
//!    a thumbnail, and calls `Repository::update`. Only one flush per session
//!    runs at a time; a request arriving meanwhile queues a single follow-up.
//! 4. `dispose` cancels timers. A flush already past its first suspension
//!    point still completes, but its result no longer touches session state.
//!
//! State is kept behind a `std::sync::Mutex` that is never held across an
//! `.await`.

use crate::config::AutosaveConfig;
use crate::events::{EventBus, SaveEvent};
use crate::fingerprint::Fingerprint;
use crate::kv::KeyValueStore;
use crate::model::{Content, Document, DocumentId, DocumentPatch, MetadataSource};
use crate::repository::{Repository, RepositoryError};
use crate::thumbnail::{ThumbnailError, ThumbnailRenderer};
use crate::timer::DebounceTimer;

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Read access to the editor's live content.
pub trait EditorSurface: Send + Sync {
    fn current_content(&self) -> Content;
}

impl<F> EditorSurface for F
where
    F: Fn() -> Content + Send + Sync,
{
    fn current_content(&self) -> Content {
        self()
    }
}

/// Everything a session talks to besides the repository.
#[derive(Clone)]
pub struct Collaborators {
    pub editor: Arc<dyn EditorSurface>,
    pub metadata: Arc<dyn MetadataSource>,
    pub thumbnails: Arc<dyn ThumbnailRenderer>,
    pub events: Arc<EventBus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Clean,
    Dirty,
    Flushing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The document was written.
    Saved { updated_at: DateTime<Utc> },
    /// Nothing changed since the last save; no write happened.
    Unchanged,
    /// A flush was already running; one follow-up was queued behind it.
    ///
    /// The follow-up only runs if that flush succeeds. After a failed flush
    /// it is dropped and the document stays dirty for the next trigger.
    Coalesced,
    /// The session was disposed; nothing was applied.
    Disposed,
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to save {id}: {source}")]
    Repository {
        id: DocumentId,
        #[source]
        source: RepositoryError,
    },
}

impl SaveError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SaveError::Repository { source, .. } => source.is_retryable(),
        }
    }
}

struct SessionState {
    initialized: bool,
    disposed: bool,
    in_flight: bool,
    follow_up: bool,
    /// Fingerprint of the content as of the last successful save
    saved_fingerprint: Fingerprint,
    /// Fingerprint of the content as of the last change we processed
    observed_fingerprint: Fingerprint,
    metadata_revision: u64,
    saved_metadata_revision: u64,
    last_saved_at: DateTime<Utc>,
    debounce: DebounceTimer,
    grace: DebounceTimer,
}

impl SessionState {
    fn is_dirty(&self) -> bool {
        self.observed_fingerprint != self.saved_fingerprint
            || self.metadata_revision != self.saved_metadata_revision
    }
}

struct Inner<S> {
    id: DocumentId,
    repository: Arc<Repository<S>>,
    deps: Collaborators,
    config: AutosaveConfig,
    state: Mutex<SessionState>,
    /// Signalled whenever an in-flight flush finishes
    idle: Notify,
}

/// Autosave session for one open document. Clones share the session.
pub struct AutosaveScheduler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for AutosaveScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeyValueStore + 'static> AutosaveScheduler<S> {
    /// Start a session for `document`, which must be the stored version the
    /// editor was loaded from.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(
        document: &Document,
        repository: Arc<Repository<S>>,
        deps: Collaborators,
        config: AutosaveConfig,
    ) -> Self {
        let stored = Fingerprint::of(&document.content);
        let inner = Arc::new(Inner {
            id: document.id.clone(),
            repository,
            deps,
            state: Mutex::new(SessionState {
                initialized: config.init_grace_ms == 0,
                disposed: false,
                in_flight: false,
                follow_up: false,
                saved_fingerprint: stored.clone(),
                observed_fingerprint: stored,
                metadata_revision: 0,
                saved_metadata_revision: 0,
                last_saved_at: document.updated_at,
                debounce: DebounceTimer::new(),
                grace: DebounceTimer::new(),
            }),
            config,
            idle: Notify::new(),
        });

        {
            let mut state = inner.lock();
            if !state.initialized {
                let weak = Arc::downgrade(&inner);
                state
                    .grace
                    .arm(inner.config.init_grace(), move |token| async move {
                        if let Some(inner) = weak.upgrade() {
                            let mut state = inner.lock();
                            if state.grace.fire(token) {
                                state.initialized = true;
                                trace!("Autosave session for {} initialized", inner.id);
                            }
                        }
                    });
            }
        }

        debug!("Attached autosave session for {}", document.id);
        Self { inner }
    }

    pub fn id(&self) -> &DocumentId {
        &self.inner.id
    }

    /// End the grace period early.
    pub fn mark_initialized(&self) {
        let mut state = self.inner.lock();
        state.grace.cancel();
        state.initialized = true;
    }

    /// The editor content changed.
    pub fn on_change(&self) {
        {
            let state = self.inner.lock();
            if state.disposed || !state.initialized {
                trace!("Ignoring change for {} (not accepting changes)", self.inner.id);
                return;
            }
        }

        let fingerprint = Fingerprint::of(&self.inner.deps.editor.current_content());

        let mut state = self.inner.lock();
        if state.disposed || fingerprint == state.observed_fingerprint {
            return;
        }
        state.observed_fingerprint = fingerprint;

        if state.is_dirty() {
            self.inner.arm_debounce(&mut state);
        } else {
            // Back to the saved content (e.g. undo)
            state.debounce.cancel();
        }
    }

    /// Tags were edited outside the content editor.
    pub fn on_metadata_change(&self) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        state.metadata_revision += 1;
        self.inner.arm_debounce(&mut state);
    }

    /// Cancel the pending debounce and flush immediately.
    pub async fn save_now(&self) -> Result<SaveOutcome, SaveError> {
        self.inner.lock().debounce.cancel();
        self.flush().await
    }

    /// Write the current content unless a flush is already running.
    pub async fn flush(&self) -> Result<SaveOutcome, SaveError> {
        Inner::flush(&self.inner).await
    }

    /// Save pending changes, wait for any in-flight flush, then dispose.
    pub async fn close(&self) -> Result<SaveOutcome, SaveError> {
        let outcome = loop {
            let idle = self.inner.idle.notified();
            match self.save_now().await {
                Ok(SaveOutcome::Coalesced) => idle.await,
                other => break other,
            }
        };
        self.dispose();
        outcome
    }

    /// Stop the session. Pending timers are cancelled; results of a flush
    /// that is still running are discarded.
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.debounce.cancel();
        state.grace.cancel();
        debug!("Disposed autosave session for {}", self.inner.id);
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().is_dirty()
    }

    pub fn is_saving(&self) -> bool {
        self.inner.lock().in_flight
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    pub fn phase(&self) -> SavePhase {
        let state = self.inner.lock();
        if state.in_flight {
            SavePhase::Flushing
        } else if state.is_dirty() {
            SavePhase::Dirty
        } else {
            SavePhase::Clean
        }
    }

    /// `updated_at` of the last successful save (or of the loaded document).
    pub fn last_saved_at(&self) -> DateTime<Utc> {
        self.inner.lock().last_saved_at
    }
}

impl<S: KeyValueStore + 'static> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm_debounce(self: &Arc<Self>, state: &mut SessionState) {
        let weak = Arc::downgrade(self);
        state
            .debounce
            .arm(self.config.debounce(), move |token| async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.lock().debounce.fire(token) {
                    return;
                }
                // Failures are logged and reported through the event bus
                let _ = Inner::flush(&inner).await;
            });
    }

    async fn flush(self: &Arc<Self>) -> Result<SaveOutcome, SaveError> {
        {
            let mut state = self.lock();
            if state.disposed {
                return Ok(SaveOutcome::Disposed);
            }
            if state.in_flight {
                state.follow_up = true;
                debug!("Flush for {} already running, queued a follow-up", self.id);
                return Ok(SaveOutcome::Coalesced);
            }
            state.in_flight = true;
        }

        let mut result = self.flush_once().await;
        loop {
            let again = {
                let mut state = self.lock();
                let again =
                    state.follow_up && !state.disposed && state.is_dirty() && result.is_ok();
                if state.follow_up && result.is_err() {
                    debug!("Dropping queued follow-up for {} after a failed flush", self.id);
                }
                state.follow_up = false;
                if !again {
                    state.in_flight = false;
                }
                again
            };
            if !again {
                break;
            }
            debug!("Running queued follow-up flush for {}", self.id);
            result = self.flush_once().await;
        }

        self.idle.notify_waiters();
        result
    }

    async fn flush_once(&self) -> Result<SaveOutcome, SaveError> {
        // Snapshot through the live accessors before the first suspension point
        let content = self.deps.editor.current_content();
        let tags = self.deps.metadata.current();
        let fingerprint = Fingerprint::of(&content);

        let metadata_revision = {
            let mut state = self.lock();
            state.observed_fingerprint = fingerprint.clone();
            if !state.is_dirty() {
                trace!("Nothing to save for {}", self.id);
                return Ok(SaveOutcome::Unchanged);
            }
            state.metadata_revision
        };

        let thumbnail = match self.deps.thumbnails.render(&content).await {
            Ok(thumbnail) => Some(thumbnail),
            Err(ThumbnailError::Unavailable) => {
                trace!("No thumbnail renderer for {}", self.id);
                None
            }
            Err(e) => {
                warn!("Saving {} without a new thumbnail: {}", self.id, e);
                if !self.lock().disposed {
                    self.deps.events.emit(SaveEvent::ThumbnailSkipped {
                        id: self.id.clone(),
                        reason: e.to_string(),
                    });
                }
                None
            }
        };

        let patch = DocumentPatch {
            name: None,
            tags: Some(tags),
            content: Some(content),
            thumbnail,
        };
        let result = self.repository.update(&self.id, patch).await;

        let disposed = {
            let mut state = self.lock();
            if !state.disposed {
                if let Ok(doc) = &result {
                    state.saved_fingerprint = fingerprint;
                    state.saved_metadata_revision = metadata_revision;
                    state.last_saved_at = doc.updated_at;
                }
            }
            state.disposed
        };

        match result {
            Ok(_) if disposed => {
                debug!("Discarding save result for disposed session {}", self.id);
                Ok(SaveOutcome::Disposed)
            }
            Ok(doc) => {
                debug!("Saved {} at {}", self.id, doc.updated_at);
                self.deps.events.emit(SaveEvent::Saved {
                    id: self.id.clone(),
                    updated_at: doc.updated_at,
                });
                Ok(SaveOutcome::Saved {
                    updated_at: doc.updated_at,
                })
            }
            Err(source) => {
                warn!("Failed to save {}: {}", self.id, source);
                if !disposed {
                    self.deps.events.emit(SaveEvent::Failed {
                        id: self.id.clone(),
                        error: source.to_string(),
                        retryable: source.is_retryable(),
                    });
                }
                Err(SaveError::Repository {
                    id: self.id.clone(),
                    source,
                })
            }
        }
    }
}
