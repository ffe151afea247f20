//! sketch-core: persistence coordination for editor-owned drawings.
//!
//! This crate provides:
//! - A key-value store abstraction with no cross-key transactions
//! - Per-document records plus a single ordered index, kept consistent by
//!   write ordering and a repair pass
//! - Content fingerprints for cheap change detection
//! - A debounced, single-flight autosave scheduler per open document

pub mod clock;
pub mod config;
pub mod events;
pub mod fingerprint;
pub mod index;
pub mod kv;
pub mod model;
pub mod record;
pub mod repository;
pub mod scheduler;
pub mod thumbnail;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AutosaveConfig, StoreConfig};
pub use events::{EventBus, SaveEvent, Subscription};
pub use fingerprint::Fingerprint;
pub use kv::{InMemoryKv, KeyValueStore, StoreError};
pub use model::{
    Content, Document, DocumentId, DocumentPatch, DocumentSummary, Element, LiveTags,
    MetadataSource, Tags, Thumbnail,
};
pub use repository::{RepairReport, Repository, RepositoryError};
pub use scheduler::{
    AutosaveScheduler, Collaborators, EditorSurface, SaveError, SaveOutcome, SavePhase,
};
pub use thumbnail::{DisabledThumbnails, ThumbnailError, ThumbnailRenderer};
