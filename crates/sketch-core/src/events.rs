//! Save notifications for hosts that show save status.
//!
//! Sessions publish [`SaveEvent`]s on a shared [`EventBus`]. Delivery is
//! synchronous and fire-and-forget: the scheduler never waits on a listener,
//! so listeners should only record or forward the event.

use crate::model::DocumentId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SaveEvent {
    /// A flush wrote the document.
    Saved {
        id: DocumentId,
        #[serde(rename = "updatedAt")]
        updated_at: DateTime<Utc>,
    },
    /// A flush failed; the document is still dirty.
    Failed {
        id: DocumentId,
        error: String,
        /// Whether a later save may succeed
        retryable: bool,
    },
    /// The thumbnail could not be produced; the save went ahead without one.
    ThumbnailSkipped { id: DocumentId, reason: String },
}

impl SaveEvent {
    /// The document the event is about.
    pub fn document(&self) -> &DocumentId {
        match self {
            SaveEvent::Saved { id, .. }
            | SaveEvent::Failed { id, .. }
            | SaveEvent::ThumbnailSkipped { id, .. } => id,
        }
    }
}

type Listener = Arc<dyn Fn(&SaveEvent) + Send + Sync>;

struct Entry {
    /// `None` listens to every document
    document: Option<DocumentId>,
    listener: Listener,
}

/// Fan-out of save events to registered listeners. Share it as `Arc<EventBus>`.
#[derive(Default)]
pub struct EventBus {
    entries: Mutex<BTreeMap<u64, Entry>>,
    next_key: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to events for every document.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SaveEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(None, Arc::new(listener))
    }

    /// Listen to events for one document only.
    pub fn subscribe_to(
        self: &Arc<Self>,
        document: DocumentId,
        listener: impl Fn(&SaveEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(Some(document), Arc::new(listener))
    }

    fn register(self: &Arc<Self>, document: Option<DocumentId>, listener: Listener) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(key, Entry { document, listener });
        Subscription {
            bus: Arc::downgrade(self),
            key,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.entries().len()
    }

    pub fn emit(&self, event: SaveEvent) {
        // Collected first so a listener may (un)subscribe without deadlocking
        let targets: Vec<Listener> = self
            .entries()
            .values()
            .filter(|entry| {
                entry
                    .document
                    .as_ref()
                    .is_none_or(|doc| doc == event.document())
            })
            .map(|entry| Arc::clone(&entry.listener))
            .collect();

        for listener in targets {
            listener(&event);
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<EventBus>,
    key: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.entries().remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(id: &str) -> SaveEvent {
        SaveEvent::Saved {
            id: id.parse().unwrap(),
            updated_at: Utc::now(),
        }
    }

    fn recorder(bus: &Arc<EventBus>, only: Option<&str>) -> (Subscription, Arc<Mutex<Vec<SaveEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = move |event: &SaveEvent| sink.lock().unwrap().push(event.clone());
        let sub = match only {
            Some(id) => bus.subscribe_to(id.parse().unwrap(), listener),
            None => bus.subscribe(listener),
        };
        (sub, seen)
    }

    #[test]
    fn test_listeners_receive_events() {
        let bus = Arc::new(EventBus::new());
        let (_sub, seen) = recorder(&bus, None);

        bus.emit(saved("d1"));
        bus.emit(saved("d2"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_document_filter() {
        let bus = Arc::new(EventBus::new());
        let (_sub, seen) = recorder(&bus, Some("d1"));

        bus.emit(saved("d2"));
        bus.emit(saved("d1"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].document().as_str(), "d1");
    }

    #[test]
    fn test_dropping_subscription_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let (sub, seen) = recorder(&bus, None);
        assert_eq!(bus.listener_count(), 1);

        drop(sub);
        assert_eq!(bus.listener_count(), 0);
        bus.emit(saved("d1"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wire_format() {
        let event = SaveEvent::Failed {
            id: "d1".parse().unwrap(),
            error: "quota exceeded".into(),
            retryable: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "failed");
        assert_eq!(value["id"], "d1");
        assert_eq!(value["retryable"], true);

        let value = serde_json::to_value(saved("d1")).unwrap();
        assert_eq!(value["type"], "saved");
        assert!(value.get("updatedAt").is_some());
    }
}
