//! File watcher for a single content file.
//!
//! Watches the parent directory rather than the file itself: editors commonly
//! save by writing a temp file and renaming it over the original, which would
//! end a watch on the old inode. Debouncing is left to the autosave scheduler.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, trace};

pub struct ContentWatcher {
    path: PathBuf,
    /// Watcher handle (must keep alive)
    _watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<()>,
}

impl ContentWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        // Canonicalize so event paths (which are absolute) compare equal
        let path = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {:?}", path))?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("{:?} has no parent directory", path))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let target = path.clone();

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if Self::is_relevant(&event, &target) {
                        trace!("Content file event: {:?}", event.kind);
                        // Receiver dropped means we are shutting down
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path,
            _watcher: watcher,
            event_rx,
        })
    }

    fn is_relevant(event: &Event, target: &Path) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
        ) && event.paths.iter().any(|p| p == target)
    }

    /// Wait for the next change. `None` once the watcher has stopped.
    pub async fn changed(&mut self) -> Option<()> {
        let next = self.event_rx.recv().await;
        // Collapse a burst of events into one notification
        while self.event_rx.try_recv().is_ok() {}
        next
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn test_only_target_writes_are_relevant() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("drawing.json");
        let other = temp.path().join("other.json");

        assert!(ContentWatcher::is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), &target),
            &target
        ));
        assert!(ContentWatcher::is_relevant(
            &event(EventKind::Create(CreateKind::File), &target),
            &target
        ));
        assert!(!ContentWatcher::is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), &other),
            &target
        ));
        assert!(!ContentWatcher::is_relevant(
            &event(EventKind::Remove(RemoveKind::File), &target),
            &target
        ));
    }

    #[tokio::test]
    async fn test_watcher_requires_existing_file() {
        let temp = TempDir::new().unwrap();
        assert!(ContentWatcher::new(&temp.path().join("missing.json")).is_err());
    }
}
