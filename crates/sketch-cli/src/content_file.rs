//! A drawing's content kept in a JSON file on disk.
//!
//! Plays the editor's role for the scheduler: [`ContentFile::reload`] parses
//! the file into the in-memory copy that `current_content` hands out. A file
//! that fails to parse (e.g. caught mid-write) leaves the last good copy in
//! place.

use sketch_core::{Content, EditorSurface, Fingerprint};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentFileError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} is not valid drawing content: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub struct ContentFile {
    path: PathBuf,
    content: RwLock<Content>,
}

impl ContentFile {
    pub fn new(path: PathBuf, initial: Content) -> Self {
        Self {
            path,
            content: RwLock::new(initial),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. Returns whether the content's fingerprint changed.
    pub fn reload(&self) -> Result<bool, ContentFileError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ContentFileError::Read {
            path: self.path.clone(),
            source,
        })?;
        let parsed: Content =
            serde_json::from_str(&raw).map_err(|source| ContentFileError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut content = self.content.write().unwrap_or_else(|e| e.into_inner());
        let changed = Fingerprint::of(&parsed) != Fingerprint::of(&content);
        *content = parsed;
        Ok(changed)
    }

    /// Write the in-memory content to the file.
    pub fn export(&self) -> Result<(), ContentFileError> {
        let raw = serde_json::to_string_pretty(&self.current_content()).map_err(|source| {
            ContentFileError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, raw).map_err(|source| ContentFileError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl EditorSurface for ContentFile {
    fn current_content(&self) -> Content {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketch_core::Element;
    use tempfile::TempDir;

    #[test]
    fn test_reload_detects_changes() {
        let temp = TempDir::new().unwrap();
        let file = ContentFile::new(temp.path().join("drawing.json"), Content::default());
        file.export().unwrap();
        assert!(!file.reload().unwrap());

        let mut content = Content::default();
        content
            .elements
            .push(Element::new("a", "ellipse", 10.0, 20.0));
        std::fs::write(file.path(), serde_json::to_string(&content).unwrap()).unwrap();

        assert!(file.reload().unwrap());
        assert_eq!(file.current_content(), content);
        assert!(!file.reload().unwrap());
    }

    #[test]
    fn test_unparsable_file_keeps_last_good_content() {
        let temp = TempDir::new().unwrap();
        let mut initial = Content::default();
        initial.elements.push(Element::new("a", "line", 0.0, 0.0));
        let file = ContentFile::new(temp.path().join("drawing.json"), initial.clone());

        std::fs::write(file.path(), "{\"elements\": [").unwrap();
        assert!(matches!(
            file.reload(),
            Err(ContentFileError::Parse { .. })
        ));
        assert_eq!(file.current_content(), initial);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let temp = TempDir::new().unwrap();
        let file = ContentFile::new(temp.path().join("nope.json"), Content::default());
        assert!(matches!(file.reload(), Err(ContentFileError::Read { .. })));
    }
}
