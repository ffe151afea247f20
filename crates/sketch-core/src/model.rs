//! Document model: the persisted drawing record and its parts.
//!
//! Records are stored as camelCase JSON. Element fields beyond the ones the
//! fingerprint reads are kept opaque so an editor can round-trip its own data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DocumentIdError {
    #[error("Document ID must not be empty")]
    Empty,
    #[error("Document ID must not contain whitespace: {0:?}")]
    Whitespace(String),
}

/// Opaque, immutable identifier of a drawing.
///
/// # Examples
/// ```
/// use sketch_core::DocumentId;
///
/// let id = DocumentId::generate();
/// let parsed: DocumentId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DocumentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DocumentIdError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(DocumentIdError::Whitespace(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

/// Ordered set of tags: insertion order, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(Vec<String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag. Returns false if it was blank or already present.
    pub fn insert(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.contains(tag) {
            return false;
        }
        self.0.push(tag.to_string());
        true
    }

    /// Remove a tag. Returns whether it was present.
    pub fn remove(&mut self, tag: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != tag.trim());
        self.0.len() != before
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        tags.iter().map(String::as_str).collect()
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.0
    }
}

impl<'a> FromIterator<&'a str> for Tags {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

/// A single drawing element.
///
/// Only the fields needed for change detection are typed; everything else the
/// editor stores is carried in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Revision counter, bumped by the editor on every edit of this element
    #[serde(default)]
    pub version: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            x,
            y,
            version: 1,
            extra: Map::new(),
        }
    }

    /// Move the element and bump its revision.
    pub fn move_to(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
        self.version += 1;
    }
}

/// Drawing content as produced by the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub app_state: Map<String, Value>,
    #[serde(default)]
    pub files: Map<String, Value>,
}

impl Content {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Derived preview image of a drawing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub mime_type: String,
    /// Encoded image data (base64 for raster formats, text for SVG)
    pub data: String,
}

/// A persisted drawing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when a delete has started; the record is about to be removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            element_count: self.content.elements.len(),
            has_thumbnail: self.thumbnail.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing view of a document without its content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub name: String,
    pub tags: Tags,
    pub element_count: usize,
    pub has_thumbnail: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a document. `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub name: Option<String>,
    pub tags: Option<Tags>,
    pub content: Option<Content>,
    pub thumbnail: Option<Thumbnail>,
}

impl DocumentPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn tags(tags: Tags) -> Self {
        Self {
            tags: Some(tags),
            ..Self::default()
        }
    }

    pub fn content(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(self, doc: &mut Document) {
        if let Some(name) = self.name {
            doc.name = name;
        }
        if let Some(tags) = self.tags {
            doc.tags = tags;
        }
        if let Some(content) = self.content {
            doc.content = content;
        }
        if let Some(thumbnail) = self.thumbnail {
            doc.thumbnail = Some(thumbnail);
        }
    }
}

/// Live source of document metadata edited outside the content editor.
///
/// Read at flush time, so edits made after a save was scheduled are the ones
/// that get persisted.
pub trait MetadataSource: Send + Sync {
    fn current(&self) -> Tags;
}

/// Shared, mutable tag list. Clones share the same underlying tags.
#[derive(Debug, Clone, Default)]
pub struct LiveTags {
    inner: Arc<RwLock<Tags>>,
}

impl LiveTags {
    pub fn new(tags: Tags) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tags)),
        }
    }

    pub fn set(&self, tags: Tags) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = tags;
    }

    pub fn add(&self, tag: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tag)
    }

    pub fn remove(&self, tag: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tag)
    }
}

impl MetadataSource for LiveTags {
    fn current(&self) -> Tags {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
