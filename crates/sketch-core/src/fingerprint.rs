//! Content fingerprints for cheap "did anything change?" checks.
//!
//! A fingerprint covers each element's id, type, position and revision, in
//! iteration order. Reordering elements changes the fingerprint: element order
//! is z-order in a drawing.

use crate::model::{Content, Element};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};

/// Token for content with no elements.
pub const EMPTY: &str = "empty";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a drawing with no elements.
    pub fn empty() -> Self {
        Self(EMPTY.to_string())
    }

    pub fn of(content: &Content) -> Self {
        Self::of_elements(&content.elements)
    }

    pub fn of_elements(elements: &[Element]) -> Self {
        if elements.is_empty() {
            return Self::empty();
        }

        let mut hasher = Sha256::new();
        for element in elements {
            // Length-prefix strings so ("ab","c") and ("a","bc") differ
            hasher.update((element.id.len() as u64).to_le_bytes());
            hasher.update(element.id.as_bytes());
            hasher.update((element.kind.len() as u64).to_le_bytes());
            hasher.update(element.kind.as_bytes());
            hasher.update(element.x.to_bits().to_le_bytes());
            hasher.update(element.y.to_bits().to_le_bytes());
            hasher.update(element.version.to_le_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == EMPTY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawing() -> Content {
        Content {
            elements: vec![
                Element::new("a", "rectangle", 0.0, 0.0),
                Element::new("b", "ellipse", 10.0, 5.0),
            ],
            ..Content::default()
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(Fingerprint::of(&drawing()), Fingerprint::of(&drawing()));
    }

    #[test]
    fn test_empty_content_uses_sentinel() {
        let fp = Fingerprint::of(&Content::default());
        assert_eq!(fp.as_str(), "empty");
        assert!(fp.is_empty());
        assert_ne!(Fingerprint::of(&drawing()), fp);
    }

    #[test]
    fn test_addition_changes_fingerprint() {
        let mut content = drawing();
        let before = Fingerprint::of(&content);
        content.elements.push(Element::new("c", "text", 1.0, 1.0));
        assert_ne!(before, Fingerprint::of(&content));
    }

    #[test]
    fn test_removal_changes_fingerprint() {
        let mut content = drawing();
        let before = Fingerprint::of(&content);
        content.elements.pop();
        assert_ne!(before, Fingerprint::of(&content));
    }

    #[test]
    fn test_revision_bump_changes_fingerprint() {
        let mut content = drawing();
        let before = Fingerprint::of(&content);
        content.elements[0].version += 1;
        assert_ne!(before, Fingerprint::of(&content));
    }

    #[test]
    fn test_move_changes_fingerprint() {
        let mut content = drawing();
        let before = Fingerprint::of(&content);
        content.elements[1].move_to(11.0, 5.0);
        assert_ne!(before, Fingerprint::of(&content));
    }

    #[test]
    fn test_reordering_changes_fingerprint() {
        let mut content = drawing();
        let before = Fingerprint::of(&content);
        content.elements.reverse();
        assert_ne!(before, Fingerprint::of(&content));
    }

    #[test]
    fn test_opaque_fields_are_ignored() {
        let mut content = drawing();
        let before = Fingerprint::of(&content);
        content.elements[0]
            .extra
            .insert("strokeColor".into(), "#f00".into());
        content.app_state.insert("zoom".into(), 2.into());
        assert_eq!(before, Fingerprint::of(&content));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let left = Content {
            elements: vec![Element::new("ab", "c", 0.0, 0.0)],
            ..Content::default()
        };
        let right = Content {
            elements: vec![Element::new("a", "bc", 0.0, 0.0)],
            ..Content::default()
        };
        assert_ne!(Fingerprint::of(&left), Fingerprint::of(&right));
    }
}
