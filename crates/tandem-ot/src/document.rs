//! Versioned document snapshot.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{OtError, Update};

/// A document's content together with the number of updates that produced it.
///
/// Version and content only ever change together: [`DocumentState::apply_update`]
/// is the sole mutation path, and it returns a fresh state rather than
/// editing in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    version: u64,
    content: String,
}

impl DocumentState {
    /// A fresh document at version 0.
    pub fn new(content: impl Into<String>) -> DocumentState {
        DocumentState {
            version: 0,
            content: content.into(),
        }
    }

    /// Reconstruct a snapshot received from elsewhere.
    pub fn with_version(version: u64, content: impl Into<String>) -> DocumentState {
        DocumentState {
            version,
            content: content.into(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Document length in chars.
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Apply one update, producing the next version. A length mismatch
    /// leaves `self` untouched and returns the error.
    pub fn apply_update(&self, update: &Update) -> Result<DocumentState, OtError> {
        let content = update.changes.apply(&self.content)?;
        trace!(
            from = self.version,
            to = self.version + 1,
            client = %update.client,
            "applied update"
        );
        Ok(DocumentState {
            version: self.version + 1,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeSet, ClientId};

    #[test]
    fn test_apply_update_advances_version() {
        let doc = DocumentState::new("Start document");
        let update = Update::new(
            ClientId::new("a"),
            ChangeSet::replace(14, 0, 0, "Hello ").unwrap(),
        );

        let next = doc.apply_update(&update).unwrap();
        assert_eq!(next.version(), 1);
        assert_eq!(next.content(), "Hello Start document");

        // The original is untouched
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.content(), "Start document");
    }

    #[test]
    fn test_apply_update_length_mismatch_has_no_effect() {
        let doc = DocumentState::new("abc");
        let update = Update::new(
            ClientId::new("a"),
            ChangeSet::replace(5, 0, 0, "x").unwrap(),
        );

        assert!(doc.apply_update(&update).is_err());
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.content(), "abc");
    }
}
