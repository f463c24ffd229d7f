//! Error types for changeset operations.

use thiserror::Error;

/// Errors that can occur when applying, composing, or transforming changesets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// Changeset applied to a document of the wrong length.
    ///
    /// This is a protocol violation, never expected in correct operation:
    /// every changeset records the length of the document it was made for.
    #[error("changeset expects a document of length {expected}, got length {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Composition of two changesets whose lengths don't line up.
    #[error("cannot compose: left changeset produces length {left}, right consumes {right}")]
    ComposeMismatch { left: usize, right: usize },

    /// Transformation of two changesets that weren't made for the same document.
    #[error("cannot transform: changesets have source lengths {left} and {right}")]
    TransformMismatch { left: usize, right: usize },

    /// Edit range outside the document.
    #[error("edit range {from}..{to} out of bounds for document of length {len}")]
    RangeOutOfBounds { from: usize, to: usize, len: usize },

    /// Internal span-walk invariant violated.
    #[error("internal changeset error: {0}")]
    Internal(String),
}
