//! Error types for authority operations.

use thiserror::Error;

use tandem_ot::OtError;

/// Errors surfaced by [`crate::Authority`].
#[derive(Error, Debug)]
pub enum AuthorityError {
    /// An update in a pushed batch did not fit the document it targets.
    ///
    /// This is a protocol violation (stale-version pushes are rejected with
    /// `accepted = false` before any update is examined); the batch is
    /// dropped whole and the document is left untouched.
    #[error("invalid update batch: {0}")]
    InvalidBatch(#[from] OtError),
}
