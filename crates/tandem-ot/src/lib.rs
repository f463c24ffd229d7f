//! Operational-transform core for tandem.
//!
//! A [`ChangeSet`] describes a text edit as retain/delete/insert spans over a
//! document of known length, with a compose/transform algebra that lets
//! concurrent edits from different clients be rebased onto each other so all
//! peers converge on the same document. [`DocumentState`] is the versioned
//! snapshot both the server-side authority and client-side sync agents hold;
//! an [`Update`] is the unit that travels between them.
//!
//! This crate is pure data and algorithms: no IO, no async, no protocol.

mod change;
mod document;
mod error;
mod ids;
mod update;

pub use change::{Builder, ChangeSet, OpToken, Priority};
pub use document::DocumentState;
pub use error::OtError;
pub use ids::{ClientId, DocumentId};
pub use update::Update;

/// Result type for changeset operations.
pub type Result<T> = std::result::Result<T, OtError>;
