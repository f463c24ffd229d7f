//! Server-side state layer for tandem.
//!
//! One [`Authority`] per document holds the canonical content and the
//! append-only update log; the [`AuthorityRegistry`] constructs authorities
//! on first access and hands out shared handles. Network plumbing lives in
//! `tandem-server`; this crate only knows about documents, updates, and
//! waiters.

mod authority;
mod error;
mod registry;

pub use authority::Authority;
pub use error::AuthorityError;
pub use registry::{shared_registry, AuthorityRegistry, SharedRegistry};
