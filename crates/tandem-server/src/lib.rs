//! Tandem server library.
//!
//! TCP + Cap'n Proto RPC surface over the per-document authorities in
//! `tandem-authority`: `getDocument` for initial load, `pushUpdates` with
//! optimistic concurrency, and long-poll `pullUpdates`.

pub mod constants;
pub mod net;
pub mod rpc;

// Generated Cap'n Proto code
pub mod tandem_capnp {
    include!(concat!(env!("OUT_DIR"), "/tandem_capnp.rs"));
}

pub use net::{CollabServer, ServerConfig};
pub use rpc::CollabImpl;
pub use tandem_authority::{Authority, AuthorityRegistry, SharedRegistry};
