//! Tandem RPC client library.
//!
//! Provides the typed Cap'n Proto RPC client for talking to a tandem server
//! and the [`SyncAgent`] that keeps a local document converged with the
//! server-side authority: local edits are pushed upstream, remote updates
//! pulled downstream, and unconfirmed local edits rebased over whatever
//! arrives in between.
//!
//! capnp-rpc is not `Send`, so everything here must run within a
//! `tokio::task::LocalSet`.

pub mod agent;
pub mod constants;
pub mod rpc;
pub mod sync;

// Generated Cap'n Proto code
pub mod tandem_capnp {
    include!(concat!(env!("OUT_DIR"), "/tandem_capnp.rs"));
}

pub use agent::{AgentError, SyncAgent, ViewSnapshot};
pub use rpc::{RpcClient, RpcError};
pub use sync::{SyncError, SyncState};

// Core types, re-exported for consumers
pub use tandem_ot::{ChangeSet, ClientId, DocumentId, DocumentState, Update};

use std::net::SocketAddr;

/// Connect to a server over TCP and return an RPC client.
///
/// Must be called within a `tokio::task::LocalSet` context.
pub async fn connect_tcp(addr: SocketAddr) -> Result<RpcClient, RpcError> {
    RpcClient::connect(addr).await
}

/// Generate a fresh client identity. Client IDs only need to be unique per
/// editing session; they are used for attribution and own-update
/// recognition, never ordering.
pub fn random_client_id() -> ClientId {
    ClientId::new(uuid::Uuid::new_v4().to_string())
}
