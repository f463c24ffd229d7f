//! Cap'n Proto RPC client for tandem.
//!
//! Thin typed wrapper over the `Collab` capability. All methods translate
//! between the wire representation (update records carrying serde-encoded
//! changeset bytes) and the `tandem-ot` types.
//!
//! IMPORTANT: must be created and used within a `tokio::task::LocalSet`
//! context because capnp-rpc's `RpcSystem` is not `Send`.

use std::net::SocketAddr;

use capnp_rpc::{rpc_twoparty_capnp, twoparty, RpcSystem};
use futures::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;

use tandem_ot::{ChangeSet, ClientId, DocumentId, DocumentState, Update};

use crate::tandem_capnp::collab;

/// Errors from the RPC client.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Cap'n Proto error: {0}")]
    Capnp(#[from] capnp::Error),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// RPC client wrapper holding the `Collab` capability.
pub struct RpcClient {
    collab: collab::Client,
}

impl RpcClient {
    /// Connect to a server over TCP.
    ///
    /// MUST be called within a `tokio::task::LocalSet::run_until()` context.
    pub async fn connect(addr: SocketAddr) -> Result<RpcClient, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        RpcClient::from_stream(stream.compat()).await
    }

    /// Initialize RPC from any AsyncRead+AsyncWrite stream.
    ///
    /// Useful for testing with Unix sockets or in-memory streams.
    pub async fn from_stream<S>(stream: S) -> Result<RpcClient, RpcError>
    where
        S: futures::AsyncRead + futures::AsyncWrite + Unpin + 'static,
    {
        let (reader, writer) = stream.split();

        let rpc_network = Box::new(twoparty::VatNetwork::new(
            futures::io::BufReader::new(reader),
            futures::io::BufWriter::new(writer),
            rpc_twoparty_capnp::Side::Client,
            Default::default(),
        ));

        let mut rpc_system = RpcSystem::new(rpc_network, None);
        let collab: collab::Client = rpc_system.bootstrap(rpc_twoparty_capnp::Side::Server);

        // Spawn the RPC system to run in the background (requires LocalSet)
        tokio::task::spawn_local(rpc_system);

        Ok(RpcClient { collab })
    }

    /// Fetch the current snapshot of a document (creating it server-side on
    /// first access).
    pub async fn get_document(&self, document_id: &DocumentId) -> Result<DocumentState, RpcError> {
        let mut request = self.collab.get_document_request();
        request.get().set_document_id(document_id.as_str());

        let response = request.send().promise.await?;
        let reader = response.get()?;
        let version = reader.get_version();
        let content = reader.get_content()?.to_string()?;

        Ok(DocumentState::with_version(version, content))
    }

    /// Push a batch of updates against `expected_version`. Returns whether
    /// the authority accepted the batch; `false` means the base version was
    /// stale and the caller should pull, rebase, and retry.
    pub async fn push_updates(
        &self,
        document_id: &DocumentId,
        expected_version: u64,
        updates: &[Update],
    ) -> Result<bool, RpcError> {
        let mut request = self.collab.push_updates_request();
        {
            let mut params = request.get();
            params.set_document_id(document_id.as_str());
            params.set_expected_version(expected_version);

            let mut records = params.init_updates(updates.len() as u32);
            for (i, update) in updates.iter().enumerate() {
                let mut record = records.reborrow().get(i as u32);
                record.set_client_id(update.client.as_str());
                let changes = serde_json::to_vec(&update.changes)?;
                record.set_changes(&changes);
            }
        }

        let response = request.send().promise.await?;
        Ok(response.get()?.get_accepted())
    }

    /// Long-poll the update log starting at `from_version`. The server
    /// delays the response until updates past `from_version` exist.
    pub async fn pull_updates(
        &self,
        document_id: &DocumentId,
        from_version: u64,
    ) -> Result<Vec<Update>, RpcError> {
        let mut request = self.collab.pull_updates_request();
        {
            let mut params = request.get();
            params.set_document_id(document_id.as_str());
            params.set_from_version(from_version);
        }

        let response = request.send().promise.await?;
        let records = response.get()?.get_updates()?;

        let mut updates = Vec::with_capacity(records.len() as usize);
        for record in records.iter() {
            let client = record.get_client_id()?.to_string()?;
            let changes: ChangeSet = serde_json::from_slice(record.get_changes()?)?;
            updates.push(Update::new(ClientId::new(client), changes));
        }
        Ok(updates)
    }
}
