//! TCP listener and per-connection RPC session hosting.
//!
//! capnp-rpc's `RpcSystem` is not `Send`, so each accepted connection gets
//! its own OS thread running a current-thread runtime plus `LocalSet`. The
//! [`AuthorityRegistry`] is shared across all of them; tokio's sync
//! primitives are runtime-agnostic, so pulls parked in one connection's
//! runtime are woken by pushes arriving in another's.

use std::net::SocketAddr;

use capnp_rpc::{rpc_twoparty_capnp, twoparty, RpcSystem};
use futures::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::compat::TokioAsyncReadCompatExt;

use tandem_authority::{shared_registry, SharedRegistry};

use crate::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_PORT};
use crate::rpc::CollabImpl;
use crate::tandem_capnp::collab;

/// Server configuration.
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Initial content for documents created on first access. Real initial
    /// content normally comes from project storage, which is outside this
    /// core; the seed stands in for it.
    pub seed_content: String,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            bind_addr,
            seed_content: String::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        let addr = format!("{}:{}", DEFAULT_BIND_ADDRESS, DEFAULT_PORT)
            .parse()
            .expect("default bind address is valid");
        ServerConfig::new(addr)
    }
}

/// TCP server hosting the `Collab` capability.
pub struct CollabServer {
    listener: TcpListener,
    registry: SharedRegistry,
}

impl CollabServer {
    /// Bind the listener. Binding before [`CollabServer::run`] lets callers
    /// use port 0 and read the assigned address back.
    pub async fn bind(config: ServerConfig) -> Result<CollabServer, std::io::Error> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(CollabServer {
            listener,
            registry: shared_registry(config.seed_content),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Handle to the document registry shared with all connections.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Accept connections forever, spawning an RPC session thread for each.
    pub async fn run(self) -> Result<(), std::io::Error> {
        log::info!("listening on {}", self.listener.local_addr()?);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            log::info!("connection from {}", peer);

            // Hand the socket over as a std stream so the session thread can
            // register it with its own runtime.
            let stream = stream.into_std()?;
            let registry = self.registry.clone();

            // Spawn RPC handler in a separate thread (capnp-rpc requires LocalSet)
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("Failed to create tokio runtime for RPC");
                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    match TcpStream::from_std(stream) {
                        Ok(stream) => run_rpc(stream, registry, peer).await,
                        Err(e) => log::error!("failed to adopt socket for {}: {}", peer, e),
                    }
                });
            });
        }
    }
}

/// Run a Cap'n Proto RPC session over one TCP connection.
async fn run_rpc(stream: TcpStream, registry: SharedRegistry, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let stream = stream.compat();
    let (reader, writer) = AsyncReadExt::split(stream);

    let client: collab::Client = CollabImpl::new_client(registry);

    let network = twoparty::VatNetwork::new(
        reader,
        writer,
        rpc_twoparty_capnp::Side::Server,
        Default::default(),
    );
    let rpc_system = RpcSystem::new(Box::new(network), Some(client.clone().client));

    log::info!("RPC session started for {}", peer);
    if let Err(e) = rpc_system.await {
        log::error!("RPC system error for {}: {}", peer, e);
    }
    log::info!("RPC session ended for {}", peer);
}
