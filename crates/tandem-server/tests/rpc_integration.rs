//! Integration tests for the tandem RPC surface over real TCP connections.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::timeout;

use tandem_client::{ChangeSet, ClientId, DocumentId, RpcClient, Update};
use tandem_server::{CollabServer, ServerConfig};

/// Helper to run async test code that requires LocalSet (for capnp-rpc)
fn run_local<F: std::future::Future<Output = ()>>(f: F) {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = LocalSet::new();
    rt.block_on(local.run_until(f));
}

/// Start a server on an ephemeral port and return its address
async fn start_server(seed: &str) -> SocketAddr {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        seed_content: seed.to_string(),
    };
    let server = CollabServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::task::spawn_local(async move {
        if let Err(e) = server.run().await {
            log::error!("Server error: {}", e);
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> RpcClient {
    tandem_client::connect_tcp(addr)
        .await
        .expect("RPC client init failed")
}

fn insert(base_len: usize, at: usize, text: &str, client: &str) -> Update {
    Update::new(
        ClientId::new(client),
        ChangeSet::replace(base_len, at, at, text).unwrap(),
    )
}

#[test]
fn test_get_document_returns_seeded_snapshot() {
    run_local(async {
        let addr = start_server("Start document").await;
        let client = connect(addr).await;

        let doc = client
            .get_document(&DocumentId::new("doc-1"))
            .await
            .unwrap();
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.content(), "Start document");
    });
}

#[test]
fn test_push_appends_and_advances_version() {
    run_local(async {
        let addr = start_server("Start document").await;
        let client = connect(addr).await;
        let doc_id = DocumentId::new("doc-1");

        let accepted = client
            .push_updates(&doc_id, 0, &[insert(14, 0, "Hello ", "a")])
            .await
            .unwrap();
        assert!(accepted);

        let doc = client.get_document(&doc_id).await.unwrap();
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.content(), "Hello Start document");
    });
}

#[test]
fn test_stale_push_is_rejected_without_mutation() {
    run_local(async {
        let addr = start_server("abc").await;
        let client = connect(addr).await;
        let doc_id = DocumentId::new("doc-1");

        assert!(client
            .push_updates(&doc_id, 0, &[insert(3, 0, "X", "a")])
            .await
            .unwrap());

        // A second client still at version 0 must be rejected whole
        let accepted = client
            .push_updates(&doc_id, 0, &[insert(3, 0, "Y", "b")])
            .await
            .unwrap();
        assert!(!accepted);

        let doc = client.get_document(&doc_id).await.unwrap();
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.content(), "Xabc");
    });
}

#[test]
fn test_corrupt_batch_fails_the_call_and_leaves_document_intact() {
    run_local(async {
        let addr = start_server("abc").await;
        let client = connect(addr).await;
        let doc_id = DocumentId::new("doc-1");

        // Changeset made for a document of the wrong length
        let result = client
            .push_updates(&doc_id, 0, &[insert(7, 0, "X", "a")])
            .await;
        assert!(result.is_err(), "corrupt batch must fail the RPC");

        let doc = client.get_document(&doc_id).await.unwrap();
        assert_eq!(doc.version(), 0);
        assert_eq!(doc.content(), "abc");
    });
}

#[test]
fn test_pull_returns_existing_updates_immediately() {
    run_local(async {
        let addr = start_server("abc").await;
        let client = connect(addr).await;
        let doc_id = DocumentId::new("doc-1");

        client
            .push_updates(&doc_id, 0, &[insert(3, 0, "X", "a")])
            .await
            .unwrap();
        client
            .push_updates(&doc_id, 1, &[insert(4, 0, "Y", "b")])
            .await
            .unwrap();

        let updates = client.pull_updates(&doc_id, 0).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].client, ClientId::new("a"));
        assert_eq!(updates[1].client, ClientId::new("b"));

        // Replaying the pulled log reproduces the authority's content
        let mut doc = tandem_client::DocumentState::new("abc");
        for update in &updates {
            doc = doc.apply_update(update).unwrap();
        }
        let snapshot = client.get_document(&doc_id).await.unwrap();
        assert_eq!(doc.content(), snapshot.content());
    });
}

#[test]
fn test_pull_at_head_blocks_until_push_then_returns_only_the_suffix() {
    run_local(async {
        let addr = start_server("abc").await;
        let client = connect(addr).await;
        let doc_id = DocumentId::new("doc-1");

        client
            .push_updates(&doc_id, 0, &[insert(3, 0, "X", "a")])
            .await
            .unwrap();

        // Pull at the head of the log must suspend, not return empty
        let blocked = timeout(
            Duration::from_millis(100),
            client.pull_updates(&doc_id, 1),
        )
        .await;
        assert!(blocked.is_err(), "pull at head resolved without new updates");

        // Park a pull, then push from a second connection
        let puller = connect(addr).await;
        let waiter = tokio::task::spawn_local(async move {
            puller.pull_updates(&DocumentId::new("doc-1"), 1).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        client
            .push_updates(&doc_id, 1, &[insert(4, 4, "!", "b")])
            .await
            .unwrap();

        let updates = timeout(Duration::from_secs(2), waiter)
            .await
            .expect("pull did not resolve after push")
            .unwrap()
            .unwrap();

        // Exactly the newly appended update, not the full log
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].client, ClientId::new("b"));
    });
}

#[test]
fn test_documents_are_independent() {
    run_local(async {
        let addr = start_server("abc").await;
        let client = connect(addr).await;

        client
            .push_updates(&DocumentId::new("doc-1"), 0, &[insert(3, 0, "X", "a")])
            .await
            .unwrap();

        let other = client
            .get_document(&DocumentId::new("doc-2"))
            .await
            .unwrap();
        assert_eq!(other.version(), 0);
        assert_eq!(other.content(), "abc");
    });
}
