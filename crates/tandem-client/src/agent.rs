//! Async driver around [`SyncState`]: the per-document sync agent.
//!
//! Two long-lived tasks run per open document:
//!
//! - the **push task**, woken by local edits, which sends the pending buffer
//!   upstream and retries after rejections once the pull loop has caught up;
//! - the **pull loop**, which keeps exactly one long-poll in flight and
//!   feeds every returned log slice through [`SyncState::receive`].
//!
//! Both share one mutex-protected [`SyncState`]; neither holds the lock
//! across an await point. Closing the agent aborts both tasks; state
//! mutation is synchronous under the lock, so cancellation can never leave
//! a half-applied update behind.
//!
//! ```text
//!   editor ──apply_edit──▶ SyncState ◀──receive── pull loop (long-poll)
//!                             │  ▲
//!                    sendable │  │ confirm_pushed
//!                             ▼  │
//!                           push task ──pushUpdates──▶ authority
//! ```

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;

use tandem_ot::{ChangeSet, ClientId, DocumentId, OtError};

use crate::constants::{PULL_RETRY_DELAY, PUSH_RETRY_DELAY, RETRY_JITTER_MS};
use crate::rpc::{RpcClient, RpcError};
use crate::sync::SyncState;

/// Errors from the sync agent's public API.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("invalid edit for the current view: {0}")]
    Edit(#[from] OtError),
}

/// What the editor should render: the agent's local view and the version it
/// is synced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub version: u64,
    pub content: String,
}

/// Lazily (re)dialed RPC connection shared by the push and pull tasks.
///
/// Either task invalidates the slot when a call fails; the next caller
/// re-dials. The pending buffer is untouched by connection churn, so edits
/// survive a dropped transport and the cycle resumes from the last synced
/// version after reconnect.
struct Reconnector {
    addr: SocketAddr,
    slot: RefCell<Option<Rc<RpcClient>>>,
}

impl Reconnector {
    fn new(addr: SocketAddr) -> Reconnector {
        Reconnector {
            addr,
            slot: RefCell::new(None),
        }
    }

    async fn client(&self) -> Result<Rc<RpcClient>, RpcError> {
        if let Some(client) = self.slot.borrow().as_ref() {
            return Ok(client.clone());
        }
        let client = Rc::new(RpcClient::connect(self.addr).await?);
        let mut slot = self.slot.borrow_mut();
        // Another task may have connected while we were dialing
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        *slot = Some(client.clone());
        log::info!("connected to {}", self.addr);
        Ok(client)
    }

    fn invalidate(&self) {
        self.slot.borrow_mut().take();
    }
}

struct Shared {
    document_id: DocumentId,
    state: Mutex<SyncState>,
    /// Wakes the push task after a local edit.
    edits: Notify,
    /// Render signal for the editor.
    view_tx: watch::Sender<ViewSnapshot>,
    /// Synced-version signal, used by the push task to time its retries.
    version_tx: watch::Sender<u64>,
    conn: Reconnector,
}

impl Shared {
    fn publish(&self) {
        let (version, content) = {
            let state = self.state.lock();
            (state.synced_version(), state.content().to_owned())
        };
        self.version_tx.send_replace(version);
        self.view_tx.send_replace(ViewSnapshot { version, content });
    }
}

/// Per-document sync agent.
///
/// One instance per editable document per client connection. Local edits go
/// through [`SyncAgent::apply_edit`] (or the [`SyncAgent::replace`]
/// convenience) and are never blocked by sync state; remote updates arrive
/// through the [`SyncAgent::subscribe`] watch channel.
///
/// MUST be created and used within a `tokio::task::LocalSet` context.
pub struct SyncAgent {
    shared: Rc<Shared>,
    client: ClientId,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SyncAgent {
    /// Connect to `addr` and open `document_id` with a fresh random client
    /// identity.
    pub async fn connect(addr: SocketAddr, document_id: DocumentId) -> Result<SyncAgent, AgentError> {
        SyncAgent::connect_as(addr, document_id, crate::random_client_id()).await
    }

    /// Connect with an explicit client identity.
    pub async fn connect_as(
        addr: SocketAddr,
        document_id: DocumentId,
        client: ClientId,
    ) -> Result<SyncAgent, AgentError> {
        let conn = Reconnector::new(addr);
        let snapshot = conn.client().await?.get_document(&document_id).await?;
        log::debug!(
            "opened document {} at version {}",
            document_id,
            snapshot.version()
        );

        let state = SyncState::new(client.clone(), snapshot.version(), snapshot.content());
        let (view_tx, _) = watch::channel(ViewSnapshot {
            version: snapshot.version(),
            content: snapshot.content().to_owned(),
        });
        let (version_tx, version_rx) = watch::channel(snapshot.version());

        let shared = Rc::new(Shared {
            document_id,
            state: Mutex::new(state),
            edits: Notify::new(),
            view_tx,
            version_tx,
            conn,
        });

        let tasks = vec![
            tokio::task::spawn_local(pull_loop(shared.clone())),
            tokio::task::spawn_local(push_loop(shared.clone(), version_rx)),
        ];

        Ok(SyncAgent {
            shared,
            client,
            tasks,
        })
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.shared.document_id
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Apply a local edit to the view and queue it for sending.
    pub fn apply_edit(&self, changes: ChangeSet) -> Result<(), AgentError> {
        self.shared.state.lock().local_edit(changes)?;
        self.shared.publish();
        self.shared.edits.notify_one();
        Ok(())
    }

    /// Convenience: replace the char range `from..to` of the current view
    /// with `text`.
    pub fn replace(&self, from: usize, to: usize, text: &str) -> Result<(), AgentError> {
        {
            let mut state = self.shared.state.lock();
            let len = state.content().chars().count();
            let changes = ChangeSet::replace(len, from, to, text)?;
            state.local_edit(changes)?;
        }
        self.shared.publish();
        self.shared.edits.notify_one();
        Ok(())
    }

    /// Current local view content.
    pub fn content(&self) -> String {
        self.shared.state.lock().content().to_owned()
    }

    /// How much of the authority's log this agent has applied.
    pub fn synced_version(&self) -> u64 {
        self.shared.state.lock().synced_version()
    }

    /// Number of local updates not yet observed in the log.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending_len()
    }

    /// Watch channel delivering the view after every change, local or remote.
    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.shared.view_tx.subscribe()
    }

    /// Tear the agent down: cancels the outstanding pull and any scheduled
    /// push retry. Safe to call more than once.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncAgent {
    fn drop(&mut self) {
        self.close();
    }
}

fn jittered(base: Duration) -> Duration {
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=RETRY_JITTER_MS))
}

/// Long-poll the authority's log and feed every slice through the sync
/// state. Keeps at most one pull in flight; each slice is applied to
/// completion before the next call goes out.
async fn pull_loop(shared: Rc<Shared>) {
    loop {
        let rpc = match shared.conn.client().await {
            Ok(rpc) => rpc,
            Err(e) => {
                log::warn!("pull: connect failed: {e}");
                sleep(jittered(PULL_RETRY_DELAY)).await;
                continue;
            }
        };

        let from = shared.state.lock().synced_version();
        match rpc.pull_updates(&shared.document_id, from).await {
            Ok(updates) => {
                if updates.is_empty() {
                    continue;
                }
                let received = shared.state.lock().receive(from, &updates);
                match received {
                    Ok(_) => shared.publish(),
                    Err(e) => {
                        // Protocol violation; dropping the batch keeps the
                        // local document intact. Back off so a persistently
                        // bad server doesn't spin us.
                        log::error!("pull: dropping batch at version {from}: {e}");
                        sleep(jittered(PULL_RETRY_DELAY)).await;
                    }
                }
            }
            Err(e) => {
                log::warn!("pull failed: {e}; reconnecting");
                shared.conn.invalidate();
                sleep(jittered(PULL_RETRY_DELAY)).await;
            }
        }
    }
}

/// Send pending updates upstream. One push in flight at most; edits arriving
/// mid-flight coalesce into the next attempt. Rejections wait for the pull
/// loop to advance the synced version before retrying with the rebased
/// buffer; transport failures retry with the buffer untouched. There is no
/// give-up policy; availability is favored over bounded latency.
async fn push_loop(shared: Rc<Shared>, mut version_rx: watch::Receiver<u64>) {
    loop {
        shared.edits.notified().await;

        loop {
            let Some((base, batch)) = shared.state.lock().sendable() else {
                break;
            };
            let count = batch.len();

            let rpc = match shared.conn.client().await {
                Ok(rpc) => rpc,
                Err(e) => {
                    log::warn!("push: connect failed: {e}");
                    sleep(jittered(PUSH_RETRY_DELAY)).await;
                    continue;
                }
            };

            match rpc.push_updates(&shared.document_id, base, &batch).await {
                Ok(true) => {
                    shared.state.lock().confirm_pushed(base, count);
                    shared.publish();
                    log::debug!("pushed {count} update(s), synced to {}", base + count as u64);
                }
                Ok(false) => {
                    log::debug!(
                        "push of {count} update(s) rejected at version {base}; waiting for catch-up"
                    );
                    // The pull loop is already long-polling and will deliver
                    // the updates we are missing; retry once it has.
                    loop {
                        let current = *version_rx.borrow_and_update();
                        if current > base {
                            break;
                        }
                        if version_rx.changed().await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("push failed: {e}; retrying");
                    shared.conn.invalidate();
                    sleep(jittered(PUSH_RETRY_DELAY)).await;
                }
            }
        }
    }
}
