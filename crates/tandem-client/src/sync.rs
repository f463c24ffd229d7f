//! Pure sync logic for a single document.
//!
//! [`SyncState`] tracks the pending buffer, the last synced version, and the
//! local view, independent of any transport, which is what makes the rebase
//! and confirmation rules unit-testable. The async driver around it lives in
//! [`crate::agent`].
//!
//! # State Machine
//!
//! ```text
//! +--------------+  local_edit()   +--------------+
//! |   In Sync    | --------------> |   Pending    | pending buffer non-empty
//! | (no pending) |                 | (push cycle) |
//! +--------------+ <-------------- +--------------+
//!        ^          all confirmed         |
//!        |                                | push rejected (stale base)
//!        |   receive() rebases pending    v
//!        +------------------------- [ catch up ]
//!                                   pull delivers the missed updates,
//!                                   pending is transformed over them,
//!                                   then the push is retried
//! ```
//!
//! # Confirmation is idempotent
//!
//! A pushed batch can be confirmed by either of two signals, in either
//! order: the push response (`confirm_pushed`) or the agent's own updates
//! echoing back through the pulled log (`receive` recognizes the
//! own-client prefix). Whichever arrives first wins; the other is a no-op.

use thiserror::Error;
use tracing::trace;

use tandem_ot::{ChangeSet, ClientId, OtError, Priority, Update};

/// Error during sync bookkeeping.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The server sent a log slice starting beyond our synced version, so
    /// updates were skipped somewhere. Protocol violation.
    #[error("pulled updates start at version {got} but agent is synced to {expected}")]
    VersionGap { expected: u64, got: u64 },

    /// A changeset failed to compose, transform, or apply.
    #[error(transparent)]
    Ot(#[from] OtError),
}

/// Sync bookkeeping for one document on one client.
///
/// The local view (`content`) is always the synced prefix of the authority's
/// log with the pending buffer applied on top, so the editing surface never
/// waits on the network.
#[derive(Debug, Clone)]
pub struct SyncState {
    client: ClientId,
    /// How much of the authority's log this client has applied.
    synced_version: u64,
    /// Local view: synced content + pending updates.
    content: String,
    /// Locally created updates not yet observed in the log, oldest first.
    pending: Vec<Update>,
}

impl SyncState {
    /// Start from a snapshot fetched from the authority.
    pub fn new(client: ClientId, version: u64, content: impl Into<String>) -> SyncState {
        SyncState {
            client,
            synced_version: version,
            content: content.into(),
            pending: Vec::new(),
        }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn synced_version(&self) -> u64 {
        self.synced_version
    }

    /// The local view content (synced prefix + pending edits).
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Record a local edit: apply it to the view and queue it for sending.
    /// Local edits are never rejected as long as they fit the current view.
    pub fn local_edit(&mut self, changes: ChangeSet) -> Result<(), OtError> {
        self.content = changes.apply(&self.content)?;
        self.pending
            .push(Update::new(self.client.clone(), changes));
        Ok(())
    }

    /// Everything currently worth pushing: the base version to push against
    /// and a snapshot of the pending buffer. `None` when there is nothing
    /// to send.
    pub fn sendable(&self) -> Option<(u64, Vec<Update>)> {
        if self.pending.is_empty() {
            None
        } else {
            Some((self.synced_version, self.pending.clone()))
        }
    }

    /// Confirm a successful push of `count` updates against `base_version`.
    ///
    /// Idempotent: if the pull loop already observed some or all of those
    /// updates echoing back, only the remainder is confirmed here.
    pub fn confirm_pushed(&mut self, base_version: u64, count: usize) {
        let target = base_version + count as u64;
        if target <= self.synced_version {
            return;
        }
        let newly = (target - self.synced_version) as usize;
        let drain = newly.min(self.pending.len());
        self.pending.drain(..drain);
        self.synced_version = target;
        trace!(synced = self.synced_version, "confirmed push");
    }

    /// Apply a pulled log slice starting at `from_version`.
    ///
    /// Already-seen entries at the front are skipped; a leading run of this
    /// client's own updates confirms the pending head; the remaining foreign
    /// updates are composed, the pending buffer is rebased over them (remote
    /// wins position ties), and the composite, mapped over the pending
    /// buffer, is applied to the view.
    ///
    /// Returns the changeset that was applied to the view, so an editor can
    /// mirror it; `None` when the slice contained nothing new to display.
    /// On error the state is left untouched.
    pub fn receive(
        &mut self,
        from_version: u64,
        updates: &[Update],
    ) -> Result<Option<ChangeSet>, SyncError> {
        if from_version > self.synced_version {
            return Err(SyncError::VersionGap {
                expected: self.synced_version,
                got: from_version,
            });
        }

        // Entries below our synced version were already accounted for
        // (a pull that raced a successful push sees its own batch again).
        let skip = (self.synced_version - from_version) as usize;
        if skip >= updates.len() {
            return Ok(None);
        }
        let updates = &updates[skip..];

        // Our own updates can only enter the log through our push at our
        // synced version, so in any slice starting there they form a prefix.
        let own = updates
            .iter()
            .take_while(|u| u.client == self.client)
            .count();
        let foreign = &updates[own..];

        if foreign.is_empty() {
            self.pending.drain(..own.min(self.pending.len()));
            self.synced_version += own as u64;
            trace!(confirmed = own, synced = self.synced_version, "own updates echoed back");
            return Ok(None);
        }

        // Compose the foreign updates into one changeset...
        let mut remote = foreign[0].changes.clone();
        for update in &foreign[1..] {
            remote = remote.compose(&update.changes)?;
        }

        // ...rebase the unconfirmed pending updates over it (remote wins
        // ties), mapping it over each in turn so it fits the local view.
        let mut rebased = Vec::with_capacity(self.pending.len().saturating_sub(own));
        let mut over = remote;
        for update in self.pending.iter().skip(own) {
            let changes = update.changes.transform(&over, Priority::Right)?;
            over = over.transform(&update.changes, Priority::Left)?;
            rebased.push(Update::new(update.client.clone(), changes));
        }

        let content = over.apply(&self.content)?;

        // Everything validated; commit.
        self.pending = rebased;
        self.synced_version += updates.len() as u64;
        self.content = content;
        trace!(
            confirmed = own,
            applied = foreign.len(),
            synced = self.synced_version,
            "applied remote updates"
        );
        Ok(Some(over))
    }
}
