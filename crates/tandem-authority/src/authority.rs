//! Single source of truth for one document.
//!
//! The authority owns the canonical [`DocumentState`] and the append-only
//! update log. Pushes are optimistic-concurrency checked against the log
//! length and serialized through a single writer lock; pulls past the end of
//! the log park on a wake-on-append primitive instead of polling.

use tokio::sync::{Notify, RwLock};
use tracing::{debug, instrument, trace};

use tandem_ot::{DocumentId, DocumentState, Update};

use crate::AuthorityError;

struct AuthorityState {
    doc: DocumentState,
    log: Vec<Update>,
}

/// The serializing owner of a document's canonical version and update log.
///
/// # Concurrency
///
/// All mutation goes through [`Authority::push_updates`], which takes the
/// write half of an `RwLock`: concurrent pushes queue FIFO and each observes
/// the log length left by the previous one, making the version check
/// race-free. Reads (snapshots, pull fast path) share the read half and
/// always observe a push's effects atomically.
///
/// [`Authority::pull_updates`] callers waiting for future versions register
/// on a [`Notify`] before re-checking the log, so a push can never slip
/// between the check and the park. `notify_waiters` releases every parked
/// pull at once; each slices its own suffix.
pub struct Authority {
    id: DocumentId,
    state: RwLock<AuthorityState>,
    appended: Notify,
}

impl Authority {
    /// Create an authority for `id` with initial content at version 0.
    pub fn new(id: DocumentId, content: impl Into<String>) -> Authority {
        Authority {
            id,
            state: RwLock::new(AuthorityState {
                doc: DocumentState::new(content),
                log: Vec::new(),
            }),
            appended: Notify::new(),
        }
    }

    /// The document this authority owns.
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Current snapshot, instantaneously.
    pub async fn snapshot(&self) -> DocumentState {
        self.state.read().await.doc.clone()
    }

    /// Current version (== log length).
    pub async fn version(&self) -> u64 {
        self.state.read().await.doc.version()
    }

    /// Append `updates` to the log iff `expected_version` matches the current
    /// log length. Returns `false` (whole batch rejected, nothing mutated)
    /// when the caller's base version is stale: the caller is expected to
    /// pull, rebase, and retry. The authority never transforms pushed
    /// updates itself.
    ///
    /// The batch is all-or-nothing: it is validated against a scratch copy of
    /// the document first, so a malformed update cannot leave a partial
    /// append or corrupt the canonical state.
    #[instrument(skip_all, fields(doc = %self.id, expected = expected_version, count = updates.len()))]
    pub async fn push_updates(
        &self,
        expected_version: u64,
        updates: Vec<Update>,
    ) -> Result<bool, AuthorityError> {
        let mut state = self.state.write().await;

        if expected_version != state.log.len() as u64 {
            debug!(actual = state.log.len(), "push rejected: stale version");
            return Ok(false);
        }
        if updates.is_empty() {
            return Ok(true);
        }

        let mut doc = state.doc.clone();
        for update in &updates {
            doc = doc.apply_update(update)?;
        }

        state.doc = doc;
        state.log.extend(updates);
        trace!(version = state.log.len(), "appended updates");
        drop(state);

        self.appended.notify_waiters();
        Ok(true)
    }

    /// The log suffix starting at `from_version`.
    ///
    /// Resolves immediately when the log already extends past `from_version`;
    /// otherwise suspends until a push appends beyond it. Every concurrent
    /// waiter is released by the next accepted push, each with its own
    /// correctly-sliced suffix.
    pub async fn pull_updates(&self, from_version: u64) -> Vec<Update> {
        let notified = self.appended.notified();
        tokio::pin!(notified);

        loop {
            // Register interest before checking, so an append between the
            // check and the await still wakes us.
            notified.as_mut().enable();

            {
                let state = self.state.read().await;
                let from = from_version as usize;
                if from < state.log.len() {
                    return state.log[from..].to_vec();
                }
            }

            trace!(doc = %self.id, from = from_version, "pull waiting for new updates");
            notified.as_mut().await;
            notified.set(self.appended.notified());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem_ot::{ChangeSet, ClientId};
    use tokio::time::timeout;

    fn insert_at(base_len: usize, at: usize, text: &str, client: &str) -> Update {
        Update::new(
            ClientId::new(client),
            ChangeSet::replace(base_len, at, at, text).unwrap(),
        )
    }

    fn test_authority(content: &str) -> Authority {
        Authority::new(DocumentId::new("doc-1"), content)
    }

    #[tokio::test]
    async fn test_push_advances_version_and_content() {
        let authority = test_authority("Start document");

        let accepted = authority
            .push_updates(0, vec![insert_at(14, 0, "Hello ", "a")])
            .await
            .unwrap();
        assert!(accepted);

        let snapshot = authority.snapshot().await;
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.content(), "Hello Start document");
    }

    #[tokio::test]
    async fn test_stale_push_rejected_without_mutation() {
        let authority = test_authority("abc");

        assert!(authority
            .push_updates(0, vec![insert_at(3, 0, "X", "a")])
            .await
            .unwrap());

        // Second client still at version 0
        let accepted = authority
            .push_updates(0, vec![insert_at(3, 0, "Y", "b")])
            .await
            .unwrap();
        assert!(!accepted);

        let snapshot = authority.snapshot().await;
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.content(), "Xabc");
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let authority = test_authority("abc");

        // Second update in the batch targets the wrong length
        let batch = vec![insert_at(3, 0, "X", "a"), insert_at(3, 0, "Y", "a")];
        let result = authority.push_updates(0, batch).await;
        assert!(matches!(result, Err(AuthorityError::InvalidBatch(_))));

        // Nothing was appended
        let snapshot = authority.snapshot().await;
        assert_eq!(snapshot.version(), 0);
        assert_eq!(snapshot.content(), "abc");
    }

    #[tokio::test]
    async fn test_multi_update_batch_applies_in_order() {
        let authority = test_authority("abc");

        let batch = vec![insert_at(3, 0, "X", "a"), insert_at(4, 4, "Y", "a")];
        assert!(authority.push_updates(0, batch).await.unwrap());

        let snapshot = authority.snapshot().await;
        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.content(), "XabcY");
    }

    #[tokio::test]
    async fn test_pull_returns_existing_suffix() {
        let authority = test_authority("abc");
        authority
            .push_updates(0, vec![insert_at(3, 0, "X", "a")])
            .await
            .unwrap();
        authority
            .push_updates(1, vec![insert_at(4, 0, "Y", "b")])
            .await
            .unwrap();

        let updates = authority.pull_updates(1).await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].client, ClientId::new("b"));
    }

    #[tokio::test]
    async fn test_pull_at_head_blocks_until_push() {
        let authority = Arc::new(test_authority("abc"));

        // Log is empty: a pull from version 0 must suspend
        let blocked = timeout(Duration::from_millis(50), authority.pull_updates(0)).await;
        assert!(blocked.is_err(), "pull resolved without new updates");

        // A push releases it with exactly the new suffix
        let waiter = {
            let authority = authority.clone();
            tokio::spawn(async move { authority.pull_updates(0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        authority
            .push_updates(0, vec![insert_at(3, 0, "X", "a")])
            .await
            .unwrap();

        let updates = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pull did not resolve after push")
            .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].client, ClientId::new("a"));
    }

    #[tokio::test]
    async fn test_all_waiters_released_each_with_own_suffix() {
        let authority = Arc::new(test_authority("abc"));
        authority
            .push_updates(0, vec![insert_at(3, 0, "X", "a")])
            .await
            .unwrap();

        // A waiter behind the log resolves straight away with the backlog
        let behind = {
            let authority = authority.clone();
            tokio::spawn(async move { authority.pull_updates(0).await })
        };
        // Two waiters parked at the head must both be released by one push
        let first = {
            let authority = authority.clone();
            tokio::spawn(async move { authority.pull_updates(1).await })
        };
        let second = {
            let authority = authority.clone();
            tokio::spawn(async move { authority.pull_updates(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let behind = timeout(Duration::from_secs(1), behind).await.unwrap().unwrap();
        assert_eq!(behind.len(), 1);
        assert_eq!(behind[0].client, ClientId::new("a"));

        authority
            .push_updates(1, vec![insert_at(4, 0, "Y", "b")])
            .await
            .unwrap();

        let first = timeout(Duration::from_secs(1), first).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), second).await.unwrap().unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].client, ClientId::new("b"));
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_replaying_log_from_zero_reproduces_content() {
        let authority = test_authority("Start document");

        authority
            .push_updates(0, vec![insert_at(14, 0, "Hello ", "a")])
            .await
            .unwrap();
        authority
            .push_updates(1, vec![insert_at(20, 20, "!", "b")])
            .await
            .unwrap();
        authority
            .push_updates(2, vec![insert_at(21, 0, ">> ", "a")])
            .await
            .unwrap();

        let log = authority.pull_updates(0).await;
        let mut doc = DocumentState::new("Start document");
        for update in &log {
            doc = doc.apply_update(update).unwrap();
        }

        let snapshot = authority.snapshot().await;
        assert_eq!(doc.version(), snapshot.version());
        assert_eq!(doc.content(), snapshot.content());
    }

    #[tokio::test]
    async fn test_empty_batch_is_accepted_at_matching_version() {
        let authority = test_authority("abc");
        assert!(authority.push_updates(0, vec![]).await.unwrap());
        assert!(!authority.push_updates(1, vec![]).await.unwrap());
        assert_eq!(authority.version().await, 0);
    }
}
