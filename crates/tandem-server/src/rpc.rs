//! Cap'n Proto RPC server implementation.
//!
//! Implements the `Collab` capability over a shared [`AuthorityRegistry`].
//! One `CollabImpl` exists per connection; all of them point at the same
//! registry, so every session observes the same documents.

#![allow(refining_impl_trait)]

use std::rc::Rc;

use capnp::capability::Promise;
use capnp::struct_list;
use capnp_rpc::pry;

use tandem_authority::SharedRegistry;
use tandem_ot::{ChangeSet, ClientId, DocumentId, Update};

use crate::tandem_capnp::{collab, update_record};

/// Per-connection `Collab` capability.
pub struct CollabImpl {
    registry: SharedRegistry,
}

impl CollabImpl {
    pub fn new(registry: SharedRegistry) -> CollabImpl {
        CollabImpl { registry }
    }

    /// Create a new Collab capability for use in RPC.
    pub fn new_client(registry: SharedRegistry) -> collab::Client {
        capnp_rpc::new_client(CollabImpl::new(registry))
    }
}

/// Decode a wire update list. A payload that doesn't parse as a changeset
/// token list fails the whole request.
fn read_updates(
    records: struct_list::Reader<'_, update_record::Owned>,
) -> Result<Vec<Update>, capnp::Error> {
    let mut updates = Vec::with_capacity(records.len() as usize);
    for record in records.iter() {
        let client = record.get_client_id()?.to_str()?.to_owned();
        let changes: ChangeSet = serde_json::from_slice(record.get_changes()?)
            .map_err(|e| capnp::Error::failed(format!("invalid changeset payload: {e}")))?;
        updates.push(Update::new(ClientId::new(client), changes));
    }
    Ok(updates)
}

fn write_updates(
    mut records: struct_list::Builder<'_, update_record::Owned>,
    updates: &[Update],
) -> Result<(), capnp::Error> {
    for (i, update) in updates.iter().enumerate() {
        let mut record = records.reborrow().get(i as u32);
        record.set_client_id(update.client.as_str());
        let changes = serde_json::to_vec(&update.changes)
            .map_err(|e| capnp::Error::failed(format!("failed to encode changeset: {e}")))?;
        record.set_changes(&changes);
    }
    Ok(())
}

impl collab::Server for CollabImpl {
    fn get_document(
        self: Rc<Self>,
        params: collab::GetDocumentParams,
        mut results: collab::GetDocumentResults,
    ) -> Promise<(), capnp::Error> {
        let p = pry!(params.get());
        let document_id = DocumentId::new(pry!(pry!(p.get_document_id()).to_str()));

        log::debug!("get_document called for {}", document_id);
        let authority = self.registry.get_or_create(&document_id);

        Promise::from_future(async move {
            let snapshot = authority.snapshot().await;
            let mut r = results.get();
            r.set_version(snapshot.version());
            r.set_content(snapshot.content());
            Ok(())
        })
    }

    fn push_updates(
        self: Rc<Self>,
        params: collab::PushUpdatesParams,
        mut results: collab::PushUpdatesResults,
    ) -> Promise<(), capnp::Error> {
        let p = pry!(params.get());
        let document_id = DocumentId::new(pry!(pry!(p.get_document_id()).to_str()));
        let expected_version = p.get_expected_version();
        let updates = pry!(read_updates(pry!(p.get_updates())));

        log::debug!(
            "push_updates called for {} with {} update(s) at version {}",
            document_id,
            updates.len(),
            expected_version
        );
        let authority = self.registry.get_or_create(&document_id);

        Promise::from_future(async move {
            match authority.push_updates(expected_version, updates).await {
                Ok(accepted) => {
                    if !accepted {
                        log::debug!(
                            "push for {} rejected: expected version {} is stale",
                            document_id,
                            expected_version
                        );
                    }
                    results.get().set_accepted(accepted);
                    Ok(())
                }
                Err(e) => {
                    // A batch that doesn't fit the document is a protocol
                    // violation, not a version conflict. Drop it whole and
                    // fail the call without touching the document.
                    log::error!("dropping corrupt batch for {}: {}", document_id, e);
                    Err(capnp::Error::failed(format!("invalid update batch: {e}")))
                }
            }
        })
    }

    fn pull_updates(
        self: Rc<Self>,
        params: collab::PullUpdatesParams,
        mut results: collab::PullUpdatesResults,
    ) -> Promise<(), capnp::Error> {
        let p = pry!(params.get());
        let document_id = DocumentId::new(pry!(pry!(p.get_document_id()).to_str()));
        let from_version = p.get_from_version();

        log::debug!(
            "pull_updates called for {} from version {}",
            document_id,
            from_version
        );
        let authority = self.registry.get_or_create(&document_id);

        Promise::from_future(async move {
            // Suspends until the log extends past from_version; the RPC
            // response is simply delayed until then (long-poll semantics).
            let updates = authority.pull_updates(from_version).await;
            log::debug!(
                "pull for {} resolved with {} update(s)",
                document_id,
                updates.len()
            );
            let records = results.get().init_updates(updates.len() as u32);
            write_updates(records, &updates)
        })
    }
}
