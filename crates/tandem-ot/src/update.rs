//! The atomic unit of change exchanged between sync agents and the authority.

use serde::{Deserialize, Serialize};

use crate::{ChangeSet, ClientId};

/// One client-originated edit: a changeset plus the identity of the client
/// that produced it. Immutable once created; the authority's update log is
/// an ordered sequence of these, and the update at log index `i` is by
/// definition the transition from version `i` to version `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    #[serde(rename = "clientID")]
    pub client: ClientId,
    pub changes: ChangeSet,
}

impl Update {
    pub fn new(client: ClientId, changes: ChangeSet) -> Update {
        Update { client, changes }
    }
}
