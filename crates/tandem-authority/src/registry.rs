//! Registry of per-document authorities.
//!
//! Documents are independent; the registry shards them by ID and constructs
//! an [`Authority`] on first access, so there is no ambient global state and
//! no cross-document locking.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use tandem_ot::DocumentId;

use crate::Authority;

/// Factory and lookup table for [`Authority`] instances.
pub struct AuthorityRegistry {
    documents: DashMap<DocumentId, Arc<Authority>>,
    /// Content given to documents created on first access. Real initial
    /// content comes from project storage, which is outside this core.
    seed_content: String,
}

impl AuthorityRegistry {
    /// Registry whose lazily-created documents start empty.
    pub fn new() -> AuthorityRegistry {
        AuthorityRegistry::with_seed("")
    }

    /// Registry whose lazily-created documents start with `seed_content`.
    pub fn with_seed(seed_content: impl Into<String>) -> AuthorityRegistry {
        AuthorityRegistry {
            documents: DashMap::new(),
            seed_content: seed_content.into(),
        }
    }

    /// Look up a document's authority without creating it.
    pub fn get(&self, id: &DocumentId) -> Option<Arc<Authority>> {
        self.documents.get(id).map(|entry| entry.clone())
    }

    /// Get the authority for `id`, constructing it with the seed content on
    /// first access.
    pub fn get_or_create(&self, id: &DocumentId) -> Arc<Authority> {
        self.documents
            .entry(id.clone())
            .or_insert_with(|| {
                info!(doc = %id, "creating document");
                Arc::new(Authority::new(id.clone(), &self.seed_content))
            })
            .clone()
    }

    /// Register a document with explicit initial content (e.g. loaded from
    /// storage). Returns the existing authority if the document is already
    /// open, ignoring `content`.
    pub fn open_with(&self, id: &DocumentId, content: impl Into<String>) -> Arc<Authority> {
        let content = content.into();
        self.documents
            .entry(id.clone())
            .or_insert_with(|| {
                info!(doc = %id, "opening document with initial content");
                Arc::new(Authority::new(id.clone(), content))
            })
            .clone()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// IDs of all open documents.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for AuthorityRegistry {
    fn default() -> Self {
        AuthorityRegistry::new()
    }
}

/// Shared registry handle. The registry is internally sharded; no outer lock
/// is needed.
pub type SharedRegistry = Arc<AuthorityRegistry>;

/// Convenience constructor for a shared registry.
pub fn shared_registry(seed_content: impl Into<String>) -> SharedRegistry {
    Arc::new(AuthorityRegistry::with_seed(seed_content))
}
