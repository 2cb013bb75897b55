//! Document store collaborator
//!
//! The engine only needs to know whether the target document exists
//! before starting a workflow. Storage, encryption, and retrieval are
//! the surrounding platform's concern.

use docflow_types::DocumentId;
use std::collections::HashSet;
use std::sync::Mutex;

/// Existence check against the document store
pub trait DocumentStore: Send + Sync {
    fn exists(&self, document: &DocumentId) -> bool;
}

/// Document store backed by an in-memory id set
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashSet<DocumentId>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: impl Into<String>) -> Self {
        self.add(DocumentId::new(id));
        self
    }

    pub fn add(&self, id: DocumentId) {
        self.documents
            .lock()
            .expect("document set mutex poisoned")
            .insert(id);
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn exists(&self, document: &DocumentId) -> bool {
        self.documents
            .lock()
            .expect("document set mutex poisoned")
            .contains(document)
    }
}
