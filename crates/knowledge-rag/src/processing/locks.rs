//! Per-document async locks
//!
//! The ingestion commit and deletion of the same document never interleave;
//! different documents never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a document
    pub async fn lock(&self, document_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a document that no longer exists
    pub fn forget(&self, document_id: Uuid) {
        self.locks
            .remove_if(&document_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
