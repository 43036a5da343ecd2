//! In-process vector index
//!
//! Entries are partitioned by owner so a query only ever scans the caller's
//! vectors. Nothing is persisted; on startup the service rebuilds this index
//! from stored chunks.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{check_dimensions, cosine_similarity, rank, IndexEntry, IndexHit, VectorIndex};
use crate::error::Result;

#[derive(Default)]
struct Partitions {
    /// owner -> chunk id -> entry
    by_owner: HashMap<String, HashMap<Uuid, IndexEntry>>,
    /// chunk id -> owner, so replacing an entry finds its old partition
    owner_of: HashMap<Uuid, String>,
}

pub struct MemoryVectorIndex {
    dimensions: usize,
    inner: RwLock<Partitions>,
}

impl MemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: RwLock::new(Partitions::default()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            check_dimensions(self.dimensions, &entry.vector)?;
        }

        let mut inner = self.inner.write();
        for entry in entries {
            if let Some(previous_owner) = inner.owner_of.insert(entry.chunk_id, entry.owner_id.clone()) {
                if previous_owner != entry.owner_id {
                    if let Some(partition) = inner.by_owner.get_mut(&previous_owner) {
                        partition.remove(&entry.chunk_id);
                    }
                }
            }
            inner
                .by_owner
                .entry(entry.owner_id.clone())
                .or_default()
                .insert(entry.chunk_id, entry.clone());
        }
        tracing::debug!("Upserted {} entries", entries.len());
        Ok(())
    }

    async fn query_within(
        &self,
        vector: &[f32],
        owner_id: &str,
        document_ids: &[Uuid],
        top_k: usize,
    ) -> Result<Vec<IndexHit>> {
        check_dimensions(self.dimensions, vector)?;

        let inner = self.inner.read();
        let Some(partition) = inner.by_owner.get(owner_id) else {
            return Ok(Vec::new());
        };

        let hits = partition
            .values()
            .filter(|entry| document_ids.is_empty() || document_ids.contains(&entry.document_id))
            .map(|entry| IndexHit {
                chunk_id: entry.chunk_id,
                document_id: entry.document_id,
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        Ok(rank(hits, top_k))
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        let mut inner = self.inner.write();
        let mut removed = Vec::new();
        for partition in inner.by_owner.values_mut() {
            partition.retain(|chunk_id, entry| {
                if entry.document_id == document_id {
                    removed.push(*chunk_id);
                    false
                } else {
                    true
                }
            });
        }
        inner.by_owner.retain(|_, partition| !partition.is_empty());
        for chunk_id in &removed {
            inner.owner_of.remove(chunk_id);
        }
        Ok(removed.len())
    }

    async fn count_for_document(&self, document_id: Uuid) -> Result<usize> {
        let inner = self.inner.read();
        Ok(inner
            .by_owner
            .values()
            .flat_map(|partition| partition.values())
            .filter(|entry| entry.document_id == document_id)
            .count())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.read().owner_of.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
