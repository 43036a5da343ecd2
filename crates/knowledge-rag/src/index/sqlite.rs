//! SQLite-backed vector index
//!
//! Vectors are stored as little-endian `f32` BLOBs next to their metadata.
//! Queries load the owner's rows and score them in process, which keeps the
//! index exact and is fast enough for personal-scale collections.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{check_dimensions, cosine_similarity, rank, IndexEntry, IndexHit, VectorIndex};
use crate::error::{Error, Result};

pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Create or open the index at the given path
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::index(format!("Failed to open index database: {}", e)))?;
        Self::with_connection(conn, dimensions)
    }

    /// Create an in-memory index (for testing)
    pub fn in_memory(dimensions: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::index(format!("Failed to open in-memory index: {}", e)))?;
        Self::with_connection(conn, dimensions)
    }

    fn with_connection(conn: Connection, dimensions: usize) -> Result<Self> {
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            dimensions,
        };
        index.migrate()?;
        Ok(index)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS index_entries (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                excerpt TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_index_entries_owner ON index_entries(owner_id);
            CREATE INDEX IF NOT EXISTS idx_index_entries_document ON index_entries(document_id);
            "#,
        )
        .map_err(|e| Error::index(format!("Failed to migrate index: {}", e)))?;

        let stored: Option<i64> = conn
            .query_row("SELECT dimensions FROM index_entries LIMIT 1", [], |row| row.get(0))
            .ok();
        if let Some(stored) = stored {
            if stored as usize != self.dimensions {
                return Err(Error::DimensionMismatch {
                    expected: self.dimensions,
                    actual: stored as usize,
                });
            }
        }
        Ok(())
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::index(format!("index task failed: {}", e)))?
        .map_err(|e| Error::index(e.to_string()))
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn parse_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            check_dimensions(self.dimensions, &entry.vector)?;
        }
        let entries = entries.to_vec();
        let count = entries.len();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO index_entries (chunk_id, document_id, owner_id, excerpt, dimensions, vector)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(chunk_id) DO UPDATE SET
                        document_id = excluded.document_id,
                        owner_id = excluded.owner_id,
                        excerpt = excluded.excerpt,
                        dimensions = excluded.dimensions,
                        vector = excluded.vector
                    "#,
                )?;
                for entry in &entries {
                    stmt.execute(params![
                        entry.chunk_id.to_string(),
                        entry.document_id.to_string(),
                        entry.owner_id,
                        entry.excerpt,
                        entry.vector.len() as i64,
                        encode_vector(&entry.vector),
                    ])?;
                }
            }
            tx.commit()
        })
        .await?;

        tracing::debug!("Upserted {} entries", count);
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
        let owner_id = owner_id.to_string();
        let query = vector.to_vec();
        let scope: HashSet<Uuid> = document_ids.iter().copied().collect();

        let hits = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_id, document_id, vector FROM index_entries WHERE owner_id = ?1",
                )?;
                let rows = stmt.query_map(params![owner_id], |row| {
                    let bytes: Vec<u8> = row.get(2)?;
                    Ok(IndexHit {
                        chunk_id: parse_uuid(0, row.get(0)?)?,
                        document_id: parse_uuid(1, row.get(1)?)?,
                        score: cosine_similarity(&query, &decode_vector(&bytes)),
                    })
                })?;
                let mut hits = Vec::new();
                for hit in rows {
                    let hit = hit?;
                    if scope.is_empty() || scope.contains(&hit.document_id) {
                        hits.push(hit);
                    }
                }
                Ok(hits)
            })
            .await?;

        Ok(rank(hits, top_k))
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE document_id = ?1",
                params![document_id.to_string()],
            )
        })
        .await
    }

    async fn count_for_document(&self, document_id: Uuid) -> Result<usize> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM index_entries WHERE document_id = ?1",
                params![document_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as usize)
    }

    async fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM index_entries", [], |row| row.get::<_, i64>(0))
        })
        .await
        .map(|n| n as usize)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self
            .with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .is_ok())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
