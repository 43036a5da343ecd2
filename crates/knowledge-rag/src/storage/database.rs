//! SQLite database for document and chunk records
//!
//! The document row is the single source of truth for ingestion status and
//! deletion progress. Chunk rows reference their document and are removed
//! with it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chunk, DeletionState, Document, DocumentStatus, MediaType};

const DOCUMENT_COLUMNS: &str = "id, owner_id, filename, media_type, size_bytes, storage_location, \
     content_hash, status, failure_code, failure_reason, chunk_count, deletion_state, \
     created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "id, document_id, owner_id, ordinal, char_start, char_end, content, page_number";

/// SQLite-backed document registry
#[derive(Clone)]
pub struct DocumentDb {
    conn: Arc<Mutex<Connection>>,
}

/// Document counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DocumentDbStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub ready: usize,
    pub failed: usize,
    pub chunks: usize,
}

impl DocumentDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run raw SQL against the connection
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                media_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                storage_location TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                failure_code TEXT,
                failure_reason TEXT,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                deletion_state TEXT NOT NULL DEFAULT 'none',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_deletion ON documents(deletion_state);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                content TEXT NOT NULL,
                page_number INTEGER,
                UNIQUE(document_id, ordinal)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
        "#,
        )?;

        tracing::debug!("Document database migrations complete");
        Ok(())
    }

    // ==================== Documents ====================

    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                DOCUMENT_COLUMNS
            ),
            params![
                doc.id.to_string(),
                doc.owner_id,
                doc.filename,
                doc.media_type.as_mime(),
                doc.size_bytes as i64,
                doc.storage_location,
                doc.content_hash,
                doc.status.as_str(),
                doc.failure_code,
                doc.failure_reason,
                doc.chunk_count as i64,
                doc.deletion_state.as_str(),
                doc.created_at,
                doc.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                params![id.to_string()],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Fetch a document only if `owner_id` owns it; anything else is `NotFound`
    pub fn get_owned_document(&self, id: Uuid, owner_id: &str) -> Result<Document> {
        match self.get_document(id)? {
            Some(doc) if doc.owner_id == owner_id => Ok(doc),
            _ => Err(Error::not_found(format!("document {}", id))),
        }
    }

    /// An owner's documents, newest first
    pub fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC, id",
            DOCUMENT_COLUMNS
        ))?;
        let docs = stmt
            .query_map(params![owner_id], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    pub fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE status = ?1 AND deletion_state = 'none' ORDER BY created_at",
            DOCUMENT_COLUMNS
        ))?;
        let docs = stmt
            .query_map(params![status.as_str()], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Documents whose deletion was started but never finished
    pub fn documents_pending_deletion(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE deletion_state != 'none' ORDER BY created_at",
            DOCUMENT_COLUMNS
        ))?;
        let docs = stmt
            .query_map([], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Compare-and-set on status; false when the row was not in `from`
    /// or is being deleted
    pub fn transition_status(&self, id: Uuid, from: DocumentStatus, to: DocumentStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND deletion_state = 'none'",
            params![to.as_str(), Utc::now(), id.to_string(), from.as_str()],
        )?;
        Ok(updated == 1)
    }

    /// `processing → ready`; this single-row update is what makes chunks visible
    pub fn mark_ready(&self, id: Uuid, chunk_count: u32) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents
             SET status = 'ready', chunk_count = ?1, failure_code = NULL, failure_reason = NULL, updated_at = ?2
             WHERE id = ?3 AND status = 'processing' AND deletion_state = 'none'",
            params![chunk_count as i64, Utc::now(), id.to_string()],
        )?;
        Ok(updated == 1)
    }

    /// Record a terminal failure for a document still in flight
    pub fn mark_failed(&self, id: Uuid, code: &str, reason: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents
             SET status = 'failed', chunk_count = 0, failure_code = ?1, failure_reason = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'processing')",
            params![code, reason, Utc::now(), id.to_string()],
        )?;
        Ok(updated == 1)
    }

    /// `failed → pending`, clearing the recorded failure
    pub fn reset_for_retry(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents
             SET status = 'pending', failure_code = NULL, failure_reason = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'failed' AND deletion_state = 'none'",
            params![Utc::now(), id.to_string()],
        )?;
        Ok(updated == 1)
    }

    /// Put documents interrupted mid-ingestion back to `pending`
    pub fn reset_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents SET status = 'pending', updated_at = ?1
             WHERE status = 'processing' AND deletion_state = 'none'",
            params![Utc::now()],
        )?;
        Ok(updated)
    }

    pub fn set_deletion_state(&self, id: Uuid, state: DeletionState) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents SET deletion_state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.as_str(), Utc::now(), id.to_string()],
        )?;
        Ok(updated == 1)
    }

    /// Remove a document row and its chunks in one transaction
    pub fn delete_document_rows(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id.to_string()])?;
        let deleted = tx.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(deleted == 1)
    }

    // ==================== Chunks ====================

    /// Replace a document's chunk rows with `chunks`
    pub fn replace_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO chunks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                CHUNK_COLUMNS
            ))?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id.to_string(),
                    chunk.document_id.to_string(),
                    chunk.owner_id,
                    chunk.ordinal as i64,
                    chunk.char_start as i64,
                    chunk.char_end as i64,
                    chunk.content,
                    chunk.page_number.map(|p| p as i64),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_chunks(&self, document_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        Ok(deleted)
    }

    /// A document's chunks in ordinal order
    pub fn get_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE document_id = ?1 ORDER BY ordinal",
            CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map(params![document_id.to_string()], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// Resolve chunk ids to chunks plus their document's filename, keeping
    /// only chunks of `owner_id`'s ready documents that are not being deleted
    pub fn get_visible_chunks(&self, chunk_ids: &[Uuid], owner_id: &str) -> Result<HashMap<Uuid, (Chunk, String)>> {
        let mut found = HashMap::with_capacity(chunk_ids.len());
        if chunk_ids.is_empty() {
            return Ok(found);
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, c.owner_id, c.ordinal, c.char_start, c.char_end,
                    c.content, c.page_number, d.filename
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE c.id = ?1 AND c.owner_id = ?2 AND d.owner_id = ?2
               AND d.status = 'ready' AND d.deletion_state = 'none'",
        )?;
        for id in chunk_ids {
            let row = stmt
                .query_row(params![id.to_string(), owner_id], |row| {
                    Ok((row_to_chunk(row)?, row.get::<_, String>(8)?))
                })
                .optional()?;
            if let Some((chunk, filename)) = row {
                found.insert(chunk.id, (chunk, filename));
            }
        }
        Ok(found)
    }

    /// Chunks of every ready document, for rebuilding a volatile index
    pub fn ready_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, c.owner_id, c.ordinal, c.char_start, c.char_end,
                    c.content, c.page_number
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE d.status = 'ready' AND d.deletion_state = 'none'
             ORDER BY c.document_id, c.ordinal",
        )?;
        let chunks = stmt
            .query_map([], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn get_stats(&self) -> Result<DocumentDbStats> {
        let conn = self.conn.lock();
        let mut stats = DocumentDbStats::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            stats.total += count;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "ready" => stats.ready = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }

        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        stats.chunks = chunks as usize;
        Ok(stats)
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let media_type: String = row.get(3)?;
    let status: String = row.get(7)?;
    let deletion_state: String = row.get(11)?;

    Ok(Document {
        id: uuid_at(row, 0)?,
        owner_id: row.get(1)?,
        filename: row.get(2)?,
        media_type: MediaType::from_mime(&media_type).map_err(|e| conversion_error(3, e))?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        storage_location: row.get(5)?,
        content_hash: row.get(6)?,
        status: status.parse().map_err(|e| conversion_error(7, e))?,
        failure_code: row.get(8)?,
        failure_reason: row.get(9)?,
        chunk_count: row.get::<_, i64>(10)? as u32,
        deletion_state: deletion_state.parse().map_err(|e| conversion_error(11, e))?,
        created_at: row.get::<_, DateTime<Utc>>(12)?,
        updated_at: row.get::<_, DateTime<Utc>>(13)?,
    })
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let char_start = row.get::<_, i64>(4)? as usize;
    let char_end = row.get::<_, i64>(5)? as usize;
    Ok(Chunk {
        id: uuid_at(row, 0)?,
        document_id: uuid_at(row, 1)?,
        owner_id: row.get(2)?,
        ordinal: row.get::<_, i64>(3)? as u32,
        char_start,
        char_end,
        content: row.get(6)?,
        char_count: char_end.saturating_sub(char_start),
        page_number: row.get::<_, Option<i64>>(7)?.map(|p| p as u32),
    })
}
