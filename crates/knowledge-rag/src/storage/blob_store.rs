//! Filesystem storage for raw uploads

use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Stores each upload as `<document id>.bin` under one directory.
///
/// Locations handed out are file names relative to that directory, so the
/// data directory can be moved without rewriting database rows.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a blob store, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Write bytes for a document, returning the storage location
    pub async fn put(&self, document_id: Uuid, data: &[u8]) -> Result<String> {
        let location = format!("{}.bin", document_id);
        let path = self.root.join(&location);
        let tmp = self.root.join(format!("{}.tmp", document_id));

        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Stored {} bytes at {}", data.len(), path.display());
        Ok(location)
    }

    /// Read the bytes stored at a location
    pub async fn get(&self, location: &str) -> Result<Vec<u8>> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read upload {}: {}", location, e)))
    }

    /// Remove stored bytes; missing files are not an error
    pub async fn delete(&self, location: &str) -> Result<()> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, location: &str) -> Result<bool> {
        let path = self.resolve(location)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Locations are plain file names; anything else is refused
    fn resolve(&self, location: &str) -> Result<PathBuf> {
        if location.is_empty()
            || location.contains(['/', '\\'])
            || location.starts_with('.')
        {
            return Err(Error::Internal(format!("Invalid storage location '{}'", location)));
        }
        Ok(self.root.join(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("uploads")).unwrap();
        let id = Uuid::new_v4();

        let location = store.put(id, b"hello").await.unwrap();
        assert_eq!(location, format!("{}.bin", id));
        assert_eq!(store.get(&location).await.unwrap(), b"hello");
        assert!(store.exists(&location).await.unwrap());

        store.delete(&location).await.unwrap();
        assert!(!store.exists(&location).await.unwrap());
        store.delete(&location).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
