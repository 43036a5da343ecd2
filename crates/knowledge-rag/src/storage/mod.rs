//! Persistent storage for document records and uploaded bytes
//!
//! Document and chunk rows live in SQLite; raw uploads live on the filesystem.

mod blob_store;
mod database;

pub use blob_store::BlobStore;
pub use database::{DocumentDb, DocumentDbStats};
