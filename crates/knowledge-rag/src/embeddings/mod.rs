//! Embedding generation for chunks and queries

pub mod client;

pub use client::EmbeddingClient;
