//! Owner-scoped semantic retrieval

mod retriever;

pub use retriever::Retriever;
