//! Background ingestion: bounded queue, worker pool, per-document locks

mod locks;
mod queue;
mod worker;

pub use locks::DocumentLocks;
pub use queue::{IngestQueue, IngestTask, QueueStats};
pub use worker::IngestionWorker;
