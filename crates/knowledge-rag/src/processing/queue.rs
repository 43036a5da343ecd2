//! Bounded ingestion queue

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A document waiting to be ingested
#[derive(Debug, Clone)]
pub struct IngestTask {
    pub document_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting in the channel
    pub queued: usize,
    /// Being ingested right now
    pub active: usize,
    /// Finished since startup, whatever the outcome
    pub completed: usize,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicUsize,
}

/// Sending half of the ingestion channel plus shared counters
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<IngestTask>,
    counters: Arc<Counters>,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` waiting tasks
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<IngestTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender,
            counters: Arc::new(Counters::default()),
        };
        (queue, receiver)
    }

    /// Enqueue a document, waiting for room when the queue is full
    pub async fn enqueue(&self, document_id: Uuid) -> Result<()> {
        let task = IngestTask {
            document_id,
            enqueued_at: Utc::now(),
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.sender.send(task).await {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Failed to enqueue document {}: {}", document_id, e);
            return Err(Error::internal("ingestion queue is closed"));
        }

        tracing::debug!("Enqueued document {} for ingestion", document_id);
        Ok(())
    }

    /// Enqueue a document only if there is room right now
    pub fn try_enqueue(&self, document_id: Uuid) -> Result<()> {
        let task = IngestTask {
            document_id,
            enqueued_at: Utc::now(),
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.sender.try_send(task) {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(match e {
                TrySendError::Full(_) => {
                    tracing::warn!("Ingestion queue full, rejecting document {}", document_id);
                    Error::QueueFull {
                        capacity: self.sender.max_capacity(),
                    }
                }
                TrySendError::Closed(_) => Error::internal("ingestion queue is closed"),
            });
        }

        tracing::debug!("Enqueued document {} for ingestion", document_id);
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.counters.queued.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
        }
    }

    /// True once nothing is waiting or running
    pub fn is_idle(&self) -> bool {
        let stats = self.stats();
        stats.queued == 0 && stats.active == 0
    }

    pub(crate) fn mark_started(&self) {
        self.counters.queued.fetch_sub(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_finished(&self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
    }
}
