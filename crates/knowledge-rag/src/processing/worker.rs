//! Background worker that drains the ingestion queue

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use crate::error::Error;
use crate::ingestion::{IngestOutcome, IngestionPipeline};

use super::queue::{IngestQueue, IngestTask};

/// Runs ingestion for queued documents, a bounded number at a time
pub struct IngestionWorker {
    pipeline: Arc<IngestionPipeline>,
    queue: IngestQueue,
    parallel_documents: usize,
    document_timeout: Duration,
}

impl IngestionWorker {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        queue: IngestQueue,
        parallel_documents: usize,
        document_timeout: Duration,
    ) -> Self {
        Self {
            pipeline,
            queue,
            parallel_documents: parallel_documents.max(1),
            document_timeout,
        }
    }

    /// Process tasks until every sender is dropped, then wait for in-flight work
    pub async fn run(self, mut receiver: mpsc::Receiver<IngestTask>) {
        tracing::info!(
            "Ingestion worker started: {} parallel documents, {}s timeout",
            self.parallel_documents,
            self.document_timeout.as_secs()
        );

        let semaphore = Arc::new(Semaphore::new(self.parallel_documents));

        while let Some(task) = receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let pipeline = self.pipeline.clone();
            let queue = self.queue.clone();
            let document_timeout = self.document_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                queue.mark_started();
                Self::process(&pipeline, task, document_timeout).await;
                queue.mark_finished();
            });
        }

        // Wait for in-flight documents before returning
        let _ = semaphore.acquire_many(self.parallel_documents as u32).await;
        tracing::info!("Ingestion worker stopped");
    }

    async fn process(pipeline: &IngestionPipeline, task: IngestTask, limit: Duration) {
        let document_id = task.document_id;
        let waited = chrono::Utc::now() - task.enqueued_at;
        tracing::debug!(
            "Picked up document {} after {}ms in queue",
            document_id,
            waited.num_milliseconds()
        );

        let result = match timeout(limit, pipeline.ingest(document_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "TIMEOUT ingesting document {} after {}s",
                    document_id,
                    limit.as_secs()
                );
                pipeline
                    .abandon(
                        document_id,
                        Error::internal(format!(
                            "ingestion timed out after {}s",
                            limit.as_secs()
                        )),
                    )
                    .await
            }
        };

        match result {
            Ok(IngestOutcome::Failed { code, .. }) => {
                tracing::warn!("Document {} failed ({})", document_id, code)
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Ingestion of document {} aborted: {}", document_id, e),
        }
    }
}
