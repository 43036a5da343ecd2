//! Full flows through the knowledge base service: upload, background
//! ingestion, search, answers, deletion and recovery.

mod common;

use common::{
    test_config, two_paragraphs, CitingLlm, GatedEmbedder, Harness, SwitchableEmbedder, EIFFEL,
    PHOTOSYNTHESIS,
};
use knowledge_rag::storage::BlobStore;
use knowledge_rag::{Document, DocumentStatus, Error, MediaType};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_upload_search_and_ask() {
    let h = Harness::new().await;
    let text = two_paragraphs();

    let receipt = h
        .kb
        .upload("alice", "notes.txt", Some("text/plain"), text.as_bytes())
        .await
        .unwrap();
    assert_eq!(receipt.status, DocumentStatus::Pending);
    assert_eq!(receipt.media_type, MediaType::PlainText);
    assert_eq!(receipt.size_bytes, text.len() as u64);

    let view = h.wait_for_terminal("alice", receipt.document_id).await;
    assert_eq!(view.status, DocumentStatus::Ready);
    assert_eq!(view.chunk_count, 2);
    assert_eq!(view.content_hash.len(), 64);

    let chunks = h.kb.chunks("alice", receipt.document_id).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(h.index.len().await.unwrap(), 2);

    let search = h
        .kb
        .search("alice", "How do plants convert sunlight into energy?", Some(2))
        .await
        .unwrap();
    assert_eq!(search.results.len(), 2);
    assert_eq!(search.results[0].ordinal, 1);
    assert_eq!(search.results[0].filename, "notes.txt");
    assert!(search.results[0].content.contains("Photosynthesis"));
    assert!(search.results[0].score >= search.results[1].score);

    let answer = h
        .kb
        .ask("alice", "How do plants convert sunlight into energy?", Some(2))
        .await
        .unwrap();
    assert!(!answer.insufficient_information);
    assert_eq!(answer.answer, CitingLlm::REPLY);
    assert_eq!(answer.chunks_retrieved, 2);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].tag, "S1");
    assert_eq!(answer.citations[0].chunk_id, search.results[0].chunk_id);
    assert_eq!(answer.citations[0].document_id, receipt.document_id);

    let prompt = h.llm.last_prompt().unwrap();
    assert!(prompt.contains("[S1] notes.txt"));
    assert!(prompt.contains("Photosynthesis"));
}

#[tokio::test]
async fn test_unsupported_upload_leaves_nothing_behind() {
    let h = Harness::new().await;

    let result = h
        .kb
        .upload("alice", "photo.png", Some("image/png"), &[0x89, 0x50, 0x4e, 0x47])
        .await;
    assert!(matches!(result, Err(Error::UnsupportedMediaType(_))));

    let guessed = h.kb.upload("alice", "archive.zip", None, b"PK").await;
    assert!(matches!(guessed, Err(Error::UnsupportedMediaType(_))));

    assert!(h.kb.list("alice").unwrap().is_empty());
    let uploads = std::fs::read_dir(h.dir.path().join("uploads")).unwrap();
    assert_eq!(uploads.count(), 0);
}

#[tokio::test]
async fn test_upload_limits_and_identity() {
    let h = Harness::new().await;

    let unowned = h.kb.upload("  ", "notes.txt", None, b"hello").await;
    assert!(matches!(unowned, Err(Error::Unauthorized(_))));

    let limit = h.kb.config().server.max_upload_size;
    let oversized = vec![b'a'; limit + 1];
    let result = h.kb.upload("alice", "big.txt", None, &oversized).await;
    assert!(matches!(result, Err(Error::PayloadTooLarge { .. })));

    // Declared octet-stream falls back to the filename
    let receipt = h
        .kb
        .upload("alice", "guide.md", Some("application/octet-stream"), b"# Guide\n\nSome text.")
        .await
        .unwrap();
    assert_eq!(receipt.media_type, MediaType::Markdown);
}

#[tokio::test]
async fn test_owner_isolation() {
    let h = Harness::new().await;
    let id = h.upload_text("alice", "notes.txt", &two_paragraphs()).await;
    h.wait_for_terminal("alice", id).await;

    let search = h.kb.search("bob", "photosynthesis sunlight", None).await.unwrap();
    assert!(search.results.is_empty());

    let answer = h.kb.ask("bob", "What is photosynthesis?", None).await.unwrap();
    assert!(answer.insufficient_information);
    assert!(answer.citations.is_empty());
    assert_eq!(h.llm.calls(), 0);

    assert!(matches!(h.kb.status("bob", id), Err(Error::NotFound(_))));
    assert!(matches!(h.kb.delete("bob", id).await, Err(Error::NotFound(_))));
    assert!(h.kb.list("bob").unwrap().is_empty());
    assert_eq!(h.kb.list("alice").unwrap().len(), 1);
}

#[tokio::test]
async fn test_blank_query_rejected() {
    let h = Harness::new().await;
    assert!(matches!(
        h.kb.search("alice", "   ", None).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        h.kb.ask("alice", "", None).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_empty_document_fails() {
    let h = Harness::new().await;
    let id = h.upload_text("alice", "blank.txt", "  \n\n\t ").await;

    let view = h.wait_for_terminal("alice", id).await;
    assert_eq!(view.status, DocumentStatus::Failed);
    assert_eq!(view.failure_code.as_deref(), Some("empty_document"));
    assert_eq!(view.chunk_count, 0);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let h = Harness::new().await;
    let id = h.upload_text("alice", "notes.txt", &two_paragraphs()).await;
    h.wait_for_terminal("alice", id).await;
    assert_eq!(h.index.count_for_document(id).await.unwrap(), 2);

    h.kb.delete("alice", id).await.unwrap();

    assert_eq!(h.index.count_for_document(id).await.unwrap(), 0);
    assert!(h.db.get_document(id).unwrap().is_none());
    assert!(h.db.get_chunks(id).unwrap().is_empty());
    assert!(matches!(h.kb.status("alice", id), Err(Error::NotFound(_))));

    let search = h.kb.search("alice", "photosynthesis", None).await.unwrap();
    assert!(search.results.is_empty());

    let uploads = std::fs::read_dir(h.dir.path().join("uploads")).unwrap();
    assert_eq!(uploads.count(), 0);
}

#[tokio::test]
async fn test_delete_during_ingestion_discards_results() {
    let embedder = Arc::new(GatedEmbedder::new());
    let h = Harness::with_embedder(embedder.clone()).await;
    let id = h.upload_text("alice", "notes.txt", &two_paragraphs()).await;

    for _ in 0..500 {
        if h.kb.status("alice", id).unwrap().status == DocumentStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.kb.status("alice", id).unwrap().status, DocumentStatus::Processing);

    h.kb.delete("alice", id).await.unwrap();
    embedder.open();
    h.wait_until_idle().await;

    assert_eq!(h.index.len().await.unwrap(), 0);
    assert!(h.db.get_document(id).unwrap().is_none());
    assert!(h.db.get_chunks(id).unwrap().is_empty());
    assert_eq!(h.kb.queue_stats().completed, 1);
}

#[tokio::test]
async fn test_retry_after_embedding_outage() {
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let h = Harness::with_embedder(embedder.clone()).await;
    let id = h.upload_text("alice", "notes.txt", &two_paragraphs()).await;

    let failed = h.wait_for_terminal("alice", id).await;
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.failure_code.as_deref(), Some("embedding_unavailable"));
    assert!(failed.failure_reason.is_some());
    assert_eq!(h.index.len().await.unwrap(), 0);
    assert!(h.db.get_chunks(id).unwrap().is_empty());

    embedder.set_down(false);
    h.kb.retry("alice", id).await.unwrap();

    let ready = h.wait_for_terminal("alice", id).await;
    assert_eq!(ready.status, DocumentStatus::Ready);
    assert_eq!(ready.chunk_count, 2);
    assert!(ready.failure_code.is_none());
    assert_eq!(h.index.count_for_document(id).await.unwrap(), 2);

    assert!(matches!(h.kb.retry("alice", id).await, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_restart_resumes_interrupted_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = knowledge_rag::storage::DocumentDb::in_memory().unwrap();
    let config = test_config(dir.path());
    let blobs = BlobStore::new(config.storage.uploads_path()).unwrap();

    // Left mid-ingestion by a previous process
    let text = two_paragraphs();
    let mut doc = Document::new("alice", "notes.txt", MediaType::PlainText, text.len() as u64, "h".into());
    doc.storage_location = blobs.put(doc.id, text.as_bytes()).await.unwrap();
    db.insert_document(&doc).unwrap();
    assert!(db
        .transition_status(doc.id, DocumentStatus::Pending, DocumentStatus::Processing)
        .unwrap());

    let h = Harness::start(dir, db, Arc::new(knowledge_rag::providers::HashingEmbedder::new(common::DIMS))).await;
    let view = h.wait_for_terminal("alice", doc.id).await;
    assert_eq!(view.status, DocumentStatus::Ready);

    // A fresh in-memory index is rebuilt from stored chunks
    let h = h.restart().await;
    assert_eq!(h.index.len().await.unwrap(), 2);
    let search = h.kb.search("alice", "photosynthesis sunlight", Some(1)).await.unwrap();
    assert_eq!(search.results.len(), 1);
    assert_eq!(search.results[0].document_id, doc.id);
}

#[tokio::test]
async fn test_ask_within_one_of_two_documents() {
    let h = Harness::new().await;
    let eiffel = h.upload_text("alice", "eiffel.txt", EIFFEL).await;
    let plants = h.upload_text("alice", "plants.txt", PHOTOSYNTHESIS).await;
    h.wait_for_terminal("alice", eiffel).await;
    h.wait_for_terminal("alice", plants).await;

    let question = "How do plants convert sunlight into energy?";
    let unscoped = h.kb.search("alice", question, Some(1)).await.unwrap();
    assert_eq!(unscoped.results[0].document_id, plants);

    let scoped = h
        .kb
        .search_within("alice", question, Some(5), &[eiffel])
        .await
        .unwrap();
    assert!(!scoped.results.is_empty());
    assert!(scoped.results.iter().all(|r| r.document_id == eiffel));

    let answer = h
        .kb
        .ask_within("alice", question, Some(5), &[eiffel])
        .await
        .unwrap();
    assert!(!answer.insufficient_information);
    assert!(answer.citations.iter().all(|c| c.document_id == eiffel));
    let prompt = h.llm.last_prompt().unwrap();
    assert!(prompt.contains("eiffel.txt"));
    assert!(!prompt.contains("plants.txt"));

    // Scoping never reaches another owner's documents
    let foreign = h
        .kb
        .ask_within("bob", question, None, &[eiffel, plants])
        .await
        .unwrap();
    assert!(foreign.insufficient_information);
    assert_eq!(h.llm.calls(), 1);
}

#[tokio::test]
async fn test_start_survives_embedding_outage() {
    let h = Harness::new().await;
    let id = h.upload_text("alice", "notes.txt", &two_paragraphs()).await;
    h.wait_for_terminal("alice", id).await;

    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let h = h.restart_with(embedder.clone()).await;
    assert!(h.index.is_empty().await.unwrap());
    assert_eq!(h.kb.status("alice", id).unwrap().status, DocumentStatus::Ready);
    assert!(matches!(
        h.kb.search("alice", "photosynthesis", None).await,
        Err(Error::EmbeddingUnavailable(_))
    ));

    embedder.set_down(false);
    assert_eq!(h.kb.rebuild_index().await.unwrap(), 2);
    let search = h.kb.search("alice", "photosynthesis sunlight", Some(1)).await.unwrap();
    assert_eq!(search.results[0].document_id, id);
}

#[tokio::test]
async fn test_full_queue_rejects_upload_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.processing.queue_capacity = 1;
    config.processing.parallel_documents = Some(1);
    let embedder = Arc::new(GatedEmbedder::new());
    let h = Harness::start_with_config(
        dir,
        knowledge_rag::storage::DocumentDb::in_memory().unwrap(),
        embedder.clone(),
        config,
    )
    .await;

    // The worker holds a few documents out of the channel; keep going until it is full
    let mut accepted = Vec::new();
    let mut rejected = None;
    for i in 0..10 {
        match h
            .kb
            .upload("alice", &format!("doc{}.txt", i), Some("text/plain"), EIFFEL.as_bytes())
            .await
        {
            Ok(receipt) => accepted.push(receipt.document_id),
            Err(e) => {
                rejected = Some(e);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let err = rejected.expect("queue never filled up");
    assert!(matches!(err, Error::QueueFull { capacity: 1 }));
    assert_eq!(err.code(), "queue_full");

    assert_eq!(h.kb.list("alice").unwrap().len(), accepted.len());
    let uploads = std::fs::read_dir(h.dir.path().join("uploads")).unwrap();
    assert_eq!(uploads.count(), accepted.len());

    embedder.open();
    for id in accepted {
        assert_eq!(h.wait_for_terminal("alice", id).await.status, DocumentStatus::Ready);
    }
}
