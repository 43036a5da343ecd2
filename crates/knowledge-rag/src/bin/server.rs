//! Knowledge base server binary
//!
//! Run with: cargo run -p knowledge-rag --bin knowledge-rag-server [config.toml]

use knowledge_rag::{config::RagConfig, server::RagServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "knowledge_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                    Knowledge RAG Server                   ║
║         Personal Documents, Answers With Citations        ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let config = RagConfig::load(std::env::args().nth(1).map(PathBuf::from))?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Data dir: {}", config.storage.data_dir.display());
    tracing::info!(
        "  - Embeddings: {:?} {} ({} dims)",
        config.embeddings.provider,
        config.embeddings.model,
        config.embeddings.dimensions
    );
    tracing::info!("  - LLM: {:?} {}", config.llm.provider, config.llm.model);
    tracing::info!("  - Index: {:?}", config.vector_db.backend);
    tracing::info!(
        "  - Chunking: {} chars, {} overlap",
        config.chunking.max_chunk_size,
        config.chunking.overlap_size
    );

    let server = RagServer::from_config(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  Ready: http://{}/ready", server.address());
    println!("\nEndpoints (send the owner in the x-owner-id header):");
    println!("  POST   /api/documents           - Upload a document");
    println!("  GET    /api/documents           - List documents");
    println!("  GET    /api/documents/:id       - Document status");
    println!("  DELETE /api/documents/:id       - Delete a document");
    println!("  POST   /api/documents/:id/retry - Retry a failed document");
    println!("  POST   /api/search              - Semantic search");
    println!("  POST   /api/ask                 - Ask a question");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
