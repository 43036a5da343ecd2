//! HTTP server for the knowledge base

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::service::{HealthReport, KnowledgeBase};
use state::AppState;

/// Knowledge base HTTP server
pub struct RagServer {
    config: RagConfig,
    state: AppState,
}

impl RagServer {
    /// Serve an already running knowledge base
    pub fn new(knowledge_base: Arc<KnowledgeBase>) -> Self {
        let config = knowledge_base.config().clone();
        Self {
            config,
            state: AppState::new(knowledge_base),
        }
    }

    /// Build the knowledge base from config, then the server around it
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        let knowledge_base = KnowledgeBase::from_config(config).await?;
        Ok(Self::new(knowledge_base))
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .nest("/api", routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CompressionLayer::new()),
            );

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        }
    }

    /// Start the server
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.router();

        tracing::info!("Starting knowledge base server on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Liveness
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness: every dependency answers
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.knowledge_base().health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
