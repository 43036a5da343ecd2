//! Application state for the HTTP server

use std::sync::Arc;
use std::time::Instant;

use crate::config::RagConfig;
use crate::service::KnowledgeBase;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    knowledge_base: Arc<KnowledgeBase>,
    started_at: Instant,
}

impl AppState {
    pub fn new(knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                knowledge_base,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.inner.knowledge_base
    }

    pub fn config(&self) -> &RagConfig {
        self.inner.knowledge_base.config()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
