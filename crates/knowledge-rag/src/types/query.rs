//! Query request types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query
    pub query: String,
    /// Number of results (clamped server-side)
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Only search these documents; empty searches all of them
    #[serde(default)]
    pub document_ids: Vec<Uuid>,
}

/// Question-answering request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    /// The question to answer from the owner's documents
    pub question: String,
    /// Number of chunks to ground the answer on
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Only answer from these documents; empty uses all of them
    #[serde(default)]
    pub document_ids: Vec<Uuid>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            document_ids: Vec::new(),
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn within(mut self, document_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.document_ids = document_ids.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_optional() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "rust"}"#).unwrap();
        assert_eq!(req.top_k, None);

        assert!(req.document_ids.is_empty());

        let req = AskRequest::new("why?").with_top_k(3);
        assert_eq!(req.top_k, Some(3));
    }

    #[test]
    fn test_document_ids_parsed() {
        let id = Uuid::new_v4();
        let req: AskRequest =
            serde_json::from_str(&format!(r#"{{"question": "why?", "document_ids": ["{}"]}}"#, id))
                .unwrap();
        assert_eq!(req.document_ids, vec![id]);
        assert_eq!(AskRequest::new("why?").within([id]).document_ids, vec![id]);

        let bad: std::result::Result<SearchRequest, _> =
            serde_json::from_str(r#"{"query": "rust", "document_ids": ["not-a-uuid"]}"#);
        assert!(bad.is_err());
    }
}
