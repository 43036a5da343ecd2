//! Prompt templates for grounded answers

use crate::types::{QueryResult, ScoredChunk};

use super::citation::source_tag;

/// Prompt builder for RAG queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Instructions sent as the system prompt
    pub fn system_prompt() -> &'static str {
        r#"You are a document-grounded assistant that ONLY uses information from the provided sources.

CRITICAL GROUNDING RULES - YOU MUST FOLLOW THESE EXACTLY:
1. ONLY use information that is EXPLICITLY stated in the SOURCES
2. If the answer is not in the sources: say that the documents do not contain this information
3. NEVER use external knowledge, general knowledge, or training data
4. Every fact or claim MUST be followed by the tag of the source it came from, for example [S1]
5. If several sources support a claim, list them together, for example [S1, S3]
6. ONLY use tags that appear in the SOURCES list; never invent a tag"#
    }

    /// Numbered source blocks, one per retrieved chunk
    pub fn build_context(result: &QueryResult) -> String {
        let mut context = String::new();
        for (i, scored) in result.iter().enumerate() {
            context.push_str(&format!(
                "[{}] {}\n{}\n\n---\n\n",
                source_tag(i),
                Self::format_source_ref(scored),
                scored.chunk.content.trim()
            ));
        }
        context
    }

    fn format_source_ref(scored: &ScoredChunk) -> String {
        match scored.chunk.page_number {
            Some(page) => format!("{}, Page {}", scored.filename, page),
            None => scored.filename.clone(),
        }
    }

    /// Full user prompt: sources first, then the question
    pub fn build_rag_prompt(question: &str, result: &QueryResult) -> String {
        format!(
            r#"SOURCES:
{context}
QUESTION: {question}

Answer using ONLY the sources above and cite them with their tags:"#,
            context = Self::build_context(result),
            question = question.trim()
        )
    }
}
