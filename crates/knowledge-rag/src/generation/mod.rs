//! Grounded answer generation with citations

mod citation;
mod prompt;
mod synthesizer;

pub use citation::{extract_citations, source_tag, truncate_snippet};
pub use prompt::PromptBuilder;
pub use synthesizer::AnswerSynthesizer;
