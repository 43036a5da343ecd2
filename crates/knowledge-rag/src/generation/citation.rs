//! Citation extraction and linking
//!
//! Sources are offered to the model as `[S1]`, `[S2]`, ... and the answer
//! cites them with the same tags, alone or grouped as `[S1, S3]`. Only tags
//! that name a supplied source become citations; anything else is removed
//! from the answer text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::types::{Citation, QueryResult};

/// Characters of chunk text kept in a citation excerpt
const EXCERPT_CHARS: usize = 300;

static TAG_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([ \t]*)\[\s*(S\d+(?:\s*,\s*S\d+)*)\s*\]").expect("Invalid regex")
});

/// Tag for the source at zero-based position `index`
pub fn source_tag(index: usize) -> String {
    format!("S{}", index + 1)
}

/// Resolve citation tags in `answer` against the supplied sources.
///
/// Returns the cleaned answer and its citations in order of first
/// reference, without duplicates.
pub fn extract_citations(answer: &str, sources: &QueryResult) -> (String, Vec<Citation>) {
    let mut cited: Vec<usize> = Vec::new();

    let cleaned = TAG_GROUP.replace_all(answer, |caps: &Captures<'_>| {
        let valid: Vec<usize> = caps[2]
            .split(',')
            .filter_map(|tag| parse_tag(tag, sources.len()))
            .collect();

        if valid.is_empty() {
            return String::new();
        }

        let mut tags = Vec::with_capacity(valid.len());
        for index in valid {
            if !cited.contains(&index) {
                cited.push(index);
            }
            let tag = source_tag(index);
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        format!("{}[{}]", &caps[1], tags.join(", "))
    });

    let citations = cited
        .into_iter()
        .map(|index| {
            let scored = &sources.chunks[index];
            Citation {
                tag: source_tag(index),
                document_id: scored.chunk.document_id,
                chunk_id: scored.chunk.id,
                filename: scored.filename.clone(),
                char_start: scored.chunk.char_start,
                char_end: scored.chunk.char_end,
                page_number: scored.chunk.page_number,
                score: scored.score,
                excerpt: truncate_snippet(&scored.chunk.content, EXCERPT_CHARS),
            }
        })
        .collect();

    (cleaned.trim().to_string(), citations)
}

/// `S3` → `Some(2)` when three or more sources were supplied
fn parse_tag(tag: &str, available: usize) -> Option<usize> {
    let number: usize = tag.trim().get(1..)?.parse().ok()?;
    (1..=available).contains(&number).then(|| number - 1)
}

/// Truncate snippet to at most `max_chars` characters, preferring a word boundary
pub fn truncate_snippet(snippet: &str, max_chars: usize) -> String {
    let snippet = snippet.trim();
    if snippet.chars().count() <= max_chars {
        return snippet.to_string();
    }

    let end = snippet
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(snippet.len());
    let head = &snippet[..end];

    match head.rfind(' ') {
        Some(pos) if pos > 0 => format!("{}...", &head[..pos]),
        _ => format!("{}...", head),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Document, MediaType, ScoredChunk, TextSpan};

    fn sources(n: usize) -> QueryResult {
        let doc = Document::new("alice", "notes.md", MediaType::Markdown, 1, "h".into());
        let chunks = (0..n)
            .map(|i| {
                let text = format!("source number {}", i + 1);
                ScoredChunk {
                    chunk: Chunk::from_span(
                        &doc,
                        TextSpan {
                            ordinal: i as u32,
                            char_start: i * 10,
                            char_end: i * 10 + text.len(),
                            text,
                        },
                        None,
                    ),
                    filename: "notes.md".into(),
                    score: 1.0 - i as f32 * 0.1,
                }
            })
            .collect();
        QueryResult::new(chunks)
    }

    #[test]
    fn test_single_and_grouped_tags() {
        let sources = sources(3);
        let (text, citations) =
            extract_citations("Alpha [S2]. Beta [S1, S3]. Again [S2].", &sources);

        assert_eq!(text, "Alpha [S2]. Beta [S1, S3]. Again [S2].");
        let tags: Vec<&str> = citations.iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, vec!["S2", "S1", "S3"]);
        assert_eq!(citations[0].chunk_id, sources.chunks[1].chunk.id);
        assert_eq!(citations[0].char_start, 10);
    }

    #[test]
    fn test_unknown_tags_removed() {
        let sources = sources(2);
        let (text, citations) = extract_citations("Made up [S7]. Mixed [S9, S1].", &sources);

        assert_eq!(text, "Made up. Mixed [S1].");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].tag, "S1");
    }

    #[test]
    fn test_no_sources_means_no_citations() {
        let (text, citations) = extract_citations("Claim [S1].", &QueryResult::default());
        assert_eq!(text, "Claim.");
        assert!(citations.is_empty());
    }

    #[test]
    fn test_tag_variants() {
        let sources = sources(2);
        let (text, citations) = extract_citations("x [ s2 ] y [S1,S1]", &sources);
        assert_eq!(text, "x [S2] y [S1]");
        assert_eq!(citations.len(), 2);
    }

    #[test]
    fn test_other_brackets_untouched() {
        let sources = sources(1);
        let (text, citations) = extract_citations("See [1] and [Source A].", &sources);
        assert_eq!(text, "See [1] and [Source A].");
        assert!(citations.is_empty());
    }

    #[test]
    fn test_truncate_snippet() {
        let snippet = "This is a very long snippet that needs to be truncated.";
        let truncated = truncate_snippet(snippet, 20);
        assert_eq!(truncated, "This is a very long...");
        assert_eq!(truncate_snippet("short", 20), "short");
        assert_eq!(truncate_snippet("ééééé", 3), "ééé...");
    }
}
