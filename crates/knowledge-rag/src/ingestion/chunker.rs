//! Text chunking with position and page tracking
//!
//! Offsets are character (not byte) positions into the extracted text, and
//! every chunk's content is exactly `text[char_start..char_end]`.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};
use crate::types::{Chunk, Document, ExtractedText, TextSpan};

/// Text chunker with configurable size and overlap
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Maximum chunk length in characters
    max_chunk_size: usize,
    /// Characters shared by consecutive chunks
    overlap: usize,
}

/// Candidate cut points, as sorted character offsets
struct Boundaries {
    sentences: Vec<usize>,
    paragraphs: Vec<usize>,
    words: Vec<usize>,
}

impl TextChunker {
    /// Create a new chunker; overlap must be smaller than the chunk size
    pub fn new(max_chunk_size: usize, overlap: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if overlap >= max_chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size,
            overlap,
        })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split text into overlapping spans.
    ///
    /// Cuts prefer a paragraph break in the back half of the window, then the
    /// furthest sentence boundary, then the furthest word boundary, and fall
    /// back to a hard cut at the window edge. Each next span starts exactly
    /// `overlap` characters before the previous one ends.
    pub fn split(&self, text: &str) -> Result<Vec<TextSpan>> {
        if text.trim().is_empty() {
            return Err(Error::EmptyDocument);
        }

        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let boundaries = Boundaries::find(text, &chars);

        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            let window_end = (start + self.max_chunk_size).min(len);
            let end = if window_end == len {
                len
            } else {
                self.pick_cut(start, window_end, &boundaries)
            };

            spans.push(TextSpan {
                ordinal: spans.len() as u32,
                char_start: start,
                char_end: end,
                text: chars[start..end].iter().collect(),
            });

            if end == len {
                break;
            }
            start = end - self.overlap;
        }

        Ok(spans)
    }

    /// Chunk a document's extracted text, attaching page numbers when known
    pub fn chunk_document(&self, doc: &Document, extracted: &ExtractedText) -> Result<Vec<Chunk>> {
        let spans = self.split(&extracted.text)?;
        let chunks: Vec<Chunk> = spans
            .into_iter()
            .map(|span| {
                let page = extracted.page_at(span.char_start);
                Chunk::from_span(doc, span, page)
            })
            .collect();

        tracing::debug!(
            "Split '{}' into {} chunks (max {}, overlap {})",
            doc.filename,
            chunks.len(),
            self.max_chunk_size,
            self.overlap
        );
        Ok(chunks)
    }

    /// Furthest acceptable cut in `(start + overlap, window_end]`
    fn pick_cut(&self, start: usize, window_end: usize, boundaries: &Boundaries) -> usize {
        let min_end = start + self.overlap + 1;
        let paragraph_floor = (start + self.max_chunk_size / 2).max(min_end);

        furthest_in(&boundaries.paragraphs, paragraph_floor, window_end)
            .or_else(|| furthest_in(&boundaries.sentences, min_end, window_end))
            .or_else(|| furthest_in(&boundaries.words, min_end, window_end))
            .unwrap_or(window_end)
    }
}

impl Boundaries {
    fn find(text: &str, chars: &[char]) -> Self {
        let mut sentences = Vec::new();
        let mut offset = 0usize;
        for sentence in text.split_sentence_bounds() {
            offset += sentence.chars().count();
            sentences.push(offset);
        }

        let mut paragraphs = Vec::new();
        let mut words = Vec::new();
        for i in 1..chars.len() {
            if chars[i - 1].is_whitespace() && !chars[i].is_whitespace() {
                words.push(i);
                if i >= 2 && chars[i - 1] == '\n' && chars[i - 2] == '\n' {
                    paragraphs.push(i);
                }
            }
        }

        Self {
            sentences,
            paragraphs,
            words,
        }
    }
}

/// Largest value in sorted `points` within `[lo, hi]`
fn furthest_in(points: &[usize], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    let idx = points.partition_point(|&p| p <= hi);
    if idx == 0 {
        return None;
    }
    let candidate = points[idx - 1];
    (candidate >= lo).then_some(candidate)
}
