//! Text extraction for the supported media types
//!
//! Every extractor returns normalized text: `\n` line endings, no NUL
//! characters. PDFs keep a `--- Page N ---` marker line ahead of each page and
//! record where each page starts so chunks can carry page numbers.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html};

use crate::error::{Error, Result};
use crate::types::{ExtractedText, MediaType, PageMarker};

/// Elements whose content never reaches the extracted text
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template", "svg"];

/// Elements that start and end on their own line
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "tbody", "thead", "tfoot", "tr",
    "td", "th", "ul", "body", "html",
];

/// Stateless extractor, cheap to clone into blocking tasks
#[derive(Debug, Clone)]
pub struct Extractor {
    max_input_bytes: usize,
}

impl Extractor {
    pub fn new(max_input_bytes: usize) -> Self {
        Self { max_input_bytes }
    }

    /// Extract plain text from raw bytes of the given media type
    pub fn extract(&self, data: &[u8], media_type: MediaType) -> Result<ExtractedText> {
        if data.len() > self.max_input_bytes {
            return Err(Error::PayloadTooLarge {
                limit: self.max_input_bytes,
            });
        }

        match media_type {
            MediaType::Pdf => extract_pdf(data),
            MediaType::PlainText => Ok(ExtractedText::plain(normalize(&decode_utf8(data)?))),
            MediaType::Markdown => Ok(ExtractedText::plain(markdown_to_text(&decode_utf8(data)?))),
            MediaType::Html => Ok(ExtractedText::plain(html_to_text(&decode_utf8(data)?))),
        }
    }
}

/// Strict UTF-8 decode; a leading byte-order mark is dropped
fn decode_utf8(data: &[u8]) -> Result<String> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    String::from_utf8(data.to_vec()).map_err(|e| {
        Error::extraction(format!(
            "text is not valid UTF-8 (invalid byte at offset {}); encoding not supported, use UTF-8",
            e.utf8_error().valid_up_to()
        ))
    })
}

/// Line endings to `\n`, NUL removed
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\0', "")
}

/// Common PDF font artifacts that break tokenization
fn cleanup_pdf_text(text: &str) -> String {
    text.replace('\u{00A0}', " ")
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
}

fn tidy_page(text: &str) -> String {
    normalize(&cleanup_pdf_text(text))
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn extract_pdf(data: &[u8]) -> Result<ExtractedText> {
    let pages = match lopdf::Document::load_mem(data) {
        Ok(doc) => {
            if doc.is_encrypted() {
                return Err(Error::extraction("PDF is encrypted"));
            }
            let mut pages = Vec::new();
            for page_number in doc.get_pages().keys() {
                match doc.extract_text(&[*page_number]) {
                    Ok(text) => pages.push((*page_number, tidy_page(&text))),
                    Err(e) => {
                        tracing::debug!("Could not extract text from page {}: {}", page_number, e)
                    }
                }
            }
            pages
        }
        Err(e) => {
            tracing::debug!("lopdf could not load PDF: {}", e);
            Vec::new()
        }
    };

    let pages = if pages.iter().all(|(_, text)| text.is_empty()) {
        extract_pdf_fallback(data)?
    } else {
        pages
    };

    let extracted = assemble_pages(pages);
    if extracted.is_blank() {
        tracing::warn!("PDF produced no text, it may be image-based");
        return Err(Error::extraction(
            "PDF has no extractable text (it may be scanned or image-based)",
        ));
    }
    Ok(extracted)
}

/// Whole-document extraction; pages are split on form feeds when present
fn extract_pdf_fallback(data: &[u8]) -> Result<Vec<(u32, String)>> {
    let text = pdf_extract::extract_text_from_mem(data)
        .map_err(|e| Error::extraction(format!("Failed to read PDF: {}", e)))?;

    Ok(text
        .split('\u{000C}')
        .enumerate()
        .map(|(i, page)| (i as u32 + 1, tidy_page(page)))
        .collect())
}

/// Join page texts with marker lines, skipping empty pages
fn assemble_pages(pages: Vec<(u32, String)>) -> ExtractedText {
    let mut text = String::new();
    let mut markers = Vec::new();
    let mut offset = 0usize;

    for (page_number, content) in pages {
        if content.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
            offset += 2;
        }
        markers.push(PageMarker {
            page_number,
            char_offset: offset,
        });
        let block = format!("--- Page {} ---\n{}", page_number, content);
        offset += block.chars().count();
        text.push_str(&block);
    }

    ExtractedText {
        text,
        pages: markers,
    }
}

fn markdown_to_text(source: &str) -> String {
    let source = normalize(source);
    let mut out = String::new();

    for event in Parser::new(&source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => {
                ensure_line_break(&mut out);
                out.push_str("- ");
            }
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading { .. }
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote { .. }
                | TagEnd::List { .. }
                | TagEnd::Table,
            ) => ensure_blank_line(&mut out),
            Event::End(TagEnd::Item | TagEnd::TableRow | TagEnd::TableHead) => {
                ensure_line_break(&mut out)
            }
            Event::End(TagEnd::TableCell) => out.push(' '),
            Event::Rule => ensure_blank_line(&mut out),
            _ => {}
        }
    }

    collapse_blank_lines(&out)
}

fn html_to_text(source: &str) -> String {
    let document = Html::parse_document(source);
    let mut out = String::new();
    walk_html(document.root_element(), &mut out);
    collapse_blank_lines(&normalize(&out))
}

fn walk_html(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            push_inline_text(out, text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }
            if name == "br" {
                out.push('\n');
                continue;
            }
            let is_block = BLOCK_ELEMENTS.contains(&name);
            if is_block {
                ensure_line_break(out);
            }
            walk_html(child_element, out);
            if is_block {
                ensure_line_break(out);
            }
        }
    }
}

/// Collapse whitespace inside a text node, keeping a single separating space
fn push_inline_text(out: &mut String, text: &str) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        if !text.is_empty() && !out.is_empty() && !out.ends_with(char::is_whitespace) {
            out.push(' ');
        }
        return;
    }
    if text.starts_with(char::is_whitespace) && !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&words.join(" "));
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn ensure_line_break(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn ensure_blank_line(out: &mut String) {
    ensure_line_break(out);
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

/// Trim every line and keep at most one blank line between blocks
fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
