//! Document and chunk types with source tracking for citations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Media types the extractor understands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Pdf,
    PlainText,
    Markdown,
    Html,
}

impl MediaType {
    /// Parse a declared MIME type; parameters such as `charset` are ignored
    pub fn from_mime(mime: &str) -> Result<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" => Ok(Self::Pdf),
            "text/plain" => Ok(Self::PlainText),
            "text/markdown" | "text/x-markdown" => Ok(Self::Markdown),
            "text/html" | "application/xhtml+xml" => Ok(Self::Html),
            _ => Err(Error::UnsupportedMediaType(mime.trim().to_string())),
        }
    }

    /// Guess from the filename extension
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        // mime_guess has no entry for a few common markdown extensions
        if matches!(ext.as_deref(), Some("md" | "markdown" | "mdown")) {
            return Ok(Self::Markdown);
        }

        match mime_guess::from_path(filename).first() {
            Some(mime) => Self::from_mime(mime.essence_str()),
            None => Err(Error::UnsupportedMediaType(format!(
                "cannot determine type of '{}'",
                filename
            ))),
        }
    }

    /// Resolve the media type of an upload: a declared type wins unless it is
    /// missing or the generic `application/octet-stream`
    pub fn resolve(declared: Option<&str>, filename: &str) -> Result<Self> {
        match declared.map(str::trim) {
            Some(mime) if !mime.is_empty() && !mime.starts_with("application/octet-stream") => {
                Self::from_mime(mime)
            }
            _ => Self::from_filename(filename),
        }
    }

    /// Canonical MIME string
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::PlainText => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Html => "text/html",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// Ingestion lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(Error::internal(format!("unknown document status '{}'", other))),
        }
    }
}

/// Progress of a user-requested deletion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeletionState {
    #[default]
    None,
    /// Deletion in progress; hidden from queries
    Deleting,
    /// Index cleanup failed; hidden and awaiting another sweep
    Incomplete,
}

impl DeletionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deleting => "deleting",
            Self::Incomplete => "incomplete",
        }
    }
}

impl FromStr for DeletionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "deleting" => Ok(Self::Deleting),
            "incomplete" => Ok(Self::Incomplete),
            other => Err(Error::internal(format!("unknown deletion state '{}'", other))),
        }
    }
}

/// An uploaded document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub id: Uuid,
    /// Owner identity asserted by the auth layer
    pub owner_id: String,
    /// Original filename as uploaded by user
    pub filename: String,
    pub media_type: MediaType,
    /// File size in bytes
    pub size_bytes: u64,
    /// Blob store location of the raw bytes
    pub storage_location: String,
    /// SHA-256 of the raw bytes
    pub content_hash: String,
    pub status: DocumentStatus,
    /// Machine-readable failure code (when failed)
    pub failure_code: Option<String>,
    /// Human-readable failure reason (when failed)
    pub failure_reason: Option<String>,
    pub chunk_count: u32,
    pub deletion_state: DeletionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new pending document
    pub fn new(
        owner_id: impl Into<String>,
        filename: impl Into<String>,
        media_type: MediaType,
        size_bytes: u64,
        content_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            filename: filename.into(),
            media_type,
            size_bytes,
            storage_location: String::new(),
            content_hash,
            status: DocumentStatus::Pending,
            failure_code: None,
            failure_reason: None,
            chunk_count: 0,
            deletion_state: DeletionState::None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Visible to retrieval
    pub fn is_searchable(&self) -> bool {
        self.status == DocumentStatus::Ready && self.deletion_state == DeletionState::None
    }
}

/// Start of a PDF page within extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMarker {
    /// 1-based page number
    pub page_number: u32,
    /// Character offset where the page's marker line begins
    pub char_offset: usize,
}

/// Normalized text produced by the extractor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    /// Page starts in ascending offset order (PDF only)
    pub pages: Vec<PageMarker>,
}

impl ExtractedText {
    pub fn plain(text: String) -> Self {
        Self {
            text,
            pages: Vec::new(),
        }
    }

    /// Page containing the given character offset
    pub fn page_at(&self, char_offset: usize) -> Option<u32> {
        let idx = self.pages.partition_point(|p| p.char_offset <= char_offset);
        if idx == 0 {
            self.pages.first().map(|p| p.page_number)
        } else {
            Some(self.pages[idx - 1].page_number)
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A chunk's position and text before it is attached to a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub ordinal: u32,
    /// Inclusive start, in characters
    pub char_start: usize,
    /// Exclusive end, in characters
    pub char_end: usize,
    pub text: String,
}

/// A chunk of text from a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique chunk ID
    pub id: Uuid,
    /// Parent document ID
    pub document_id: Uuid,
    /// Denormalized for index filtering
    pub owner_id: String,
    /// Position within the document, contiguous from 0
    pub ordinal: u32,
    /// Character range `[char_start, char_end)` in the extracted text
    pub char_start: usize,
    pub char_end: usize,
    /// Text content
    pub content: String,
    pub char_count: usize,
    /// Page of the chunk start (PDF only)
    pub page_number: Option<u32>,
}

impl Chunk {
    /// Build a chunk for `document` from a span of its extracted text
    pub fn from_span(document: &Document, span: TextSpan, page_number: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: document.id,
            owner_id: document.owner_id.clone(),
            ordinal: span.ordinal,
            char_start: span.char_start,
            char_end: span.char_end,
            char_count: span.char_end - span.char_start,
            content: span.text,
            page_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_mime() {
        assert_eq!(MediaType::from_mime("application/pdf").unwrap(), MediaType::Pdf);
        assert_eq!(
            MediaType::from_mime("text/plain; charset=utf-8").unwrap(),
            MediaType::PlainText
        );
        assert_eq!(MediaType::from_mime("TEXT/X-MARKDOWN").unwrap(), MediaType::Markdown);
        assert_eq!(
            MediaType::from_mime("application/xhtml+xml").unwrap(),
            MediaType::Html
        );
        assert!(matches!(
            MediaType::from_mime("image/png"),
            Err(Error::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_media_type_from_filename() {
        assert_eq!(MediaType::from_filename("notes.md").unwrap(), MediaType::Markdown);
        assert_eq!(MediaType::from_filename("report.PDF").unwrap(), MediaType::Pdf);
        assert_eq!(MediaType::from_filename("page.html").unwrap(), MediaType::Html);
        assert_eq!(MediaType::from_filename("a.txt").unwrap(), MediaType::PlainText);
        assert!(MediaType::from_filename("photo.jpg").is_err());
        assert!(MediaType::from_filename("no_extension").is_err());
    }

    #[test]
    fn test_media_type_resolve() {
        assert_eq!(
            MediaType::resolve(Some("application/octet-stream"), "a.md").unwrap(),
            MediaType::Markdown
        );
        assert_eq!(
            MediaType::resolve(Some("text/plain"), "a.md").unwrap(),
            MediaType::PlainText
        );
        assert_eq!(MediaType::resolve(None, "a.html").unwrap(), MediaType::Html);
        assert!(MediaType::resolve(Some("application/zip"), "a.txt").is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("done".parse::<DocumentStatus>().is_err());
        assert_eq!(
            "incomplete".parse::<DeletionState>().unwrap(),
            DeletionState::Incomplete
        );
    }

    #[test]
    fn test_page_at() {
        let extracted = ExtractedText {
            text: String::new(),
            pages: vec![
                PageMarker { page_number: 1, char_offset: 0 },
                PageMarker { page_number: 3, char_offset: 100 },
            ],
        };
        assert_eq!(extracted.page_at(0), Some(1));
        assert_eq!(extracted.page_at(99), Some(1));
        assert_eq!(extracted.page_at(100), Some(3));
        assert_eq!(ExtractedText::plain("x".into()).page_at(0), None);
    }

    #[test]
    fn test_new_document_is_pending() {
        let doc = Document::new("alice", "a.txt", MediaType::PlainText, 3, "abc".into());
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.deletion_state, DeletionState::None);
        assert!(!doc.is_searchable());
    }
}
