//! Clipboard history entities and the modules that maintain them
//!
//! A [`HistoryItem`] is one logical clipboard entry. It carries one or more
//! [`HistoryItemContent`] representations of the same copy (plain text, rich
//! text, an image...) which are restored to the clipboard together.

pub mod database;
pub mod merge;
pub mod search;
pub mod shortcuts;
pub mod sorter;
pub mod store;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use database::{HistoryDatabase, Storage};
pub use merge::MergePolicy;
pub use search::{search, SearchMatch};
pub use shortcuts::ShortcutAssigner;
pub use sorter::{PinPosition, SortBy, Sorter};
pub use store::{AddOutcome, HistoryEvent, HistoryStore, StoreOptions};

/// Stable identity of a history item. Survives merges.
pub type ItemId = Uuid;

/// History errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (also raised by payload compression)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored payload does not match its checksum
    #[error("Checksum mismatch for item {0}")]
    Checksum(String),

    /// A persisted row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Pin character already used by another item
    #[error("Pin '{0}' is already assigned to another item")]
    PinTaken(char),

    /// Pin character outside of the configured pool
    #[error("'{0}' is not an allowed pin character")]
    InvalidPin(char),

    /// Every pin character is in use
    #[error("No free pin character left")]
    NoFreePin,

    /// Unknown item
    #[error("Item not found: {0}")]
    NotFound(ItemId),
}

/// Type tag of a clipboard representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// UTF-8 plain text
    PlainText,
    /// RTF document
    RichText,
    /// HTML fragment
    Html,
    /// Encoded image (PNG)
    Image,
    /// Newline separated list of file URLs
    FileUrl,
    /// Any other MIME type
    Other(String),
}

impl ContentType {
    /// MIME type used in storage and on the clipboard
    pub fn as_mime(&self) -> &str {
        match self {
            ContentType::PlainText => "text/plain",
            ContentType::RichText => "text/rtf",
            ContentType::Html => "text/html",
            ContentType::Image => "image/png",
            ContentType::FileUrl => "text/uri-list",
            ContentType::Other(mime) => mime,
        }
    }

    /// Parse a MIME type; unknown types are kept verbatim
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "text/plain" => ContentType::PlainText,
            "text/rtf" => ContentType::RichText,
            "text/html" => ContentType::Html,
            "image/png" => ContentType::Image,
            "text/uri-list" => ContentType::FileUrl,
            other => ContentType::Other(other.to_string()),
        }
    }

    /// Whether the payload is textual (blank checks trim whitespace)
    pub fn is_textual(&self) -> bool {
        match self {
            ContentType::Image => false,
            ContentType::Other(mime) => mime.starts_with("text/"),
            _ => true,
        }
    }
}

/// One typed representation of a copied payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HistoryItemContent {
    /// Representation type
    pub content_type: ContentType,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl HistoryItemContent {
    pub fn new(content_type: ContentType, payload: Vec<u8>) -> Self {
        Self {
            content_type,
            payload,
        }
    }

    /// Plain text representation
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ContentType::PlainText, text.into().into_bytes())
    }

    /// RTF representation
    pub fn rich_text(data: Vec<u8>) -> Self {
        Self::new(ContentType::RichText, data)
    }

    /// HTML representation
    pub fn html(html: impl Into<String>) -> Self {
        Self::new(ContentType::Html, html.into().into_bytes())
    }

    /// PNG image representation
    pub fn image(png: Vec<u8>) -> Self {
        Self::new(ContentType::Image, png)
    }

    /// File reference representation, one URL per line
    pub fn file_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = urls
            .into_iter()
            .map(|u| u.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(ContentType::FileUrl, joined.into_bytes())
    }

    /// Payload as text for textual representations
    pub fn as_text(&self) -> Option<&str> {
        if self.content_type.is_textual() {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }

    /// Empty payload, or whitespace-only for text
    pub fn is_blank(&self) -> bool {
        if self.content_type.is_textual() {
            String::from_utf8_lossy(&self.payload).trim().is_empty()
        } else {
            self.payload.is_empty()
        }
    }

    /// Size of the payload in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// One logical clipboard entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Stable identity
    pub id: ItemId,
    /// All representations of the copy, in clipboard order
    pub contents: Vec<HistoryItemContent>,
    /// Display text derived from the contents
    pub title: String,
    pub first_copied_at: DateTime<Utc>,
    pub last_copied_at: DateTime<Utc>,
    /// How many copies were merged into this item
    pub number_of_copies: u32,
    /// Pin character, unique across the history
    pub pin: Option<char>,
    /// Label of the application the copy came from
    pub application: Option<String>,
    /// Produced by the engine's collaborators (OCR, capture) rather than a user copy
    pub internal: bool,
    /// Clipboard change counter that produced this item
    pub modified: Option<u64>,
}

impl HistoryItem {
    /// Candidate item copied now
    pub fn new(contents: Vec<HistoryItemContent>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            contents,
            title: String::new(),
            first_copied_at: now,
            last_copied_at: now,
            number_of_copies: 1,
            pin: None,
            application: None,
            internal: false,
            modified: None,
        }
    }

    /// Candidate holding a single plain text representation
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![HistoryItemContent::text(text)])
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    /// Mark the candidate as generated by the engine's collaborators
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn with_modified(mut self, change_count: u64) -> Self {
        self.modified = Some(change_count);
        self
    }

    pub fn copied_at(mut self, at: DateTime<Utc>) -> Self {
        self.first_copied_at = at;
        self.last_copied_at = at;
        self
    }

    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }

    /// True when every representation is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.contents.iter().all(HistoryItemContent::is_blank)
    }

    /// First representation of the given type
    pub fn content(&self, content_type: &ContentType) -> Option<&HistoryItemContent> {
        self.contents.iter().find(|c| &c.content_type == content_type)
    }

    /// Plain text of the item, if it has any
    pub fn text(&self) -> Option<&str> {
        self.content(&ContentType::PlainText)
            .and_then(HistoryItemContent::as_text)
    }

    /// Image payload, if the item holds one
    pub fn image(&self) -> Option<&[u8]> {
        self.content(&ContentType::Image).map(|c| c.payload.as_slice())
    }
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static RTF_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?|\\[^a-zA-Z]|[{}]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Derive the display title of a content list
///
/// Plain text wins over HTML, which wins over RTF. Files are shown by name,
/// images by a fixed label. With `strip_formatting` control characters are
/// dropped and whitespace runs collapse to one space. Titles are cut at
/// `max_length` characters.
pub fn make_title(contents: &[HistoryItemContent], strip_formatting: bool, max_length: usize) -> String {
    let raw = title_source(contents);
    let text = if strip_formatting {
        let cleaned: String = raw
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        WHITESPACE.replace_all(cleaned.trim(), " ").into_owned()
    } else {
        raw.trim().to_string()
    };

    if text.chars().count() > max_length {
        let mut cut: String = text.chars().take(max_length).collect();
        cut.push('…');
        cut
    } else {
        text
    }
}

fn title_source(contents: &[HistoryItemContent]) -> String {
    let find = |t: ContentType| contents.iter().find(|c| c.content_type == t);

    if let Some(text) = find(ContentType::PlainText).and_then(|c| c.as_text()) {
        return text.to_string();
    }
    if let Some(html) = find(ContentType::Html).and_then(|c| c.as_text()) {
        return HTML_TAG.replace_all(html, "").into_owned();
    }
    if let Some(rtf) = find(ContentType::RichText).and_then(|c| c.as_text()) {
        return RTF_CONTROL.replace_all(rtf, "").into_owned();
    }
    if let Some(files) = find(ContentType::FileUrl).and_then(|c| c.as_text()) {
        return files
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                let path = l.trim().trim_start_matches("file://");
                path.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(path)
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join(", ");
    }
    if find(ContentType::Image).is_some() {
        return "Image".to_string();
    }
    contents
        .first()
        .map(|c| format!("[{}]", c.content_type.as_mime()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_detection() {
        assert!(HistoryItem::from_text("   \n\t").is_blank());
        assert!(HistoryItem::new(vec![HistoryItemContent::image(vec![])]).is_blank());
        assert!(!HistoryItem::from_text(" x ").is_blank());
        assert!(!HistoryItem::new(vec![
            HistoryItemContent::text(" "),
            HistoryItemContent::image(vec![1, 2, 3]),
        ])
        .is_blank());
    }

    #[test]
    fn test_mime_mapping() {
        for t in [
            ContentType::PlainText,
            ContentType::RichText,
            ContentType::Html,
            ContentType::Image,
            ContentType::FileUrl,
        ] {
            assert_eq!(ContentType::from_mime(t.as_mime()), t);
        }
        assert_eq!(
            ContentType::from_mime("application/x-custom"),
            ContentType::Other("application/x-custom".to_string())
        );
    }

    #[test]
    fn test_title_strips_formatting() {
        let contents = vec![HistoryItemContent::text("  hello\n\n\tworld  ")];
        assert_eq!(make_title(&contents, true, 200), "hello world");
        assert_eq!(make_title(&contents, false, 200), "hello\n\n\tworld");
    }

    #[test]
    fn test_title_truncates() {
        let contents = vec![HistoryItemContent::text("abcdefghij")];
        assert_eq!(make_title(&contents, true, 4), "abcd…");
    }

    #[test]
    fn test_title_prefers_plain_text() {
        let contents = vec![
            HistoryItemContent::html("<b>bold</b>"),
            HistoryItemContent::text("plain"),
        ];
        assert_eq!(make_title(&contents, true, 200), "plain");

        let html_only = vec![HistoryItemContent::html("<p>Hi <b>there</b></p>")];
        assert_eq!(make_title(&html_only, true, 200), "Hi there");
    }

    #[test]
    fn test_title_for_files_and_images() {
        let files = vec![HistoryItemContent::file_urls([
            "file:///home/me/report.pdf",
            "file:///home/me/photos/",
        ])];
        assert_eq!(make_title(&files, true, 200), "report.pdf, photos");

        let image = vec![HistoryItemContent::image(vec![0x89, 0x50])];
        assert_eq!(make_title(&image, true, 200), "Image");
    }
}
