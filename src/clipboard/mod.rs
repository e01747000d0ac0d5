//! Clipboard abstraction layer
//!
//! This module provides a platform-agnostic interface to the shared system
//! clipboard: a monotonically increasing change counter, a read of every
//! available representation, and a write of a full representation set.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::history::HistoryItemContent;

pub mod arboard;
pub mod filter;
pub mod memory;
pub mod monitor;

pub use self::arboard::ArboardClipboard;
pub use filter::IgnoreFilter;
pub use memory::MemoryClipboard;
pub use monitor::{ClipboardChange, ClipboardMonitor};

/// Maximum clipboard content size (50MB)
pub const MAX_CLIPBOARD_SIZE: usize = 50 * 1024 * 1024;

/// Everything the clipboard currently holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipboardSnapshot {
    /// Every available representation of the current payload
    pub contents: Vec<HistoryItemContent>,
    /// Application that owns the clipboard, when the platform tells
    pub application: Option<String>,
}

/// Clipboard provider trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// Counter that increases whenever the clipboard changes
    async fn change_count(&self) -> Result<u64, ClipboardError>;

    /// Read every representation of the current payload
    async fn read(&self) -> Result<ClipboardSnapshot, ClipboardError>;

    /// Replace the clipboard with the given representations
    async fn write(&self, contents: &[HistoryItemContent]) -> Result<(), ClipboardError>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// Unsupported content type
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    /// No content available
    #[error("No clipboard content available")]
    NoContent,

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Create a clipboard provider for the current platform
pub fn create_provider() -> Result<Arc<dyn ClipboardProvider>, ClipboardError> {
    Ok(Arc::new(ArboardClipboard::new()?))
}
