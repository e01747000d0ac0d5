//! # ClipKeep
//!
//! Clipboard history engine: watches the shared clipboard, records every
//! distinct copy with all of its representations, and serves the history
//! back ordered, searchable and pinnable.
//!
//! The pieces are usable on their own. [`history`] holds the entity model,
//! the single-writer store and its SQLite persistence, [`clipboard`] the
//! provider abstraction and change monitor, [`projection`] the display view,
//! and [`engine::Engine`] wires them together.

pub mod cli;
pub mod clipboard;
pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod engine;
pub mod history;
pub mod projection;

pub use config::Config;
pub use engine::Engine;

/// Result type alias for ClipKeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipKeep operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// History store or database error
    #[error("History error: {0}")]
    History(#[from] history::HistoryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
