//! In-process clipboard
//!
//! Behaves like the system clipboard without touching it: every write bumps
//! the change counter. Used for headless runs and tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{ClipboardError, ClipboardProvider, ClipboardSnapshot};
use crate::history::HistoryItemContent;

#[derive(Debug, Default)]
struct State {
    change_count: u64,
    snapshot: ClipboardSnapshot,
}

/// Clipboard held in memory
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    state: Mutex<State>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a user copy from `application`
    pub fn copy(&self, contents: Vec<HistoryItemContent>, application: Option<&str>) {
        let mut state = self.lock();
        state.change_count += 1;
        state.snapshot = ClipboardSnapshot {
            contents,
            application: application.map(str::to_string),
        };
    }

    /// Simulate a plain text copy
    pub fn copy_text(&self, text: &str, application: Option<&str>) {
        self.copy(vec![HistoryItemContent::text(text)], application);
    }

    /// Current contents without going through the provider trait
    pub fn contents(&self) -> Vec<HistoryItemContent> {
        self.lock().snapshot.contents.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ClipboardProvider for MemoryClipboard {
    async fn change_count(&self) -> Result<u64, ClipboardError> {
        Ok(self.lock().change_count)
    }

    async fn read(&self) -> Result<ClipboardSnapshot, ClipboardError> {
        let state = self.lock();
        if state.snapshot.contents.is_empty() {
            return Err(ClipboardError::NoContent);
        }
        Ok(state.snapshot.clone())
    }

    async fn write(&self, contents: &[HistoryItemContent]) -> Result<(), ClipboardError> {
        let mut state = self.lock();
        state.change_count += 1;
        state.snapshot = ClipboardSnapshot {
            contents: contents.to_vec(),
            application: None,
        };
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
