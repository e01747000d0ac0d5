//! The clipboard history engine
//!
//! An [`Engine`] is constructed explicitly and shared behind an `Arc`. It
//! owns the single-writer [`HistoryStore`] together with the [`HistoryView`]
//! derived from it, the [`ClipboardMonitor`] and the provider used to restore
//! items. Detected clipboard changes are queued to the writer by a background
//! task; callers reach the same writer through the async methods here.
//!
//! [`Engine::subscribe`] is the outward signal: `HistoryEvent::Added` fires
//! once per newly recorded item.

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clipboard::{ClipboardChange, ClipboardMonitor, ClipboardProvider, IgnoreFilter};
use crate::config::Config;
use crate::history::{
    AddOutcome, HistoryDatabase, HistoryError, HistoryEvent, HistoryItem, HistoryStore, ItemId,
    Sorter, Storage, StoreOptions,
};
use crate::projection::{HistoryView, ItemSummary};
use crate::Result;

struct State {
    store: HistoryStore,
    events: broadcast::Receiver<HistoryEvent>,
    view: HistoryView,
}

impl State {
    /// Bring the view up to date with everything the store emitted
    fn sync_view(&mut self) {
        let mut events = Vec::new();
        let mut lagged = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("View missed {} history events, rebuilding", skipped);
                    lagged = true;
                }
                Err(_) => break,
            }
        }

        if lagged {
            self.view.refresh(self.store.items());
        } else if !events.is_empty() {
            self.view.apply(&events, self.store.items());
        }
    }
}

/// Clipboard history engine
pub struct Engine {
    config: Config,
    clipboard: Arc<dyn ClipboardProvider>,
    monitor: ClipboardMonitor,
    state: Mutex<State>,
    ingest: StdMutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine over the given clipboard and storage
    pub fn new(
        config: Config,
        clipboard: Arc<dyn ClipboardProvider>,
        storage: Box<dyn Storage>,
    ) -> Result<Self> {
        let store = HistoryStore::open(storage, StoreOptions::from_config(&config))?;
        let events = store.subscribe();
        let mut view = HistoryView::from_config(&config);
        view.refresh(store.items());

        let monitor = ClipboardMonitor::new(
            clipboard.clone(),
            IgnoreFilter::from_config(&config.clipboard),
            Duration::from_millis(config.clipboard.poll_interval_ms),
        );

        Ok(Self {
            config,
            clipboard,
            monitor,
            state: Mutex::new(State {
                store,
                events,
                view,
            }),
            ingest: StdMutex::new(None),
        })
    }

    /// Build an engine persisting to the configured database
    pub fn open(config: Config, clipboard: Arc<dyn ClipboardProvider>) -> Result<Self> {
        let database = HistoryDatabase::open(&config.history.database)?;
        Self::new(config, clipboard, Box::new(database))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn monitor(&self) -> &ClipboardMonitor {
        &self.monitor
    }

    /// Start watching the clipboard
    pub async fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }

        let mut changes = self.monitor.subscribe();
        self.monitor.start().await;

        let engine: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.ingest(change).await;
            }
        });
        *lock(&self.ingest) = Some(handle);
        info!("Clipboard history engine started");
    }

    /// Stop watching the clipboard. The history stays usable.
    pub fn stop(&self) {
        self.monitor.stop();
        if let Some(handle) = lock(&self.ingest).take() {
            handle.abort();
            info!("Clipboard history engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ingest)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Record one detected clipboard change
    pub async fn ingest(&self, change: ClipboardChange) -> AddOutcome {
        let mut candidate = HistoryItem::new(change.contents).with_modified(change.change_count);
        if let Some(application) = change.application {
            candidate = candidate.with_application(application);
        }
        self.add(candidate).await
    }

    /// Record a candidate, merging it into an equal or superseded item
    pub async fn add(&self, candidate: HistoryItem) -> AddOutcome {
        let mut state = self.state.lock().await;
        let outcome = state.store.add(candidate);
        state.sync_view();
        outcome
    }

    /// Put an item back on the clipboard and move it to the head.
    ///
    /// The write happens with the monitor's guard raised so the engine does
    /// not record its own write as a fresh copy.
    pub async fn select(&self, id: ItemId) -> Result<()> {
        let mut state = self.state.lock().await;
        let contents = state
            .store
            .get(id)
            .map(|item| item.contents.clone())
            .ok_or(HistoryError::NotFound(id))?;

        self.monitor.suppress();
        let written = self.clipboard.write(&contents).await;
        self.monitor
            .release_after(Duration::from_millis(self.config.clipboard.suppress_ms));
        written?;

        state.store.add(HistoryItem::new(contents).internal());
        state.sync_view();
        state.view.select(id);
        debug!("Restored item {} to the clipboard", id);
        Ok(())
    }

    /// Select the item answering to a shortcut character
    pub async fn select_shortcut(&self, key: char) -> Result<Option<ItemId>> {
        let id = self.state.lock().await.view.by_shortcut(key);
        match id {
            Some(id) => {
                self.select(id).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Pin with the first free character, or unpin
    pub async fn toggle_pin(&self, id: ItemId) -> Result<Option<char>> {
        let mut state = self.state.lock().await;
        let pin = state.store.toggle_pin(id);
        state.sync_view();
        Ok(pin?)
    }

    /// Pin with a chosen character
    pub async fn pin_with(&self, id: ItemId, pin: char) -> Result<()> {
        let mut state = self.state.lock().await;
        let result = state.store.pin_with(id, pin);
        state.sync_view();
        Ok(result?)
    }

    pub async fn delete(&self, id: ItemId) -> Result<HistoryItem> {
        let mut state = self.state.lock().await;
        let item = state.store.delete(id);
        state.sync_view();
        Ok(item?)
    }

    /// Remove every unpinned item
    pub async fn clear(&self) -> Vec<ItemId> {
        let mut state = self.state.lock().await;
        let ids = state.store.clear();
        state.sync_view();
        ids
    }

    /// Remove every item
    pub async fn clear_all(&self) -> Vec<ItemId> {
        let mut state = self.state.lock().await;
        let ids = state.store.clear_all();
        state.sync_view();
        ids
    }

    pub async fn set_sorter(&self, sorter: Sorter) {
        let mut state = self.state.lock().await;
        state.store.set_sorter(sorter);
        state.sync_view();
    }

    pub async fn set_max_items(&self, max_items: usize) {
        let mut state = self.state.lock().await;
        state.store.set_max_items(max_items);
        state.sync_view();
    }

    /// Re-derive titles with or without formatting characters
    pub async fn set_strip_formatting(&self, strip_formatting: bool) {
        let mut state = self.state.lock().await;
        state.store.regenerate_titles(strip_formatting);
        state.sync_view();
    }

    /// Change how often the clipboard is polled
    pub async fn set_poll_interval(&self, poll_interval: Duration) {
        if self.monitor.is_running() {
            self.monitor.restart(poll_interval).await;
        } else {
            self.monitor.set_poll_interval(poll_interval);
        }
    }

    /// Filter the view. Callers debounce keystrokes.
    pub async fn set_query(&self, query: &str) -> bool {
        let mut state = self.state.lock().await;
        let State { store, view, .. } = &mut *state;
        view.set_query(query, store.items())
    }

    /// Visible items in display order
    pub async fn snapshot(&self) -> Vec<ItemSummary> {
        self.state.lock().await.view.summaries()
    }

    /// Full history in display order, ignoring the query
    pub async fn items(&self) -> Vec<HistoryItem> {
        self.state.lock().await.store.items().to_vec()
    }

    pub async fn get(&self, id: ItemId) -> Option<HistoryItem> {
        self.state.lock().await.store.get(id).cloned()
    }

    pub async fn selected(&self) -> Option<ItemId> {
        self.state.lock().await.view.selected().map(|p| p.id())
    }

    /// Start rendering previews for an image item
    pub async fn request_previews(&self, id: ItemId) -> bool {
        let mut state = self.state.lock().await;
        let State { store, view, .. } = &mut *state;
        match store.get(id) {
            Some(item) => view.request_previews(item),
            None => false,
        }
    }

    /// Attach finished previews, returning the items that gained them
    pub async fn collect_previews(&self) -> Vec<ItemId> {
        self.state.lock().await.view.collect_previews()
    }

    /// Thumbnail PNG of an item, once rendered
    pub async fn thumbnail(&self, id: ItemId) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .view
            .get(id)
            .and_then(|p| p.thumbnail())
            .map(|p| p.bytes.clone())
    }

    /// Receive history change notifications
    pub async fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.state.lock().await.store.subscribe()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.ingest).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
