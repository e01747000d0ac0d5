//! Display-facing view of the history
//!
//! [`HistoryView`] mirrors the store into one [`ItemProjection`] per item and
//! layers the presentation state on top: the search query and the visible
//! subset, highlight ranges, the selection, shortcuts and image previews.
//!
//! The view only ever moves in one direction. Store events carry the new
//! value of a field, the projection compares it with what it already holds
//! and writes only on a difference. Nothing in a setter notifies anyone, so
//! a write can never come back around as another change.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::history::{search, HistoryEvent, HistoryItem, ItemId, ShortcutAssigner};

mod thumbnail;

pub use thumbnail::{Preview, PreviewPair, ThumbnailGenerator};

/// View model of one history item
#[derive(Debug)]
pub struct ItemProjection {
    id: ItemId,
    title: String,
    pin: Option<char>,
    highlights: Vec<Range<usize>>,
    selected: bool,
    shortcut: Option<char>,
    has_image: bool,
    previews: Option<Arc<PreviewPair>>,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl ItemProjection {
    fn new(item: &HistoryItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            pin: item.pin,
            highlights: Vec::new(),
            selected: false,
            shortcut: item.pin,
            has_image: item.image().is_some(),
            previews: None,
            task: None,
            generation: 0,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn pin(&self) -> Option<char> {
        self.pin
    }

    /// Character ranges of the title matched by the current query
    pub fn highlights(&self) -> &[Range<usize>] {
        &self.highlights
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn shortcut(&self) -> Option<char> {
        self.shortcut
    }

    pub fn has_image(&self) -> bool {
        self.has_image
    }

    pub fn thumbnail(&self) -> Option<&Preview> {
        self.previews.as_ref().map(|p| &p.thumbnail)
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.previews.as_ref().map(|p| &p.preview)
    }

    /// A preview render is in flight
    pub fn is_rendering(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Plain data copy for callers outside the view
    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            id: self.id,
            title: self.title.clone(),
            pin: self.pin,
            shortcut: self.shortcut,
            highlights: self.highlights.clone(),
            selected: self.selected,
            has_image: self.has_image,
        }
    }

    fn set_title(&mut self, title: &str) -> bool {
        if self.title == title {
            return false;
        }
        self.title = title.to_string();
        true
    }

    fn set_pin(&mut self, pin: Option<char>) -> bool {
        if self.pin == pin {
            return false;
        }
        self.pin = pin;
        true
    }

    fn set_highlights(&mut self, highlights: Vec<Range<usize>>) -> bool {
        if self.highlights == highlights {
            return false;
        }
        self.highlights = highlights;
        true
    }

    fn set_selected(&mut self, selected: bool) -> bool {
        if self.selected == selected {
            return false;
        }
        self.selected = selected;
        true
    }

    fn set_shortcut(&mut self, shortcut: Option<char>) -> bool {
        if self.shortcut == shortcut {
            return false;
        }
        self.shortcut = shortcut;
        true
    }

    fn set_has_image(&mut self, has_image: bool) -> bool {
        if self.has_image == has_image {
            return false;
        }
        self.has_image = has_image;
        true
    }

    /// Drop previews and abort any render in flight
    fn reset_previews(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.previews = None;
        self.generation += 1;
    }
}

impl Drop for ItemProjection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Serializable snapshot of a projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub title: String,
    pub pin: Option<char>,
    pub shortcut: Option<char>,
    pub highlights: Vec<Range<usize>>,
    pub selected: bool,
    pub has_image: bool,
}

#[derive(Debug)]
struct RenderedPreviews {
    id: ItemId,
    generation: u64,
    previews: PreviewPair,
}

/// The ordered, filtered list of projections
pub struct HistoryView {
    projections: HashMap<ItemId, ItemProjection>,
    visible: Vec<ItemId>,
    query: String,
    selected: Option<ItemId>,
    assigner: ShortcutAssigner,
    generator: ThumbnailGenerator,
    rendered_tx: mpsc::UnboundedSender<RenderedPreviews>,
    rendered_rx: mpsc::UnboundedReceiver<RenderedPreviews>,
}

impl HistoryView {
    pub fn new(assigner: ShortcutAssigner, generator: ThumbnailGenerator) -> Self {
        let (rendered_tx, rendered_rx) = mpsc::unbounded_channel();
        Self {
            projections: HashMap::new(),
            visible: Vec::new(),
            query: String::new(),
            selected: None,
            assigner,
            generator,
            rendered_tx,
            rendered_rx,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ShortcutAssigner::new(config.shortcuts.count),
            ThumbnailGenerator::new(config.previews.thumbnail_edge, config.previews.preview_edge),
        )
    }

    /// Rebuild from the full item list, reusing existing projections
    pub fn refresh(&mut self, items: &[HistoryItem]) {
        self.projections
            .retain(|id, _| items.iter().any(|item| item.id == *id));
        for item in items {
            match self.projections.get_mut(&item.id) {
                Some(projection) => {
                    projection.set_title(&item.title);
                    projection.set_pin(item.pin);
                    if projection.set_has_image(item.image().is_some()) {
                        projection.reset_previews();
                    }
                }
                None => {
                    self.projections.insert(item.id, ItemProjection::new(item));
                }
            }
        }
        self.layout(items);
    }

    /// Apply store events. `items` is the store's state after the events.
    pub fn apply(&mut self, events: &[HistoryEvent], items: &[HistoryItem]) {
        for event in events {
            match event {
                HistoryEvent::Added { id } => self.track(*id, items),
                HistoryEvent::Merged { id } => {
                    // Contents were replaced, stale previews must go
                    if let Some(projection) = self.projections.get_mut(id) {
                        projection.reset_previews();
                    }
                    self.track(*id, items);
                }
                HistoryEvent::Removed { ids } => {
                    for id in ids {
                        if self.projections.remove(id).is_some() {
                            debug!("Dropped projection {}", id);
                        }
                    }
                }
                HistoryEvent::PinChanged { id, new, .. } => {
                    if let Some(projection) = self.projections.get_mut(id) {
                        projection.set_pin(*new);
                    }
                }
                HistoryEvent::TitleChanged { id, new, .. } => {
                    if let Some(projection) = self.projections.get_mut(id) {
                        projection.set_title(new);
                    }
                }
                HistoryEvent::Reordered => {}
            }
        }
        self.layout(items);
    }

    fn track(&mut self, id: ItemId, items: &[HistoryItem]) {
        let Some(item) = items.iter().find(|item| item.id == id) else {
            // Added then removed within the same batch
            return;
        };
        let projection = self
            .projections
            .entry(id)
            .or_insert_with(|| ItemProjection::new(item));
        projection.set_title(&item.title);
        projection.set_pin(item.pin);
        projection.set_has_image(item.image().is_some());
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Change the search query and recompute the visible subset
    pub fn set_query(&mut self, query: &str, items: &[HistoryItem]) -> bool {
        if self.query == query {
            return false;
        }
        self.query = query.to_string();
        self.layout(items);
        true
    }

    fn layout(&mut self, items: &[HistoryItem]) {
        let matches = search(&self.query, items);

        let mut highlights: HashMap<ItemId, Vec<Range<usize>>> = HashMap::new();
        self.visible = Vec::with_capacity(matches.len());
        for m in matches {
            if self.projections.contains_key(&m.id) {
                self.visible.push(m.id);
                highlights.insert(m.id, m.ranges);
            }
        }

        let by_id: HashMap<ItemId, &HistoryItem> =
            items.iter().map(|item| (item.id, item)).collect();
        let shortcuts = self
            .assigner
            .assign(self.visible.iter().filter_map(|id| by_id.get(id).copied()));

        if !self
            .selected
            .is_some_and(|selected| self.visible.contains(&selected))
        {
            self.selected = self.visible.first().copied();
        }

        for (id, projection) in self.projections.iter_mut() {
            projection.set_highlights(highlights.remove(id).unwrap_or_default());
            // Hidden pinned items still answer to their pin character
            projection.set_shortcut(shortcuts.get(id).copied().or(projection.pin));
            projection.set_selected(self.selected == Some(*id));
        }
    }

    /// Visible projections in display order
    pub fn visible(&self) -> Vec<&ItemProjection> {
        self.visible
            .iter()
            .filter_map(|id| self.projections.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemProjection> {
        self.projections.get(&id)
    }

    /// Select a visible item
    pub fn select(&mut self, id: ItemId) -> bool {
        if !self.visible.contains(&id) {
            return false;
        }
        self.selected = Some(id);
        for (pid, projection) in self.projections.iter_mut() {
            projection.set_selected(*pid == id);
        }
        true
    }

    /// Move the selection by `offset` rows, clamped to the visible list
    pub fn move_selection(&mut self, offset: isize) -> Option<ItemId> {
        if self.visible.is_empty() {
            return None;
        }
        let current = self
            .selected
            .and_then(|id| self.visible.iter().position(|v| *v == id))
            .unwrap_or(0);
        let last = self.visible.len() - 1;
        let target = current.saturating_add_signed(offset).min(last);
        let id = self.visible[target];
        self.select(id);
        Some(id)
    }

    pub fn selected(&self) -> Option<&ItemProjection> {
        self.selected.and_then(|id| self.projections.get(&id))
    }

    /// Item answering to a shortcut character
    pub fn by_shortcut(&self, key: char) -> Option<ItemId> {
        self.projections
            .values()
            .find(|projection| projection.shortcut == Some(key))
            .map(|projection| projection.id)
    }

    pub fn summaries(&self) -> Vec<ItemSummary> {
        self.visible()
            .into_iter()
            .map(ItemProjection::summary)
            .collect()
    }

    /// Start rendering previews for an image item.
    ///
    /// Returns false when there is nothing to do: not an image, already
    /// rendered, or a render is already running. Must be called inside a
    /// tokio runtime.
    pub fn request_previews(&mut self, item: &HistoryItem) -> bool {
        let Some(projection) = self.projections.get_mut(&item.id) else {
            return false;
        };
        if projection.previews.is_some() || projection.is_rendering() {
            return false;
        }
        let Some(bytes) = item.image().map(<[u8]>::to_vec) else {
            return false;
        };

        projection.generation += 1;
        let id = item.id;
        let generation = projection.generation;
        let generator = self.generator;
        let tx = self.rendered_tx.clone();

        projection.task = Some(tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || generator.render(&bytes)).await {
                Ok(Ok(previews)) => {
                    let _ = tx.send(RenderedPreviews {
                        id,
                        generation,
                        previews,
                    });
                }
                Ok(Err(e)) => warn!("Failed to render preview for {}: {}", id, e),
                Err(e) => debug!("Preview render for {} did not finish: {}", id, e),
            }
        }));
        true
    }

    /// Attach finished renders. Returns the ids that gained previews.
    pub fn collect_previews(&mut self) -> Vec<ItemId> {
        let mut updated = Vec::new();
        while let Ok(rendered) = self.rendered_rx.try_recv() {
            let id = rendered.id;
            if self.attach(rendered) {
                updated.push(id);
            }
        }
        updated
    }

    /// Wait for the next finished render
    pub async fn next_preview(&mut self) -> Option<ItemId> {
        loop {
            let rendered = self.rendered_rx.recv().await?;
            let id = rendered.id;
            if self.attach(rendered) {
                return Some(id);
            }
        }
    }

    fn attach(&mut self, rendered: RenderedPreviews) -> bool {
        let Some(projection) = self.projections.get_mut(&rendered.id) else {
            return false;
        };
        if projection.generation != rendered.generation {
            return false;
        }
        projection.previews = Some(Arc::new(rendered.previews));
        projection.task = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryItemContent, PinPosition, SortBy, Sorter};
    use std::time::Duration;

    fn view() -> HistoryView {
        HistoryView::new(ShortcutAssigner::default(), ThumbnailGenerator::new(16, 32))
    }

    fn titled(text: &str) -> HistoryItem {
        let mut item = HistoryItem::from_text(text);
        item.title = text.to_string();
        item
    }

    fn image_item() -> HistoryItem {
        let mut item = HistoryItem::new(vec![HistoryItemContent::image(thumbnail::png(64, 64))]);
        item.title = "Image".to_string();
        item
    }

    #[test]
    fn test_refresh_assigns_shortcuts_and_selection() {
        let mut items = vec![titled("alpha"), titled("beta"), titled("gamma")];
        items[2].pin = Some('g');

        let mut view = view();
        view.refresh(&items);

        let visible = view.visible();
        assert_eq!(visible.len(), 3);
        assert_eq!(visible[0].shortcut(), Some('1'));
        assert_eq!(visible[1].shortcut(), Some('2'));
        assert_eq!(visible[2].shortcut(), Some('g'));
        assert!(visible[0].is_selected());
        assert_eq!(view.by_shortcut('g'), Some(items[2].id));
    }

    #[test]
    fn test_query_filters_and_highlights() {
        let items = vec![titled("apple pie"), titled("banana"), titled("pineapple")];
        let mut view = view();
        view.refresh(&items);

        assert!(view.set_query("apple", &items));
        assert!(!view.set_query("apple", &items));

        let visible = view.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].highlights(), &[0..5]);
        assert_eq!(visible[1].highlights(), &[4..9]);
        // Numeric shortcuts follow the visible subset
        assert_eq!(visible[1].shortcut(), Some('2'));
        assert_eq!(view.get(items[1].id).unwrap().shortcut(), None);

        view.set_query("", &items);
        assert_eq!(view.len(), 3);
        assert!(view.visible().iter().all(|p| p.highlights().is_empty()));
    }

    #[test]
    fn test_selection_follows_visibility() {
        let items = vec![titled("one"), titled("two"), titled("three")];
        let mut view = view();
        view.refresh(&items);

        assert!(view.select(items[1].id));
        assert_eq!(view.selected().map(|p| p.id()), Some(items[1].id));

        view.set_query("thr", &items);
        assert_eq!(view.selected().map(|p| p.id()), Some(items[2].id));
        assert!(!view.select(items[0].id));

        view.set_query("", &items);
        assert_eq!(view.move_selection(-5), Some(items[0].id));
        assert_eq!(view.move_selection(1), Some(items[1].id));
        assert_eq!(view.move_selection(10), Some(items[2].id));
    }

    #[test]
    fn test_events_update_by_difference() {
        let mut items = vec![titled("first"), titled("second")];
        let mut view = view();
        view.refresh(&items);

        let id = items[1].id;
        items[1].pin = Some('s');
        Sorter::new(SortBy::LastCopiedAt, PinPosition::Top).sort(&mut items);
        view.apply(
            &[HistoryEvent::PinChanged {
                id,
                old: None,
                new: Some('s'),
            }],
            &items,
        );
        let projection = view.get(id).unwrap();
        assert_eq!(projection.pin(), Some('s'));
        assert_eq!(projection.shortcut(), Some('s'));

        // Re-applying the same value changes nothing
        let projection = view.projections.get_mut(&id).unwrap();
        assert!(!projection.set_pin(Some('s')));
        assert!(!projection.set_title("second"));
        assert!(projection.set_title("renamed"));

        let removed = items.remove(0);
        view.apply(&[HistoryEvent::Removed { ids: vec![removed.id] }], &items);
        assert!(view.get(removed.id).is_none());
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_added_event_creates_projection() {
        let mut items = vec![titled("old")];
        let mut view = view();
        view.refresh(&items);

        let fresh = titled("new");
        items.insert(0, fresh.clone());
        view.apply(&[HistoryEvent::Added { id: fresh.id }], &items);

        assert_eq!(view.visible()[0].id(), fresh.id);
        assert_eq!(view.visible()[0].shortcut(), Some('1'));
        assert_eq!(view.visible()[1].shortcut(), Some('2'));
    }

    #[tokio::test]
    async fn test_previews_render_in_background() {
        let items = vec![image_item(), titled("text")];
        let mut view = view();
        view.refresh(&items);

        assert!(!view.request_previews(&items[1]));
        assert!(view.request_previews(&items[0]));
        assert!(!view.request_previews(&items[0]));

        let id = tokio::time::timeout(Duration::from_secs(5), view.next_preview())
            .await
            .unwrap();
        assert_eq!(id, Some(items[0].id));

        let projection = view.get(items[0].id).unwrap();
        assert_eq!(projection.thumbnail().map(|p| p.width), Some(16));
        assert_eq!(projection.preview().map(|p| p.width), Some(32));
        assert!(!view.request_previews(&items[0]));
    }

    #[tokio::test]
    async fn test_removed_item_discards_render() {
        let mut items = vec![image_item()];
        let mut view = view();
        view.refresh(&items);
        assert!(view.request_previews(&items[0]));

        let removed = items.remove(0);
        view.apply(&[HistoryEvent::Removed { ids: vec![removed.id] }], &items);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(view.collect_previews().is_empty());
        assert!(view.get(removed.id).is_none());
    }
}
