//! The single writer over the clipboard history
//!
//! [`HistoryStore`] owns the live ordered collection and its storage. Every
//! mutation goes through `&mut self`, so merge decisions never race; the
//! engine serialises callers behind one mutex. Storage failures are logged
//! and queued, the in-memory collection stays authoritative, and the queue is
//! replayed at the start of the next mutating call.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    make_title, merge, HistoryError, HistoryItem, ItemId, MergePolicy, Sorter, Storage,
};
use crate::config::Config;

const EVENT_CAPACITY: usize = 1024;

/// Store tuning, usually derived from [`Config`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Maximum number of unpinned items
    pub max_items: usize,
    pub sorter: Sorter,
    pub merge_policy: MergePolicy,
    pub strip_formatting: bool,
    pub max_title_length: usize,
    /// Characters handed out by `toggle_pin`, in preference order
    pub pin_characters: Vec<char>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_items: config.history.max_items,
            sorter: Sorter::new(config.history.sort_by, config.history.pin_position),
            merge_policy: config.history.merge_policy,
            strip_formatting: config.history.strip_formatting,
            max_title_length: config.history.max_title_length,
            pin_characters: config.shortcuts.pin_characters.chars().collect(),
        }
    }
}

/// Result of [`HistoryStore::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new item was recorded
    Inserted(ItemId),
    /// The candidate was merged into an existing item
    Merged(ItemId),
    /// Empty or whitespace-only candidate, nothing stored
    Rejected,
}

impl AddOutcome {
    /// Id of the stored item, `None` when rejected
    pub fn id(&self) -> Option<ItemId> {
        match self {
            AddOutcome::Inserted(id) | AddOutcome::Merged(id) => Some(*id),
            AddOutcome::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, AddOutcome::Rejected)
    }
}

/// Change notifications fanned out to derived views
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A genuinely new item was recorded
    Added { id: ItemId },
    /// A candidate was merged into an existing item
    Merged { id: ItemId },
    /// Items left the history (delete, eviction, clear)
    Removed { ids: Vec<ItemId> },
    PinChanged {
        id: ItemId,
        old: Option<char>,
        new: Option<char>,
    },
    TitleChanged { id: ItemId, old: String, new: String },
    /// Sort policy changed
    Reordered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Save(ItemId),
    Remove(Vec<ItemId>),
    RemoveAll,
}

/// Authoritative ordered clipboard history
pub struct HistoryStore {
    items: Vec<HistoryItem>,
    storage: Box<dyn Storage>,
    options: StoreOptions,
    pending: Vec<PendingOp>,
    events: broadcast::Sender<HistoryEvent>,
}

impl HistoryStore {
    /// Load the persisted history and enforce the current limits on it
    pub fn open(storage: Box<dyn Storage>, options: StoreOptions) -> Result<Self, HistoryError> {
        let items = storage.load_all()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut store = Self {
            items,
            storage,
            options,
            pending: Vec::new(),
            events,
        };
        store.options.max_items = store.options.max_items.max(1);
        store.options.sorter.sort(&mut store.items);
        store.evict_to(store.options.max_items);

        info!(
            "History loaded: {} items ({} pinned)",
            store.items.len(),
            store.pinned_count()
        );
        Ok(store)
    }

    /// Receive change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    /// Items in display order
    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Pinned item holding the given character
    pub fn by_pin(&self, pin: char) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.pin == Some(pin))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pinned_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_pinned()).count()
    }

    pub fn unpinned_count(&self) -> usize {
        self.items.len() - self.pinned_count()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Operations waiting to be written to storage
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Record a candidate, merging it into an equal or superseded item
    pub fn add(&mut self, mut candidate: HistoryItem) -> AddOutcome {
        self.resync();

        if candidate.contents.is_empty() || candidate.is_blank() {
            debug!("Ignoring empty clipboard candidate");
            return AddOutcome::Rejected;
        }

        candidate.title = self.title_for(&candidate);
        candidate.number_of_copies = candidate.number_of_copies.max(1);

        // Every superseded item folds into one, or the merged result could
        // equal a second match left behind
        let policy = self.options.merge_policy;
        let matches: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| merge::supersedes(&candidate, item, policy))
            .map(|(index, _)| index)
            .collect();

        // Identity goes to the first pinned match, then an equal one, then the first
        let target = matches
            .iter()
            .copied()
            .find(|&index| self.items[index].is_pinned())
            .or_else(|| {
                matches.iter().copied().find(|&index| {
                    merge::contents_equal(&candidate.contents, &self.items[index].contents)
                })
            })
            .or_else(|| matches.first().copied());

        match target {
            Some(target) => self.merge_into(target, &matches, candidate),
            None => self.insert_new(candidate),
        }
    }

    fn merge_into(
        &mut self,
        target: usize,
        matches: &[usize],
        candidate: HistoryItem,
    ) -> AddOutcome {
        let mut absorbed = Vec::new();
        for &index in matches.iter().rev() {
            if index != target {
                absorbed.push(self.items.remove(index));
            }
        }
        absorbed.reverse();

        let index = target - matches.iter().filter(|&&index| index < target).count();
        let old = self.items.remove(index);
        let id = old.id;
        let old_title = old.title.clone();

        let application = old
            .application
            .or_else(|| absorbed.iter().find_map(|item| item.application.clone()))
            .or(if candidate.internal {
                None
            } else {
                candidate.application
            });
        let merged = HistoryItem {
            id,
            contents: candidate.contents,
            title: candidate.title,
            first_copied_at: absorbed
                .iter()
                .map(|item| item.first_copied_at)
                .fold(old.first_copied_at.min(candidate.first_copied_at), Ord::min),
            last_copied_at: absorbed
                .iter()
                .map(|item| item.last_copied_at)
                .fold(candidate.last_copied_at.max(old.last_copied_at), Ord::max),
            number_of_copies: absorbed
                .iter()
                .map(|item| item.number_of_copies)
                .fold(
                    old.number_of_copies.saturating_add(candidate.number_of_copies),
                    u32::saturating_add,
                ),
            pin: old.pin,
            application,
            internal: old.internal
                && candidate.internal
                && absorbed.iter().all(|item| item.internal),
            modified: candidate.modified.or(old.modified),
        };

        self.persist_save(&merged);
        let position = if merged.is_pinned() { index } else { 0 };
        let new_title = merged.title.clone();
        self.items.insert(position, merged);
        self.options.sorter.sort(&mut self.items);

        if !absorbed.is_empty() {
            let ids: Vec<ItemId> = absorbed.iter().map(|item| item.id).collect();
            debug!("Folded {} duplicate items into {}", ids.len(), id);
            self.persist_remove(ids.clone());
            self.emit(HistoryEvent::Removed { ids });
        }

        debug!("Merged clipboard copy into {}", id);
        self.emit(HistoryEvent::Merged { id });
        if old_title != new_title {
            self.emit(HistoryEvent::TitleChanged {
                id,
                old: old_title,
                new: new_title,
            });
        }
        AddOutcome::Merged(id)
    }

    fn insert_new(&mut self, mut candidate: HistoryItem) -> AddOutcome {
        if let Some(pin) = candidate.pin {
            if !self.options.pin_characters.contains(&pin) || self.by_pin(pin).is_some() {
                warn!("Dropping unavailable pin '{}' from new item", pin);
                candidate.pin = None;
            }
        }

        if !candidate.is_pinned() {
            // Make room for the new unpinned item
            self.evict_to(self.options.max_items.saturating_sub(1));
        }

        let id = candidate.id;
        self.persist_save(&candidate);
        self.items.insert(0, candidate);
        self.options.sorter.sort(&mut self.items);

        debug!("Recorded new clipboard item {}", id);
        self.emit(HistoryEvent::Added { id });
        AddOutcome::Inserted(id)
    }

    /// Remove one item
    pub fn delete(&mut self, id: ItemId) -> Result<HistoryItem, HistoryError> {
        self.resync();

        let index = self.index_of(id)?;
        let item = self.items.remove(index);
        self.persist_remove(vec![id]);
        self.emit(HistoryEvent::Removed { ids: vec![id] });
        Ok(item)
    }

    /// Remove every unpinned item; pins survive
    pub fn clear(&mut self) -> Vec<ItemId> {
        self.resync();

        let (pinned, unpinned): (Vec<_>, Vec<_>) =
            self.items.drain(..).partition(HistoryItem::is_pinned);
        self.items = pinned;

        let ids: Vec<ItemId> = unpinned.into_iter().map(|item| item.id).collect();
        if !ids.is_empty() {
            self.persist_remove(ids.clone());
            self.emit(HistoryEvent::Removed { ids: ids.clone() });
        }
        info!("Cleared {} unpinned items", ids.len());
        ids
    }

    /// Remove every item, pinned ones included
    pub fn clear_all(&mut self) -> Vec<ItemId> {
        self.resync();

        let ids: Vec<ItemId> = self.items.drain(..).map(|item| item.id).collect();
        if let Err(e) = self.storage.remove_all() {
            error!("Failed to clear history storage: {}", e);
            self.pending.push(PendingOp::RemoveAll);
        }
        if !ids.is_empty() {
            self.emit(HistoryEvent::Removed { ids: ids.clone() });
        }
        info!("Cleared all {} items", ids.len());
        ids
    }

    /// Pin with the first free character, or unpin. Returns the new pin.
    pub fn toggle_pin(&mut self, id: ItemId) -> Result<Option<char>, HistoryError> {
        self.resync();

        let index = self.index_of(id)?;
        let new = match self.items[index].pin {
            Some(_) => None,
            None => Some(self.free_pin().ok_or(HistoryError::NoFreePin)?),
        };
        self.set_pin(index, new);
        Ok(new)
    }

    /// Pin with a user-chosen character
    ///
    /// A character held by another item is refused, never reassigned.
    pub fn pin_with(&mut self, id: ItemId, pin: char) -> Result<(), HistoryError> {
        self.resync();

        if !self.options.pin_characters.contains(&pin) {
            return Err(HistoryError::InvalidPin(pin));
        }
        let index = self.index_of(id)?;
        if let Some(holder) = self.by_pin(pin) {
            if holder.id != id {
                return Err(HistoryError::PinTaken(pin));
            }
            return Ok(());
        }

        self.set_pin(index, Some(pin));
        Ok(())
    }

    fn set_pin(&mut self, index: usize, new: Option<char>) {
        let item = &mut self.items[index];
        let old = item.pin;
        if old == new {
            return;
        }
        item.pin = new;
        let id = item.id;

        let snapshot = self.items[index].clone();
        self.persist_save(&snapshot);
        self.options.sorter.sort(&mut self.items);
        self.emit(HistoryEvent::PinChanged { id, old, new });
    }

    /// Re-derive every title, e.g. after the formatting setting changed
    pub fn regenerate_titles(&mut self, strip_formatting: bool) {
        self.resync();
        self.options.strip_formatting = strip_formatting;

        for index in 0..self.items.len() {
            let title = self.title_for(&self.items[index]);
            if title == self.items[index].title {
                continue;
            }
            let old = std::mem::replace(&mut self.items[index].title, title.clone());
            let id = self.items[index].id;

            let snapshot = self.items[index].clone();
            self.persist_save(&snapshot);
            self.emit(HistoryEvent::TitleChanged { id, old, new: title });
        }
    }

    /// Switch ordering policy
    pub fn set_sorter(&mut self, sorter: Sorter) {
        self.resync();
        if self.options.sorter == sorter {
            return;
        }
        self.options.sorter = sorter;
        self.options.sorter.sort(&mut self.items);
        self.emit(HistoryEvent::Reordered);
    }

    /// Change the unpinned cap, evicting immediately if it shrank.
    /// The cap never drops below one.
    pub fn set_max_items(&mut self, max_items: usize) {
        self.resync();
        if max_items == 0 {
            warn!("History limit of 0 raised to 1");
        }
        self.options.max_items = max_items.max(1);
        self.evict_to(self.options.max_items);
    }

    fn index_of(&self, id: ItemId) -> Result<usize, HistoryError> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or(HistoryError::NotFound(id))
    }

    fn title_for(&self, item: &HistoryItem) -> String {
        make_title(
            &item.contents,
            self.options.strip_formatting,
            self.options.max_title_length,
        )
    }

    fn free_pin(&self) -> Option<char> {
        self.options
            .pin_characters
            .iter()
            .copied()
            .find(|c| self.by_pin(*c).is_none())
    }

    /// Evict the oldest unpinned items until at most `limit` remain
    fn evict_to(&mut self, limit: usize) {
        let mut evicted = Vec::new();

        while self.unpinned_count() > limit {
            // Ties go to the item further down the list, which was inserted earlier
            let oldest = self
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| !item.is_pinned())
                .min_by(|(ia, a), (ib, b)| {
                    a.last_copied_at
                        .cmp(&b.last_copied_at)
                        .then_with(|| ib.cmp(ia))
                })
                .map(|(index, _)| index);

            match oldest {
                Some(index) => evicted.push(self.items.remove(index).id),
                None => break,
            }
        }

        if !evicted.is_empty() {
            debug!("Evicted {} items over the history limit", evicted.len());
            self.persist_remove(evicted.clone());
            self.emit(HistoryEvent::Removed { ids: evicted });
        }
    }

    fn persist_save(&mut self, item: &HistoryItem) {
        if let Err(e) = self.storage.save(item) {
            error!("Failed to persist history item {}: {}", item.id, e);
            self.pending.push(PendingOp::Save(item.id));
        }
    }

    fn persist_remove(&mut self, ids: Vec<ItemId>) {
        if let Err(e) = self.storage.remove(&ids) {
            error!("Failed to remove {} history items: {}", ids.len(), e);
            self.pending.push(PendingOp::Remove(ids));
        }
    }

    /// Replay storage operations that failed earlier
    fn resync(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        debug!("Replaying {} pending storage operations", pending.len());

        for op in pending {
            let result = match &op {
                PendingOp::Save(id) => match self.items.iter().find(|item| item.id == *id) {
                    Some(item) => self.storage.save(item),
                    None => Ok(()),
                },
                PendingOp::Remove(ids) => self.storage.remove(ids),
                PendingOp::RemoveAll => self.rewrite_all(),
            };

            if let Err(e) = result {
                warn!("Storage still failing, keeping operation queued: {}", e);
                self.pending.push(op);
            }
        }
    }

    fn rewrite_all(&mut self) -> Result<(), HistoryError> {
        self.storage.remove_all()?;
        for item in &self.items {
            self.storage.save(item)?;
        }
        Ok(())
    }

    fn emit(&self, event: HistoryEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}
