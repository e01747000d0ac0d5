//! Single-character accelerators
//!
//! Pinned items keep the character chosen when they were pinned. The first
//! visible unpinned items get `1`..`9`, `0`; the rest get nothing.

use std::collections::HashMap;

use super::{HistoryItem, ItemId};

const NUMERIC_KEYS: [char; 10] = ['1', '2', '3', '4', '5', '6', '7', '8', '9', '0'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutAssigner {
    keys: Vec<char>,
}

impl ShortcutAssigner {
    /// Assigner handing out the first `count` numeric keys
    pub fn new(count: usize) -> Self {
        Self {
            keys: NUMERIC_KEYS.iter().copied().take(count).collect(),
        }
    }

    /// Number of numeric shortcuts handed out
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Shortcut per item for the visible items, given in sort order
    pub fn assign<'a, I>(&self, visible: I) -> HashMap<ItemId, char>
    where
        I: IntoIterator<Item = &'a HistoryItem>,
    {
        let mut numeric = self.keys.iter();
        visible
            .into_iter()
            .filter_map(|item| match item.pin {
                Some(pin) => Some((item.id, pin)),
                None => numeric.next().map(|key| (item.id, *key)),
            })
            .collect()
    }
}

impl Default for ShortcutAssigner {
    fn default() -> Self {
        Self::new(NUMERIC_KEYS.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<HistoryItem> {
        (0..n).map(|i| HistoryItem::from_text(format!("item {i}"))).collect()
    }

    #[test]
    fn test_numeric_keys_in_order() {
        let items = items(12);
        let shortcuts = ShortcutAssigner::default().assign(&items);
        assert_eq!(shortcuts.len(), 10);
        assert_eq!(shortcuts[&items[0].id], '1');
        assert_eq!(shortcuts[&items[8].id], '9');
        assert_eq!(shortcuts[&items[9].id], '0');
        assert!(!shortcuts.contains_key(&items[10].id));
    }

    #[test]
    fn test_pinned_items_keep_their_pin() {
        let mut items = items(3);
        items[0].pin = Some('a');
        let shortcuts = ShortcutAssigner::new(2).assign(&items);
        assert_eq!(shortcuts[&items[0].id], 'a');
        assert_eq!(shortcuts[&items[1].id], '1');
        assert_eq!(shortcuts[&items[2].id], '2');
    }

    #[test]
    fn test_count_limits_keys() {
        let items = items(5);
        let assigner = ShortcutAssigner::new(3);
        assert_eq!(assigner.len(), 3);
        assert_eq!(assigner.assign(&items).len(), 3);
        assert!(ShortcutAssigner::new(0).assign(&items).is_empty());
    }
}
