//! Ordering policy over the history

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::HistoryItem;

/// Sort key for unpinned items, always descending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    LastCopiedAt,
    NumberOfCopies,
    FirstCopiedAt,
}

/// Where pinned items are anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinPosition {
    #[default]
    Top,
    Bottom,
}

/// Pin-aware ordering
///
/// Pinned items are moved to the anchor and keep the relative order they
/// already had; only unpinned items are ordered by the policy. Sorting is
/// stable, so ties keep their current order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sorter {
    pub by: SortBy,
    pub pin_position: PinPosition,
}

impl Sorter {
    pub fn new(by: SortBy, pin_position: PinPosition) -> Self {
        Self { by, pin_position }
    }

    /// Reorder `items` in place
    pub fn sort(&self, items: &mut Vec<HistoryItem>) {
        let (pinned, mut unpinned): (Vec<_>, Vec<_>) =
            items.drain(..).partition(HistoryItem::is_pinned);
        unpinned.sort_by(|a, b| self.compare(a, b));

        match self.pin_position {
            PinPosition::Top => {
                items.extend(pinned);
                items.extend(unpinned);
            }
            PinPosition::Bottom => {
                items.extend(unpinned);
                items.extend(pinned);
            }
        }
    }

    /// Sorted copy of the given slice
    pub fn sorted(&self, items: &[HistoryItem]) -> Vec<HistoryItem> {
        let mut items = items.to_vec();
        self.sort(&mut items);
        items
    }

    fn compare(&self, a: &HistoryItem, b: &HistoryItem) -> Ordering {
        match self.by {
            SortBy::LastCopiedAt => b.last_copied_at.cmp(&a.last_copied_at),
            SortBy::FirstCopiedAt => b.first_copied_at.cmp(&a.first_copied_at),
            SortBy::NumberOfCopies => b
                .number_of_copies
                .cmp(&a.number_of_copies)
                .then_with(|| b.last_copied_at.cmp(&a.last_copied_at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rstest::rstest;

    fn item(title: &str, first: i64, last: i64, copies: u32) -> HistoryItem {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut item = HistoryItem::from_text(title);
        item.title = title.to_string();
        item.first_copied_at = base + Duration::seconds(first);
        item.last_copied_at = base + Duration::seconds(last);
        item.number_of_copies = copies;
        item
    }

    fn titles(items: &[HistoryItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[rstest]
    #[case(SortBy::LastCopiedAt, vec!["c", "a", "b"])]
    #[case(SortBy::FirstCopiedAt, vec!["b", "c", "a"])]
    #[case(SortBy::NumberOfCopies, vec!["b", "a", "c"])]
    fn test_policies(#[case] by: SortBy, #[case] expected: Vec<&str>) {
        let items = vec![item("a", 0, 20, 3), item("b", 30, 10, 5), item("c", 15, 40, 1)];
        let sorted = Sorter::new(by, PinPosition::Top).sorted(&items);
        assert_eq!(titles(&sorted), expected);
    }

    #[test]
    fn test_pinned_keep_their_relative_order() {
        let mut p1 = item("p1", 0, 0, 1);
        p1.pin = Some('b');
        let mut p2 = item("p2", 0, 100, 1);
        p2.pin = Some('a');
        let items = vec![item("u1", 0, 5, 1), p1, item("u2", 0, 50, 1), p2];

        let top = Sorter::new(SortBy::LastCopiedAt, PinPosition::Top).sorted(&items);
        assert_eq!(titles(&top), vec!["p1", "p2", "u2", "u1"]);

        let bottom = Sorter::new(SortBy::LastCopiedAt, PinPosition::Bottom).sorted(&items);
        assert_eq!(titles(&bottom), vec!["u2", "u1", "p1", "p2"]);
    }

    #[test]
    fn test_ties_are_stable() {
        let items = vec![item("x", 0, 10, 1), item("y", 0, 10, 1), item("z", 0, 10, 1)];
        let sorted = Sorter::default().sorted(&items);
        assert_eq!(titles(&sorted), vec!["x", "y", "z"]);
    }
}
