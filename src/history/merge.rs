//! Equality and supersession between history items
//!
//! A new candidate is merged into an existing item instead of being inserted
//! when the two are equal, or when the candidate supersedes the existing
//! item under the configured [`MergePolicy`].

use serde::{Deserialize, Serialize};

use super::{HistoryItem, HistoryItemContent};

/// Which candidates replace an existing item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Only content-equal items merge
    Exact,
    /// Equal items merge, and so do candidates carrying every representation
    /// of the existing item plus extra ones
    #[default]
    Superset,
    /// `Superset`, plus candidates produced by the same clipboard change
    /// (same `modified` counter) with the same representation types
    Session,
}

/// Content lists match by type and payload, regardless of order
pub fn contents_equal(a: &[HistoryItemContent], b: &[HistoryItemContent]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<_> = a.iter().collect();
    let mut b: Vec<_> = b.iter().collect();
    a.sort();
    b.sort();
    a == b
}

/// Whether `candidate` replaces `existing`
pub fn supersedes(candidate: &HistoryItem, existing: &HistoryItem, policy: MergePolicy) -> bool {
    if existing.contents.is_empty() {
        return false;
    }
    if contents_equal(&candidate.contents, &existing.contents) {
        return true;
    }

    match policy {
        MergePolicy::Exact => false,
        MergePolicy::Superset => is_superset(candidate, existing),
        MergePolicy::Session => is_superset(candidate, existing) || same_session(candidate, existing),
    }
}

fn is_superset(candidate: &HistoryItem, existing: &HistoryItem) -> bool {
    existing
        .contents
        .iter()
        .all(|content| candidate.contents.contains(content))
}

fn same_session(candidate: &HistoryItem, existing: &HistoryItem) -> bool {
    let (Some(a), Some(b)) = (candidate.modified, existing.modified) else {
        return false;
    };
    if a != b {
        return false;
    }

    let mut left: Vec<_> = candidate.contents.iter().map(|c| &c.content_type).collect();
    let mut right: Vec<_> = existing.contents.iter().map(|c| &c.content_type).collect();
    left.sort();
    left.dedup();
    right.sort();
    right.dedup();
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn item(contents: Vec<HistoryItemContent>) -> HistoryItem {
        HistoryItem::new(contents)
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = vec![HistoryItemContent::text("x"), HistoryItemContent::html("<i>x</i>")];
        let b = vec![HistoryItemContent::html("<i>x</i>"), HistoryItemContent::text("x")];
        assert!(contents_equal(&a, &b));
        assert!(!contents_equal(&a, &b[..1]));
    }

    #[rstest]
    #[case(MergePolicy::Exact, false)]
    #[case(MergePolicy::Superset, true)]
    #[case(MergePolicy::Session, true)]
    fn test_superset_candidate(#[case] policy: MergePolicy, #[case] expected: bool) {
        let existing = item(vec![HistoryItemContent::text("hello")]);
        let candidate = item(vec![
            HistoryItemContent::text("hello"),
            HistoryItemContent::rich_text(b"{\\rtf1 hello}".to_vec()),
        ]);
        assert_eq!(supersedes(&candidate, &existing, policy), expected);
    }

    #[rstest]
    #[case(MergePolicy::Exact, false)]
    #[case(MergePolicy::Superset, false)]
    #[case(MergePolicy::Session, true)]
    fn test_same_session_update(#[case] policy: MergePolicy, #[case] expected: bool) {
        let existing = item(vec![HistoryItemContent::text("draft")]).with_modified(42);
        let candidate = item(vec![HistoryItemContent::text("draft, edited")]).with_modified(42);
        assert_eq!(supersedes(&candidate, &existing, policy), expected);
    }

    #[test]
    fn test_different_session_never_merges() {
        let existing = item(vec![HistoryItemContent::text("a")]).with_modified(1);
        let candidate = item(vec![HistoryItemContent::text("b")]).with_modified(2);
        assert!(!supersedes(&candidate, &existing, MergePolicy::Session));
    }

    #[test]
    fn test_subset_candidate_does_not_supersede() {
        let existing = item(vec![
            HistoryItemContent::text("hello"),
            HistoryItemContent::html("<b>hello</b>"),
        ]);
        let candidate = item(vec![HistoryItemContent::text("hello")]);
        assert!(!supersedes(&candidate, &existing, MergePolicy::Superset));
    }
}
