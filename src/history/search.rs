//! Query filtering with match ranges for highlighting
//!
//! Matching is case-insensitive. A substring hit in the title ranks first,
//! then items whose full text contains the query beyond the (truncated)
//! title, then fuzzy hits where the query characters appear in order. Within
//! a rank the incoming order is kept, so callers pass the sorted history.
//!
//! Ranges are character offsets into the title, half-open.

use std::ops::Range;

use super::{HistoryItem, ItemId};

/// One matching item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub id: ItemId,
    /// Matched character ranges within the title
    pub ranges: Vec<Range<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Title,
    Content,
    Fuzzy,
}

/// Filter `items` by `query`. An empty query returns every item unranged.
pub fn search(query: &str, items: &[HistoryItem]) -> Vec<SearchMatch> {
    let needle: Vec<char> = query.trim().chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return items
            .iter()
            .map(|item| SearchMatch {
                id: item.id,
                ranges: Vec::new(),
            })
            .collect();
    }

    let mut hits: Vec<(Rank, SearchMatch)> = items
        .iter()
        .filter_map(|item| match_item(&needle, item))
        .collect();
    hits.sort_by_key(|(rank, _)| *rank);
    hits.into_iter().map(|(_, m)| m).collect()
}

fn match_item(needle: &[char], item: &HistoryItem) -> Option<(Rank, SearchMatch)> {
    let folded = fold(&item.title);

    let ranges = substring_ranges(needle, &folded);
    if !ranges.is_empty() {
        return Some((Rank::Title, SearchMatch { id: item.id, ranges }));
    }

    if let Some(text) = item.text() {
        let haystack: Vec<char> = fold(text).into_iter().map(|(c, _)| c).collect();
        if find(needle, &haystack, 0).is_some() {
            return Some((
                Rank::Content,
                SearchMatch {
                    id: item.id,
                    ranges: Vec::new(),
                },
            ));
        }
    }

    fuzzy_ranges(needle, &folded).map(|ranges| (Rank::Fuzzy, SearchMatch { id: item.id, ranges }))
}

/// Lowercased characters paired with the index of the source character
fn fold(text: &str) -> Vec<(char, usize)> {
    text.chars()
        .enumerate()
        .flat_map(|(i, c)| c.to_lowercase().map(move |l| (l, i)))
        .collect()
}

fn find(needle: &[char], haystack: &[char], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn substring_ranges(needle: &[char], folded: &[(char, usize)]) -> Vec<Range<usize>> {
    let haystack: Vec<char> = folded.iter().map(|(c, _)| *c).collect();
    let mut ranges = Vec::new();
    let mut from = 0;
    while let Some(start) = find(needle, &haystack, from) {
        let end = start + needle.len();
        ranges.push(folded[start].1..folded[end - 1].1 + 1);
        from = end;
    }
    ranges
}

fn fuzzy_ranges(needle: &[char], folded: &[(char, usize)]) -> Option<Vec<Range<usize>>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut pos = 0;

    for wanted in needle.iter().filter(|c| !c.is_whitespace()) {
        let offset = folded[pos..].iter().position(|(c, _)| c == wanted)?;
        let index = folded[pos + offset].1;
        pos += offset + 1;

        match ranges.last_mut() {
            Some(last) if last.end == index => last.end = index + 1,
            Some(last) if last.end > index => {}
            _ => ranges.push(index..index + 1),
        }
    }

    Some(ranges)
}
