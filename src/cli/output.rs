use std::ops::Range;

use crate::projection::ItemSummary;

/// Width of the id column in listings
pub const SHORT_ID_LEN: usize = 8;

/// One listing row: shortcut, short id, pin marker and title
pub fn format_row(item: &ItemSummary, highlight: bool) -> String {
    let shortcut = item.shortcut.map(String::from).unwrap_or_else(|| " ".to_string());
    let marker = if item.pin.is_some() { '*' } else { ' ' };
    let id = item.id.simple().to_string();
    let title = if highlight {
        highlight_ranges(&item.title, &item.highlights)
    } else {
        item.title.clone()
    };

    format!(
        "{} {} {} {}",
        shortcut,
        &id[..SHORT_ID_LEN],
        marker,
        single_line(&title)
    )
}

/// Wrap matched character ranges in brackets
pub fn highlight_ranges(title: &str, ranges: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(title.len() + ranges.len() * 2);
    for (index, c) in title.chars().enumerate() {
        if ranges.iter().any(|r| r.start == index) {
            out.push('[');
        }
        out.push(c);
        if ranges.iter().any(|r| r.end == index + 1) {
            out.push(']');
        }
    }
    out
}

fn single_line(title: &str) -> String {
    title
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect()
}
