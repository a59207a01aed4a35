//! Extractors: turn fetched pages and feeds into candidate records.
//!
//! Everything here is pure (text in, records out) except the small `fetch_*`
//! helpers, which only combine the shared [`Fetcher`](crate::fetch::Fetcher)
//! with a parser.

pub mod amazon;
pub mod camel;
pub mod jobs;
pub mod rss;
pub mod slickdeals;
pub mod woot;

use std::collections::HashSet;

use crate::types::Candidate;

/// Drop later candidates that repeat an earlier key. Order is preserved.
pub fn dedupe_by_key<C: Candidate>(candidates: Vec<C>) -> Vec<C> {
    let mut keys = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| keys.insert(c.key().to_string()))
        .collect()
}

/// Largest prefix of `s` ending at or before byte `idx` on a char boundary.
pub(crate) fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// `s[start..end]` widened/narrowed to char boundaries.
pub(crate) fn window(s: &str, start: usize, end: usize) -> &str {
    let start = floor_boundary(s, start);
    let end = floor_boundary(s, end).max(start);
    &s[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DealListing;

    #[test]
    fn dedupe_keeps_first() {
        let deals = vec![
            DealListing::simple("a", "first", "u1"),
            DealListing::simple("b", "b", "u2"),
            DealListing::simple("a", "second", "u3"),
        ];
        let out = dedupe_by_key(deals);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "first");
    }

    #[test]
    fn window_is_boundary_safe() {
        let s = "ab€cd";
        // '€' spans bytes 2..5
        assert_eq!(window(s, 3, 6), "€c");
        assert_eq!(window(s, 0, 3), "ab");
        assert_eq!(window(s, 2, 100), "€cd");
    }
}
