use std::sync::LazyLock;

use regex::Regex;

use crate::notify::{Message, truncate_chars};
use crate::sources::dedupe_by_key;
use crate::types::DealListing;

/// Responses shorter than this are error pages, not listings.
pub const MIN_PAGE_LEN: usize = 1000;

static OFFER_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"offers/([a-zA-Z0-9-]+)").expect("static regex"));

/// Extract sellout offers, keyed by slug, in first-mention order.
pub fn parse_sellout(html: &str) -> Vec<DealListing> {
    if html.len() < MIN_PAGE_LEN {
        return Vec::new();
    }
    let deals = OFFER_SLUG
        .captures_iter(html)
        .map(|caps| {
            let slug = &caps[1];
            DealListing::simple(
                slug,
                truncate_chars(&title_from_slug(slug), 100),
                format!("https://www.woot.com/offers/{slug}"),
            )
        })
        .collect();
    dedupe_by_key(deals)
}

/// `amazon-basics-usb-c` → `Amazon Basics Usb C`.
pub fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// The bare offer URL, so the chat shows Woot's own preview card.
pub fn format_alert(deal: &DealListing) -> Message {
    Message::plain(deal.url.clone())
}
