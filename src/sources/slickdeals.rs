use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::SlickdealsConfig;
use crate::fetch::Fetcher;
use crate::notify::{Message, truncate_chars};
use crate::sources::{dedupe_by_key, rss};
use crate::types::DealListing;

static THREAD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/f/(\d+)").expect("static regex"));

/// Rewrite `https://slickdeals.net/f/{id}-slug` into the short referral form.
///
/// Links without a thread id, or an empty user id, are returned unchanged.
pub fn referral_link(link: &str, user_id: &str) -> String {
    if user_id.is_empty() {
        return link.to_string();
    }
    match THREAD_ID.captures(link) {
        Some(caps) => format!(
            "https://slickdeals.net/sh/thread-{}/e/3/c/deal-details/u/{user_id}/",
            &caps[1]
        ),
        None => link.to_string(),
    }
}

fn is_junk(title: &str, junk_keywords: &[String]) -> bool {
    let upper = title.to_uppercase();
    junk_keywords
        .iter()
        .any(|kw| upper.contains(&kw.to_uppercase()))
}

/// Parse one feed into qualifying deals (newest first, as the feed orders them).
pub fn parse_feed(xml: &str, config: &SlickdealsConfig) -> Result<Vec<DealListing>> {
    let items = rss::parse_items(xml)?;
    let total = items.len();
    let deals: Vec<DealListing> = items
        .into_iter()
        .take(config.max_items_per_feed)
        .filter(|item| !item.link.is_empty())
        .filter_map(|item| {
            let likes = item.comments.unwrap_or(0);
            if likes < config.min_likes || is_junk(&item.title, &config.junk_keywords) {
                return None;
            }
            Some(DealListing {
                key: item.link.clone(),
                link_url: referral_link(&item.link, &config.referral_user_id),
                url: item.link,
                title: item.title,
                likes: Some(likes),
                price: None,
                price_change: None,
                drop_pct: None,
            })
        })
        .collect();
    debug!("{total} item(s) in feed, {} qualifying", deals.len());
    Ok(deals)
}

/// Fetch every configured feed and merge them, keeping the first copy of a link.
///
/// A failed feed is logged and skipped.
pub async fn fetch_all(fetcher: &Fetcher, config: &SlickdealsConfig) -> Vec<DealListing> {
    let mut all = Vec::new();
    for (i, url) in config.feeds.iter().enumerate() {
        let label = url.split('?').next().unwrap_or(url);
        match fetcher.fetch_feed(url).await {
            Ok(xml) => match parse_feed(&xml, config) {
                Ok(deals) => {
                    debug!("Feed #{} {label}: {} deal(s)", i + 1, deals.len());
                    all.extend(deals);
                }
                Err(e) => warn!("Feed #{} {label} unparsable: {e:#}", i + 1),
            },
            Err(e) => warn!("Feed #{} {label} failed: {e:#}", i + 1),
        }
    }
    let combined = all.len();
    let unique = dedupe_by_key(all);
    info!("Combined {combined} → {} unique deal(s)", unique.len());
    unique
}

/// One message per deal; link preview on so the referral link unfurls.
pub fn format_alert(deal: &DealListing) -> Message {
    Message::plain(format!(
        "🔥 {}\n{}",
        truncate_chars(&deal.title, 100),
        deal.link_url
    ))
}
