use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::notify::{MAX_MESSAGE_CHARS, Message, escape_markdown, truncate_chars};
use crate::price::percent_of;
use crate::sources::amazon::Buybox;
use crate::sources::{rss, window};
use crate::types::DealListing;

static PRODUCT_ASIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/product/([A-Z][A-Z0-9]{9})").expect("static regex"));
static DP_ASIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"amazon\.com/dp/([A-Z][A-Z0-9]{9})").expect("static regex"));
static FEED_ASIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/product/([A-Z0-9]{10})").expect("static regex"));
static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:<h3[^>]*>|<a[^>]*product[^>]*>)\s*([^<>\n]{10,120})")
        .expect("static regex")
});
static OLD_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:old|prev|was)[:\s]*\$?([0-9,]+\.\d{2})").expect("static regex")
});
static NEW_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:now|current|lowest)[:\s]*\$?([0-9,]+\.\d{2})").expect("static regex")
});
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("static regex"));
static AMAZON_GO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a href="([^"]*/go)">Amazon\.com</a>"#).expect("static regex")
});

pub fn amazon_url(asin: &str) -> String {
    format!("https://www.amazon.com/dp/{asin}")
}

/// ASIN of a top-drops deal, whether keyed by URL or by bare ASIN.
pub fn asin_of(deal: &DealListing) -> &str {
    deal.key.rsplit('/').next().unwrap_or(&deal.key)
}

fn parse_money(raw: &str) -> Option<Decimal> {
    raw.replace(',', "").parse().ok()
}

/// Parse the top-drops HTML page. One deal per distinct ASIN, page order.
///
/// Name and prices are read from text near each product link; missing
/// values render as `?` in `price_change`.
pub fn parse_top_drops(html: &str) -> Vec<DealListing> {
    let mut matches: Vec<_> = PRODUCT_ASIN.captures_iter(html).collect();
    if matches.is_empty() {
        matches = DP_ASIN.captures_iter(html).collect();
    }

    let mut asins = HashSet::new();
    let mut deals = Vec::new();
    for caps in matches {
        let (Some(whole), Some(asin)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let asin = asin.as_str();
        if !asins.insert(asin.to_string()) {
            continue;
        }

        let name_area = window(html, whole.start().saturating_sub(500), whole.start() + 200);
        let name = NAME
            .captures(name_area)
            .map(|c| c[1].trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Deal-{}", &asin[..6]));

        let snippet =
            window(html, whole.start().saturating_sub(400), whole.end() + 400).to_lowercase();
        let old = OLD_PRICE.captures(&snippet).and_then(|c| parse_money(&c[1]));
        let new = NEW_PRICE.captures(&snippet).and_then(|c| parse_money(&c[1]));

        let drop = match (old, new) {
            (Some(old), Some(new)) if old > Decimal::ZERO => Some(percent_of(old - new, old)),
            _ => PERCENT
                .captures(&snippet)
                .and_then(|c| c[1].parse::<Decimal>().ok()),
        };

        let show = |p: Option<Decimal>| p.map(|p| format!("{p:.2}")).unwrap_or_else(|| "?".into());
        let pct = drop
            .map(|p| format!("{}%", p.normalize()))
            .unwrap_or_else(|| "?".into());

        let url = amazon_url(asin);
        deals.push(DealListing {
            key: url.clone(),
            title: truncate_chars(&name, 120),
            url: format!("https://camelcamelcamel.com/product/{asin}"),
            link_url: url,
            likes: None,
            price: new,
            price_change: Some(format!("{} → {} ({pct})", show(old), show(new))),
            drop_pct: drop.and_then(|p| p.to_f64()),
        });
    }
    deals
}

/// Parse the top-drops RSS feed, keyed by bare ASIN. Items without a product
/// link are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<DealListing>> {
    let mut asins = HashSet::new();
    let deals = rss::parse_items(xml)?
        .into_iter()
        .filter_map(|item| {
            let asin = FEED_ASIN.captures(&item.link)?[1].to_string();
            if !asins.insert(asin.clone()) {
                return None;
            }
            let link_url = AMAZON_GO
                .captures(&item.description)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| amazon_url(&asin));
            Some(DealListing {
                key: asin,
                title: truncate_chars(&item.title, 120),
                url: item.link,
                link_url,
                likes: None,
                price: None,
                price_change: None,
                drop_pct: None,
            })
        })
        .collect();
    Ok(deals)
}

/// Take the current Amazon title and price from a product page lookup.
///
/// A lookup without a price (challenge page, unavailable item) leaves the deal
/// as the feed described it.
pub fn enrich_from_buybox(deal: &mut DealListing, buybox: &Buybox) {
    let Some(price) = buybox.price else {
        return;
    };
    if !buybox.name.is_empty() {
        deal.title = buybox.name.clone();
    }
    deal.price = Some(price);
}

/// Big enough drop, or a title matching a watched keyword.
pub fn is_critical(deal: &DealListing, min_drop_pct: f64, keywords: &[String]) -> bool {
    if deal.drop_pct.is_some_and(|p| p >= min_drop_pct) {
        return true;
    }
    let title = deal.title.to_lowercase();
    keywords
        .iter()
        .filter(|kw| !kw.is_empty())
        .any(|kw| title.contains(&kw.to_lowercase()))
}

fn deal_lines(deal: &DealListing) -> String {
    let change = deal.price_change.as_deref().unwrap_or("? → ? (?)");
    format!("{}\n{}\n{}", escape_markdown(&deal.title), escape_markdown(change), deal.link_url)
}

/// Single top-drop alert.
pub fn format_alert(deal: &DealListing) -> Message {
    Message::markdown(truncate_chars(&deal_lines(deal), MAX_MESSAGE_CHARS)).without_preview()
}

/// All critical deals of one cycle in one message. Deals that would push the
/// text past the Telegram limit are summarised as a count.
pub fn format_critical_digest(deals: &[DealListing], min_drop_pct: f64) -> Message {
    let mut text = format!("*🔥 CRITICAL DEALS (≥{min_drop_pct}% drop or keyword):*\n\n");
    for (i, deal) in deals.iter().enumerate() {
        let change = deal.price_change.as_deref().unwrap_or("?");
        let block = format!(
            "*{}*\n{}\n{}\n\n",
            escape_markdown(&deal.title),
            escape_markdown(change),
            deal.link_url
        );
        if text.chars().count() + block.chars().count() > MAX_MESSAGE_CHARS - 40 {
            text.push_str(&format!("…and {} more", deals.len() - i));
            break;
        }
        text.push_str(&block);
    }
    Message::markdown(text.trim_end().to_string()).without_preview()
}

/// Alert for the RSS variant, with both the Amazon and Camel links.
pub fn format_feed_alert(deal: &DealListing) -> Message {
    let price = deal
        .price
        .map(|p| format!("\n💰 ${p:.2}"))
        .unwrap_or_default();
    Message::markdown(format!(
        "🚨 NEW CAMEL TOP DROP!\n\n*{}*{price}\n\n🛒 [Amazon]({})\n📊 [Camel]({})\n\n`{}`",
        escape_markdown(&deal.title),
        deal.link_url,
        deal.url,
        asin_of(deal)
    ))
}
