//! Amazon watchlist: product page and offers page price extraction.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::TIME_FORMAT;
use crate::fetch::is_challenge_page;
use crate::notify::{Message, escape_markdown, truncate_chars};
use crate::types::{Direction, Observation, PriceCheck};

/// Sellers accepted when no sellers file exists.
pub const DEFAULT_SELLERS: [&str; 3] = ["amazon.com", "amazon resale", "amazon warehouse deals"];

/// Prices outside this range are selector noise.
const MIN_PRICE: Decimal = dec!(0.01);
const MAX_PRICE: Decimal = dec!(5000);

/// Offers page containers scanned per product.
const MAX_OFFERS: usize = 15;

static ASIN_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/dp/([A-Z0-9]{10})").expect("static regex"));
static PRICE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:,\d{3})+\.\d{2}|\d+\.\d{2}").expect("static regex")
});

fn compile(list: &[&'static str]) -> Vec<(&'static str, Selector)> {
    list.iter()
        .map(|css| (*css, Selector::parse(css).expect("static selector")))
        .collect()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Buybox price selectors, tried tier by tier, in order.
static PRICE_TIERS: LazyLock<Vec<(&'static str, Vec<(&'static str, Selector)>)>> =
    LazyLock::new(|| {
        vec![
            (
                "deal",
                compile(&[
                    "#priceblock_dealprice",
                    "#priceblock_dealprice span.a-offscreen",
                    "#priceblock_ourprice",
                    "#priceblock_ourprice span.a-offscreen",
                    ".a-price.a-text-price.a-size-medium span.a-offscreen",
                    "#apexOfferPriceBlock span.a-offscreen",
                ]),
            ),
            (
                "buybox",
                compile(&[
                    "#price_inside_buybox span.a-offscreen",
                    ".buybox-price span.a-offscreen",
                    "#corePrice_feature_div span.a-offscreen",
                ]),
            ),
            (
                "fallback",
                compile(&["#priceblock span.a-offscreen", "#priceblock_shippingmessage"]),
            ),
        ]
    });

static SELLER: LazyLock<Vec<(&'static str, Selector)>> = LazyLock::new(|| {
    compile(&["#sellerProfileTriggerId", "#merchant-info a", ".sellerName"])
});
static PRODUCT_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("#productTitle"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static OFFER: LazyLock<Selector> =
    LazyLock::new(|| selector(".olpOffer, .a-row.olpOffer, #olpOfferList"));
static OFFER_SELLER: LazyLock<Selector> =
    LazyLock::new(|| selector(".olpSellerName a, .olpSellerName, h3, .seller-name"));
static OFFER_PRICE: LazyLock<Selector> =
    LazyLock::new(|| selector(".olpOfferPrice, .a-price-whole, .a-offscreen, .offer-price"));

/// One watchlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchItem {
    pub url: String,
}

impl WatchItem {
    pub fn asin(&self) -> Option<&str> {
        extract_asin(&self.url)
    }
}

/// Where the chosen price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Offers,
    Buybox,
}

/// Product page result: display name plus buybox price, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Buybox {
    pub name: String,
    pub price: Option<Decimal>,
}

/// Combined result of both pages for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub name: Option<String>,
    pub observation: Observation,
    pub source: Option<PriceSource>,
}

// ── watchlist / sellers ──

/// One item per line: a full URL, or a bare ASIN (`B` + 9 chars).
/// Blank lines and `#` comments are skipped; bad ASINs and URLs are logged.
pub fn parse_watchlist(text: &str) -> Vec<WatchItem> {
    let mut items = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let url = if line.starts_with("http") {
            if let Err(e) = Url::parse(line) {
                warn!("Invalid URL on line {}: {line} ({e})", n + 1);
                continue;
            }
            line.to_string()
        } else if line.starts_with('B') && line.len() == 10 {
            format!("https://www.amazon.com/dp/{line}")
        } else {
            warn!("Invalid ASIN on line {}: {line}", n + 1);
            continue;
        };
        items.push(WatchItem { url });
    }
    items
}

pub fn load_watchlist(path: &Path) -> Result<Vec<WatchItem>> {
    if !path.exists() {
        info!("{} not found", path.display());
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read watchlist {}", path.display()))?;
    let items = parse_watchlist(&text);
    info!("Loaded {} Amazon item(s)", items.len());
    Ok(items)
}

pub fn parse_sellers(text: &str) -> Vec<String> {
    let mut sellers: Vec<String> = text
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    sellers.dedup();
    sellers
}

/// Lowercased seller names; defaults when the file is missing.
pub fn load_valid_sellers(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        warn!("{} not found, using default sellers", path.display());
        return Ok(DEFAULT_SELLERS.iter().map(|s| s.to_string()).collect());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sellers {}", path.display()))?;
    let sellers = parse_sellers(&text);
    info!("Loaded {} valid seller(s)", sellers.len());
    Ok(sellers)
}

// ── extraction ──

pub fn extract_asin(url: &str) -> Option<&str> {
    ASIN_IN_URL
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn offers_url(asin: &str) -> String {
    format!("https://www.amazon.com/gp/offer-listing/{asin}")
}

/// First `1,234.56` / `12.34` style amount in `text`.
pub fn parse_price_text(text: &str) -> Option<Decimal> {
    let m = PRICE_TEXT.find(text)?;
    m.as_str().replace(',', "").parse().ok()
}

fn in_range(price: Decimal) -> bool {
    (MIN_PRICE..=MAX_PRICE).contains(&price)
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn matching_seller<'a>(seller_text: &str, valid: &'a [String]) -> Option<&'a str> {
    valid
        .iter()
        .find(|v| seller_text.contains(v.as_str()))
        .map(String::as_str)
}

/// Name and buybox price from a product page.
///
/// The seller is only logged; the price is accepted from the first selector
/// (by tier) whose text parses into the sanity range.
pub fn extract_buybox(html: &str, valid_sellers: &[String]) -> Buybox {
    if is_challenge_page(html) {
        return Buybox {
            name: "Amazon CAPTCHA/robot page".to_string(),
            price: None,
        };
    }
    let doc = Html::parse_document(html);

    let name = doc
        .select(&PRODUCT_TITLE)
        .next()
        .or_else(|| doc.select(&TITLE).next())
        .map(element_text)
        .map(|n| truncate_chars(&n, 80))
        .unwrap_or_else(|| "Amazon Product".to_string());

    if name == "Amazon.com" || (name.chars().count() < 20 && name.contains("Amazon")) {
        return Buybox { name, price: None };
    }

    let seller = SELLER
        .iter()
        .find_map(|(_, sel)| doc.select(sel).next())
        .map(|el| element_text(el).to_lowercase());
    let seller_match = seller
        .as_deref()
        .and_then(|s| matching_seller(s, valid_sellers));

    for (tier, selectors) in PRICE_TIERS.iter() {
        for (css, sel) in selectors {
            let Some(el) = doc.select(sel).next() else {
                continue;
            };
            let text = element_text(el);
            match parse_price_text(&text) {
                Some(price) if in_range(price) => {
                    debug!(
                        "Buybox ${price:.2} from {} [{css}] [{tier}]",
                        seller_match.unwrap_or("unknown seller")
                    );
                    return Buybox {
                        name,
                        price: Some(price),
                    };
                }
                other => debug!(
                    "Price rejected from {css}: '{}' -> {other:?}",
                    truncate_chars(&text, 50)
                ),
            }
        }
    }
    debug!("No valid buybox price for {name}");
    Buybox { name, price: None }
}

/// Lowest in-range price among the first offers sold by a valid seller.
pub fn extract_offers(html: &str, valid_sellers: &[String]) -> Option<(Decimal, String)> {
    let doc = Html::parse_document(html);
    let mut best: Option<(Decimal, String)> = None;
    for offer in doc.select(&OFFER).take(MAX_OFFERS) {
        let Some(seller_el) = offer.select(&OFFER_SELLER).next() else {
            continue;
        };
        let seller_text = element_text(seller_el).to_lowercase();
        let Some(seller) = matching_seller(&seller_text, valid_sellers) else {
            continue;
        };
        let Some(price) = offer
            .select(&OFFER_PRICE)
            .next()
            .and_then(|el| parse_price_text(&element_text(el)))
        else {
            continue;
        };
        if in_range(price) && best.as_ref().is_none_or(|(b, _)| price < *b) {
            best = Some((price, seller.to_string()));
        }
    }
    if let Some((price, seller)) = &best {
        debug!("Offers: lowest ${price:.2} from {seller}");
    }
    best
}

/// The lower of the two prices; ties go to the offers page.
pub fn best_price(
    offers: Option<Decimal>,
    buybox: Option<Decimal>,
) -> Option<(Decimal, PriceSource)> {
    let offers = offers.filter(|p| *p > Decimal::ZERO);
    match (offers, buybox) {
        (Some(o), Some(b)) if b < o => Some((b, PriceSource::Buybox)),
        (Some(o), _) => Some((o, PriceSource::Offers)),
        (None, Some(b)) => Some((b, PriceSource::Buybox)),
        (None, None) => None,
    }
}

/// Turn whatever was fetched into an observation.
///
/// Both pages missing is a transient `FetchFailed`; any page fetched without
/// a usable price is `NoPrice`.
pub fn observe(
    offers_html: Option<&str>,
    product_html: Option<&str>,
    valid_sellers: &[String],
) -> Observed {
    if offers_html.is_none() && product_html.is_none() {
        return Observed {
            name: None,
            observation: Observation::FetchFailed,
            source: None,
        };
    }
    let offers = offers_html.and_then(|h| extract_offers(h, valid_sellers));
    let buybox = product_html.map(|h| extract_buybox(h, valid_sellers));
    let name = buybox.as_ref().map(|b| b.name.clone());

    match best_price(offers.map(|(p, _)| p), buybox.and_then(|b| b.price)) {
        Some((price, source)) => Observed {
            name,
            observation: Observation::Price(price),
            source: Some(source),
        },
        None => Observed {
            name,
            observation: Observation::NoPrice,
            source: None,
        },
    }
}

// ── messages ──

/// Price change alert; `None` for every other outcome.
pub fn format_change(name: &str, url: &str, check: &PriceCheck) -> Option<Message> {
    let PriceCheck::Changed {
        direction,
        old,
        new,
        delta,
        pct,
    } = check
    else {
        return None;
    };
    let label = match direction {
        Direction::Dropped => "🟢 DROPPED",
        Direction::Increased => "🔴 INCREASED",
    };
    Some(Message::markdown(format!(
        "{label}\n{}\n{}\n*Old:* ${old:.2} → *New:* ${new:.2}\n*{delta:.2}* ({pct:.1}%)",
        escape_markdown(&truncate_chars(name, 80)),
        escape_markdown(url),
    )))
}

pub fn format_issue(url: &str, fail_count: u32) -> Message {
    Message::plain(format!("🚨 URL ISSUE: {url} ({fail_count} polls/404)"))
}

/// End-of-cycle summary: items with state out of the watchlist total.
pub fn format_summary(active: usize, total: usize, interval_secs: u64, now: NaiveDateTime) -> Message {
    let hours = interval_secs as f64 / 3600.0;
    Message::plain(format!(
        "✅ Every {hours:.0}hr: {active}/{total} @ {}",
        now.format(TIME_FORMAT)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sellers() -> Vec<String> {
        DEFAULT_SELLERS.iter().map(|s| s.to_string()).collect()
    }

    fn product_page(title: &str, body: &str) -> String {
        format!(
            r#"<html><head><title>Amazon.com: {title}</title></head><body>
            <span id="productTitle">  {title}  </span>{body}</body></html>"#
        )
    }

    // ── watchlist ──

    #[test]
    fn watchlist_lines() {
        let text = "# comment\n\nB000000001\nhttps://www.amazon.com/dp/B000000002?th=1\nX123\nB00SHORT\nhttps://[bad\n";
        let items = parse_watchlist(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://www.amazon.com/dp/B000000001");
        assert_eq!(items[1].asin(), Some("B000000002"));
    }

    #[test]
    fn sellers_lowercased() {
        assert_eq!(
            parse_sellers("Amazon.com\n\n  Amazon Resale \n"),
            vec!["amazon.com", "amazon resale"]
        );
    }

    #[test]
    fn missing_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_watchlist(&dir.path().join("w.txt")).unwrap().is_empty());
        assert_eq!(
            load_valid_sellers(&dir.path().join("s.txt")).unwrap(),
            sellers()
        );
    }

    // ── price text ──

    #[test]
    fn price_text_forms() {
        assert_eq!(parse_price_text("$1,299.99"), Some(dec!(1299.99)));
        assert_eq!(parse_price_text("$1299.99"), Some(dec!(1299.99)));
        assert_eq!(parse_price_text("Now 39.99 was 49.99"), Some(dec!(39.99)));
        assert_eq!(parse_price_text("$40"), None);
    }

    // ── buybox ──

    #[test]
    fn buybox_prefers_earlier_tier() {
        let html = product_page(
            "Instant Pot Duo 7-in-1 Electric Pressure Cooker",
            r#"<div id="corePrice_feature_div"><span class="a-offscreen">$99.95</span></div>
               <div id="apexOfferPriceBlock"><span class="a-offscreen">$79.95</span></div>
               <div id="merchant-info"><a>Amazon.com</a></div>"#,
        );
        let b = extract_buybox(&html, &sellers());
        assert_eq!(b.name, "Instant Pot Duo 7-in-1 Electric Pressure Cooker");
        assert_eq!(b.price, Some(dec!(79.95)));
    }

    #[test]
    fn buybox_skips_out_of_range() {
        let html = product_page(
            "Instant Pot Duo 7-in-1 Electric Pressure Cooker",
            r#"<span id="priceblock_ourprice">$9,999.00</span>
               <div id="price_inside_buybox"><span class="a-offscreen">$89.00</span></div>"#,
        );
        assert_eq!(extract_buybox(&html, &sellers()).price, Some(dec!(89.00)));
    }

    #[test]
    fn buybox_generic_or_challenge_page_has_no_price() {
        let generic = r#"<html><head><title>Amazon.com</title></head>
            <span id="priceblock_ourprice">$10.00</span></html>"#;
        let b = extract_buybox(generic, &sellers());
        assert_eq!(b.name, "Amazon.com");
        assert_eq!(b.price, None);

        let captcha = "<html><title>Robot Check</title>Enter the characters you see below</html>";
        assert_eq!(extract_buybox(captcha, &sellers()).price, None);
    }

    // ── offers ──

    #[test]
    fn offers_lowest_valid_seller() {
        let html = r#"<html><body>
            <div class="olpOffer"><h3 class="olpSellerName">CheapCo</h3><span class="olpOfferPrice">$10.00</span></div>
            <div class="olpOffer"><h3 class="olpSellerName">Amazon.com</h3><span class="olpOfferPrice">$24.99</span></div>
            <div class="olpOffer"><h3 class="olpSellerName">Amazon Warehouse Deals</h3><span class="olpOfferPrice">$19.50</span></div>
            <div class="olpOffer"><h3 class="olpSellerName">Amazon.com</h3></div>
        </body></html>"#;
        let (price, seller) = extract_offers(html, &sellers()).unwrap();
        assert_eq!(price, dec!(19.50));
        assert_eq!(seller, "amazon warehouse deals");
    }

    #[test]
    fn lower_price_wins() {
        assert_eq!(
            best_price(Some(dec!(20)), Some(dec!(18))),
            Some((dec!(18), PriceSource::Buybox))
        );
        assert_eq!(
            best_price(Some(dec!(20)), Some(dec!(20))),
            Some((dec!(20), PriceSource::Offers))
        );
        assert_eq!(
            best_price(Some(dec!(0)), Some(dec!(5))),
            Some((dec!(5), PriceSource::Buybox))
        );
        assert_eq!(best_price(None, None), None);
    }

    #[test]
    fn observation_from_pages() {
        let s = sellers();
        assert_eq!(observe(None, None, &s).observation, Observation::FetchFailed);

        let empty = observe(Some("<html></html>"), None, &s);
        assert_eq!(empty.observation, Observation::NoPrice);
        assert_eq!(empty.name, None);

        let page = product_page(
            "Instant Pot Duo 7-in-1 Electric Pressure Cooker",
            r#"<div id="corePrice_feature_div"><span class="a-offscreen">$99.95</span></div>"#,
        );
        let seen = observe(None, Some(&page), &s);
        assert_eq!(seen.observation, Observation::Price(dec!(99.95)));
        assert_eq!(seen.source, Some(PriceSource::Buybox));
    }

    // ── messages ──

    #[test]
    fn change_message() {
        let check = PriceCheck::Changed {
            direction: Direction::Dropped,
            old: dec!(49.99),
            new: dec!(39.99),
            delta: dec!(10.00),
            pct: dec!(20.0),
        };
        let msg = format_change("Widget_Pro", "https://www.amazon.com/dp/B000000001", &check).unwrap();
        assert_eq!(
            msg.text,
            "🟢 DROPPED\nWidget\\_Pro\nhttps://www.amazon.com/dp/B000000001\n*Old:* $49.99 → *New:* $39.99\n*10.00* (20.0%)"
        );
        let stable = PriceCheck::Stable { price: dec!(1) };
        assert!(format_change("x", "u", &stable).is_none());
    }

    #[test]
    fn issue_and_summary_messages() {
        assert_eq!(
            format_issue("https://a/dp/B1", 6).text,
            "🚨 URL ISSUE: https://a/dp/B1 (6 polls/404)"
        );
        let now = NaiveDate::from_ymd_opt(2026, 1, 28)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        assert_eq!(
            format_summary(3, 4, 86_400, now).text,
            "✅ Every 24hr: 3/4 @ 2026-01-28 09:05:00"
        );
    }
}
