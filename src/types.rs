use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Common capability of everything an extractor produces.
pub trait Candidate {
    /// Stable identity used for dedup (URL, ASIN, slug, job URL).
    fn key(&self) -> &str;

    /// Human-readable text used in logs and messages.
    fn display_text(&self) -> String;

    /// Fields written into the seen-store metadata line, before the timestamp.
    fn audit_metadata(&self) -> Vec<String> {
        vec![self.display_text()]
    }
}

/// A watchlist item with an optional observed price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedItem {
    pub key: String,
    pub name: String,
    pub url: String,
    pub price: Option<Decimal>,
}

/// A deal scraped from a feed or listing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealListing {
    pub key: String,
    pub title: String,
    /// Page the deal was found on (original feed link, product page).
    pub url: String,
    /// Link sent to the user (referral link, Amazon URL). Usually equal to `url`.
    pub link_url: String,
    pub likes: Option<u32>,
    /// Current price, when the source shows one.
    pub price: Option<Decimal>,
    /// e.g. `"49.99 → 39.99 (20%)"` for price-drop sources.
    pub price_change: Option<String>,
    pub drop_pct: Option<f64>,
}

impl DealListing {
    /// Deal whose key, page and outbound link are all the same URL.
    pub fn simple(key: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            key: key.into(),
            title: title.into(),
            link_url: url.clone(),
            url,
            likes: None,
            price: None,
            price_change: None,
            drop_pct: None,
        }
    }
}

/// A job posting from a job board API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPosting {
    pub key: String,
    pub title: String,
    pub company: String,
    pub salary_min: Option<u64>,
    pub url: String,
}

/// Tagged union over every source's record type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Listing {
    Priced(PricedItem),
    Deal(DealListing),
    Job(JobPosting),
}

impl Candidate for PricedItem {
    fn key(&self) -> &str {
        &self.key
    }

    fn display_text(&self) -> String {
        self.name.clone()
    }

    fn audit_metadata(&self) -> Vec<String> {
        let price = self
            .price
            .map(|p| format!("${p:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        vec![self.name.clone(), price]
    }
}

impl Candidate for DealListing {
    fn key(&self) -> &str {
        &self.key
    }

    fn display_text(&self) -> String {
        self.title.clone()
    }

    fn audit_metadata(&self) -> Vec<String> {
        let mut fields = vec![self.title.clone()];
        if let Some(likes) = self.likes {
            fields.push(format!("likes={likes}"));
        }
        if let Some(change) = &self.price_change {
            fields.push(change.clone());
        }
        fields
    }
}

impl Candidate for JobPosting {
    fn key(&self) -> &str {
        &self.key
    }

    fn display_text(&self) -> String {
        format!("{} @ {}", self.title, self.company)
    }

    fn audit_metadata(&self) -> Vec<String> {
        vec![self.title.clone(), self.company.clone()]
    }
}

impl Candidate for Listing {
    fn key(&self) -> &str {
        match self {
            Listing::Priced(item) => item.key(),
            Listing::Deal(deal) => deal.key(),
            Listing::Job(job) => job.key(),
        }
    }

    fn display_text(&self) -> String {
        match self {
            Listing::Priced(item) => item.display_text(),
            Listing::Deal(deal) => deal.display_text(),
            Listing::Job(job) => job.display_text(),
        }
    }

    fn audit_metadata(&self) -> Vec<String> {
        match self {
            Listing::Priced(item) => item.audit_metadata(),
            Listing::Deal(deal) => deal.audit_metadata(),
            Listing::Job(job) => job.audit_metadata(),
        }
    }
}

/// One persisted seen-store group.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenRecord {
    pub key: String,
    /// Display-only fields; never used for identity.
    pub metadata: Vec<String>,
    pub observed_at: NaiveDateTime,
}

impl SeenRecord {
    pub fn from_candidate<C: Candidate + ?Sized>(candidate: &C, observed_at: NaiveDateTime) -> Self {
        Self {
            key: candidate.key().to_string(),
            metadata: candidate.audit_metadata(),
            observed_at,
        }
    }
}

/// Persisted per-item price history entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceState {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fail_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Result of one extraction attempt for a priced item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Page fetched and a price extracted.
    Price(Decimal),
    /// Page fetched but no usable price on it.
    NoPrice,
    /// Nothing fetched at all. Not counted against the item.
    FetchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Dropped,
    Increased,
}

/// Outcome of feeding one observation into the price tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PriceCheck {
    /// Item skipped: still inside its cooldown window.
    CoolingDown { until: DateTime<Utc> },
    /// Transient fetch failure; state untouched.
    FetchFailed,
    /// No price; fail counter bumped but below threshold.
    Failing { fail_count: u32 },
    /// Threshold reached; caller should send an issue message.
    Issue { fail_count: u32, until: DateTime<Utc> },
    /// First price recorded.
    Baseline { price: Decimal },
    /// Price within epsilon of the last one.
    Stable { price: Decimal },
    Changed {
        direction: Direction,
        old: Decimal,
        new: Decimal,
        delta: Decimal,
        pct: Decimal,
    },
}

/// One price-tracker item's outcome within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub key: String,
    #[serde(flatten)]
    pub check: PriceCheck,
}

/// Machine-readable summary of one completed poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub timestamp: String,
    pub poller: String,
    /// Candidates extracted this cycle, after source filters.
    pub candidates: usize,
    /// Candidates not in the seen set.
    pub new: usize,
    pub sent: usize,
    pub failed: usize,
    pub seen_total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemOutcome>,
}

impl CycleReport {
    pub fn new(poller: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339(),
            poller: poller.to_string(),
            candidates: 0,
            new: 0,
            sent: 0,
            failed: 0,
            seen_total: 0,
            items: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deal_metadata_includes_likes_and_change() {
        let mut deal = DealListing::simple("k", "Cheap TV", "https://x/f/1");
        deal.likes = Some(12);
        deal.price_change = Some("10.00 → 8.00 (20%)".to_string());
        assert_eq!(
            deal.audit_metadata(),
            vec!["Cheap TV", "likes=12", "10.00 → 8.00 (20%)"]
        );
    }

    #[test]
    fn listing_delegates_to_variant() {
        let job = Listing::Job(JobPosting {
            key: "https://remoteok.com/1".to_string(),
            title: "Senior Python Engineer".to_string(),
            company: "Acme".to_string(),
            salary_min: Some(150),
            url: "https://remoteok.com/1".to_string(),
        });
        assert_eq!(job.key(), "https://remoteok.com/1");
        assert_eq!(job.display_text(), "Senior Python Engineer @ Acme");
    }

    #[test]
    fn priced_metadata_formats_cents() {
        let item = PricedItem {
            key: "B000000001".to_string(),
            name: "Widget".to_string(),
            url: "https://www.amazon.com/dp/B000000001".to_string(),
            price: Some(dec!(39.9)),
        };
        assert_eq!(item.audit_metadata(), vec!["Widget", "$39.90"]);
    }

    #[test]
    fn cycle_report_flattens_item_outcomes() {
        use chrono::TimeZone;
        let mut report =
            CycleReport::new("price_tracker", Utc.with_ymd_and_hms(2026, 1, 28, 9, 0, 0).unwrap());
        let empty = serde_json::to_value(&report).unwrap();
        assert!(empty.get("items").is_none());

        report.items.push(ItemOutcome {
            key: "https://www.amazon.com/dp/B000000001".to_string(),
            check: PriceCheck::Baseline { price: dec!(49.99) },
        });
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["timestamp"], "2026-01-28T09:00:00+00:00");
        assert_eq!(v["items"][0]["outcome"], "baseline");
        assert_eq!(v["items"][0]["price"], "49.99");
    }

    #[test]
    fn price_state_accepts_legacy_numeric_price() {
        let state: PriceState =
            serde_json::from_str(r#"{"name":"Widget","last_price":49.99,"last_seen":null}"#)
                .unwrap();
        assert_eq!(state.last_price, Some(dec!(49.99)));
        assert_eq!(state.fail_count, 0);
        assert!(state.cooldown_until.is_none());
    }
}
