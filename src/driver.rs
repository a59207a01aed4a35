//! Poll-cycle orchestration shared by every binary.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{AppConfig, SendFailurePolicy};
use crate::fetch::Fetcher;
use crate::id_store::IdStore;
use crate::notify::{Message, Notifier, TelegramNotifier, truncate_chars};
use crate::price::PriceTracker;
use crate::seen::{SeenStore, filter_new};
use crate::sources::amazon::{self, Observed, WatchItem};
use crate::sources::dedupe_by_key;
use crate::types::{Candidate, CycleReport, PriceCheck, SeenRecord};

/// Everything a poll cycle needs, built once per process.
pub struct PollContext<N: Notifier> {
    pub config: AppConfig,
    pub fetcher: Fetcher,
    pub notifier: N,
}

impl PollContext<TelegramNotifier> {
    /// Context that sends through Telegram, sharing the fetcher's HTTP client.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&config.settings.fetch)?;
        let notifier = TelegramNotifier::new(fetcher.client().clone(), &config.telegram);
        Ok(Self {
            config,
            fetcher,
            notifier,
        })
    }
}

impl<N: Notifier> PollContext<N> {
    pub fn new(config: AppConfig, fetcher: Fetcher, notifier: N) -> Self {
        Self {
            config,
            fetcher,
            notifier,
        }
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.config.settings.message_delay_ms)
    }
}

/// Persistent record of notified keys.
pub trait SeenLedger {
    fn commit(&self, records: &[SeenRecord]) -> Result<()>;
}

impl SeenLedger for SeenStore {
    fn commit(&self, records: &[SeenRecord]) -> Result<()> {
        SeenStore::commit(self, records)
    }
}

/// ID-per-line stores keep only the key.
impl SeenLedger for IdStore {
    fn commit(&self, records: &[SeenRecord]) -> Result<()> {
        self.append_new(records.iter().map(|r| r.key.as_str()))
            .map(|_| ())
    }
}

/// Counters for one [`notify_new`] / [`notify_digest`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotifyOutcome {
    pub new: usize,
    pub sent: usize,
    pub failed: usize,
    pub committed: usize,
}

impl NotifyOutcome {
    /// Add these counters to a cycle report.
    pub fn add_to(self, report: &mut CycleReport) {
        report.new += self.new;
        report.sent += self.sent;
        report.failed += self.failed;
    }
}

/// Wall-clock time in the format seen stores are written with.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn should_commit(policy: SendFailurePolicy, delivered: bool) -> bool {
    delivered || policy == SendFailurePolicy::MarkSeen
}

/// Send one message per candidate not yet in `seen`, then record it.
///
/// A key repeated within `candidates` is sent once.
/// Each candidate is committed right after its send attempt. A failed send is
/// still committed under [`SendFailurePolicy::MarkSeen`]; under
/// [`SendFailurePolicy::Retry`] it stays out of the ledger and the seen set so
/// the next cycle tries again. A ledger write error aborts the batch.
pub async fn notify_new<N, L, C, F>(
    ctx: &PollContext<N>,
    ledger: &L,
    seen: &mut HashSet<String>,
    candidates: &[C],
    format: F,
    now: NaiveDateTime,
) -> Result<NotifyOutcome>
where
    N: Notifier,
    L: SeenLedger + ?Sized,
    C: Candidate + Clone,
    F: Fn(&C) -> Message,
{
    let fresh = dedupe_by_key(filter_new(candidates, seen));
    let mut outcome = NotifyOutcome {
        new: fresh.len(),
        ..NotifyOutcome::default()
    };
    if fresh.is_empty() {
        info!("No new items");
        return Ok(outcome);
    }
    info!("🚨 {} new item(s)", fresh.len());

    let policy = ctx.config.settings.send_failure_policy;
    for (i, candidate) in fresh.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(ctx.message_delay()).await;
        }
        let delivered = match ctx.notifier.send(&format(candidate)).await {
            Ok(()) => {
                info!("✅ Sent: {}", truncate_chars(&candidate.display_text(), 60));
                outcome.sent += 1;
                true
            }
            Err(e) => {
                warn!("Send failed for {}: {e:#}", candidate.key());
                outcome.failed += 1;
                false
            }
        };
        if should_commit(policy, delivered) {
            ledger.commit(&[SeenRecord::from_candidate(candidate, now)])?;
            seen.insert(candidate.key().to_string());
            outcome.committed += 1;
        }
    }
    Ok(outcome)
}

/// Send a single combined message for `candidates` and record all of them.
///
/// Candidates already in `seen` are left out of the commit; the caller builds
/// `message` from the fresh ones.
pub async fn notify_digest<N, L, C>(
    ctx: &PollContext<N>,
    ledger: &L,
    seen: &mut HashSet<String>,
    candidates: &[C],
    message: &Message,
    now: NaiveDateTime,
) -> Result<NotifyOutcome>
where
    N: Notifier,
    L: SeenLedger + ?Sized,
    C: Candidate + Clone,
{
    let fresh = dedupe_by_key(filter_new(candidates, seen));
    let mut outcome = NotifyOutcome {
        new: fresh.len(),
        ..NotifyOutcome::default()
    };
    if fresh.is_empty() {
        return Ok(outcome);
    }

    let delivered = match ctx.notifier.send(message).await {
        Ok(()) => {
            info!("✅ Sent digest of {} item(s)", fresh.len());
            outcome.sent = fresh.len();
            true
        }
        Err(e) => {
            warn!("Digest send failed: {e:#}");
            outcome.failed = fresh.len();
            false
        }
    };
    if should_commit(ctx.config.settings.send_failure_policy, delivered) {
        let records: Vec<SeenRecord> = fresh
            .iter()
            .map(|c| SeenRecord::from_candidate(c, now))
            .collect();
        ledger.commit(&records)?;
        seen.extend(fresh.iter().map(|c| c.key().to_string()));
        outcome.committed = records.len();
    }
    Ok(outcome)
}

// ── price items ──

async fn fetch_optional(fetcher: &Fetcher, url: &str) -> Option<String> {
    match fetcher.fetch_page(url).await {
        Ok(body) => Some(body),
        Err(e) => {
            warn!("Fetch failed for {url}: {e:#}");
            None
        }
    }
}

/// One watchlist item's verdict, plus whether the alert it called for went out.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemCheck {
    pub check: PriceCheck,
    /// `None` when no message was due.
    pub alert_delivered: Option<bool>,
}

impl ItemCheck {
    fn silent(check: PriceCheck) -> Self {
        Self {
            check,
            alert_delivered: None,
        }
    }
}

/// Check one watchlist item: cooldown first, then offers and product pages.
pub async fn check_item<N: Notifier>(
    ctx: &PollContext<N>,
    tracker: &mut PriceTracker,
    item: &WatchItem,
    valid_sellers: &[String],
    now: DateTime<Utc>,
) -> ItemCheck {
    if let Some(until) = tracker.cooling_down_until(&item.url, now) {
        info!("Cooldown until {until}: {}", item.url);
        return ItemCheck::silent(PriceCheck::CoolingDown { until });
    }
    let Some(asin) = item.asin() else {
        warn!("Cannot extract ASIN from {}", item.url);
        return ItemCheck::silent(PriceCheck::FetchFailed);
    };

    info!("Checking {}", item.url);
    let offers_html = fetch_optional(&ctx.fetcher, &amazon::offers_url(asin)).await;
    let product_html = fetch_optional(&ctx.fetcher, &item.url).await;
    let observed = amazon::observe(offers_html.as_deref(), product_html.as_deref(), valid_sellers);
    apply_observation(ctx, tracker, &item.url, observed, now).await
}

/// Feed an observation into the tracker and send whatever it calls for.
pub async fn apply_observation<N: Notifier>(
    ctx: &PollContext<N>,
    tracker: &mut PriceTracker,
    url: &str,
    observed: Observed,
    now: DateTime<Utc>,
) -> ItemCheck {
    let name = observed.name.unwrap_or_default();
    let check = tracker.check_price(url, &name, observed.observation, now);
    let display = tracker
        .items
        .get(url)
        .map(|s| s.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| url.to_string());
    let short = truncate_chars(&display, 40);

    let message = match &check {
        PriceCheck::CoolingDown { .. } => None,
        PriceCheck::FetchFailed => {
            warn!("Transient fetch failure for {url}; not counted as an issue");
            None
        }
        PriceCheck::Failing { fail_count } => {
            let threshold = ctx.config.tracker.fail_threshold;
            warn!("Fail {fail_count}/{threshold} (page but no valid price): {url}");
            None
        }
        PriceCheck::Issue { fail_count, until } => {
            error!("ISSUE: {url} ({fail_count}), cooling down until {until}");
            Some(amazon::format_issue(url, *fail_count))
        }
        PriceCheck::Baseline { price } => {
            info!("Initial price ${price:.2} ({:?}) - {short}", observed.source);
            None
        }
        PriceCheck::Stable { price } => {
            info!("Stable price ${price:.2} ({:?}) {short}", observed.source);
            None
        }
        PriceCheck::Changed {
            direction,
            old,
            new,
            ..
        } => {
            info!("{direction:?} ${old:.2} → ${new:.2} ({:?}) {short}", observed.source);
            amazon::format_change(&display, url, &check)
        }
    };

    let alert_delivered = match message {
        Some(message) => match ctx.notifier.send(&message).await {
            Ok(()) => Some(true),
            Err(e) => {
                warn!("Alert send failed for {url}: {e:#}");
                Some(false)
            }
        },
        None => None,
    };
    ItemCheck {
        check,
        alert_delivered,
    }
}

// ── loop helpers ──

/// `base_secs` scaled by `1 + fraction * roll`, with `roll` in `[-1, 1]`.
pub fn jittered(base_secs: u64, fraction: f64, roll: f64) -> Duration {
    let factor = 1.0 + fraction.clamp(0.0, 1.0) * roll.clamp(-1.0, 1.0);
    Duration::from_secs_f64((base_secs as f64 * factor).max(0.0))
}

/// Poll interval with a uniform `±fraction` jitter.
pub fn interval_with_jitter(base_secs: u64, fraction: f64) -> Duration {
    jittered(base_secs, fraction, rand::thread_rng().gen_range(-1.0..=1.0))
}

/// Uniform random interval in `[min_secs, max_secs]`.
pub fn random_interval(min_secs: u64, max_secs: u64) -> Duration {
    let (lo, hi) = (min_secs.min(max_secs), min_secs.max(max_secs));
    Duration::from_secs(rand::thread_rng().gen_range(lo..=hi))
}

/// Sleep for `delay` unless Ctrl+C arrives first. Returns `false` on shutdown.
pub async fn sleep_or_shutdown(delay: Duration) -> bool {
    info!("⏱️ Next poll in {:.0}s", delay.as_secs_f64());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
