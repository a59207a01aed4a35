use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, warn};

use crate::config::TrackerConfig;
use crate::seen::write_atomic;
use crate::types::{Direction, Observation, PriceCheck, PriceState};

/// Per-item price history with a fail counter and cooldown.
///
/// Persisted as a pretty JSON object `key → PriceState`, rewritten whole on
/// every save.
pub struct PriceTracker {
    path: PathBuf,
    pub items: BTreeMap<String, PriceState>,
    fail_threshold: u32,
    cooldown: TimeDelta,
    epsilon: Decimal,
}

impl PriceTracker {
    /// Empty tracker backed by `path`. Nothing is read or written.
    pub fn new(path: impl Into<PathBuf>, config: &TrackerConfig) -> Self {
        Self {
            path: path.into(),
            items: BTreeMap::new(),
            fail_threshold: config.fail_threshold.max(1),
            cooldown: TimeDelta::hours(config.cooldown_hours),
            epsilon: config.price_epsilon,
        }
    }

    /// Load state from `path`. A missing or corrupt file yields an empty tracker.
    pub fn load(path: impl Into<PathBuf>, config: &TrackerConfig) -> Self {
        let mut tracker = Self::new(path, config);
        match std::fs::read_to_string(&tracker.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(items) => tracker.items = items,
                Err(e) => warn!("Failed to parse state {}: {e}", tracker.path.display()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to read state {}: {e}", tracker.path.display()),
        }
        info!("Loaded price state for {} item(s)", tracker.items.len());
        tracker
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write-temp-then-rename save.
    pub fn save(&self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.items).context("failed to serialize price state")?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("failed to save price state {}", self.path.display()))
    }

    /// Items with a recorded price.
    pub fn active_items(&self) -> usize {
        self.items.values().filter(|s| s.last_price.is_some()).count()
    }

    /// Cooldown end if `key` is still suspended at `now`.
    pub fn cooling_down_until(&self, key: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.items
            .get(key)
            .and_then(|s| s.cooldown_until)
            .filter(|until| now < *until)
    }

    /// Feed one observation for `key` and update its state.
    ///
    /// - inside cooldown → `CoolingDown`, nothing changes
    /// - `FetchFailed` → nothing changes
    /// - `NoPrice` → fail counter +1; at the threshold an `Issue` starts the
    ///   cooldown and resets the counter
    /// - `Price` → counter reset; first price is the `Baseline`; a change of at
    ///   least epsilon is `Changed`, anything smaller is `Stable` and leaves
    ///   `last_price` alone
    pub fn check_price(
        &mut self,
        key: &str,
        name: &str,
        observation: Observation,
        now: DateTime<Utc>,
    ) -> PriceCheck {
        if let Some(until) = self.cooling_down_until(key, now) {
            return PriceCheck::CoolingDown { until };
        }

        let price = match observation {
            Observation::FetchFailed => return PriceCheck::FetchFailed,
            Observation::NoPrice => return self.record_failure(key, name, now),
            Observation::Price(p) => p,
        };

        let state = self.items.entry(key.to_string()).or_default();
        state.fail_count = 0;
        state.cooldown_until = None;
        if !name.is_empty() {
            state.name = name.to_string();
        }
        state.last_seen = Some(now);

        let Some(old) = state.last_price else {
            state.last_price = Some(price);
            return PriceCheck::Baseline { price };
        };

        let delta = (price - old).abs();
        if delta < self.epsilon {
            return PriceCheck::Stable { price: old };
        }

        state.last_price = Some(price);
        let direction = if price < old {
            Direction::Dropped
        } else {
            Direction::Increased
        };
        PriceCheck::Changed {
            direction,
            old,
            new: price,
            delta,
            pct: percent_of(delta, old),
        }
    }

    /// Record the latest price without change detection.
    pub fn record_seen(&mut self, key: &str, name: &str, price: Decimal, now: DateTime<Utc>) {
        let state = self.items.entry(key.to_string()).or_default();
        state.name = name.to_string();
        state.last_price = Some(price);
        state.last_seen = Some(now);
    }

    fn record_failure(&mut self, key: &str, name: &str, now: DateTime<Utc>) -> PriceCheck {
        let state = self.items.entry(key.to_string()).or_default();
        if state.name.is_empty() && !name.is_empty() {
            state.name = name.to_string();
        }
        state.fail_count += 1;
        if state.fail_count < self.fail_threshold {
            return PriceCheck::Failing {
                fail_count: state.fail_count,
            };
        }

        let fail_count = state.fail_count;
        let until = now + self.cooldown;
        state.fail_count = 0;
        state.cooldown_until = Some(until);
        PriceCheck::Issue { fail_count, until }
    }
}

/// `delta / base * 100`, one decimal place. Zero base gives zero.
pub fn percent_of(delta: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }
    (delta / base * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap()
    }

    fn tracker() -> PriceTracker {
        PriceTracker::new("unused.json", &TrackerConfig::default())
    }

    fn seed(tracker: &mut PriceTracker, key: &str, price: Decimal) {
        let r = tracker.check_price(key, "Item", Observation::Price(price), t0());
        assert_eq!(r, PriceCheck::Baseline { price });
    }

    // ── change detection ───────────────────────────────────────────

    #[test]
    fn same_price_is_stable() {
        let mut t = tracker();
        seed(&mut t, "k", dec!(100.00));
        let r = t.check_price("k", "Item", Observation::Price(dec!(100.00)), t0());
        assert_eq!(r, PriceCheck::Stable { price: dec!(100.00) });
    }

    #[test]
    fn one_cent_drop_fires() {
        let mut t = tracker();
        seed(&mut t, "k", dec!(100.00));
        let r = t.check_price("k", "Item", Observation::Price(dec!(99.99)), t0());
        match r {
            PriceCheck::Changed {
                direction, delta, ..
            } => {
                assert_eq!(direction, Direction::Dropped);
                assert_eq!(delta, dec!(0.01));
            }
            other => panic!("expected change, got {other:?}"),
        }
        assert_eq!(t.items["k"].last_price, Some(dec!(99.99)));
    }

    #[test]
    fn half_cent_is_below_epsilon() {
        let mut t = tracker();
        seed(&mut t, "k", dec!(100.00));
        let r = t.check_price("k", "Item", Observation::Price(dec!(100.005)), t0());
        assert_eq!(r, PriceCheck::Stable { price: dec!(100.00) });
        assert_eq!(t.items["k"].last_price, Some(dec!(100.00)));
    }

    #[test]
    fn increase_classified() {
        let mut t = tracker();
        seed(&mut t, "k", dec!(20));
        let r = t.check_price("k", "Item", Observation::Price(dec!(25)), t0());
        assert_eq!(
            r,
            PriceCheck::Changed {
                direction: Direction::Increased,
                old: dec!(20),
                new: dec!(25),
                delta: dec!(5),
                pct: dec!(25.0),
            }
        );
    }

    #[test]
    fn watchlist_scenario() {
        let mut t = tracker();
        seed(&mut t, "B0WIDGET01", dec!(49.99));

        let r = t.check_price("B0WIDGET01", "Widget", Observation::Price(dec!(39.99)), t0());
        assert_eq!(
            r,
            PriceCheck::Changed {
                direction: Direction::Dropped,
                old: dec!(49.99),
                new: dec!(39.99),
                delta: dec!(10.00),
                pct: dec!(20.0),
            }
        );

        let r = t.check_price("B0WIDGET01", "Widget", Observation::Price(dec!(39.985)), t0());
        assert_eq!(r, PriceCheck::Stable { price: dec!(39.99) });
    }

    #[test]
    fn percent_rounds_to_one_place() {
        assert_eq!(percent_of(dec!(1), dec!(3)), dec!(33.3));
        assert_eq!(percent_of(dec!(5), dec!(0)), Decimal::ZERO);
    }

    // ── fail counter / cooldown ────────────────────────────────────

    #[test]
    fn six_misses_escalate_once() {
        let mut t = tracker();
        seed(&mut t, "k", dec!(10));
        for n in 1..6 {
            let r = t.check_price("k", "Item", Observation::NoPrice, t0());
            assert_eq!(r, PriceCheck::Failing { fail_count: n });
        }
        let r = t.check_price("k", "Item", Observation::NoPrice, t0());
        let until = t0() + TimeDelta::hours(24);
        assert_eq!(r, PriceCheck::Issue { fail_count: 6, until });

        // Seventh observation inside the window is skipped.
        let later = t0() + TimeDelta::hours(1);
        assert_eq!(t.cooling_down_until("k", later), Some(until));
        let r = t.check_price("k", "Item", Observation::NoPrice, later);
        assert_eq!(r, PriceCheck::CoolingDown { until });
        assert_eq!(t.items["k"].last_price, Some(dec!(10)));
    }

    #[test]
    fn cooldown_elapses_lazily() {
        let mut t = tracker();
        for _ in 0..6 {
            t.check_price("k", "Item", Observation::NoPrice, t0());
        }
        let after = t0() + TimeDelta::hours(24);
        assert_eq!(t.cooling_down_until("k", after), None);
        let r = t.check_price("k", "Item", Observation::NoPrice, after);
        assert_eq!(r, PriceCheck::Failing { fail_count: 1 });
    }

    #[test]
    fn success_resets_fail_count() {
        let mut t = tracker();
        for _ in 0..5 {
            t.check_price("k", "Item", Observation::NoPrice, t0());
        }
        let r = t.check_price("k", "Item", Observation::Price(dec!(3.50)), t0());
        assert_eq!(r, PriceCheck::Baseline { price: dec!(3.50) });
        assert_eq!(t.items["k"].fail_count, 0);
        let r = t.check_price("k", "Item", Observation::NoPrice, t0());
        assert_eq!(r, PriceCheck::Failing { fail_count: 1 });
    }

    #[test]
    fn fetch_failure_is_not_counted() {
        let mut t = tracker();
        for _ in 0..10 {
            let r = t.check_price("k", "Item", Observation::FetchFailed, t0());
            assert_eq!(r, PriceCheck::FetchFailed);
        }
        assert!(!t.items.contains_key("k"));
    }

    // ── persistence ────────────────────────────────────────────────

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let config = TrackerConfig::default();

        let mut t = PriceTracker::new(&path, &config);
        seed(&mut t, "a", dec!(12.34));
        t.record_seen("b", "Other", dec!(5), t0());
        for _ in 0..6 {
            t.check_price("c", "Broken", Observation::NoPrice, t0());
        }
        t.save().unwrap();
        assert!(!dir.path().join("state.json.tmp").exists());

        let loaded = PriceTracker::load(&path, &config);
        assert_eq!(loaded.items, t.items);
        assert_eq!(loaded.active_items(), 2);
        assert!(loaded.cooling_down_until("c", t0()).is_some());
    }

    #[test]
    fn corrupt_state_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let t = PriceTracker::load(&path, &TrackerConfig::default());
        assert!(t.items.is_empty());
    }
}
